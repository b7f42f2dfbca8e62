use anyhow::{ensure, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::simulation::SimParams;

const CONFIG_FILE: &str = "config/default.toml";
const ENV_PREFIX: &str = "PGT__";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            enable_cors: false,
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Simulated seconds per streamed tick
    pub dt_seconds: f64,
    pub noise_sigma: f64,
    /// Root voltage when neither the source nor its lines name one
    pub default_voltage_kv: f64,
    /// Seed for grids created without one; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
    pub fault_probability: f64,
    /// Wall-clock pause between streamed ticks
    pub stream_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let params = SimParams::default();
        Self {
            dt_seconds: params.dt,
            noise_sigma: params.noise_sigma,
            default_voltage_kv: crate::simulation::solver::DEFAULT_VOLTAGE_KV,
            seed: None,
            fault_probability: 1.0,
            stream_interval_ms: 1000,
        }
    }
}

impl SimulationConfig {
    pub fn params(&self) -> SimParams {
        SimParams {
            dt: self.dt_seconds,
            noise_sigma: self.noise_sigma,
        }
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms.max(1))
    }
}

impl Config {
    /// Defaults, then `config/default.toml`, then `PGT__SECTION__KEY` variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        ensure!(
            sim.dt_seconds.is_finite() && sim.dt_seconds > 0.0,
            "simulation.dt_seconds must be positive, got {}",
            sim.dt_seconds
        );
        ensure!(
            sim.noise_sigma.is_finite() && sim.noise_sigma >= 0.0,
            "simulation.noise_sigma must be non-negative, got {}",
            sim.noise_sigma
        );
        ensure!(
            sim.default_voltage_kv.is_finite() && sim.default_voltage_kv > 0.0,
            "simulation.default_voltage_kv must be positive, got {}",
            sim.default_voltage_kv
        );
        ensure!(
            (0.0..=1.0).contains(&sim.fault_probability),
            "simulation.fault_probability must be within [0, 1], got {}",
            sim.fault_probability
        );
        Ok(())
    }
}
