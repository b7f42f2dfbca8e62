//! # Tick Orchestration
//!
//! One tick: sample consumer demand, resolve topology, solve every energized
//! tree, then record time and a summary in the grid metadata. A tick runs to
//! completion on a quiescent network; callers serialize ticks and commands.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::demand::{DemandSampler, DemandSummary, DEFAULT_NOISE_SIGMA};
use super::load_profile::hour_of_day;
use super::solver::{RadialFlowSolver, TreeFlow};
use super::topology::{apply_status, resolve};
use crate::domain::{Network, TickSummary};

#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error("Simulation time must be finite, got {0}")]
    NonFiniteTime(f64),

    #[error("Simulation time {requested} is earlier than the last tick at {last}")]
    TimeRegression { requested: f64, last: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    /// Fixed step between streamed ticks, in simulation seconds
    pub dt: f64,
    pub noise_sigma: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            dt: 1.0,
            noise_sigma: DEFAULT_NOISE_SIGMA,
        }
    }
}

/// Everything one tick produced, beyond what it wrote into the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub sim_time: f64,
    pub hour: f64,
    pub demand: DemandSummary,
    pub flows: Vec<TreeFlow>,
    pub summary: TickSummary,
}

#[derive(Debug, Clone)]
pub struct SimulateTick {
    params: SimParams,
    sampler: DemandSampler,
    solver: RadialFlowSolver,
}

impl Default for SimulateTick {
    fn default() -> Self {
        Self::new(SimParams::default())
    }
}

impl SimulateTick {
    pub fn new(params: SimParams) -> Self {
        Self {
            params,
            sampler: DemandSampler::new(params.noise_sigma),
            solver: RadialFlowSolver::default(),
        }
    }

    pub fn with_solver(mut self, solver: RadialFlowSolver) -> Self {
        self.solver = solver;
        self
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// Time of the next fixed-step tick
    pub fn next_time(&self, network: &Network) -> f64 {
        network.meta.sim_time + self.params.dt
    }

    /// Advance the network to `sim_time` seconds.
    ///
    /// Rejects non-finite times and times before the previous tick without
    /// touching the network. Given the same seed, topology and time, the
    /// sampled consumer demand is bit-for-bit identical.
    pub fn execute<R: Rng + ?Sized>(
        &self,
        network: &mut Network,
        sim_time: f64,
        rng: &mut R,
    ) -> Result<TickReport, SimulationError> {
        if !sim_time.is_finite() {
            return Err(SimulationError::NonFiniteTime(sim_time));
        }
        if network.meta.ticks > 0 && sim_time < network.meta.sim_time {
            return Err(SimulationError::TimeRegression {
                requested: sim_time,
                last: network.meta.sim_time,
            });
        }

        let hour = hour_of_day(sim_time);
        let demand = self.sampler.sample(network, hour, rng);

        let topology = resolve(network);
        apply_status(network, &topology);

        let flows: Vec<TreeFlow> = topology
            .trees
            .iter()
            .map(|tree| self.solver.solve(network, tree))
            .collect();

        let mut summary = TickSummary {
            energized_trees: topology.trees.len(),
            energized_nodes: topology.energized_count(),
            de_energized_nodes: topology.de_energized.len(),
            sampled_demand_kw: demand.total_p_kw,
            issues: topology.issues.clone(),
            ..Default::default()
        };
        for flow in &flows {
            summary.served_demand_kw += flow.served_kw;
            summary.supplied_kw += flow.supplied_kw;
            summary.line_loss_kw += flow.line_loss_kw;
            summary.transformer_loss_kw += flow.transformer_loss_kw;
            summary.overloaded_lines.extend(&flow.overloaded_lines);
            summary.overloaded_nodes.extend(&flow.overloaded_nodes);
            summary.collapsed_nodes.extend(&flow.collapsed_nodes);
        }

        if summary.has_overload() {
            warn!(
                sim_time,
                lines = summary.overloaded_lines.len(),
                nodes = summary.overloaded_nodes.len(),
                "overload detected"
            );
        }
        if !summary.collapsed_nodes.is_empty() {
            warn!(sim_time, nodes = summary.collapsed_nodes.len(), "voltage collapse clamped");
        }
        debug!(
            grid_id = %network.id,
            sim_time,
            hour,
            trees = summary.energized_trees,
            de_energized = summary.de_energized_nodes,
            supplied_kw = summary.supplied_kw,
            loss_kw = summary.total_loss_kw(),
            "tick"
        );

        network.meta.sim_time = sim_time;
        network.meta.hour = hour;
        network.meta.ticks += 1;
        network.meta.last_tick = Some(summary.clone());

        Ok(TickReport {
            sim_time,
            hour,
            demand,
            flows,
            summary,
        })
    }
}
