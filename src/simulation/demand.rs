//! # Consumer Demand Sampling
//!
//! Turns each consumer's base load, profile class and power factor into a
//! noisy (P, Q) draw for the current tick. This is the only place a tick
//! consumes randomness, and the RNG always comes from the caller.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::load_profile::LoadProfile;
use crate::domain::{ConsumerProps, Network, NodeKind};

/// Lower bound on a sampled consumer draw in kW
pub const MIN_DEMAND_KW: f64 = 0.1;

/// Default noise standard deviation as a fraction of the mean
pub const DEFAULT_NOISE_SIGMA: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandSample {
    pub p_kw: f64,
    pub q_kvar: f64,
    pub s_kva: f64,
}

impl DemandSample {
    /// Complete a sample from active power and power factor
    pub fn from_active(p_kw: f64, cos_phi: f64) -> Self {
        let phi = cos_phi.clamp(0.5, 1.0).acos();
        let q_kvar = p_kw * phi.tan();
        Self {
            p_kw,
            q_kvar,
            s_kva: (p_kw * p_kw + q_kvar * q_kvar).sqrt(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DemandSummary {
    pub consumers: usize,
    pub total_p_kw: f64,
    pub total_q_kvar: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandSampler {
    /// Noise standard deviation as a fraction of the mean; 0 disables noise
    pub noise_sigma: f64,
}

impl Default for DemandSampler {
    fn default() -> Self {
        Self {
            noise_sigma: DEFAULT_NOISE_SIGMA,
        }
    }
}

impl DemandSampler {
    pub fn new(noise_sigma: f64) -> Self {
        let noise_sigma = if noise_sigma.is_finite() {
            noise_sigma.max(0.0)
        } else {
            DEFAULT_NOISE_SIGMA
        };
        Self { noise_sigma }
    }

    /// Draw one consumer's demand at `hour`
    pub fn sample_consumer<R: Rng + ?Sized>(
        &self,
        consumer: &ConsumerProps,
        hour: f64,
        rng: &mut R,
    ) -> DemandSample {
        let mult = LoadProfile::from_class(&consumer.profile).multiplier(hour);
        let mean = consumer.base_kw.max(0.0) * mult;
        let std_dev = mean * self.noise_sigma;

        let drawn = Normal::new(mean, std_dev)
            .map(|normal| normal.sample(rng))
            .unwrap_or(mean);
        let p_kw = if drawn.is_finite() {
            drawn.max(MIN_DEMAND_KW)
        } else {
            MIN_DEMAND_KW
        };

        DemandSample::from_active(p_kw, consumer.cos_phi)
    }

    /// Sample every consumer in id order and write the draw into its state.
    ///
    /// De-energized consumers are sampled too so the random stream does not
    /// depend on fault state; the topology pass zeroes them afterwards.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        network: &mut Network,
        hour: f64,
        rng: &mut R,
    ) -> DemandSummary {
        let mut summary = DemandSummary::default();

        for node in network
            .nodes
            .values_mut()
            .filter(|n| n.kind == NodeKind::Consumer)
        {
            let props = ConsumerProps::from_props(&node.props);
            let sample = self.sample_consumer(&props, hour, rng);

            node.state.clear();
            node.state.p_kw = sample.p_kw;
            node.state.q_kvar = sample.q_kvar;
            node.state.s_kva = sample.s_kva;

            summary.consumers += 1;
            summary.total_p_kw += sample.p_kw;
            summary.total_q_kvar += sample.q_kvar;
        }

        summary
    }
}
