//! # Line Faults
//!
//! Line status is the only directly settable status: online ⇄ faulted.
//! Node status is derived, so every change here ends with a fresh topology
//! resolution that re-energizes or islands the affected nodes.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::topology::{refresh_status, Topology};
use crate::domain::{CommandError, LineId, LineStatus, Network};

/// What a fault or repair command changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultOutcome {
    /// Lines whose status actually changed
    pub changed: Vec<LineId>,
    pub energized_nodes: usize,
    pub de_energized_nodes: usize,
}

impl FaultOutcome {
    fn new(changed: Vec<LineId>, topology: &Topology) -> Self {
        Self {
            changed,
            energized_nodes: topology.energized_count(),
            de_energized_nodes: topology.de_energized.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultInjector {
    /// Chance in [0, 1] that a trigger request actually faults a line
    pub probability: f64,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self { probability: 1.0 }
    }
}

impl FaultInjector {
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_finite() {
            probability.clamp(0.0, 1.0)
        } else {
            1.0
        };
        Self { probability }
    }

    /// Fault the given line, or a uniformly chosen online line when none is given.
    ///
    /// With a probability below 1.0 the request may do nothing; the outcome
    /// then lists no changed lines.
    pub fn trigger<R: Rng + ?Sized>(
        &self,
        network: &mut Network,
        line_id: Option<LineId>,
        rng: &mut R,
    ) -> Result<FaultOutcome, CommandError> {
        if let Some(id) = line_id {
            if !network.lines.contains_key(&id) {
                return Err(CommandError::UnknownLine(id));
            }
        }
        if self.probability < 1.0 && rng.gen::<f64>() >= self.probability {
            let topology = refresh_status(network);
            return Ok(FaultOutcome::new(Vec::new(), &topology));
        }

        let target = match line_id {
            Some(id) => Some(id),
            None => {
                let candidates: Vec<LineId> = network
                    .lines
                    .values()
                    .filter(|l| l.is_online())
                    .map(|l| l.id)
                    .collect();
                candidates.choose(rng).copied()
            }
        };

        let mut changed = Vec::new();
        if let Some(id) = target {
            if let Some(line) = network.lines.get_mut(&id) {
                if line.status != LineStatus::Faulted {
                    line.status = LineStatus::Faulted;
                    changed.push(id);
                }
            }
        }

        let topology = refresh_status(network);
        let outcome = FaultOutcome::new(changed, &topology);
        info!(
            faulted = ?outcome.changed,
            de_energized = outcome.de_energized_nodes,
            "fault triggered"
        );
        Ok(outcome)
    }
}

/// Set one line's status explicitly
pub fn set_line_status(
    network: &mut Network,
    line_id: LineId,
    status: LineStatus,
) -> Result<FaultOutcome, CommandError> {
    let line = network
        .lines
        .get_mut(&line_id)
        .ok_or(CommandError::UnknownLine(line_id))?;

    let changed = if line.status != status {
        line.status = status;
        vec![line_id]
    } else {
        Vec::new()
    };

    let topology = refresh_status(network);
    Ok(FaultOutcome::new(changed, &topology))
}

/// Return every faulted line to service
pub fn clear_faults(network: &mut Network) -> FaultOutcome {
    let mut changed = Vec::new();
    for line in network.lines.values_mut() {
        if line.status == LineStatus::Faulted {
            line.status = LineStatus::Online;
            changed.push(line.id);
        }
    }

    let topology = refresh_status(network);
    let outcome = FaultOutcome::new(changed, &topology);
    info!(repaired = outcome.changed.len(), "faults cleared");
    outcome
}
