use serde::{Deserialize, Serialize};

use super::network::{LineId, NodeId};

/// A place where the online subgraph stops being a forest.
///
/// The offending line is left out of every energized tree, so the flow
/// result is still radial, just not the one a meshed solver would give.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyIssue {
    /// An online line closes a cycle inside one energized tree
    Loop { line_id: LineId, root: NodeId },
    /// An online line joins the trees of two different sources
    MultipleSources {
        line_id: LineId,
        first_root: NodeId,
        second_root: NodeId,
    },
}

impl TopologyIssue {
    pub fn line_id(&self) -> LineId {
        match self {
            TopologyIssue::Loop { line_id, .. } => *line_id,
            TopologyIssue::MultipleSources { line_id, .. } => *line_id,
        }
    }
}

/// Aggregate result of one tick, kept in the grid metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub energized_trees: usize,
    pub energized_nodes: usize,
    pub de_energized_nodes: usize,
    /// Sum of sampled consumer demand, energized or not
    pub sampled_demand_kw: f64,
    /// Demand actually served by energized trees
    pub served_demand_kw: f64,
    pub supplied_kw: f64,
    pub line_loss_kw: f64,
    pub transformer_loss_kw: f64,
    pub overloaded_lines: Vec<LineId>,
    pub overloaded_nodes: Vec<NodeId>,
    pub collapsed_nodes: Vec<NodeId>,
    pub issues: Vec<TopologyIssue>,
}

impl TickSummary {
    pub fn total_loss_kw(&self) -> f64 {
        self.line_loss_kw + self.transformer_loss_kw
    }

    pub fn has_overload(&self) -> bool {
        !self.overloaded_lines.is_empty() || !self.overloaded_nodes.is_empty()
    }
}
