use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::network::{GridId, GridMeta, Line, LineId, Network, Node, NodeId};

/// Serializable view of a grid, published after every tick and command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub id: GridId,
    pub meta: GridMeta,
    pub nodes: BTreeMap<NodeId, Node>,
    pub lines: BTreeMap<LineId, Line>,
    pub captured_at: DateTime<Utc>,
}

impl From<&Network> for GridSnapshot {
    fn from(network: &Network) -> Self {
        Self {
            id: network.id,
            meta: network.meta.clone(),
            nodes: network.nodes.clone(),
            lines: network.lines.clone(),
            captured_at: Utc::now(),
        }
    }
}
