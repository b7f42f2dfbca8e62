//! # Topology Resolution
//!
//! Walks the online-line subgraph from every source and derives the forest
//! of energized trees plus the set of islanded nodes. Line direction is a
//! flow convention only; connectivity is undirected.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

use crate::domain::{LineId, Network, NodeId, NodeKind, NodeStatus, TopologyIssue};

/// One source and everything it reaches through online lines
#[derive(Debug, Clone, PartialEq)]
pub struct EnergizedTree {
    pub root: NodeId,
    /// Breadth-first visit order, root first. Reversed, it is a valid
    /// leaves-to-root order for aggregation.
    pub order: Vec<NodeId>,
    /// Upstream neighbour and the line leading to it, for every non-root node
    pub parents: HashMap<NodeId, (NodeId, LineId)>,
}

impl EnergizedTree {
    fn new(root: NodeId) -> Self {
        Self {
            root,
            order: vec![root],
            parents: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub trees: Vec<EnergizedTree>,
    /// Nodes with no online path to any source, in id order
    pub de_energized: Vec<NodeId>,
    pub issues: Vec<TopologyIssue>,
    energized: HashSet<NodeId>,
    tree_lines: HashSet<LineId>,
}

impl Topology {
    pub fn is_energized(&self, node: NodeId) -> bool {
        self.energized.contains(&node)
    }

    pub fn energized_count(&self) -> usize {
        self.energized.len()
    }

    /// True when the line is part of some energized tree
    pub fn carries_flow(&self, line: LineId) -> bool {
        self.tree_lines.contains(&line)
    }

    pub fn is_radial(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Undirected adjacency over online lines with both endpoints present
fn online_adjacency(network: &Network) -> HashMap<NodeId, Vec<(NodeId, LineId)>> {
    let mut adjacency: HashMap<NodeId, Vec<(NodeId, LineId)>> = HashMap::new();
    for line in network.lines.values() {
        if !line.is_online() || !network.is_attached(line) || line.from_id == line.to_id {
            continue;
        }
        adjacency
            .entry(line.from_id)
            .or_default()
            .push((line.to_id, line.id));
        adjacency
            .entry(line.to_id)
            .or_default()
            .push((line.from_id, line.id));
    }
    adjacency
}

/// Derive energized trees and islands from the current line set and fault status.
///
/// Runs in O(nodes + lines). A line that would close a cycle, or join two
/// sources' trees, is left out of every tree and reported as a
/// [`TopologyIssue`].
pub fn resolve(network: &Network) -> Topology {
    let adjacency = online_adjacency(network);
    let sources: Vec<NodeId> = network.sources().map(|n| n.id).collect();
    let is_source = |id: NodeId| {
        network
            .node(id)
            .map(|n| n.kind == NodeKind::Source)
            .unwrap_or(false)
    };

    let mut owner: HashMap<NodeId, usize> = HashMap::new();
    let mut tree_lines: HashSet<LineId> = HashSet::new();
    let mut reported: HashSet<LineId> = HashSet::new();
    let mut trees: Vec<EnergizedTree> = Vec::with_capacity(sources.len());
    let mut issues = Vec::new();

    for root in sources {
        let index = trees.len();
        let mut tree = EnergizedTree::new(root);
        owner.insert(root, index);

        let mut queue = VecDeque::from([root]);
        while let Some(u) = queue.pop_front() {
            let Some(neighbours) = adjacency.get(&u) else {
                continue;
            };
            for &(v, line_id) in neighbours {
                if tree_lines.contains(&line_id) {
                    continue;
                }
                let issue = match owner.get(&v).copied() {
                    None if is_source(v) => Some(TopologyIssue::MultipleSources {
                        line_id,
                        first_root: root,
                        second_root: v,
                    }),
                    None => {
                        owner.insert(v, index);
                        tree_lines.insert(line_id);
                        tree.parents.insert(v, (u, line_id));
                        tree.order.push(v);
                        queue.push_back(v);
                        None
                    }
                    Some(t) if t == index => Some(TopologyIssue::Loop { line_id, root }),
                    Some(t) => Some(TopologyIssue::MultipleSources {
                        line_id,
                        first_root: trees[t].root,
                        second_root: root,
                    }),
                };
                if let Some(issue) = issue {
                    if reported.insert(line_id) {
                        issues.push(issue);
                    }
                }
            }
        }
        trees.push(tree);
    }

    let de_energized = network
        .nodes
        .keys()
        .filter(|id| !owner.contains_key(id))
        .copied()
        .collect();

    for issue in &issues {
        warn!(line_id = %issue.line_id(), ?issue, "online subgraph is not radial");
    }

    Topology {
        trees,
        de_energized,
        issues,
        energized: owner.into_keys().collect(),
        tree_lines,
    }
}

/// Write derived status into the network.
///
/// Energized nodes go online; every other node goes de-energized with its
/// electrical state zeroed. Lines outside the energized trees are zeroed.
pub fn apply_status(network: &mut Network, topology: &Topology) {
    for node in network.nodes.values_mut() {
        if topology.is_energized(node.id) {
            node.status = NodeStatus::Online;
        } else {
            node.status = NodeStatus::DeEnergized;
            node.state.clear();
        }
    }
    for line in network.lines.values_mut() {
        if !topology.carries_flow(line.id) {
            line.state.clear();
        }
    }
}

/// Resolve and apply in one step; used after fault and topology commands
pub fn refresh_status(network: &mut Network) -> Topology {
    let topology = resolve(network);
    apply_status(network, &topology);
    topology
}
