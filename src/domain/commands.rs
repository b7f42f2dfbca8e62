//! Topology and fault commands.
//!
//! Commands arrive as `{"action": "...", "payload": {...}}`. Each one is
//! validated against the network before anything is mutated, so a rejected
//! command leaves the network exactly as it was.

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::network::{
    Line, LineId, LineStatus, Network, Node, NodeId, NodeKind, NodeStatus, Position, Props,
};
use crate::simulation::faults::{self, FaultInjector, FaultOutcome};
use crate::simulation::topology;

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid payload for {action}: {reason}")]
    InvalidPayload { action: String, reason: String },

    #[error("Unknown node type: {0}")]
    UnknownNodeKind(String),

    #[error("Node {0} not found")]
    UnknownNode(NodeId),

    #[error("Line {0} not found")]
    UnknownLine(LineId),

    #[error("Line endpoint {0} does not exist")]
    MissingEndpoint(NodeId),

    #[error("Line cannot start and end at node {0}")]
    SelfLoop(NodeId),

    #[error("Position must have finite x and y")]
    InvalidPosition,
}

impl CommandError {
    /// True when the command referenced an id that does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, CommandError::UnknownNode(_) | CommandError::UnknownLine(_))
    }
}

/// Wire form of a command, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// A validated command. Built only from a [`CommandRequest`] off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum GridCommand {
    SetLineStatus {
        line_id: LineId,
        status: LineStatus,
    },
    TriggerFault {
        line_id: Option<LineId>,
    },
    ClearFaults,
    AddNode {
        kind: NodeKind,
        position: Position,
        props: Props,
    },
    AddLine {
        from_id: NodeId,
        to_id: NodeId,
        props: Props,
    },
    SetNodePosition {
        node_id: NodeId,
        position: Position,
    },
    UpdateNodeProps {
        node_id: NodeId,
        props: Props,
    },
}

#[derive(Deserialize)]
struct SetLineStatusPayload {
    line_id: LineId,
    status: LineStatus,
}

#[derive(Deserialize, Default)]
struct TriggerFaultPayload {
    #[serde(default)]
    line_id: Option<LineId>,
}

#[derive(Deserialize)]
struct AddNodePayload {
    #[serde(rename = "type", alias = "kind")]
    node_type: String,
    position: Position,
    #[serde(default)]
    props: Props,
}

#[derive(Deserialize)]
struct AddLinePayload {
    from_id: NodeId,
    to_id: NodeId,
    #[serde(default)]
    props: Props,
}

#[derive(Deserialize)]
struct SetNodePositionPayload {
    node_id: NodeId,
    position: Position,
}

#[derive(Deserialize)]
struct UpdateNodePropsPayload {
    node_id: NodeId,
    props: Props,
}

fn payload<T: DeserializeOwned>(action: &str, value: Value) -> Result<T, CommandError> {
    let value = match value {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(value).map_err(|e| CommandError::InvalidPayload {
        action: action.to_string(),
        reason: e.to_string(),
    })
}

impl TryFrom<CommandRequest> for GridCommand {
    type Error = CommandError;

    fn try_from(req: CommandRequest) -> Result<Self, Self::Error> {
        let action = req.action.trim();
        let command = match action {
            "set_line_status" => {
                let p: SetLineStatusPayload = payload(action, req.payload)?;
                GridCommand::SetLineStatus {
                    line_id: p.line_id,
                    status: p.status,
                }
            }
            "trigger_fault" => {
                let p: TriggerFaultPayload = payload(action, req.payload)?;
                GridCommand::TriggerFault { line_id: p.line_id }
            }
            "clear_faults" => GridCommand::ClearFaults,
            "add_node" => {
                let p: AddNodePayload = payload(action, req.payload)?;
                let kind = p
                    .node_type
                    .trim()
                    .parse::<NodeKind>()
                    .map_err(|_| CommandError::UnknownNodeKind(p.node_type.clone()))?;
                GridCommand::AddNode {
                    kind,
                    position: p.position,
                    props: p.props,
                }
            }
            "add_line" => {
                let p: AddLinePayload = payload(action, req.payload)?;
                GridCommand::AddLine {
                    from_id: p.from_id,
                    to_id: p.to_id,
                    props: p.props,
                }
            }
            "set_node_position" => {
                let p: SetNodePositionPayload = payload(action, req.payload)?;
                GridCommand::SetNodePosition {
                    node_id: p.node_id,
                    position: p.position,
                }
            }
            "update_node_props" => {
                let p: UpdateNodePropsPayload = payload(action, req.payload)?;
                GridCommand::UpdateNodeProps {
                    node_id: p.node_id,
                    props: p.props,
                }
            }
            other => return Err(CommandError::UnknownAction(other.to_string())),
        };
        Ok(command)
    }
}

/// What an accepted command did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    NodeAdded { node_id: NodeId },
    LineAdded { line_id: LineId },
    NodeMoved { node_id: NodeId },
    PropsUpdated { node_id: NodeId },
    Faults(FaultOutcome),
}

impl GridCommand {
    pub fn action(&self) -> &'static str {
        match self {
            GridCommand::SetLineStatus { .. } => "set_line_status",
            GridCommand::TriggerFault { .. } => "trigger_fault",
            GridCommand::ClearFaults => "clear_faults",
            GridCommand::AddNode { .. } => "add_node",
            GridCommand::AddLine { .. } => "add_line",
            GridCommand::SetNodePosition { .. } => "set_node_position",
            GridCommand::UpdateNodeProps { .. } => "update_node_props",
        }
    }

    /// Validate and apply the command.
    ///
    /// Structural commands only touch ids, positions, props and derived node
    /// status; fault commands also zero the state of anything they island.
    pub fn apply<R: Rng + ?Sized>(
        self,
        network: &mut Network,
        injector: &FaultInjector,
        rng: &mut R,
    ) -> Result<CommandOutcome, CommandError> {
        match self {
            GridCommand::SetLineStatus { line_id, status } => {
                faults::set_line_status(network, line_id, status).map(CommandOutcome::Faults)
            }
            GridCommand::TriggerFault { line_id } => injector
                .trigger(network, line_id, rng)
                .map(CommandOutcome::Faults),
            GridCommand::ClearFaults => Ok(CommandOutcome::Faults(faults::clear_faults(network))),
            GridCommand::AddNode {
                kind,
                position,
                props,
            } => {
                check_position(&position)?;
                let mut node = Node::new(kind, position, props).with_id(NodeId::from_rng(rng));
                // A lone source is its own energized tree; anything else is
                // islanded until a line reaches it
                if kind != NodeKind::Source {
                    node.status = NodeStatus::DeEnergized;
                }
                let node_id = network.add_node(node);
                Ok(CommandOutcome::NodeAdded { node_id })
            }
            GridCommand::AddLine {
                from_id,
                to_id,
                props,
            } => {
                for id in [from_id, to_id] {
                    if !network.nodes.contains_key(&id) {
                        return Err(CommandError::MissingEndpoint(id));
                    }
                }
                if from_id == to_id {
                    return Err(CommandError::SelfLoop(from_id));
                }
                let line = Line::new(from_id, to_id, props).with_id(LineId::from_rng(rng));
                let line_id = network.add_line(line);
                derive_status(network);
                Ok(CommandOutcome::LineAdded { line_id })
            }
            GridCommand::SetNodePosition { node_id, position } => {
                check_position(&position)?;
                let node = network
                    .nodes
                    .get_mut(&node_id)
                    .ok_or(CommandError::UnknownNode(node_id))?;
                node.position = position;
                Ok(CommandOutcome::NodeMoved { node_id })
            }
            GridCommand::UpdateNodeProps { node_id, props } => {
                let node = network
                    .nodes
                    .get_mut(&node_id)
                    .ok_or(CommandError::UnknownNode(node_id))?;
                node.props.extend(props);
                Ok(CommandOutcome::PropsUpdated { node_id })
            }
        }
    }
}

fn check_position(position: &Position) -> Result<(), CommandError> {
    if position.x.is_finite() && position.y.is_finite() {
        Ok(())
    } else {
        Err(CommandError::InvalidPosition)
    }
}

/// Re-derive node status after a structural change without touching state
fn derive_status(network: &mut Network) {
    let topology = topology::resolve(network);
    for node in network.nodes.values_mut() {
        node.status = if topology.is_energized(node.id) {
            NodeStatus::Online
        } else {
            NodeStatus::DeEnergized
        };
    }
}
