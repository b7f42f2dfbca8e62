//! Network model: nodes and lines held in id-keyed maps.
//!
//! Nodes and lines never reference each other directly. Every relation is a
//! lookup by id through [`Network`], so the graph can be walked and mutated
//! between ticks without ownership cycles.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

use super::diagnostics::TickSummary;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Random v4 id drawn from `rng`, reproducible under a fixed seed
            pub fn from_rng<R: Rng + ?Sized>(rng: &mut R) -> Self {
                Self(uuid::Builder::from_random_bytes(rng.gen()).into_uuid())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_type!(
    /// Identity of a grid instance
    GridId
);
id_type!(
    /// Identity of a node within a grid
    NodeId
);
id_type!(
    /// Identity of a line within a grid
    LineId
);

/// Static attributes of a node or line, stored uniformly as key → value.
pub type Props = serde_json::Map<String, Value>;

/// Build a [`Props`] map from a JSON object. Anything else yields an empty map.
pub fn props(value: Value) -> Props {
    match value {
        Value::Object(map) => map,
        _ => Props::new(),
    }
}

/// Typed reads over a [`Props`] map. Numeric strings are accepted as numbers.
pub trait PropsExt {
    fn get_f64(&self, key: &str) -> Option<f64>;
    fn get_str(&self, key: &str) -> Option<&str>;

    fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.get_f64(key).unwrap_or(default)
    }

    /// A strictly positive value, or `None`
    fn positive(&self, key: &str) -> Option<f64> {
        self.get_f64(key).filter(|v| *v > 0.0)
    }
}

impl PropsExt for Props {
    fn get_f64(&self, key: &str) -> Option<f64> {
        let value = match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        value.is_finite().then_some(value)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

/// Display-only coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum NodeKind {
    #[serde(alias = "plant")]
    #[strum(to_string = "source", serialize = "plant")]
    Source,
    #[serde(alias = "tp")]
    #[strum(to_string = "transformer", serialize = "tp")]
    Transformer,
    #[strum(to_string = "pole")]
    Pole,
    #[serde(alias = "house")]
    #[strum(to_string = "consumer", serialize = "house")]
    Consumer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    #[default]
    #[strum(to_string = "online")]
    Online,
    #[strum(to_string = "de-energized")]
    DeEnergized,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum LineStatus {
    #[default]
    #[strum(to_string = "online")]
    Online,
    #[strum(to_string = "faulted")]
    Faulted,
}

/// Transient electrical state of a node, rewritten every tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// Active power drawn (consumer) or passing through (others) in kW
    pub p_kw: f64,
    pub q_kvar: f64,
    pub s_kva: f64,
    pub voltage_kv: f64,
    /// Conversion loss, transformers only
    pub loss_kw: f64,
    /// Loading against the node's rating, when it has one
    pub utilization: Option<f64>,
    pub overloaded: bool,
    /// Set when the propagated voltage had to be clamped at zero
    pub voltage_collapse: bool,
}

impl NodeState {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Transient electrical state of a line, rewritten every tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineState {
    /// Sending-end active power in kW
    pub p_kw: f64,
    pub q_kvar: f64,
    pub s_kva: f64,
    pub loss_kw: f64,
    pub utilization: Option<f64>,
    pub overloaded: bool,
}

impl LineState {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub position: Position,
    #[serde(default)]
    pub props: Props,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    pub fn new(kind: NodeKind, position: Position, props: Props) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            position,
            props,
            state: NodeState::default(),
            status: NodeStatus::Online,
        }
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    /// Typed view of the props for this node's kind
    pub fn spec(&self) -> NodeSpec {
        match self.kind {
            NodeKind::Source => NodeSpec::Source(SourceProps::from_props(&self.props)),
            NodeKind::Transformer => {
                NodeSpec::Transformer(TransformerProps::from_props(&self.props))
            }
            NodeKind::Pole => NodeSpec::Pole(PoleProps::from_props(&self.props)),
            NodeKind::Consumer => NodeSpec::Consumer(ConsumerProps::from_props(&self.props)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    pub id: LineId,
    pub from_id: NodeId,
    pub to_id: NodeId,
    #[serde(default)]
    pub props: Props,
    #[serde(default)]
    pub state: LineState,
    #[serde(default)]
    pub status: LineStatus,
}

impl Line {
    pub fn new(from_id: NodeId, to_id: NodeId, props: Props) -> Self {
        Self {
            id: LineId::new(),
            from_id,
            to_id,
            props,
            state: LineState::default(),
            status: LineStatus::Online,
        }
    }

    pub fn with_id(mut self, id: LineId) -> Self {
        self.id = id;
        self
    }

    pub fn is_online(&self) -> bool {
        self.status == LineStatus::Online
    }

    pub fn electrical(&self) -> LineProps {
        LineProps::from_props(&self.props)
    }
}

/// Props schema per node kind
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSpec {
    Source(SourceProps),
    Transformer(TransformerProps),
    Pole(PoleProps),
    Consumer(ConsumerProps),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceProps {
    pub p_max_kw: Option<f64>,
    pub voltage_kv: Option<f64>,
}

impl SourceProps {
    pub fn from_props(props: &Props) -> Self {
        Self {
            p_max_kw: props.positive("p_max_kw"),
            voltage_kv: props
                .positive("voltage_out_kv")
                .or_else(|| props.positive("voltage_kv")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformerProps {
    /// Output over input, within (0, 1]
    pub efficiency: f64,
    pub capacity_kva: Option<f64>,
    pub voltage_in_kv: Option<f64>,
    pub voltage_out_kv: Option<f64>,
}

impl TransformerProps {
    const MIN_EFFICIENCY: f64 = 0.01;

    pub fn from_props(props: &Props) -> Self {
        Self {
            efficiency: props
                .f64_or("efficiency", 1.0)
                .clamp(Self::MIN_EFFICIENCY, 1.0),
            capacity_kva: props.positive("capacity_kva"),
            voltage_in_kv: props.positive("voltage_in_kv"),
            voltage_out_kv: props.positive("voltage_out_kv"),
        }
    }

    /// Secondary over primary voltage, when both sides are rated
    pub fn turns_ratio(&self) -> Option<f64> {
        match (self.voltage_in_kv, self.voltage_out_kv) {
            (Some(v_in), Some(v_out)) => Some(v_out / v_in),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoleProps {
    pub capacity_kw: Option<f64>,
    pub voltage_kv: Option<f64>,
}

impl PoleProps {
    pub fn from_props(props: &Props) -> Self {
        Self {
            capacity_kw: props.positive("capacity_kw"),
            voltage_kv: props.positive("voltage_kv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerProps {
    pub base_kw: f64,
    pub profile: String,
    pub cos_phi: f64,
}

impl ConsumerProps {
    pub const DEFAULT_BASE_KW: f64 = 1.5;
    pub const DEFAULT_PROFILE: &'static str = "residential";
    pub const DEFAULT_COS_PHI: f64 = 0.95;

    pub fn from_props(props: &Props) -> Self {
        Self {
            base_kw: props.f64_or("base_kw", Self::DEFAULT_BASE_KW),
            profile: props
                .get_str("profile")
                .unwrap_or(Self::DEFAULT_PROFILE)
                .to_string(),
            cos_phi: props
                .f64_or("cos_phi", Self::DEFAULT_COS_PHI)
                .clamp(0.5, 1.0),
        }
    }
}

/// Electrical parameters of a line; impedance defaults to zero
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineProps {
    pub r_pu: f64,
    pub x_pu: f64,
    pub capacity_kva: Option<f64>,
    pub voltage_kv: Option<f64>,
}

impl LineProps {
    pub fn from_props(props: &Props) -> Self {
        Self {
            r_pu: props.f64_or("r_pu", 0.0).max(0.0),
            x_pu: props.f64_or("x_pu", 0.0).max(0.0),
            capacity_kva: props.positive("capacity_kva"),
            voltage_kv: props.positive("voltage_kv"),
        }
    }

    pub fn is_zero_impedance(&self) -> bool {
        self.r_pu == 0.0 && self.x_pu == 0.0
    }
}

/// Grid-level metadata published alongside every snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridMeta {
    /// Simulation time of the last tick, in seconds
    pub sim_time: f64,
    /// Hour of day of the last tick, in [0, 24)
    pub hour: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub ticks: u64,
    #[serde(default)]
    pub last_tick: Option<TickSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    pub id: GridId,
    pub nodes: BTreeMap<NodeId, Node>,
    pub lines: BTreeMap<LineId, Line>,
    pub meta: GridMeta,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    pub fn add_line(&mut self, line: Line) -> LineId {
        let id = line.id;
        self.lines.insert(id, line);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn line(&self, id: LineId) -> Option<&Line> {
        self.lines.get(&id)
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.values().filter(move |n| n.kind == kind)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes_of_kind(NodeKind::Source)
    }

    pub fn consumers(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes_of_kind(NodeKind::Consumer)
    }

    /// True when both endpoints of the line exist
    pub fn is_attached(&self, line: &Line) -> bool {
        self.nodes.contains_key(&line.from_id) && self.nodes.contains_key(&line.to_id)
    }
}
