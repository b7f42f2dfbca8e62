//! # Radial Flow Solver
//!
//! Linearized branch-flow (DistFlow) solution for one energized tree:
//!
//! 1. Nominal pass (root → leaves): nominal voltage level at every line,
//!    used as the linearization point for losses.
//! 2. Backward sweep (leaves → root): aggregate consumer demand, line
//!    losses and transformer conversion losses into per-line flows.
//! 3. Forward sweep (root → leaves): propagate voltage magnitude down each
//!    line with the branch-flow relation.
//!
//! A tree has a unique path from every node to its root, so one pass each
//! way is exact for this model and no iteration is needed. The energy
//! balance `supplied = served + line losses + transformer losses` holds by
//! construction.

use std::collections::HashMap;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use super::topology::EnergizedTree;
use crate::domain::{
    LineId, LineProps, LineState, Network, NodeId, NodeSpec, NodeState,
};

/// Root voltage used when neither the source nor its lines name one
pub const DEFAULT_VOLTAGE_KV: f64 = 10.0;

/// Active/reactive power pair
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pq {
    pub p: f64,
    pub q: f64,
}

impl Pq {
    pub const ZERO: Pq = Pq { p: 0.0, q: 0.0 };

    pub fn new(p: f64, q: f64) -> Self {
        Self { p, q }
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.p * factor, self.q * factor)
    }

    pub fn squared_magnitude(self) -> f64 {
        self.p * self.p + self.q * self.q
    }

    pub fn apparent(self) -> f64 {
        self.squared_magnitude().sqrt()
    }
}

impl Add for Pq {
    type Output = Pq;

    fn add(self, rhs: Pq) -> Pq {
        Pq::new(self.p + rhs.p, self.q + rhs.q)
    }
}

impl AddAssign for Pq {
    fn add_assign(&mut self, rhs: Pq) {
        self.p += rhs.p;
        self.q += rhs.q;
    }
}

/// Result of solving one energized tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeFlow {
    pub root: Option<NodeId>,
    pub root_voltage_kv: f64,
    /// Active power leaving the source
    pub supplied_kw: f64,
    pub supplied_kvar: f64,
    /// Consumer demand inside the tree
    pub served_kw: f64,
    pub line_loss_kw: f64,
    pub transformer_loss_kw: f64,
    pub overloaded_lines: Vec<LineId>,
    pub overloaded_nodes: Vec<NodeId>,
    pub collapsed_nodes: Vec<NodeId>,
}

impl TreeFlow {
    /// Supplied minus served minus losses; zero up to rounding
    pub fn balance_error_kw(&self) -> f64 {
        self.supplied_kw - self.served_kw - self.line_loss_kw - self.transformer_loss_kw
    }
}

/// The line feeding a non-root node, with its parent's position in the tree order
struct Branch {
    line: LineId,
    parent: usize,
    props: LineProps,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialFlowSolver {
    pub default_voltage_kv: f64,
}

impl Default for RadialFlowSolver {
    fn default() -> Self {
        Self {
            default_voltage_kv: DEFAULT_VOLTAGE_KV,
        }
    }
}

impl RadialFlowSolver {
    pub fn new(default_voltage_kv: f64) -> Self {
        let default_voltage_kv = if default_voltage_kv.is_finite() && default_voltage_kv > 0.0 {
            default_voltage_kv
        } else {
            DEFAULT_VOLTAGE_KV
        };
        Self { default_voltage_kv }
    }

    /// Root voltage: the source's own rating, else the highest rated line
    /// leaving it, else the configured default.
    fn root_voltage(&self, spec: Option<&NodeSpec>, first_lines: &[&Branch]) -> f64 {
        if let Some(NodeSpec::Source(source)) = spec {
            if let Some(v) = source.voltage_kv {
                return v;
            }
        }
        first_lines
            .iter()
            .filter_map(|b| b.props.voltage_kv)
            .fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))))
            .unwrap_or(self.default_voltage_kv)
    }

    /// Solve one tree in place. Consumer (P, Q) must already be sampled.
    pub fn solve(&self, network: &mut Network, tree: &EnergizedTree) -> TreeFlow {
        let n = tree.order.len();
        if n == 0 {
            return TreeFlow::default();
        }
        let index: HashMap<NodeId, usize> = tree
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        let mut specs: Vec<Option<NodeSpec>> = Vec::with_capacity(n);
        let mut demand = vec![Pq::ZERO; n];
        let mut branches: Vec<Option<Branch>> = Vec::with_capacity(n);

        for (i, id) in tree.order.iter().enumerate() {
            let spec = network.node(*id).map(|node| node.spec());
            if let (Some(NodeSpec::Consumer(_)), Some(node)) = (&spec, network.node(*id)) {
                demand[i] = Pq::new(node.state.p_kw, node.state.q_kvar);
            }
            specs.push(spec);

            let branch = tree.parents.get(id).and_then(|(parent_id, line_id)| {
                let parent = *index.get(parent_id)?;
                let props = network
                    .line(*line_id)
                    .map(|l| l.electrical())
                    .unwrap_or_default();
                Some(Branch {
                    line: *line_id,
                    parent,
                    props,
                })
            });
            branches.push(branch);
        }

        // Nominal pass
        let root_lines: Vec<&Branch> = branches
            .iter()
            .flatten()
            .filter(|b| b.parent == 0)
            .collect();
        let root_voltage = self.root_voltage(specs[0].as_ref(), &root_lines);
        let mut nominal = vec![0.0; n];
        nominal[0] = root_voltage;
        for i in 1..n {
            if let Some(b) = &branches[i] {
                nominal[i] = b
                    .props
                    .voltage_kv
                    .unwrap_or_else(|| output_voltage(specs[b.parent].as_ref(), nominal[b.parent]));
            }
        }

        // Backward sweep
        let mut downstream = vec![Pq::ZERO; n];
        let mut drawn = vec![Pq::ZERO; n];
        let mut sending = vec![Pq::ZERO; n];
        let mut line_loss = vec![0.0; n];
        let mut conversion_loss = vec![0.0; n];

        for i in (0..n).rev() {
            let through = demand[i] + downstream[i];
            drawn[i] = match &specs[i] {
                Some(NodeSpec::Transformer(t)) => {
                    let input = through.scale(1.0 / t.efficiency);
                    conversion_loss[i] = input.p - through.p;
                    input
                }
                _ => through,
            };

            if let Some(b) = &branches[i] {
                let loss = branch_loss(&b.props, drawn[i], nominal[i]);
                line_loss[i] = loss.p;
                sending[i] = drawn[i] + loss;
                downstream[b.parent] += sending[i];
            }
        }

        // Forward sweep
        let mut voltage = vec![0.0; n];
        let mut collapsed = vec![false; n];
        voltage[0] = root_voltage;
        for i in 1..n {
            if let Some(b) = &branches[i] {
                let v_up = output_voltage(specs[b.parent].as_ref(), voltage[b.parent]);
                match branch_voltage(v_up, &b.props, sending[i]) {
                    Some(v) => voltage[i] = v,
                    None => collapsed[i] = true,
                }
            }
        }

        // Write back
        let mut flow = TreeFlow {
            root: Some(tree.root),
            root_voltage_kv: root_voltage,
            supplied_kw: drawn[0].p,
            supplied_kvar: drawn[0].q,
            ..Default::default()
        };

        for i in 0..n {
            let id = tree.order[i];
            if let Some(node) = network.nodes.get_mut(&id) {
                let mut state = NodeState {
                    voltage_kv: voltage[i],
                    voltage_collapse: collapsed[i],
                    ..Default::default()
                };
                let power = match &specs[i] {
                    Some(NodeSpec::Consumer(_)) => demand[i],
                    _ => drawn[i],
                };
                state.p_kw = power.p;
                state.q_kvar = power.q;
                state.s_kva = power.apparent();
                state.utilization = match &specs[i] {
                    Some(NodeSpec::Source(s)) => s.p_max_kw.map(|max| power.p / max),
                    Some(NodeSpec::Transformer(t)) => {
                        state.loss_kw = conversion_loss[i];
                        t.capacity_kva.map(|cap| state.s_kva / cap)
                    }
                    Some(NodeSpec::Pole(p)) => p.capacity_kw.map(|cap| power.p / cap),
                    Some(NodeSpec::Consumer(_)) | None => None,
                };
                state.overloaded = state.utilization.is_some_and(|u| u > 1.0);

                if state.overloaded {
                    flow.overloaded_nodes.push(id);
                }
                if state.voltage_collapse {
                    flow.collapsed_nodes.push(id);
                }
                if matches!(specs[i], Some(NodeSpec::Consumer(_))) {
                    flow.served_kw += power.p;
                }
                flow.transformer_loss_kw += conversion_loss[i];
                node.state = state;
            }

            if let Some(b) = &branches[i] {
                flow.line_loss_kw += line_loss[i];
                if let Some(line) = network.lines.get_mut(&b.line) {
                    let s_kva = sending[i].apparent();
                    let utilization = b.props.capacity_kva.map(|cap| s_kva / cap);
                    let overloaded = utilization.is_some_and(|u| u > 1.0);
                    if overloaded {
                        flow.overloaded_lines.push(b.line);
                    }
                    line.state = LineState {
                        p_kw: sending[i].p,
                        q_kvar: sending[i].q,
                        s_kva,
                        loss_kw: line_loss[i],
                        utilization,
                        overloaded,
                    };
                }
            }
        }

        flow
    }
}

/// Voltage a node hands to the lines below it
fn output_voltage(spec: Option<&NodeSpec>, voltage: f64) -> f64 {
    match spec {
        Some(NodeSpec::Transformer(t)) => t.turns_ratio().map_or(voltage, |ratio| voltage * ratio),
        _ => voltage,
    }
}

/// Series loss of a line carrying `flow` at its receiving end, linearized at
/// the nominal voltage
fn branch_loss(props: &LineProps, flow: Pq, nominal_kv: f64) -> Pq {
    if props.is_zero_impedance() || nominal_kv <= 0.0 {
        return Pq::ZERO;
    }
    let factor = flow.squared_magnitude() / (nominal_kv * nominal_kv);
    Pq::new(props.r_pu * factor, props.x_pu * factor)
}

/// Downstream voltage from the branch-flow relation
///
/// `V_down² = V_up² − 2(rP + xQ) + (r² + x²)(P² + Q²) / V_up²`
///
/// Returns `None` when the upstream voltage or the right-hand side is not
/// strictly positive; the caller clamps to zero and flags the node.
pub(crate) fn branch_voltage(v_up: f64, props: &LineProps, flow: Pq) -> Option<f64> {
    if !v_up.is_finite() || v_up <= 0.0 {
        return None;
    }
    if props.is_zero_impedance() {
        return Some(v_up);
    }
    let (r, x) = (props.r_pu, props.x_pu);
    let v_up2 = v_up * v_up;
    let v_down2 = v_up2 - 2.0 * (r * flow.p + x * flow.q)
        + (r * r + x * x) * flow.squared_magnitude() / v_up2;
    (v_down2.is_finite() && v_down2 > 0.0).then(|| v_down2.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{props, Line, Node, NodeKind, Position};
    use crate::simulation::topology::resolve;
    use serde_json::{json, Value};

    fn add(net: &mut Network, kind: NodeKind, p: Value) -> NodeId {
        net.add_node(Node::new(kind, Position::default(), props(p)))
    }

    fn connect(net: &mut Network, from: NodeId, to: NodeId, p: Value) -> LineId {
        net.add_line(Line::new(from, to, props(p)))
    }

    fn set_demand(net: &mut Network, id: NodeId, p: f64, q: f64) {
        let state = &mut net.nodes.get_mut(&id).unwrap().state;
        state.p_kw = p;
        state.q_kvar = q;
    }

    fn solve_all(net: &mut Network) -> Vec<TreeFlow> {
        let topo = resolve(net);
        let solver = RadialFlowSolver::default();
        topo.trees.iter().map(|t| solver.solve(net, t)).collect()
    }

    #[test]
    fn test_zero_impedance_chain_passes_demand_and_voltage() {
        let mut net = Network::new();
        let s = add(&mut net, NodeKind::Source, json!({ "voltage_out_kv": 10.0 }));
        let p = add(&mut net, NodeKind::Pole, json!({}));
        let c = add(&mut net, NodeKind::Consumer, json!({}));
        let l1 = connect(&mut net, s, p, json!({}));
        let l2 = connect(&mut net, p, c, json!({}));
        set_demand(&mut net, c, 2.0, 0.5);

        let flows = solve_all(&mut net);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].supplied_kw, 2.0);
        assert_eq!(flows[0].line_loss_kw, 0.0);
        assert_eq!(net.lines[&l1].state.p_kw, 2.0);
        assert_eq!(net.lines[&l2].state.q_kvar, 0.5);
        assert_eq!(net.nodes[&c].state.voltage_kv, 10.0);
        assert_eq!(net.nodes[&p].state.p_kw, 2.0);
    }

    #[test]
    fn test_transformer_efficiency_scales_upstream_flow() {
        let mut net = Network::new();
        let s = add(&mut net, NodeKind::Source, json!({ "p_max_kw": 120.0 }));
        let t = add(&mut net, NodeKind::Transformer, json!({ "efficiency": 0.98 }));
        let c1 = add(&mut net, NodeKind::Consumer, json!({}));
        let c2 = add(&mut net, NodeKind::Consumer, json!({}));
        let feed = connect(&mut net, s, t, json!({}));
        connect(&mut net, t, c1, json!({ "r_pu": 0.0 }));
        connect(&mut net, t, c2, json!({ "r_pu": 0.0 }));
        set_demand(&mut net, c1, 2.0, 0.0);
        set_demand(&mut net, c2, 2.0, 0.0);

        let flow = &solve_all(&mut net)[0];
        let expected = 4.0 / 0.98;
        assert!((net.lines[&feed].state.p_kw - expected).abs() < 1e-12);
        assert!((net.nodes[&t].state.loss_kw - (expected - 4.0)).abs() < 1e-12);
        assert!(flow.balance_error_kw().abs() < 1e-12);
        assert!(!net.nodes[&s].state.overloaded);
        assert!((net.nodes[&s].state.utilization.unwrap() - expected / 120.0).abs() < 1e-12);
    }

    #[test]
    fn test_energy_balance_with_losses() {
        let mut net = Network::new();
        let s = add(&mut net, NodeKind::Source, json!({ "voltage_out_kv": 10.0 }));
        let t = add(
            &mut net,
            NodeKind::Transformer,
            json!({ "efficiency": 0.97, "voltage_in_kv": 10.0, "voltage_out_kv": 0.4 }),
        );
        let p = add(&mut net, NodeKind::Pole, json!({}));
        connect(&mut net, s, t, json!({ "r_pu": 0.0008, "x_pu": 0.0012 }));
        connect(&mut net, t, p, json!({ "r_pu": 0.001, "x_pu": 0.002 }));
        let mut served = 0.0;
        for k in 1..=5 {
            let c = add(&mut net, NodeKind::Consumer, json!({}));
            connect(&mut net, p, c, json!({ "r_pu": 0.0005 * k as f64 }));
            set_demand(&mut net, c, k as f64, 0.3 * k as f64);
            served += k as f64;
        }

        let flow = &solve_all(&mut net)[0];
        assert!((flow.served_kw - served).abs() < 1e-12);
        assert!(flow.line_loss_kw > 0.0);
        assert!(flow.balance_error_kw().abs() < 1e-9);
        assert!((net.nodes[&s].state.p_kw - flow.supplied_kw).abs() < 1e-12);
    }

    #[test]
    fn test_voltage_drops_across_impedance() {
        let mut net = Network::new();
        let s = add(&mut net, NodeKind::Source, json!({ "voltage_out_kv": 10.0 }));
        let c = add(&mut net, NodeKind::Consumer, json!({}));
        let line_props = json!({ "r_pu": 0.01, "x_pu": 0.02 });
        let l = connect(&mut net, s, c, line_props.clone());
        set_demand(&mut net, c, 2.0, 1.0);

        solve_all(&mut net);

        let sending = Pq::new(net.lines[&l].state.p_kw, net.lines[&l].state.q_kvar);
        let expected =
            branch_voltage(10.0, &LineProps::from_props(&props(line_props)), sending).unwrap();
        let v = net.nodes[&c].state.voltage_kv;
        assert!(v < 10.0);
        assert_eq!(v, expected);
        assert!(!net.nodes[&c].state.voltage_collapse);
    }

    #[test]
    fn test_transformer_ratio_steps_voltage_down() {
        let mut net = Network::new();
        let s = add(&mut net, NodeKind::Source, json!({ "voltage_out_kv": 10.0 }));
        let t = add(
            &mut net,
            NodeKind::Transformer,
            json!({ "voltage_in_kv": 10.0, "voltage_out_kv": 0.4 }),
        );
        let c = add(&mut net, NodeKind::Consumer, json!({}));
        connect(&mut net, s, t, json!({}));
        connect(&mut net, t, c, json!({}));
        set_demand(&mut net, c, 1.0, 0.0);

        solve_all(&mut net);
        assert_eq!(net.nodes[&t].state.voltage_kv, 10.0);
        assert!((net.nodes[&c].state.voltage_kv - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_root_voltage_falls_back_to_line_rating_then_default() {
        let mut net = Network::new();
        let s = add(&mut net, NodeKind::Source, json!({}));
        let c = add(&mut net, NodeKind::Consumer, json!({}));
        connect(&mut net, s, c, json!({ "voltage_kv": 0.4 }));
        assert_eq!(solve_all(&mut net)[0].root_voltage_kv, 0.4);

        let mut bare = Network::new();
        add(&mut bare, NodeKind::Source, json!({}));
        assert_eq!(solve_all(&mut bare)[0].root_voltage_kv, DEFAULT_VOLTAGE_KV);
    }

    #[test]
    fn test_overloads_are_flagged_not_limited() {
        let mut net = Network::new();
        let s = add(&mut net, NodeKind::Source, json!({ "p_max_kw": 3.0 }));
        let c = add(&mut net, NodeKind::Consumer, json!({}));
        let l = connect(&mut net, s, c, json!({ "capacity_kva": 2.0 }));
        set_demand(&mut net, c, 4.0, 0.0);

        let flow = &solve_all(&mut net)[0];
        assert_eq!(net.lines[&l].state.p_kw, 4.0);
        assert_eq!(net.lines[&l].state.utilization, Some(2.0));
        assert!(net.lines[&l].state.overloaded);
        assert!(net.nodes[&s].state.overloaded);
        assert_eq!(flow.overloaded_lines, vec![l]);
        assert_eq!(flow.overloaded_nodes, vec![s]);
    }

    #[test]
    fn test_pole_capacity_utilization() {
        let mut net = Network::new();
        let s = add(&mut net, NodeKind::Source, json!({}));
        let p = add(&mut net, NodeKind::Pole, json!({ "capacity_kw": 8.0 }));
        let c = add(&mut net, NodeKind::Consumer, json!({}));
        connect(&mut net, s, p, json!({}));
        connect(&mut net, p, c, json!({}));
        set_demand(&mut net, c, 2.0, 0.0);

        solve_all(&mut net);
        assert_eq!(net.nodes[&p].state.utilization, Some(0.25));
        assert_eq!(net.nodes[&c].state.utilization, None);
    }

    #[test]
    fn test_branch_voltage_guards() {
        let line = LineProps {
            r_pu: 1.0,
            ..Default::default()
        };
        assert_eq!(branch_voltage(0.0, &line, Pq::new(1.0, 0.0)), None);
        assert_eq!(branch_voltage(-1.0, &LineProps::default(), Pq::ZERO), None);
        // V² − 2rP + r²P²/V² = 1 − 2 + 1 = 0
        assert_eq!(branch_voltage(1.0, &line, Pq::new(1.0, 0.0)), None);
        assert_eq!(branch_voltage(5.0, &LineProps::default(), Pq::new(9.0, 9.0)), Some(5.0));
    }

    #[test]
    fn test_collapsed_voltage_is_clamped_and_flagged() {
        let mut net = Network::new();
        let s = add(&mut net, NodeKind::Source, json!({ "voltage_out_kv": 1.0 }));
        let a = add(&mut net, NodeKind::Pole, json!({}));
        let c = add(&mut net, NodeKind::Consumer, json!({}));
        connect(&mut net, s, a, json!({ "r_pu": 1.0, "voltage_kv": 1.0e9 }));
        connect(&mut net, a, c, json!({}));
        // Loss is linearized at a huge nominal voltage, so sending P stays 1.0
        set_demand(&mut net, c, 1.0, 0.0);

        let flow = &solve_all(&mut net)[0];
        assert_eq!(net.nodes[&a].state.voltage_kv, 0.0);
        assert!(net.nodes[&a].state.voltage_collapse);
        assert!(net.nodes[&c].state.voltage_collapse);
        assert_eq!(flow.collapsed_nodes.len(), 2);
        assert!(net.nodes.values().all(|n| n.state.voltage_kv.is_finite()));
    }
}
