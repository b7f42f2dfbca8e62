//! Demo feeder generator.
//!
//! Builds a small but complete distribution feeder: one 10 kV source, a
//! 10/0.4 kV transformer, two HV poles, three LV poles each hanging off a
//! random HV pole, and six consumers with randomized base load, profile and
//! power factor. All randomness comes from the caller's RNG.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use tracing::info;

use super::load_profile::LoadProfile;
use super::topology::refresh_status;
use crate::domain::{props, Line, LineId, Network, Node, NodeId, NodeKind, Position, Props};

const HV_POLES: usize = 2;
const LV_POLES: usize = 3;
const CONSUMERS: usize = 6;

const PROFILES: [LoadProfile; 4] = [
    LoadProfile::Residential,
    LoadProfile::Commercial,
    LoadProfile::Industrial,
    LoadProfile::Nightlife,
];

#[derive(Debug, Clone, Default)]
pub struct FeederBuilder {
    seed: Option<u64>,
    tags: Vec<String>,
}

impl FeederBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed recorded in the grid metadata
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> Network {
        let mut net = Network::new();
        net.meta.seed = self.seed;
        net.meta.tags = self.tags.clone();

        let source = net.add_node(node(
            rng,
            NodeKind::Source,
            Position::new(0.0, 0.0),
            props(json!({ "p_max_kw": 120.0, "voltage_out_kv": 10.0 })),
        ));
        let transformer = net.add_node(node(
            rng,
            NodeKind::Transformer,
            Position::new(0.0, 40.0),
            props(json!({
                "capacity_kva": 400.0,
                "voltage_in_kv": 10.0,
                "voltage_out_kv": 0.4,
                "efficiency": 0.98,
            })),
        ));

        let hv_poles: Vec<NodeId> = (0..HV_POLES)
            .map(|i| {
                net.add_node(node(
                    rng,
                    NodeKind::Pole,
                    Position::new(-20.0 + i as f64 * 20.0, 80.0),
                    props(json!({ "capacity_kw": 120.0, "voltage_kv": 10.0, "class": "hv" })),
                ))
            })
            .collect();

        let lv_poles: Vec<(NodeId, Position)> = (0..LV_POLES)
            .map(|i| {
                let position = Position::new(-30.0 + i as f64 * 30.0, 110.0);
                let id = net.add_node(node(
                    rng,
                    NodeKind::Pole,
                    position,
                    props(json!({ "capacity_kw": 80.0, "voltage_kv": 0.4, "class": "lv" })),
                ));
                (id, position)
            })
            .collect();

        for idx in 0..CONSUMERS {
            let (pole, at) = lv_poles[idx % LV_POLES];
            let profile = PROFILES.choose(rng).copied().unwrap_or(LoadProfile::Residential);
            let consumer_props = props(json!({
                "base_kw": round_to(0.9 + rng.gen::<f64>() * 2.1, 2),
                "profile": profile.to_string(),
                "cos_phi": round_to(0.9 + rng.gen::<f64>() * 0.08, 3),
                "voltage_kv": 0.4,
            }));
            let consumer = net.add_node(node(
                rng,
                NodeKind::Consumer,
                Position::new(
                    at.x + (idx % 2) as f64 * 8.0 - 4.0,
                    at.y + 8.0 + (idx / 2) as f64 * 4.0,
                ),
                consumer_props,
            ));
            let drop_props = props(json!({
                "length": 12.0 + rng.gen::<f64>() * 6.0,
                "capacity_kva": 60.0,
                "voltage_kv": 0.4,
            }));
            net.add_line(line(rng, pole, consumer, drop_props));
        }

        net.add_line(line(
            rng,
            source,
            transformer,
            props(json!({
                "length": 15.0,
                "capacity_kva": 220.0,
                "voltage_kv": 10.0,
                "r_pu": 0.0008,
                "x_pu": 0.0012,
            })),
        ));
        for &pole in &hv_poles {
            let feeder_props = props(json!({
                "length": 12.0 + rng.gen::<f64>() * 5.0,
                "capacity_kva": 180.0,
                "voltage_kv": 10.0,
            }));
            net.add_line(line(rng, transformer, pole, feeder_props));
        }
        for &(pole, _) in &lv_poles {
            let Some(&parent) = hv_poles.choose(rng) else {
                continue;
            };
            let span_props = props(json!({
                "length": 18.0 + rng.gen::<f64>() * 8.0,
                "capacity_kva": 120.0,
                "voltage_kv": 0.4,
            }));
            net.add_line(line(rng, parent, pole, span_props));
        }

        refresh_status(&mut net);
        info!(
            grid_id = %net.id,
            seed = ?self.seed,
            nodes = net.nodes.len(),
            lines = net.lines.len(),
            "demo feeder built"
        );
        net
    }
}

fn node<R: Rng + ?Sized>(rng: &mut R, kind: NodeKind, position: Position, props: Props) -> Node {
    Node::new(kind, position, props).with_id(NodeId::from_rng(rng))
}

fn line<R: Rng + ?Sized>(rng: &mut R, from_id: NodeId, to_id: NodeId, props: Props) -> Line {
    Line::new(from_id, to_id, props).with_id(LineId::from_rng(rng))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConsumerProps, NodeSpec};
    use crate::simulation::topology::resolve;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_feeder_shape() {
        let net = FeederBuilder::new()
            .seed(Some(42))
            .tags(vec!["demo".into()])
            .build(&mut StdRng::seed_from_u64(42));

        assert_eq!(net.nodes.len(), 1 + 1 + HV_POLES + LV_POLES + CONSUMERS);
        assert_eq!(net.lines.len(), CONSUMERS + 1 + HV_POLES + LV_POLES);
        assert_eq!(net.sources().count(), 1);
        assert_eq!(net.consumers().count(), CONSUMERS);
        assert_eq!(net.meta.seed, Some(42));
        assert_eq!(net.meta.tags, vec!["demo".to_string()]);
    }

    #[test]
    fn test_feeder_is_one_radial_tree() {
        let net = FeederBuilder::new().build(&mut StdRng::seed_from_u64(7));
        let topology = resolve(&net);
        assert_eq!(topology.trees.len(), 1);
        assert!(topology.is_radial());
        assert!(topology.de_energized.is_empty());
        assert_eq!(topology.trees[0].len(), net.nodes.len());
    }

    #[test]
    fn test_consumer_props_in_range() {
        let net = FeederBuilder::new().build(&mut StdRng::seed_from_u64(3));
        for node in net.consumers() {
            let NodeSpec::Consumer(ConsumerProps {
                base_kw,
                cos_phi,
                profile,
            }) = node.spec()
            else {
                panic!("consumer without consumer props");
            };
            assert!((0.9..=3.0).contains(&base_kw));
            assert!((0.9..=0.98).contains(&cos_phi));
            assert_ne!(LoadProfile::from_class(&profile), LoadProfile::Flat);
        }
    }

    #[test]
    fn test_same_seed_same_ids_and_props() {
        let a = FeederBuilder::new().build(&mut StdRng::seed_from_u64(11));
        let b = FeederBuilder::new().build(&mut StdRng::seed_from_u64(11));

        assert_ne!(a.id, b.id);
        assert!(a.nodes.keys().eq(b.nodes.keys()));
        assert!(a.lines.keys().eq(b.lines.keys()));
        for (x, y) in a.consumers().zip(b.consumers()) {
            assert_eq!(x.props, y.props);
            assert_eq!(x.position, y.position);
        }

        let c = FeederBuilder::new().build(&mut StdRng::seed_from_u64(12));
        assert!(!a.nodes.keys().eq(c.nodes.keys()));
    }
}
