//! # Grid Simulation
//!
//! The physical core. Per tick:
//!
//! - **Demand**: every consumer draws a noisy (P, Q) sample from its base load,
//!   load profile and power factor
//! - **Topology**: the online lines are walked from each source to find the
//!   energized trees and the islanded nodes
//! - **Solver**: each tree is swept leaves → root to aggregate flow and losses,
//!   then root → leaves to propagate voltage
//!
//! ## Usage
//!
//! ```rust
//! use power_grid_twin::simulation::{FeederBuilder, SimulateTick};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(42);
//! let mut grid = FeederBuilder::new().seed(Some(42)).build(&mut rng);
//!
//! let sim = SimulateTick::default();
//! let report = sim.execute(&mut grid, 12.0 * 3600.0, &mut rng).unwrap();
//! assert!(report.summary.supplied_kw > 0.0);
//! ```

pub mod builder;
pub mod demand;
pub mod faults;
pub mod load_profile;
pub mod solver;
pub mod tick;
pub mod topology;

pub use builder::FeederBuilder;
pub use demand::{DemandSample, DemandSampler, DemandSummary};
pub use faults::{clear_faults, set_line_status, FaultInjector, FaultOutcome};
pub use load_profile::LoadProfile;
pub use solver::{RadialFlowSolver, TreeFlow};
pub use tick::{SimParams, SimulateTick, SimulationError, TickReport};
pub use topology::{apply_status, refresh_status, resolve, EnergizedTree, Topology};
