mod session;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::domain::{CommandError, CommandOutcome, GridCommand, GridId, GridSnapshot};
use crate::repo::{GridRepository, InMemoryGridRepository};
use crate::simulation::{FaultInjector, FeederBuilder, RadialFlowSolver, SimulateTick, SimulationError};

pub use session::{GridHandle, GridSession};

#[derive(Debug, Error)]
pub enum GridError {
    #[error("Grid {0} not found")]
    NotFound(GridId),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub controller: Arc<GridController>,
    /// Cancelled on shutdown; every open stream listens on a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(cfg: Config) -> Self {
        Self::with_repository(cfg, Arc::new(InMemoryGridRepository::new()))
    }

    pub fn with_repository(cfg: Config, grids: Arc<dyn GridRepository>) -> Self {
        let controller = Arc::new(GridController::new(&cfg, grids));
        Self {
            cfg: Arc::new(cfg),
            controller,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Entry points for everything that reads or mutates a grid.
///
/// Each operation takes the grid's lock for exactly one tick or command, so
/// a stream and an HTTP caller never interleave inside either.
pub struct GridController {
    grids: Arc<dyn GridRepository>,
    sim: SimulateTick,
    faults: FaultInjector,
    default_seed: Option<u64>,
}

impl GridController {
    pub fn new(cfg: &Config, grids: Arc<dyn GridRepository>) -> Self {
        let sim = SimulateTick::new(cfg.simulation.params())
            .with_solver(RadialFlowSolver::new(cfg.simulation.default_voltage_kv));
        Self {
            grids,
            sim,
            faults: FaultInjector::new(cfg.simulation.fault_probability),
            default_seed: cfg.simulation.seed,
        }
    }

    pub fn simulator(&self) -> &SimulateTick {
        &self.sim
    }

    /// Build and store a demo feeder. The seed drives both the build and
    /// every later tick of the grid.
    pub async fn create_grid(&self, seed: Option<u64>, tags: Vec<String>) -> GridSnapshot {
        let seed = seed.or(self.default_seed).unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        let network = FeederBuilder::new()
            .seed(Some(seed))
            .tags(tags)
            .build(&mut rng);

        let id = network.id;
        let session = GridSession::with_rng(network, rng);
        let snapshot = session.snapshot();
        self.grids.save(id, session.into_handle()).await;
        info!(grid_id = %id, seed, "grid created");
        snapshot
    }

    pub async fn list_grids(&self) -> Vec<GridId> {
        self.grids.list().await
    }

    pub async fn handle(&self, id: GridId) -> Result<GridHandle, GridError> {
        self.grids.get(id).await.ok_or(GridError::NotFound(id))
    }

    pub async fn snapshot(&self, id: GridId) -> Result<GridSnapshot, GridError> {
        let grid = self.handle(id).await?;
        let session = grid.lock().await;
        Ok(session.snapshot())
    }

    pub async fn delete_grid(&self, id: GridId) -> Result<(), GridError> {
        if self.grids.delete(id).await {
            info!(grid_id = %id, "grid deleted");
            Ok(())
        } else {
            Err(GridError::NotFound(id))
        }
    }

    /// Tick the grid at an explicit simulation time
    pub async fn simulate(&self, id: GridId, sim_time: f64) -> Result<GridSnapshot, GridError> {
        let grid = self.handle(id).await?;
        Ok(self.tick_at(&grid, sim_time).await?)
    }

    pub async fn tick_at(
        &self,
        grid: &GridHandle,
        sim_time: f64,
    ) -> Result<GridSnapshot, SimulationError> {
        let mut session = grid.lock().await;
        let GridSession { network, rng } = &mut *session;
        self.sim.execute(network, sim_time, rng)?;
        Ok(session.snapshot())
    }

    /// Tick the grid one fixed step past its last tick
    pub async fn step(&self, grid: &GridHandle) -> Result<GridSnapshot, SimulationError> {
        let mut session = grid.lock().await;
        let GridSession { network, rng } = &mut *session;
        let next = self.sim.next_time(network);
        self.sim.execute(network, next, rng)?;
        Ok(session.snapshot())
    }

    pub async fn command(
        &self,
        id: GridId,
        command: GridCommand,
    ) -> Result<(CommandOutcome, GridSnapshot), GridError> {
        let grid = self.handle(id).await?;
        Ok(self.apply(&grid, command).await?)
    }

    pub async fn apply(
        &self,
        grid: &GridHandle,
        command: GridCommand,
    ) -> Result<(CommandOutcome, GridSnapshot), CommandError> {
        let action = command.action();
        let mut session = grid.lock().await;
        let GridSession { network, rng } = &mut *session;
        let outcome = command.apply(network, &self.faults, rng)?;
        debug!(grid_id = %network.id, action, ?outcome, "command applied");
        Ok((outcome, session.snapshot()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LineStatus, NodeStatus};

    fn controller() -> GridController {
        GridController::new(&Config::default(), Arc::new(InMemoryGridRepository::new()))
    }

    #[tokio::test]
    async fn test_create_and_fetch() {
        let ctl = controller();
        let created = ctl.create_grid(Some(42), vec!["t".into()]).await;
        assert_eq!(created.meta.seed, Some(42));
        assert_eq!(ctl.list_grids().await, vec![created.id]);

        let fetched = ctl.snapshot(created.id).await.unwrap();
        assert_eq!(fetched.nodes.len(), created.nodes.len());
    }

    #[tokio::test]
    async fn test_same_seed_grids_tick_identically() {
        let ctl = controller();
        let a = ctl.create_grid(Some(42), Vec::new()).await.id;
        let b = ctl.create_grid(Some(42), Vec::new()).await.id;
        assert_ne!(a, b);
        assert_eq!(ctl.list_grids().await.len(), 2);

        for t in [8.0 * 3600.0, 8.0 * 3600.0 + 1.0] {
            let left = ctl.simulate(a, t).await.unwrap();
            let right = ctl.simulate(b, t).await.unwrap();
            assert!(left.nodes.keys().eq(right.nodes.keys()));
            for (id, node) in &left.nodes {
                assert_eq!(node.state.p_kw.to_bits(), right.nodes[id].state.p_kw.to_bits());
                assert_eq!(node.state.q_kvar.to_bits(), right.nodes[id].state.q_kvar.to_bits());
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_grid() {
        let ctl = controller();
        let id = GridId::new();
        assert!(matches!(ctl.snapshot(id).await, Err(GridError::NotFound(_))));
        assert!(matches!(ctl.delete_grid(id).await, Err(GridError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_step_advances_by_dt() {
        let ctl = controller();
        let id = ctl.create_grid(Some(1), Vec::new()).await.id;
        let grid = ctl.handle(id).await.unwrap();

        let first = ctl.step(&grid).await.unwrap();
        let second = ctl.step(&grid).await.unwrap();
        let dt = ctl.simulator().params().dt;
        assert_eq!(first.meta.sim_time, dt);
        assert_eq!(second.meta.sim_time, 2.0 * dt);
        assert_eq!(second.meta.ticks, 2);
    }

    #[tokio::test]
    async fn test_simulate_rejects_regression() {
        let ctl = controller();
        let id = ctl.create_grid(Some(1), Vec::new()).await.id;
        ctl.simulate(id, 3600.0).await.unwrap();
        let err = ctl.simulate(id, 10.0).await.unwrap_err();
        assert!(matches!(
            err,
            GridError::Simulation(SimulationError::TimeRegression { .. })
        ));
    }

    #[tokio::test]
    async fn test_command_trigger_fault_islands_grid() {
        let ctl = controller();
        let snap = ctl.create_grid(Some(3), Vec::new()).await;
        let (root_line, _) = snap
            .lines
            .iter()
            .find(|(_, l)| snap.nodes[&l.from_id].kind == crate::domain::NodeKind::Source)
            .unwrap();

        let (outcome, after) = ctl
            .command(snap.id, GridCommand::TriggerFault { line_id: Some(*root_line) })
            .await
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::Faults(ref f) if f.changed == vec![*root_line]));
        assert_eq!(after.lines[root_line].status, LineStatus::Faulted);
        let islanded = after
            .nodes
            .values()
            .filter(|n| n.status == NodeStatus::DeEnergized)
            .count();
        assert_eq!(islanded, after.nodes.len() - 1);
    }
}
