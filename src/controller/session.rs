use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;

use crate::domain::{GridSnapshot, Network};

/// One live grid and the random stream that drives it
#[derive(Debug)]
pub struct GridSession {
    pub network: Network,
    pub rng: StdRng,
}

/// Shared single-writer access to a session
pub type GridHandle = Arc<Mutex<GridSession>>;

impl GridSession {
    pub fn new(network: Network, seed: u64) -> Self {
        Self {
            network,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_rng(network: Network, rng: StdRng) -> Self {
        Self { network, rng }
    }

    pub fn into_handle(self) -> GridHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot::from(&self.network)
    }
}
