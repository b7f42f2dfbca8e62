use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::GridRepository;
use crate::controller::GridHandle;
use crate::domain::GridId;

#[derive(Default)]
pub struct InMemoryGridRepository {
    grids: RwLock<HashMap<GridId, GridHandle>>,
}

impl InMemoryGridRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.grids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.read().is_empty()
    }
}

#[async_trait]
impl GridRepository for InMemoryGridRepository {
    async fn save(&self, id: GridId, grid: GridHandle) {
        self.grids.write().insert(id, grid);
    }

    async fn get(&self, id: GridId) -> Option<GridHandle> {
        self.grids.read().get(&id).cloned()
    }

    async fn list(&self) -> Vec<GridId> {
        let mut ids: Vec<GridId> = self.grids.read().keys().copied().collect();
        ids.sort();
        ids
    }

    async fn delete(&self, id: GridId) -> bool {
        self.grids.write().remove(&id).is_some()
    }
}
