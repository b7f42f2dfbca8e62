//! Grid storage.
//!
//! Repositories hold live [`GridHandle`]s rather than copies, so a grid
//! fetched twice is the same grid and every writer goes through its lock.

mod memory;

use async_trait::async_trait;

use crate::controller::GridHandle;
use crate::domain::GridId;

pub use memory::InMemoryGridRepository;

#[async_trait]
pub trait GridRepository: Send + Sync {
    /// Insert or replace the grid stored under `id`
    async fn save(&self, id: GridId, grid: GridHandle);
    async fn get(&self, id: GridId) -> Option<GridHandle>;
    /// Ids of all stored grids, in id order
    async fn list(&self) -> Vec<GridId>;
    /// Returns whether a grid was removed
    async fn delete(&self, id: GridId) -> bool;
}
