pub mod memory;
pub mod postgres;

pub use memory::MemoryBinStore;
pub use postgres::PgBinStore;

use crate::error::AppError;
use crate::model::{BinPatch, BinRecord};
use async_trait::async_trait;

/// Current state per bin, shared by every listener and the HTTP layer.
///
/// `upsert` must be atomic per `bin_id`: concurrent upserts on the same bin
/// never lose each other's fields, and upserts on different bins do not wait
/// on each other. A failed upsert leaves the stored record untouched.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BinStore: Send + Sync {
    /// Create the record with exactly the patch's fields, or merge the patch
    /// into the existing one. Returns the record as stored afterwards.
    async fn upsert(&self, patch: &BinPatch) -> Result<BinRecord, AppError>;

    async fn get(&self, bin_id: &str) -> Result<Option<BinRecord>, AppError>;

    /// Snapshot of every record, ordered by `bin_id`.
    async fn list_all(&self) -> Result<Vec<BinRecord>, AppError>;

    async fn close(&self) {}
}
