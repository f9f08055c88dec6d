//! Persistence boundary for finished-game summary records.

pub mod memory;
pub mod models;
pub mod storage;

use futures::future::BoxFuture;

use crate::dao::models::GameRecord;
use crate::dao::storage::StorageResult;

/// Abstraction over the collaborator that keeps finished-game summaries.
///
/// The session engine only ever hands over a completed [`GameRecord`]; how and
/// where it is stored is this trait's concern.
pub trait RecordStore: Send + Sync {
    /// Persist one finished-game summary.
    fn save(&self, record: GameRecord) -> BoxFuture<'static, StorageResult<()>>;
    /// List stored summaries, most recent first.
    fn list(&self) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>>;
    /// Probe backend availability.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
