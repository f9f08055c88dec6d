//! In-process record store used when no external collaborator is configured.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::dao::models::GameRecord;
use crate::dao::storage::StorageResult;
use crate::dao::RecordStore;

/// Keeps finished-game summaries in memory, newest first.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Arc<Mutex<Vec<GameRecord>>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn save(&self, record: GameRecord) -> BoxFuture<'static, StorageResult<()>> {
        let records = Arc::clone(&self.records);
        Box::pin(async move {
            let mut guard = records.lock().await;
            guard.insert(0, record);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'static, StorageResult<Vec<GameRecord>>> {
        let records = Arc::clone(&self.records);
        Box::pin(async move {
            let guard = records.lock().await;
            Ok(guard.clone())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
