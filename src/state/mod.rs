//! Central application state and the per-room session engine.

pub mod actor;
pub mod answers;
pub mod game;
pub mod lobby;
pub mod registry;
pub mod session;
pub mod state_machine;
pub mod timer;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::dao::RecordStore;
use crate::dao::memory::MemoryRecordStore;

pub use self::lobby::LobbyHub;
pub use self::registry::SessionRegistry;

/// Cheaply cloneable handle on the process-wide state.
pub type SharedState = Arc<AppState>;

/// Channel capacity for the lobby broadcast hub.
const LOBBY_CAPACITY: usize = 16;

/// Central application state storing the session registry, lobby hub, and
/// the finished-game record collaborator.
pub struct AppState {
    config: AppConfig,
    registry: SessionRegistry,
    lobby: LobbyHub,
    records: Arc<dyn RecordStore>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// Records go to the in-memory store unless a collaborator is injected
    /// through [`AppState::with_record_store`].
    pub fn new() -> SharedState {
        Self::with_record_store(Arc::new(MemoryRecordStore::new()))
    }

    /// Construct the state around a specific record store implementation.
    pub fn with_record_store(records: Arc<dyn RecordStore>) -> SharedState {
        Arc::new(Self {
            config: AppConfig::load(),
            registry: SessionRegistry::new(),
            lobby: LobbyHub::new(LOBBY_CAPACITY),
            records,
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Registry of active rooms and their connection index.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Broadcast hub feeding the lobby SSE stream.
    pub fn lobby(&self) -> &LobbyHub {
        &self.lobby
    }

    /// Collaborator that keeps finished-game summaries.
    pub fn records(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.records)
    }
}
