//! Process-wide registry mapping room codes and connections to session actors.

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::state::actor::SessionCommand;
use crate::state::session::ConnId;

/// Handle used to push commands into one room's serialized event stream.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    /// Join code of the room.
    pub code: u32,
    /// Command channel consumed by the room's actor.
    pub tx: mpsc::UnboundedSender<SessionCommand>,
}

/// Holds the two lookup indices shared by all rooms.
///
/// No business rules live here; the registry only creates, finds, and removes
/// entries. Both indices support concurrent access.
#[derive(Default)]
pub struct SessionRegistry {
    rooms: DashMap<u32, SessionHandle>,
    connections: DashMap<ConnId, u32>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a room code not currently in use.
    ///
    /// Collisions are retried a bounded number of times at the configured
    /// width, then once more with one extra digit. Persistent collisions mean
    /// the code space is saturated, which is a capacity problem, not a user
    /// error, so it surfaces as a hard failure.
    pub fn allocate_code(&self, config: &AppConfig) -> Result<u32, ServiceError> {
        let mut rng = rand::rng();
        for digits in [config.room_code_digits, config.room_code_digits + 1] {
            let low = 10u32.pow(digits - 1);
            let high = 10u32.pow(digits);
            for _ in 0..config.room_code_retry_bound {
                let candidate = rng.random_range(low..high);
                if !self.rooms.contains_key(&candidate) {
                    return Ok(candidate);
                }
            }
        }
        Err(ServiceError::Exhausted(
            "could not allocate a free room code".into(),
        ))
    }

    /// Register a freshly spawned room.
    pub fn insert(&self, handle: SessionHandle) {
        self.rooms.insert(handle.code, handle);
    }

    /// Drop a room from the code index. Idempotent.
    pub fn remove(&self, code: u32) -> Option<SessionHandle> {
        self.rooms.remove(&code).map(|(_, handle)| handle)
    }

    /// Handle for the room with this code, if it is active.
    pub fn lookup(&self, code: u32) -> Option<SessionHandle> {
        self.rooms.get(&code).map(|entry| entry.value().clone())
    }

    /// Associate a connection with a room so disconnects can be resolved.
    pub fn bind(&self, conn: ConnId, code: u32) {
        self.connections.insert(conn, code);
    }

    /// Forget a connection's room association. Idempotent.
    pub fn unbind(&self, conn: ConnId) {
        self.connections.remove(&conn);
    }

    /// Room code the connection belongs to, if any.
    pub fn room_of(&self, conn: ConnId) -> Option<u32> {
        self.connections.get(&conn).map(|entry| *entry.value())
    }

    /// Number of active rooms, for the health probe.
    pub fn active_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn handle(code: u32) -> SessionHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        SessionHandle { code, tx }
    }

    fn config() -> AppConfig {
        AppConfig {
            room_code_digits: 3,
            room_code_retry_bound: 32,
            ..AppConfig::default()
        }
    }

    #[test]
    fn allocated_codes_avoid_active_rooms() {
        let registry = SessionRegistry::new();
        let config = config();
        let code = registry.allocate_code(&config).unwrap();
        assert!((100..1000).contains(&code));

        registry.insert(handle(code));
        let other = registry.allocate_code(&config).unwrap();
        assert_ne!(code, other);
    }

    #[test]
    fn allocation_widens_then_fails_when_saturated() {
        let registry = SessionRegistry::new();
        let config = config();
        // Saturate the 3-digit space; allocation must fall back to 4 digits.
        for code in 100..1000 {
            registry.insert(handle(code));
        }
        let widened = registry.allocate_code(&config).unwrap();
        assert!((1000..10000).contains(&widened));

        // Saturate the widened space too; now allocation must fail loudly.
        for code in 1000..10000 {
            registry.insert(handle(code));
        }
        assert!(matches!(
            registry.allocate_code(&config),
            Err(ServiceError::Exhausted(_))
        ));
    }

    #[test]
    fn connection_index_round_trips() {
        let registry = SessionRegistry::new();
        let conn = Uuid::new_v4();
        registry.bind(conn, 4217);
        assert_eq!(registry.room_of(conn), Some(4217));

        registry.unbind(conn);
        registry.unbind(conn);
        assert_eq!(registry.room_of(conn), None);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.insert(handle(4217));
        assert!(registry.remove(4217).is_some());
        assert!(registry.remove(4217).is_none());
    }
}
