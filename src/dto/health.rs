//! Liveness probe payload.

use serde::Serialize;

/// Response body for the health endpoint.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Fixed "ok" marker.
    pub status: &'static str,
    /// Number of sessions currently registered.
    pub active_sessions: usize,
}
