//! Entities handed to the record store when a session finishes.

use serde::{Deserialize, Serialize};

use crate::dto::ws::RankedPlayer;

/// Summary of one completed game, produced exactly once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    /// Quiz title the session played.
    pub session_name: String,
    /// RFC3339 timestamp of when the game countdown started.
    pub start_date: String,
    /// Number of players that took part, leavers included.
    pub player_count: usize,
    /// Highest final score.
    pub best_score: u32,
    /// Final ranking, best first.
    pub ranked_results: Vec<RankedPlayer>,
}
