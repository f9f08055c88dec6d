use axum::{Json, Router, extract::State, routing::get};

use crate::{dao::models::GameRecord, error::AppError, state::SharedState};

/// List finished-game summaries, newest first.
pub async fn list_records(
    State(state): State<SharedState>,
) -> Result<Json<Vec<GameRecord>>, AppError> {
    let records = state.records().list().await.map_err(|err| {
        AppError::ServiceUnavailable(format!("record store unavailable: {err}"))
    })?;
    Ok(Json(records))
}

/// Configure the game-record routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/records", get(list_records))
}
