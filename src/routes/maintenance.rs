use axum::{extract::State, Json};

use crate::maintenance::WipeResult;
use crate::state::AppState;

/// `POST /maintenance/wipe` — the one CLI-surface operation the core exposes; the
/// surrounding host wires this to a user-triggered "wipe database" command.
pub async fn wipe(State(state): State<AppState>) -> Json<WipeResult> {
    let result = state.orchestrator.maintenance.wipe_all().await;
    Json(result)
}
