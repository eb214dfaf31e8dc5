//! Admin handlers.

use axum::{Json, extract::State};
use tracing::instrument;

use crate::error::Result;
use crate::services::scheduler::TickSummary;
use crate::state::AppState;

/// Handle `POST /admin/scheduler/run`.
///
/// Triggers one reminder pass outside the periodic cadence, for operators
/// and smoke tests. Safe to race with the periodic loop; the ledger keeps
/// both sides idempotent.
#[instrument(skip(state))]
pub async fn run_scheduler(State(state): State<AppState>) -> Result<Json<TickSummary>> {
    let summary = state.scheduler().run_tick().await?;
    Ok(Json(summary))
}
