//! Alert resolution

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use auditpack_pipeline::Alert;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ResolveAlertRequest {
    pub firm_id: Uuid,
    pub resolved_by: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Resolving an already-resolved alert is a no-op that returns the alert
/// with its original resolution intact.
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(req): Json<ResolveAlertRequest>,
) -> Result<Json<Alert>, ApiError> {
    let alert = state
        .pipeline
        .alerts
        .resolve(req.firm_id, alert_id, &req.resolved_by, req.notes.as_deref())
        .await?;

    Ok(Json(alert))
}
