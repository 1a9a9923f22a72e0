pub mod alerts;
pub mod invoices;
pub mod webhook;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/webhooks/whatsapp", post(webhook::whatsapp_webhook))
        .route("/api/invoices/upload", post(invoices::upload_invoice))
        .route("/api/alerts/{id}/resolve", post(alerts::resolve_alert))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Health check database ping failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    Ok(Json(json!({
        "status": "healthy",
        "service": "auditpack-api",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}
