//! Direct invoice upload (dashboard path)

use axum::extract::State;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use auditpack_pipeline::{DocumentBytes, DocumentSource, IngestOutcome};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub client_id: Uuid,
    pub file_name: String,
    pub file_type: String,
    pub data_base64: String,
}

pub async fn upload_invoice(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<Value>, ApiError> {
    let bytes = BASE64
        .decode(req.data_base64.as_bytes())
        .map_err(|_| ApiError::BadRequest("Invalid base64 payload".to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Empty file".to_string()));
    }

    let client = state
        .pipeline
        .intake
        .client_by_id(req.client_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Client not found".to_string()))?;

    let source = DocumentSource {
        file_name: req.file_name,
        mime_type: req.file_type,
        bytes: DocumentBytes::Inline(bytes),
    };

    match state
        .pipeline
        .ingest
        .ingest(&client, "upload", None, source)
        .await?
    {
        IngestOutcome::Created { invoice_id } => {
            Ok(Json(json!({ "invoice_id": invoice_id, "duplicate": false })))
        }
        IngestOutcome::Duplicate => Ok(Json(json!({ "duplicate": true }))),
    }
}
