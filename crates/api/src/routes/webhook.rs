//! WhatsApp webhook endpoint (Evolution API events)
//!
//! The body is read raw and the signature verified over those exact bytes
//! before any JSON parsing. Validation and unknown-sender outcomes are the
//! only errors surfaced to the caller; from document-accepted onward the
//! pipeline handles failures internally and the sender only ever receives
//! duplicate notices, acknowledgements, or follow-up alert messages.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use auditpack_pipeline::{
    is_message_event, parse_command, verify_signature, ClientWithFirm, Command, DocumentBytes,
    DocumentContent, DocumentSource, IngestOutcome, MessageData, WebhookPayload,
};
use auditpack_pipeline::intake::{default_message, help_message, status_message};

use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub async fn whatsapp_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match (&state.config.webhook_secret, signature) {
        (Some(secret), Some(signature)) => {
            if !verify_signature(&body, signature, secret) {
                tracing::error!("Invalid webhook signature");
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "received": false, "error": "Invalid signature" })),
                )
                    .into_response();
            }
        }
        (Some(_), None) => {
            // Documented relaxed mode: the request is accepted with only
            // this warning when the secret is set but no signature arrives.
            tracing::warn!("Webhook received without signature while webhook secret is configured");
        }
        (None, _) => {
            tracing::warn!("Webhook secret not configured - accepting unsigned webhook");
        }
    }

    // Parse only after signature validation.
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed webhook payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "received": false, "error": "Malformed payload" })),
            )
                .into_response();
        }
    };

    // Non-message events are acknowledged without side effects.
    if !is_message_event(&payload.event) {
        return Json(json!({ "received": true })).into_response();
    }

    let client = match state.pipeline.intake.resolve_sender(&payload.data.from).await {
        Ok(Some(client)) => client,
        Ok(None) => {
            tracing::info!(from = %payload.data.from, "Client not found for sender");
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "received": true, "error": "Client not found" })),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "Sender resolution failed");
            return internal_error();
        }
    };

    match (payload.data.message_type.as_str(), &payload.data.document, &payload.data.text) {
        ("document", Some(document), _) => {
            handle_document(&state, &client, &payload.data, document).await
        }
        ("text", _, Some(text)) => handle_text(&state, &client, &text.body).await,
        _ => Json(json!({ "received": true })).into_response(),
    }
}

async fn handle_document(
    state: &AppState,
    client: &ClientWithFirm,
    data: &MessageData,
    document: &DocumentContent,
) -> Response {
    let source = DocumentSource {
        file_name: document.filename.clone(),
        mime_type: document.mimetype.clone(),
        bytes: DocumentBytes::Remote(document.url.clone()),
    };

    match state
        .pipeline
        .ingest
        .ingest(client, "whatsapp", data.id.as_deref(), source)
        .await
    {
        Ok(IngestOutcome::Created { invoice_id }) => {
            Json(json!({ "received": true, "invoice_id": invoice_id })).into_response()
        }
        Ok(IngestOutcome::Duplicate) => {
            Json(json!({ "received": true, "duplicate": true })).into_response()
        }
        Err(e) => {
            tracing::error!(client_id = %client.id, error = %e, "Document ingestion failed");
            internal_error()
        }
    }
}

async fn handle_text(state: &AppState, client: &ClientWithFirm, text: &str) -> Response {
    let reply = match parse_command(text) {
        Command::Status => {
            let invoices = state
                .pipeline
                .intake
                .recent_invoice_count(client.id)
                .await
                .unwrap_or(0);
            let pending = state
                .pipeline
                .alerts
                .pending_count(client.id)
                .await
                .unwrap_or(0);
            status_message(invoices, pending)
        }
        Command::Help => help_message(),
        Command::Other => default_message(),
    };

    state
        .pipeline
        .notifier
        .send_opt(client.whatsapp_number.as_deref(), &reply)
        .await;

    Json(json!({ "received": true })).into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "received": false, "error": "Internal server error" })),
    )
        .into_response()
}
