//! AuditPack HTTP API
//!
//! Axum server exposing the chat webhook, direct invoice upload, alert
//! resolution, and a health probe. All domain behavior lives in the
//! pipeline crate; this crate is routing, configuration, and HTTP mapping.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
