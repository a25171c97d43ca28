//! HTTP endpoint modules.
//!
//! Shared error body and helpers live here in mod.rs.

mod chat;
pub mod doc;
mod health;
mod security;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: msg.into() }))
}

// ── Re-exports ───────────────────────────────────────────────────

pub use chat::chat;
pub use health::health;
pub use security::{security_events, security_stats, security_threat};
