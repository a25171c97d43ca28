//! The chat endpoint: one user utterance in, one filtered answer out.
//!
//! Tenant identity comes from headers set by the upstream authenticating
//! proxy; this service does not authenticate callers itself.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use concierge_core::TenantContext;
use concierge_gateway::filter::REFUSAL_MESSAGE;
use concierge_gateway::{GatewayError, ToolUsage};

use crate::state::AppState;

use super::{error, ErrorResponse};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ROLE_HEADER: &str = "x-caller-role";
pub const FORWARDED_HEADER: &str = "x-forwarded-for";

#[derive(Deserialize, utoipa::ToSchema)]
pub struct ChatRequest {
    pub message: String,
    /// Omit to start a new conversation
    pub conversation_id: Option<String>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub response: String,
    #[schema(value_type = Vec<Object>)]
    pub tools_used: Vec<ToolUsage>,
    pub rounds: usize,
    pub blocked: bool,
    pub redacted: bool,
}

/// Build the tenant context from proxy headers.
pub(crate) fn tenant_from_headers(headers: &HeaderMap) -> Option<TenantContext> {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let tenant_id = header_str(TENANT_HEADER)?;
    let mut tenant = match header_str(ROLE_HEADER) {
        Some(role) if role.eq_ignore_ascii_case("elevated") || role.eq_ignore_ascii_case("admin") => {
            TenantContext::elevated(tenant_id)
        }
        _ => TenantContext::standard(tenant_id),
    };
    // First hop is the original client
    if let Some(addr) = header_str(FORWARDED_HEADER)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        tenant = tenant.with_caller_address(addr);
    }
    Some(tenant)
}

fn error_response(err: GatewayError) -> Response {
    match err {
        GatewayError::InputRejected(_) => {
            error(StatusCode::BAD_REQUEST, REFUSAL_MESSAGE).into_response()
        }
        GatewayError::RateLimited { retry_after, .. } => {
            let secs = retry_after.as_secs().max(1).to_string();
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs)],
                Json(ErrorResponse {
                    error: "Too many requests. Please slow down.".to_string(),
                }),
            )
                .into_response()
        }
        GatewayError::BackendUnavailable(e) => {
            warn!(error = %e, "reasoning backend unavailable");
            error(
                StatusCode::SERVICE_UNAVAILABLE,
                "The assistant is temporarily unavailable. Please try again shortly.",
            )
            .into_response()
        }
        other => {
            warn!(error = %other, "chat turn failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// Send one message to the assistant
///
/// Runs a full gated turn: request limits, input validation, the bounded
/// tool loop and output filtering.
#[utoipa::path(
    post,
    path = "/chat",
    tag = "Chat",
    request_body = ChatRequest,
    params(
        ("x-tenant-id" = String, Header, description = "Property identifier"),
        ("x-caller-role" = Option<String>, Header, description = "`elevated` or `admin` unlocks elevated tools"),
    ),
    responses(
        (status = 200, description = "Assistant reply", body = ChatResponse),
        (status = 400, description = "Missing tenant or rejected input", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 503, description = "Reasoning backend unavailable", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, Response> {
    let tenant = tenant_from_headers(&headers).ok_or_else(|| {
        error(StatusCode::BAD_REQUEST, format!("missing {TENANT_HEADER} header")).into_response()
    })?;
    let conversation_id = req
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("conv_{}", uuid::Uuid::new_v4().simple()));

    let reply = state
        .gateway
        .process_turn(&req.message, &conversation_id, &tenant)
        .await
        .map_err(error_response)?;

    Ok(Json(ChatResponse {
        conversation_id: reply.conversation_id,
        response: reply.final_text,
        tools_used: reply.tools_used,
        rounds: reply.rounds,
        blocked: reply.blocked,
        redacted: reply.redacted,
    }))
}
