//! Security monitoring endpoints: counters, recent events, threat levels.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use concierge_gateway::admission::GateStatsSnapshot;
use concierge_gateway::filter::FilterStats;
use concierge_gateway::input::InputStats;
use concierge_gateway::telemetry::SecurityCounters;
use concierge_gateway::{EventKind, SecurityEvent, ThreatAssessment};

use crate::state::AppState;

use super::{error, ApiError};

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 1000;

// ── Query params ────────────────────────────────────────────────

#[derive(Deserialize, utoipa::IntoParams)]
pub struct EventsQueryParams {
    /// Maximum number of events to return (default 50, max 1000).
    pub limit: Option<usize>,
    /// Only events of this kind (e.g. `tool_blocked`).
    pub kind: Option<String>,
}

// ── Response types ──────────────────────────────────────────────

#[derive(Serialize, utoipa::ToSchema)]
pub struct SecurityStatsResponse {
    #[schema(value_type = Object)]
    pub counters: SecurityCounters,
    #[schema(value_type = Object)]
    pub gate: GateStatsSnapshot,
    #[schema(value_type = Object)]
    pub output_filter: FilterStats,
    #[schema(value_type = Object)]
    pub input_validator: InputStats,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct SecurityEventsResponse {
    pub count: usize,
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<SecurityEvent>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ThreatResponse {
    #[schema(value_type = Object)]
    pub threat: ThreatAssessment,
}

// ── Handlers ────────────────────────────────────────────────────

/// Security counters
///
/// Rolling telemetry counters plus gate, filter and validator statistics.
#[utoipa::path(
    get,
    path = "/security/stats",
    tag = "Security",
    responses((status = 200, description = "Security statistics", body = SecurityStatsResponse))
)]
pub async fn security_stats(State(state): State<Arc<AppState>>) -> Json<SecurityStatsResponse> {
    let gateway = &state.gateway;
    Json(SecurityStatsResponse {
        counters: gateway.counters(),
        gate: gateway.gate_stats(),
        output_filter: gateway.filter_stats(),
        input_validator: gateway.input_stats(),
    })
}

/// Recent security events
///
/// Newest first. Supports optional `limit` and `kind` filters.
#[utoipa::path(
    get,
    path = "/security/events",
    tag = "Security",
    params(EventsQueryParams),
    responses(
        (status = 200, description = "Recent events", body = SecurityEventsResponse),
        (status = 400, description = "Unknown event kind", body = super::ErrorResponse)
    )
)]
pub async fn security_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQueryParams>,
) -> Result<Json<SecurityEventsResponse>, ApiError> {
    let kind = params
        .kind
        .as_deref()
        .map(str::parse::<EventKind>)
        .transpose()
        .map_err(|e| error(StatusCode::BAD_REQUEST, e))?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT);

    let events = state.gateway.telemetry().recent(limit, kind);
    Ok(Json(SecurityEventsResponse {
        count: events.len(),
        events,
    }))
}

/// Threat assessment for a conversation
#[utoipa::path(
    get,
    path = "/security/threat/{conversation_id}",
    tag = "Security",
    params(("conversation_id" = String, Path, description = "Conversation id")),
    responses((status = 200, description = "Threat level derived from recent events", body = ThreatResponse))
)]
pub async fn security_threat(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Json<ThreatResponse> {
    Json(ThreatResponse {
        threat: state.gateway.threat(&conversation_id),
    })
}
