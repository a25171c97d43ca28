//! OpenAPI documentation aggregator.
//!
//! Collects the `#[utoipa::path]`-annotated handlers and `ToSchema` types into
//! one OpenAPI document, served as JSON and through the Scalar UI at `/docs`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "concierge API",
        version = "0.1.0",
        description = "Hospitality assistant gateway with gated tool execution and output filtering.",
    ),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Chat", description = "Conversational turns"),
        (name = "Security", description = "Security telemetry and threat assessment"),
    ),
    paths(
        crate::api::health::health,
        crate::api::chat::chat,
        crate::api::security::security_stats,
        crate::api::security::security_events,
        crate::api::security::security_threat,
    ),
    components(schemas(
        crate::api::ErrorResponse,
        crate::api::health::HealthResponse,
        crate::api::chat::ChatRequest,
        crate::api::chat::ChatResponse,
        crate::api::security::SecurityStatsResponse,
        crate::api::security::SecurityEventsResponse,
        crate::api::security::ThreatResponse,
    ))
)]
pub struct ApiDoc;
