pub mod config;
pub mod error;
pub mod identity;
pub mod routes;
pub mod state;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "provisiond API",
        version = "0.1.0",
        description = "Provision cloud instances and run scripts on them"
    ),
    paths(
        routes::health_check,
        routes::provisioning::start_provisioning,
        routes::provisioning::get_progress,
        routes::provisioning::progress_stream,
        routes::scripts::run_script,
        routes::list_sessions,
        routes::abort_session,
        routes::sse::events_stream,
    ),
    components(schemas(
        routes::HealthResponse,
        routes::AbortResponse,
        routes::provisioning::StartProvisioningRequest,
        routes::provisioning::StartProvisioningResponse,
        routes::scripts::RunScriptRequest,
        routes::scripts::SessionStartedPayload,
        routes::scripts::ScriptErrorPayload,
        error::ErrorResponse,
        events::PollResult,
        events::ProgressEvent,
        events::ProgressKind,
        events::Stage,
        events::OutputChunk,
        provision_core::RepoBootstrap,
        provision_core::SessionSummary,
        provision_core::ScriptResult,
        provision_core::ScriptOutcome,
        provision_core::AbortReason,
        provision_core::OutputStream,
    )),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "provisioning", description = "Instance provisioning and progress"),
        (name = "scripts", description = "Ad-hoc script execution"),
        (name = "sessions", description = "In-flight script sessions"),
        (name = "events", description = "Real-time event streaming (SSE)"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", ApiDoc::openapi()))
        .route("/health", get(routes::health_check))
        .route(
            "/api/provisioning",
            post(routes::provisioning::start_provisioning),
        )
        .route(
            "/api/provisioning/{id}",
            get(routes::provisioning::get_progress),
        )
        .route(
            "/api/provisioning/{id}/stream",
            get(routes::provisioning::progress_stream),
        )
        .route(
            "/api/instances/{instance}/scripts",
            post(routes::scripts::run_script),
        )
        .route("/api/sessions", get(routes::list_sessions))
        .route("/api/sessions/{id}", delete(routes::abort_session))
        .route("/api/events", get(routes::sse::events_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
