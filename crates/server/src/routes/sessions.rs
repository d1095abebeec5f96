use axum::extract::{Path, Query, State};
use axum::Json;
use provision_core::SessionSummary;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::caller::Caller;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct AbortQuery {
    /// Only abort if the session runs on this instance.
    pub instance_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AbortResponse {
    /// `false` when the session was unknown, already finished or already cancelled.
    pub aborted: bool,
}

#[utoipa::path(
    get,
    path = "/api/sessions",
    params(
        ("x-user-id" = String, Header, description = "Caller user id"),
        ("x-org-id" = String, Header, description = "Caller organization id"),
    ),
    responses(
        (status = 200, description = "Caller's in-flight script sessions", body = Vec<SessionSummary>)
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    Caller(owner): Caller,
) -> Json<Vec<SessionSummary>> {
    Json(state.provisioner.sessions_for(&owner))
}

#[utoipa::path(
    delete,
    path = "/api/sessions/{id}",
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        AbortQuery,
        ("x-user-id" = String, Header, description = "Caller user id"),
        ("x-org-id" = String, Header, description = "Caller organization id"),
    ),
    responses(
        (status = 200, description = "Abort outcome", body = AbortResponse),
        (status = 403, description = "Session belongs to someone else", body = crate::error::ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn abort_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AbortQuery>,
    Caller(owner): Caller,
) -> Result<Json<AbortResponse>, AppError> {
    let aborted = state
        .provisioner
        .abort_session(id, &owner, query.instance_id.as_deref())?;
    Ok(Json(AbortResponse { aborted }))
}
