use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use events::{PollResult, ProgressEvent};
use futures::stream::{Stream, StreamExt};
use provision_core::{ProvisionRequest, RepoBootstrap};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::caller::Caller;
use super::sse::{last_event_seq, progress_to_sse_event, SSE_KEEP_ALIVE_INTERVAL};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartProvisioningRequest {
    /// Caller's record for this instance; discovered facts are stored under it.
    pub record_id: String,
    pub name: String,
    pub project: String,
    pub zone: String,
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub disk_size_gb: Option<u32>,
    #[serde(default)]
    pub repository: Option<RepoBootstrap>,
    #[serde(default)]
    pub boot_script: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartProvisioningResponse {
    pub tracking_id: Uuid,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProgressQuery {
    /// First sequence number to return.
    #[serde(default)]
    pub cursor: u64,
}

#[utoipa::path(
    post,
    path = "/api/provisioning",
    request_body = StartProvisioningRequest,
    params(
        ("x-user-id" = String, Header, description = "Caller user id"),
        ("x-org-id" = String, Header, description = "Caller organization id"),
    ),
    responses(
        (status = 202, description = "Provisioning started", body = StartProvisioningResponse),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse)
    ),
    tag = "provisioning"
)]
pub async fn start_provisioning(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Json(body): Json<StartProvisioningRequest>,
) -> Result<(StatusCode, Json<StartProvisioningResponse>), AppError> {
    let request = ProvisionRequest {
        owner,
        record_id: body.record_id,
        name: body.name,
        project: body.project,
        zone: body.zone,
        machine_type: body.machine_type,
        image: body.image,
        disk_size_gb: body.disk_size_gb,
        repository: body.repository,
        boot_script: body.boot_script,
    };
    let tracking_id = state.provisioner.start_provisioning(request)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartProvisioningResponse { tracking_id }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/provisioning/{id}",
    params(
        ("id" = Uuid, Path, description = "Tracking ID"),
        ProgressQuery
    ),
    responses(
        (status = 200, description = "Progress events since the cursor", body = PollResult),
        (status = 404, description = "Unknown tracking ID", body = crate::error::ErrorResponse)
    ),
    tag = "provisioning"
)]
pub async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<PollResult>, AppError> {
    Ok(Json(state.provisioner.get_progress(id, query.cursor)?))
}

#[utoipa::path(
    get,
    path = "/api/provisioning/{id}/stream",
    params(
        ("id" = Uuid, Path, description = "Tracking ID"),
    ),
    responses(
        (status = 200, description = "SSE stream of progress events, closed after the terminal stage"),
        (status = 404, description = "Unknown tracking ID", body = crate::error::ErrorResponse)
    ),
    tag = "provisioning"
)]
pub async fn progress_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let after = last_event_seq(&headers);
    let events = state.provisioner.subscribe(id)?;

    let stream = events
        .filter(move |event: &ProgressEvent| {
            let keep = after.map_or(true, |seq| event.seq > seq);
            async move { keep }
        })
        .map(|event| progress_to_sse_event(&event));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}
