use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use orchestrator::{OutputChunk, ScriptHandle, ScriptRequest};
use provision_core::{InstanceRef, ScriptResult};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use super::caller::Caller;
use super::sse::SSE_KEEP_ALIVE_INTERVAL;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RunScriptRequest {
    pub project: String,
    pub zone: String,
    pub script: String,
    /// Overrides the configured default timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionStartedPayload {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ScriptErrorPayload {
    pub message: String,
}

enum Phase {
    Announce(ScriptHandle),
    Streaming(ScriptHandle),
    Done,
}

fn json_event(name: &str, payload: &impl Serialize) -> Event {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(data)
}

fn output_event(chunk: &OutputChunk) -> Event {
    json_event(
        "output",
        &events::OutputChunk {
            stream: chunk.stream,
            text: chunk.text.clone(),
        },
    )
}

fn result_event(result: &ScriptResult) -> Event {
    json_event("result", result)
}

/// `session` first, then `output` events as they arrive, then one `result`
/// (or `error`) event. A client that disconnects drops the handle, which
/// aborts the run.
fn script_events(handle: ScriptHandle) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Phase::Announce(handle), |phase| async move {
        match phase {
            Phase::Announce(handle) => {
                let event = json_event(
                    "session",
                    &SessionStartedPayload {
                        session_id: handle.session_id,
                    },
                );
                Some((Ok(event), Phase::Streaming(handle)))
            }
            Phase::Streaming(mut handle) => match handle.next_output().await {
                Some(chunk) => Some((Ok(output_event(&chunk)), Phase::Streaming(handle))),
                None => {
                    let event = match handle.wait().await {
                        Ok(result) => result_event(&result),
                        Err(e) => json_event(
                            "error",
                            &ScriptErrorPayload {
                                message: e.to_string(),
                            },
                        ),
                    };
                    Some((Ok(event), Phase::Done))
                }
            },
            Phase::Done => None,
        }
    })
}

#[utoipa::path(
    post,
    path = "/api/instances/{instance}/scripts",
    request_body = RunScriptRequest,
    params(
        ("instance" = String, Path, description = "Instance name"),
        ("x-user-id" = String, Header, description = "Caller user id"),
        ("x-org-id" = String, Header, description = "Caller organization id"),
    ),
    responses(
        (status = 200, description = "SSE stream: `session`, `output`*, then `result` or `error`"),
        (status = 404, description = "Instance not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Instance has no public address", body = crate::error::ErrorResponse)
    ),
    tag = "scripts"
)]
pub async fn run_script(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Caller(owner): Caller,
    Json(body): Json<RunScriptRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if body.script.trim().is_empty() {
        return Err(AppError::BadRequest("script must not be empty".to_string()));
    }

    let request = ScriptRequest {
        instance: InstanceRef::new(body.project, body.zone, instance),
        owner,
        script: body.script,
        timeout: body.timeout_secs.map(Duration::from_secs),
    };
    let handle = state.provisioner.start_script(request).await?;
    info!(session_id = %handle.session_id, "Script session started");

    Ok(Sse::new(script_events(handle)).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}
