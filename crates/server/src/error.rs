use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator::{ExecError, OrchestratorError};
use provision_core::ProviderError;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Orchestrator(OrchestratorError),
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Orchestrator(err) => {
                let message = err.to_string();
                match err {
                    OrchestratorError::Validation(_) => {
                        (StatusCode::BAD_REQUEST, "validation_error", message)
                    }
                    OrchestratorError::Forbidden(_) => {
                        (StatusCode::FORBIDDEN, "forbidden", message)
                    }
                    OrchestratorError::TrackingNotFound(_)
                    | OrchestratorError::Exec(ExecError::InstanceNotFound(_))
                    | OrchestratorError::Provider(ProviderError::NotFound(_)) => {
                        (StatusCode::NOT_FOUND, "not_found", message)
                    }
                    OrchestratorError::NoPublicAddress(_) => {
                        (StatusCode::CONFLICT, "no_public_address", message)
                    }
                    OrchestratorError::Exec(ExecError::Auth(_))
                    | OrchestratorError::Provider(ProviderError::Auth(_)) => {
                        tracing::error!("Upstream authentication failed: {}", message);
                        (StatusCode::BAD_GATEWAY, "provider_auth", message)
                    }
                    _ => {
                        tracing::error!("Request failed: {}", message);
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
                    }
                }
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        AppError::Orchestrator(err)
    }
}
