use events::{Stage, TrackerError};
use provision_core::{CoreError, ProviderError};
use thiserror::Error;
use uuid::Uuid;

/// Failures of one remote script execution.
///
/// Cancellation and timeout are not errors; they are reported as
/// `ScriptOutcome::Aborted` in a successful result.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Failed to start remote shell: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Connection-level failures that typically clear up once an instance
    /// finishes booting.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Tracking stream not found: {0}")]
    TrackingNotFound(Uuid),

    #[error("Tracking stream {0} already finished")]
    TrackingFinished(Uuid),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Instance {instance} not running after {attempts} status checks")]
    ReadinessTimeout { instance: String, attempts: u32 },

    #[error("Instance {0} has no public address")]
    NoPublicAddress(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("{stage} failed: {message}")]
    StepFailed { stage: Stage, message: String },
}

impl OrchestratorError {
    pub fn step_failed(stage: Stage, message: impl Into<String>) -> Self {
        Self::StepFailed {
            stage,
            message: message.into(),
        }
    }
}

impl From<TrackerError> for OrchestratorError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(id) => Self::TrackingNotFound(id),
            TrackerError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            TrackerError::Finished(id) => Self::TrackingFinished(id),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
