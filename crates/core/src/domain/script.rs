use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Why a script stopped before the remote process exited on its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    Cancelled,
    TimedOut,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Terminal outcome of one script run.
///
/// An aborted run never carries an exit code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptOutcome {
    Exited { code: i32 },
    Aborted { reason: AbortReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScriptResult {
    pub stdout: String,
    pub stderr: String,
    pub outcome: ScriptOutcome,
    pub duration_ms: u64,
}

impl ScriptResult {
    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            ScriptOutcome::Exited { code } => Some(code),
            ScriptOutcome::Aborted { .. } => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, ScriptOutcome::Aborted { .. })
    }

    pub fn success(&self) -> bool {
        self.exit_code() == Some(0)
    }

    /// Short human readable description used in progress messages.
    pub fn describe(&self) -> String {
        match self.outcome {
            ScriptOutcome::Exited { code } => format!("exited with code {code}"),
            ScriptOutcome::Aborted { reason } => format!("aborted ({})", reason.as_str()),
        }
    }
}
