//! Provisioning and remote-execution orchestrator.
//!
//! [`Provisioner`] turns one provisioning request into compute-provider
//! calls, readiness probes and remote script runs, publishing progress to a
//! [`events::ProgressTracker`]. Script runs are registered in the
//! [`SessionRegistry`] so their owners can abort them.

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod prober;
pub mod provisioner;
pub mod scripts;
pub mod sessions;
pub mod steps;
pub mod workflow;

pub use config::{OrchestratorConfig, ProbeSettings, TimeoutSettings};
pub use context::ProvisioningContext;
pub use error::{ExecError, OrchestratorError, Result};
pub use executor::{
    LocalShellTransport, OutputChunk, RemoteTarget, ScriptRunner, ShellTransport, SshTransport,
};
pub use prober::{ProbeResult, ReadinessProber, TcpConnectProbe, TcpProbe};
pub use provisioner::{Provisioner, ScriptHandle, ScriptRequest, ScriptRun};
pub use sessions::{ExecutionSession, SessionGuard, SessionRegistry};
pub use workflow::{ProvisionStep, RunState, StepOutcome, WorkflowEngine};
