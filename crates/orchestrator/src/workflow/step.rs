//! Step trait and per-run state for the provisioning workflow.

use async_trait::async_trait;
use events::Stage;
use provision_core::{GitIdentity, InstanceRef, ProvisionRequest};
use uuid::Uuid;

use crate::context::ProvisioningContext;
use crate::error::Result;
use crate::executor::RemoteTarget;

/// Facts learned while a run progresses. Later steps depend on what earlier
/// steps recorded here.
#[derive(Debug, Clone)]
pub struct RunState {
    pub tracking_id: Uuid,
    pub request: ProvisionRequest,
    pub login: Option<String>,
    pub identity: Option<GitIdentity>,
    pub instance: Option<InstanceRef>,
    pub provider_id: Option<String>,
    pub public_address: Option<String>,
}

impl RunState {
    pub fn new(tracking_id: Uuid, request: ProvisionRequest) -> Self {
        Self {
            tracking_id,
            request,
            login: None,
            identity: None,
            instance: None,
            provider_id: None,
            public_address: None,
        }
    }

    /// SSH target for the created instance, once its address and the login
    /// user are known.
    pub fn remote_target(&self, port: u16) -> Option<RemoteTarget> {
        Some(RemoteTarget::new(
            self.instance.clone()?,
            self.public_address.clone()?,
            port,
            self.login.clone()?,
        ))
    }
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// Optional work failed; the run goes on after the warnings are published.
    Warnings(Vec<String>),
    /// The run cannot go on.
    Fatal(String),
}

impl StepOutcome {
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warnings(vec![message.into()])
    }

    pub fn from_warnings(warnings: Vec<String>) -> Self {
        if warnings.is_empty() {
            Self::Continue
        } else {
            Self::Warnings(warnings)
        }
    }
}

/// One unit of the provisioning workflow.
///
/// The engine advances the tracking stream to [`ProvisionStep::stage`] before
/// running the step unless the stream is already there, so consecutive steps
/// may share a stage.
#[async_trait]
pub trait ProvisionStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    /// Message published with the stage transition.
    fn entry_message(&self, state: &RunState) -> String;

    fn applies_to(&self, _state: &RunState) -> bool {
        true
    }

    async fn run(&self, ctx: &ProvisioningContext, state: &mut RunState) -> Result<StepOutcome>;
}
