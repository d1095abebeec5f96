//! Driver loop mapping step outcomes onto the tracking stream.

use std::sync::Arc;

use events::Stage;
use tracing::{debug, error, info};

use super::step::{ProvisionStep, RunState, StepOutcome};
use crate::context::ProvisioningContext;
use crate::error::{OrchestratorError, Result};
use crate::steps;

pub struct WorkflowEngine {
    ctx: Arc<ProvisioningContext>,
    steps: Vec<Box<dyn ProvisionStep>>,
}

impl WorkflowEngine {
    /// Engine running the standard provisioning steps.
    pub fn new(ctx: Arc<ProvisioningContext>) -> Self {
        Self::with_steps(ctx, steps::default_steps())
    }

    pub fn with_steps(ctx: Arc<ProvisioningContext>, steps: Vec<Box<dyn ProvisionStep>>) -> Self {
        Self { ctx, steps }
    }

    pub fn shared_context(&self) -> Arc<ProvisioningContext> {
        Arc::clone(&self.ctx)
    }

    /// Run every applicable step, then close the stream with `Complete` or
    /// `Error`. Returns the terminal stage.
    pub async fn run(&self, mut state: RunState) -> Stage {
        let tracking_id = state.tracking_id;
        match self.run_steps(&mut state).await {
            Ok(()) => {
                let message = match state.provider_id {
                    Some(ref id) => format!("Instance {} is ready (id {})", state.request.name, id),
                    None => format!("Instance {} is ready", state.request.name),
                };
                match self.ctx.tracker.complete(tracking_id, message) {
                    Ok(_) => Stage::Complete,
                    Err(e) => {
                        error!(tracking_id = %tracking_id, error = %e, "Failed to complete tracking stream");
                        Stage::Error
                    }
                }
            }
            Err(e) => {
                error!(tracking_id = %tracking_id, error = %e, "Provisioning failed");
                if let Err(track_err) = self.ctx.tracker.fail(tracking_id, e.to_string()) {
                    debug!(tracking_id = %tracking_id, error = %track_err, "Tracking stream already closed");
                }
                Stage::Error
            }
        }
    }

    async fn run_steps(&self, state: &mut RunState) -> Result<()> {
        let tracking_id = state.tracking_id;
        for step in &self.steps {
            if !step.applies_to(state) {
                debug!(tracking_id = %tracking_id, step = step.name(), "Skipping step");
                continue;
            }

            let current = self.ctx.tracker.snapshot(tracking_id)?.stage;
            if current != step.stage() {
                self.ctx
                    .tracker
                    .advance(tracking_id, step.stage(), step.entry_message(state))?;
            }

            info!(tracking_id = %tracking_id, step = step.name(), "Running step");
            match step.run(&self.ctx, state).await? {
                StepOutcome::Continue => {}
                StepOutcome::Warnings(warnings) => {
                    for warning in warnings {
                        self.ctx.tracker.warn(tracking_id, warning)?;
                    }
                }
                StepOutcome::Fatal(message) => {
                    return Err(OrchestratorError::step_failed(step.stage(), message));
                }
            }
        }
        Ok(())
    }
}
