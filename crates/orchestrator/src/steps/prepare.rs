use async_trait::async_trait;
use events::Stage;
use tracing::warn;

use crate::context::ProvisioningContext;
use crate::error::Result;
use crate::workflow::{ProvisionStep, RunState, StepOutcome};

/// Resolve per-user data the later steps need.
pub struct PrepareStep;

#[async_trait]
impl ProvisionStep for PrepareStep {
    fn name(&self) -> &'static str {
        "prepare"
    }

    fn stage(&self) -> Stage {
        Stage::Preparing
    }

    fn entry_message(&self, state: &RunState) -> String {
        format!("Preparing instance {}", state.request.name)
    }

    async fn run(&self, ctx: &ProvisioningContext, state: &mut RunState) -> Result<StepOutcome> {
        let user_id = state.request.owner.user_id.clone();
        state.login = Some(ctx.identities.login_name(&user_id).await?);

        if state.request.repository.is_none() {
            return Ok(StepOutcome::Continue);
        }
        match ctx.identities.git_identity(&user_id).await {
            Ok(identity) => {
                state.identity = Some(identity);
                Ok(StepOutcome::Continue)
            }
            Err(e) => {
                warn!(tracking_id = %state.tracking_id, error = %e, "Git identity lookup failed");
                Ok(StepOutcome::warning(format!(
                    "Repository bootstrap disabled: could not resolve git identity: {e}"
                )))
            }
        }
    }
}
