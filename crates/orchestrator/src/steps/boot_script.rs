use async_trait::async_trait;
use events::Stage;

use crate::context::ProvisioningContext;
use crate::error::Result;
use crate::workflow::{ProvisionStep, RunState, StepOutcome};

/// Run the caller's own setup script.
pub struct BootScriptStep;

#[async_trait]
impl ProvisionStep for BootScriptStep {
    fn name(&self) -> &'static str {
        "boot_script"
    }

    fn stage(&self) -> Stage {
        Stage::Installing
    }

    fn entry_message(&self, state: &RunState) -> String {
        format!("Running boot script on {}", state.request.name)
    }

    fn applies_to(&self, state: &RunState) -> bool {
        state.request.boot_script.is_some()
    }

    async fn run(&self, ctx: &ProvisioningContext, state: &mut RunState) -> Result<StepOutcome> {
        let Some(script) = state.request.boot_script.clone() else {
            return Ok(StepOutcome::Continue);
        };
        let Some(target) = state.remote_target(ctx.config.probes.ssh_port) else {
            return Ok(StepOutcome::warning(
                "Skipping boot script: instance is not reachable",
            ));
        };

        match ctx
            .run_tracked_script(
                state.tracking_id,
                &state.request.owner,
                &target,
                &script,
                ctx.config.timeouts.boot_script,
            )
            .await
        {
            Ok(result) if result.success() => Ok(StepOutcome::Continue),
            Ok(result) => Ok(StepOutcome::warning(format!("Boot script {}", result.describe()))),
            Err(e) => Ok(StepOutcome::warning(format!("Boot script failed: {e}"))),
        }
    }
}
