use async_trait::async_trait;
use chrono::Utc;
use events::Stage;
use tracing::{debug, info, warn};

use crate::context::ProvisioningContext;
use crate::error::Result;
use crate::scripts::SetupScripts;
use crate::workflow::{ProvisionStep, RunState, StepOutcome};

/// Give the instance a deploy key for the requested repository and clone it.
///
/// Every failure here is a warning. Without a captured key neither
/// registration nor clone is attempted.
pub struct RepositoryStep;

#[async_trait]
impl ProvisionStep for RepositoryStep {
    fn name(&self) -> &'static str {
        "repository"
    }

    fn stage(&self) -> Stage {
        Stage::Installing
    }

    fn entry_message(&self, state: &RunState) -> String {
        match state.request.repository {
            Some(ref repo) => format!("Setting up repository {}", repo.repository),
            None => "Installing".to_string(),
        }
    }

    fn applies_to(&self, state: &RunState) -> bool {
        state.request.repository.is_some()
    }

    async fn run(&self, ctx: &ProvisioningContext, state: &mut RunState) -> Result<StepOutcome> {
        let Some(repo) = state.request.repository.clone() else {
            return Ok(StepOutcome::Continue);
        };
        let Some(identity) = state.identity.clone() else {
            // Already reported by the prepare step.
            debug!(tracking_id = %state.tracking_id, "No git identity, skipping repository bootstrap");
            return Ok(StepOutcome::Continue);
        };
        let Some(target) = state.remote_target(ctx.config.probes.ssh_port) else {
            return Ok(StepOutcome::warning(format!(
                "Skipping repository {}: instance is not reachable",
                repo.repository
            )));
        };
        let owner = &state.request.owner;
        let timeouts = &ctx.config.timeouts;

        let keygen = SetupScripts::keygen(&identity, &ctx.config.clone_host);
        let result = match ctx
            .run_tracked_script(state.tracking_id, owner, &target, &keygen, timeouts.keygen)
            .await
        {
            Ok(result) => result,
            Err(e) => return Ok(StepOutcome::warning(format!("Key generation failed: {e}"))),
        };
        if !result.success() {
            return Ok(StepOutcome::warning(format!(
                "Key generation {}",
                result.describe()
            )));
        }

        let Some(public_key) = SetupScripts::extract_public_key(&result.stdout) else {
            return Ok(StepOutcome::warning(
                "No public key found in key generation output; skipping key registration and clone",
            ));
        };

        let title = SetupScripts::key_title(&state.request.name, Utc::now());
        match ctx
            .source_control
            .register_public_key(&owner.user_id, &title, &public_key)
            .await
        {
            Ok(true) => info!(tracking_id = %state.tracking_id, title = %title, "Deploy key registered"),
            Ok(false) => {
                return Ok(StepOutcome::warning(format!(
                    "Source control provider declined key '{title}'; skipping clone"
                )))
            }
            Err(e) => {
                warn!(tracking_id = %state.tracking_id, error = %e, "Key registration failed");
                return Ok(StepOutcome::warning(format!(
                    "Key registration failed: {e}; skipping clone"
                )));
            }
        }

        let clone = SetupScripts::clone(&repo, &ctx.config.clone_host);
        match ctx
            .run_tracked_script(state.tracking_id, owner, &target, &clone, timeouts.clone)
            .await
        {
            Ok(result) if result.success() => Ok(StepOutcome::Continue),
            Ok(result) => Ok(StepOutcome::warning(format!(
                "Clone of {} {}",
                repo.repository,
                result.describe()
            ))),
            Err(e) => Ok(StepOutcome::warning(format!(
                "Clone of {} failed: {e}",
                repo.repository
            ))),
        }
    }
}
