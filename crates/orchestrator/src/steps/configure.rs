use async_trait::async_trait;
use events::Stage;
use tracing::{info, warn};

use crate::context::ProvisioningContext;
use crate::error::{OrchestratorError, Result};
use crate::workflow::{ProvisionStep, RunState, StepOutcome};

/// Record the instance, wait for it to run and for its SSH port to open.
///
/// Only the running-state wait is mandatory. Registry writes, the public
/// address and SSH reachability are best effort.
pub struct ConfigureStep;

#[async_trait]
impl ProvisionStep for ConfigureStep {
    fn name(&self) -> &'static str {
        "configure"
    }

    fn stage(&self) -> Stage {
        Stage::Configuring
    }

    fn entry_message(&self, state: &RunState) -> String {
        format!("Waiting for instance {} to start", state.request.name)
    }

    async fn run(&self, ctx: &ProvisioningContext, state: &mut RunState) -> Result<StepOutcome> {
        let Some(instance) = state.instance.clone() else {
            return Ok(StepOutcome::Fatal("no instance was created".to_string()));
        };
        let record_id = state.request.record_id.clone();
        let probes = &ctx.config.probes;
        let mut warnings = Vec::new();

        if let Some(ref provider_id) = state.provider_id {
            if let Err(e) = ctx.instances.record_instance_id(&record_id, provider_id).await {
                warn!(tracking_id = %state.tracking_id, error = %e, "Failed to record instance id");
                warnings.push(format!("Could not record instance id: {e}"));
            }
        }

        let running = ctx
            .prober
            .wait_for_running(&instance, probes.running_attempts, probes.running_interval)
            .await;
        if let Some(failure) = running.failure {
            return Err(failure.into());
        }
        if !running.result.ready {
            return Err(OrchestratorError::ReadinessTimeout {
                instance: instance.instance_id.clone(),
                attempts: running.result.attempts,
            });
        }
        info!(
            tracking_id = %state.tracking_id,
            instance = %instance,
            attempts = running.result.attempts,
            "Instance running"
        );

        let address = running
            .instance
            .as_ref()
            .and_then(|info| info.public_address())
            .map(str::to_string);
        let Some(address) = address else {
            warnings.push(format!(
                "Instance {} has no public address; remote setup will be skipped",
                instance.instance_id
            ));
            return Ok(StepOutcome::from_warnings(warnings));
        };

        if let Err(e) = ctx.instances.record_public_address(&record_id, &address).await {
            warn!(tracking_id = %state.tracking_id, error = %e, "Failed to record public address");
            warnings.push(format!("Could not record public address: {e}"));
        }
        state.public_address = Some(address.clone());

        let ssh = ctx
            .prober
            .wait_for_ssh_reachable(&address, probes.ssh_port, probes.ssh_attempts, probes.ssh_interval)
            .await;
        if !ssh.ready {
            warnings.push(format!(
                "SSH port {} on {} not reachable after {} attempts; continuing",
                probes.ssh_port, address, ssh.attempts
            ));
        }

        Ok(StepOutcome::from_warnings(warnings))
    }
}
