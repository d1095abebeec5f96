use std::collections::BTreeMap;

use async_trait::async_trait;
use events::Stage;
use provision_core::CreateInstanceSpec;
use tracing::info;

use crate::context::ProvisioningContext;
use crate::error::Result;
use crate::workflow::{ProvisionStep, RunState, StepOutcome};

/// Request the instance from the compute provider.
pub struct CreateStep;

impl CreateStep {
    pub fn instance_spec(ctx: &ProvisioningContext, state: &RunState) -> CreateInstanceSpec {
        let request = &state.request;
        let config = &ctx.config;

        let ssh_keys = match (state.login.as_deref(), config.login_public_key.as_deref()) {
            (Some(login), Some(key)) => vec![format!("{}:{}", login, key.trim())],
            _ => Vec::new(),
        };

        let mut labels = BTreeMap::new();
        labels.insert("managed-by".to_string(), "provisiond".to_string());
        labels.insert(
            "organization".to_string(),
            label_value(&request.owner.organization_id),
        );

        CreateInstanceSpec {
            project: request.project.clone(),
            zone: request.zone.clone(),
            name: request.name.clone(),
            machine_type: request
                .machine_type
                .clone()
                .unwrap_or_else(|| config.default_machine_type.clone()),
            image: request
                .image
                .clone()
                .unwrap_or_else(|| config.default_image.clone()),
            disk_size_gb: request.disk_size_gb.unwrap_or(config.default_disk_size_gb),
            ssh_keys,
            labels,
        }
    }
}

/// Label values allow lowercase letters, digits, `-` and `_`, at most 63 characters.
fn label_value(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(63)
        .collect()
}

#[async_trait]
impl ProvisionStep for CreateStep {
    fn name(&self) -> &'static str {
        "create"
    }

    fn stage(&self) -> Stage {
        Stage::Creating
    }

    fn entry_message(&self, state: &RunState) -> String {
        format!(
            "Creating instance {} in {}/{}",
            state.request.name, state.request.project, state.request.zone
        )
    }

    async fn run(&self, ctx: &ProvisioningContext, state: &mut RunState) -> Result<StepOutcome> {
        let spec = Self::instance_spec(ctx, state);
        let created = match ctx.compute.create_instance(&spec).await {
            Ok(created) => created,
            Err(e) => return Ok(StepOutcome::Fatal(format!("instance creation failed: {e}"))),
        };

        info!(
            tracking_id = %state.tracking_id,
            instance = %spec.instance_ref(),
            provider_id = %created.id,
            "Instance created"
        );
        ctx.tracker.set_instance(state.tracking_id, created.id.clone())?;
        state.instance = Some(spec.instance_ref());
        state.provider_id = Some(created.id);
        Ok(StepOutcome::Continue)
    }
}
