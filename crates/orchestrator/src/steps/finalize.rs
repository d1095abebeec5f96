use async_trait::async_trait;
use events::Stage;

use crate::context::ProvisioningContext;
use crate::error::Result;
use crate::workflow::{ProvisionStep, RunState, StepOutcome};

pub struct FinalizeStep;

#[async_trait]
impl ProvisionStep for FinalizeStep {
    fn name(&self) -> &'static str {
        "finalize"
    }

    fn stage(&self) -> Stage {
        Stage::Finalizing
    }

    fn entry_message(&self, state: &RunState) -> String {
        match state.public_address {
            Some(ref address) => format!("Finalizing {} at {}", state.request.name, address),
            None => format!("Finalizing {}", state.request.name),
        }
    }

    async fn run(&self, _ctx: &ProvisioningContext, _state: &mut RunState) -> Result<StepOutcome> {
        Ok(StepOutcome::Continue)
    }
}
