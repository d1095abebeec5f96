//! Provisioning workflow as an explicit sequence of typed steps.
//!
//! - [`ProvisionStep`] - trait every step implements
//! - [`StepOutcome`] - continue, continue with warnings, or stop
//! - [`WorkflowEngine`] - driver loop that maps outcomes onto the tracking stream

mod engine;
mod step;

pub use engine::WorkflowEngine;
pub use step::{ProvisionStep, RunState, StepOutcome};
