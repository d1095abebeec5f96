//! The provisioning steps, in run order.

mod boot_script;
mod configure;
mod create;
mod finalize;
mod prepare;
mod repository;

pub use boot_script::BootScriptStep;
pub use configure::ConfigureStep;
pub use create::CreateStep;
pub use finalize::FinalizeStep;
pub use prepare::PrepareStep;
pub use repository::RepositoryStep;

use crate::workflow::ProvisionStep;

pub fn default_steps() -> Vec<Box<dyn ProvisionStep>> {
    vec![
        Box::new(PrepareStep),
        Box::new(CreateStep),
        Box::new(ConfigureStep),
        Box::new(RepositoryStep),
        Box::new(BootScriptStep),
        Box::new(FinalizeStep),
    ]
}
