//! Domain types and collaborator contracts for the provisioning service.

pub mod domain;
pub mod error;
pub mod ports;

pub use domain::*;
pub use error::{CoreError, ProviderError, Result};
pub use ports::{ComputeProvider, GitIdentity, IdentityLookup, InstanceRegistry, SourceControl};
