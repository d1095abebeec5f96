//! Contracts for the external collaborators the orchestrator drives.
//!
//! Each trait is deliberately narrow: the orchestrator only needs the calls
//! listed here, and adapters in sibling crates implement them against real
//! providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{CreateInstanceSpec, CreatedInstance, InstanceInfo, InstanceRef};
use crate::error::ProviderError;

/// Cloud compute provider.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn create_instance(
        &self,
        spec: &CreateInstanceSpec,
    ) -> Result<CreatedInstance, ProviderError>;

    async fn get_instance(&self, instance: &InstanceRef) -> Result<InstanceInfo, ProviderError>;
}

/// Write-only view of the console's instance records.
#[async_trait]
pub trait InstanceRegistry: Send + Sync {
    async fn record_instance_id(
        &self,
        record_id: &str,
        provider_id: &str,
    ) -> Result<(), ProviderError>;

    async fn record_public_address(
        &self,
        record_id: &str,
        address: &str,
    ) -> Result<(), ProviderError>;
}

/// Source-control provider used during repository bootstrap.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Register `key` for `user_id`. Returns `false` when the provider
    /// declined the key without an error.
    async fn register_public_key(
        &self,
        user_id: &str,
        title: &str,
        key: &str,
    ) -> Result<bool, ProviderError>;
}

/// Name/email pair used to configure git on the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitIdentity {
    pub email: String,
    pub username: String,
}

/// Keyed lookup of per-user account data.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// Login account name on provisioned instances.
    async fn login_name(&self, user_id: &str) -> Result<String, ProviderError>;

    async fn git_identity(&self, user_id: &str) -> Result<GitIdentity, ProviderError>;
}
