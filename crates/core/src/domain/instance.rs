use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Address of one compute instance at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct InstanceRef {
    pub project: String,
    pub zone: String,
    /// Instance name as known to the provider.
    pub instance_id: String,
}

impl InstanceRef {
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl std::fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.zone, self.instance_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Terminated,
    #[default]
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Staging => "staging",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Suspending => "suspending",
            Self::Suspended => "suspended",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a provider status string. Providers report upper case
    /// (`RUNNING`), stored records use lower case; both are accepted.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "provisioning" => Self::Provisioning,
            "staging" => Self::Staging,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "suspending" => Self::Suspending,
            "suspended" => Self::Suspended,
            "terminated" => Self::Terminated,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NetworkInterface {
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
}

/// Snapshot returned by `getInstance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

impl InstanceInfo {
    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    /// First external address across all interfaces.
    pub fn public_address(&self) -> Option<&str> {
        self.network_interfaces
            .iter()
            .find_map(|nic| nic.external_ip.as_deref())
    }
}

/// Parameters for `createInstance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstanceSpec {
    pub project: String,
    pub zone: String,
    pub name: String,
    pub machine_type: String,
    pub image: String,
    pub disk_size_gb: u32,
    /// `login:public-key` entries authorised on first boot.
    pub ssh_keys: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

impl CreateInstanceSpec {
    pub fn instance_ref(&self) -> InstanceRef {
        InstanceRef::new(&self.project, &self.zone, &self.name)
    }
}

/// Provider response to `createInstance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInstance {
    /// Provider-assigned identifier (distinct from the instance name).
    pub id: String,
}
