//! Wire types for the Compute Engine REST API.

use std::collections::BTreeMap;

use provision_core::{
    CreateInstanceSpec, InstanceInfo, InstanceStatus, NetworkInterface as DomainInterface,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceResource {
    pub name: String,
    pub machine_type: String,
    pub disks: Vec<AttachedDisk>,
    pub network_interfaces: Vec<NetworkInterfaceSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    pub boot: bool,
    pub auto_delete: bool,
    pub initialize_params: DiskInitializeParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInitializeParams {
    pub source_image: String,
    /// int64 fields travel as strings.
    pub disk_size_gb: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceSpec {
    pub network: String,
    pub access_configs: Vec<AccessConfigSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessConfigSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

impl InstanceResource {
    pub fn from_spec(spec: &CreateInstanceSpec) -> Self {
        let metadata = if spec.ssh_keys.is_empty() {
            None
        } else {
            Some(Metadata {
                items: vec![MetadataItem {
                    key: "ssh-keys".to_string(),
                    value: spec.ssh_keys.join("\n"),
                }],
            })
        };

        Self {
            name: spec.name.clone(),
            machine_type: format!("zones/{}/machineTypes/{}", spec.zone, spec.machine_type),
            disks: vec![AttachedDisk {
                boot: true,
                auto_delete: true,
                initialize_params: DiskInitializeParams {
                    source_image: spec.image.clone(),
                    disk_size_gb: spec.disk_size_gb.to_string(),
                },
            }],
            network_interfaces: vec![NetworkInterfaceSpec {
                network: "global/networks/default".to_string(),
                access_configs: vec![AccessConfigSpec {
                    kind: "ONE_TO_ONE_NAT".to_string(),
                    name: "External NAT".to_string(),
                }],
            }],
            metadata,
            labels: spec.labels.clone(),
        }
    }
}

/// Long-running operation returned by mutating calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Id of the resource the operation acts on.
    #[serde(default)]
    pub target_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub network_interfaces: Vec<InstanceNetworkInterface>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceNetworkInterface {
    #[serde(default, rename = "networkIP")]
    pub network_ip: Option<String>,
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    #[serde(default, rename = "natIP")]
    pub nat_ip: Option<String>,
}

impl From<Instance> for InstanceInfo {
    fn from(instance: Instance) -> Self {
        InstanceInfo {
            id: instance.id,
            name: instance.name,
            status: InstanceStatus::parse(&instance.status),
            network_interfaces: instance
                .network_interfaces
                .into_iter()
                .map(|nic| DomainInterface {
                    internal_ip: nic.network_ip,
                    external_ip: nic.access_configs.into_iter().find_map(|ac| ac.nat_ip),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    pub message: String,
}
