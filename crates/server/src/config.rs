//! Service configuration loaded from `~/.config/provisiond/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use orchestrator::{OrchestratorConfig, ProbeSettings, TimeoutSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const CONFIG_DIR: &str = "provisiond";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub probes: ProbeSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub ssh: SshSection,
    #[serde(default)]
    pub compute: ComputeSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub identities: Vec<IdentityEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen: String,
    /// Finished tracking streams older than this are dropped.
    pub tracker_retention_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3001".to_string(),
            tracker_retention_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub running_attempts: u32,
    pub running_interval_secs: u64,
    pub ssh_attempts: u32,
    pub ssh_interval_secs: u64,
    pub ssh_port: u16,
    pub connect_timeout_secs: u64,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            running_attempts: 60,
            running_interval_secs: 5,
            ssh_attempts: 30,
            ssh_interval_secs: 2,
            ssh_port: 22,
            connect_timeout_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    pub script_secs: u64,
    pub boot_script_secs: u64,
    pub keygen_secs: u64,
    pub clone_secs: u64,
    pub abort_grace_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            script_secs: 300,
            boot_script_secs: 1800,
            keygen_secs: 120,
            clone_secs: 600,
            abort_grace_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub private_key: Option<PathBuf>,
    /// Value for `StrictHostKeyChecking`.
    pub known_hosts: String,
    pub extra_args: Vec<String>,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            private_key: None,
            known_hosts: "accept-new".to_string(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeSection {
    pub base_url: String,
    pub token_env: String,
    pub default_machine_type: String,
    pub default_image: String,
    pub default_disk_size_gb: u32,
}

impl Default for ComputeSection {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            base_url: "https://compute.googleapis.com/compute/v1".to_string(),
            token_env: "COMPUTE_TOKEN".to_string(),
            default_machine_type: defaults.default_machine_type,
            default_image: defaults.default_image,
            default_disk_size_gb: defaults.default_disk_size_gb,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSection {
    pub api_url: Option<String>,
    pub token_env: String,
    pub clone_host: String,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            api_url: None,
            token_env: "GITHUB_TOKEN".to_string(),
            clone_host: "github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite://provisiond.db".to_string(),
        }
    }
}

/// One row of the static identity table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityEntry {
    pub user_id: String,
    pub login: String,
    pub email: String,
    pub username: String,
}

impl ServiceConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join(CONFIG_DIR).join(CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn tracker_retention(&self) -> Duration {
        Duration::from_secs(self.server.tracker_retention_secs)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let probes = &self.probes;
        let timeouts = &self.timeouts;

        let mut config = OrchestratorConfig::default()
            .with_probes(ProbeSettings {
                running_attempts: probes.running_attempts,
                running_interval: Duration::from_secs(probes.running_interval_secs),
                ssh_attempts: probes.ssh_attempts,
                ssh_interval: Duration::from_secs(probes.ssh_interval_secs),
                ssh_port: probes.ssh_port,
                connect_timeout: Duration::from_secs(probes.connect_timeout_secs),
            })
            .with_timeouts(TimeoutSettings {
                script: Duration::from_secs(timeouts.script_secs),
                boot_script: Duration::from_secs(timeouts.boot_script_secs),
                keygen: Duration::from_secs(timeouts.keygen_secs),
                clone: Duration::from_secs(timeouts.clone_secs),
                abort_grace: Duration::from_secs(timeouts.abort_grace_secs),
            })
            .with_clone_host(&self.github.clone_host);

        config.default_machine_type = self.compute.default_machine_type.clone();
        config.default_image = self.compute.default_image.clone();
        config.default_disk_size_gb = self.compute.default_disk_size_gb;
        config
    }
}
