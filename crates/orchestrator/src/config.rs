use std::time::Duration;

/// Retry budgets for the two readiness probes.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub running_attempts: u32,
    pub running_interval: Duration,
    pub ssh_attempts: u32,
    pub ssh_interval: Duration,
    pub ssh_port: u16,
    pub connect_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            running_attempts: 60,
            running_interval: Duration::from_secs(5),
            ssh_attempts: 30,
            ssh_interval: Duration::from_secs(2),
            ssh_port: 22,
            connect_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutSettings {
    /// Default for ad-hoc `run_script` calls.
    pub script: Duration,
    pub boot_script: Duration,
    pub keygen: Duration,
    pub clone: Duration,
    /// How long to wait for a killed process to be reaped.
    pub abort_grace: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            script: Duration::from_secs(300),
            boot_script: Duration::from_secs(1800),
            keygen: Duration::from_secs(120),
            clone: Duration::from_secs(600),
            abort_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub probes: ProbeSettings,
    pub timeouts: TimeoutSettings,
    /// Host the repository is cloned from over SSH.
    pub clone_host: String,
    pub default_machine_type: String,
    pub default_image: String,
    pub default_disk_size_gb: u32,
    /// Public half of the key the service logs in with. Installed for the
    /// login user at instance creation.
    pub login_public_key: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            probes: ProbeSettings::default(),
            timeouts: TimeoutSettings::default(),
            clone_host: "github.com".to_string(),
            default_machine_type: "e2-medium".to_string(),
            default_image: "projects/debian-cloud/global/images/family/debian-12".to_string(),
            default_disk_size_gb: 20,
            login_public_key: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_probes(mut self, probes: ProbeSettings) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutSettings) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_clone_host(mut self, host: impl Into<String>) -> Self {
        self.clone_host = host.into();
        self
    }

    pub fn with_login_public_key(mut self, key: impl Into<String>) -> Self {
        self.login_public_key = Some(key.into());
        self
    }
}
