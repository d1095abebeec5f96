use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{CoreError, Result};

/// The authenticated principal a request acts for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Owner {
    pub user_id: String,
    pub organization_id: String,
}

impl Owner {
    pub fn new(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
        }
    }
}

/// Optional source-repository bootstrap performed after the instance boots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RepoBootstrap {
    /// `owner/name` on the source-control provider.
    pub repository: String,
    /// Clone target relative to the login user's home. Defaults to the repo name.
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

impl RepoBootstrap {
    pub fn target_directory(&self) -> &str {
        match self.directory.as_deref() {
            Some(dir) if !dir.is_empty() => dir,
            _ => self
                .repository
                .rsplit('/')
                .next()
                .unwrap_or(&self.repository),
        }
    }
}

/// One "create instance + run setup" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProvisionRequest {
    pub owner: Owner,
    /// Identifier of the console-side instance record to update as facts are learned.
    pub record_id: String,
    pub name: String,
    pub project: String,
    pub zone: String,
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub disk_size_gb: Option<u32>,
    #[serde(default)]
    pub repository: Option<RepoBootstrap>,
    #[serde(default)]
    pub boot_script: Option<String>,
}

fn instance_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z]([-a-z0-9]{0,61}[a-z0-9])?$").ok())
        .as_ref()
}

fn repository_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").ok())
        .as_ref()
}

/// Values that fail to match, or cannot be checked, are rejected.
fn pattern_matches(pattern: Option<&Regex>, value: &str) -> bool {
    pattern.is_some_and(|re| re.is_match(value))
}

impl ProvisionRequest {
    /// Reject malformed requests before any external call is made.
    pub fn validate(&self) -> Result<()> {
        if !pattern_matches(instance_name_pattern(), &self.name) {
            return Err(CoreError::Validation(format!(
                "invalid instance name '{}': lowercase letters, digits and '-', starting with a letter, at most 63 characters",
                self.name
            )));
        }
        for (field, value) in [
            ("project", &self.project),
            ("zone", &self.zone),
            ("record_id", &self.record_id),
            ("owner.user_id", &self.owner.user_id),
            ("owner.organization_id", &self.owner.organization_id),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::Validation(format!("{field} must not be empty")));
            }
        }
        if let Some(size) = self.disk_size_gb {
            if size < 10 {
                return Err(CoreError::Validation(format!(
                    "disk_size_gb must be at least 10, got {size}"
                )));
            }
        }
        if let Some(ref repo) = self.repository {
            if !pattern_matches(repository_pattern(), &repo.repository) {
                return Err(CoreError::Validation(format!(
                    "repository must be in owner/name form, got '{}'",
                    repo.repository
                )));
            }
            if let Some(ref dir) = repo.directory {
                if dir.starts_with('/') || dir.split('/').any(|part| part == "..") {
                    return Err(CoreError::Validation(format!(
                        "repository directory must stay under the home directory, got '{dir}'"
                    )));
                }
            }
        }
        if let Some(ref script) = self.boot_script {
            if script.trim().is_empty() {
                return Err(CoreError::Validation(
                    "boot_script must not be blank when provided".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn needs_install(&self) -> bool {
        self.repository.is_some() || self.boot_script.is_some()
    }
}
