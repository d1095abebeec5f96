use async_trait::async_trait;
use octocrab::Octocrab;
use provision_core::{ProviderError, SourceControl};
use tracing::{debug, info, warn};

use crate::error::{GitHubError, Result};
use crate::types::{GitHubConfig, NewPublicKey, PublicKey};

pub struct GitHubClient {
    octocrab: Octocrab,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(config.token);
        if let Some(ref url) = config.api_url {
            builder = builder
                .base_uri(url.as_str())
                .map_err(|e| GitHubError::Config(e.to_string()))?;
        }
        let octocrab = builder
            .build()
            .map_err(|e| GitHubError::Config(e.to_string()))?;

        Ok(Self { octocrab })
    }

    /// Read the token from the environment variable `token_env`.
    pub fn from_env(token_env: &str, api_url: Option<&str>) -> Result<Self> {
        let token = std::env::var(token_env)
            .map_err(|_| GitHubError::Authentication(format!("{token_env} not set")))?;
        let mut config = GitHubConfig::new(token);
        if let Some(url) = api_url {
            config = config.with_api_url(url);
        }
        Self::new(config)
    }

    /// Attach `key` to the authenticated account.
    pub async fn add_public_key(&self, title: &str, key: &str) -> Result<PublicKey> {
        info!("Registering public key '{}'", title);

        let body = NewPublicKey {
            title: title.to_string(),
            key: key.to_string(),
        };
        let created: PublicKey = self.octocrab.post("/user/keys", Some(&body)).await?;

        debug!("Public key '{}' registered with id {}", title, created.id);
        Ok(created)
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    async fn register_public_key(
        &self,
        user_id: &str,
        title: &str,
        key: &str,
    ) -> std::result::Result<bool, ProviderError> {
        match self.add_public_key(title, key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_key_in_use() => {
                debug!(user_id, title, "Public key already registered");
                Ok(true)
            }
            Err(GitHubError::KeyRejected(reason)) => {
                warn!(user_id, title, reason = %reason, "Public key rejected");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
