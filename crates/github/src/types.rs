use serde::{Deserialize, Serialize};

/// Body of `POST /user/keys`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPublicKey {
    pub title: String,
    pub key: String,
}

/// A key attached to the authenticated account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKey {
    pub id: u64,
    pub key: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub verified: bool,
}

/// Connection settings for the GitHub API.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: Option<String>,
    pub token: String,
}

impl GitHubConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_url: None,
            token: token.into(),
        }
    }

    /// Point the client at GitHub Enterprise or a test server.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }
}
