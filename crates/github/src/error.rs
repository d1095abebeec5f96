use provision_core::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Key rejected: {0}")]
    KeyRejected(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl GitHubError {
    /// `422 Validation Failed` responses for keys that are already attached
    /// to an account.
    pub fn is_key_in_use(&self) -> bool {
        matches!(self, GitHubError::KeyRejected(detail) if detail.contains("already in use"))
    }
}

impl From<octocrab::Error> for GitHubError {
    fn from(err: octocrab::Error) -> Self {
        match &err {
            octocrab::Error::GitHub { source, .. } => {
                let status = source.status_code.as_u16();
                let details = source
                    .errors
                    .as_ref()
                    .map(|errors| {
                        errors
                            .iter()
                            .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                    .filter(|d| !d.is_empty());
                let message = match details {
                    Some(details) => format!("{}: {}", source.message, details),
                    None => source.message.clone(),
                };

                if source.message.to_lowercase().contains("rate limit") {
                    GitHubError::RateLimitExceeded
                } else {
                    match status {
                        401 | 403 => GitHubError::Authentication(message),
                        422 => GitHubError::KeyRejected(message),
                        _ => GitHubError::Api { status, message },
                    }
                }
            }
            // Everything else is transport or decoding trouble.
            _ => GitHubError::Network(err.to_string()),
        }
    }
}

impl From<GitHubError> for ProviderError {
    fn from(err: GitHubError) -> Self {
        match err {
            GitHubError::Authentication(_) | GitHubError::Config(_) => {
                ProviderError::Auth(err.to_string())
            }
            GitHubError::RateLimitExceeded | GitHubError::Network(_) => {
                ProviderError::Transient(err.to_string())
            }
            GitHubError::Api { status, .. } if status >= 500 => {
                ProviderError::Transient(err.to_string())
            }
            GitHubError::Api { status: 404, .. } => ProviderError::NotFound(err.to_string()),
            _ => ProviderError::Permanent(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GitHubError>;
