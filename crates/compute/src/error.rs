use provision_core::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Compute API error: {message}")]
    Api { message: String, status_code: Option<u16> },

    #[error("Compute API rate limited")]
    RateLimited,

    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ComputeError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ComputeError::RateLimited => true,
            ComputeError::Api {
                status_code: Some(code),
                ..
            } => *code >= 500,
            ComputeError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl From<ComputeError> for ProviderError {
    fn from(err: ComputeError) -> Self {
        match err {
            ComputeError::NotFound(ref name) => ProviderError::NotFound(name.clone()),
            ComputeError::Authentication(_) | ComputeError::InvalidConfig(_) => {
                ProviderError::Auth(err.to_string())
            }
            ref e if e.is_retryable() => ProviderError::Transient(err.to_string()),
            _ => ProviderError::Permanent(err.to_string()),
        }
    }
}

pub type ComputeResult<T> = Result<T, ComputeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_mapping() {
        assert_eq!(
            ProviderError::from(ComputeError::NotFound("box1".into())),
            ProviderError::NotFound("box1".into())
        );
        assert!(matches!(
            ProviderError::from(ComputeError::Authentication("expired token".into())),
            ProviderError::Auth(_)
        ));
        assert!(ProviderError::from(ComputeError::Api {
            message: "backend error".into(),
            status_code: Some(503),
        })
        .is_transient());
        assert!(matches!(
            ProviderError::from(ComputeError::Api {
                message: "quota exceeded".into(),
                status_code: Some(400),
            }),
            ProviderError::Permanent(_)
        ));
    }
}
