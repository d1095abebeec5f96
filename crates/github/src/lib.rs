//! Source-control adapter: deploy-key registration through the GitHub API.

pub mod client;
pub mod error;
pub mod types;

pub use client::GitHubClient;
pub use error::{GitHubError, Result};
pub use types::{GitHubConfig, NewPublicKey, PublicKey};
