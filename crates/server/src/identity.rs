use std::collections::HashMap;

use async_trait::async_trait;
use provision_core::{GitIdentity, IdentityLookup, ProviderError};

use crate::config::IdentityEntry;

/// Identity lookup backed by the `[[identities]]` table of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentities {
    entries: HashMap<String, IdentityEntry>,
}

impl StaticIdentities {
    pub fn new(entries: impl IntoIterator<Item = IdentityEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.user_id.clone(), e))
                .collect(),
        }
    }

    fn entry(&self, user_id: &str) -> Result<&IdentityEntry, ProviderError> {
        self.entries
            .get(user_id)
            .ok_or_else(|| ProviderError::NotFound(format!("identity for user {user_id}")))
    }
}

#[async_trait]
impl IdentityLookup for StaticIdentities {
    async fn login_name(&self, user_id: &str) -> Result<String, ProviderError> {
        Ok(self.entry(user_id)?.login.clone())
    }

    async fn git_identity(&self, user_id: &str) -> Result<GitIdentity, ProviderError> {
        let entry = self.entry(user_id)?;
        Ok(GitIdentity {
            email: entry.email.clone(),
            username: entry.username.clone(),
        })
    }
}
