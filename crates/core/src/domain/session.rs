use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Owner;

/// Public view of one in-flight script execution.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionSummary {
    pub id: Uuid,
    pub instance_id: String,
    pub organization_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl SessionSummary {
    /// Whether `owner` may act on this session for `instance_id`.
    pub fn is_owned_by(&self, owner: &Owner, instance_id: Option<&str>) -> bool {
        self.user_id == owner.user_id
            && self.organization_id == owner.organization_id
            && instance_id.map_or(true, |id| id == self.instance_id)
    }
}
