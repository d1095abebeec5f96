use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstanceRow {
    pub id: String,
    pub provider_id: Option<String>,
    pub public_address: Option<String>,
    pub updated_at: i64,
}

/// What the registry knows about one provisioned instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub id: String,
    pub provider_id: Option<String>,
    pub public_address: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRow {
    pub fn into_record(self) -> InstanceRecord {
        InstanceRecord {
            id: self.id,
            provider_id: self.provider_id,
            public_address: self.public_address,
            updated_at: Utc
                .timestamp_opt(self.updated_at, 0)
                .single()
                .unwrap_or_default(),
        }
    }
}
