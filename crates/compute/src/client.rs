use std::time::Duration;

use async_trait::async_trait;
use provision_core::{
    ComputeProvider, CreateInstanceSpec, CreatedInstance, InstanceInfo, InstanceRef, ProviderError,
};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, error, info, warn};

use crate::error::{ComputeError, ComputeResult};
use crate::types::{ApiErrorResponse, Instance, InstanceResource, Operation};

pub const DEFAULT_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

const DEFAULT_MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 10_000;

/// Client for the Compute Engine instances API.
#[derive(Clone)]
pub struct ComputeClient {
    client: Client,
    token: String,
    base_url: String,
    max_retries: u32,
}

impl ComputeClient {
    pub fn new(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Read the bearer token from the environment variable `token_env`.
    pub fn from_env(token_env: &str, base_url: impl Into<String>) -> ComputeResult<Self> {
        let token = std::env::var(token_env)
            .map_err(|_| ComputeError::InvalidConfig(format!("{token_env} not set")))?;
        Ok(Self::new(token, base_url))
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    fn instances_url(&self, project: &str, zone: &str) -> String {
        format!("{}/projects/{}/zones/{}/instances", self.base_url, project, zone)
    }

    /// Insert a new instance. Not retried: a repeated insert would conflict
    /// with the first one.
    pub async fn insert_instance(&self, spec: &CreateInstanceSpec) -> ComputeResult<Operation> {
        info!("Creating instance {} in {}/{}", spec.name, spec.project, spec.zone);

        let response = self
            .client
            .post(self.instances_url(&spec.project, &spec.zone))
            .bearer_auth(&self.token)
            .json(&InstanceResource::from_spec(spec))
            .send()
            .await?;

        let response = check_status(response, &spec.name).await?;
        Ok(response.json().await?)
    }

    pub async fn fetch_instance(&self, instance: &InstanceRef) -> ComputeResult<Instance> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.fetch_instance_once(instance).await {
                Err(e) if e.is_retryable() && retries < self.max_retries => {
                    warn!(
                        "Fetching {} failed ({}), retrying in {}ms (attempt {}/{})",
                        instance,
                        e,
                        backoff_ms,
                        retries + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    retries += 1;
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                }
                other => return other,
            }
        }
    }

    async fn fetch_instance_once(&self, instance: &InstanceRef) -> ComputeResult<Instance> {
        let url = format!(
            "{}/{}",
            self.instances_url(&instance.project, &instance.zone),
            instance.instance_id
        );
        debug!("Fetching instance {}", instance);

        let response = self.client.get(url).bearer_auth(&self.token).send().await?;
        let response = check_status(response, &instance.instance_id).await?;
        Ok(response.json().await?)
    }
}

async fn check_status(response: Response, resource: &str) -> ComputeResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
        .map(|r| r.error.message)
        .unwrap_or(error_text);

    match status {
        StatusCode::NOT_FOUND => Err(ComputeError::NotFound(resource.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ComputeError::Authentication(message))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            warn!("Rate limited by compute API");
            Err(ComputeError::RateLimited)
        }
        _ => {
            error!("Compute API error ({}): {}", status, message);
            Err(ComputeError::Api {
                message,
                status_code: Some(status.as_u16()),
            })
        }
    }
}

#[async_trait]
impl ComputeProvider for ComputeClient {
    async fn create_instance(
        &self,
        spec: &CreateInstanceSpec,
    ) -> Result<CreatedInstance, ProviderError> {
        let operation = self.insert_instance(spec).await?;
        let id = operation.target_id.ok_or_else(|| {
            ComputeError::UnexpectedResponse(format!(
                "insert operation for {} carries no target id",
                spec.name
            ))
        })?;
        debug!(
            "Insert of {} accepted (operation {:?}, status {:?})",
            spec.name, operation.name, operation.status
        );
        Ok(CreatedInstance { id })
    }

    async fn get_instance(&self, instance: &InstanceRef) -> Result<InstanceInfo, ProviderError> {
        Ok(self.fetch_instance(instance).await?.into())
    }
}
