//! Pipelines operations and Compute Engine instances.

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{debug, info};

use super::{Operations, check, http_client, with_retry};
use crate::config::RemoteConfig;
use crate::config::secrets::bearer;
use crate::error::Result;
use crate::model::OperationStatus;

const GENOMICS_BASE: &str = "https://genomics.googleapis.com/v2alpha1";
const COMPUTE_BASE: &str = "https://compute.googleapis.com/compute/v1";

pub struct PipelinesClient {
    http: reqwest::Client,
    token: SecretString,
    config: RemoteConfig,
}

impl PipelinesClient {
    pub fn new(token: SecretString, config: &RemoteConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(config)?,
            token,
            config: config.clone(),
        })
    }

    async fn fetch_status(&self, operation: &str) -> Result<OperationStatus> {
        let response = self
            .http
            .get(format!("{GENOMICS_BASE}/{operation}"))
            .header("Authorization", bearer(&self.token))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

#[async_trait]
impl Operations for PipelinesClient {
    /// Polled on every status check, so transient failures are retried.
    async fn status(&self, operation: &str) -> Result<OperationStatus> {
        debug!(operation, "fetching operation status");
        with_retry(&self.config, "operation status", || self.fetch_status(operation)).await
    }

    async fn cancel(&self, operation: &str) -> Result<()> {
        info!(operation, "cancelling operation");
        let response = self
            .http
            .post(format!("{GENOMICS_BASE}/{operation}:cancel"))
            .header("Authorization", bearer(&self.token))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_instance(&self, project: &str, zone: &str, instance: &str) -> Result<()> {
        info!(project, zone, instance, "deleting instance");
        let response = self
            .http
            .delete(format!(
                "{COMPUTE_BASE}/projects/{project}/zones/{zone}/instances/{instance}"
            ))
            .header("Authorization", bearer(&self.token))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
