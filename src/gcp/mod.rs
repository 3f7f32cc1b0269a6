//! Remote collaborators: the object store holding submission artifacts and
//! the long-running operations API that runs the compute.
//!
//! Both sit behind traits so the tracker can be driven against in-memory
//! fakes. Every request carries a bounded timeout.

pub mod pipelines;
pub mod storage;

pub use pipelines::PipelinesClient;
pub use storage::GcsStore;

use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use std::future::Future;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::model::OperationStatus;

/// Blob storage addressed by `gs://bucket/path` URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a blob. `Ok(None)` means the blob does not exist.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<()>;
}

/// Long-running cloud operations and the VMs behind them.
#[async_trait]
pub trait Operations: Send + Sync {
    async fn status(&self, operation: &str) -> Result<OperationStatus>;

    async fn cancel(&self, operation: &str) -> Result<()>;

    async fn delete_instance(&self, project: &str, zone: &str, instance: &str) -> Result<()>;
}

/// Split `gs://bucket/some/object` into `("bucket", "some/object")`.
pub fn split_gs_path(path: &str) -> Result<(&str, &str)> {
    path.strip_prefix("gs://")
        .and_then(|rest| rest.split_once('/'))
        .filter(|(bucket, object)| !bucket.is_empty() && !object.is_empty())
        .ok_or_else(|| Error::Other(format!("not a gs:// object path: {path}")))
}

/// Project named in an operation handle (`projects/{project}/operations/...`).
pub fn project_of(operation: &str) -> Option<&str> {
    let mut parts = operation.split('/');
    match (parts.next(), parts.next()) {
        (Some("projects"), Some(project)) if !project.is_empty() => Some(project),
        _ => None,
    }
}

/// Run `call` up to `config.retries` times, sleeping a fixed backoff after
/// each transient failure.
pub async fn with_retry<T, F, Fut>(config: &RemoteConfig, what: &str, call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    call.retry(
        ConstantBuilder::default()
            .with_delay(config.backoff())
            .with_max_times(config.retries.max(1) as usize - 1),
    )
    .when(Error::is_transient)
    .notify(|e, delay| {
        debug!(what, delay = ?delay, error = %e, "transient failure, retrying");
    })
    .await
}

/// Turn a non-success HTTP response into `Error::Remote`.
pub(crate) async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::Remote {
        status: status.as_u16(),
        message,
    })
}

pub(crate) fn http_client(config: &RemoteConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.timeout())
        .connect_timeout(config.timeout())
        .build()?)
}
