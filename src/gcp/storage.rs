//! Google Cloud Storage over the JSON API.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use secrecy::SecretString;
use tracing::debug;

use super::{ObjectStore, check, http_client, split_gs_path};
use crate::config::RemoteConfig;
use crate::config::secrets::bearer;
use crate::error::{Error, Result};

const API_BASE: &str = "https://storage.googleapis.com";

pub struct GcsStore {
    http: reqwest::Client,
    token: SecretString,
}

impl GcsStore {
    pub fn new(token: SecretString, config: &RemoteConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(config)?,
            token,
        })
    }

    fn object_url(bucket: &str, object: &str) -> Result<Url> {
        let mut url = Url::parse(API_BASE).map_err(|e| Error::Other(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| Error::Other("storage base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", bucket, "o", object]);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let (bucket, object) = split_gs_path(path)?;
        debug!(bucket, object, "fetching blob");

        let response = self
            .http
            .get(Self::object_url(bucket, object)?)
            .header("Authorization", bearer(&self.token))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = check(response).await?.bytes().await?;
        Ok(Some(bytes.to_vec()))
    }

    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        let (bucket, object) = split_gs_path(path)?;
        debug!(bucket, object, size = data.len(), "uploading blob");

        let url = format!("{API_BASE}/upload/storage/v1/b/{bucket}/o");
        let response = self
            .http
            .post(url)
            .query(&[("uploadType", "media"), ("name", object)])
            .header("Authorization", bearer(&self.token))
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
