//! Image manifest lookups against a Docker registry.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

use crate::http::{HttpClient, HttpError};

pub const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Source of raw image manifests, keyed by tag.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Returns the manifest bytes exactly as served; digests are computed over them.
    async fn fetch_manifest(&self, tag: &str) -> Result<Vec<u8>, HttpError>;
}

/// [`ManifestSource`] backed by the registry HTTP API.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: HttpClient,
    repository: String,
}

impl RegistryClient {
    pub fn new(http: HttpClient, repository: impl Into<String>) -> Self {
        Self {
            http,
            repository: repository.into(),
        }
    }
}

#[async_trait]
impl ManifestSource for RegistryClient {
    async fn fetch_manifest(&self, tag: &str) -> Result<Vec<u8>, HttpError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MANIFEST_V2_MEDIA_TYPE));
        let path = format!("/v2/{}/manifests/{}", self.repository, tag);
        self.http.get_bytes(&path, headers).await
    }
}
