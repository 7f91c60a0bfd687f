//! Notary trust-data endpoints for a single GUN.
//!
//! Everything lives under `{server}/v2/{gun}/_trust/tuf/`: signed role
//! documents are `{role}.json`, server-managed public keys are `{role}.key`,
//! a `DELETE` on the base purges the collection and a multipart `POST`
//! uploads new documents.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;

use crate::http::{HttpClient, HttpError};
use crate::metadata::KeyRecord;
use crate::publish::MultipartBody;

#[async_trait]
pub trait NotaryApi: Send + Sync {
    /// Raw `{role}.json` document.
    async fn fetch_metadata(&self, role: &str) -> Result<Vec<u8>, HttpError>;

    /// Public key the server manages for `role`.
    async fn fetch_role_key(&self, role: &str) -> Result<KeyRecord, HttpError>;

    /// Removes all trust data of the collection.
    async fn delete_trust_data(&self) -> Result<(), HttpError>;

    async fn upload(&self, body: &MultipartBody) -> Result<(), HttpError>;
}

#[derive(Debug, Clone)]
pub struct NotaryClient {
    http: HttpClient,
    gun: String,
}

impl NotaryClient {
    pub fn new(http: HttpClient, gun: impl Into<String>) -> Self {
        Self {
            http,
            gun: gun.into(),
        }
    }

    fn trust_path(&self, file: &str) -> String {
        format!("/v2/{}/_trust/tuf/{}", self.gun, file)
    }
}

#[async_trait]
impl NotaryApi for NotaryClient {
    async fn fetch_metadata(&self, role: &str) -> Result<Vec<u8>, HttpError> {
        let path = self.trust_path(&format!("{role}.json"));
        self.http.get_bytes(&path, HeaderMap::new()).await
    }

    async fn fetch_role_key(&self, role: &str) -> Result<KeyRecord, HttpError> {
        let path = self.trust_path(&format!("{role}.key"));
        let bytes = self.http.get_bytes(&path, HeaderMap::new()).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete_trust_data(&self) -> Result<(), HttpError> {
        let path = self.trust_path("");
        self.http
            .send(Method::DELETE, &path, HeaderMap::new(), None)
            .await?;
        Ok(())
    }

    async fn upload(&self, body: &MultipartBody) -> Result<(), HttpError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(&body.content_type())?);
        let path = self.trust_path("");
        self.http
            .send(Method::POST, &path, headers, Some(body.encode()))
            .await?;
        Ok(())
    }
}
