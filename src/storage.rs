//! Object storage for screenshot artifacts.

use crate::config::CredentialBundle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

/// Result of an upload, enough to derive a public URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub download_token: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<StoredObject>;

    async fn public_url(&self, object: &StoredObject) -> Result<String>;
}

/// Cloud storage bucket through the Firebase Storage REST API.
#[derive(Clone)]
pub struct FirebaseStorage {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    name: Option<String>,
    #[serde(rename = "downloadTokens")]
    download_tokens: Option<String>,
}

impl FirebaseStorage {
    pub fn new(base_url: impl Into<String>, bucket: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            bucket: bucket.into().trim().to_string(),
            token: token.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
        }
    }

    pub fn from_bundle(bundle: &CredentialBundle) -> Self {
        Self::new(
            bundle.storage_url.clone(),
            bundle.storage_bucket.clone(),
            bundle.storage_token.clone(),
        )
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/b/{}/o/{}",
            self.base_url,
            self.bucket,
            urlencoding::encode(key)
        )
    }
}

#[async_trait]
impl ObjectStore for FirebaseStorage {
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<StoredObject> {
        let url = format!("{}/b/{}/o", self.base_url, self.bucket);
        let mut req = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", key)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(token) = self.token.as_deref() {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.context("Object upload request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Object upload failed ({status}): {}", body.trim());
        }
        let uploaded = resp
            .json::<UploadResponse>()
            .await
            .context("Object upload response decode failed")?;
        Ok(StoredObject {
            key: uploaded.name.unwrap_or_else(|| key.to_string()),
            download_token: uploaded
                .download_tokens
                .and_then(|t| t.split(',').next().map(|t| t.trim().to_string()))
                .filter(|t| !t.is_empty()),
        })
    }

    async fn public_url(&self, object: &StoredObject) -> Result<String> {
        let mut url = format!("{}?alt=media", self.object_url(&object.key));
        if let Some(token) = object.download_token.as_deref() {
            url.push_str("&token=");
            url.push_str(&urlencoding::encode(token));
        }
        Ok(url)
    }
}

/// Keeps uploads in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    objects: Mutex<Vec<(String, String, Vec<u8>)>>,
    fail_uploads: Mutex<Option<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(key, content_type, bytes)` for every upload, in order.
    pub fn objects(&self) -> Vec<(String, String, Vec<u8>)> {
        self.objects.lock().clone()
    }

    pub fn fail_uploads(&self, message: Option<String>) {
        *self.fail_uploads.lock() = message;
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<StoredObject> {
        if let Some(message) = self.fail_uploads.lock().clone() {
            anyhow::bail!(message);
        }
        self.objects
            .lock()
            .push((key.to_string(), content_type.to_string(), bytes));
        Ok(StoredObject {
            key: key.to_string(),
            download_token: None,
        })
    }

    async fn public_url(&self, object: &StoredObject) -> Result<String> {
        Ok(format!("memory://{}", object.key))
    }
}
