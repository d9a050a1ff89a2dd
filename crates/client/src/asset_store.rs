//! CDN upload client.
//!
//! Uploading is a two-step protocol: request a single-use upload grant
//! (token, object key, CDN domain, upload URL) from the API, then POST the
//! file as a multipart form to the granted URL. The public reference for
//! the uploaded asset is `https://{domain}/{key}`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

/// Endpoint that issues upload grants.
pub const DEFAULT_TOKEN_ENDPOINT: &str =
    "https://grsai.dakka.com.cn/client/resource/newUploadTokenZH";

/// Timeout for the grant request.
const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the multipart upload itself.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors from the upload path.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Asset store error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The upload grant response was missing required fields.
    #[error("Upload grant incomplete: {0}")]
    Grant(String),

    /// Reading the local file failed.
    #[error("Failed to read asset: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns a local asset into a remote reference.
///
/// Must be safely callable concurrently for different assets under the
/// same or different credentials.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Upload one file and return its public URL.
    async fn upload(&self, path: &Path, credential: &str) -> Result<String, UploadError>;
}

/// Reqwest-backed [`AssetStore`] speaking the vendor CDN protocol.
pub struct CdnAssetStore {
    client: reqwest::Client,
    token_endpoint: String,
}

/// Envelope of the grant response.
#[derive(Debug, Deserialize)]
struct GrantResponse {
    data: Option<UploadGrant>,
}

/// Fields of a single-use upload grant.
#[derive(Debug, Deserialize)]
struct UploadGrant {
    token: Option<String>,
    key: Option<String>,
    domain: Option<String>,
    url: Option<String>,
}

impl Default for CdnAssetStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_ENDPOINT)
    }
}

impl CdnAssetStore {
    /// Create a store requesting grants from the given endpoint.
    pub fn new(token_endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_endpoint: token_endpoint.into(),
        }
    }

    /// Request an upload grant for a file with the given extension.
    async fn request_grant(
        &self,
        extension: &str,
        credential: &str,
    ) -> Result<(String, String, String, String), UploadError> {
        let response = self
            .client
            .post(&self.token_endpoint)
            .bearer_auth(credential)
            .json(&serde_json::json!({ "sux": extension }))
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await?;

        let response = ensure_success(response).await?;
        let grant: GrantResponse = response.json().await?;

        let data = grant
            .data
            .ok_or_else(|| UploadError::Grant("response carried no grant data".to_string()))?;
        match (data.token, data.key, data.domain, data.url) {
            (Some(token), Some(key), Some(domain), Some(url)) => Ok((token, key, domain, url)),
            _ => Err(UploadError::Grant(
                "grant is missing token, key, domain, or upload URL".to_string(),
            )),
        }
    }
}

#[async_trait]
impl AssetStore for CdnAssetStore {
    async fn upload(&self, path: &Path, credential: &str) -> Result<String, UploadError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_ascii_lowercase();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let (token, key, domain, upload_url) = self.request_grant(&extension, credential).await?;

        let bytes = tokio::fs::read(path).await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.clone())
            .mime_str(content_type_for(&extension))?;
        let form = reqwest::multipart::Form::new()
            .text("token", token)
            .text("key", key.clone())
            .part("file", part);

        let response = self
            .client
            .post(&upload_url)
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?;
        ensure_success(response).await?;

        let reference = public_url(&domain, &key);
        tracing::debug!(file = %filename, url = %reference, "Asset uploaded");
        Ok(reference)
    }
}

/// Ensure the response has a success status code, or capture status and
/// body text into an [`UploadError::Api`].
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, UploadError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(UploadError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Compose the public URL for an uploaded object.
///
/// Prefixes `https://` when the domain carries no scheme and trims any
/// trailing slash before appending the key.
fn public_url(domain: &str, key: &str) -> String {
    let domain = if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    };
    format!("{}/{key}", domain.trim_end_matches('/'))
}

/// Content type for a file extension, defaulting to a binary stream.
fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
