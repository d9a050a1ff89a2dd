//! Generation API client.
//!
//! Wraps the vendor draw endpoint: one POST per task carrying the prompt,
//! model, input image URLs, and aspect ratio, returning the URLs of the
//! generated images. The endpoint streams progress as SSE when asked; we
//! always request the final payload only (`shutProgress`), but the body
//! may still arrive with a `data: ` prefix that must be stripped before
//! parsing.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// Default API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.grsai.com";

/// Path of the generation endpoint.
const DRAW_PATH: &str = "/v1/draw/nano-banana";

/// Timeout for a generation call.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for downloading one generated image.
const ARTIFACT_TIMEOUT: Duration = Duration::from_secs(120);

/// Parameters for one generation call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    /// Remote references of the input images, in combination order.
    pub input_refs: Vec<String>,
    pub aspect_ratio: String,
}

/// A successful generation response.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// URLs of the generated images; never empty on success.
    pub image_urls: Vec<String>,
}

/// Errors from the generation path.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The credential was rejected (HTTP 401).
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// The account hit its rate limit (HTTP 429).
    #[error("Rate limited by the generation service")]
    RateLimited,

    /// Any other non-2xx status code.
    #[error("Generation API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The server reported a failed generation in a 2xx response.
    #[error("Generation reported failure: {0}")]
    Failed(String),

    /// A 2xx response that contained zero output images. Distinct from a
    /// transport failure but subject to the same retry policy.
    #[error("Generation returned no images")]
    EmptyResult,
}

/// Runs image generation against the external service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Submit one generation call and return the output image URLs.
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: &str,
    ) -> Result<GenerationResult, GenerationError>;

    /// Download one generated image as raw bytes.
    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, GenerationError>;
}

/// Reqwest-backed [`GenerationService`] for the vendor draw API.
pub struct DrawApi {
    client: reqwest::Client,
    api_base: String,
}

impl Default for DrawApi {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl DrawApi {
    /// Create a client for the given API base URL.
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl GenerationService for DrawApi {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: &str,
    ) -> Result<GenerationResult, GenerationError> {
        let mut payload = serde_json::json!({
            "model": request.model,
            "prompt": request.prompt,
            "urls": request.input_refs,
            "shutProgress": true,
            "cdn": "zh",
        });
        if !request.aspect_ratio.is_empty() {
            payload["aspectRatio"] = serde_json::Value::String(request.aspect_ratio.clone());
        }

        let response = self
            .client
            .post(format!("{}{DRAW_PATH}", self.api_base))
            .bearer_auth(credential)
            .json(&payload)
            .timeout(GENERATE_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 => GenerationError::Auth("API credential invalid or expired".to_string()),
                429 => GenerationError::RateLimited,
                code => GenerationError::Api { status: code, body },
            });
        }

        let image_urls = parse_image_urls(&body)?;
        if image_urls.is_empty() {
            return Err(GenerationError::EmptyResult);
        }
        Ok(GenerationResult { image_urls })
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, GenerationError> {
        let response = self
            .client
            .get(url)
            .timeout(ARTIFACT_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Extract output image URLs from a 2xx response body.
///
/// Accepts both response shapes the endpoint produces: a `results` list of
/// `{url}` objects, or a single top-level `url` field.
fn parse_image_urls(body: &str) -> Result<Vec<String>, GenerationError> {
    let json = body.strip_prefix("data: ").unwrap_or(body);
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| GenerationError::Failed(format!("unparseable response body: {e}")))?;

    if let Some(status) = value.get("status").and_then(|s| s.as_str()) {
        if status != "succeeded" {
            let id = value.get("id").and_then(|i| i.as_str()).unwrap_or("<unknown>");
            return Err(GenerationError::Failed(format!(
                "generation {id} finished with status '{status}'"
            )));
        }
    }

    let mut urls = Vec::new();
    if let Some(results) = value.get("results").and_then(|r| r.as_array()) {
        for item in results {
            if let Some(url) = item.get("url").and_then(|u| u.as_str()) {
                urls.push(url.to_string());
            }
        }
    }
    if urls.is_empty() {
        if let Some(url) = value.get("url").and_then(|u| u.as_str()) {
            urls.push(url.to_string());
        }
    }
    Ok(urls)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
