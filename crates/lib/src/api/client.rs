//! REST client for the OpenPhone API (https://api.openphone.com/v1 by default).

use crate::api::{ApiError, RateLimiter};
use crate::config::ApiConfig;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde_json::Value;
use std::time::Duration;

/// Authenticated JSON requests against the API. Implementations classify failures via `ApiError`.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// GET `path` (relative to the base URL). List parameters appear as repeated keys in `query`.
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, ApiError>;

    /// POST a JSON body to `path`.
    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError>;
}

/// `reqwest` implementation of `ApiClient` with client-side rate limiting.
pub struct OpenPhoneClient {
    base_url: String,
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl OpenPhoneClient {
    pub fn new(config: &ApiConfig, api_key: &str) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth =
            HeaderValue::from_str(api_key.trim()).context("API key is not a valid header value")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            limiter: RateLimiter::new(config.requests_per_second)
                .context("invalid api.requestsPerSecond")?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn read_response(&self, path: &str, res: reqwest::Response) -> Result<Value, ApiError> {
        let status = res.status();
        if !status.is_success() {
            let retry_after = res
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = res.text().await.unwrap_or_default();
            let message = if status.as_u16() == 401 || status.as_u16() == 403 {
                format!("authentication failed: {}", body)
            } else {
                body
            };
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
                retry_after,
            });
        }
        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = res.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        if !content_type.contains("application/json") {
            log::warn!(
                "unexpected content type '{}' from {} (HTTP {}); treating as empty",
                content_type,
                path,
                status
            );
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl ApiClient for OpenPhoneClient {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, ApiError> {
        self.limiter.acquire().await;
        log::debug!("GET {} ({} params)", path, query.len());
        let res = self.client.get(self.url(path)).query(query).send().await?;
        self.read_response(path, res).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.limiter.acquire().await;
        log::debug!("POST {}", path);
        let res = self.client.post(self.url(path)).json(body).send().await?;
        self.read_response(path, res).await
    }
}
