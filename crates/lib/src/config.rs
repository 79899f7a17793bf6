//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.opsync/config.json`) and environment.
//! Environment variables win over the file so a `.env` next to the binary is enough to run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fetch::RetryPolicy;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Third-party API connection settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Retry policy for transient API failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Webhook receiver and registration settings.
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// API base URL, key, and client-side throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL of the REST API (default "https://api.openphone.com/v1").
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// API key. Overridden by OPENPHONE_API_KEY env.
    pub api_key: Option<String>,

    /// Upper bound on outgoing requests per second. The API allows 10; 0 disables throttling.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Retries after the first attempt before a transient failure is recorded.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on any single backoff delay (also caps Retry-After).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Webhook receiver (serve) and registration (setup-webhook) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_host")]
    pub host: String,

    #[serde(default = "default_webhook_port")]
    pub port: u16,

    /// Path the receiver listens on and the registration appends to the base URL.
    #[serde(default = "default_webhook_path")]
    pub path: String,

    /// Base64-encoded signing secret. Overridden by OPENPHONE_WEBHOOK_SIGNING_SECRET env.
    pub signing_secret: Option<String>,

    /// Public base URL of the receiver. Overridden by OPENPHONE_WEBHOOK_BASE_URL env.
    pub base_url: Option<String>,

    /// Maximum clock skew accepted on signature timestamps; 0 disables the check.
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// How long a request waits for queue space before answering 503.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
}

pub const DEFAULT_API_BASE_URL: &str = "https://api.openphone.com/v1";
pub const NEW_MESSAGE_WEBHOOK_PATH: &str = "/op_new_message";

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_requests_per_second() -> f64 {
    9.0
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_webhook_host() -> String {
    "0.0.0.0".to_string()
}

fn default_webhook_port() -> u16 {
    8080
}

fn default_webhook_path() -> String {
    NEW_MESSAGE_WEBHOOK_PATH.to_string()
}

fn default_signature_tolerance_secs() -> u64 {
    300
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_worker_count() -> usize {
    2
}

fn default_enqueue_timeout_ms() -> u64 {
    1_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            api_key: None,
            requests_per_second: default_requests_per_second(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: default_webhook_host(),
            port: default_webhook_port(),
            path: default_webhook_path(),
            signing_secret: None,
            base_url: None,
            signature_tolerance_secs: default_signature_tolerance_secs(),
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Non-empty, trimmed value of an env var.
fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn nonempty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the API key: env OPENPHONE_API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    env_nonempty("OPENPHONE_API_KEY").or_else(|| nonempty(config.api.api_key.as_ref()))
}

/// Resolve the API key or fail with an operator-facing message.
pub fn require_api_key(config: &Config) -> Result<String> {
    resolve_api_key(config).ok_or_else(|| {
        anyhow::anyhow!(
            "OPENPHONE_API_KEY is not set (add it to your environment or .env file, or set api.apiKey)"
        )
    })
}

/// Resolve the base64 webhook signing secret: env OPENPHONE_WEBHOOK_SIGNING_SECRET overrides config.
pub fn resolve_webhook_secret(config: &Config) -> Option<String> {
    env_nonempty("OPENPHONE_WEBHOOK_SIGNING_SECRET")
        .or_else(|| nonempty(config.webhook.signing_secret.as_ref()))
}

/// Resolve the public webhook base URL: env OPENPHONE_WEBHOOK_BASE_URL overrides config.
pub fn resolve_webhook_base_url(config: &Config) -> Option<String> {
    env_nonempty("OPENPHONE_WEBHOOK_BASE_URL").or_else(|| nonempty(config.webhook.base_url.as_ref()))
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_nonempty(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", name, raw, e)),
    }
}

/// Seconds (fractional) to whole milliseconds. NaN, infinities and negatives are rejected.
fn enqueue_timeout_ms(secs: f64) -> Result<u64> {
    if !secs.is_finite() || secs < 0.0 {
        anyhow::bail!("must be a finite number of seconds >= 0, got {}", secs);
    }
    Ok((secs * 1000.0) as u64)
}

/// Apply numeric and address overrides from the environment. Malformed values are errors.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(url) = env_nonempty("OPENPHONE_API_BASE_URL") {
        config.api.base_url = url;
    }
    if let Some(host) = env_nonempty("OPENPHONE_WEBHOOK_HOST") {
        config.webhook.host = host;
    }
    if let Some(port) = parse_env::<u16>("OPENPHONE_WEBHOOK_PORT")? {
        config.webhook.port = port;
    }
    if let Some(secs) = parse_env::<u64>("OPENPHONE_WEBHOOK_SIGNATURE_TOLERANCE_SECONDS")? {
        config.webhook.signature_tolerance_secs = secs;
    }
    if let Some(n) = parse_env::<usize>("OPENPHONE_WEBHOOK_QUEUE_MAXSIZE")? {
        config.webhook.queue_capacity = n;
    }
    if let Some(n) = parse_env::<usize>("OPENPHONE_WEBHOOK_WORKER_COUNT")? {
        config.webhook.worker_count = n;
    }
    if let Some(secs) = parse_env::<f64>("OPENPHONE_WEBHOOK_ENQUEUE_TIMEOUT_SECONDS")? {
        config.webhook.enqueue_timeout_ms = enqueue_timeout_ms(secs)
            .context("OPENPHONE_WEBHOOK_ENQUEUE_TIMEOUT_SECONDS")?;
    }
    Ok(())
}

/// Check the receiver settings that have no sane fallback.
pub fn validate_webhook(config: &WebhookConfig) -> Result<()> {
    if config.queue_capacity == 0 {
        anyhow::bail!("webhook.queueCapacity must be > 0");
    }
    if config.worker_count == 0 {
        anyhow::bail!("webhook.workerCount must be > 0");
    }
    if !config.path.starts_with('/') {
        anyhow::bail!("webhook.path must start with '/' (got {:?})", config.path);
    }
    Ok(())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("OPSYNC_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".opsync").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Environment overrides are applied on top. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_env_overrides(&mut config)?;
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_api_limits() {
        let c = Config::default();
        assert_eq!(c.api.base_url, "https://api.openphone.com/v1");
        assert_eq!(c.api.requests_per_second, 9.0);
        assert_eq!(c.retry.max_retries, 3);
        assert_eq!(c.webhook.port, 8080);
        assert_eq!(c.webhook.path, "/op_new_message");
        assert_eq!(c.webhook.signature_tolerance_secs, 300);
    }

    #[test]
    fn partial_file_keeps_field_defaults() {
        let c: Config =
            serde_json::from_str(r#"{"retry":{"maxRetries":5},"webhook":{"port":9000}}"#).unwrap();
        assert_eq!(c.retry.max_retries, 5);
        assert_eq!(c.retry.base_delay_ms, 2_000);
        assert_eq!(c.webhook.port, 9000);
        assert_eq!(c.webhook.host, "0.0.0.0");
    }

    #[test]
    fn retry_config_converts_to_policy() {
        let c = RetryConfig {
            max_retries: 4,
            base_delay_ms: 10,
            max_delay_ms: 50,
        };
        let p = c.policy();
        assert_eq!(p.max_retries, 4);
        assert_eq!(p.base_delay, Duration::from_millis(10));
        assert_eq!(p.max_delay, Duration::from_millis(50));
    }

    #[test]
    fn validate_webhook_rejects_zero_workers() {
        let mut w = WebhookConfig::default();
        assert!(validate_webhook(&w).is_ok());
        w.worker_count = 0;
        assert!(validate_webhook(&w).is_err());
    }

    #[test]
    fn validate_webhook_rejects_relative_path() {
        let mut w = WebhookConfig::default();
        w.path = "op_new_message".to_string();
        assert!(validate_webhook(&w).is_err());
        w.path = "/hooks/inbound".to_string();
        assert!(validate_webhook(&w).is_ok());
    }

    #[test]
    fn enqueue_timeout_rejects_non_finite_seconds() {
        assert_eq!(enqueue_timeout_ms(1.5).unwrap(), 1_500);
        assert_eq!(enqueue_timeout_ms(0.0).unwrap(), 0);
        for bad in [f64::NAN, f64::INFINITY, -1.0] {
            assert!(enqueue_timeout_ms(bad).is_err(), "{}", bad);
        }
        // "NaN" parses as an f64, so the check has to happen after parsing
        assert!("NaN".parse::<f64>().is_ok_and(f64::is_nan));
    }

    #[test]
    fn blank_config_secret_is_unset() {
        let mut c = Config::default();
        c.webhook.signing_secret = Some("   ".to_string());
        assert_eq!(nonempty(c.webhook.signing_secret.as_ref()), None);
    }
}
