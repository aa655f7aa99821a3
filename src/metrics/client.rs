//! Visitor metrics client used by the reporting phase.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::MetricsConfig;

/// Connection timeout for HTTP requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of retries for transient failures.
const MAX_RETRIES: u32 = 3;

/// Header carrying the API key.
const API_KEY_HEADER: &str = "X-API-KEY";

/// Determine if a request should be retried based on status code and attempt count.
fn should_retry(status_code: u16, attempt: u32) -> bool {
    if attempt >= MAX_RETRIES {
        return false;
    }
    (500..600).contains(&status_code)
}

/// Calculate exponential backoff duration for retry attempts.
fn calculate_backoff(attempt: u32) -> Duration {
    // 1s, 2s, 4s
    Duration::from_secs(1 << attempt)
}

/// Daily metrics for one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorMetrics {
    pub unique_visitors: u64,
    pub date: String,
}

/// Errors from metrics requests.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metrics API not configured: {0}")]
    NotConfigured(String),
    #[error("Metrics request failed: {0}")]
    RequestFailed(String),
    #[error("Metrics request timed out")]
    Timeout,
    #[error("Invalid metrics response: {0}")]
    InvalidResponse(String),
}

/// Source of visitor metrics.
#[async_trait]
pub trait MetricsClient: Send + Sync {
    /// Fetch the metrics for `date`.
    async fn fetch_metrics(&self, date: NaiveDate) -> Result<VisitorMetrics, MetricsError>;
}

#[derive(Debug, Deserialize)]
struct MetricsEnvelope {
    status: String,
    #[serde(default)]
    data: Option<MetricsData>,
}

#[derive(Debug, Deserialize)]
struct MetricsData {
    #[serde(default)]
    unique_visitors: Option<u64>,
    #[serde(default)]
    date: Option<String>,
}

/// Parse a metrics response body.
///
/// Anything other than `status == "success"` with a `unique_visitors`
/// count is rejected.
///
/// # Errors
///
/// Returns `MetricsError::InvalidResponse` for malformed or unsuccessful
/// bodies.
pub fn parse_metrics_response(
    body: &serde_json::Value,
    date: NaiveDate,
) -> Result<VisitorMetrics, MetricsError> {
    let envelope: MetricsEnvelope = serde_json::from_value(body.clone())
        .map_err(|e| MetricsError::InvalidResponse(e.to_string()))?;

    if envelope.status != "success" {
        return Err(MetricsError::InvalidResponse(format!(
            "status was {:?}",
            envelope.status
        )));
    }

    let data = envelope
        .data
        .ok_or_else(|| MetricsError::InvalidResponse("missing data".to_string()))?;
    let unique_visitors = data
        .unique_visitors
        .ok_or_else(|| MetricsError::InvalidResponse("missing unique_visitors".to_string()))?;

    Ok(VisitorMetrics {
        unique_visitors,
        date: data.date.unwrap_or_else(|| date.to_string()),
    })
}

/// Metrics client for the analytics REST API.
#[derive(Debug, Clone)]
pub struct HttpMetricsClient {
    client: Client,
    endpoint: Url,
    store_id: String,
    api_key: Option<String>,
}

impl HttpMetricsClient {
    /// Create a client for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::NotConfigured` if the HTTP client cannot be
    /// built.
    pub fn new(
        endpoint: Url,
        store_id: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, MetricsError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| MetricsError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            store_id: store_id.into(),
            api_key,
        })
    }

    /// Create a client from configuration, reading the API key from the
    /// configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::NotConfigured` if no base URL is set or the
    /// URL is invalid.
    pub fn from_config(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let base = config
            .base_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| MetricsError::NotConfigured("API endpoint not configured".to_string()))?;

        let endpoint = config.endpoint(base).map_err(|e| {
            MetricsError::NotConfigured(format!("invalid endpoint {base:?}: {e}"))
        })?;

        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "Metrics API key not set");
        }

        Self::new(
            endpoint,
            config.store_id.clone(),
            api_key,
            Duration::from_millis(config.timeout_ms),
        )
    }

    /// Full request URL for `date`.
    #[must_use]
    pub fn request_url(&self, date: NaiveDate) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("store_id", &self.store_id)
            .append_pair("date", &date.format("%Y-%m-%d").to_string());
        url
    }
}

#[async_trait]
impl MetricsClient for HttpMetricsClient {
    async fn fetch_metrics(&self, date: NaiveDate) -> Result<VisitorMetrics, MetricsError> {
        let url = self.request_url(date);
        tracing::debug!(%url, "Fetching visitor metrics");

        let mut attempt = 0;
        loop {
            let mut request = self
                .client
                .get(url.clone())
                .header("Accept", "application/json");
            if let Some(key) = &self.api_key {
                request = request.header(API_KEY_HEADER, key);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    MetricsError::Timeout
                } else {
                    MetricsError::RequestFailed(e.to_string())
                }
            })?;

            let status = response.status();
            if status.is_success() {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| MetricsError::InvalidResponse(e.to_string()))?;
                let metrics = parse_metrics_response(&body, date)?;
                tracing::info!(
                    unique_visitors = metrics.unique_visitors,
                    date = %metrics.date,
                    "Visitor metrics received"
                );
                return Ok(metrics);
            }

            let status_code = status.as_u16();
            if should_retry(status_code, attempt) {
                let backoff = calculate_backoff(attempt);
                tracing::debug!(status_code, ?backoff, "Retrying metrics request");
                tokio::time::sleep(backoff).await;
                attempt += 1;
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            return Err(MetricsError::RequestFailed(format!("HTTP {status}: {text}")));
        }
    }
}

/// Today's date in the local time zone.
#[must_use]
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
