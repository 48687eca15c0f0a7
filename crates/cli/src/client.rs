//! API client for communicating with the Flowmeter console

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the console
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.base_url.join(path).context("Invalid path")?;
        Ok(self.client.request(method, url))
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .request(Method::GET, path)?
            .send()
            .await
            .context("Failed to send request")?;
        parse(response).await
    }

    /// Make a GET request with query parameters
    pub async fn get_query<T: DeserializeOwned, Q: Serialize>(&self, path: &str, query: &Q) -> Result<T> {
        let response = self
            .request(Method::GET, path)?
            .query(query)
            .send()
            .await
            .context("Failed to send request")?;
        parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .request(Method::POST, path)?
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;
        parse(response).await
    }

    /// Make a PUT request with JSON body
    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .request(Method::PUT, path)?
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;
        parse(response).await
    }

    /// Make a DELETE request
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .request(Method::DELETE, path)?
            .send()
            .await
            .context("Failed to send request")?;
        parse(response).await
    }

    /// POST whose error bodies carry the same shape as success bodies
    pub async fn post_report<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .request(Method::POST, path)?
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;
        let status = response.status();
        let text = response.text().await.context("Failed to read response")?;
        serde_json::from_str(&text)
            .with_context(|| format!("API error ({}): {}", status, text))
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => anyhow::bail!("API error ({}, {}): {}", status, err.code, err.error),
            Err(_) => anyhow::bail!("API error ({}): {}", status, body),
        }
    }

    response.json().await.context("Failed to parse response")
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub backend: String,
    pub input_shape: Vec<usize>,
    pub categories: Vec<String>,
    pub confidence_threshold: f32,
    pub is_active: bool,
    pub is_loaded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub model_name: String,
    pub cookie: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterPolicy {
    pub id: u64,
    pub controller: String,
    pub switch_id: String,
    pub meter_id: u32,
    pub rate_kbps: u64,
    #[serde(default)]
    pub burst_size: Option<u64>,
    pub categories: Vec<String>,
    #[serde(default)]
    pub client: Option<String>,
    pub activation_period: String,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterDraft {
    pub controller: String,
    pub switch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_id: Option<u32>,
    pub rate_kbps: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<u64>,
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub activation_period: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationStats {
    pub model_name: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total: u64,
    pub high_confidence: u64,
    pub low_confidence: u64,
    pub uncertain: u64,
    pub multiple_candidates: u64,
    pub dns_fallbacks: u64,
    pub asn_fallbacks: u64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub status: String,
    pub stats: Vec<ClassificationStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRequest {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub success: bool,
    pub count: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResult {
    pub direction: String,
    pub status: String,
    pub flow_id: String,
    #[serde(default)]
    pub response_code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub status: String,
    pub classification: String,
    pub confidence: String,
    #[serde(default)]
    pub cookie: Option<u64>,
    pub applied_meter_id: Option<u32>,
    pub flow_results: Vec<FlowResult>,
}
