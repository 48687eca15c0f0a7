//! RESTCONF client for OpenDaylight-style controllers

use crate::error::{ConsoleError, ConsoleResult};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Writes meters and flows on a controller. Every call is a single attempt.
#[async_trait]
pub trait ControllerApi: Send + Sync {
    /// Create or replace a meter; returns the controller's status code
    async fn put_meter(
        &self,
        controller: &str,
        switch_id: &str,
        meter_id: u32,
        body: &Value,
    ) -> ConsoleResult<u16>;

    /// Delete a meter. A meter the controller does not know is not an error.
    async fn delete_meter(&self, controller: &str, switch_id: &str, meter_id: u32)
        -> ConsoleResult<u16>;

    /// Create or replace a flow
    async fn put_flow(
        &self,
        controller: &str,
        switch_id: &str,
        table_id: u8,
        flow_id: &str,
        body: &Value,
    ) -> ConsoleResult<u16>;
}

/// Connection settings shared by every controller the console talks to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Scheme used when a controller is given as a bare host
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// RESTCONF port used when a controller is given as a bare host
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_port() -> u16 {
    8181
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "admin".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// HTTP client for the RESTCONF inventory API
pub struct OdlClient {
    client: Client,
    settings: ControllerSettings,
}

impl OdlClient {
    pub fn new(settings: ControllerSettings) -> ConsoleResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| ConsoleError::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, settings })
    }

    /// Base URL of a controller given as a bare host, `host:port` or a URL
    pub fn base_url(&self, controller: &str) -> ConsoleResult<Url> {
        let raw = if controller.contains("://") {
            controller.to_string()
        } else if controller.contains(':') && !controller.contains('[') && controller.matches(':').count() == 1 {
            format!("{}://{}", self.settings.scheme, controller)
        } else if controller.parse::<std::net::Ipv6Addr>().is_ok() {
            format!("{}://[{}]:{}", self.settings.scheme, controller, self.settings.port)
        } else {
            format!("{}://{}:{}", self.settings.scheme, controller, self.settings.port)
        };
        Url::parse(&raw)
            .map_err(|e| ConsoleError::validation(format!("invalid controller '{}': {}", controller, e)))
    }

    /// Controller URL with RESTCONF path segments appended; each segment is
    /// percent-encoded so key values cannot break out of their segment
    fn inventory_url(&self, controller: &str, switch_id: &str, tail: &[String]) -> ConsoleResult<Url> {
        let mut url = self.base_url(controller)?;
        url.path_segments_mut()
            .map_err(|_| ConsoleError::validation(format!("invalid controller '{}'", controller)))?
            .pop_if_empty()
            .extend(["rests", "data", "opendaylight-inventory:nodes"])
            .push(&format!("node={}", switch_id))
            .extend(tail);
        Ok(url)
    }

    pub fn meter_url(&self, controller: &str, switch_id: &str, meter_id: u32) -> ConsoleResult<Url> {
        self.inventory_url(
            controller,
            switch_id,
            &[format!("flow-node-inventory:meter={}", meter_id)],
        )
    }

    pub fn flow_url(
        &self,
        controller: &str,
        switch_id: &str,
        table_id: u8,
        flow_id: &str,
    ) -> ConsoleResult<Url> {
        self.inventory_url(
            controller,
            switch_id,
            &[
                format!("flow-node-inventory:table={}", table_id),
                format!("flow={}", flow_id),
            ],
        )
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> ConsoleResult<u16> {
        debug!(method = %method, url = %url, "Controller request");

        let mut request = self
            .client
            .request(method, url)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ConsoleError::Upstream {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ControllerApi for OdlClient {
    async fn put_meter(
        &self,
        controller: &str,
        switch_id: &str,
        meter_id: u32,
        body: &Value,
    ) -> ConsoleResult<u16> {
        let url = self.meter_url(controller, switch_id, meter_id)?;
        self.send(Method::PUT, url, Some(body)).await
    }

    async fn delete_meter(
        &self,
        controller: &str,
        switch_id: &str,
        meter_id: u32,
    ) -> ConsoleResult<u16> {
        let url = self.meter_url(controller, switch_id, meter_id)?;
        match self.send(Method::DELETE, url, None).await {
            Err(ConsoleError::Upstream { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(status)
            }
            other => other,
        }
    }

    async fn put_flow(
        &self,
        controller: &str,
        switch_id: &str,
        table_id: u8,
        flow_id: &str,
        body: &Value,
    ) -> ConsoleResult<u16> {
        let url = self.flow_url(controller, switch_id, table_id, flow_id)?;
        self.send(Method::PUT, url, Some(body)).await
    }
}
