//! Classification request handling
//!
//! One request runs validate → classify → select meter → install flows.
//! Malformed requests are rejected before the model or the controller is
//! touched.

use crate::classifier::{category_cookie, ModelManager};
use crate::controller::{Endpoint, FlowCompiler, FlowSpec, TransportProtocol};
use crate::error::{ConsoleError, ConsoleResult};
use crate::meter::{MeterService, SelectionKey};
use crate::models::{ClassificationRequest, ClassificationResponse, FlowStatus, PipelineStatus};
use crate::observability::StructuredLogger;
use chrono::{Local, NaiveDateTime};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

pub struct Pipeline {
    manager: Arc<ModelManager>,
    meters: Arc<MeterService>,
    compiler: FlowCompiler,
    logger: StructuredLogger,
}

/// Request fields after validation, oriented around the managed client
#[derive(Debug)]
struct FlowRequest {
    controller: String,
    switch_id: String,
    protocol: TransportProtocol,
    client: Endpoint,
    server: Endpoint,
    server_side_port: u32,
    client_side_port: u32,
}

impl Pipeline {
    pub fn new(
        manager: Arc<ModelManager>,
        meters: Arc<MeterService>,
        compiler: FlowCompiler,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            manager,
            meters,
            compiler,
            logger,
        }
    }

    pub async fn handle(&self, request: &ClassificationRequest) -> ConsoleResult<ClassificationResponse> {
        self.handle_at(request, Local::now().naive_local()).await
    }

    /// Handle a request as if it arrived at local time `at`
    pub async fn handle_at(
        &self,
        request: &ClassificationRequest,
        at: NaiveDateTime,
    ) -> ConsoleResult<ClassificationResponse> {
        let flow = parse_request(request)?;

        let outcome = self
            .manager
            .classify(&request.payload, Some(flow.server.ip))
            .await?;

        let mut client_ids = vec![flow.client.ip.to_string()];
        if let Some(mac) = &flow.client.mac {
            client_ids.push(mac.clone());
        }
        let key = SelectionKey {
            controller: &flow.controller,
            switch_id: &flow.switch_id,
            category: &outcome.category,
            client_ids: &client_ids,
        };
        let policy = self.meters.select(&key, at).await;

        self.logger.log_meter_applied(
            &flow.controller,
            &flow.switch_id,
            &outcome.category,
            &client_ids[0],
            policy.as_ref().map(|p| p.meter_id),
        );

        let Some(policy) = policy else {
            debug!(category = %outcome.category, "No active meter policy, flow left unmetered");
            return Ok(ClassificationResponse {
                status: PipelineStatus::Unmetered,
                classification: outcome.category,
                confidence: outcome.confidence,
                cookie: outcome.cookie,
                applied_meter_id: None,
                flow_results: Vec::new(),
            });
        };

        let cookie = outcome
            .cookie
            .unwrap_or_else(|| category_cookie(&outcome.model_name, &outcome.category));
        let spec = FlowSpec {
            controller: flow.controller,
            switch_id: flow.switch_id,
            category: outcome.category.clone(),
            cookie,
            meter_id: policy.meter_id,
            protocol: flow.protocol,
            client: flow.client,
            server: flow.server,
            server_side_port: flow.server_side_port,
            client_side_port: flow.client_side_port,
        };
        let flow_results = self.compiler.install(&spec).await;

        let status = match (
            flow_results.first().map(|r| r.status),
            flow_results.get(1).map(|r| r.status),
        ) {
            (Some(FlowStatus::Success), Some(FlowStatus::Success)) => PipelineStatus::Success,
            (Some(FlowStatus::Success), _) => PipelineStatus::Partial,
            _ => PipelineStatus::Failed,
        };

        Ok(ClassificationResponse {
            status,
            classification: outcome.category,
            confidence: outcome.confidence,
            cookie: Some(cookie),
            applied_meter_id: Some(policy.meter_id),
            flow_results,
        })
    }
}

fn parse_request(request: &ClassificationRequest) -> ConsoleResult<FlowRequest> {
    let src_ip = parse_ip("src_ip", &request.src_ip)?;
    let dst_ip = parse_ip("dst_ip", &request.dst_ip)?;
    let src_mac = parse_mac("src_mac", &request.src_mac)?;
    let dst_mac = request
        .dst_mac
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .map(|m| parse_mac("dst_mac", m))
        .transpose()?;

    let source_is_client = flag("src", request.src)?;
    let protocol = if flag("tcp", request.tcp)? {
        TransportProtocol::Tcp
    } else {
        TransportProtocol::Udp
    };

    if request.switch_id.trim().is_empty() {
        return Err(ConsoleError::validation("switch_id must not be empty"));
    }
    if request.controller_ip.trim().is_empty() {
        return Err(ConsoleError::validation("controller_ip must not be empty"));
    }
    if request.payload.is_empty() {
        return Err(ConsoleError::validation("payload must not be empty"));
    }

    let source = Endpoint {
        ip: src_ip,
        mac: Some(src_mac),
        port: request.src_port,
    };
    let destination = Endpoint {
        ip: dst_ip,
        mac: dst_mac,
        port: request.dst_port,
    };
    let (client, server) = if source_is_client {
        (source, destination)
    } else {
        (destination, source)
    };

    Ok(FlowRequest {
        controller: request.controller_ip.trim().to_string(),
        switch_id: request.switch_id.trim().to_string(),
        protocol,
        client,
        server,
        server_side_port: request.outbound_port,
        client_side_port: request.inbound_port,
    })
}

fn parse_ip(field: &str, value: &str) -> ConsoleResult<IpAddr> {
    value
        .trim()
        .parse()
        .map_err(|_| ConsoleError::validation(format!("{} is not an IP address: {:?}", field, value)))
}

/// Colon-separated six-octet MAC, normalized to lowercase
fn parse_mac(field: &str, value: &str) -> ConsoleResult<String> {
    let value = value.trim();
    let octets: Vec<&str> = value.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if !valid {
        return Err(ConsoleError::validation(format!(
            "{} is not a MAC address: {:?}",
            field, value
        )));
    }
    Ok(value.to_ascii_lowercase())
}

fn flag(field: &str, value: u8) -> ConsoleResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ConsoleError::validation(format!(
            "{} must be 0 or 1, got {}",
            field, other
        ))),
    }
}
