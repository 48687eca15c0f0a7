//! Bidirectional flow installation

use super::{ControllerApi, FlowSpec};
use crate::error::ConsoleError;
use crate::models::{FlowDirection, FlowResult, FlowStatus};
use crate::observability::{ConsoleMetrics, StructuredLogger};
use std::sync::Arc;

/// Default flow table
pub const DEFAULT_TABLE_ID: u8 = 0;

/// Default priority of installed flows
pub const DEFAULT_FLOW_PRIORITY: u16 = 100;

/// Writes the client→server flow, then the server→client flow. The reverse
/// flow is only attempted after the forward write succeeded.
pub struct FlowCompiler {
    controller: Arc<dyn ControllerApi>,
    table_id: u8,
    priority: u16,
    metrics: ConsoleMetrics,
    logger: StructuredLogger,
}

impl FlowCompiler {
    pub fn new(
        controller: Arc<dyn ControllerApi>,
        metrics: ConsoleMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            controller,
            table_id: DEFAULT_TABLE_ID,
            priority: DEFAULT_FLOW_PRIORITY,
            metrics,
            logger,
        }
    }

    pub fn with_table(mut self, table_id: u8, priority: u16) -> Self {
        self.table_id = table_id;
        self.priority = priority;
        self
    }

    /// Install both directions; one result per direction, forward first
    pub async fn install(&self, spec: &FlowSpec) -> Vec<FlowResult> {
        let forward = self.write(spec, FlowDirection::ClientToServer).await;

        let reverse = if forward.status == FlowStatus::Success {
            self.write(spec, FlowDirection::ServerToClient).await
        } else {
            let result = FlowResult {
                direction: FlowDirection::ServerToClient,
                status: FlowStatus::Skipped,
                flow_id: spec.flow_id(FlowDirection::ServerToClient),
                response_code: None,
                message: Some("forward flow was not installed".to_string()),
            };
            self.report(spec, &result);
            result
        };

        vec![forward, reverse]
    }

    async fn write(&self, spec: &FlowSpec, direction: FlowDirection) -> FlowResult {
        let flow_id = spec.flow_id(direction);
        let body = spec.flow_payload(direction, self.table_id, self.priority);

        let outcome = self
            .controller
            .put_flow(&spec.controller, &spec.switch_id, self.table_id, &flow_id, &body)
            .await;

        let result = match outcome {
            Ok(code) => FlowResult {
                direction,
                status: FlowStatus::Success,
                flow_id,
                response_code: Some(code),
                message: None,
            },
            Err(ConsoleError::Upstream { status, body }) => FlowResult {
                direction,
                status: FlowStatus::Failed,
                flow_id,
                response_code: (status != 0).then_some(status),
                message: Some(body),
            },
            Err(e) => FlowResult {
                direction,
                status: FlowStatus::Failed,
                flow_id,
                response_code: None,
                message: Some(e.to_string()),
            },
        };

        self.report(spec, &result);
        result
    }

    fn report(&self, spec: &FlowSpec, result: &FlowResult) {
        let status = match result.status {
            FlowStatus::Success => "success",
            FlowStatus::Failed => "failed",
            FlowStatus::Skipped => "skipped",
        };
        self.metrics
            .inc_flow_push(result.direction.as_str(), status);
        self.logger.log_flow_push(
            &spec.switch_id,
            &result.flow_id,
            result.direction.as_str(),
            status,
            result.response_code,
        );
    }
}
