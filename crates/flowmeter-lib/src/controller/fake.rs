//! In-process controller that records requests

use super::ControllerApi;
use crate::error::{ConsoleError, ConsoleResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Holds meter writes in flight until released
#[derive(Default)]
pub(crate) struct MeterGate {
    pub(crate) entered: Notify,
    pub(crate) release: Notify,
}

#[derive(Default)]
pub(crate) struct RecordingController {
    calls: Mutex<Vec<String>>,
    fail_meters: AtomicBool,
    /// Flow id suffixes whose writes are rejected
    failing_flows: Mutex<Vec<String>>,
    meter_gate: Mutex<Option<Arc<MeterGate>>>,
}

impl RecordingController {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_meters(&self, fail: bool) {
        self.fail_meters.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_flow(&self, suffix: &str) {
        self.failing_flows.lock().unwrap().push(suffix.to_string());
    }

    /// Block every meter PUT on the returned gate
    pub(crate) fn gate_meters(&self) -> Arc<MeterGate> {
        let gate = Arc::new(MeterGate::default());
        *self.meter_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn rejected() -> ConsoleError {
        ConsoleError::Upstream {
            status: 500,
            body: "rejected".to_string(),
        }
    }
}

#[async_trait]
impl ControllerApi for RecordingController {
    async fn put_meter(
        &self,
        _controller: &str,
        switch_id: &str,
        meter_id: u32,
        _body: &Value,
    ) -> ConsoleResult<u16> {
        self.record(format!("PUT meter {}/{}", switch_id, meter_id));
        let gate = self.meter_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail_meters.load(Ordering::SeqCst) {
            return Err(Self::rejected());
        }
        Ok(201)
    }

    async fn delete_meter(
        &self,
        _controller: &str,
        switch_id: &str,
        meter_id: u32,
    ) -> ConsoleResult<u16> {
        self.record(format!("DELETE meter {}/{}", switch_id, meter_id));
        if self.fail_meters.load(Ordering::SeqCst) {
            return Err(Self::rejected());
        }
        Ok(200)
    }

    async fn put_flow(
        &self,
        _controller: &str,
        switch_id: &str,
        _table_id: u8,
        flow_id: &str,
        _body: &Value,
    ) -> ConsoleResult<u16> {
        self.record(format!("PUT flow {}/{}", switch_id, flow_id));
        if self.failing_flows.lock().unwrap().iter().any(|f| flow_id.ends_with(f.as_str())) {
            return Err(Self::rejected());
        }
        Ok(201)
    }
}
