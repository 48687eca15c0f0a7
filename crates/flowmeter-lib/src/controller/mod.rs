//! Controller-facing flow rule compiler
//!
//! This module provides:
//! - `ControllerApi`, the seam over RESTCONF meter and flow writes
//! - `OdlClient`, its reqwest implementation
//! - Payload builders and the bidirectional `FlowCompiler`

mod client;
mod compiler;
mod flow;

#[cfg(test)]
pub(crate) mod fake;
#[cfg(test)]
mod tests;

pub use client::{ControllerApi, ControllerSettings, OdlClient};
pub use compiler::{FlowCompiler, DEFAULT_FLOW_PRIORITY, DEFAULT_TABLE_ID};
pub use flow::{meter_payload, Endpoint, FlowSpec, TransportProtocol};
