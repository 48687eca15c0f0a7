//! Core library for the flow classification console
//!
//! This crate provides the core functionality for:
//! - Model lifecycle and flow classification
//! - Deterministic DNS/VPN/ASN lookups for uncertain labels
//! - Time-windowed meter policies
//! - OpenFlow meter and flow writes through a RESTCONF controller
//! - Health checks and observability

pub mod classifier;
pub mod controller;
pub mod error;
pub mod health;
pub mod lookup;
pub mod meter;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod state;

mod persist;

pub use error::{ConsoleError, ConsoleResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ConsoleMetrics, StructuredLogger};
pub use pipeline::Pipeline;
