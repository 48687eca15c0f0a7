//! Meter policy selection
//!
//! This module provides:
//! - Activation period evaluation
//! - Write-time validation, including ALL_WEEK exclusivity
//! - Transactional storage with meter id allocation
//! - `MeterService`, which keeps policies and controller meters in step

mod period;
mod repository;
mod selector;
mod service;
mod validation;


pub use period::{is_active, is_active_at, is_weekday};
pub use repository::{MeterRepository, MeterTxn};
pub use selector::{select, SelectionKey};
pub use service::MeterService;
pub use validation::{check_exclusivity, validate_draft};
