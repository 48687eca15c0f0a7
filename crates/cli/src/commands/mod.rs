pub mod classify;
pub mod lookup;
pub mod meters;
pub mod models;
pub mod stats;
