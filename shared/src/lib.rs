//! Shared types and models for the weather alerting platform
//!
//! This crate contains the domain model consumed by the forecast collector and
//! the alert evaluator. It performs no I/O.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
