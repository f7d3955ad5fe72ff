//! HTTP handlers for the operational surface

pub mod health;

pub use health::{health_check, status};
