//! Domain models for the weather alerting platform

mod metrics;
mod subscriber;
mod weather;

pub use metrics::*;
pub use subscriber::*;
pub use weather::*;
