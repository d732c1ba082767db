pub mod config;
pub mod digest;
pub mod error;
pub mod metrics;
pub mod telemetry;
