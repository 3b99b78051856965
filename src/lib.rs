//! Telemetry agent that polls third-party JSON APIs and turns their
//! responses into flattened, tagged metrics.

pub mod agent;
pub mod collectors;
pub mod config;
pub mod errors;
pub mod metric;
pub mod parser;
