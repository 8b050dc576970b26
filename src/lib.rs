pub mod api;
pub mod arbiter;
pub mod config;
pub mod grid;
pub mod metrics;
pub mod plc;
pub mod publisher;
pub mod simulation;
pub mod snapshot;
pub mod telemetry;
pub mod twin;
