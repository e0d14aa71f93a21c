//! vodstream - on-demand MP4-to-HLS packaging demo host.
//!
//! This binary crate's library half exposes the ambient stack (config, CLI
//! parsing, telemetry, the `axum` demo host) for integration testing. The
//! packaging core itself lives in the `vodstream-media` crate.

pub mod cli;
pub mod config;
pub mod server;
pub mod telemetry;
