use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub hls: HlsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HlsConfig {
    /// Target segment duration, in seconds. Overridable per-request by the
    /// playlist `length=` option.
    #[serde(default = "default_target_seconds")]
    pub target_seconds: f64,

    /// Directory a request's URL stem is resolved against to find the
    /// source `.mp4` (the file-open concern itself — caching, mmap reuse —
    /// is a host responsibility out of this crate's scope).
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    /// Host for the fire-and-forget telemetry collaborator. `None`
    /// disables telemetry entirely.
    #[serde(default)]
    pub telemetry_host: Option<String>,
}

fn default_target_seconds() -> f64 {
    9.0
}

fn default_media_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            target_seconds: default_target_seconds(),
            media_dir: default_media_dir(),
            telemetry_host: None,
        }
    }
}
