mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read config file: {path:?}"))?;

    let config: Config = toml::from_str(&content).with_context(|| format!("failed to parse config file: {path:?}"))?;

    validate_config(&config)?;
    Ok(config)
}

/// Load config from a given path, the default-path list, or fall back to
/// `Config::default()` if none exist.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./config.toml", "./vodstream.toml", "~/.config/vodstream/config.toml", "/etc/vodstream/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("server port cannot be 0");
    }
    if !(config.hls.target_seconds > 0.0) {
        anyhow::bail!("hls.target_seconds must be > 0.0, got {}", config.hls.target_seconds);
    }
    Ok(())
}
