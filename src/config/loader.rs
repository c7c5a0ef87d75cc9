use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};
use serde::de::DeserializeOwned;

/// Prefix for environment overrides, e.g. `HERALD__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "HERALD";

/// Load a registry or gateway configuration from a file using the config crate.
/// Supports multiple formats: YAML, JSON, TOML, etc. Environment variables
/// prefixed with `HERALD__` override file values.
pub async fn load_config<T: DeserializeOwned>(config_path: &str) -> Result<T> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync<T: DeserializeOwned>(config_path: &str) -> Result<T> {
    let config_path = Path::new(config_path);

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })
}
