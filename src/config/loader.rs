//! Configuration loader with environment variable support

use super::AppConfig;
use crate::error::Result;
use config::{Environment, File};
use std::path::Path;

/// Prefix for environment overrides, e.g. `SECURITY_PIPELINE__SERVER__PORT`
pub const ENV_PREFIX: &str = "SECURITY_PIPELINE";

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let config = config::Config::builder()
        .add_source(File::from(path.as_ref()))
        .build()?;

    let cfg: AppConfig = config.try_deserialize()?;
    Ok(cfg)
}

/// Load configuration from a TOML file with environment variable overrides
///
/// A missing file is not an error here: defaults plus the environment are
/// enough to run.
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let config = config::Config::builder()
        .add_source(File::from(path.as_ref()).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("security.cors_origins")
                .with_list_parse_key("security.audit_exclude_paths"),
        )
        .build()?;

    let cfg: AppConfig = config.try_deserialize()?;
    Ok(cfg)
}
