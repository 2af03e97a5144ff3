//! Configuration loading helpers
//!
//! Supports YAML files and environment-variable overrides layered over
//! compiled-in defaults, in that order of increasing precedence:
//!
//! 1. Environment variables (highest)
//! 2. Configuration file
//! 3. Defaults (lowest)

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Separator between nested keys in environment variable names,
/// e.g. `MEMBERSIM_GOSSIP__PROBE_PERIOD`.
pub const ENV_KEY_SEPARATOR: &str = "__";

/// Load a configuration value by layering `defaults`, an optional file and
/// environment variables starting with `env_prefix`.
pub fn load_layered<T>(defaults: &T, path: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut builder = config::Config::builder().add_source(config::Config::try_from(defaults)?);

    if let Some(path) = path {
        debug!("Layering configuration file {}", path.display());
        builder = builder.add_source(config::File::from(path));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(env_prefix)
            .prefix_separator("_")
            .separator(ENV_KEY_SEPARATOR)
            .try_parsing(true),
    );

    let parsed = builder.build()?.try_deserialize()?;
    Ok(parsed)
}

/// Read a YAML document from `path`
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Write `value` as a YAML document to `path`
pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_yaml::to_string(value)?;
    std::fs::write(path, content)?;
    Ok(())
}
