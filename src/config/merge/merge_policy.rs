//! Base layer of every config build: the serialized defaults.

use crate::config::PlotTagConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Builder seeded with `PlotTagConfig::default()`, so partial files only need
/// the keys they override.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = Config::try_from(&PlotTagConfig::default())?;
    Ok(Config::builder().add_source(defaults))
}
