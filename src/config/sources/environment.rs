//! Environment overlay: `PLOTTAG__<SECTION>__<KEY>`.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment};

pub const ENV_PREFIX: &str = "PLOTTAG";

/// `PLOTTAG__STORE__MAX_ATTEMPTS=10` sets `store.max_attempts`. The
/// single-underscore `PLOTTAG_LOG*` variables read by the logging module are
/// not part of this overlay.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .ignore_empty(true)
            .try_parsing(true),
    ))
}
