//! Configuration
//!
//! Layered settings for store handles and logging. Sources, lowest to highest
//! precedence: built-in defaults, the global file
//! (`$XDG_CONFIG_HOME/plottag/config.toml`), the workspace file
//! (`<workspace>/plottag.toml`), then `PLOTTAG__SECTION__KEY` environment
//! variables.

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;

use crate::concurrency::{Backoff, RetryPolicy};
use crate::logging::LoggingConfig;
use crate::store::{DeleteOptions, OpenOptions, SchemaMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotTagConfig {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Shape of the wait between lock retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    None,
    Fixed,
    Linear,
    Exponential,
}

/// Settings applied to every store handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// How long SQLite waits for a lock within one attempt.
    pub busy_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    /// Fixed delay, linear step or exponential base.
    pub backoff_ms: u64,
    /// Cap for exponential backoff.
    pub max_backoff_ms: u64,
    pub delete_chunk_size: usize,
    pub schema_mode: SchemaMode,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            max_attempts: 5,
            backoff: BackoffKind::Fixed,
            backoff_ms: 200,
            max_backoff_ms: 10_000,
            delete_chunk_size: 200,
            schema_mode: SchemaMode::Evolve,
        }
    }
}

impl StoreSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        let step = Duration::from_millis(self.backoff_ms);
        let backoff = match self.backoff {
            BackoffKind::None => Backoff::None,
            BackoffKind::Fixed => Backoff::Fixed(step),
            BackoffKind::Linear => Backoff::Linear(step),
            BackoffKind::Exponential => Backoff::Exponential {
                base: step,
                max: Duration::from_millis(self.max_backoff_ms),
            },
        };
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.busy_timeout_ms),
            backoff,
        )
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions::new()
            .retry(self.retry_policy())
            .schema_mode(self.schema_mode)
    }

    pub fn delete_options(&self, vacuum: bool) -> DeleteOptions {
        DeleteOptions {
            chunk_size: self.delete_chunk_size,
            vacuum,
        }
    }
}
