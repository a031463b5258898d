//! Station options, loadable from TOML.
//!
//! ```
//! use garden_web::StationOptions;
//! use std::time::Duration;
//!
//! let options: StationOptions = r#"
//!     cache = true
//!     cache_max_items = 500
//!     cache_reset_duration = "10m"
//!
//!     [logging]
//!     format = "json"
//! "#
//! .parse()
//! .unwrap();
//!
//! assert!(options.path_correction);
//! assert_eq!(options.reset_interval(), Duration::from_secs(600));
//! ```

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::{num::NonZeroUsize, str::FromStr, thread, time::Duration};

const MIN_CACHE_RESET: Duration = Duration::from_secs(30);

/// Routing and dispatch options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationOptions {
    /// Redirect to the path with its trailing slash toggled when only that
    /// variant is planted (default: `true`).
    pub path_correction: bool,

    /// Cache resolved routes (default: `false`).
    pub cache: bool,

    /// Cache size past which maintenance clears it. `0` clears it on every
    /// run (default: `0`).
    pub cache_max_items: usize,

    /// Interval between cache maintenance runs (default: `5m`, at least `30s`).
    #[serde(with = "humantime_serde")]
    pub cache_reset_duration: Duration,

    /// Logical CPUs to plan for. Detected when unset.
    pub parallelism: Option<NonZeroUsize>,

    /// Idle request contexts kept for reuse (default: `1024`).
    pub pool_capacity: usize,

    pub logging: LoggingConfig,
}

impl Default for StationOptions {
    fn default() -> Self {
        StationOptions {
            path_correction: true,
            cache: false,
            cache_max_items: 0,
            cache_reset_duration: Duration::from_secs(5 * 60),
            parallelism: None,
            pool_capacity: 1024,
            logging: LoggingConfig::default(),
        }
    }
}

impl StationOptions {
    pub fn from_toml(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Maintenance interval with the lower bound applied.
    #[inline]
    pub fn reset_interval(&self) -> Duration {
        self.cache_reset_duration.max(MIN_CACHE_RESET)
    }

    /// Configured parallelism, or what the machine reports.
    #[inline]
    pub fn logical_cpus(&self) -> usize {
        self.parallelism
            .or_else(|| thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get)
    }
}

impl FromStr for StationOptions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StationOptions::from_toml(s)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Default,
    Compact,
    Pretty,
    Json,
}

impl LoggingConfig {
    /// Installs a global subscriber filtered by `RUST_LOG`.
    ///
    /// Does nothing when a subscriber is already installed.
    pub fn init(&self) {
        use tracing_subscriber::{prelude::*, EnvFilter};

        let env_filter = EnvFilter::from_default_env();
        let registry = tracing_subscriber::registry().with(env_filter);

        let _ = match self.format {
            LogFormat::Default => registry.with(tracing_subscriber::fmt::layer()).try_init(),
            LogFormat::Compact => registry
                .with(tracing_subscriber::fmt::layer().compact())
                .try_init(),
            LogFormat::Pretty => registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init(),
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init(),
        };
    }
}
