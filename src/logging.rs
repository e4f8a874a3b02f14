//! Structured diagnostic logging, distinct from the domain output log file
//! (`writer`/`rotation`). Initialized once at startup from `LoggingConfig`.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

impl LoggingConfig {
    /// Initialize the global `tracing` subscriber. `RUST_LOG` overrides `level` when
    /// set.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}
