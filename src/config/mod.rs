pub mod overrides;

use std::fs::OpenOptions;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct WsConfig {
    pub host: String,
    pub port: String,
    pub handshake_timeout_sec: i64,
    pub idle_timeout_sec: i64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            host: "stream.binance.com".into(),
            port: "9443".into(),
            handshake_timeout_sec: 10,
            idle_timeout_sec: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub base_retry_sec: i64,
    pub max_retry_sec: i64,
    pub max_retry_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_retry_sec: 1,
            max_retry_sec: 30,
            max_retry_attempts: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggConfig {
    pub period_ms: u64,
}

impl Default for AggConfig {
    fn default() -> Self {
        Self { period_ms: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub write_period_ms: u64,
    pub write_delay_ms: u64,
    pub filename: String,
    pub max_file_mb: u64,
    pub max_files: u64,
    pub console_report: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            write_period_ms: 5000,
            write_delay_ms: 0,
            filename: "aggregates.log".into(),
            max_file_mb: 10,
            max_files: 10,
            console_report: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub trade_pairs: Vec<String>,
    pub ws: WsConfig,
    pub retry: RetryConfig,
    pub agg: AggConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trade_pairs: vec!["btcusdt".into(), "ethusdt".into()],
            ws: WsConfig::default(),
            retry: RetryConfig::default(),
            agg: AggConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load the JSON document at `path` (missing file yields all defaults), apply
    /// `--dotted-key=value` CLI overrides (and their legacy flat aliases) on top, then
    /// validate. Does not fail merely because the file is absent; only a malformed
    /// file or failing validation is an error.
    pub fn load<P: AsRef<Path>>(path: P, cli_overrides: &[String]) -> Result<Self> {
        let mut config = Config::default();

        if let Ok(content) = std::fs::read_to_string(path.as_ref()) {
            let value: Value = serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("failed to parse config file: {e}")))?;
            overrides::apply_json(&mut config, &value);
        }

        for raw in cli_overrides {
            overrides::apply_cli(&mut config, raw)
                .map_err(|e| Error::Config(format!("invalid CLI override `{raw}`: {e}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Startup and every reload run the same checks: `trade_pairs` non-empty and
    /// alphanumeric, every positive-count field actually positive, `idle_timeout_sec`
    /// non-negative, and a final probe open-and-close of the output file.
    pub fn validate(&self) -> Result<()> {
        if self.trade_pairs.is_empty() {
            return Err(Error::Config("trade_pairs list is empty".into()));
        }
        for pair in &self.trade_pairs {
            if pair.is_empty() {
                return Err(Error::Config("trade_pairs contains an empty symbol".into()));
            }
            if !pair.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::Config(format!("invalid symbol: {pair}")));
            }
        }
        if self.agg.period_ms == 0 {
            return Err(Error::Config("agg.period_ms must be > 0".into()));
        }
        if self.output.write_period_ms == 0 {
            return Err(Error::Config("output.write_period_ms must be > 0".into()));
        }
        if self.output.filename.is_empty() {
            return Err(Error::Config("output.filename is empty".into()));
        }
        if self.output.max_file_mb == 0 {
            return Err(Error::Config("output.max_file_mb must be > 0".into()));
        }
        if self.output.max_files == 0 {
            return Err(Error::Config("output.max_files must be > 0".into()));
        }
        if self.retry.base_retry_sec <= 0 {
            return Err(Error::Config("retry.base_retry_sec must be > 0".into()));
        }
        if self.retry.max_retry_sec <= 0 {
            return Err(Error::Config("retry.max_retry_sec must be > 0".into()));
        }
        if self.retry.max_retry_attempts == 0 {
            return Err(Error::Config("retry.max_retry_attempts must be > 0".into()));
        }
        if self.ws.host.is_empty() {
            return Err(Error::Config("ws.host must not be empty".into()));
        }
        if self.ws.port.is_empty() {
            return Err(Error::Config("ws.port must not be empty".into()));
        }
        if self.ws.handshake_timeout_sec <= 0 {
            return Err(Error::Config("ws.handshake_timeout_sec must be > 0".into()));
        }
        if self.ws.idle_timeout_sec < 0 {
            return Err(Error::Config("ws.idle_timeout_sec must be >= 0".into()));
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output.filename)
            .map_err(|e| {
                Error::Config(format!(
                    "output.filename `{}` is not writable: {e}",
                    self.output.filename
                ))
            })?;

        Ok(())
    }
}
