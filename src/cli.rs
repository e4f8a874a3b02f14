//! Command-line interface definition.

use std::path::PathBuf;

use clap::Parser;

/// tradepulse - resilient market-data ingestion and aggregation daemon.
#[derive(Parser, Debug)]
#[command(name = "tradepulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "./config.json")]
    pub config: PathBuf,

    /// Raw `--section-key=value` overrides, applied on top of the config file.
    #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
    pub overrides: Vec<String>,
}
