use clap::Parser;
use tracing::info;

use tradepulse::cli::Cli;
use tradepulse::config::Config;
use tradepulse::supervisor::Supervisor;

#[tokio::main]
async fn main() {
    // Installs the process-wide default crypto provider; rustls 0.23 requires one
    // before any `ClientConfig` can be built.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config, &cli.overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    config.logging.init();
    info!(config = ?cli.config, "tradepulse starting");

    let code = Supervisor::new(config, cli.config, cli.overrides).run().await;
    std::process::exit(code);
}
