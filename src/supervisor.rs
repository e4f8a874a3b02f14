//! Top-level orchestration: owns the queue, aggregator, and writer task; drives
//! connection manager "lives"; handles signal-driven reload and shutdown; applies
//! its own exponential backoff across fatal connection-manager escapes.
//!
//! Ported from the `Run`/`SetupSignalHandler`/`HandleExceptionBackoff` trio in
//! `examples/original_source/src/app_runner.cpp`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::aggregator::{AggregationConfig, Aggregator};
use crate::backoff::Backoff;
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionOutcome};
use crate::queue::HandoffQueue;
use crate::writer::PeriodicWriter;

pub struct Supervisor {
    config: Config,
    config_path: PathBuf,
    cli_overrides: Vec<String>,
}

impl Supervisor {
    pub fn new(config: Config, config_path: PathBuf, cli_overrides: Vec<String>) -> Self {
        Self {
            config,
            config_path,
            cli_overrides,
        }
    }

    fn aggregation_config(&self) -> AggregationConfig {
        AggregationConfig {
            period_ms: self.config.agg.period_ms,
            grace_ms: self.config.output.write_delay_ms,
        }
    }

    /// Run until a shutdown signal is handled; returns the process exit code (always
    /// 0; the only non-zero exit is the caller's initial config load/validate
    /// failure, which happens before a `Supervisor` is constructed).
    pub async fn run(mut self) -> i32 {
        let queue = Arc::new(HandoffQueue::new());
        let aggregator = Arc::new(Aggregator::new(self.aggregation_config()));

        let shutdown = Arc::new(AtomicBool::new(false));
        let reload = Arc::new(AtomicBool::new(false));

        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

        let reader_queue = queue.clone();
        let reader_aggregator = aggregator.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(trade) = reader_queue.pop().await {
                reader_aggregator.add(&trade);
            }
            info!("reader task finished");
        });

        let mut writer = PeriodicWriter::new(aggregator.clone(), self.config.output.clone());
        let mut writer_handle = writer.handle();
        let mut writer_task = tokio::spawn(writer.run());

        let base = Duration::from_secs(self.config.retry.base_retry_sec as u64);
        let max = Duration::from_secs(self.config.retry.max_retry_sec as u64);
        let mut backoff = Backoff::new(base, max);

        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            if reload.swap(false, Ordering::AcqRel) {
                info!("reloading configuration");
                match Config::load(&self.config_path, &self.cli_overrides) {
                    Ok(new_config) => {
                        self.config = new_config;
                        aggregator.update_config(self.aggregation_config());

                        writer_handle.stop();
                        let _ = writer_task.await;
                        let new_writer = PeriodicWriter::new(aggregator.clone(), self.config.output.clone());
                        writer_handle = new_writer.handle();
                        writer_task = tokio::spawn(new_writer.run());

                        backoff = Backoff::new(
                            Duration::from_secs(self.config.retry.base_retry_sec as u64),
                            Duration::from_secs(self.config.retry.max_retry_sec as u64),
                        );
                        info!("configuration reloaded");
                    }
                    Err(e) => {
                        error!(error = %e, "reload validation failed, retaining in-use configuration");
                    }
                }
            }

            let manager = ConnectionManager::new(
                self.config.ws.clone(),
                self.config.retry.clone(),
                self.config.trade_pairs.clone(),
                queue.clone(),
            );
            let conn_handle = manager.handle();

            let run_fut = manager.run();
            tokio::pin!(run_fut);

            let outcome = loop {
                tokio::select! {
                    outcome = &mut run_fut => break outcome,
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, shutting down");
                        shutdown.store(true, Ordering::Release);
                        queue.stop();
                        conn_handle.stop();
                    }
                    _ = sigint.recv() => {
                        info!("SIGINT received, shutting down");
                        shutdown.store(true, Ordering::Release);
                        queue.stop();
                        conn_handle.stop();
                    }
                    _ = sighup.recv() => {
                        info!("SIGHUP received, reload requested");
                        reload.store(true, Ordering::Release);
                        conn_handle.stop();
                    }
                }
            };

            match outcome {
                ConnectionOutcome::Stopped => {
                    backoff.reset();
                }
                ConnectionOutcome::Exhausted => {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    let delay = backoff.current_delay();
                    warn!(delay_secs = delay.as_secs(), attempt = backoff.attempt(), "connection manager exhausted retries, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = sigterm.recv() => {
                            shutdown.store(true, Ordering::Release);
                            queue.stop();
                        }
                        _ = sigint.recv() => {
                            shutdown.store(true, Ordering::Release);
                            queue.stop();
                        }
                    }
                    backoff.advance(self.config.retry.max_retry_attempts);
                }
            }
        }

        queue.stop();
        writer_handle.stop();
        let _ = reader_task.await;
        let _ = writer_task.await;

        info!("tradepulse stopped safely");
        0
    }
}
