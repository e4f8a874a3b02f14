//! Timer-driven batch drain from the aggregator to the rotating output log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::error;

use crate::aggregator::{Aggregator, WindowStats};
use crate::config::OutputConfig;
use crate::rotation::{format_iso_utc, rotate_if_needed};

/// A handle used to stop a running writer task; cloned into the task that spawned it
/// and held by the supervisor for reload-time recycling.
#[derive(Clone)]
pub struct WriterHandle {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl WriterHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

pub struct PeriodicWriter {
    aggregator: Arc<Aggregator>,
    config: OutputConfig,
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl PeriodicWriter {
    pub fn new(aggregator: Arc<Aggregator>, config: OutputConfig) -> Self {
        Self {
            aggregator,
            config,
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> WriterHandle {
        WriterHandle {
            stopped: self.stopped.clone(),
            notify: self.notify.clone(),
        }
    }

    /// Run the sleep -> flush -> rotate -> append loop until stopped.
    pub async fn run(self) {
        let period = Duration::from_millis(self.config.write_period_ms);

        loop {
            let notified = self.notify.notified();
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = notified => break,
            }
            if self.stopped.load(Ordering::Acquire) {
                break;
            }

            let batch = self.aggregator.flush(now_ms());
            if batch.is_empty() {
                continue;
            }

            if let Err(e) = self.write_batch(&batch) {
                error!(error = %e, "failed to write aggregate batch, dropping");
            }
        }
    }

    fn write_batch(&self, batch: &[(u64, WindowStats)]) -> std::io::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let path = PathBuf::from(&self.config.filename);
        rotate_if_needed(&path, self.config.max_file_mb * 1024 * 1024, self.config.max_files)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut stdout = std::io::stdout();
        for (window_start, stats) in batch {
            let mut block = String::new();
            block.push_str(&format!("timestamp={}\n", format_iso_utc(*window_start)));
            for (symbol, s) in stats {
                block.push_str(&format!(
                    "symbol={symbol} trades={} volume={:.5} quantity={:.5} min={:.2} max={:.2} buy={} sell={}\n",
                    s.trades_count, s.sum_volume, s.sum_quantity, s.min_price, s.max_price, s.buy_count, s.sell_count
                ));
            }
            file.write_all(block.as_bytes())?;
            if self.config.console_report {
                stdout.write_all(block.as_bytes())?;
            }
        }
        file.flush()?;
        if self.config.console_report {
            stdout.flush()?;
        }
        Ok(())
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregationConfig;
    use crate::trade::Trade;

    fn sample_config(dir: &std::path::Path) -> OutputConfig {
        OutputConfig {
            write_period_ms: 5000,
            write_delay_ms: 0,
            filename: dir.join("out.log").to_string_lossy().into_owned(),
            max_file_mb: 10,
            max_files: 10,
            console_report: false,
        }
    }

    #[test]
    fn write_batch_serializes_expected_format() {
        let dir = tempfile::tempdir().unwrap();
        let agg = Arc::new(Aggregator::new(AggregationConfig {
            period_ms: 1000,
            grace_ms: 0,
        }));
        agg.add(&Trade {
            symbol: "BTCUSDT".into(),
            price: 100.0,
            quantity: 2.0,
            event_timestamp_ms: 1000,
            buyer_initiated: false,
        });
        let batch = agg.flush(5000);

        let writer = PeriodicWriter::new(agg, sample_config(dir.path()));
        writer.write_batch(&batch).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("out.log")).unwrap();
        assert!(contents.starts_with("timestamp=1970-01-01T00:00:01Z\n"));
        assert!(contents.contains("symbol=BTCUSDT trades=1 volume=200.00000 quantity=2.00000 min=100.00 max=100.00 buy=1 sell=0"));
    }

    #[test]
    fn empty_batch_write_is_never_called() {
        let dir = tempfile::tempdir().unwrap();
        let agg = Arc::new(Aggregator::new(AggregationConfig {
            period_ms: 1000,
            grace_ms: 0,
        }));
        let writer = PeriodicWriter::new(agg, sample_config(dir.path()));
        writer.write_batch(&[]).unwrap();
        assert!(!dir.path().join("out.log").exists());
    }

    #[test]
    fn console_report_does_not_change_the_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let agg = Arc::new(Aggregator::new(AggregationConfig {
            period_ms: 1000,
            grace_ms: 0,
        }));
        agg.add(&Trade {
            symbol: "ETHUSDT".into(),
            price: 10.0,
            quantity: 1.0,
            event_timestamp_ms: 1000,
            buyer_initiated: true,
        });
        let batch = agg.flush(5000);

        let mut config = sample_config(dir.path());
        config.console_report = true;
        let writer = PeriodicWriter::new(agg, config);
        writer.write_batch(&batch).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("out.log")).unwrap();
        assert!(contents.contains("symbol=ETHUSDT trades=1 volume=10.00000 quantity=1.00000 min=10.00 max=10.00 buy=0 sell=1"));
    }
}
