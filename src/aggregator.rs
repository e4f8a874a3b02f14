use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::trade::Trade;

/// Per-window, per-symbol accumulator.
///
/// `buy_count` increments when `buyer_initiated = false` (the taker bought from a
/// resting sell); `sell_count` when `buyer_initiated = true`. This inversion is a
/// deliberate convention of the upstream feed: the flag identifies the passive side,
/// and the active side is what is counted.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolStats {
    pub trades_count: u64,
    pub sum_quantity: f64,
    pub sum_volume: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub buy_count: u64,
    pub sell_count: u64,
}

impl Default for SymbolStats {
    fn default() -> Self {
        Self {
            trades_count: 0,
            sum_quantity: 0.0,
            sum_volume: 0.0,
            min_price: f64::INFINITY,
            max_price: f64::NEG_INFINITY,
            buy_count: 0,
            sell_count: 0,
        }
    }
}

impl SymbolStats {
    fn fold(&mut self, trade: &Trade) {
        self.trades_count += 1;
        self.sum_quantity += trade.quantity;
        self.sum_volume += trade.price * trade.quantity;
        self.min_price = self.min_price.min(trade.price);
        self.max_price = self.max_price.max(trade.price);
        if trade.buyer_initiated {
            self.sell_count += 1;
        } else {
            self.buy_count += 1;
        }
    }
}

/// Window-start (ms since epoch) -> symbol -> stats. `BTreeMap` keeps window-start
/// ascending for free, which is what `Flush` needs for deterministic ordering.
pub type WindowStats = HashMap<String, SymbolStats>;
type AggregationState = BTreeMap<u64, WindowStats>;

/// The configuration knobs that change how the aggregator windows and flushes.
/// A change to either field invalidates all in-memory state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationConfig {
    pub period_ms: u64,
    pub grace_ms: u64,
}

/// Thread-safe, time-windowed per-symbol accumulator.
///
/// `Add`, `Flush`, and `UpdateConfig` are mutually exclusive under a single coarse
/// lock; contention is negligible at realistic trade rates and flush cadence.
pub struct Aggregator {
    inner: Mutex<Inner>,
}

struct Inner {
    config: AggregationConfig,
    state: AggregationState,
}

impl Aggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                state: BTreeMap::new(),
            }),
        }
    }

    /// Fold a trade into its window's stats. Invalid trades are silently dropped.
    pub fn add(&self, trade: &Trade) {
        if !trade.is_valid() {
            return;
        }
        let mut inner = self.inner.lock();
        let period = inner.config.period_ms;
        let window_start = (trade.event_timestamp_ms / period) * period;
        inner
            .state
            .entry(window_start)
            .or_default()
            .entry(trade.symbol.clone())
            .or_default()
            .fold(trade);
    }

    /// Remove and return every window whose grace period has elapsed as of `now_ms`,
    /// in ascending window-start order. Windows still within grace remain in state.
    pub fn flush(&self, now_ms: u64) -> Vec<(u64, WindowStats)> {
        let mut inner = self.inner.lock();
        let period = inner.config.period_ms;
        let grace = inner.config.grace_ms;

        let flushable: Vec<u64> = inner
            .state
            .keys()
            .copied()
            .filter(|&window_start| window_start + period + grace <= now_ms)
            .collect();

        flushable
            .into_iter()
            .map(|window_start| (window_start, inner.state.remove(&window_start).unwrap()))
            .collect()
    }

    /// Replace the configuration. If `period_ms` or `grace_ms` changed, every
    /// in-memory window is discarded atomically; otherwise state is retained.
    pub fn update_config(&self, new_config: AggregationConfig) {
        let mut inner = self.inner.lock();
        if new_config.period_ms != inner.config.period_ms || new_config.grace_ms != inner.config.grace_ms {
            inner.state.clear();
        }
        inner.config = new_config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(symbol: &str, price: f64, qty: f64, ts: u64, buyer_initiated: bool) -> Trade {
        Trade {
            symbol: symbol.into(),
            price,
            quantity: qty,
            event_timestamp_ms: ts,
            buyer_initiated,
        }
    }

    /// Basic multi-symbol, multi-window aggregation.
    #[test]
    fn s1_basic_aggregation() {
        let agg = Aggregator::new(AggregationConfig {
            period_ms: 1000,
            grace_ms: 0,
        });

        agg.add(&trade("BTCUSDT", 100.0, 1.0, 1000, true));
        agg.add(&trade("BTCUSDT", 110.0, 2.0, 1000, false));
        agg.add(&trade("BTCUSDT", 120.0, 1.0, 2000, false));
        agg.add(&trade("ETHUSDT", 200.0, 1.5, 1000, false));
        agg.add(&trade("ETHUSDT", 210.0, 2.0, 2000, true));

        let flushed = agg.flush(3000);
        assert_eq!(flushed.len(), 2);

        let (w1, stats1) = &flushed[0];
        assert_eq!(*w1, 1000);
        let btc = &stats1["BTCUSDT"];
        assert_eq!(btc.trades_count, 2);
        assert_eq!(btc.sum_quantity, 3.0);
        assert_eq!(btc.sum_volume, 320.0);
        assert_eq!(btc.min_price, 100.0);
        assert_eq!(btc.max_price, 110.0);
        assert_eq!(btc.buy_count, 1);
        assert_eq!(btc.sell_count, 1);

        let eth = &stats1["ETHUSDT"];
        assert_eq!(eth.trades_count, 1);
        assert_eq!(eth.sum_quantity, 1.5);
        assert_eq!(eth.sum_volume, 300.0);
        assert_eq!(eth.min_price, 200.0);
        assert_eq!(eth.max_price, 200.0);
        assert_eq!(eth.buy_count, 1);
        assert_eq!(eth.sell_count, 0);

        let (w2, stats2) = &flushed[1];
        assert_eq!(*w2, 2000);
        let btc2 = &stats2["BTCUSDT"];
        assert_eq!(btc2.trades_count, 1);
        assert_eq!(btc2.sum_quantity, 1.0);
        assert_eq!(btc2.sum_volume, 120.0);
        assert_eq!(btc2.buy_count, 1);
        assert_eq!(btc2.sell_count, 0);

        let eth2 = &stats2["ETHUSDT"];
        assert_eq!(eth2.sum_volume, 420.0);
        assert_eq!(eth2.buy_count, 0);
        assert_eq!(eth2.sell_count, 1);
    }

    /// Invalid trades never change state.
    #[test]
    fn s2_invalid_drops() {
        let agg = Aggregator::new(AggregationConfig {
            period_ms: 1000,
            grace_ms: 0,
        });
        agg.add(&trade("BTCUSDT", 100.0, 1.0, 1000, true));
        agg.add(&trade("", 100.0, 1.0, 1000, true)); // empty symbol
        agg.add(&trade("BTCUSDT", -1.0, 1.0, 1000, true)); // negative price
        agg.add(&trade("BTCUSDT", f64::NAN, 1.0, 1000, true)); // non-finite
        agg.add(&trade("BTCUSDT", 100.0, 1.0, 0, true)); // zero timestamp

        let flushed = agg.flush(3000);
        assert_eq!(flushed.len(), 1);
        let stats = &flushed[0].1["BTCUSDT"];
        assert_eq!(stats.trades_count, 1);
    }

    /// A nonzero grace period defers flush until it elapses.
    #[test]
    fn s3_grace_defers_flush() {
        let agg = Aggregator::new(AggregationConfig {
            period_ms: 1000,
            grace_ms: 2000,
        });
        agg.add(&trade("BTCUSDT", 100.0, 1.0, 1000, false));

        assert!(agg.flush(2500).is_empty());
        let flushed = agg.flush(3100);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, 1000);
    }

    /// Reloading with a changed period clears in-memory state.
    #[test]
    fn s4_reload_clears() {
        let agg = Aggregator::new(AggregationConfig {
            period_ms: 1000,
            grace_ms: 0,
        });
        agg.add(&trade("BTCUSDT", 100.0, 1.0, 1000, false));
        agg.update_config(AggregationConfig {
            period_ms: 2000,
            grace_ms: 0,
        });
        assert!(agg.flush(100_000).is_empty());
    }

    #[test]
    fn reload_without_change_retains_state() {
        let agg = Aggregator::new(AggregationConfig {
            period_ms: 1000,
            grace_ms: 0,
        });
        agg.add(&trade("BTCUSDT", 100.0, 1.0, 1000, false));
        agg.update_config(AggregationConfig {
            period_ms: 1000,
            grace_ms: 0,
        });
        let flushed = agg.flush(5000);
        assert_eq!(flushed.len(), 1);
    }

    #[test]
    fn invariant_window_key_is_multiple_of_period() {
        let agg = Aggregator::new(AggregationConfig {
            period_ms: 500,
            grace_ms: 0,
        });
        agg.add(&trade("a", 1.0, 1.0, 1234, false));
        let flushed = agg.flush(u64::MAX);
        for (w, _) in &flushed {
            assert_eq!(w % 500, 0);
        }
    }

    #[test]
    fn invariant_counts_and_bounds_hold() {
        let agg = Aggregator::new(AggregationConfig {
            period_ms: 1000,
            grace_ms: 0,
        });
        agg.add(&trade("a", 50.0, 1.0, 1, true));
        agg.add(&trade("a", 75.0, 2.0, 1, false));
        agg.add(&trade("a", 60.0, 1.0, 1, false));

        let flushed = agg.flush(u64::MAX);
        let stats = &flushed[0].1["a"];
        assert_eq!(stats.trades_count, stats.buy_count + stats.sell_count);
        assert!(stats.min_price <= stats.max_price);
        assert!(stats.sum_quantity > 0.0);
        assert!(stats.sum_volume > 0.0);
    }

    #[test]
    fn flush_leaves_unelapsed_windows_in_state() {
        let agg = Aggregator::new(AggregationConfig {
            period_ms: 1000,
            grace_ms: 0,
        });
        agg.add(&trade("a", 1.0, 1.0, 1000, false));
        agg.add(&trade("a", 1.0, 1.0, 5000, false));

        let flushed = agg.flush(2000);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, 1000);

        // the window at 5000 should still be present
        let flushed_later = agg.flush(6000);
        assert_eq!(flushed_later.len(), 1);
        assert_eq!(flushed_later[0].0, 5000);
    }
}
