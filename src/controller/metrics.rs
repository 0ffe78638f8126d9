//! Prometheus Metrics for the Peg Controller

use std::sync::atomic::{AtomicU64, Ordering};

use super::error::ControllerError;
use super::mode::ControllerMode;
use super::peg::PegReading;
use super::rate_search::RateKind;

/// Controller metrics registry
///
/// Exposes metrics in Prometheus format via the status endpoint
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    pub ticks_total: AtomicU64,
    pub tick_failures_total: AtomicU64,
    pub price_read_failures_total: AtomicU64,
    pub rate_write_failures_total: AtomicU64,
    pub borrow_writes_total: AtomicU64,
    pub savings_writes_total: AtomicU64,
    pub peg_hits_total: AtomicU64,
    pub borrow_rate_bps: AtomicU64,
    pub savings_rate_bps: AtomicU64,
    /// f64 bits
    last_price: AtomicU64,
    /// f64 bits
    deviation: AtomicU64,
    growth_mode: AtomicU64,
    initialized: AtomicU64,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_reading(&self, reading: &PegReading) {
        self.last_price
            .store(reading.price.to_bits(), Ordering::Relaxed);
        self.deviation
            .store(reading.deviation.to_bits(), Ordering::Relaxed);
    }

    pub fn record_tick(&self, initialized: bool, mode: ControllerMode) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
        self.initialized
            .store(initialized as u64, Ordering::Relaxed);
        self.growth_mode
            .store((mode == ControllerMode::Growth) as u64, Ordering::Relaxed);
    }

    pub fn record_peg_hit(&self) {
        self.peg_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, kind: RateKind, bps: u32) {
        match kind {
            RateKind::Borrow => {
                self.borrow_writes_total.fetch_add(1, Ordering::Relaxed);
                self.borrow_rate_bps.store(bps as u64, Ordering::Relaxed);
            }
            RateKind::Savings => {
                self.savings_writes_total.fetch_add(1, Ordering::Relaxed);
                self.savings_rate_bps.store(bps as u64, Ordering::Relaxed);
            }
        }
    }

    /// Seed the rate gauges without counting a write.
    pub fn set_rates(&self, borrow: u32, savings: u32) {
        self.borrow_rate_bps.store(borrow as u64, Ordering::Relaxed);
        self.savings_rate_bps.store(savings as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, err: &ControllerError) {
        self.tick_failures_total.fetch_add(1, Ordering::Relaxed);
        match err {
            ControllerError::PriceUnavailable(_) => {
                self.price_read_failures_total.fetch_add(1, Ordering::Relaxed);
            }
            ControllerError::RateWriteFailed { .. } => {
                self.rate_write_failures_total.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn last_price(&self) -> f64 {
        f64::from_bits(self.last_price.load(Ordering::Relaxed))
    }

    pub fn deviation(&self) -> f64 {
        f64::from_bits(self.deviation.load(Ordering::Relaxed))
    }

    /// Export all metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        let counters = [
            (
                "peg_controller_ticks_total",
                "Completed controller ticks",
                &self.ticks_total,
            ),
            (
                "peg_controller_tick_failures_total",
                "Ticks abandoned on error",
                &self.tick_failures_total,
            ),
            (
                "peg_controller_price_read_failures_total",
                "Failed price reads",
                &self.price_read_failures_total,
            ),
            (
                "peg_controller_rate_write_failures_total",
                "Failed rate writes",
                &self.rate_write_failures_total,
            ),
            (
                "peg_controller_peg_hits_total",
                "Trend reversals counted while tempered",
                &self.peg_hits_total,
            ),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n\n", name, value.load(Ordering::Relaxed)));
        }

        output.push_str("# HELP peg_controller_rate_writes_total Rate updates submitted\n");
        output.push_str("# TYPE peg_controller_rate_writes_total counter\n");
        output.push_str(&format!(
            "peg_controller_rate_writes_total{{rate=\"borrow\"}} {}\n",
            self.borrow_writes_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "peg_controller_rate_writes_total{{rate=\"savings\"}} {}\n",
            self.savings_writes_total.load(Ordering::Relaxed)
        ));

        output.push_str("\n# HELP peg_controller_rate_bps Current rate in basis points\n");
        output.push_str("# TYPE peg_controller_rate_bps gauge\n");
        output.push_str(&format!(
            "peg_controller_rate_bps{{rate=\"borrow\"}} {}\n",
            self.borrow_rate_bps.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "peg_controller_rate_bps{{rate=\"savings\"}} {}\n",
            self.savings_rate_bps.load(Ordering::Relaxed)
        ));

        output.push_str("\n# HELP peg_controller_price Last sampled price\n");
        output.push_str("# TYPE peg_controller_price gauge\n");
        output.push_str(&format!("peg_controller_price {}\n", self.last_price()));

        output.push_str("\n# HELP peg_controller_deviation Normalized deviation from peg\n");
        output.push_str("# TYPE peg_controller_deviation gauge\n");
        output.push_str(&format!("peg_controller_deviation {}\n", self.deviation()));

        output.push_str("\n# HELP peg_controller_growth_mode 1 once growth mode is active\n");
        output.push_str("# TYPE peg_controller_growth_mode gauge\n");
        output.push_str(&format!(
            "peg_controller_growth_mode {}\n",
            self.growth_mode.load(Ordering::Relaxed)
        ));

        output.push_str("\n# HELP peg_controller_initialized 1 once the price window is full\n");
        output.push_str("# TYPE peg_controller_initialized gauge\n");
        output.push_str(&format!(
            "peg_controller_initialized {}\n",
            self.initialized.load(Ordering::Relaxed)
        ));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Direction;
    use anyhow::anyhow;

    #[test]
    fn test_metrics_prometheus_export() {
        let m = ControllerMetrics::new();
        m.record_tick(true, ControllerMode::Growth);
        m.record_write(RateKind::Borrow, 950);
        m.record_write(RateKind::Savings, 850);
        m.record_reading(&PegReading {
            price: 1.002,
            deviation: 0.002,
            direction: Direction::Up,
            is_stable: false,
            moving_toward_peg: false,
        });

        let output = m.to_prometheus();
        assert!(output.contains("peg_controller_ticks_total 1"));
        assert!(output.contains("peg_controller_rate_bps{rate=\"borrow\"} 950"));
        assert!(output.contains("peg_controller_rate_writes_total{rate=\"savings\"} 1"));
        assert!(output.contains("peg_controller_growth_mode 1"));
        assert!(output.contains("peg_controller_price 1.002"));
    }

    #[test]
    fn test_failures_by_kind() {
        let m = ControllerMetrics::new();
        m.record_failure(&ControllerError::PriceUnavailable(anyhow!("down")));
        m.record_failure(&ControllerError::RateWriteFailed {
            kind: RateKind::Borrow,
            bps: 600,
            source: anyhow!("reverted"),
        });
        assert_eq!(m.tick_failures_total.load(Ordering::Relaxed), 2);
        assert_eq!(m.price_read_failures_total.load(Ordering::Relaxed), 1);
        assert_eq!(m.rate_write_failures_total.load(Ordering::Relaxed), 1);
    }
}
