//! Simulated market for dry runs
//!
//! Price is a linear function of how far the borrow rate sits from a hidden
//! equilibrium, plus seeded uniform noise. Rates above equilibrium push the
//! price above peg, which is the response the controller is built to steer.
//! Savings rate lifts the price the same way, scaled by
//! `savings_equilibrium_shift`.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::RateStore;
use crate::controller::config::PaperMarketConfig;
use crate::controller::RateKind;

#[derive(Debug)]
struct PaperMarket {
    borrow_rate: u32,
    savings_rate: u32,
    rng: StdRng,
    writes: Vec<(RateKind, u32)>,
    failing_price_reads: u32,
    failing_writes: u32,
}

#[derive(Debug)]
pub struct PaperRateStore {
    config: PaperMarketConfig,
    market: Mutex<PaperMarket>,
}

impl PaperRateStore {
    pub fn new(config: PaperMarketConfig) -> Self {
        let market = PaperMarket {
            borrow_rate: config.initial_borrow_rate,
            savings_rate: config.initial_savings_rate,
            rng: StdRng::seed_from_u64(config.seed),
            writes: Vec::new(),
            failing_price_reads: 0,
            failing_writes: 0,
        };
        Self {
            config,
            market: Mutex::new(market),
        }
    }

    /// Noise-free price for the given rates.
    pub fn fair_price(&self, borrow_rate: u32, savings_rate: u32) -> f64 {
        let effective = borrow_rate as f64
            + self.config.savings_equilibrium_shift * savings_rate as f64
            - self.config.equilibrium_borrow_rate as f64;
        self.config.target_price * (1.0 + self.config.rate_sensitivity * effective / 10_000.0)
    }

    pub fn borrow_rate(&self) -> u32 {
        self.market.lock().borrow_rate
    }

    pub fn savings_rate(&self) -> u32 {
        self.market.lock().savings_rate
    }

    /// Every accepted write, in order.
    pub fn writes(&self) -> Vec<(RateKind, u32)> {
        self.market.lock().writes.clone()
    }

    /// Make the next `n` price reads fail.
    pub fn fail_price_reads(&self, n: u32) {
        self.market.lock().failing_price_reads = n;
    }

    /// Make the next `n` rate writes fail.
    pub fn fail_writes(&self, n: u32) {
        self.market.lock().failing_writes = n;
    }

    fn apply_write(&self, kind: RateKind, bps: u32) -> Result<()> {
        let mut market = self.market.lock();
        if market.failing_writes > 0 {
            market.failing_writes -= 1;
            return Err(anyhow!("simulated {} write rejection", kind));
        }
        match kind {
            RateKind::Borrow => market.borrow_rate = bps,
            RateKind::Savings => market.savings_rate = bps,
        }
        market.writes.push((kind, bps));
        debug!(%kind, bps, "Paper rate write");
        Ok(())
    }
}

#[async_trait::async_trait]
impl RateStore for PaperRateStore {
    async fn read_price(&self) -> Result<f64> {
        let (borrow, savings, jitter) = {
            let mut market = self.market.lock();
            if market.failing_price_reads > 0 {
                market.failing_price_reads -= 1;
                return Err(anyhow!("simulated price feed outage"));
            }
            let jitter = if self.config.noise > 0.0 {
                market.rng.gen_range(-self.config.noise..=self.config.noise)
            } else {
                0.0
            };
            (market.borrow_rate, market.savings_rate, jitter)
        };
        Ok(self.fair_price(borrow, savings) + jitter * self.config.target_price)
    }

    async fn read_borrow_rate(&self) -> Result<u32> {
        Ok(self.borrow_rate())
    }

    async fn read_savings_rate(&self) -> Result<u32> {
        Ok(self.savings_rate())
    }

    async fn write_borrow_rate(&self, bps: u32) -> Result<()> {
        self.apply_write(RateKind::Borrow, bps)
    }

    async fn write_savings_rate(&self, bps: u32) -> Result<()> {
        self.apply_write(RateKind::Savings, bps)
    }
}
