//! Controller Configuration
//!
//! Defaults match the production deployment. A TOML file may override any
//! subset of fields, and `PEG_*` environment variables are applied last.

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::ControllerError;
use super::rate_search::{RateBounds, RecenterPolicy};

/// Highest rate bound accepted by validation (100%)
pub const MAX_RATE_BPS: u32 = 10_000;

/// Top-level configuration for the controller process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub controller: ControllerConfig,
    pub store: StoreConfig,
    pub status: StatusConfig,
}

/// Control-loop tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Peg the price is steered toward
    pub target_price: f64,
    /// Max absolute normalized deviation still considered on-peg
    pub price_tolerance: f64,
    /// Tick period
    #[serde(with = "duration_serde")]
    pub rate_adjustment_interval: Duration,
    pub borrow_rate_min: u32,
    pub borrow_rate_max: u32,
    /// Floor for the savings rate once in growth mode
    pub savings_rate_min: u32,
    /// Samples required before any decision is made
    pub price_window: usize,
    /// Ticks that must elapse between rate changes
    pub rate_change_delay: u32,
    /// Direction reversals needed to enter growth mode
    pub peg_hit_threshold: u32,
    /// Minimum distance kept between borrow and savings rates (bps)
    pub rate_spread: u32,
    pub recenter_policy: RecenterPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            target_price: 1.0,
            price_tolerance: 0.000005,
            rate_adjustment_interval: Duration::from_millis(2000),
            borrow_rate_min: 200,
            borrow_rate_max: 3000,
            savings_rate_min: 200,
            price_window: 10,
            rate_change_delay: 5,
            peg_hit_threshold: 2,
            rate_spread: 100,
            recenter_policy: RecenterPolicy::KeepLastRate,
        }
    }
}

impl ControllerConfig {
    pub fn borrow_bounds(&self) -> RateBounds {
        RateBounds {
            min: self.borrow_rate_min,
            max: self.borrow_rate_max,
        }
    }

    /// Savings bounds before the borrow rate is known; the ceiling is
    /// re-derived from the borrow rate on every growth-mode change.
    pub fn savings_bounds(&self) -> RateBounds {
        RateBounds {
            min: self.savings_rate_min,
            max: self
                .borrow_rate_max
                .saturating_sub(self.rate_spread)
                .max(self.savings_rate_min),
        }
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        let fail = |reason: String| Err(ControllerError::InvalidConfig(reason));

        if !(self.target_price.is_finite() && self.target_price > 0.0) {
            return fail(format!("target_price must be positive, got {}", self.target_price));
        }
        if !(self.price_tolerance.is_finite() && self.price_tolerance >= 0.0) {
            return fail(format!(
                "price_tolerance must be non-negative, got {}",
                self.price_tolerance
            ));
        }
        if self.rate_adjustment_interval.is_zero() {
            return fail("rate_adjustment_interval must be non-zero".into());
        }
        if self.borrow_rate_min > self.borrow_rate_max {
            return fail(format!(
                "borrow_rate_min {} exceeds borrow_rate_max {}",
                self.borrow_rate_min, self.borrow_rate_max
            ));
        }
        if self.borrow_rate_max > MAX_RATE_BPS {
            return fail(format!(
                "borrow_rate_max {} exceeds {} bps",
                self.borrow_rate_max, MAX_RATE_BPS
            ));
        }
        if self.rate_change_delay > u32::MAX / 2 {
            return fail(format!(
                "rate_change_delay {} is too large",
                self.rate_change_delay
            ));
        }
        if self.savings_rate_min > self.borrow_rate_max {
            return fail(format!(
                "savings_rate_min {} exceeds borrow_rate_max {}",
                self.savings_rate_min, self.borrow_rate_max
            ));
        }
        if self.price_window == 0 {
            return fail("price_window must be at least 1".into());
        }
        if self.peg_hit_threshold == 0 {
            return fail("peg_hit_threshold must be at least 1".into());
        }
        Ok(())
    }

    /// Apply `PEG_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let value = lookup(key)?;
            match value.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    debug!(key, value = %value, "Ignoring unparseable override");
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, "PEG_TARGET_PRICE") {
            self.target_price = v;
        }
        if let Some(v) = parsed(&lookup, "PEG_PRICE_TOLERANCE") {
            self.price_tolerance = v;
        }
        if let Some(ms) = parsed::<u64>(&lookup, "PEG_RATE_ADJUSTMENT_INTERVAL_MS") {
            self.rate_adjustment_interval = Duration::from_millis(ms);
        }
        if let Some(v) = parsed(&lookup, "PEG_BORROW_RATE_MIN") {
            self.borrow_rate_min = v;
        }
        if let Some(v) = parsed(&lookup, "PEG_BORROW_RATE_MAX") {
            self.borrow_rate_max = v;
        }
        if let Some(v) = parsed(&lookup, "PEG_SAVINGS_RATE_MIN") {
            self.savings_rate_min = v;
        }
        if let Some(v) = parsed(&lookup, "PEG_PRICE_WINDOW") {
            self.price_window = v;
        }
        if let Some(v) = parsed(&lookup, "PEG_RATE_CHANGE_DELAY") {
            self.rate_change_delay = v;
        }
        if let Some(v) = parsed(&lookup, "PEG_PEG_HIT_THRESHOLD") {
            self.peg_hit_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "PEG_RATE_SPREAD") {
            self.rate_spread = v;
        }
    }
}

/// Where prices are read from and rates are written to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    Paper(PaperMarketConfig),
    Http(HttpStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Paper(PaperMarketConfig::default())
    }
}

/// Simulated market used for dry runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperMarketConfig {
    pub target_price: f64,
    /// Borrow rate at which the simulated price sits exactly on peg
    pub equilibrium_borrow_rate: u32,
    /// How much each bps of savings rate lifts the equilibrium
    pub savings_equilibrium_shift: f64,
    /// Fractional price move per 10_000 bps away from equilibrium
    pub rate_sensitivity: f64,
    /// Half-width of uniform price noise (fraction of target)
    pub noise: f64,
    pub initial_borrow_rate: u32,
    pub initial_savings_rate: u32,
    pub seed: u64,
}

impl Default for PaperMarketConfig {
    fn default() -> Self {
        Self {
            target_price: 1.0,
            equilibrium_borrow_rate: 1250,
            savings_equilibrium_shift: 0.5,
            rate_sensitivity: 0.05,
            noise: 0.000002,
            initial_borrow_rate: 1000,
            initial_savings_rate: 0,
            seed: 42,
        }
    }
}

/// Transaction-relay HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpStoreConfig {
    pub base_url: String,
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8545".into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Metrics and state endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([0, 0, 0, 0], 9187)),
        }
    }
}

impl AppConfig {
    /// Load from `path` if given (defaults otherwise), then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!("Loading config from {}", path.display());
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => {
                info!("Using default configuration");
                Self::default()
            }
        };
        config.controller.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

// Serde helper for Duration (using milliseconds for simplicity)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
