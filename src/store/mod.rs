//! Rate store adapters
//!
//! The controller only ever reads a price, reads the two rates once at
//! startup, and writes rates back. Everything on the other side of that
//! boundary (contracts, signing, relays) lives behind [`RateStore`].

pub mod http;
pub mod paper;

use std::sync::Arc;

use anyhow::Result;

use crate::controller::config::StoreConfig;
use crate::controller::RateKind;

pub use http::HttpRateStore;
pub use paper::PaperRateStore;

#[async_trait::async_trait]
pub trait RateStore: Send + Sync {
    async fn read_price(&self) -> Result<f64>;
    async fn read_borrow_rate(&self) -> Result<u32>;
    async fn read_savings_rate(&self) -> Result<u32>;
    async fn write_borrow_rate(&self, bps: u32) -> Result<()>;
    async fn write_savings_rate(&self, bps: u32) -> Result<()>;

    async fn write_rate(&self, kind: RateKind, bps: u32) -> Result<()> {
        match kind {
            RateKind::Borrow => self.write_borrow_rate(bps).await,
            RateKind::Savings => self.write_savings_rate(bps).await,
        }
    }
}

/// Build the store selected by configuration.
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn RateStore>> {
    Ok(match config {
        StoreConfig::Paper(paper) => Arc::new(PaperRateStore::new(paper.clone())),
        StoreConfig::Http(http) => Arc::new(HttpRateStore::new(http.clone())?),
    })
}
