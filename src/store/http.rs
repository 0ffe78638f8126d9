//! Transaction-relay client
//!
//! The relay owns the wallet and submits contract calls; this side only
//! speaks JSON over HTTP:
//!
//! - `GET  /price`          -> `{"price": 1.0002}`
//! - `GET  /rates`          -> `{"borrowRate": 1000, "savingsRate": 0}`
//! - `POST /rates/borrow`   <- `{"bps": 950}`
//! - `POST /rates/savings`  <- `{"bps": 850}`

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RateStore;
use crate::controller::config::HttpStoreConfig;
use crate::controller::RateKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceResponse {
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatesResponse {
    pub borrow_rate: u32,
    pub savings_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateUpdate {
    pub bps: u32,
}

#[derive(Debug, Clone)]
pub struct HttpRateStore {
    client: Client,
    base_url: String,
}

impl HttpRateStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_rates(&self) -> Result<RatesResponse> {
        self.client
            .get(self.url("/rates"))
            .send()
            .await
            .context("rates request failed")?
            .error_for_status()
            .context("rates request rejected")?
            .json::<RatesResponse>()
            .await
            .context("rates response malformed")
    }

    async fn post_rate(&self, kind: RateKind, bps: u32) -> Result<()> {
        let path = match kind {
            RateKind::Borrow => "/rates/borrow",
            RateKind::Savings => "/rates/savings",
        };
        self.client
            .post(self.url(path))
            .json(&RateUpdate { bps })
            .send()
            .await
            .with_context(|| format!("{} rate submission failed", kind))?
            .error_for_status()
            .with_context(|| format!("{} rate submission rejected", kind))?;
        debug!(%kind, bps, "Rate submitted to relay");
        Ok(())
    }
}

#[async_trait::async_trait]
impl RateStore for HttpRateStore {
    async fn read_price(&self) -> Result<f64> {
        let resp = self
            .client
            .get(self.url("/price"))
            .send()
            .await
            .context("price request failed")?
            .error_for_status()
            .context("price request rejected")?
            .json::<PriceResponse>()
            .await
            .context("price response malformed")?;
        anyhow::ensure!(
            resp.price.is_finite() && resp.price > 0.0,
            "relay returned invalid price {}",
            resp.price
        );
        Ok(resp.price)
    }

    async fn read_borrow_rate(&self) -> Result<u32> {
        Ok(self.read_rates().await?.borrow_rate)
    }

    async fn read_savings_rate(&self) -> Result<u32> {
        Ok(self.read_rates().await?.savings_rate)
    }

    async fn write_borrow_rate(&self, bps: u32) -> Result<()> {
        self.post_rate(RateKind::Borrow, bps).await
    }

    async fn write_savings_rate(&self, bps: u32) -> Result<()> {
        self.post_rate(RateKind::Savings, bps).await
    }
}
