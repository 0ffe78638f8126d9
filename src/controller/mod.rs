//! Peg Stability Controller
//!
//! Samples a market price on a fixed interval and steers it toward a target
//! by adjusting a borrow rate and, once the peg has proven itself, a savings
//! rate that trails it.
//!
//! Data flow per tick:
//!
//! ```text
//! RateStore::read_price -> PriceWindow -> PegEvaluator -> ControllerModeMachine
//!                                                              |
//!                            RateStore::write_*_rate <---------+
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use peg_rate_controller::controller::{
//!     ControlLoopScheduler, ControllerConfig, ControllerMetrics,
//! };
//!
//! let (scheduler, handle) = ControlLoopScheduler::start(config, store, metrics).await?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! tokio::spawn(scheduler.run(shutdown_rx));
//! ```

pub mod config;
pub mod error;
pub mod integration;
pub mod metrics;
pub mod mode;
pub mod peg;
pub mod price_window;
pub mod rate_search;
pub mod scheduler;

#[cfg(test)]
mod scheduler_tests;

pub use config::*;
pub use error::*;
pub use integration::*;
pub use metrics::*;
pub use mode::*;
pub use peg::*;
pub use price_window::*;
pub use rate_search::*;
pub use scheduler::*;
