//! Fixed-interval control loop
//!
//! One task owns the controller context and runs ticks strictly in sequence.
//! A tick that fails (price read or rate write) is logged and abandoned;
//! whatever the mode machine already decided stays in memory and the next
//! tick carries on from there. Writes are at most once per tick, never retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::ControllerConfig;
use super::error::ControllerError;
use super::integration::{
    ControllerEvent, ControllerHandle, ControllerIntegration, ControllerSnapshot,
};
use super::metrics::ControllerMetrics;
use super::mode::{ControllerContext, ControllerModeMachine, StepOutcome};
use super::peg::{PegEvaluator, PegReading};
use super::rate_search::RateKind;
use crate::store::RateStore;

/// What a successful tick observed and did
#[derive(Debug, Clone, Copy)]
pub struct TickReport {
    pub price: f64,
    /// `None` while the price window is still filling
    pub reading: Option<PegReading>,
    pub outcome: StepOutcome,
}

pub struct ControlLoopScheduler {
    store: Arc<dyn RateStore>,
    machine: ControllerModeMachine,
    evaluator: PegEvaluator,
    ctx: ControllerContext,
    metrics: Arc<ControllerMetrics>,
    integration: ControllerIntegration,
    period: Duration,
}

impl ControlLoopScheduler {
    /// Validate config, seed both searches from the store, and run the
    /// tempered entry action (zero a nonzero savings rate). Any failure here
    /// is fatal since there is no valid seed state to run from.
    pub async fn start(
        config: ControllerConfig,
        store: Arc<dyn RateStore>,
        metrics: Arc<ControllerMetrics>,
    ) -> Result<(Self, ControllerHandle), ControllerError> {
        config.validate()?;

        let borrow_rate = store
            .read_borrow_rate()
            .await
            .map_err(ControllerError::StartupFailed)?;
        let mut savings_rate = store
            .read_savings_rate()
            .await
            .map_err(ControllerError::StartupFailed)?;

        info!(borrow_rate, savings_rate, "Seeded rates from store");

        if savings_rate != 0 {
            info!(savings_rate, "Tempered mode: resetting savings rate to zero");
            store
                .write_savings_rate(0)
                .await
                .map_err(ControllerError::StartupFailed)?;
            metrics.record_write(RateKind::Savings, 0);
            savings_rate = 0;
        }

        let ctx = ControllerContext::new(&config, borrow_rate, savings_rate);
        if ctx.borrow.last_rate != borrow_rate {
            warn!(
                on_chain = borrow_rate,
                seeded = ctx.borrow.last_rate,
                "Borrow rate outside configured bounds; search seeded at the nearest bound"
            );
        }
        metrics.set_rates(ctx.borrow.last_rate, ctx.savings.last_rate);

        let (integration, handle) = ControllerIntegration::new();
        integration.publish(ControllerSnapshot::capture(&ctx, None));

        let scheduler = Self {
            store,
            evaluator: PegEvaluator::new(config.target_price, config.price_tolerance),
            period: config.rate_adjustment_interval,
            machine: ControllerModeMachine::new(config),
            ctx,
            metrics,
            integration,
        };
        Ok((scheduler, handle))
    }

    pub fn context(&self) -> &ControllerContext {
        &self.ctx
    }

    pub fn metrics(&self) -> Arc<ControllerMetrics> {
        self.metrics.clone()
    }

    /// Run one control iteration.
    pub async fn tick(&mut self) -> Result<TickReport, ControllerError> {
        let price = self
            .store
            .read_price()
            .await
            .map_err(ControllerError::PriceUnavailable)?;
        self.ctx.price_window.push(price);

        let mut report = TickReport {
            price,
            reading: None,
            outcome: StepOutcome::default(),
        };

        if !self.ctx.price_window.is_full() {
            debug!(
                price,
                samples = self.ctx.price_window.len(),
                needed = self.ctx.price_window.capacity(),
                "Filling price window"
            );
            self.finish_tick();
            return Ok(report);
        }

        if !self.ctx.is_initialized {
            self.ctx.is_initialized = true;
            info!(
                samples = self.ctx.price_window.len(),
                "Price window full; controller initialized"
            );
        }

        let Some(reading) = self.evaluator.evaluate(&self.ctx.price_window) else {
            self.finish_tick();
            return Ok(report);
        };
        self.metrics.record_reading(&reading);
        report.reading = Some(reading);

        let borrow_before = self.ctx.borrow.last_rate;
        let outcome = self.machine.step(&mut self.ctx, &reading);
        report.outcome = outcome;

        debug!(
            price,
            deviation = reading.deviation,
            direction = %reading.direction,
            stable = reading.is_stable,
            toward_peg = reading.moving_toward_peg,
            gate = outcome.gate_open,
            "Tick evaluated"
        );

        if outcome.peg_hit {
            self.metrics.record_peg_hit();
            self.integration.emit(ControllerEvent::PegHit {
                peg_hits: self.ctx.peg_hits,
                direction: reading.direction,
            });
        }
        if let Some(cause) = outcome.transition {
            self.integration.emit(ControllerEvent::ModeChanged {
                mode: self.ctx.mode,
                cause,
            });
        }

        for (kind, bps) in write_order(&outcome, borrow_before) {
            self.write(kind, bps).await?;
        }

        self.finish_tick();
        Ok(report)
    }

    /// Drive ticks at the configured interval until `shutdown` fires or its
    /// sender is dropped. A slow tick delays the next one instead of overlapping it.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.period.as_millis() as u64,
            target = self.evaluator.target,
            tolerance = self.evaluator.tolerance,
            "Starting peg controller loop"
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        self.handle_failure(e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Peg controller shutting down");
                    break;
                }
            }
        }
    }

    async fn write(&self, kind: RateKind, bps: u32) -> Result<(), ControllerError> {
        self.store
            .write_rate(kind, bps)
            .await
            .map_err(|source| ControllerError::RateWriteFailed { kind, bps, source })?;
        self.metrics.record_write(kind, bps);
        self.integration
            .emit(ControllerEvent::RateWritten { kind, bps });
        info!(%kind, bps, mode = %self.ctx.mode, "Rate updated");
        Ok(())
    }

    fn finish_tick(&self) {
        self.metrics
            .record_tick(self.ctx.is_initialized, self.ctx.mode);
        self.integration
            .publish(ControllerSnapshot::capture(&self.ctx, None));
    }

    fn handle_failure(&self, err: ControllerError) {
        if err.is_transient() {
            warn!(error = %err, "Tick abandoned");
        } else {
            error!(error = %err, "Tick failed");
        }
        self.metrics.record_failure(&err);
        let reason = err.to_string();
        self.integration.emit(ControllerEvent::TickFailed {
            reason: reason.clone(),
        });
        self.integration
            .publish(ControllerSnapshot::capture(&self.ctx, Some(reason)));
    }
}

/// Order the writes so the on-chain savings rate never overtakes the borrow
/// rate mid-tick: savings goes first when borrow is coming down.
fn write_order(outcome: &StepOutcome, borrow_before: u32) -> Vec<(RateKind, u32)> {
    let borrow = outcome.borrow.map(|bps| (RateKind::Borrow, bps));
    let savings = outcome.savings.map(|bps| (RateKind::Savings, bps));
    let lowering = outcome.borrow.is_some_and(|bps| bps < borrow_before);

    let ordered = if lowering {
        [savings, borrow]
    } else {
        [borrow, savings]
    };
    ordered.into_iter().flatten().collect()
}
