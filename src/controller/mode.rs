//! Tempered/growth mode machine
//!
//! Tempered mode steers only the borrow rate with savings pinned at zero.
//! Growth mode additionally drives a savings rate that trails the borrow
//! rate by at least the configured spread. There is no way back from growth
//! within a run.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::ControllerConfig;
use super::peg::PegReading;
use super::price_window::{Direction, PriceWindow};
use super::rate_search::RateSearchState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerMode {
    Tempered,
    Growth,
}

impl fmt::Display for ControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerMode::Tempered => f.write_str("tempered"),
            ControllerMode::Growth => f.write_str("growth"),
        }
    }
}

/// Why the controller left tempered mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Enough trend reversals were seen while intervening
    PegHits,
    /// Price held on peg with no rate change for twice the change delay
    Stability,
}

/// Rate changes and events produced by one step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub borrow: Option<u32>,
    pub savings: Option<u32>,
    pub transition: Option<TransitionCause>,
    pub peg_hit: bool,
    pub gate_open: bool,
}

impl StepOutcome {
    pub fn changed(&self) -> bool {
        self.borrow.is_some() || self.savings.is_some()
    }
}

/// All mutable controller state. Lives as long as the process; never persisted.
#[derive(Debug, Clone)]
pub struct ControllerContext {
    pub price_window: PriceWindow,
    pub iterations_since_last_change: u32,
    pub is_initialized: bool,
    pub mode: ControllerMode,
    pub peg_hits: u32,
    /// Most recent non-flat direction seen while the change gate was open
    pub last_direction: Option<Direction>,
    pub borrow: RateSearchState,
    pub savings: RateSearchState,
}

impl ControllerContext {
    /// Seed from the rates currently on chain. The borrow seed is clamped into
    /// its absolute bounds; the savings seed is kept as read.
    pub fn new(config: &ControllerConfig, borrow_rate: u32, savings_rate: u32) -> Self {
        let borrow_bounds = config.borrow_bounds();
        Self {
            price_window: PriceWindow::new(config.price_window),
            iterations_since_last_change: 0,
            is_initialized: false,
            mode: ControllerMode::Tempered,
            peg_hits: 0,
            last_direction: None,
            borrow: RateSearchState::new(
                borrow_bounds,
                borrow_rate.clamp(borrow_bounds.min, borrow_bounds.max),
                config.recenter_policy,
            ),
            savings: RateSearchState::new(
                config.savings_bounds(),
                savings_rate,
                config.recenter_policy,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerModeMachine {
    config: ControllerConfig,
}

impl ControllerModeMachine {
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Largest savings rate allowed under the current borrow rate.
    pub fn max_savings_rate(&self, borrow_rate: u32) -> u32 {
        borrow_rate
            .saturating_sub(self.config.rate_spread)
            .max(self.config.savings_rate_min)
    }

    /// Gate for any rate change: off peg, not self-correcting, delay elapsed.
    pub fn should_change_rate(&self, ctx: &ControllerContext, reading: &PegReading) -> bool {
        reading.deviation.abs() > self.config.price_tolerance
            && !reading.moving_toward_peg
            && ctx.iterations_since_last_change >= self.config.rate_change_delay
    }

    /// Advance the machine by one evaluated tick. All decided rates are
    /// already applied to `ctx` when this returns; writing them out is the
    /// caller's job.
    pub fn step(&self, ctx: &mut ControllerContext, reading: &PegReading) -> StepOutcome {
        let gate_open = self.should_change_rate(ctx, reading);
        let mut outcome = StepOutcome {
            gate_open,
            ..Default::default()
        };

        if ctx.mode == ControllerMode::Tempered {
            if reading.is_stable
                && ctx.iterations_since_last_change
                    > self.config.rate_change_delay.saturating_mul(2)
            {
                self.enter_growth_on_stability(ctx, &mut outcome);
                return outcome;
            }
            if gate_open {
                self.track_peg_hits(ctx, reading.direction, &mut outcome);
            }
        }

        if !gate_open {
            ctx.iterations_since_last_change =
                ctx.iterations_since_last_change.saturating_add(1);
            return outcome;
        }

        let (borrow_rate, borrow_next) = ctx.borrow.next_rate(reading.direction, false);
        let borrow_changed = borrow_rate != ctx.borrow.last_rate;
        ctx.borrow = borrow_next;
        if borrow_changed {
            outcome.borrow = Some(borrow_rate);
        }

        if ctx.mode == ControllerMode::Growth && borrow_changed {
            self.couple_savings(ctx, reading.direction, &mut outcome);
        }

        if outcome.changed() {
            ctx.iterations_since_last_change = 0;
        } else {
            ctx.iterations_since_last_change =
                ctx.iterations_since_last_change.saturating_add(1);
        }

        debug!(
            mode = %ctx.mode,
            direction = %reading.direction,
            borrow = ctx.borrow.last_rate,
            savings = ctx.savings.last_rate,
            low = ctx.borrow.search.low,
            high = ctx.borrow.search.high,
            "Search step"
        );
        outcome
    }

    fn track_peg_hits(
        &self,
        ctx: &mut ControllerContext,
        direction: Direction,
        outcome: &mut StepOutcome,
    ) {
        if direction == Direction::Flat {
            return;
        }
        if ctx.last_direction.is_some_and(|prev| prev != direction) {
            ctx.peg_hits += 1;
            outcome.peg_hit = true;
            info!(peg_hits = ctx.peg_hits, %direction, "Peg hit");
        }
        ctx.last_direction = Some(direction);

        if ctx.peg_hits >= self.config.peg_hit_threshold {
            ctx.mode = ControllerMode::Growth;
            ctx.borrow.search.low = ctx.borrow.absolute.min;
            outcome.transition = Some(TransitionCause::PegHits);
            info!(
                peg_hits = ctx.peg_hits,
                borrow = ctx.borrow.last_rate,
                "Entering growth mode after peg hits; \
                 no transition back to tempered is defined"
            );
        }
    }

    fn enter_growth_on_stability(&self, ctx: &mut ControllerContext, outcome: &mut StepOutcome) {
        let seed = self.max_savings_rate(ctx.borrow.last_rate);
        ctx.mode = ControllerMode::Growth;
        ctx.savings.set_ceiling(seed);
        ctx.savings.last_rate = seed;
        ctx.borrow.set_search_floor(seed);
        ctx.iterations_since_last_change = 0;

        outcome.savings = Some(seed);
        outcome.transition = Some(TransitionCause::Stability);
        info!(
            borrow = ctx.borrow.last_rate,
            savings = seed,
            "Entering growth mode after sustained stability; \
             no transition back to tempered is defined"
        );
    }

    fn couple_savings(
        &self,
        ctx: &mut ControllerContext,
        direction: Direction,
        outcome: &mut StepOutcome,
    ) {
        let ceiling = self.max_savings_rate(ctx.borrow.last_rate);
        ctx.savings.set_ceiling(ceiling);

        let (raw, savings_next) = ctx.savings.next_rate(direction, false);
        let savings_rate = raw.clamp(self.config.savings_rate_min, ceiling);
        let previous = ctx.savings.last_rate;
        ctx.savings = savings_next;
        ctx.savings.last_rate = savings_rate;
        if savings_rate != previous {
            outcome.savings = Some(savings_rate);
        }

        let floor = ctx.borrow.search.low.max(savings_rate);
        ctx.borrow.set_search_floor(floor);
    }
}
