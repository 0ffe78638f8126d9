//! Damped bisection search over a bounded rate domain
//!
//! Each non-stable step halves the distance between the previous probe and
//! the side of the search interval indicated by the price direction. The
//! bound on the rejected side is not snapped to the new probe; it is set to
//! the previous probe plus a fixed slack so the interval keeps room to
//! reverse. Once the interval is too narrow to make progress it is
//! recentered around its midpoint.
//!
//! All rates are integer basis points.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Below this gap (bps) the search has converged too tightly to continue
pub const DEGENERATE_GAP_BPS: u32 = 10;
/// Half-width of the interval rebuilt by a recentering step
pub const RECENTER_HALF_WIDTH_BPS: u32 = 50;
/// Slack added to the rejected probe when it becomes the new bound
pub const REJECTED_RATE_SLACK_BPS: u32 = 100;

/// Which on-chain rate a search instance drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateKind {
    Borrow,
    Savings,
}

impl fmt::Display for RateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateKind::Borrow => f.write_str("borrow"),
            RateKind::Savings => f.write_str("savings"),
        }
    }
}

/// Hard limits a rate may never leave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBounds {
    pub min: u32,
    pub max: u32,
}

/// Current bisection interval, always inside the absolute bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub low: u32,
    pub high: u32,
}

impl SearchBounds {
    pub fn gap(&self) -> u32 {
        self.high.saturating_sub(self.low)
    }
}

impl From<RateBounds> for SearchBounds {
    fn from(b: RateBounds) -> Self {
        Self {
            low: b.min,
            high: b.max,
        }
    }
}

/// What a recentering step does with a `last_rate` left outside the new interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecenterPolicy {
    /// Leave the rate where it is; the next search step pulls it back.
    #[default]
    KeepLastRate,
    /// Clamp the rate into the recentered interval. This counts as a rate change.
    ClampIntoBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateSearchState {
    pub absolute: RateBounds,
    pub search: SearchBounds,
    pub last_rate: u32,
    #[serde(skip)]
    pub recenter: RecenterPolicy,
}

impl RateSearchState {
    /// Fresh search spanning the whole absolute range.
    pub fn new(absolute: RateBounds, last_rate: u32, recenter: RecenterPolicy) -> Self {
        Self {
            absolute,
            search: absolute.into(),
            last_rate,
            recenter,
        }
    }

    /// One bisection step. Returns the rate to apply and the successor state;
    /// `self` is left untouched.
    ///
    /// `Up` and `Flat` both mean the price sits too high, so the rate moves
    /// down; `Down` moves it up.
    pub fn next_rate(&self, direction: super::Direction, is_stable: bool) -> (u32, Self) {
        use super::Direction;

        let mut next = *self;

        if is_stable {
            next.search = self.absolute.into();
            return (self.last_rate, next);
        }

        if self.search.gap() < DEGENERATE_GAP_BPS {
            let mid = midpoint(self.search.low, self.search.high);
            next.search = SearchBounds {
                low: mid
                    .saturating_sub(RECENTER_HALF_WIDTH_BPS)
                    .max(self.absolute.min),
                high: mid
                    .saturating_add(RECENTER_HALF_WIDTH_BPS)
                    .min(self.absolute.max),
            };
            if self.recenter == RecenterPolicy::ClampIntoBounds {
                next.last_rate = self.last_rate.clamp(next.search.low, next.search.high);
            }
            return (next.last_rate, next);
        }

        let last = self.last_rate;
        let new_rate = match direction {
            Direction::Up | Direction::Flat => {
                let rate = midpoint(self.search.low, last);
                next.search.high = last
                    .saturating_add(REJECTED_RATE_SLACK_BPS)
                    .min(self.absolute.max)
                    .max(self.search.low);
                rate
            }
            Direction::Down => {
                let rate = midpoint(last, self.search.high);
                next.search.low = last
                    .saturating_sub(REJECTED_RATE_SLACK_BPS)
                    .max(self.absolute.min)
                    .min(self.search.high);
                rate
            }
        };
        next.last_rate = new_rate;
        (new_rate, next)
    }

    /// Lower both the absolute ceiling and the search ceiling to `ceiling`.
    pub fn set_ceiling(&mut self, ceiling: u32) {
        let ceiling = ceiling.max(self.absolute.min);
        self.absolute.max = ceiling;
        self.search.high = ceiling;
        self.search.low = self.search.low.min(ceiling);
    }

    /// Move the search floor, keeping it inside `[absolute.min, search.high]`.
    pub fn set_search_floor(&mut self, floor: u32) {
        self.search.low = floor.max(self.absolute.min).min(self.search.high);
    }

    pub fn bounds_hold(&self) -> bool {
        self.absolute.min <= self.search.low
            && self.search.low <= self.search.high
            && self.search.high <= self.absolute.max
    }
}

/// Floor of the mean, computed wide so large bounds cannot overflow.
fn midpoint(a: u32, b: u32) -> u32 {
    ((a as u64 + b as u64) / 2) as u32
}
