//! Peg deviation and stability checks

use serde::Serialize;

use super::price_window::{Direction, PriceWindow};

/// One evaluation of the current price against the peg
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PegReading {
    pub price: f64,
    pub deviation: f64,
    pub direction: Direction,
    pub is_stable: bool,
    pub moving_toward_peg: bool,
}

/// Signed normalized error `(price - target) / target`.
pub fn deviation(price: f64, target: f64) -> f64 {
    (price - target) / target
}

pub fn is_stable(deviation: f64, tolerance: f64) -> bool {
    deviation.abs() <= tolerance
}

/// True when the trend already carries the price back toward the target,
/// i.e. below peg and rising, or above peg and falling.
pub fn is_moving_toward_peg(price: f64, target: f64, direction: Direction) -> bool {
    (target > price && direction == Direction::Up)
        || (target < price && direction == Direction::Down)
}

#[derive(Debug, Clone, Copy)]
pub struct PegEvaluator {
    pub target: f64,
    pub tolerance: f64,
}

impl PegEvaluator {
    pub fn new(target: f64, tolerance: f64) -> Self {
        Self { target, tolerance }
    }

    /// Evaluate the newest sample in `window`. Returns `None` for an empty window.
    pub fn evaluate(&self, window: &PriceWindow) -> Option<PegReading> {
        let price = window.latest()?;
        let direction = window.direction();
        let deviation = deviation(price, self.target);
        Some(PegReading {
            price,
            deviation,
            direction,
            is_stable: is_stable(deviation, self.tolerance),
            moving_toward_peg: is_moving_toward_peg(price, self.target, direction),
        })
    }
}
