//! Rolling price window and two-point trend direction

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Price trend over the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        };
        f.write_str(s)
    }
}

/// Fixed-capacity FIFO of the most recent price samples
#[derive(Debug, Clone)]
pub struct PriceWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl PriceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest once past capacity.
    pub fn push(&mut self, sample: f64) {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Compares the oldest sample to the newest. Anything short of a full
    /// window reads as `Flat`.
    pub fn direction(&self) -> Direction {
        if !self.is_full() {
            return Direction::Flat;
        }
        match (self.oldest(), self.latest()) {
            (Some(oldest), Some(newest)) if oldest < newest => Direction::Up,
            (Some(oldest), Some(newest)) if oldest > newest => Direction::Down,
            _ => Direction::Flat,
        }
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn oldest(&self) -> Option<f64> {
        self.samples.front().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(samples: &[f64]) -> PriceWindow {
        let mut w = PriceWindow::new(samples.len());
        for &s in samples {
            w.push(s);
        }
        w
    }

    #[test]
    fn test_flat_until_full() {
        let mut w = PriceWindow::new(3);
        w.push(1.0);
        w.push(2.0);
        assert!(!w.is_full());
        assert_eq!(w.direction(), Direction::Flat);
        w.push(3.0);
        assert_eq!(w.direction(), Direction::Up);
    }

    #[test]
    fn test_evicts_oldest() {
        let mut w = PriceWindow::new(3);
        for s in [5.0, 1.0, 2.0, 3.0] {
            w.push(s);
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.oldest(), Some(1.0));
        assert_eq!(w.latest(), Some(3.0));
    }

    #[test]
    fn test_two_point_comparison_ignores_middle() {
        // Middle samples swing wildly but only the endpoints count
        assert_eq!(filled(&[1.0, 9.0, 0.1, 1.01]).direction(), Direction::Up);
        assert_eq!(filled(&[1.01, 0.1, 9.0, 1.0]).direction(), Direction::Down);
        assert_eq!(filled(&[1.0, 9.0, 0.1, 1.0]).direction(), Direction::Flat);
    }

    #[test]
    fn test_identical_samples_are_flat() {
        assert_eq!(filled(&[1.0; 10]).direction(), Direction::Flat);
    }
}
