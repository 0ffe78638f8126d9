//! Integration hooks for embedding the controller
//!
//! The scheduler publishes a state snapshot after every tick and broadcasts
//! discrete events (rate writes, mode changes, failures) for anything that
//! wants to react to them, such as the status server.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use super::mode::{ControllerContext, ControllerMode, TransitionCause};
use super::price_window::Direction;
use super::rate_search::{RateKind, SearchBounds};

/// Events emitted by the scheduler
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    RateWritten { kind: RateKind, bps: u32 },
    ModeChanged { mode: ControllerMode, cause: TransitionCause },
    PegHit { peg_hits: u32, direction: Direction },
    TickFailed { reason: String },
}

/// Point-in-time view of the controller context
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub mode: ControllerMode,
    pub is_initialized: bool,
    pub samples: usize,
    pub last_price: Option<f64>,
    pub direction: Direction,
    pub borrow_rate: u32,
    pub borrow_search: SearchBounds,
    pub savings_rate: u32,
    pub savings_search: SearchBounds,
    pub peg_hits: u32,
    pub iterations_since_last_change: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ControllerSnapshot {
    pub fn capture(ctx: &ControllerContext, last_error: Option<String>) -> Self {
        Self {
            mode: ctx.mode,
            is_initialized: ctx.is_initialized,
            samples: ctx.price_window.len(),
            last_price: ctx.price_window.latest(),
            direction: ctx.price_window.direction(),
            borrow_rate: ctx.borrow.last_rate,
            borrow_search: ctx.borrow.search,
            savings_rate: ctx.savings.last_rate,
            savings_search: ctx.savings.search,
            peg_hits: ctx.peg_hits,
            iterations_since_last_change: ctx.iterations_since_last_change,
            last_error,
            updated_at: Utc::now(),
        }
    }
}

/// Publisher side, owned by the scheduler
pub struct ControllerIntegration {
    event_tx: broadcast::Sender<ControllerEvent>,
    snapshot: Arc<RwLock<Option<ControllerSnapshot>>>,
}

impl ControllerIntegration {
    pub fn new() -> (Self, ControllerHandle) {
        let (event_tx, _) = broadcast::channel(256);
        let snapshot = Arc::new(RwLock::new(None));

        let integration = Self {
            event_tx: event_tx.clone(),
            snapshot: snapshot.clone(),
        };
        let handle = ControllerHandle {
            event_rx: event_tx.subscribe(),
            snapshot,
        };
        (integration, handle)
    }

    pub fn publish(&self, snapshot: ControllerSnapshot) {
        *self.snapshot.write() = Some(snapshot);
    }

    pub fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Read side for the rest of the application
pub struct ControllerHandle {
    event_rx: broadcast::Receiver<ControllerEvent>,
    snapshot: Arc<RwLock<Option<ControllerSnapshot>>>,
}

impl ControllerHandle {
    /// Latest snapshot, `None` until the first tick completes.
    pub fn snapshot(&self) -> Option<ControllerSnapshot> {
        self.snapshot.read().clone()
    }

    pub async fn recv_event(&mut self) -> Option<ControllerEvent> {
        loop {
            match self.event_rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv_event(&mut self) -> Option<ControllerEvent> {
        self.event_rx.try_recv().ok()
    }
}

impl Clone for ControllerHandle {
    fn clone(&self) -> Self {
        Self {
            event_rx: self.event_rx.resubscribe(),
            snapshot: self.snapshot.clone(),
        }
    }
}
