//! Scheduler Tests
//!
//! Drive the control loop against a scripted store: a fixed price sequence
//! with injectable read/write failures and a log of every accepted write.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::controller::{
    ControlLoopScheduler, ControllerConfig, ControllerError, ControllerEvent, ControllerMetrics,
    ControllerMode, Direction, RateKind, TransitionCause,
};
use crate::store::RateStore;

// =============================================================================
// SCRIPTED STORE
// =============================================================================

struct ScriptedStore {
    /// `None` entries fail the read
    prices: Mutex<VecDeque<Option<f64>>>,
    fallback_price: f64,
    borrow: u32,
    savings: u32,
    fail_rate_reads: bool,
    failing_writes: Mutex<u32>,
    writes: Mutex<Vec<(RateKind, u32)>>,
}

impl ScriptedStore {
    fn new(prices: Vec<Option<f64>>, borrow: u32, savings: u32) -> Self {
        Self {
            prices: Mutex::new(prices.into()),
            fallback_price: 1.0,
            borrow,
            savings,
            fail_rate_reads: false,
            failing_writes: Mutex::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    fn writes(&self) -> Vec<(RateKind, u32)> {
        self.writes.lock().clone()
    }
}

#[async_trait::async_trait]
impl RateStore for ScriptedStore {
    async fn read_price(&self) -> Result<f64> {
        match self.prices.lock().pop_front() {
            Some(Some(p)) => Ok(p),
            Some(None) => Err(anyhow!("price feed timeout")),
            None => Ok(self.fallback_price),
        }
    }

    async fn read_borrow_rate(&self) -> Result<u32> {
        if self.fail_rate_reads {
            return Err(anyhow!("rpc unreachable"));
        }
        Ok(self.borrow)
    }

    async fn read_savings_rate(&self) -> Result<u32> {
        if self.fail_rate_reads {
            return Err(anyhow!("rpc unreachable"));
        }
        Ok(self.savings)
    }

    async fn write_borrow_rate(&self, bps: u32) -> Result<()> {
        self.write_rate(RateKind::Borrow, bps).await
    }

    async fn write_savings_rate(&self, bps: u32) -> Result<()> {
        self.write_rate(RateKind::Savings, bps).await
    }

    async fn write_rate(&self, kind: RateKind, bps: u32) -> Result<()> {
        let mut failing = self.failing_writes.lock();
        if *failing > 0 {
            *failing -= 1;
            return Err(anyhow!("transaction reverted"));
        }
        self.writes.lock().push((kind, bps));
        Ok(())
    }
}

fn prices(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().map(|&p| Some(p)).collect()
}

fn small_config() -> ControllerConfig {
    ControllerConfig {
        price_window: 3,
        rate_change_delay: 1,
        ..Default::default()
    }
}

async fn start(
    config: ControllerConfig,
    store: Arc<ScriptedStore>,
) -> (ControlLoopScheduler, crate::controller::ControllerHandle) {
    ControlLoopScheduler::start(config, store, Arc::new(ControllerMetrics::new()))
        .await
        .unwrap()
}

// =============================================================================
// STARTUP
// =============================================================================

#[tokio::test]
async fn test_startup_zeroes_savings_rate() {
    let store = Arc::new(ScriptedStore::new(vec![], 1000, 450));
    let (scheduler, handle) = start(small_config(), store.clone()).await;

    assert_eq!(store.writes(), vec![(RateKind::Savings, 0)]);
    assert_eq!(scheduler.context().savings.last_rate, 0);
    assert_eq!(scheduler.context().borrow.last_rate, 1000);
    assert_eq!(scheduler.context().mode, ControllerMode::Tempered);
    assert_eq!(handle.snapshot().unwrap().borrow_rate, 1000);
}

#[tokio::test]
async fn test_startup_leaves_zero_savings_alone() {
    let store = Arc::new(ScriptedStore::new(vec![], 1000, 0));
    start(small_config(), store.clone()).await;
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_startup_fails_without_seed_rates() {
    let mut store = ScriptedStore::new(vec![], 1000, 0);
    store.fail_rate_reads = true;
    let result = ControlLoopScheduler::start(
        small_config(),
        Arc::new(store),
        Arc::new(ControllerMetrics::new()),
    )
    .await;
    assert!(matches!(result, Err(ControllerError::StartupFailed(_))));
}

#[tokio::test]
async fn test_startup_rejects_invalid_config() {
    let store = Arc::new(ScriptedStore::new(vec![], 1000, 0));
    let config = ControllerConfig {
        price_window: 0,
        ..Default::default()
    };
    let result =
        ControlLoopScheduler::start(config, store, Arc::new(ControllerMetrics::new())).await;
    assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
}

// =============================================================================
// TICKS
// =============================================================================

#[tokio::test]
async fn test_window_fills_at_peg_without_changes() {
    let config = ControllerConfig::default();
    let store = Arc::new(ScriptedStore::new(prices(&[1.0; 10]), 1000, 0));
    let (mut scheduler, _handle) = start(config, store.clone()).await;

    for i in 1..=9 {
        let report = scheduler.tick().await.unwrap();
        assert!(report.reading.is_none(), "tick {i} should not evaluate");
        assert!(!scheduler.context().is_initialized);
    }

    let report = scheduler.tick().await.unwrap();
    assert!(scheduler.context().is_initialized);
    let reading = report.reading.unwrap();
    assert_eq!(reading.direction, Direction::Flat);
    assert!(reading.is_stable);
    assert!(!report.outcome.changed());
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_price_failure_is_isolated() {
    let store = Arc::new(ScriptedStore::new(vec![None, Some(1.0)], 1000, 0));
    let (mut scheduler, _handle) = start(small_config(), store).await;

    let err = scheduler.tick().await.unwrap_err();
    assert!(matches!(err, ControllerError::PriceUnavailable(_)));
    assert!(scheduler.context().price_window.is_empty());

    scheduler.tick().await.unwrap();
    assert_eq!(scheduler.context().price_window.len(), 1);
}

#[tokio::test]
async fn test_write_failure_keeps_decided_rate() {
    let config = ControllerConfig {
        rate_change_delay: 0,
        ..small_config()
    };
    let store = Arc::new(ScriptedStore::new(prices(&[1.0, 1.01, 1.02]), 1000, 0));
    *store.failing_writes.lock() = 1;
    let (mut scheduler, _handle) = start(config, store.clone()).await;

    scheduler.tick().await.unwrap();
    scheduler.tick().await.unwrap();
    let err = scheduler.tick().await.unwrap_err();

    match err {
        ControllerError::RateWriteFailed { kind, bps, .. } => {
            assert_eq!(kind, RateKind::Borrow);
            assert_eq!(bps, 600);
        }
        other => panic!("unexpected error: {other}"),
    }
    // No rollback
    assert_eq!(scheduler.context().borrow.last_rate, 600);
    assert_eq!(scheduler.context().iterations_since_last_change, 0);
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_growth_writes_savings_before_lowering_borrow() {
    let mut sequence = vec![1.0; 6];
    sequence.extend([1.02, 1.02]);
    let store = Arc::new(ScriptedStore::new(prices(&sequence), 1000, 0));
    let (mut scheduler, mut handle) = start(small_config(), store.clone()).await;

    for _ in 0..6 {
        scheduler.tick().await.unwrap();
    }
    assert_eq!(scheduler.context().mode, ControllerMode::Growth);
    assert_eq!(store.writes(), vec![(RateKind::Savings, 900)]);

    let mut saw_transition = false;
    while let Some(event) = handle.try_recv_event() {
        if let ControllerEvent::ModeChanged { cause, .. } = event {
            assert_eq!(cause, TransitionCause::Stability);
            saw_transition = true;
        }
    }
    assert!(saw_transition);

    // Delay gate holds the first off-peg tick
    let report = scheduler.tick().await.unwrap();
    assert!(!report.outcome.gate_open);

    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.outcome.borrow, Some(950));
    assert_eq!(report.outcome.savings, Some(550));
    assert_eq!(
        store.writes(),
        vec![
            (RateKind::Savings, 900),
            (RateKind::Savings, 550),
            (RateKind::Borrow, 950),
        ]
    );
    let ctx = scheduler.context();
    assert_eq!(ctx.borrow.search.low, 900);
    assert!(ctx.savings.last_rate + 100 <= ctx.borrow.last_rate);
}

// =============================================================================
// RUN LOOP
// =============================================================================

#[tokio::test]
async fn test_run_survives_failures_and_stops_on_shutdown() {
    let config = ControllerConfig {
        rate_adjustment_interval: Duration::from_millis(5),
        ..small_config()
    };
    let store = Arc::new(ScriptedStore::new(vec![None, None], 1000, 0));
    let metrics = Arc::new(ControllerMetrics::new());
    let (scheduler, handle) = ControlLoopScheduler::start(config, store, metrics.clone())
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("loop did not stop")
        .unwrap();

    assert_eq!(metrics.tick_failures_total.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.price_read_failures_total.load(Ordering::Relaxed), 2);
    assert!(metrics.ticks_total.load(Ordering::Relaxed) >= 3);

    let snap = handle.snapshot().unwrap();
    assert!(snap.is_initialized);
    assert!(snap.last_error.is_none());
}
