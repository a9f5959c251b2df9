//! End-to-end tests for the retry-until-decisive loop

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use volsignal::oracle::{
    DecisionOracle, DecisionRequest, Direction, EngineBuilder, MarketDataSource,
};
use volsignal::{BookLevel, Candle, OrderBookDepth};

/// Market feed with a fixed book and a gently oscillating candle series.
struct StubMarket {
    fail: bool,
    calls: AtomicUsize,
}

impl StubMarket {
    fn healthy() -> Self {
        Self { fail: false, calls: AtomicUsize::new(0) }
    }

    fn failing() -> Self {
        Self { fail: true, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl MarketDataSource for StubMarket {
    async fn get_current_price(&self, _symbol: &str) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("exchange unavailable"));
        }
        Ok(42_000.0)
    }

    async fn get_recent_candles(&self, _symbol: &str, count: usize) -> Result<Vec<Candle>> {
        let start = Utc::now() - ChronoDuration::minutes(count as i64);
        Ok((0..count)
            .map(|i| {
                let open = 42_000.0 + ((i * 5) % 7) as f64 * 15.0;
                let close = open + if i % 2 == 0 { 20.0 } else { -12.0 };
                Candle {
                    open_time: start + ChronoDuration::minutes(i as i64),
                    open,
                    high: open.max(close) + 8.0,
                    low: open.min(close) - 6.0,
                    close,
                    volume: 3.5,
                }
            })
            .collect())
    }

    async fn get_order_book_depth(&self, _symbol: &str, levels: usize) -> Result<OrderBookDepth> {
        Ok(OrderBookDepth {
            bids: (0..levels)
                .map(|i| BookLevel { price: 41_999.0 - i as f64, quantity: 1.0 })
                .collect(),
            asks: (0..levels)
                .map(|i| BookLevel { price: 42_001.0 + i as f64, quantity: 1.5 })
                .collect(),
        })
    }
}

/// Oracle that answers WAIT until `decisive_on` (1-based), then LONG.
struct StubOracle {
    decisive_on: Option<usize>,
    /// Simulated thinking time per call
    latency: Duration,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl StubOracle {
    fn always_wait() -> Self {
        Self::new(None, Duration::ZERO)
    }

    fn long_on(attempt: usize) -> Self {
        Self::new(Some(attempt), Duration::ZERO)
    }

    fn new(decisive_on: Option<usize>, latency: Duration) -> Self {
        Self {
            decisive_on,
            latency,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionOracle for StubOracle {
    async fn request_decision(&self, _request: &DecisionRequest) -> Result<Option<Value>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.call_times.lock().unwrap().push(Instant::now());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let tendance = match self.decisive_on {
            Some(n) if call >= n => "LONG",
            _ => "WAIT",
        };
        Ok(Some(json!({
            "tendance": tendance,
            "sigma": 0.003,
            "takeProfitPnlClick": 0.0015,
            "confidence": 0.75,
            "reasoning": format!("call {}", call)
        })))
    }
}

const DELAY_MS: u64 = 1_000;
const MAX_RETRIES: usize = 4;

fn builder() -> EngineBuilder {
    EngineBuilder::new()
        .with_retry_delay_ms(DELAY_MS)
        .with_max_retries(MAX_RETRIES)
        .with_overall_timeout_ms(60_000)
        .with_fallback(0.003, 0.0)
        .with_market_window(30, 10)
}

#[tokio::test(start_paused = true)]
async fn test_always_wait_exhausts_retries_and_falls_back() {
    let oracle = Arc::new(StubOracle::always_wait());
    let orchestrator = builder()
        .build(Arc::new(StubMarket::healthy()), oracle.clone())
        .expect("Failed to build orchestrator");

    let started = Instant::now();
    let decision = orchestrator.run_until_signal("BTCUSDT").await;

    assert_eq!(decision.direction, Direction::Wait);
    assert_eq!(decision.confidence, 0.0);
    assert_eq!(decision.sigma, 0.003);
    assert_eq!(oracle.calls(), MAX_RETRIES);

    // one delay between consecutive attempts, none after the last
    let call_times = oracle.call_times.lock().unwrap();
    for pair in call_times.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(DELAY_MS));
    }
    assert_eq!(
        started.elapsed(),
        Duration::from_millis(DELAY_MS * (MAX_RETRIES as u64 - 1))
    );

    let snapshot = orchestrator.metrics().snapshot();
    assert_eq!(snapshot.attempts, MAX_RETRIES as u64);
    assert_eq!(snapshot.waits, MAX_RETRIES as u64);
    assert_eq!(snapshot.fallbacks, 1);
    assert_eq!(snapshot.decisive, 0);
}

#[tokio::test(start_paused = true)]
async fn test_long_on_second_attempt() {
    let oracle = Arc::new(StubOracle::long_on(2));
    let orchestrator = builder()
        .build(Arc::new(StubMarket::healthy()), oracle.clone())
        .expect("Failed to build orchestrator");

    let started = Instant::now();
    let decision = orchestrator.run_until_signal("BTCUSDT").await;

    assert_eq!(decision.direction, Direction::Long);
    assert_eq!(decision.sigma, 0.003);
    assert_eq!(decision.take_profit_pnl_click, 0.0015);
    assert_eq!(decision.confidence, 0.75);
    assert_eq!(decision.reasoning, "call 2");
    assert_eq!(oracle.calls(), 2);
    // exactly one delay, nothing after the decisive answer
    assert_eq!(started.elapsed(), Duration::from_millis(DELAY_MS));

    let snapshot = orchestrator.metrics().snapshot();
    assert_eq!(snapshot.attempts, 2);
    assert_eq!(snapshot.decisive, 1);
    assert_eq!(snapshot.fallbacks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_collection_failures_consume_retries() {
    let market = Arc::new(StubMarket::failing());
    let oracle = Arc::new(StubOracle::long_on(1));
    let orchestrator = builder()
        .build(market.clone(), oracle.clone())
        .expect("Failed to build orchestrator");

    let decision = orchestrator.run_until_signal("BTCUSDT").await;

    assert_eq!(decision.direction, Direction::Wait);
    assert_eq!(decision.confidence, 0.0);
    assert_eq!(oracle.calls(), 0);
    assert_eq!(market.calls.load(Ordering::SeqCst), MAX_RETRIES);
    assert_eq!(
        orchestrator.metrics().snapshot().collection_failures,
        MAX_RETRIES as u64
    );
}

#[tokio::test(start_paused = true)]
async fn test_overall_budget_stops_new_attempts() {
    // each oracle call takes 10s; the budget expires during the second call
    let oracle = Arc::new(StubOracle::new(None, Duration::from_secs(10)));
    let orchestrator = builder()
        .with_overall_timeout_ms(15_000)
        .build(Arc::new(StubMarket::healthy()), oracle.clone())
        .expect("Failed to build orchestrator");

    let started = Instant::now();
    let decision = orchestrator.run_until_signal("ETHUSDT").await;

    assert_eq!(decision.direction, Direction::Wait);
    assert_eq!(decision.confidence, 0.0);
    assert_eq!(oracle.calls(), 2);
    assert_eq!(started.elapsed(), Duration::from_secs(15));

    let snapshot = orchestrator.metrics().snapshot();
    assert_eq!(snapshot.budget_expirations, 1);
    assert_eq!(snapshot.fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_symbols_are_independent() {
    let oracle = Arc::new(StubOracle::long_on(1));
    let orchestrator = Arc::new(
        builder()
            .build(Arc::new(StubMarket::healthy()), oracle.clone())
            .expect("Failed to build orchestrator"),
    );

    let handles: Vec<_> = ["BTCUSDT", "ETHUSDT", "SOLUSDT"]
        .into_iter()
        .map(|symbol| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run_until_signal(symbol).await })
        })
        .collect();

    for handle in handles {
        let decision = handle.await.expect("orchestration task panicked");
        assert_eq!(decision.direction, Direction::Long);
    }

    assert_eq!(oracle.calls(), 3);
    let snapshot = orchestrator.metrics().snapshot();
    assert_eq!(snapshot.runs, 3);
    assert_eq!(snapshot.decisive, 3);
}
