//! Decision orchestrator: the retry-until-decisive loop.
//!
//! One run walks COLLECTING -> REQUESTING -> EVALUATING per attempt. A LONG
//! or SHORT answer ends the run; WAIT, a failed collection, a failed oracle
//! call or a malformed answer all consume one attempt, then the loop sleeps
//! for the configured delay and starts over. When the attempts or the
//! overall wall-clock budget run out, a WAIT fallback with zero confidence
//! is returned. The loop never returns an error to its caller.
//!
//! Suspension points are exactly the market-data collection, the oracle
//! call and the inter-attempt delay.

use crate::oracle::contract::DecisionContract;
use crate::oracle::data_sources::MarketDataSource;
use crate::oracle::errors::EngineError;
use crate::oracle::features::MicroFeatureCalculator;
use crate::oracle::llm_client::DecisionOracle;
use crate::oracle::metrics::EngineMetrics;
use crate::oracle::types::{
    Decision, Direction, EngineConfig, MicroData, StrategyParameters, VolatilityAnalysis,
};
use crate::oracle::volatility::{returns_from_candles, VolatilityModel};
use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, info, instrument, warn};

/// Why an attempt did not produce a decisive signal.
#[derive(Debug)]
enum AttemptError {
    /// The oracle answered WAIT
    Undecided,
    Failed(EngineError),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Undecided => f.write_str("oracle answered WAIT"),
            AttemptError::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Inputs gathered during COLLECTING.
struct MarketSnapshot {
    micro_data: MicroData,
    volatility: Option<VolatilityAnalysis>,
}

/// Drives collection, oracle requests and retries for one symbol at a time.
///
/// Holds no per-run state, so a single instance behind an `Arc` can serve
/// concurrent runs for different symbols.
pub struct DecisionOrchestrator {
    market_data: Arc<dyn MarketDataSource>,
    oracle: Arc<dyn DecisionOracle>,
    config: EngineConfig,
    strategy: StrategyParameters,
    features: MicroFeatureCalculator,
    volatility: VolatilityModel,
    contract: DecisionContract,
    metrics: Arc<EngineMetrics>,
}

impl DecisionOrchestrator {
    /// Create an orchestrator with injected collaborators.
    pub fn new(
        market_data: Arc<dyn MarketDataSource>,
        oracle: Arc<dyn DecisionOracle>,
        config: EngineConfig,
        strategy: StrategyParameters,
    ) -> Result<Self> {
        config.validate()?;
        strategy.validate()?;

        info!(
            "Created DecisionOrchestrator: {} attempts, {} ms delay, {} ms budget",
            config.max_retries, config.retry_delay_ms, config.overall_timeout_ms
        );

        Ok(Self {
            market_data,
            oracle,
            features: MicroFeatureCalculator::new(config.wick_window),
            volatility: VolatilityModel::new(),
            contract: DecisionContract::default(),
            metrics: Arc::new(EngineMetrics::new()),
            config,
            strategy,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn strategy(&self) -> &StrategyParameters {
        &self.strategy
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    /// Run attempts until the oracle gives a decisive signal, or return the
    /// fallback decision once the attempts or the time budget are exhausted.
    #[instrument(skip(self))]
    pub async fn run_until_signal(&self, symbol: &str) -> Decision {
        self.metrics.record_run();
        let started = Instant::now();
        let max_attempts = self.config.max_retries;

        let attempts = AtomicUsize::new(0);
        let attempts_ref = &attempts;
        let delays = FixedInterval::new(self.config.retry_delay()).take(max_attempts - 1);
        let retry_loop = Retry::spawn(delays, move || {
            let attempt = attempts_ref.fetch_add(1, Ordering::Relaxed) + 1;
            self.run_attempt(symbol, attempt)
        });

        let outcome = tokio::time::timeout(self.config.overall_timeout(), retry_loop).await;
        let used = attempts.load(Ordering::Relaxed);

        match outcome {
            Ok(Ok(decision)) => {
                info!(
                    "Decided {} for {} after {} attempt(s) in {:?} (confidence {:.2})",
                    decision.direction,
                    symbol,
                    used,
                    started.elapsed(),
                    decision.confidence
                );
                decision
            }
            Ok(Err(last)) => {
                warn!(
                    "No decisive signal for {} after {} attempts (last: {}), falling back to WAIT",
                    symbol, used, last
                );
                self.fallback(format!("No decisive signal after {} attempts", used))
            }
            Err(_) => {
                self.metrics.record_budget_expired();
                warn!(
                    "Time budget of {} ms exhausted for {} during attempt {}, falling back to WAIT",
                    self.config.overall_timeout_ms, symbol, used
                );
                self.fallback(format!(
                    "Time budget of {} ms exhausted after {} attempt(s)",
                    self.config.overall_timeout_ms, used
                ))
            }
        }
    }

    /// One COLLECTING -> REQUESTING -> EVALUATING pass. Anything other than a
    /// decisive answer is an error so the retry loop continues.
    async fn run_attempt(&self, symbol: &str, attempt: usize) -> Result<Decision, AttemptError> {
        self.metrics.record_attempt();
        debug!("Attempt {}/{} for {}: collecting", attempt, self.config.max_retries, symbol);

        let snapshot = match self.collect(symbol).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.metrics.record_collection_failure();
                warn!("Attempt {} for {}: {}", attempt, symbol, e);
                return self.retrying(symbol, attempt, AttemptError::Failed(e));
            }
        };

        debug!("Attempt {} for {}: requesting decision", attempt, symbol);
        let request =
            self.contract
                .build_request(&snapshot.micro_data, &self.strategy, snapshot.volatility.as_ref());
        let response = match self.oracle.request_decision(&request).await {
            Ok(response) => response,
            Err(e) => {
                let e = EngineError::oracle(e);
                self.metrics.record_oracle_failure();
                warn!("Attempt {} for {}: {}", attempt, symbol, e);
                return self.retrying(symbol, attempt, AttemptError::Failed(e));
            }
        };

        let decision = match self.contract.parse_response(response.as_ref(), &self.strategy) {
            Ok(decision) => decision,
            Err(e) => {
                self.metrics.record_invalid_response();
                warn!("Attempt {} for {}: {}, treating as WAIT", attempt, symbol, e);
                return self.retrying(symbol, attempt, AttemptError::Failed(e));
            }
        };

        let mismatches = DecisionContract::check_types(response.as_ref());
        if !mismatches.is_empty() {
            warn!(
                "Oracle answer for {} has mistyped fields, defaults used: {}",
                symbol,
                mismatches.join("; ")
            );
        }

        match decision.direction {
            Direction::Long | Direction::Short => {
                let violations = DecisionContract::check_ranges(&decision);
                if !violations.is_empty() {
                    warn!(
                        "Decisive answer for {} is out of range: {}",
                        symbol,
                        violations.join("; ")
                    );
                }
                self.metrics.record_decisive();
                Ok(decision)
            }
            Direction::Wait => {
                self.metrics.record_wait();
                info!(
                    "Attempt {} for {}: oracle answered WAIT ({})",
                    attempt, symbol, decision.reasoning
                );
                self.retrying(symbol, attempt, AttemptError::Undecided)
            }
        }
    }

    fn retrying(&self, symbol: &str, attempt: usize, error: AttemptError) -> Result<Decision, AttemptError> {
        if attempt < self.config.max_retries {
            debug!(
                "Retrying {} in {} ms ({} attempt(s) left)",
                symbol,
                self.config.retry_delay_ms,
                self.config.max_retries - attempt
            );
        }
        Err(error)
    }

    /// Fetch candles, price and depth as a single suspension point, then
    /// derive the micro features and the volatility analysis.
    ///
    /// `try_join!` polls in argument order; candles go first so a feed that
    /// advances on a candle request reports a price that includes it.
    async fn collect(&self, symbol: &str) -> Result<MarketSnapshot, EngineError> {
        let (candles, last_price, book) = tokio::try_join!(
            self.market_data
                .get_recent_candles(symbol, self.config.candle_count),
            self.market_data.get_current_price(symbol),
            self.market_data
                .get_order_book_depth(symbol, self.config.order_book_levels),
        )
        .map_err(EngineError::collection)?;

        if !(last_price > 0.0) {
            return Err(EngineError::CollectionFailure(format!(
                "non-positive price {} for {}",
                last_price, symbol
            )));
        }

        let returns = returns_from_candles(&candles);
        let volatility = match self
            .volatility
            .analyze(&returns, self.config.forecast_horizon)
        {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                warn!("Volatility analysis skipped for {}: {}", symbol, e);
                None
            }
        };

        Ok(MarketSnapshot {
            micro_data: self.features.micro_data(symbol, last_price, &book, candles),
            volatility,
        })
    }

    /// Safe default once the retry or time budget is exhausted.
    fn fallback(&self, reasoning: String) -> Decision {
        self.metrics.record_fallback();
        Decision {
            direction: Direction::Wait,
            sigma: self.config.default_sigma,
            take_profit_pnl_click: self.strategy.take_profit_pnl_click,
            confidence: self.config.default_confidence,
            reasoning,
        }
    }
}
