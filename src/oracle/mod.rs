//! Oracle module - volatility/decision engine.
//!
//! Micro-market features and a GARCH-style volatility model feed a request
//! to an external reasoning oracle; the orchestrator retries until the
//! oracle gives a decisive LONG/SHORT answer or falls back to WAIT.

pub mod types;
pub mod errors;
pub mod features;
pub mod volatility;
pub mod contract;
pub mod data_sources;
pub mod llm_client;
pub mod metrics;
pub mod orchestrator;

// Re-export the primary entry point and main types
pub use orchestrator::DecisionOrchestrator;
pub use types::{
    Decision, Direction, EngineConfig, MicroData, MicroFeatures, RiskTolerance,
    StrategyParameters, VolatilityAnalysis, VolatilityForecast, VolatilityParameters,
    VolatilityRegime,
};

// Re-export other key components for advanced usage
pub use contract::{DecisionContract, DecisionRequest};
pub use data_sources::{BinanceMarketData, MarketDataSource, SimulatedMarketData};
pub use errors::EngineError;
pub use features::MicroFeatureCalculator;
pub use llm_client::{DecisionOracle, HttpDecisionOracle};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use volatility::{returns_from_candles, VolatilityModel};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Engine builder for convenient construction with sensible defaults.
pub struct EngineBuilder {
    config: EngineConfig,
    strategy: StrategyParameters,
}

impl EngineBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            strategy: StrategyParameters::default(),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: EngineConfig) -> Self {
        Self {
            config,
            strategy: StrategyParameters::default(),
        }
    }

    /// Set the delay between attempts.
    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.retry_delay_ms = delay_ms;
        self
    }

    /// Set the maximum number of attempts.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the wall-clock budget across all attempts.
    pub fn with_overall_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.overall_timeout_ms = timeout_ms;
        self
    }

    /// Set the sigma and confidence reported by the fallback decision.
    pub fn with_fallback(mut self, sigma: f64, confidence: f64) -> Self {
        self.config.default_sigma = sigma;
        self.config.default_confidence = confidence;
        self
    }

    /// Set how much market data each attempt collects.
    pub fn with_market_window(mut self, candle_count: usize, order_book_levels: usize) -> Self {
        self.config.candle_count = candle_count;
        self.config.order_book_levels = order_book_levels;
        self
    }

    /// Set the volatility forecast horizon.
    pub fn with_forecast_horizon(mut self, horizon: usize) -> Self {
        self.config.forecast_horizon = horizon;
        self
    }

    /// Set the oracle endpoint and model.
    pub fn with_oracle(mut self, base_url: String, model: String, api_key: Option<String>) -> Self {
        self.config.oracle_base_url = base_url;
        self.config.oracle_model = model;
        self.config.oracle_api_key = api_key;
        self
    }

    /// Set the exchange REST endpoint.
    pub fn with_market_data_url(mut self, base_url: String) -> Self {
        self.config.market_data_base_url = base_url;
        self
    }

    /// Set strategy parameters forwarded to the oracle.
    pub fn with_strategy(mut self, strategy: StrategyParameters) -> Self {
        self.strategy = strategy;
        self
    }

    /// Build the engine configuration.
    pub fn build_config(self) -> EngineConfig {
        self.config
    }

    /// Build an orchestrator around the given collaborators.
    pub fn build(
        self,
        market_data: Arc<dyn MarketDataSource>,
        oracle: Arc<dyn DecisionOracle>,
    ) -> Result<DecisionOrchestrator> {
        DecisionOrchestrator::new(market_data, oracle, self.config, self.strategy)
    }

    /// Build an orchestrator talking to the configured HTTP endpoints.
    /// `simulate` swaps the exchange client for a random-walk feed.
    pub fn build_http(self, simulate: bool) -> Result<DecisionOrchestrator> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.oracle_timeout_seconds.max(10)))
            .build()?;

        let market_data: Arc<dyn MarketDataSource> = if simulate {
            Arc::new(SimulatedMarketData::new(100.0, 0.002))
        } else {
            Arc::new(BinanceMarketData::new(
                http_client.clone(),
                self.config.market_data_base_url.clone(),
                self.config.kline_interval.clone(),
            ))
        };

        let oracle = Arc::new(HttpDecisionOracle::new(
            http_client,
            self.config.oracle_base_url.clone(),
            self.config.oracle_model.clone(),
            self.config.oracle_api_key.clone(),
            Duration::from_secs(self.config.oracle_timeout_seconds),
        ));

        self.build(market_data, oracle)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_builder() {
        let config = EngineBuilder::new()
            .with_retry_delay_ms(250)
            .with_max_retries(7)
            .with_overall_timeout_ms(9_000)
            .with_fallback(0.005, 0.0)
            .with_forecast_horizon(10)
            .build_config();

        assert_eq!(config.retry_delay_ms, 250);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.overall_timeout_ms, 9_000);
        assert_eq!(config.default_sigma, 0.005);
        assert_eq!(config.forecast_horizon, 10);
    }

    #[test]
    fn test_engine_builder_defaults() {
        let config = EngineBuilder::new().build_config();

        assert_eq!(config.retry_delay_ms, 5_000);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.overall_timeout_ms, 120_000);
        assert_eq!(config.default_confidence, 0.0);
        assert_eq!(config.candle_count, 30);
    }

    #[test]
    fn test_build_http_validates_config() {
        let result = EngineBuilder::new().with_max_retries(0).build_http(true);
        assert!(result.is_err());

        let orchestrator = EngineBuilder::new().build_http(true).unwrap();
        assert_eq!(orchestrator.config().max_retries, 5);
    }
}
