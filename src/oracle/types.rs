//! Core types and data structures for the volatility/decision engine.

use crate::types::{Candle, Symbol};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Directional answer of the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    /// No trade yet; triggers another attempt
    Wait,
}

impl Direction {
    /// Wire representation used in the `tendance` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
            Direction::Wait => "WAIT",
        }
    }

    /// Parse the wire representation. Matching is exact.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "LONG" => Some(Direction::Long),
            "SHORT" => Some(Direction::Short),
            "WAIT" => Some(Direction::Wait),
            _ => None,
        }
    }

    /// LONG and SHORT end the retry loop, WAIT does not.
    pub fn is_decisive(&self) -> bool {
        matches!(self, Direction::Long | Direction::Short)
    }

    pub fn all() -> [Direction; 3] {
        [Direction::Long, Direction::Short, Direction::Wait]
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured answer of the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    #[serde(rename = "tendance")]
    pub direction: Direction,
    /// Inversion threshold
    pub sigma: f64,
    /// Take-profit step size
    pub take_profit_pnl_click: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl Decision {
    pub fn is_decisive(&self) -> bool {
        self.direction.is_decisive()
    }
}

/// Scalar micro-market features derived from book depth and recent candles.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicroFeatures {
    /// Book imbalance in [-1, 1]
    pub imbalance: f64,
    /// Mean wick intensity in basis points of the open, >= 0
    pub volatility_score: f64,
}

/// Snapshot of market microstructure at decision time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicroData {
    pub symbol: Symbol,
    pub last_price: f64,
    pub imbalance: f64,
    pub volatility_score: f64,
    /// Most recent last
    pub klines: Vec<Candle>,
}

/// Risk posture requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Low,
    Medium,
    High,
}

impl RiskTolerance {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTolerance::Low => "low",
            RiskTolerance::Medium => "medium",
            RiskTolerance::High => "high",
        }
    }
}

/// Tunable strategy inputs forwarded to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StrategyParameters {
    /// Capital committed per position
    pub investment: f64,
    /// Inversion threshold
    pub sigma: f64,
    /// Take-profit step size
    pub take_profit_pnl_click: f64,
    pub risk_tolerance: RiskTolerance,
}

impl StrategyParameters {
    /// All numeric inputs must be strictly positive.
    pub fn validate(&self) -> Result<()> {
        if !(self.investment > 0.0) {
            return Err(anyhow!("investment must be positive, got {}", self.investment));
        }
        if !(self.sigma > 0.0) {
            return Err(anyhow!("sigma must be positive, got {}", self.sigma));
        }
        if !(self.take_profit_pnl_click > 0.0) {
            return Err(anyhow!(
                "takeProfitPnlClick must be positive, got {}",
                self.take_profit_pnl_click
            ));
        }
        Ok(())
    }
}

/// GARCH(1,1)-style coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityParameters {
    /// Baseline variance, > 0
    pub omega: f64,
    /// Weight of the last squared shock
    pub alpha: f64,
    /// Weight of the last variance
    pub beta: f64,
}

impl VolatilityParameters {
    /// `alpha + beta`; the model is stationary while this is below 1.
    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    /// Unconditional variance the recursion reverts to.
    pub fn long_run_variance(&self) -> f64 {
        self.omega / (1.0 - self.persistence())
    }
}

/// Forward projection of per-period volatility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityForecast {
    pub horizon: usize,
    /// One value per step, `volatilities.len() == horizon`
    pub volatilities: Vec<f64>,
    pub parameters: VolatilityParameters,
}

/// Coarse volatility classification. Variant order is the regime ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
    Extreme,
}

impl VolatilityRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityRegime::Low => "LOW",
            VolatilityRegime::Normal => "NORMAL",
            VolatilityRegime::High => "HIGH",
            VolatilityRegime::Extreme => "EXTREME",
        }
    }
}

/// Everything the volatility model says about one return series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityAnalysis {
    pub parameters: VolatilityParameters,
    /// Last value of the conditional volatility path
    pub current_volatility: f64,
    pub long_run_volatility: f64,
    /// 0 when the historical sample has no dispersion
    pub z_score: f64,
    pub regime: VolatilityRegime,
    pub forecast: VolatilityForecast,
}

/// Engine configuration: retry budget, fallback values and collaborator endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between two orchestration attempts
    pub retry_delay_ms: u64,
    /// Maximum number of attempts before the fallback fires
    pub max_retries: usize,
    /// Wall-clock budget across all attempts
    pub overall_timeout_ms: u64,
    /// Sigma reported by the fallback decision
    pub default_sigma: f64,
    /// Confidence reported by the fallback decision
    pub default_confidence: f64,
    /// Candles fetched per attempt
    pub candle_count: usize,
    /// Order book depth fetched per attempt
    pub order_book_levels: usize,
    /// Candles used for the wick score
    pub wick_window: usize,
    /// Volatility forecast steps
    pub forecast_horizon: usize,
    /// Exchange REST base URL
    pub market_data_base_url: String,
    /// Candle interval, exchange notation
    pub kline_interval: String,
    /// Chat-completions base URL of the oracle
    pub oracle_base_url: String,
    /// Model name sent to the oracle
    pub oracle_model: String,
    /// Bearer token for the oracle
    pub oracle_api_key: Option<String>,
    /// Per-call oracle timeout
    pub oracle_timeout_seconds: u64,
}

impl EngineConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be at least 1"));
        }
        if self.candle_count == 0 {
            return Err(anyhow!("candle_count must be at least 1"));
        }
        if self.forecast_horizon == 0 {
            return Err(anyhow!("forecast_horizon must be at least 1"));
        }
        if !(self.default_sigma > 0.0) {
            return Err(anyhow!("default_sigma must be positive, got {}", self.default_sigma));
        }
        if !(0.0..=1.0).contains(&self.default_confidence) {
            return Err(anyhow!(
                "default_confidence must be within [0, 1], got {}",
                self.default_confidence
            ));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }
}

// Default implementations
impl Default for StrategyParameters {
    fn default() -> Self {
        Self {
            investment: 100.0,
            sigma: 0.003,
            take_profit_pnl_click: 0.0015,
            risk_tolerance: RiskTolerance::Medium,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 5_000,
            max_retries: 5,
            overall_timeout_ms: 120_000,
            default_sigma: 0.003,
            default_confidence: 0.0,
            candle_count: 30,
            order_book_levels: 20,
            wick_window: 10,
            forecast_horizon: 5,
            market_data_base_url: "https://api.binance.com".to_string(),
            kline_interval: "1m".to_string(),
            oracle_base_url: "https://api.openai.com/v1".to_string(),
            oracle_model: "gpt-4o-mini".to_string(),
            oracle_api_key: None,
            oracle_timeout_seconds: 30,
        }
    }
}
