//! Micro-market feature computation.
//!
//! Turns the latest order-book snapshot and recent candles into the two
//! scalar features the decision request carries: book imbalance and a
//! wick-based volatility score. Quiet markets (empty book, no candles) are a
//! normal operating condition and map to neutral values instead of errors.

use crate::oracle::types::{MicroData, MicroFeatures};
use crate::types::{Candle, OrderBookDepth};
use tracing::{debug, instrument};

/// Stateless calculator; safe to share between concurrent runs.
#[derive(Debug, Clone)]
pub struct MicroFeatureCalculator {
    /// Number of most recent candles used for the wick score
    wick_window: usize,
}

impl MicroFeatureCalculator {
    /// Create a calculator scoring the last `wick_window` candles.
    /// A window of 0 scores every supplied candle.
    pub fn new(wick_window: usize) -> Self {
        Self { wick_window }
    }

    /// Compute both features from one snapshot.
    #[instrument(skip(self, book, candles), fields(candles = candles.len()))]
    pub fn compute(&self, book: &OrderBookDepth, candles: &[Candle]) -> MicroFeatures {
        let features = MicroFeatures {
            imbalance: Self::compute_imbalance(book),
            volatility_score: self.compute_volatility_score(candles),
        };
        debug!(
            "Micro features: imbalance={:.4}, volatility_score={:.2}",
            features.imbalance, features.volatility_score
        );
        features
    }

    /// Assemble the `MicroData` snapshot sent to the oracle.
    pub fn micro_data(
        &self,
        symbol: &str,
        last_price: f64,
        book: &OrderBookDepth,
        candles: Vec<Candle>,
    ) -> MicroData {
        let features = self.compute(book, &candles);
        MicroData {
            symbol: symbol.to_string(),
            last_price,
            imbalance: features.imbalance,
            volatility_score: features.volatility_score,
            klines: candles,
        }
    }

    /// `(bids - asks) / (bids + asks)`, 0 for an empty book.
    pub fn compute_imbalance(book: &OrderBookDepth) -> f64 {
        let bid_volume = book.bid_volume();
        let ask_volume = book.ask_volume();
        let total = bid_volume + ask_volume;

        if !(total > 0.0) {
            return 0.0;
        }

        ((bid_volume - ask_volume) / total).clamp(-1.0, 1.0)
    }

    /// Mean per-candle wick score, `(upper + lower) / open * 10000`.
    /// Candles with a non-positive open are skipped; no usable candle gives 0.
    pub fn compute_volatility_score(&self, candles: &[Candle]) -> f64 {
        let start = if self.wick_window == 0 {
            0
        } else {
            candles.len().saturating_sub(self.wick_window)
        };

        let scores: Vec<f64> = candles[start..]
            .iter()
            .filter(|c| c.open > 0.0)
            .map(Self::wick_score)
            .collect();

        if scores.is_empty() {
            return 0.0;
        }

        scores.iter().sum::<f64>() / scores.len() as f64
    }

    fn wick_score(candle: &Candle) -> f64 {
        let wicks = candle.upper_wick().max(0.0) + candle.lower_wick().max(0.0);
        wicks / candle.open * 10_000.0
    }
}

impl Default for MicroFeatureCalculator {
    fn default() -> Self {
        Self::new(10)
    }
}
