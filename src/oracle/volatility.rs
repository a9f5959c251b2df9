//! GARCH-style volatility estimation, forecasting and regime classification.
//!
//! The model is the simplified fixed-coefficient variant: `alpha` and `beta`
//! are constants and only `omega` is derived from the data, so that the
//! long-run variance of the recursion equals the sample variance of the
//! input. All functions are pure over the series supplied at call time.

use crate::oracle::errors::EngineError;
use crate::oracle::types::{
    VolatilityAnalysis, VolatilityForecast, VolatilityParameters, VolatilityRegime,
};
use crate::types::Candle;
use tracing::{debug, instrument};

/// Weight of the last squared shock.
pub const ALPHA: f64 = 0.10;
/// Weight of the last conditional variance.
pub const BETA: f64 = 0.85;
/// Shortest return series parameters can be estimated from.
pub const MIN_OBSERVATIONS: usize = 5;

/// Substituted for a zero sample variance so that `omega` stays positive.
const VARIANCE_FLOOR: f64 = 1e-12;

/// Stateless volatility model.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolatilityModel;

impl VolatilityModel {
    pub fn new() -> Self {
        Self
    }

    /// Estimate model coefficients from a return series.
    ///
    /// Fails with [`EngineError::InsufficientData`] below [`MIN_OBSERVATIONS`].
    pub fn estimate_parameters(&self, returns: &[f64]) -> Result<VolatilityParameters, EngineError> {
        if returns.len() < MIN_OBSERVATIONS {
            return Err(EngineError::InsufficientData {
                required: MIN_OBSERVATIONS,
                actual: returns.len(),
            });
        }

        let variance = floored_variance(returns);
        Ok(VolatilityParameters {
            omega: variance * (1.0 - ALPHA - BETA),
            alpha: ALPHA,
            beta: BETA,
        })
    }

    /// Conditional volatility path, one value per input return.
    ///
    /// `variance[0]` is the sample variance of the series and
    /// `variance[t] = omega + alpha * r[t-1]^2 + beta * variance[t-1]`.
    pub fn conditional_volatility(
        &self,
        returns: &[f64],
        params: &VolatilityParameters,
    ) -> Vec<f64> {
        self.conditional_variance(returns, params)
            .into_iter()
            .map(f64::sqrt)
            .collect()
    }

    fn conditional_variance(&self, returns: &[f64], params: &VolatilityParameters) -> Vec<f64> {
        if returns.is_empty() {
            return Vec::new();
        }

        let mut path = Vec::with_capacity(returns.len());
        path.push(floored_variance(returns));

        for t in 1..returns.len() {
            let shock = returns[t - 1];
            let next = params.omega + params.alpha * shock * shock + params.beta * path[t - 1];
            path.push(next.max(VARIANCE_FLOOR));
        }

        path
    }

    /// Project volatility `horizon` steps ahead.
    ///
    /// Future squared shocks are replaced by their expectation, so each step
    /// is `variance[t+1] = omega + (alpha + beta) * variance[t]`, starting from
    /// the last conditional variance of `returns`. A horizon of 0 is treated as 1.
    pub fn forecast(
        &self,
        params: &VolatilityParameters,
        returns: &[f64],
        horizon: usize,
    ) -> VolatilityForecast {
        let horizon = horizon.max(1);
        let mut variance = self
            .conditional_variance(returns, params)
            .last()
            .copied()
            .unwrap_or_else(|| params.long_run_variance());

        let mut volatilities = Vec::with_capacity(horizon);
        for _ in 0..horizon {
            variance = (params.omega + params.persistence() * variance).max(VARIANCE_FLOOR);
            volatilities.push(variance.sqrt());
        }

        VolatilityForecast {
            horizon,
            volatilities,
            parameters: *params,
        }
    }

    /// Z-score of `current` against the historical sample, `None` when the
    /// sample has no dispersion.
    pub fn z_score(&self, current: f64, historical: &[f64]) -> Option<f64> {
        if historical.len() < 2 {
            return None;
        }
        let mean = mean(historical);
        let std_dev = sample_variance(historical).sqrt();
        if !(std_dev > 0.0) {
            return None;
        }
        Some((current - mean) / std_dev)
    }

    /// Classify current volatility against its history.
    ///
    /// z < -1 is LOW, -1 <= z < 1 NORMAL, 1 <= z < 2 HIGH, z >= 2 EXTREME.
    /// A sample without dispersion is NORMAL.
    pub fn classify_regime(&self, current: f64, historical: &[f64]) -> VolatilityRegime {
        match self.z_score(current, historical) {
            Some(z) => regime_for_z(z),
            None => VolatilityRegime::Normal,
        }
    }

    /// Estimate, filter, forecast and classify in one pass.
    ///
    /// The last path value is the current volatility and the values before
    /// it form the historical sample for the regime.
    #[instrument(skip(self, returns), fields(observations = returns.len()))]
    pub fn analyze(&self, returns: &[f64], horizon: usize) -> Result<VolatilityAnalysis, EngineError> {
        let parameters = self.estimate_parameters(returns)?;
        let path = self.conditional_volatility(returns, &parameters);

        let (current_volatility, historical) = match path.split_last() {
            Some((last, rest)) => (*last, rest),
            None => (parameters.long_run_variance().sqrt(), &[][..]),
        };

        let z_score = self.z_score(current_volatility, historical).unwrap_or(0.0);
        let regime = self.classify_regime(current_volatility, historical);
        let forecast = self.forecast(&parameters, returns, horizon);

        debug!(
            "Volatility analysis: current={:.6}, long_run={:.6}, z={:.2}, regime={}",
            current_volatility,
            parameters.long_run_variance().sqrt(),
            z_score,
            regime.as_str()
        );

        Ok(VolatilityAnalysis {
            parameters,
            current_volatility,
            long_run_volatility: parameters.long_run_variance().sqrt(),
            z_score,
            regime,
            forecast,
        })
    }
}

/// Simple close-to-close returns, oldest first. Pairs with a non-positive
/// previous close are skipped.
pub fn returns_from_candles(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .filter(|pair| pair[0].close > 0.0)
        .map(|pair| pair[1].close / pair[0].close - 1.0)
        .collect()
}

fn regime_for_z(z: f64) -> VolatilityRegime {
    if z < -1.0 {
        VolatilityRegime::Low
    } else if z < 1.0 {
        VolatilityRegime::Normal
    } else if z < 2.0 {
        VolatilityRegime::High
    } else {
        VolatilityRegime::Extreme
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance; 0 for fewer than two values.
fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

fn floored_variance(values: &[f64]) -> f64 {
    let variance = sample_variance(values);
    if variance.is_finite() && variance > VARIANCE_FLOOR {
        variance
    } else {
        VARIANCE_FLOOR
    }
}
