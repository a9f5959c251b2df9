//! Request/response contract with the reasoning oracle.
//!
//! Building the request serializes market features, strategy parameters and
//! the volatility analysis into a natural-language prompt plus a strict JSON
//! schema. On the way back, structural validation (`validate_response`)
//! gates acceptance; semantic range checks (`check_ranges`) only report.

use crate::oracle::errors::EngineError;
use crate::oracle::types::{Decision, Direction, MicroData, StrategyParameters, VolatilityAnalysis};
use crate::types::Candle;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const NUMERIC_FIELDS: [&str; 3] = ["sigma", "takeProfitPnlClick", "confidence"];

/// Text and schema sent to the oracle for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// JSON schema the answer must satisfy
    pub response_schema: Value,
}

#[derive(Debug, Clone)]
pub struct DecisionContract {
    /// Most recent candles listed verbatim in the prompt
    prompt_candles: usize,
}

impl DecisionContract {
    pub fn new(prompt_candles: usize) -> Self {
        Self { prompt_candles }
    }

    /// Build the oracle request for one attempt. `volatility` is omitted from
    /// the prompt when the candle window was too short to estimate it.
    pub fn build_request(
        &self,
        data: &MicroData,
        strategy: &StrategyParameters,
        volatility: Option<&VolatilityAnalysis>,
    ) -> DecisionRequest {
        let atr = average_true_range(&data.klines);
        let body = average_body(&data.klines);

        let mut prompt = format!(
            "Market snapshot for {} at {}\n\
             - Last price: {}\n\
             - Order book imbalance (-1 sell pressure .. 1 buy pressure): {:.4}\n\
             - Wick volatility score (bp of open, mean over recent candles): {:.2}\n\
             - Average true range over {} candles: {:.8}\n\
             - Average candle body: {:.8}\n",
            data.symbol,
            Utc::now().to_rfc3339(),
            data.last_price,
            data.imbalance,
            data.volatility_score,
            data.klines.len(),
            atr,
            body,
        );

        match volatility {
            Some(analysis) => {
                let forecast: Vec<String> = analysis
                    .forecast
                    .volatilities
                    .iter()
                    .map(|v| format!("{:.6}", v))
                    .collect();
                prompt.push_str(&format!(
                    "\nVolatility model (GARCH-style, alpha={:.2}, beta={:.2}, persistence={:.2})\n\
                     - Current conditional volatility per period: {:.6}\n\
                     - Long-run volatility per period: {:.6}\n\
                     - Regime: {} (z-score {:.2})\n\
                     - Forecast next {} periods: [{}]\n",
                    analysis.parameters.alpha,
                    analysis.parameters.beta,
                    analysis.parameters.persistence(),
                    analysis.current_volatility,
                    analysis.long_run_volatility,
                    analysis.regime.as_str(),
                    analysis.z_score,
                    analysis.forecast.horizon,
                    forecast.join(", "),
                ));
            }
            None => prompt.push_str("\nVolatility model: not enough history this period.\n"),
        }

        prompt.push_str(&format!(
            "\nStrategy parameters\n\
             - Investment: {}\n\
             - Current sigma (inversion threshold): {}\n\
             - Current takeProfitPnlClick (step size): {}\n\
             - Risk tolerance: {}\n",
            strategy.investment,
            strategy.sigma,
            strategy.take_profit_pnl_click,
            strategy.risk_tolerance.as_str(),
        ));

        let start = data.klines.len().saturating_sub(self.prompt_candles);
        if start < data.klines.len() {
            prompt.push_str("\nRecent candles (time open high low close volume), oldest first\n");
            for candle in &data.klines[start..] {
                prompt.push_str(&format!(
                    "{} {} {} {} {} {}\n",
                    candle.open_time.format("%H:%M"),
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume,
                ));
            }
        }

        prompt.push_str(
            "\nAnswer with a single JSON object matching the schema. Use WAIT when the \
             setup is not clear enough to commit to a direction.",
        );

        DecisionRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: prompt,
            response_schema: response_schema(),
        }
    }

    /// Structural gate: the response must be an object whose `tendance` is
    /// exactly LONG, SHORT or WAIT. Nothing else is inspected here.
    pub fn validate_response(response: Option<&Value>) -> bool {
        Self::structural_error(response).is_none()
    }

    /// Validate and convert. Missing or non-numeric fields fall back to the
    /// strategy's sigma and take-profit step and to zero confidence.
    pub fn parse_response(
        &self,
        response: Option<&Value>,
        strategy: &StrategyParameters,
    ) -> Result<Decision, EngineError> {
        if let Some(reason) = Self::structural_error(response) {
            return Err(EngineError::InvalidResponse(reason));
        }
        let object = match response {
            Some(Value::Object(object)) => object,
            _ => return Err(EngineError::InvalidResponse("not an object".to_string())),
        };

        let direction = object
            .get("tendance")
            .and_then(Value::as_str)
            .and_then(Direction::from_wire)
            .ok_or_else(|| EngineError::InvalidResponse("missing tendance".to_string()))?;

        Ok(Decision {
            direction,
            sigma: number_or(object, "sigma", strategy.sigma),
            take_profit_pnl_click: number_or(
                object,
                "takeProfitPnlClick",
                strategy.take_profit_pnl_click,
            ),
            confidence: number_or(object, "confidence", 0.0),
            reasoning: object
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Semantic range checks, independent of structural validation.
    /// Returns one message per violated constraint.
    pub fn check_ranges(decision: &Decision) -> Vec<String> {
        let mut violations = Vec::new();
        if !(decision.sigma > 0.0) {
            violations.push(format!("sigma must be > 0, got {}", decision.sigma));
        }
        if !(decision.take_profit_pnl_click > 0.0) {
            violations.push(format!(
                "takeProfitPnlClick must be > 0, got {}",
                decision.take_profit_pnl_click
            ));
        }
        if !(0.0..=1.0).contains(&decision.confidence) {
            violations.push(format!(
                "confidence must be within [0, 1], got {}",
                decision.confidence
            ));
        }
        violations
    }

    /// Fields whose JSON type does not match the schema. Advisory only:
    /// `parse_response` substitutes defaults for them.
    pub fn check_types(response: Option<&Value>) -> Vec<String> {
        let object = match response {
            Some(Value::Object(object)) => object,
            _ => return Vec::new(),
        };

        let mut mismatches: Vec<String> = NUMERIC_FIELDS
            .iter()
            .filter_map(|field| match object.get(*field) {
                Some(value) if !value.is_number() => Some(format!(
                    "{} should be a number, got {}",
                    field,
                    type_name(value)
                )),
                _ => None,
            })
            .collect();

        if let Some(value) = object.get("reasoning") {
            if !value.is_string() {
                mismatches.push(format!("reasoning should be a string, got {}", type_name(value)));
            }
        }
        mismatches
    }

    fn structural_error(response: Option<&Value>) -> Option<String> {
        let object = match response {
            None => return Some("no response".to_string()),
            Some(Value::Object(object)) => object,
            Some(other) => return Some(format!("expected an object, got {}", type_name(other))),
        };

        match object.get("tendance") {
            None => return Some("missing tendance".to_string()),
            Some(Value::String(s)) if Direction::from_wire(s).is_some() => {}
            Some(other) => return Some(format!("unknown tendance {}", other)),
        }

        None
    }
}

impl Default for DecisionContract {
    fn default() -> Self {
        Self::new(20)
    }
}

/// Mean single-period true range (`high - low`), 0 without candles.
pub fn average_true_range(candles: &[Candle]) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    candles.iter().map(Candle::range).sum::<f64>() / candles.len() as f64
}

/// Mean `|close - open|`, 0 without candles.
pub fn average_body(candles: &[Candle]) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    candles.iter().map(Candle::body).sum::<f64>() / candles.len() as f64
}

/// Strict schema the oracle answers against.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tendance": {
                "type": "string",
                "enum": Direction::all().iter().map(Direction::as_str).collect::<Vec<_>>(),
                "description": "Trade direction, WAIT when no clear setup"
            },
            "sigma": {
                "type": "number",
                "description": "Inversion threshold as a fraction of price, > 0"
            },
            "takeProfitPnlClick": {
                "type": "number",
                "description": "Take-profit step as a fraction of price, > 0"
            },
            "reasoning": {
                "type": "string",
                "description": "Short justification"
            },
            "confidence": {
                "type": "number",
                "description": "Confidence between 0 and 1"
            }
        },
        "required": ["tendance", "sigma", "takeProfitPnlClick", "reasoning", "confidence"],
        "additionalProperties": false
    })
}

fn number_or(object: &Map<String, Value>, field: &str, default: f64) -> f64 {
    object.get(field).and_then(Value::as_f64).unwrap_or(default)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

const SYSTEM_PROMPT: &str = "You are a short-term crypto trading analyst. \
You receive order book imbalance, candle wick intensity, a GARCH-style volatility \
assessment and the operator's strategy parameters. Decide whether to open a LONG, \
a SHORT, or WAIT, and propose sigma (inversion threshold) and takeProfitPnlClick \
(take-profit step) adapted to the current volatility regime. Reply with JSON only.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::types::{RiskTolerance, VolatilityRegime};
    use crate::oracle::volatility::VolatilityModel;
    use chrono::Utc;

    fn create_candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 5.0,
        }
    }

    fn create_micro_data() -> MicroData {
        MicroData {
            symbol: "ETHUSDT".to_string(),
            last_price: 2501.5,
            imbalance: 0.25,
            volatility_score: 12.5,
            klines: vec![
                create_candle(2500.0, 2504.0, 2498.0, 2502.0),
                create_candle(2502.0, 2503.0, 2499.0, 2500.0),
                create_candle(2500.0, 2506.0, 2500.0, 2501.5),
            ],
        }
    }

    fn create_strategy() -> StrategyParameters {
        StrategyParameters {
            investment: 250.0,
            sigma: 0.004,
            take_profit_pnl_click: 0.002,
            risk_tolerance: RiskTolerance::High,
        }
    }

    #[test]
    fn test_rejects_malformed_responses() {
        assert!(!DecisionContract::validate_response(None));
        assert!(!DecisionContract::validate_response(Some(&Value::Null)));
        assert!(!DecisionContract::validate_response(Some(&json!({}))));
        assert!(!DecisionContract::validate_response(Some(&json!({ "tendance": "INVALID" }))));
        assert!(!DecisionContract::validate_response(Some(&json!({ "tendance": "long" }))));
        assert!(!DecisionContract::validate_response(Some(&json!({ "tendance": 1 }))));
        assert!(!DecisionContract::validate_response(Some(&json!("LONG"))));
        assert!(!DecisionContract::validate_response(Some(&json!([{ "tendance": "LONG" }]))));
    }

    #[test]
    fn test_mistyped_fields_do_not_block_decision() {
        let response = json!({
            "tendance": "LONG",
            "sigma": "0.003",
            "takeProfitPnlClick": null,
            "confidence": 0.6,
            "reasoning": 42
        });
        assert!(DecisionContract::validate_response(Some(&response)));

        let strategy = create_strategy();
        let decision = DecisionContract::default()
            .parse_response(Some(&response), &strategy)
            .unwrap();
        assert_eq!(decision.direction, Direction::Long);
        assert!(decision.is_decisive());
        assert_eq!(decision.sigma, strategy.sigma);
        assert_eq!(decision.take_profit_pnl_click, strategy.take_profit_pnl_click);
        assert_eq!(decision.confidence, 0.6);
        assert!(decision.reasoning.is_empty());

        let mismatches = DecisionContract::check_types(Some(&response));
        assert_eq!(mismatches.len(), 3);
        assert!(mismatches[0].starts_with("sigma"));
        assert!(DecisionContract::check_types(Some(&json!({ "tendance": "WAIT" }))).is_empty());
    }

    #[test]
    fn test_accepts_well_formed_response() {
        let response = json!({
            "tendance": "LONG",
            "sigma": 0.003,
            "takeProfitPnlClick": 0.0015,
            "confidence": 0.75,
            "reasoning": "bids stacking under a compressed range"
        });
        assert!(DecisionContract::validate_response(Some(&response)));
        assert!(DecisionContract::validate_response(Some(&json!({ "tendance": "WAIT" }))));
    }

    #[test]
    fn test_structural_validation_ignores_ranges() {
        let response = json!({
            "tendance": "SHORT",
            "sigma": -1.0,
            "takeProfitPnlClick": 0.0,
            "confidence": 7.0,
            "reasoning": ""
        });
        assert!(DecisionContract::validate_response(Some(&response)));

        let decision = DecisionContract::default()
            .parse_response(Some(&response), &create_strategy())
            .unwrap();
        assert_eq!(DecisionContract::check_ranges(&decision).len(), 3);
    }

    #[test]
    fn test_parse_full_response() {
        let response = json!({
            "tendance": "LONG",
            "sigma": 0.003,
            "takeProfitPnlClick": 0.0015,
            "confidence": 0.75,
            "reasoning": "momentum"
        });
        let decision = DecisionContract::default()
            .parse_response(Some(&response), &create_strategy())
            .unwrap();

        assert_eq!(decision.direction, Direction::Long);
        assert_eq!(decision.sigma, 0.003);
        assert_eq!(decision.take_profit_pnl_click, 0.0015);
        assert_eq!(decision.confidence, 0.75);
        assert_eq!(decision.reasoning, "momentum");
        assert!(DecisionContract::check_ranges(&decision).is_empty());
    }

    #[test]
    fn test_parse_fills_missing_numbers() {
        let strategy = create_strategy();
        let decision = DecisionContract::default()
            .parse_response(Some(&json!({ "tendance": "WAIT" })), &strategy)
            .unwrap();

        assert_eq!(decision.direction, Direction::Wait);
        assert_eq!(decision.sigma, strategy.sigma);
        assert_eq!(decision.take_profit_pnl_click, strategy.take_profit_pnl_click);
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.reasoning.is_empty());
    }

    #[test]
    fn test_parse_rejects_invalid() {
        let contract = DecisionContract::default();
        let result = contract.parse_response(Some(&json!({ "tendance": "INVALID" })), &create_strategy());
        assert!(matches!(result, Err(EngineError::InvalidResponse(_))));

        let result = contract.parse_response(None, &create_strategy());
        assert!(matches!(result, Err(EngineError::InvalidResponse(_))));
    }

    #[test]
    fn test_candle_metrics() {
        let data = create_micro_data();
        // ranges 6, 4, 6; bodies 2, 2, 1.5
        assert!((average_true_range(&data.klines) - 16.0 / 3.0).abs() < 1e-9);
        assert!((average_body(&data.klines) - 5.5 / 3.0).abs() < 1e-9);
        assert_eq!(average_true_range(&[]), 0.0);
        assert_eq!(average_body(&[]), 0.0);
    }

    #[test]
    fn test_build_request_contents() {
        let data = create_micro_data();
        let strategy = create_strategy();
        let returns = vec![0.001, -0.002, 0.0015, -0.001, 0.002, -0.0005];
        let analysis = VolatilityModel::new().analyze(&returns, 3).unwrap();

        let request = DecisionContract::new(2).build_request(&data, &strategy, Some(&analysis));

        assert!(request.user_prompt.contains("ETHUSDT"));
        assert!(request.user_prompt.contains("0.2500"));
        assert!(request.user_prompt.contains("Risk tolerance: high"));
        assert!(request.user_prompt.contains("persistence=0.95"));
        assert!(request.user_prompt.contains(analysis.regime.as_str()));
        // only the last two candles are listed
        assert!(!request.user_prompt.contains("2500 2504 2498 2502"));
        assert!(request.user_prompt.contains("2500 2506 2500 2501.5"));
        assert!(!request.system_prompt.is_empty());
    }

    #[test]
    fn test_build_request_without_volatility() {
        let request =
            DecisionContract::default().build_request(&create_micro_data(), &create_strategy(), None);
        assert!(request.user_prompt.contains("not enough history"));
        assert!(!request.user_prompt.contains(VolatilityRegime::Extreme.as_str()));
    }

    #[test]
    fn test_response_schema_shape() {
        let schema = response_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["properties"]["tendance"]["enum"], json!(["LONG", "SHORT", "WAIT"]));
        let required = schema["required"].as_array().unwrap();
        for field in ["tendance", "sigma", "takeProfitPnlClick", "reasoning", "confidence"] {
            assert!(required.contains(&json!(field)), "{} not required", field);
        }
    }
}
