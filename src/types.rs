//! Core market primitives shared by the volatility/decision engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trading pair identifier as understood by the exchange (e.g. "BTCUSDT").
pub type Symbol = String;

/// One OHLCV bar. Sequences of candles are ordered oldest first, most recent last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Absolute size of the candle body.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Single-period true range (no gap handling against the previous close).
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Excursion of the high above the body.
    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    /// Excursion of the low below the body.
    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }
}

/// A single price level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Aggregated bid/ask depth, best level first on each side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookDepth {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookDepth {
    /// Total resting bid quantity.
    pub fn bid_volume(&self) -> f64 {
        self.bids.iter().map(|l| l.quantity).sum()
    }

    /// Total resting ask quantity.
    pub fn ask_volume(&self) -> f64 {
        self.asks.iter().map(|l| l.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_candle_geometry() {
        let bullish = candle(100.0, 105.0, 98.0, 103.0);
        assert_eq!(bullish.body(), 3.0);
        assert_eq!(bullish.range(), 7.0);
        assert_eq!(bullish.upper_wick(), 2.0);
        assert_eq!(bullish.lower_wick(), 2.0);

        let bearish = candle(103.0, 104.0, 99.0, 100.0);
        assert_eq!(bearish.body(), 3.0);
        assert_eq!(bearish.upper_wick(), 1.0);
        assert_eq!(bearish.lower_wick(), 1.0);
    }

    #[test]
    fn test_book_volumes() {
        let book = OrderBookDepth {
            bids: vec![
                BookLevel { price: 99.0, quantity: 2.0 },
                BookLevel { price: 98.0, quantity: 3.0 },
            ],
            asks: vec![BookLevel { price: 101.0, quantity: 1.5 }],
        };
        assert_eq!(book.bid_volume(), 5.0);
        assert_eq!(book.ask_volume(), 1.5);
        assert_eq!(OrderBookDepth::default().bid_volume(), 0.0);
    }
}
