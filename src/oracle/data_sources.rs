//! Market-data collaborators.
//!
//! The engine consumes market data through [`MarketDataSource`]. Two
//! implementations live here: a Binance-compatible REST client and a
//! random-walk feed for running offline. Transport retries are not done at
//! this layer; a failed call costs the orchestrator one attempt.

use crate::types::{BookLevel, Candle, OrderBookDepth};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, instrument};

/// Source of prices, candles and order-book depth.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Last traded price.
    async fn get_current_price(&self, symbol: &str) -> Result<f64>;

    /// The `count` most recent candles, oldest first.
    async fn get_recent_candles(&self, symbol: &str, count: usize) -> Result<Vec<Candle>>;

    /// Best `levels` price levels on each side of the book.
    async fn get_order_book_depth(&self, symbol: &str, levels: usize) -> Result<OrderBookDepth>;
}

/// REST client for Binance-compatible spot endpoints.
pub struct BinanceMarketData {
    http_client: Client,
    base_url: String,
    kline_interval: String,
}

impl BinanceMarketData {
    pub fn new(http_client: Client, base_url: impl Into<String>, kline_interval: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            kline_interval: kline_interval.into(),
        }
    }

    #[instrument(skip(self, query))]
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .get(&url)
            .query(query)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .with_context(|| format!("Failed to request {}", path))?;

        if !response.status().is_success() {
            return Err(anyhow!("Request to {} failed: {}", path, response.status()));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to decode {} response", path))
    }
}

#[async_trait]
impl MarketDataSource for BinanceMarketData {
    #[instrument(skip(self))]
    async fn get_current_price(&self, symbol: &str) -> Result<f64> {
        let body = self
            .get_json("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        let price = parse_ticker_price(body)?;
        debug!("Current price for {}: {}", symbol, price);
        Ok(price)
    }

    #[instrument(skip(self))]
    async fn get_recent_candles(&self, symbol: &str, count: usize) -> Result<Vec<Candle>> {
        let body = self
            .get_json(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", self.kline_interval.clone()),
                    ("limit", count.to_string()),
                ],
            )
            .await?;
        let candles = parse_klines(&body)?;
        debug!("Fetched {} candles for {}", candles.len(), symbol);
        Ok(candles)
    }

    #[instrument(skip(self))]
    async fn get_order_book_depth(&self, symbol: &str, levels: usize) -> Result<OrderBookDepth> {
        let body = self
            .get_json(
                "/api/v3/depth",
                &[("symbol", symbol.to_string()), ("limit", levels.to_string())],
            )
            .await?;
        let depth = parse_depth(body)?;
        debug!(
            "Fetched depth for {}: {} bids, {} asks",
            symbol,
            depth.bids.len(),
            depth.asks.len()
        );
        Ok(depth)
    }
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

fn parse_decimal(raw: &str, field: &str) -> Result<f64> {
    raw.parse::<f64>()
        .with_context(|| format!("Invalid {} value {:?}", field, raw))
}

/// Decode `{"symbol": .., "price": "123.45"}`.
pub fn parse_ticker_price(body: Value) -> Result<f64> {
    let ticker: TickerPrice = serde_json::from_value(body).context("Malformed ticker payload")?;
    let price = parse_decimal(&ticker.price, "price")?;
    if !(price > 0.0) {
        return Err(anyhow!("Non-positive price {}", price));
    }
    Ok(price)
}

/// Decode the kline array format: `[openTime, "open", "high", "low", "close", "volume", ...]`.
pub fn parse_klines(body: &Value) -> Result<Vec<Candle>> {
    let rows = body.as_array().ok_or_else(|| anyhow!("Klines payload is not an array"))?;

    rows.iter()
        .map(|row| -> Result<Candle> {
            let fields = row.as_array().ok_or_else(|| anyhow!("Kline row is not an array"))?;
            if fields.len() < 6 {
                return Err(anyhow!("Kline row has {} fields, expected at least 6", fields.len()));
            }
            let open_time_ms = fields[0]
                .as_i64()
                .ok_or_else(|| anyhow!("Kline open time is not an integer"))?;
            let open_time = DateTime::<Utc>::from_timestamp_millis(open_time_ms)
                .ok_or_else(|| anyhow!("Kline open time {} out of range", open_time_ms))?;
            let decimal = |index: usize, name: &str| -> Result<f64> {
                let raw = fields[index]
                    .as_str()
                    .ok_or_else(|| anyhow!("Kline {} is not a string", name))?;
                parse_decimal(raw, name)
            };

            Ok(Candle {
                open_time,
                open: decimal(1, "open")?,
                high: decimal(2, "high")?,
                low: decimal(3, "low")?,
                close: decimal(4, "close")?,
                volume: decimal(5, "volume")?,
            })
        })
        .collect()
}

/// Decode `{"bids": [["price", "qty"], ..], "asks": [..]}`.
pub fn parse_depth(body: Value) -> Result<OrderBookDepth> {
    let depth: DepthResponse = serde_json::from_value(body).context("Malformed depth payload")?;
    let levels = |side: &[[String; 2]]| -> Result<Vec<BookLevel>> {
        side.iter()
            .map(|[price, quantity]| -> Result<BookLevel> {
                Ok(BookLevel {
                    price: parse_decimal(price, "price")?,
                    quantity: parse_decimal(quantity, "quantity")?,
                })
            })
            .collect()
    };

    Ok(OrderBookDepth {
        bids: levels(&depth.bids)?,
        asks: levels(&depth.asks)?,
    })
}

/// Random-walk market feed for offline runs.
pub struct SimulatedMarketData {
    last_price: Mutex<f64>,
    /// Per-candle relative move amplitude
    step_volatility: f64,
}

impl SimulatedMarketData {
    pub fn new(initial_price: f64, step_volatility: f64) -> Self {
        Self {
            last_price: Mutex::new(initial_price),
            step_volatility,
        }
    }

    fn price(&self) -> Result<f64> {
        self.last_price
            .lock()
            .map(|price| *price)
            .map_err(|_| anyhow!("Simulated price state poisoned"))
    }

    fn walk(&self, count: usize) -> Result<Vec<Candle>> {
        let mut last_price = self
            .last_price
            .lock()
            .map_err(|_| anyhow!("Simulated price state poisoned"))?;
        let mut rng = rand::thread_rng();
        let start = Utc::now() - ChronoDuration::minutes(count as i64);

        let mut candles = Vec::with_capacity(count);
        let mut open = *last_price;
        for i in 0..count {
            let close = open * (1.0 + rng.gen_range(-1.0..1.0) * self.step_volatility);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.5) * self.step_volatility);
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.5) * self.step_volatility);
            candles.push(Candle {
                open_time: start + ChronoDuration::minutes(i as i64),
                open,
                high,
                low,
                close,
                volume: rng.gen_range(1.0..100.0),
            });
            open = close;
        }

        *last_price = open;
        Ok(candles)
    }

    fn book(&self, levels: usize) -> Result<OrderBookDepth> {
        let mid = self.price()?;
        let mut rng = rand::thread_rng();
        let tick = mid * 0.0001;

        let side = |rng: &mut rand::rngs::ThreadRng, sign: f64| -> Vec<BookLevel> {
            (1..=levels)
                .map(|i| BookLevel {
                    price: mid + sign * tick * i as f64,
                    quantity: rng.gen_range(0.1..10.0),
                })
                .collect()
        };

        Ok(OrderBookDepth {
            bids: side(&mut rng, -1.0),
            asks: side(&mut rng, 1.0),
        })
    }
}

#[async_trait]
impl MarketDataSource for SimulatedMarketData {
    async fn get_current_price(&self, _symbol: &str) -> Result<f64> {
        self.price()
    }

    async fn get_recent_candles(&self, _symbol: &str, count: usize) -> Result<Vec<Candle>> {
        self.walk(count)
    }

    async fn get_order_book_depth(&self, _symbol: &str, levels: usize) -> Result<OrderBookDepth> {
        self.book(levels)
    }
}
