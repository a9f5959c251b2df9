//! volsignal - volatility-aware directional trading signals
//!
//! This crate combines a GARCH-style volatility model, order-book and candle
//! micro-features, and a bounded-retry loop around an external reasoning
//! oracle to produce a LONG / SHORT / WAIT decision for an instrument.

pub mod types;
pub mod oracle;

// Re-export main types for convenience
pub use oracle::{Decision, DecisionOrchestrator, Direction, EngineBuilder, EngineConfig};
pub use types::{BookLevel, Candle, OrderBookDepth};
