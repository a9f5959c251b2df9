//! Run counters for the decision orchestrator.
//!
//! Counters are plain atomics so concurrent runs for different symbols can
//! share one collector without locking.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Orchestration counters.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    runs: AtomicU64,
    attempts: AtomicU64,
    decisive: AtomicU64,
    waits: AtomicU64,
    collection_failures: AtomicU64,
    oracle_failures: AtomicU64,
    invalid_responses: AtomicU64,
    fallbacks: AtomicU64,
    budget_expirations: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub runs: u64,
    pub attempts: u64,
    pub decisive: u64,
    pub waits: u64,
    pub collection_failures: u64,
    pub oracle_failures: u64,
    pub invalid_responses: u64,
    pub fallbacks: u64,
    pub budget_expirations: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decisive(&self) {
        self.decisive.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collection_failure(&self) {
        self.collection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_oracle_failure(&self) {
        self.oracle_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_response(&self) {
        self.invalid_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_budget_expired(&self) {
        self.budget_expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let snapshot = MetricsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            decisive: self.decisive.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            collection_failures: self.collection_failures.load(Ordering::Relaxed),
            oracle_failures: self.oracle_failures.load(Ordering::Relaxed),
            invalid_responses: self.invalid_responses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            budget_expirations: self.budget_expirations.load(Ordering::Relaxed),
        };
        debug!("Metrics snapshot: {:?}", snapshot);
        snapshot
    }
}
