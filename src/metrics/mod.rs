//! Running statistics for cache decisions

use crate::cache::{AllocationDecision, DecisionReason};
use parking_lot::Mutex;
use serde::Serialize;

/// Counters contributed by one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTally {
    pub segments: u64,
    pub cache_hits: u64,
    pub tokens_cached: u64,
    pub tokens_skipped: u64,
    pub tokens_below_threshold: u64,
}

impl RequestTally {
    /// Fold one allocation outcome into the tally
    pub fn observe(&mut self, decision: &AllocationDecision, estimated_tokens: usize) {
        let tokens = estimated_tokens as u64;
        self.segments += 1;

        if decision.reason == DecisionReason::AlreadyCached {
            self.cache_hits += 1;
        }

        if decision.mark_cacheable {
            self.tokens_cached += tokens;
        } else if decision.reason == DecisionReason::BelowThreshold {
            self.tokens_below_threshold += tokens;
        } else {
            self.tokens_skipped += tokens;
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Counters {
    total_requests: u64,
    requests_with_hits: u64,
    cache_hits: u64,
    segments_seen: u64,
    total_tokens_cached: u64,
    total_tokens_skipped: u64,
    total_tokens_below_threshold: u64,
}

/// Process-wide statistics, safe to share between threads.
///
/// Counters only grow; [`CacheStatistics::reset`] is the one exception and
/// exists for maintenance.
#[derive(Debug)]
pub struct CacheStatistics {
    counters: Mutex<Counters>,
    /// Money saved per cached token
    savings_per_token: f64,
}

impl CacheStatistics {
    pub fn new(savings_per_token: f64) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            savings_per_token,
        }
    }

    /// Record one processed request
    pub fn record_request(&self, tally: &RequestTally) {
        let mut counters = self.counters.lock();
        counters.total_requests += 1;
        if tally.cache_hits > 0 {
            counters.requests_with_hits += 1;
        }
        counters.cache_hits += tally.cache_hits;
        counters.segments_seen += tally.segments;
        counters.total_tokens_cached += tally.tokens_cached;
        counters.total_tokens_skipped += tally.tokens_skipped;
        counters.total_tokens_below_threshold += tally.tokens_below_threshold;
    }

    /// Consistent point-in-time view
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.counters.lock().clone();

        let cache_hit_rate = percent(counters.cache_hits, counters.total_requests).min(100.0);
        let request_hit_rate = percent(counters.requests_with_hits, counters.total_requests);

        StatsSnapshot {
            total_requests: counters.total_requests,
            requests_with_hits: counters.requests_with_hits,
            cache_hits: counters.cache_hits,
            segments_seen: counters.segments_seen,
            total_tokens_cached: counters.total_tokens_cached,
            total_tokens_skipped: counters.total_tokens_skipped,
            total_tokens_below_threshold: counters.total_tokens_below_threshold,
            cache_hit_rate,
            request_hit_rate,
            estimated_savings: counters.total_tokens_cached as f64 * self.savings_per_token,
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

impl Default for CacheStatistics {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Immutable statistics view
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    /// Requests that reused at least one cached segment
    pub requests_with_hits: u64,
    /// Segments that reused a live cache entry
    pub cache_hits: u64,
    pub segments_seen: u64,
    pub total_tokens_cached: u64,
    /// Tokens of eligible segments left unmarked for lack of budget
    pub total_tokens_skipped: u64,
    pub total_tokens_below_threshold: u64,
    /// Cache hits per request as a percentage. Saturates at 100 once hits
    /// outnumber requests, which happens when requests reuse several
    /// segments; see `request_hit_rate` for the unsaturated view.
    pub cache_hit_rate: f64,
    /// Percentage of requests that reused at least one segment
    pub request_hit_rate: f64,
    pub estimated_savings: f64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Cache Statistics ===")?;
        writeln!(f, "Requests: {}", self.total_requests)?;
        writeln!(f, "Cache hits: {}", self.cache_hits)?;
        writeln!(f, "Hit rate: {:.1}%", self.cache_hit_rate)?;
        writeln!(f, "Requests with hits: {:.1}%", self.request_hit_rate)?;
        writeln!(f, "Tokens cached: {}", self.total_tokens_cached)?;
        writeln!(f, "Tokens skipped: {}", self.total_tokens_skipped)?;
        writeln!(f, "Tokens below threshold: {}", self.total_tokens_below_threshold)?;
        writeln!(f, "Est. savings: ${:.4}", self.estimated_savings)?;
        Ok(())
    }
}
