//! Per-request cache planning
//!
//! [`SmartCache`] is the engine context: it owns the classifier and
//! allocator and shares the cache store and statistics, which may be
//! handed to several engines. It is invoked once per outbound request:
//!
//! 1. Split the payload into segments and classify each one
//! 2. Allocate breakpoints under the configured budget
//! 3. Attach markers to the payload
//! 4. Record the outcome in the statistics
//!
//! Nothing here returns an error. Content that cannot be analyzed is left
//! unmarked and the request goes out as it came in.

mod request;

pub use request::{RequestPayload, SegmentSlot};

use crate::analysis::{ContentClassifier, Segment, TokenEstimator};
use crate::cache::{AllocationDecision, BreakpointAllocator, CacheControl, CacheStore};
use crate::config::EngineConfig;
use crate::metrics::{CacheStatistics, RequestTally, StatsSnapshot};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A payload annotated with cache markers
#[derive(Debug, Clone)]
pub struct ProcessedRequest {
    pub payload: RequestPayload,
    /// One per segment, in request order
    pub decisions: Vec<AllocationDecision>,
    pub segments: Vec<Segment>,
}

impl ProcessedRequest {
    /// Number of segments carrying a marker
    pub fn marked_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.mark_cacheable).count()
    }
}

/// Cache planning engine
pub struct SmartCache {
    config: EngineConfig,
    classifier: ContentClassifier,
    allocator: BreakpointAllocator,
    marker: CacheControl,
    store: Arc<CacheStore>,
    stats: Arc<CacheStatistics>,
}

impl SmartCache {
    /// Engine with its own store and statistics
    pub fn new(config: EngineConfig) -> Self {
        let store = Arc::new(CacheStore::bounded(
            config.cache_duration,
            config.max_entries.unwrap_or(0),
        ));
        let stats = Arc::new(CacheStatistics::new(config.savings_per_token));
        Self::with_shared(config, store, stats)
    }

    /// Engine over an existing store and statistics
    pub fn with_shared(
        config: EngineConfig,
        store: Arc<CacheStore>,
        stats: Arc<CacheStatistics>,
    ) -> Self {
        let classifier = ContentClassifier::new(
            TokenEstimator::for_tokenizer(config.tokenizer),
            config.min_token_count,
        );

        Self {
            allocator: BreakpointAllocator::new(config.reuse_policy),
            classifier,
            marker: CacheControl::default(),
            store,
            stats,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn classifier(&self) -> &ContentClassifier {
        &self.classifier
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn statistics(&self) -> &Arc<CacheStatistics> {
        &self.stats
    }

    /// Current statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Plan caching for one request and annotate it
    pub fn process(&self, mut payload: RequestPayload) -> ProcessedRequest {
        let mut segments = payload.extract_segments(&self.classifier);
        let mut decisions = self
            .allocator
            .allocate(&mut segments, self.config.max_cache_blocks, &self.store);

        let mut tally = RequestTally::default();
        for (decision, segment) in decisions.iter_mut().zip(&segments) {
            // Unreadable segments go out exactly as they came in
            if segment.content.is_some() {
                // Markers are owned by the plan; stale ones would overrun the budget
                payload.clear_marker(segment.position);
                if decision.mark_cacheable
                    && !payload.apply_marker(segment.position, &self.marker)
                {
                    warn!("Could not place cache marker on segment {}", segment.position);
                    decision.mark_cacheable = false;
                }
            }
            tally.observe(decision, segment.estimated_tokens);

            if self.config.enable_logging {
                debug!(
                    "Segment {} ({}, ~{} tokens): {:?}",
                    segment.position, segment.kind, segment.estimated_tokens, decision.reason
                );
            }
        }

        self.stats.record_request(&tally);

        if self.config.enable_logging {
            info!(
                "Cache plan: {} segments, {} hits, {} tokens cached, {} skipped",
                tally.segments, tally.cache_hits, tally.tokens_cached, tally.tokens_skipped
            );
        }

        ProcessedRequest {
            payload,
            decisions,
            segments,
        }
    }

    /// Plan caching for a raw JSON request. Anything that does not look
    /// like a request is returned unchanged.
    pub fn process_json(&self, raw: &Value) -> Value {
        let payload = match RequestPayload::from_value(raw.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Passing request through without caching: {}", e);
                return raw.clone();
            }
        };

        match self.process(payload).payload.to_value() {
            Ok(annotated) => annotated,
            Err(e) => {
                warn!("Failed to serialize annotated request: {}", e);
                raw.clone()
            }
        }
    }

    /// Housekeeping sweep of expired cache entries
    pub fn evict_expired(&self) -> usize {
        self.store.evict_expired()
    }
}

impl Default for SmartCache {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DecisionReason;
    use serde_json::json;
    use std::time::Duration;

    fn engine(max_cache_blocks: usize, min_token_count: usize) -> SmartCache {
        SmartCache::new(EngineConfig {
            max_cache_blocks,
            min_token_count,
            enable_logging: false,
            ..EngineConfig::default()
        })
    }

    fn request(user: &str) -> RequestPayload {
        RequestPayload::new()
            .with_system("You are a helpful travel assistant. ".repeat(40))
            .with_tool(json!({"name": "get_weather", "description": "Get weather. ".repeat(30)}))
            .with_message("user", user)
    }

    #[test]
    fn test_first_request_marks_system_and_tool() {
        let engine = engine(2, 50);
        let processed = engine.process(request("What's the weather?"));

        assert_eq!(processed.decisions[0].reason, DecisionReason::SelectedNew);
        assert_eq!(processed.decisions[1].reason, DecisionReason::SelectedNew);
        assert_eq!(processed.decisions[2].reason, DecisionReason::BelowThreshold);
        assert_eq!(processed.marked_count(), 2);
        assert!(processed.payload.system.as_ref().unwrap()[0].get("cache_control").is_some());
        assert!(processed.payload.tools[0].get("cache_control").is_some());
        assert!(processed.payload.messages[0]["content"].is_string());
    }

    #[test]
    fn test_second_request_reuses_cache() {
        let engine = engine(2, 50);
        engine.process(request("What's the weather?"));
        let processed = engine.process(request("How far is Boston?"));

        assert_eq!(processed.decisions[0].reason, DecisionReason::AlreadyCached);
        assert_eq!(processed.decisions[1].reason, DecisionReason::AlreadyCached);
        assert!(processed.payload.tools[0].get("cache_control").is_some());

        let stats = engine.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.requests_with_hits, 1);
    }

    #[test]
    fn test_annotated_payload_is_recognized() {
        let engine = engine(2, 50);
        let first = engine.process(request("hi"));
        let second = engine.process(first.payload);

        assert_eq!(second.decisions[0].reason, DecisionReason::AlreadyCached);
        assert_eq!(second.decisions[1].reason, DecisionReason::AlreadyCached);
    }

    #[test]
    fn test_expired_entries_are_reselected() {
        let engine = SmartCache::new(EngineConfig {
            cache_duration: Duration::ZERO,
            min_token_count: 50,
            enable_logging: false,
            ..EngineConfig::default()
        });

        engine.process(request("one"));
        let processed = engine.process(request("two"));
        assert_eq!(processed.decisions[0].reason, DecisionReason::SelectedNew);
        assert_eq!(engine.stats().cache_hits, 0);
    }

    #[test]
    fn test_stale_markers_are_removed() {
        let engine = engine(4, 50);
        let payload = RequestPayload::new().with_message(
            "user",
            json!([{"type": "text", "text": "short", "cache_control": {"type": "ephemeral"}}]),
        );

        let processed = engine.process(payload);
        assert_eq!(processed.decisions[0].reason, DecisionReason::BelowThreshold);
        assert!(processed.payload.messages[0]["content"][0].get("cache_control").is_none());
    }

    #[test]
    fn test_unreadable_segment_is_left_untouched() {
        let engine = engine(4, 1);
        let mut deep = json!("bottom");
        for _ in 0..80 {
            deep = json!({ "inner": deep });
        }
        let content = json!([
            {"type": "text", "text": "hi", "cache_control": {"type": "ephemeral"}},
            deep
        ]);
        let payload = RequestPayload::new().with_message("user", content.clone());

        let processed = engine.process(payload);
        assert!(processed.segments[0].content.is_none());
        assert_eq!(processed.decisions[0].reason, DecisionReason::BelowThreshold);
        assert_eq!(processed.payload.messages[0]["content"], content);
    }

    #[test]
    fn test_process_json_passes_through_non_requests() {
        let engine = SmartCache::default();
        let raw = json!(["not", "a", "request"]);
        assert_eq!(engine.process_json(&raw), raw);

        let raw = json!({"messages": "not a list"});
        assert_eq!(engine.process_json(&raw), raw);
    }

    #[test]
    fn test_process_json_annotates() {
        let engine = engine(4, 50);
        let raw = json!({
            "model": "claude-3-5-sonnet-20241022",
            "system": "Be precise. ".repeat(40),
            "messages": [{"role": "user", "content": "hi"}]
        });

        let annotated = engine.process_json(&raw);
        assert_eq!(annotated["model"], raw["model"]);
        assert_eq!(annotated["system"][0]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn test_shared_store_between_engines() {
        let config = EngineConfig {
            min_token_count: 50,
            enable_logging: false,
            ..EngineConfig::default()
        };
        let first = SmartCache::new(config.clone());
        let second = SmartCache::with_shared(
            config,
            Arc::clone(first.store()),
            Arc::clone(first.statistics()),
        );

        first.process(request("a"));
        let processed = second.process(request("b"));
        assert_eq!(processed.decisions[0].reason, DecisionReason::AlreadyCached);
        assert_eq!(first.stats().total_requests, 2);
    }
}
