// End-to-end checks of the cache planning engine through its public API

use serde_json::{json, Value};
use smart_cache::{
    ConfigBuilder, DecisionReason, EngineConfig, RequestPayload, ReusePolicy, SegmentKind,
    SmartCache,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn engine(max_cache_blocks: i64, min_token_count: i64) -> SmartCache {
    let config = ConfigBuilder::new()
        .max_cache_blocks(max_cache_blocks)
        .min_token_count(min_token_count)
        .enable_logging(false)
        .build()
        .validate()
        .unwrap();
    SmartCache::new(config)
}

/// Tool whose heuristic estimate is exactly `tokens` (for tokens > 10)
fn tool(name: &str, tokens: usize) -> Value {
    assert_eq!(name.len(), 6);
    json!({"name": name, "description": "d".repeat((tokens - 10) * 4)})
}

/// User message whose heuristic estimate is exactly `tokens` (for tokens > 8)
fn message(fill: char, tokens: usize) -> Value {
    json!({"role": "user", "content": fill.to_string().repeat((tokens - 8) * 4)})
}

/// System prompt (2000), three tools (500 each), five messages (100 each)
fn sample_request() -> RequestPayload {
    let mut payload = RequestPayload::new().with_system("s".repeat(8000));
    for name in ["tool_a", "tool_b", "tool_c"] {
        payload = payload.with_tool(tool(name, 500));
    }
    for fill in ['a', 'b', 'c', 'd', 'e'] {
        payload.messages.push(message(fill, 100));
    }
    payload
}

#[test]
fn test_priority_ordering() {
    let engine = engine(2, 400);
    let processed = engine.process(sample_request());

    let sizes: Vec<_> = processed.segments.iter().map(|s| s.estimated_tokens).collect();
    assert_eq!(sizes, vec![2000, 500, 500, 500, 100, 100, 100, 100, 100]);

    let selected: Vec<_> = processed
        .decisions
        .iter()
        .filter(|d| d.reason == DecisionReason::SelectedNew)
        .map(|d| d.segment_position)
        .collect();
    assert_eq!(selected, vec![0, 1]);
    assert!(processed.decisions[4..]
        .iter()
        .all(|d| d.reason == DecisionReason::BelowThreshold && !d.mark_cacheable));

    assert!(processed.payload.tools[0].get("cache_control").is_some());
    assert!(processed.payload.tools[1].get("cache_control").is_none());
}

#[test]
fn test_reuse_idempotence() {
    let engine = engine(2, 400);
    engine.process(sample_request());
    let processed = engine.process(sample_request());

    assert_eq!(processed.decisions[0].reason, DecisionReason::AlreadyCached);
    assert_eq!(processed.decisions[1].reason, DecisionReason::AlreadyCached);
    // Reused content left the whole budget for the next tools
    assert_eq!(processed.decisions[2].reason, DecisionReason::SelectedNew);
    assert_eq!(processed.decisions[3].reason, DecisionReason::SelectedNew);
}

#[test]
fn test_reuse_consuming_slots() {
    let config = ConfigBuilder::new()
        .max_cache_blocks(2)
        .min_token_count(400)
        .reuse_policy(ReusePolicy::ConsumesSlot)
        .enable_logging(false)
        .build()
        .validate()
        .unwrap();
    let engine = SmartCache::new(config);

    engine.process(sample_request());
    let processed = engine.process(sample_request());

    assert_eq!(processed.decisions[0].reason, DecisionReason::AlreadyCached);
    assert_eq!(processed.decisions[1].reason, DecisionReason::AlreadyCached);
    assert_eq!(processed.decisions[2].reason, DecisionReason::BudgetExhausted);
}

#[test]
fn test_expiry() {
    let engine = SmartCache::new(EngineConfig {
        cache_duration: Duration::ZERO,
        max_cache_blocks: 2,
        min_token_count: 400,
        enable_logging: false,
        ..EngineConfig::default()
    });

    engine.process(sample_request());
    let processed = engine.process(sample_request());

    assert_eq!(processed.decisions[0].reason, DecisionReason::SelectedNew);

    // Each insert drops what had already expired, so only the last one remains
    assert_eq!(engine.store().len(), 1);
    assert_eq!(engine.evict_expired(), 1);
    assert!(engine.store().is_empty());
}

#[test]
fn test_expired_entries_do_not_accumulate() {
    let engine = SmartCache::new(EngineConfig {
        cache_duration: Duration::ZERO,
        min_token_count: 400,
        enable_logging: false,
        ..EngineConfig::default()
    });

    for round in 0..500 {
        let payload = RequestPayload::new().with_system(format!("{round:04}").repeat(2000));
        engine.process(payload);
    }

    assert!(engine.store().len() <= 1);
}

#[test]
fn test_statistics_consistency() {
    let engine = engine(2, 400);
    let mut candidate_tokens = 0u64;

    for round in 0..5 {
        let mut payload = sample_request();
        payload.messages.push(message('z', 600 + round));
        let processed = engine.process(payload);

        candidate_tokens += processed
            .segments
            .iter()
            .filter(|s| s.cacheable_candidate)
            .map(|s| s.estimated_tokens as u64)
            .sum::<u64>();
    }

    let stats = engine.stats();
    assert_eq!(stats.total_requests, 5);
    assert_eq!(stats.total_tokens_cached + stats.total_tokens_skipped, candidate_tokens);
    assert!((0.0..=100.0).contains(&stats.cache_hit_rate));
    assert!(stats.estimated_savings > 0.0);
}

#[test]
fn test_threshold_never_marked() {
    for min_tokens in [1, 99, 100, 101, 499, 500, 501, 2000, 2001] {
        let engine = engine(4, min_tokens);
        let processed = engine.process(sample_request());

        for (segment, decision) in processed.segments.iter().zip(&processed.decisions) {
            if (segment.estimated_tokens as i64) < min_tokens {
                assert!(!decision.mark_cacheable, "min {min_tokens}: {segment:?}");
            }
        }
    }
}

#[test]
fn test_fail_open_on_deep_content() {
    let engine = engine(4, 1);

    let mut nested = json!("x".repeat(10_000));
    for _ in 0..200 {
        nested = json!({"inner": nested});
    }
    let payload = RequestPayload::new()
        .with_system("s".repeat(8000))
        .with_message("user", nested.clone());

    let processed = engine.process(payload);
    assert_eq!(processed.decisions[0].reason, DecisionReason::SelectedNew);
    assert_eq!(processed.decisions[1].reason, DecisionReason::BelowThreshold);
    assert_eq!(processed.payload.messages[0]["content"], nested);
    assert_eq!(engine.stats().total_requests, 1);
}

#[test]
fn test_fail_open_on_unserializable_content() {
    let engine = engine(4, 1);
    let mut raw = HashMap::new();
    raw.insert((1, 2), "x".repeat(10_000));

    let analysis = engine
        .classifier()
        .analyze_serialize(SegmentKind::ToolDefinitions, &raw);
    assert!(!analysis.cacheable_candidate);
    assert_eq!(analysis.estimated_tokens, 0);
}

#[test]
fn test_concurrent_requests() {
    let engine = Arc::new(engine(2, 400));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    let processed = engine.process(sample_request());
                    let new = processed
                        .decisions
                        .iter()
                        .filter(|d| d.reason == DecisionReason::SelectedNew)
                        .count();
                    assert!(new <= 2);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = engine.stats();
    assert_eq!(stats.total_requests, 80);
    assert_eq!(engine.store().len(), 4);
}
