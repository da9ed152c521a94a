//! Breakpoint allocation under a fixed per-request budget

use super::CacheStore;
use crate::analysis::{Fingerprint, Segment};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Instant;

/// Why a segment did or did not get a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Content is still live in the cache store
    AlreadyCached,
    /// Newly chosen for a breakpoint
    SelectedNew,
    /// Too small (or unreadable) to be worth a breakpoint
    BelowThreshold,
    /// Eligible, but no breakpoints were left
    BudgetExhausted,
}

/// Per-segment allocation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationDecision {
    pub segment_position: usize,
    pub mark_cacheable: bool,
    pub reason: DecisionReason,
}

impl AllocationDecision {
    fn new(segment_position: usize, reason: DecisionReason) -> Self {
        Self {
            segment_position,
            mark_cacheable: matches!(
                reason,
                DecisionReason::AlreadyCached | DecisionReason::SelectedNew
            ),
            reason,
        }
    }
}

/// Whether re-sending cached content uses up a breakpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReusePolicy {
    /// Cached content keeps its marker without spending budget
    #[default]
    Free,
    /// Cached content is marked first and each one spends a breakpoint
    ConsumesSlot,
}

/// Picks which segments of a request receive cache markers
#[derive(Debug, Clone, Default)]
pub struct BreakpointAllocator {
    policy: ReusePolicy,
}

impl BreakpointAllocator {
    pub fn new(policy: ReusePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ReusePolicy {
        self.policy
    }

    /// Decide markers for `segments` (in request order), spending at most
    /// `budget` new breakpoints. Sets `already_cached` on each segment and
    /// records every new selection in `store`. Returns one decision per
    /// segment, in the same order.
    ///
    /// Content repeated within one request is selected once; later copies
    /// are treated as reuse of that selection.
    pub fn allocate(
        &self,
        segments: &mut [Segment],
        budget: usize,
        store: &CacheStore,
    ) -> Vec<AllocationDecision> {
        self.allocate_at(segments, budget, store, Instant::now())
    }

    pub(crate) fn allocate_at(
        &self,
        segments: &mut [Segment],
        budget: usize,
        store: &CacheStore,
        now: Instant,
    ) -> Vec<AllocationDecision> {
        let mut reasons = vec![DecisionReason::BelowThreshold; segments.len()];
        let mut cached = Vec::new();
        let mut eligible = Vec::new();

        for (idx, segment) in segments.iter_mut().enumerate() {
            segment.already_cached = false;
            if !segment.cacheable_candidate {
                continue;
            }
            let Some(fingerprint) = &segment.fingerprint else {
                continue;
            };

            segment.already_cached = store.get_at(fingerprint, now).is_some();
            if segment.already_cached {
                cached.push(idx);
            } else {
                eligible.push(idx);
            }
        }

        let mut remaining = budget;

        match self.policy {
            ReusePolicy::Free => {
                for idx in cached {
                    reasons[idx] = DecisionReason::AlreadyCached;
                }
            }
            ReusePolicy::ConsumesSlot => {
                rank(segments, &mut cached);
                for idx in cached {
                    reasons[idx] = if remaining > 0 {
                        remaining -= 1;
                        DecisionReason::AlreadyCached
                    } else {
                        DecisionReason::BudgetExhausted
                    };
                }
            }
        }

        rank(segments, &mut eligible);
        let mut selected: HashSet<Fingerprint> = HashSet::new();
        for idx in eligible {
            let segment = &mut segments[idx];
            let Some(fingerprint) = segment.fingerprint.clone() else {
                continue;
            };

            if selected.contains(&fingerprint) {
                segment.already_cached = true;
                reasons[idx] = match self.policy {
                    ReusePolicy::Free => DecisionReason::AlreadyCached,
                    ReusePolicy::ConsumesSlot if remaining > 0 => {
                        remaining -= 1;
                        DecisionReason::AlreadyCached
                    }
                    ReusePolicy::ConsumesSlot => DecisionReason::BudgetExhausted,
                };
                continue;
            }

            if remaining == 0 {
                reasons[idx] = DecisionReason::BudgetExhausted;
                continue;
            }

            remaining -= 1;
            reasons[idx] = DecisionReason::SelectedNew;
            store.put_at(fingerprint.clone(), segment.estimated_tokens, segment.kind, now);
            selected.insert(fingerprint);
        }

        segments
            .iter()
            .zip(reasons)
            .map(|(segment, reason)| AllocationDecision::new(segment.position, reason))
            .collect()
    }
}

/// Sort segment indices by kind priority, then larger first, then earlier
fn rank(segments: &[Segment], indices: &mut [usize]) {
    indices.sort_by(|&a, &b| compare_priority(&segments[a], &segments[b]));
}

fn compare_priority(a: &Segment, b: &Segment) -> Ordering {
    a.kind
        .cache_priority()
        .cmp(&b.kind.cache_priority())
        .then_with(|| b.estimated_tokens.cmp(&a.estimated_tokens))
        .then_with(|| a.position.cmp(&b.position))
}
