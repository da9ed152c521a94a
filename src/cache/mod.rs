//! Prompt-cache breakpoint planning
//!
//! APIs with prompt caching accept only a handful of cache breakpoints per
//! request, and caching a segment below the provider's minimum size wastes
//! one. This module decides which segments get a breakpoint and remembers
//! what has already been cached.
//!
//! ## Allocation rules
//!
//! 1. **Reuse first**: content cached within the TTL keeps its marker
//! 2. **Minimum size**: segments below the token threshold are never marked
//! 3. **Stable content first**: system > tools > messages, then larger
//!    segments, then earlier ones
//! 4. **Budget**: at most `max_cache_blocks` new breakpoints per request

mod allocator;
mod store;

pub use allocator::{AllocationDecision, BreakpointAllocator, DecisionReason, ReusePolicy};
pub use store::{CacheEntry, CacheStore, MAX_CACHE_DURATION};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum breakpoints the downstream API accepts per request
pub const MAX_API_BREAKPOINTS: usize = 4;

/// Minimum tokens required for caching (Anthropic requirement)
pub const MIN_CACHE_TOKENS: usize = 1024;

/// Cache control directive attached to marked segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    /// Type of cache control
    #[serde(rename = "type")]
    pub control_type: CacheControlType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheControlType {
    /// Mark this as an ephemeral cache breakpoint
    Ephemeral,
}

impl CacheControlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheControlType::Ephemeral => "ephemeral",
        }
    }
}

impl CacheControl {
    /// JSON form as it appears in the request payload
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "type": self.control_type.as_str() })
    }
}

impl Default for CacheControl {
    fn default() -> Self {
        Self {
            control_type: CacheControlType::Ephemeral,
        }
    }
}
