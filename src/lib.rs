//! smart-cache - Decide which parts of an LLM request get prompt-cache breakpoints
//!
//! APIs with prompt caching accept a handful of cache breakpoints per
//! request. This library picks where to spend them.
//!
//! ## Key Features
//!
//! - **Segment Analysis**: Size, fingerprint and classify system prompts, tools and messages
//! - **Breakpoint Allocation**: Rank segments under a fixed budget, skipping content too small
//!   to cache
//! - **Reuse Tracking**: Remember what was cached and for how long, so unchanged content keeps
//!   its marker
//! - **Statistics**: Hit rate, tokens cached and skipped, and estimated cost savings
//!
//! ```no_run
//! use smart_cache::{RequestPayload, SmartCache};
//!
//! let engine = SmartCache::default();
//! let request = RequestPayload::new()
//!     .with_system("You are a helpful assistant.")
//!     .with_message("user", "Hello!");
//!
//! let processed = engine.process(request);
//! println!("{}", engine.stats());
//! # let _ = processed;
//! ```

pub mod analysis;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod orchestrator;

pub use analysis::{
    ClassifyError, Content, ContentAnalysis, ContentClassifier, ContentType, Fingerprint, Segment,
    SegmentKind, TokenEstimator, TokenizerKind,
};
pub use cache::{
    AllocationDecision, BreakpointAllocator, CacheControl, CacheEntry, CacheStore, DecisionReason,
    ReusePolicy,
};
pub use config::{Config, ConfigBuilder, ConfigError, EngineConfig};
pub use metrics::{CacheStatistics, RequestTally, StatsSnapshot};
pub use orchestrator::{ProcessedRequest, RequestPayload, SmartCache};
