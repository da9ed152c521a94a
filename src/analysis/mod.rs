//! Segment analysis: sizing, fingerprinting and classifying request content
//!
//! Every request is cut into ordered [`Segment`]s (system prompt, tool
//! definitions, messages). Each segment is normalized into a [`Content`]
//! tree, sized by the [`TokenEstimator`] and fingerprinted so the cache
//! store can recognise content it has already seen.

mod classifier;
mod content;
mod estimator;

pub use classifier::{ClassifyError, ContentAnalysis, ContentClassifier, ContentType, Fingerprint};
pub use content::{Content, MARKER_KEY, MAX_DEPTH};
pub use estimator::{
    TokenEstimator, TokenizerKind, CHARS_PER_TOKEN, FIELD_OVERHEAD, NESTING_OVERHEAD,
};

use serde::{Deserialize, Serialize};

/// Which part of the request a segment was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// The system prompt
    System,
    /// One entry of the tool list
    ToolDefinitions,
    /// One conversation message
    Message,
}

impl SegmentKind {
    /// Returns a priority for ranking (lower = cached first).
    ///
    /// System prompts and tools rarely change between requests, so they are
    /// the most likely to be re-sent verbatim.
    pub fn cache_priority(&self) -> u8 {
        match self {
            SegmentKind::System => 0,
            SegmentKind::ToolDefinitions => 1,
            SegmentKind::Message => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::System => "system",
            SegmentKind::ToolDefinitions => "tool_definitions",
            SegmentKind::Message => "message",
        }
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of request content eligible for a cache breakpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Where in the request this came from
    pub kind: SegmentKind,
    /// Index in the ordered segment list of the request
    pub position: usize,
    /// Normalized content; `None` when the raw content could not be normalized
    pub content: Option<Content>,
    /// Structural classification
    pub content_type: ContentType,
    /// Estimated size in tokens
    pub estimated_tokens: usize,
    /// Digest of the normalized content; `None` when normalization failed
    pub fingerprint: Option<Fingerprint>,
    /// Size is at or above the configured minimum
    pub cacheable_candidate: bool,
    /// Set by the allocator after consulting the cache store
    pub already_cached: bool,
}

impl Segment {
    /// Build a segment from a completed analysis
    pub fn from_analysis(
        kind: SegmentKind,
        position: usize,
        content: Option<Content>,
        analysis: ContentAnalysis,
    ) -> Self {
        Self {
            kind,
            position,
            content,
            content_type: analysis.content_type,
            estimated_tokens: analysis.estimated_tokens,
            fingerprint: analysis.fingerprint,
            cacheable_candidate: analysis.cacheable_candidate,
            already_cached: false,
        }
    }
}
