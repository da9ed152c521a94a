//! Content classification for cache decisions

use super::{Content, Segment, SegmentKind, TokenEstimator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("Content cannot be serialized: {0}")]
    Unserializable(String),

    #[error("Content nests deeper than {limit} levels")]
    TooDeep { limit: usize },
}

/// SHA-256 digest of normalized content, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(content: &Content) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.canonical().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for logs
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structural classification of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    SystemPrompt,
    ToolDefinition,
    UserMessage,
    AssistantMessage,
    /// Tool output fed back to the model
    ToolResult,
    Other,
}

/// Result of analyzing one segment's content
#[derive(Debug, Clone, PartialEq)]
pub struct ContentAnalysis {
    pub content_type: ContentType,
    pub estimated_tokens: usize,
    /// `None` when the content could not be normalized
    pub fingerprint: Option<Fingerprint>,
    /// Large enough to be worth a breakpoint; necessary, not sufficient
    pub cacheable_candidate: bool,
}

impl ContentAnalysis {
    /// Analysis for content that could not be normalized
    pub fn degraded(kind: SegmentKind) -> Self {
        Self {
            content_type: content_type_for_kind(kind),
            estimated_tokens: 0,
            fingerprint: None,
            cacheable_candidate: false,
        }
    }
}

/// Sizes, fingerprints and classifies segment content
#[derive(Debug, Clone)]
pub struct ContentClassifier {
    estimator: TokenEstimator,
    min_token_count: usize,
}

impl ContentClassifier {
    pub fn new(estimator: TokenEstimator, min_token_count: usize) -> Self {
        Self {
            estimator,
            min_token_count,
        }
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    pub fn min_token_count(&self) -> usize {
        self.min_token_count
    }

    /// Analyze raw JSON content. Malformed content degrades to a
    /// non-cacheable analysis instead of failing.
    pub fn analyze(&self, kind: SegmentKind, raw: &Value) -> ContentAnalysis {
        match Content::from_value(raw) {
            Ok(content) => self.analyze_content(kind, &content),
            Err(e) => {
                warn!("Treating {} content as non-cacheable: {}", kind, e);
                ContentAnalysis::degraded(kind)
            }
        }
    }

    /// Analyze any serializable value, with the same fail-open behavior as
    /// [`ContentClassifier::analyze`]
    pub fn analyze_serialize<T: Serialize + ?Sized>(
        &self,
        kind: SegmentKind,
        raw: &T,
    ) -> ContentAnalysis {
        match Content::from_serialize(raw) {
            Ok(content) => self.analyze_content(kind, &content),
            Err(e) => {
                warn!("Treating {} content as non-cacheable: {}", kind, e);
                ContentAnalysis::degraded(kind)
            }
        }
    }

    /// Analyze already-normalized content
    pub fn analyze_content(&self, kind: SegmentKind, content: &Content) -> ContentAnalysis {
        let estimated_tokens = self.estimator.estimate(content);

        ContentAnalysis {
            content_type: classify_content_type(kind, content),
            estimated_tokens,
            fingerprint: Some(Fingerprint::of(content)),
            cacheable_candidate: estimated_tokens > 0 && estimated_tokens >= self.min_token_count,
        }
    }

    /// Build the segment at `position` from raw JSON content
    pub fn classify(&self, kind: SegmentKind, position: usize, raw: &Value) -> Segment {
        match Content::from_value(raw) {
            Ok(content) => {
                let analysis = self.analyze_content(kind, &content);
                Segment::from_analysis(kind, position, Some(content), analysis)
            }
            Err(e) => {
                warn!("Segment {} ({}) is not cacheable: {}", position, kind, e);
                Segment::from_analysis(kind, position, None, ContentAnalysis::degraded(kind))
            }
        }
    }
}

fn content_type_for_kind(kind: SegmentKind) -> ContentType {
    match kind {
        SegmentKind::System => ContentType::SystemPrompt,
        SegmentKind::ToolDefinitions => ContentType::ToolDefinition,
        SegmentKind::Message => ContentType::Other,
    }
}

fn classify_content_type(kind: SegmentKind, content: &Content) -> ContentType {
    match kind {
        SegmentKind::Message => classify_message(content),
        _ => content_type_for_kind(kind),
    }
}

fn classify_message(message: &Content) -> ContentType {
    let Some(role) = message.field("role").and_then(Content::as_text) else {
        return ContentType::Other;
    };

    match role.to_ascii_lowercase().as_str() {
        "user" | "human" if is_tool_result_blocks(message.field("content")) => {
            ContentType::ToolResult
        }
        "user" | "human" => ContentType::UserMessage,
        "assistant" | "ai" => ContentType::AssistantMessage,
        "tool" | "function" => ContentType::ToolResult,
        "system" => ContentType::SystemPrompt,
        _ => ContentType::Other,
    }
}

fn is_tool_result_blocks(content: Option<&Content>) -> bool {
    match content {
        Some(Content::Seq(blocks)) if !blocks.is_empty() => blocks.iter().all(|block| {
            block.field("type").and_then(Content::as_text) == Some("tool_result")
        }),
        _ => false,
    }
}
