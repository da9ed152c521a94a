//! Token estimation for request content
//!
//! Exact tokenization depends on the vendor, so counts are approximate. The
//! default heuristic assumes ~4 characters per token; the `cl100k` backend
//! counts text leaves with a BPE tokenizer instead. Either way structured
//! content pays a small fixed overhead per field and per nesting level to
//! stand in for serialization syntax.

use super::Content;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Average characters per token for English text
pub const CHARS_PER_TOKEN: f32 = 4.0;

/// Tokens added per map field (key separator and quoting)
pub const FIELD_OVERHEAD: usize = 1;

/// Tokens added per non-empty map or sequence (brackets)
pub const NESTING_OVERHEAD: usize = 2;

/// Which counting backend to use for text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// Character-count heuristic
    #[default]
    Heuristic,
    /// cl100k_base BPE
    Cl100k,
}

/// Estimates token counts; never fails
#[derive(Clone)]
pub struct TokenEstimator {
    chars_per_token: f32,
    bpe: Option<Arc<CoreBPE>>,
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("chars_per_token", &self.chars_per_token)
            .field("bpe", &self.bpe.is_some())
            .finish()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    /// Heuristic estimator
    pub fn new() -> Self {
        Self {
            chars_per_token: CHARS_PER_TOKEN,
            bpe: None,
        }
    }

    /// Estimator for the configured backend, falling back to the heuristic
    /// when the BPE tables cannot be loaded
    pub fn for_tokenizer(kind: TokenizerKind) -> Self {
        match kind {
            TokenizerKind::Heuristic => Self::new(),
            TokenizerKind::Cl100k => match tiktoken_rs::cl100k_base() {
                Ok(bpe) => Self {
                    bpe: Some(Arc::new(bpe)),
                    ..Self::new()
                },
                Err(e) => {
                    warn!("Failed to load cl100k tokenizer, using heuristic: {}", e);
                    Self::new()
                }
            },
        }
    }

    /// Which backend is actually in use
    pub fn kind(&self) -> TokenizerKind {
        if self.bpe.is_some() {
            TokenizerKind::Cl100k
        } else {
            TokenizerKind::Heuristic
        }
    }

    /// Estimate tokens for normalized content
    pub fn estimate(&self, content: &Content) -> usize {
        match content {
            Content::Text(text) => self.estimate_text(text),
            Content::Literal(literal) => self.estimate_heuristic(literal),
            Content::Null => 0,
            Content::Map(fields) if fields.is_empty() => 0,
            Content::Map(fields) => {
                let inner: usize = fields
                    .iter()
                    .map(|(key, field)| {
                        self.estimate_text(key) + FIELD_OVERHEAD + self.estimate(field)
                    })
                    .sum();
                inner + NESTING_OVERHEAD
            }
            Content::Seq(items) if items.is_empty() => 0,
            Content::Seq(items) => {
                let inner: usize = items.iter().map(|item| self.estimate(item)).sum();
                inner + NESTING_OVERHEAD
            }
        }
    }

    /// Estimate tokens for a string
    pub fn estimate_text(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        match &self.bpe {
            Some(bpe) => bpe.encode_ordinary(text).len(),
            None => self.estimate_heuristic(text),
        }
    }

    fn estimate_heuristic(&self, text: &str) -> usize {
        (text.chars().count() as f32 / self.chars_per_token).ceil() as usize
    }
}
