//! Normalized content tree used for sizing and fingerprinting

use super::ClassifyError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Deepest nesting accepted before content is rejected as malformed
pub const MAX_DEPTH: usize = 64;

/// Key under which cache markers live; never part of the fingerprint
pub const MARKER_KEY: &str = "cache_control";

/// Request content with a canonical shape.
///
/// Maps keep their keys sorted, so two payloads that differ only in field
/// order normalize to the same tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// A string leaf
    Text(String),
    /// A number or boolean, kept in its canonical JSON rendering
    Literal(String),
    Null,
    Map(BTreeMap<String, Content>),
    Seq(Vec<Content>),
}

impl Content {
    /// Normalize a JSON value
    pub fn from_value(value: &Value) -> Result<Self, ClassifyError> {
        Self::convert(value, 0)
    }

    /// Normalize anything serde can represent as JSON
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, ClassifyError> {
        let value = serde_json::to_value(value)
            .map_err(|e| ClassifyError::Unserializable(e.to_string()))?;
        Self::from_value(&value)
    }

    fn convert(value: &Value, depth: usize) -> Result<Self, ClassifyError> {
        if depth > MAX_DEPTH {
            return Err(ClassifyError::TooDeep { limit: MAX_DEPTH });
        }

        let content = match value {
            Value::Null => Content::Null,
            Value::Bool(b) => Content::Literal(b.to_string()),
            Value::Number(n) => Content::Literal(n.to_string()),
            Value::String(s) => Content::Text(s.clone()),
            Value::Array(items) => match single_text_block(items) {
                Some(text) => Content::Text(text.to_string()),
                None => Content::Seq(
                    items
                        .iter()
                        .map(|item| Self::convert(item, depth + 1))
                        .collect::<Result<_, _>>()?,
                ),
            },
            Value::Object(fields) => Content::Map(
                fields
                    .iter()
                    .filter(|(key, _)| key.as_str() != MARKER_KEY)
                    .map(|(key, field)| Ok((key.clone(), Self::convert(field, depth + 1)?)))
                    .collect::<Result<_, ClassifyError>>()?,
            ),
        };

        Ok(content)
    }

    /// True for empty strings, null, and empty containers
    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(s) | Content::Literal(s) => s.is_empty(),
            Content::Null => true,
            Content::Map(fields) => fields.is_empty(),
            Content::Seq(items) => items.is_empty(),
        }
    }

    /// Canonical serialization: compact JSON with sorted keys
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Content::Text(s) => out.push_str(&quote(s)),
            Content::Literal(s) => out.push_str(s),
            Content::Null => out.push_str("null"),
            Content::Map(fields) => {
                out.push('{');
                for (idx, (key, field)) in fields.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    out.push_str(&quote(key));
                    out.push(':');
                    field.write_canonical(out);
                }
                out.push('}');
            }
            Content::Seq(items) => {
                out.push('[');
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
        }
    }

    /// Look up a field of a map
    pub fn field(&self, key: &str) -> Option<&Content> {
        match self {
            Content::Map(fields) => fields.get(key),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// `[{"type": "text", "text": X}]` means the same as the plain string X
fn single_text_block(items: &[Value]) -> Option<&str> {
    let [Value::Object(block)] = items else {
        return None;
    };

    let mut is_text = false;
    let mut text = None;
    for (key, value) in block {
        match (key.as_str(), value) {
            ("type", Value::String(kind)) if kind == "text" => is_text = true,
            ("text", Value::String(body)) => text = Some(body.as_str()),
            (MARKER_KEY, _) => {}
            _ => return None,
        }
    }

    if is_text {
        text
    } else {
        None
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_default()
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}
