//! Request payload: segment extraction and marker placement

use crate::analysis::{ContentClassifier, Segment, SegmentKind, MARKER_KEY};
use crate::cache::CacheControl;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

/// An outbound request in the Messages API shape.
///
/// Only `system`, `tools` and `messages` are inspected; every other field
/// is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// String or array of text blocks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,

    #[serde(default)]
    pub messages: Vec<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Location of a segment inside the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentSlot {
    System,
    Tool(usize),
    Message(usize),
}

impl RequestPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn with_system(mut self, system: impl Into<Value>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tool(mut self, tool: Value) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_message(mut self, role: &str, content: impl Into<Value>) -> Self {
        self.messages.push(json!({ "role": role, "content": content.into() }));
        self
    }

    /// Number of segments this payload splits into
    pub fn segment_count(&self) -> usize {
        usize::from(self.system.is_some()) + self.tools.len() + self.messages.len()
    }

    /// Map a segment position back to where it lives in the payload
    pub fn slot(&self, position: usize) -> Option<SegmentSlot> {
        let mut position = position;

        if self.system.is_some() {
            if position == 0 {
                return Some(SegmentSlot::System);
            }
            position -= 1;
        }
        if position < self.tools.len() {
            return Some(SegmentSlot::Tool(position));
        }
        position -= self.tools.len();
        if position < self.messages.len() {
            return Some(SegmentSlot::Message(position));
        }

        None
    }

    /// Split into ordered segments: system, then tools, then messages.
    ///
    /// Segments whose shape cannot carry a marker are never candidates.
    pub fn extract_segments(&self, classifier: &ContentClassifier) -> Vec<Segment> {
        let mut segments = Vec::with_capacity(self.segment_count());

        let parts = self
            .system
            .iter()
            .map(|system| (SegmentKind::System, system))
            .chain(self.tools.iter().map(|tool| (SegmentKind::ToolDefinitions, tool)))
            .chain(self.messages.iter().map(|message| (SegmentKind::Message, message)));

        for (kind, raw) in parts {
            let mut segment = classifier.classify(kind, segments.len(), raw);
            if segment.cacheable_candidate && !self.can_mark(segment.position) {
                debug!("Segment {} ({}) cannot carry a cache marker", segment.position, kind);
                segment.cacheable_candidate = false;
            }
            segments.push(segment);
        }

        segments
    }

    /// Whether the segment at `position` has a shape a marker can attach to
    pub fn can_mark(&self, position: usize) -> bool {
        match self.slot(position) {
            Some(SegmentSlot::System) => self.system.as_ref().is_some_and(content_accepts_marker),
            Some(SegmentSlot::Tool(idx)) => self.tools[idx].is_object(),
            Some(SegmentSlot::Message(idx)) => self.messages[idx]
                .get("content")
                .is_some_and(content_accepts_marker),
            None => false,
        }
    }

    /// Attach `marker` to the segment at `position`; false if it could not be placed
    pub fn apply_marker(&mut self, position: usize, marker: &CacheControl) -> bool {
        let marker = marker.to_value();

        match self.slot(position) {
            Some(SegmentSlot::System) => self
                .system
                .as_mut()
                .is_some_and(|system| mark_content(system, marker)),
            Some(SegmentSlot::Tool(idx)) => match &mut self.tools[idx] {
                Value::Object(tool) => {
                    tool.insert(MARKER_KEY.to_string(), marker);
                    true
                }
                _ => false,
            },
            Some(SegmentSlot::Message(idx)) => self.messages[idx]
                .get_mut("content")
                .is_some_and(|content| mark_content(content, marker)),
            None => false,
        }
    }

    /// Remove any marker already present on the segment at `position`
    pub fn clear_marker(&mut self, position: usize) {
        match self.slot(position) {
            Some(SegmentSlot::System) => {
                if let Some(system) = self.system.as_mut() {
                    unmark_content(system);
                }
            }
            Some(SegmentSlot::Tool(idx)) => {
                if let Value::Object(tool) = &mut self.tools[idx] {
                    tool.remove(MARKER_KEY);
                }
            }
            Some(SegmentSlot::Message(idx)) => {
                if let Some(content) = self.messages[idx].get_mut("content") {
                    unmark_content(content);
                }
            }
            None => {}
        }
    }
}

fn content_accepts_marker(content: &Value) -> bool {
    match content {
        Value::String(text) => !text.is_empty(),
        Value::Array(blocks) => matches!(blocks.last(), Some(Value::Object(_))),
        _ => false,
    }
}

/// Strings become a single marked text block; block arrays get the marker
/// on their last block
fn mark_content(content: &mut Value, marker: Value) -> bool {
    match content {
        Value::String(text) if !text.is_empty() => {
            let text = std::mem::take(text);
            *content = json!([{ "type": "text", "text": text, MARKER_KEY: marker }]);
            true
        }
        Value::Array(blocks) => match blocks.last_mut() {
            Some(Value::Object(block)) => {
                block.insert(MARKER_KEY.to_string(), marker);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

fn unmark_content(content: &mut Value) {
    if let Value::Array(blocks) = content {
        for block in blocks.iter_mut() {
            if let Value::Object(block) = block {
                block.remove(MARKER_KEY);
            }
        }
    }
}
