//! Decoded stream events.
//!
//! `StreamEvent` is what the decoder makes of raw model text: plain prose,
//! reasoning, complete tool invocations, and the control signals around them.

use serde::{Deserialize, Serialize};
use windlass_core::error::MalformedMarkup;
use windlass_core::tool::ToolCall;

/// Events emitted by the decoder, in order of appearance in the text.
///
/// - `plain_text`       — confirmed prose outside any block
/// - `thinking_text`    — the body of a complete thinking block
/// - `tool_call`        — a complete, registered tool invocation
/// - `truncated_signal` — the round stopped at the length limit
/// - `malformed_block`  — raw text of a tool block left unclosed at stream end
/// - `recovered`        — the decoder flushed an unclosed block and carried on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    PlainText { text: String },

    ThinkingText { text: String },

    ToolCall(ToolCall),

    TruncatedSignal,

    MalformedBlock { text: String },

    Recovered(MalformedMarkup),
}

impl StreamEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PlainText { .. } => "plain_text",
            Self::ThinkingText { .. } => "thinking_text",
            Self::ToolCall(_) => "tool_call",
            Self::TruncatedSignal => "truncated_signal",
            Self::MalformedBlock { .. } => "malformed_block",
            Self::Recovered(_) => "recovered",
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::ThinkingText { text: text.into() }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Self::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// Merge adjacent `PlainText` events.
///
/// How prose is chunked depends on fragment boundaries; the coalesced
/// sequence does not.
pub fn coalesce_plain_text<I>(events: I) -> Vec<StreamEvent>
where
    I: IntoIterator<Item = StreamEvent>,
{
    let mut out: Vec<StreamEvent> = Vec::new();
    for event in events {
        match (out.last_mut(), event) {
            (Some(StreamEvent::PlainText { text: acc }), StreamEvent::PlainText { text }) => {
                acc.push_str(&text);
            }
            (_, event) => out.push(event),
        }
    }
    out
}

/// The tool calls among `events`, in order.
pub fn tool_calls(events: &[StreamEvent]) -> Vec<ToolCall> {
    events
        .iter()
        .filter_map(StreamEvent::as_tool_call)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use windlass_core::tool::ToolArgs;

    #[test]
    fn event_serialization_plain_text() {
        let json = serde_json::to_string(&StreamEvent::plain("Hello")).unwrap();
        assert_eq!(json, r#"{"type":"plain_text","text":"Hello"}"#);
    }

    #[test]
    fn event_serialization_tool_call() {
        let mut args = ToolArgs::new();
        args.insert("path".into(), "a.rs".into());
        let event = StreamEvent::ToolCall(ToolCall {
            name: "read_file".into(),
            raw_markup: "<read_file><path>a.rs</path></read_file>".into(),
            args,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"read_file""#));
        assert!(json.contains(r#""args":{"path":"a.rs"}"#));
    }

    #[test]
    fn event_serialization_recovered() {
        let event = StreamEvent::Recovered(MalformedMarkup::UnclosedTool {
            tag: "read_file".into(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"recovered""#));
        assert!(json.contains(r#""kind":"unclosed_tool""#));
        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn event_deserialization() {
        let event: StreamEvent = serde_json::from_str(r#"{"type":"truncated_signal"}"#).unwrap();
        assert_eq!(event, StreamEvent::TruncatedSignal);
        assert_eq!(event.event_type(), "truncated_signal");
    }

    #[test]
    fn coalesce_merges_only_adjacent_plain_text() {
        let events = vec![
            StreamEvent::plain("a"),
            StreamEvent::plain("b"),
            StreamEvent::thinking("t"),
            StreamEvent::plain("c"),
            StreamEvent::TruncatedSignal,
            StreamEvent::plain("d"),
            StreamEvent::plain("e"),
        ];
        assert_eq!(
            coalesce_plain_text(events),
            vec![
                StreamEvent::plain("ab"),
                StreamEvent::thinking("t"),
                StreamEvent::plain("c"),
                StreamEvent::TruncatedSignal,
                StreamEvent::plain("de"),
            ]
        );
    }
}
