//! Budget-driven compaction of tool payloads.
//!
//! Tool result envelopes lose their payload; tool invocations keep their
//! structure but long field values are replaced with a placeholder. The
//! oldest candidates go first, and a floor of untouched classified messages
//! is always kept so the model retains some recent working context.

use serde::{Deserialize, Serialize};
use tracing::debug;
use windlass_core::markup::{find_blocks, rewrite_fields};
use windlass_core::message::{Message, Role, render_with_id_hint, split_id_hint};
use windlass_core::tool::{CLEARED_PLACEHOLDER, ToolResultEnvelope, ToolSchemaRegistry};

use super::token::TokenCounter;

/// What kind of compactable content a message holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageClass {
    /// A user message wrapping a tool result envelope
    ToolResult,
    /// An assistant message containing a registered tool invocation
    ToolCall,
}

/// One message rewritten by compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionRecord {
    /// Position in the list handed to the compactor
    pub index: usize,
    pub message_id: String,
    pub class: MessageClass,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Classify a message for compaction, or `None` if it is not eligible.
pub fn classify(message: &Message, registry: &ToolSchemaRegistry) -> Option<MessageClass> {
    match message.role {
        Role::User if ToolResultEnvelope::is_envelope(&message.content) => {
            Some(MessageClass::ToolResult)
        }
        Role::Assistant
            if !find_blocks(&message.content, |name| registry.contains(name)).is_empty() =>
        {
            Some(MessageClass::ToolCall)
        }
        _ => None,
    }
}

/// Replace an envelope's payload with the cleared stand-in, keeping the
/// id hint.
pub fn clear_tool_result(content: &str) -> Option<String> {
    let (body, hint) = split_id_hint(content);
    let envelope = ToolResultEnvelope::parse(&body)?;
    let cleared = envelope.cleared().render();
    Some(match hint {
        Some(id) => render_with_id_hint(&cleared, &id),
        None => cleared,
    })
}

/// Replace every field value of every registered tool block whose trimmed
/// length exceeds `threshold` characters. Field names and short values are
/// kept verbatim.
pub fn truncate_tool_call(content: &str, registry: &ToolSchemaRegistry, threshold: usize) -> String {
    let blocks = find_blocks(content, |name| registry.contains(name));
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for block in blocks {
        let fields = registry.fields(&block.name).unwrap_or(&[]);
        let inner = &content[block.inner_start..block.inner_end];
        let rewritten = rewrite_fields(inner, fields, |_, raw| {
            (raw.trim().chars().count() > threshold).then(|| CLEARED_PLACEHOLDER.to_string())
        });
        out.push_str(&content[last..block.inner_start]);
        out.push_str(&rewritten);
        last = block.inner_end;
    }
    out.push_str(&content[last..]);
    out
}

/// Result of a compaction pass.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub messages: Vec<Message>,
    pub records: Vec<CompactionRecord>,
    pub tokens_after: usize,
}

/// Compact `messages` until they fit `budget` or the floor is reached.
///
/// The first and last messages are never candidates. A candidate is only
/// processed while more than `min_retained` classified messages remain
/// unprocessed.
pub fn compact(
    messages: Vec<Message>,
    counter: &dyn TokenCounter,
    registry: &ToolSchemaRegistry,
    budget: usize,
    min_retained: usize,
    field_threshold: usize,
) -> CompactionOutcome {
    let mut messages = messages;
    let mut current = counter.count_messages(&messages);
    let last_index = messages.len().saturating_sub(1);

    let mut candidates: Vec<(usize, MessageClass)> = messages
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 0 && *i != last_index)
        .filter_map(|(i, m)| classify(m, registry).map(|class| (i, class)))
        .collect();
    candidates.sort_by_key(|(i, class)| (*i, *class != MessageClass::ToolResult));

    let total = candidates.len();
    let mut records = Vec::new();

    for (processed, (index, class)) in candidates.into_iter().enumerate() {
        if current <= budget {
            break;
        }
        if total - processed <= min_retained {
            debug!(
                remaining = total - processed,
                floor = min_retained,
                "Compaction stopped at retention floor"
            );
            break;
        }

        let message = &messages[index];
        let new_content = match class {
            MessageClass::ToolResult => clear_tool_result(&message.content),
            MessageClass::ToolCall => Some(truncate_tool_call(
                &message.content,
                registry,
                field_threshold,
            )),
        };
        let Some(new_content) = new_content.filter(|c| *c != message.content) else {
            continue;
        };

        let tokens_before = counter.count_message(message);
        let replacement = message.with_content(new_content);
        let tokens_after = counter.count_message(&replacement);
        current = current - tokens_before + tokens_after;

        records.push(CompactionRecord {
            index,
            message_id: replacement.id.clone(),
            class,
            tokens_before,
            tokens_after,
        });
        messages[index] = replacement;
    }

    CompactionOutcome {
        messages,
        records,
        tokens_after: current,
    }
}
