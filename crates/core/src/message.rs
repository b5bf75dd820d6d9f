//! Message domain types and the short-id rendering contract.
//!
//! Every message carries a stable UUID. When a message is rendered into the
//! text sent to the model, the first [`SHORT_ID_LEN`] characters of that id
//! are appended as `[[message_id: xxxxxxxx]]`, so the agent can later refer
//! to the message (for example, to mark it for deletion) through the opaque
//! text channel.

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

/// Number of leading id characters embedded in rendered content.
pub const SHORT_ID_LEN: usize = 8;

static ID_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[message_id: ([A-Za-z0-9-]{8})\]\]").expect("id hint pattern is valid")
});

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
///
/// Tool results travel as `User` messages wrapping a result envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user, or a tool result envelope
    User,
    /// The model
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        f.write_str(s)
    }
}

/// A single message in a conversation.
///
/// `id` never changes once assigned. The pruner may hand out copies with
/// replaced `content`, but position and role are fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Optional metadata (tool name, round count, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Create a message with a fresh id.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// The id prefix embedded in rendered content.
    pub fn short_id(&self) -> &str {
        short_id_of(&self.id)
    }

    /// A copy of this message with different content and the same identity.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..self.clone()
        }
    }

    /// A copy of this message whose content carries the short-id hint.
    ///
    /// System messages are rendered untouched; they are never addressable
    /// by deletion marks. Content whose last hint is already this message's
    /// own id is left as is; a quoted hint of another message is not.
    pub fn rendered(&self) -> Self {
        let own_hint = self.embedded_short_id().as_deref() == Some(self.short_id());
        if self.role == Role::System || own_hint {
            return self.clone();
        }
        self.with_content(render_with_id_hint(&self.content, self.short_id()))
    }

    /// The short id embedded in this message's content, if any.
    pub fn embedded_short_id(&self) -> Option<String> {
        extract_short_id(&self.content)
    }
}

/// First [`SHORT_ID_LEN`] characters of an id (the whole id if shorter).
pub fn short_id_of(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Append the machine-extractable id hint to rendered content.
pub fn render_with_id_hint(content: &str, short_id: &str) -> String {
    format!("{content}\n\n[[message_id: {short_id}]]")
}

/// Extract the short id from rendered content (last hint wins).
pub fn extract_short_id(content: &str) -> Option<String> {
    ID_HINT
        .captures_iter(content)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Split rendered content into its body and embedded short id.
///
/// The hint is removed wherever it sits; trailing whitespace of the body
/// is trimmed so the hint can be re-appended with [`render_with_id_hint`].
pub fn split_id_hint(content: &str) -> (String, Option<String>) {
    let Some(caps) = ID_HINT.captures_iter(content).last() else {
        return (content.to_string(), None);
    };
    let (Some(whole), Some(id)) = (caps.get(0), caps.get(1)) else {
        return (content.to_string(), None);
    };
    let mut body = content[..whole.start()].trim_end().to_string();
    let rest = content[whole.end()..].trim();
    if !rest.is_empty() {
        body.push_str("\n\n");
        body.push_str(rest);
    }
    (body, Some(id.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert_eq!(msg.short_id().len(), SHORT_ID_LEN);
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::assistant("Test message");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"assistant""#));
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, msg);
    }

    #[test]
    fn rendered_content_carries_extractable_id() {
        let msg = Message::user("list the files");
        let rendered = msg.rendered();
        assert_eq!(rendered.id, msg.id);
        assert!(rendered.content.starts_with("list the files"));
        assert_eq!(rendered.embedded_short_id().as_deref(), Some(msg.short_id()));
    }

    #[test]
    fn rendering_is_not_applied_twice() {
        let msg = Message::user("hi").rendered();
        assert_eq!(msg.rendered().content, msg.content);
    }

    #[test]
    fn quoted_hint_does_not_replace_own_id() {
        let quoted = Message::user("question").rendered();
        let reply = Message::assistant(format!("I will drop {} later.", quoted.content));
        let rendered = reply.rendered();
        assert_eq!(rendered.embedded_short_id().as_deref(), Some(reply.short_id()));
        assert_ne!(rendered.embedded_short_id().as_deref(), Some(quoted.short_id()));
        assert_eq!(rendered.rendered().content, rendered.content);
    }

    #[test]
    fn system_messages_are_not_tagged() {
        let msg = Message::system("You are helpful.");
        assert_eq!(msg.rendered().content, "You are helpful.");
        assert!(msg.rendered().embedded_short_id().is_none());
    }

    #[test]
    fn last_hint_wins() {
        let text = "quoting [[message_id: aaaaaaaa]] here\n\n[[message_id: bbbbbbbb]]";
        assert_eq!(extract_short_id(text).as_deref(), Some("bbbbbbbb"));
    }

    #[test]
    fn malformed_hint_is_ignored() {
        assert!(extract_short_id("[[message_id: abc]]").is_none());
        assert!(extract_short_id("no hint at all").is_none());
    }

    #[test]
    fn split_hint_round_trips() {
        let rendered = render_with_id_hint("body text", "1234abcd");
        let (body, id) = split_id_hint(&rendered);
        assert_eq!(body, "body text");
        assert_eq!(id.as_deref(), Some("1234abcd"));
        assert_eq!(render_with_id_hint(&body, "1234abcd"), rendered);
    }

    #[test]
    fn split_hint_keeps_trailing_text() {
        let text = "body\n\n[[message_id: 1234abcd]]\n\nnotice";
        let (body, id) = split_id_hint(text);
        assert_eq!(body, "body\n\nnotice");
        assert_eq!(id.as_deref(), Some("1234abcd"));
    }

    #[test]
    fn short_id_of_short_input() {
        assert_eq!(short_id_of("abc"), "abc");
        assert_eq!(short_id_of("0123456789"), "01234567");
    }
}
