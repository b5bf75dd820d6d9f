//! The canonical, ordered message list of one conversation.
//!
//! The store is the only writer of history. The agent loop appends to it;
//! the only destructive operation is [`ConversationStore::remove_short_ids`],
//! used by explicit deletion. Everything the pruner does beyond that works on
//! a rendered copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;
use windlass_core::error::StoreError;
use windlass_core::message::{ConversationId, Message, Role, short_id_of};

/// Attempts at drawing a fresh id before giving up on a short-id collision.
const MAX_ID_ATTEMPTS: usize = 16;

/// An append-only (until pruned) list of messages.
///
/// Serialized as a snapshot `{conversation_id, messages, created_at, updated_at}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationStore {
    conversation_id: ConversationId,
    messages: Vec<Message>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConversationStore {
    pub fn new(conversation_id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            conversation_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Append a new message with an id whose short id is unused here.
    pub fn append(
        &mut self,
        role: Role,
        content: impl Into<String>,
    ) -> Result<&Message, StoreError> {
        self.append_with_metadata(role, content, serde_json::Map::new())
    }

    /// Like [`append`](Self::append), attaching metadata (tool name, etc.).
    pub fn append_with_metadata(
        &mut self,
        role: Role,
        content: impl Into<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<&Message, StoreError> {
        let taken = self.short_ids();
        let id = (0..MAX_ID_ATTEMPTS)
            .map(|_| Uuid::new_v4().to_string())
            .find(|id| !taken.contains(short_id_of(id)))
            .ok_or_else(|| {
                StoreError::Storage("could not allocate a unique short id".into())
            })?;

        let mut message = Message::new(role, content);
        message.id = id;
        message.metadata = metadata;
        self.messages.push(message);
        self.updated_at = Utc::now();
        Ok(&self.messages[self.messages.len() - 1])
    }

    /// Append an existing message, rejecting a short-id collision.
    pub fn push(&mut self, message: Message) -> Result<(), StoreError> {
        if self.find_by_short_id(message.short_id()).is_some() {
            return Err(StoreError::DuplicateShortId(message.short_id().to_string()));
        }
        self.messages.push(message);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn find_by_short_id(&self, short_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.short_id() == short_id)
    }

    /// Short ids of every message currently stored.
    pub fn short_ids(&self) -> HashSet<String> {
        self.messages
            .iter()
            .map(|m| m.short_id().to_string())
            .collect()
    }

    /// Copies of all messages with the id hint applied: the view handed to
    /// the pruner.
    pub fn rendered(&self) -> Vec<Message> {
        self.messages.iter().map(Message::rendered).collect()
    }

    /// Permanently remove messages by short id. The latest message is never
    /// removed. Returns the number of messages removed.
    pub fn remove_short_ids<'a, I>(&mut self, short_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let targets: HashSet<&str> = short_ids.into_iter().map(String::as_str).collect();
        if targets.is_empty() || self.messages.is_empty() {
            return 0;
        }

        let last = self.messages.len() - 1;
        let before = self.messages.len();
        let mut index = 0;
        self.messages.retain(|m| {
            let keep = index == last || !targets.contains(m.short_id());
            index += 1;
            keep
        });

        let removed = before - self.messages.len();
        if removed > 0 {
            self.updated_at = Utc::now();
            debug!(
                conversation_id = %self.conversation_id,
                removed,
                "Removed marked messages from conversation"
            );
        }
        removed
    }

    /// Load a snapshot written by [`ConversationStore::save_to`].
    pub fn load_from(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Storage(format!("Failed to read {}: {e}", path.display()))
        })?;
        let store: Self =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupted {
                location: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut seen = HashSet::new();
        if let Some(dup) = store
            .messages
            .iter()
            .find(|m| !seen.insert(m.short_id().to_string()))
        {
            return Err(StoreError::DuplicateShortId(dup.short_id().to_string()));
        }
        Ok(store)
    }

    /// Write a snapshot atomically (temp file, then rename).
    pub fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            StoreError::Storage(format!("Failed to serialize conversation: {e}"))
        })?;
        crate::write_atomic(path, json.as_bytes())
    }
}
