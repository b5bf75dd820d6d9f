//! Deletion marks — the agent-written set of messages to drop.
//!
//! The agent marks messages by short id through the `mark_messages` tool.
//! The next pruning pass removes them from the conversation permanently.
//! Every mutation computes the complete new set and overwrites the stored
//! one, so a concurrent reader sees either the old or the new mark, never a
//! partial one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::message::ConversationId;

/// How a mark update combines with the stored set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkAction {
    /// The given ids become the whole set
    Replace,
    /// Union with the stored set
    Append,
    /// Subtract from the stored set
    Remove,
}

impl std::str::FromStr for MarkAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(MarkAction::Replace),
            "append" => Ok(MarkAction::Append),
            "remove" => Ok(MarkAction::Remove),
            other => Err(format!("unknown mark action '{other}' (expected replace, append or remove)")),
        }
    }
}

/// The persisted mark for one conversation.
///
/// Serialized as `{conversation_id, message_ids, preserve_pairs, updated_at}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionMark {
    pub conversation_id: ConversationId,

    /// Short ids of messages to delete
    #[serde(default)]
    pub message_ids: BTreeSet<String>,

    /// Delete both sides of a user/assistant pair when either is marked
    #[serde(default = "default_preserve_pairs")]
    pub preserve_pairs: bool,

    pub updated_at: DateTime<Utc>,
}

fn default_preserve_pairs() -> bool {
    true
}

impl DeletionMark {
    /// An empty mark for a conversation.
    pub fn empty(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            message_ids: BTreeSet::new(),
            preserve_pairs: default_preserve_pairs(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.message_ids.is_empty()
    }

    pub fn contains(&self, short_id: &str) -> bool {
        self.message_ids.contains(short_id)
    }

    /// The mark that results from applying `action` with `ids`.
    ///
    /// Pure: applying the same action twice yields the same set.
    pub fn applied<I, S>(&self, action: MarkAction, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        let message_ids = match action {
            MarkAction::Replace => ids,
            MarkAction::Append => self.message_ids.union(&ids).cloned().collect(),
            MarkAction::Remove => self.message_ids.difference(&ids).cloned().collect(),
        };
        Self {
            conversation_id: self.conversation_id.clone(),
            message_ids,
            preserve_pairs: self.preserve_pairs,
            updated_at: Utc::now(),
        }
    }

    pub fn with_preserve_pairs(mut self, preserve_pairs: bool) -> Self {
        self.preserve_pairs = preserve_pairs;
        self
    }
}

/// Storage for deletion marks, one per conversation.
#[async_trait]
pub trait DeletionMarkStore: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Load the mark for a conversation (empty if none was written).
    async fn load(&self, conversation_id: &ConversationId) -> Result<DeletionMark, StoreError>;

    /// Overwrite the stored mark as a whole.
    async fn save(&self, mark: &DeletionMark) -> Result<(), StoreError>;

    /// Drop the mark for a conversation.
    async fn clear(&self, conversation_id: &ConversationId) -> Result<(), StoreError>;

    /// Apply an action to the stored mark and persist the result.
    ///
    /// `preserve_pairs` overrides the stored flag when given.
    async fn apply(
        &self,
        conversation_id: &ConversationId,
        action: MarkAction,
        ids: Vec<String>,
        preserve_pairs: Option<bool>,
    ) -> Result<DeletionMark, StoreError> {
        let current = self.load(conversation_id).await?;
        let mut next = current.applied(action, ids);
        if let Some(flag) = preserve_pairs {
            next = next.with_preserve_pairs(flag);
        }
        self.save(&next).await?;
        Ok(next)
    }
}
