//! In-memory mark store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use windlass_core::error::StoreError;
use windlass_core::marks::{DeletionMark, DeletionMarkStore, MarkAction};
use windlass_core::message::ConversationId;

/// Marks kept in a map, one per conversation.
pub struct InMemoryMarkStore {
    marks: Arc<RwLock<HashMap<ConversationId, DeletionMark>>>,
    preserve_pairs_default: bool,
}

impl InMemoryMarkStore {
    pub fn new() -> Self {
        Self {
            marks: Arc::new(RwLock::new(HashMap::new())),
            preserve_pairs_default: true,
        }
    }

    /// The `preserve_pairs` flag of marks created by this store.
    pub fn with_preserve_pairs_default(mut self, preserve_pairs: bool) -> Self {
        self.preserve_pairs_default = preserve_pairs;
        self
    }

    fn empty_mark(&self, conversation_id: &ConversationId) -> DeletionMark {
        DeletionMark::empty(conversation_id.clone())
            .with_preserve_pairs(self.preserve_pairs_default)
    }
}

impl Default for InMemoryMarkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeletionMarkStore for InMemoryMarkStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self, conversation_id: &ConversationId) -> Result<DeletionMark, StoreError> {
        let marks = self.marks.read().await;
        Ok(marks
            .get(conversation_id)
            .cloned()
            .unwrap_or_else(|| self.empty_mark(conversation_id)))
    }

    async fn save(&self, mark: &DeletionMark) -> Result<(), StoreError> {
        self.marks
            .write()
            .await
            .insert(mark.conversation_id.clone(), mark.clone());
        Ok(())
    }

    async fn clear(&self, conversation_id: &ConversationId) -> Result<(), StoreError> {
        self.marks.write().await.remove(conversation_id);
        Ok(())
    }

    // Read-modify-write under one write lock.
    async fn apply(
        &self,
        conversation_id: &ConversationId,
        action: MarkAction,
        ids: Vec<String>,
        preserve_pairs: Option<bool>,
    ) -> Result<DeletionMark, StoreError> {
        let mut marks = self.marks.write().await;
        let current = marks
            .get(conversation_id)
            .cloned()
            .unwrap_or_else(|| self.empty_mark(conversation_id));
        let mut next = current.applied(action, ids);
        if let Some(flag) = preserve_pairs {
            next = next.with_preserve_pairs(flag);
        }
        marks.insert(conversation_id.clone(), next.clone());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn load_missing_returns_empty() {
        let store = InMemoryMarkStore::new();
        let mark = store.load(&ConversationId::from("c1")).await.unwrap();
        assert!(mark.is_empty());
        assert!(mark.preserve_pairs);
    }

    #[tokio::test]
    async fn apply_sequence() {
        let store = InMemoryMarkStore::new();
        let conv = ConversationId::from("c1");

        store
            .apply(&conv, MarkAction::Append, ids(&["aaaaaaaa", "bbbbbbbb"]), None)
            .await
            .unwrap();
        store
            .apply(&conv, MarkAction::Remove, ids(&["aaaaaaaa"]), Some(false))
            .await
            .unwrap();

        let mark = store.load(&conv).await.unwrap();
        assert_eq!(mark.message_ids.len(), 1);
        assert!(mark.contains("bbbbbbbb"));
        assert!(!mark.preserve_pairs);
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let store = InMemoryMarkStore::new();
        let a = ConversationId::from("a");
        let b = ConversationId::from("b");
        store
            .apply(&a, MarkAction::Replace, ids(&["aaaaaaaa"]), None)
            .await
            .unwrap();
        assert!(store.load(&b).await.unwrap().is_empty());

        store.clear(&a).await.unwrap();
        assert!(store.load(&a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_flag_applies_to_new_marks() {
        let store = InMemoryMarkStore::new().with_preserve_pairs_default(false);
        let mark = store.load(&ConversationId::from("c1")).await.unwrap();
        assert!(!mark.preserve_pairs);
    }
}
