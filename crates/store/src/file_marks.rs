//! File-based mark store — one JSON document per conversation.
//!
//! Storage location: `~/.windlass/marks/<conversation>.json`
//!
//! Each write serializes the whole mark to a temporary file and renames it
//! over the previous one, so a reader in another process sees either the
//! old or the new set.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use windlass_core::error::StoreError;
use windlass_core::marks::{DeletionMark, DeletionMarkStore, MarkAction};
use windlass_core::message::ConversationId;

/// A directory of `<conversation>.json` mark files.
pub struct FileMarkStore {
    dir: PathBuf,
    preserve_pairs_default: bool,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileMarkStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: PathBuf) -> Self {
        debug!(dir = %dir.display(), "File mark store ready");
        Self {
            dir,
            preserve_pairs_default: true,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_preserve_pairs_default(mut self, preserve_pairs: bool) -> Self {
        self.preserve_pairs_default = preserve_pairs;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file holding one conversation's mark.
    pub fn path_for(&self, conversation_id: &ConversationId) -> PathBuf {
        let file_stem: String = conversation_id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_stem}.json"))
    }

    fn read_mark(&self, conversation_id: &ConversationId) -> Result<DeletionMark, StoreError> {
        let path = self.path_for(conversation_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Nothing written yet — empty mark
                return Ok(DeletionMark::empty(conversation_id.clone())
                    .with_preserve_pairs(self.preserve_pairs_default));
            }
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read mark file {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&content).map_err(|e| StoreError::Corrupted {
            location: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn write_mark(&self, mark: &DeletionMark) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(mark)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize mark: {e}")))?;
        crate::write_atomic(&self.path_for(&mark.conversation_id), json.as_bytes())?;
        debug!(
            conversation_id = %mark.conversation_id,
            count = mark.message_ids.len(),
            "Deletion mark written"
        );
        Ok(())
    }
}

#[async_trait]
impl DeletionMarkStore for FileMarkStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, conversation_id: &ConversationId) -> Result<DeletionMark, StoreError> {
        self.read_mark(conversation_id)
    }

    async fn save(&self, mark: &DeletionMark) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_mark(mark)
    }

    async fn clear(&self, conversation_id: &ConversationId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(conversation_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Storage(format!(
                "Failed to remove mark file {}: {e}",
                path.display()
            ))),
        }
    }

    async fn apply(
        &self,
        conversation_id: &ConversationId,
        action: MarkAction,
        ids: Vec<String>,
        preserve_pairs: Option<bool>,
    ) -> Result<DeletionMark, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.read_mark(conversation_id)?.applied(action, ids);
        if let Some(flag) = preserve_pairs {
            next = next.with_preserve_pairs(flag);
        }
        self.write_mark(&next)?;
        Ok(next)
    }
}
