//! Conversation and deletion-mark storage for Windlass.

pub mod conversation;
pub mod file_marks;
pub mod memory_marks;

pub use conversation::ConversationStore;
pub use file_marks::FileMarkStore;
pub use memory_marks::InMemoryMarkStore;

use std::path::Path;
use windlass_core::error::StoreError;

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Storage(format!("Failed to create directory {}: {e}", parent.display()))
        })?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, bytes).map_err(|e| {
        StoreError::Storage(format!("Failed to write {}: {e}", tmp.display()))
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        StoreError::Storage(format!("Failed to replace {}: {e}", path.display()))
    })?;
    Ok(())
}
