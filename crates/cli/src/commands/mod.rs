//! Subcommand implementations and the wiring they share.

pub mod config_cmd;
pub mod decode;
pub mod marks;
pub mod prune;

use std::path::Path;
use std::sync::Arc;
use windlass_config::{EngineConfig, MarksBackend};
use windlass_core::marks::DeletionMarkStore;
use windlass_store::{FileMarkStore, InMemoryMarkStore};

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Load the engine config, from `path` when given.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    };
    Ok(config.map_err(|e| format!("Failed to load config: {e}"))?)
}

/// The deletion-mark backend selected by `[marks]`.
pub fn mark_store(config: &EngineConfig) -> Arc<dyn DeletionMarkStore> {
    let preserve_pairs = config.pruner.preserve_pairs_default;
    match config.marks.backend {
        MarksBackend::File => Arc::new(
            FileMarkStore::new(config.marks.resolved_dir())
                .with_preserve_pairs_default(preserve_pairs),
        ),
        MarksBackend::Memory => {
            Arc::new(InMemoryMarkStore::new().with_preserve_pairs_default(preserve_pairs))
        }
    }
}
