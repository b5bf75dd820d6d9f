//! Built-in tool implementations for Windlass.
//!
//! The engine itself ships a single tool, `mark_messages`, through which the
//! agent tells the pruner which earlier messages it no longer needs. Hosts
//! register their own tools next to it.

pub mod mark_messages;

use std::sync::Arc;
use windlass_core::marks::DeletionMarkStore;
use windlass_core::tool::ToolRegistry;

pub use mark_messages::MarkMessagesTool;

/// Create a tool registry with all built-in tools, writing marks to
/// `mark_store`.
pub fn default_registry(mark_store: Arc<dyn DeletionMarkStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(MarkMessagesTool::new(mark_store)));
    registry
}
