//! # Windlass Core
//!
//! Domain types, traits, and error definitions for the Windlass conversation
//! engine. This crate carries no runtime machinery of its own — it defines the
//! model that the store, agent, and tool crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the engine talks to is a trait here:
//! - [`Generator`] — the opaque model call producing text fragments
//! - [`Tool`] — an executable capability invoked from decoded markup
//! - [`DeletionMarkStore`] — the agent-written set of messages to drop
//!
//! Implementations live in their own crates, so tests can swap in scripted
//! stand-ins without touching the engine.

pub mod error;
pub mod event;
pub mod marks;
pub mod markup;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, MalformedMarkup, MarkWarning, Result};
pub use event::{DomainEvent, EventBus};
pub use marks::{DeletionMark, DeletionMarkStore, MarkAction};
pub use message::{ConversationId, Message, Role};
pub use provider::{FinishReason, Fragment, Generator, Usage};
pub use tool::{
    Tool, ToolArgs, ToolCall, ToolContext, ToolOutput, ToolRegistry, ToolResultEnvelope,
    ToolSchemaRegistry,
};
