//! Error types for the Windlass domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Fatal conditions
//! (transport failure, cancellation) travel as [`Error`]; recoverable
//! conditions that must never abort a turn are plain values
//! ([`MalformedMarkup`], [`MarkWarning`]) carried in events and reports.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all Windlass operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Fragment source failures ---
    #[error("Transport error: {0}")]
    Transport(#[from] ProviderError),

    // --- User or system abort ---
    #[error("Generation cancelled")]
    Cancelled,

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Storage errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is a user/system abort rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the fragment source (the model-call collaborator).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Generator not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Short id {0} already used in this conversation")]
    DuplicateShortId(String),

    #[error("Corrupted record at {location}: {reason}")]
    Corrupted { location: String, reason: String },
}

/// A thinking or tool block the decoder could not close before the
/// fragment stream ended. Recoverable: the buffered text is still emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MalformedMarkup {
    #[error("stream ended inside a thinking block")]
    UnclosedThinking,

    #[error("stream ended inside a <{tag}> tool block")]
    UnclosedTool { tag: String },
}

/// Problems found while applying a deletion mark. Recovered locally by
/// normalising the mark set; surfaced only as warnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkWarning {
    #[error("marked ids not present in the conversation: {}", .ids.join(", "))]
    UnknownIds { ids: Vec<String> },

    #[error("pair integrity forced deletion of: {}", .ids.join(", "))]
    ForcedPairDeletion { ids: Vec<String> },

    #[error("latest message {id} is never deleted")]
    LastMessageProtected { id: String },
}
