//! Deletion-mark tool: lets the agent choose messages to drop from context.
//!
//! This tool bridges the tool system with the deletion-mark store. The
//! agent names messages by the short ids embedded in rendered content;
//! marked messages are removed by the pruner before the next model call.
//!
//! ```text
//! <mark_messages>
//! <message_ids>1a2b3c4d, 5e6f7a8b</message_ids>
//! <action>append</action>
//! <preserve_pairs>true</preserve_pairs>
//! </mark_messages>
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use windlass_core::error::ToolError;
use windlass_core::marks::{DeletionMarkStore, MarkAction};
use windlass_core::message::SHORT_ID_LEN;
use windlass_core::tool::{Tool, ToolArgs, ToolContext, ToolOutput};

/// Tag and tool name.
pub const TOOL_NAME: &str = "mark_messages";

/// Writes the calling conversation's deletion mark.
pub struct MarkMessagesTool {
    store: Arc<dyn DeletionMarkStore>,
}

impl MarkMessagesTool {
    pub fn new(store: Arc<dyn DeletionMarkStore>) -> Self {
        Self { store }
    }
}

/// Split a comma-separated id list, validating each entry.
pub fn parse_message_ids(raw: &str) -> Result<Vec<String>, ToolError> {
    let mut ids = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let valid = id.chars().count() == SHORT_ID_LEN
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(ToolError::InvalidArguments(format!(
                "'{id}' is not a message id (expected {SHORT_ID_LEN} characters of [A-Za-z0-9-])"
            )));
        }
        ids.push(id.to_string());
    }
    Ok(ids)
}

fn parse_action(args: &ToolArgs) -> Result<MarkAction, ToolError> {
    match args.get("action").map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(MarkAction::Append),
        Some(raw) => raw.parse().map_err(ToolError::InvalidArguments),
    }
}

fn parse_preserve_pairs(args: &ToolArgs) -> Result<Option<bool>, ToolError> {
    let Some(raw) = args.get("preserve_pairs").map(|s| s.trim()) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" => Ok(Some(true)),
        "false" => Ok(Some(false)),
        other => Err(ToolError::InvalidArguments(format!(
            "preserve_pairs must be true or false, got '{other}'"
        ))),
    }
}

#[async_trait]
impl Tool for MarkMessagesTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Mark earlier messages for deletion from the conversation context. \
         Pass the message_ids shown as [[message_id: ...]], comma-separated. \
         action is replace, append (default) or remove. With preserve_pairs, \
         a user message and the assistant reply to it are always deleted together."
    }

    fn fields(&self) -> Vec<String> {
        vec![
            "message_ids".into(),
            "action".into(),
            "preserve_pairs".into(),
        ]
    }

    async fn execute(&self, ctx: &ToolContext, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        let raw_ids = args
            .get("message_ids")
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'message_ids' argument".into()))?;
        let ids = parse_message_ids(raw_ids)?;
        let action = parse_action(args)?;
        let preserve_pairs = parse_preserve_pairs(args)?;

        debug!(
            conversation_id = %ctx.conversation_id,
            ?action,
            ids = ids.len(),
            "Updating deletion mark"
        );

        match self
            .store
            .apply(&ctx.conversation_id, action, ids, preserve_pairs)
            .await
        {
            Ok(mark) => {
                let marked: Vec<&String> = mark.message_ids.iter().collect();
                let payload = serde_json::json!({
                    "message_ids": marked,
                    "preserve_pairs": mark.preserve_pairs,
                });
                Ok(ToolOutput::ok(
                    format!(
                        "{} message(s) marked for deletion; they are removed before the next reply.",
                        mark.message_ids.len()
                    ),
                    payload.to_string(),
                ))
            }
            Err(e) => {
                warn!(conversation_id = %ctx.conversation_id, error = %e, "Failed to write deletion mark");
                Ok(ToolOutput::failed(format!("Could not update deletion mark: {e}")))
            }
        }
    }
}
