//! Escalation when automatic pruning cannot meet the budget.

use tracing::warn;
use windlass_core::message::{Message, Role};

/// Name of the tool the agent uses to mark messages for deletion.
pub const MARK_TOOL_NAME: &str = "mark_messages";

/// The instruction appended when the conversation is still over budget.
pub fn escalation_notice(current_tokens: usize, budget: usize) -> String {
    format!(
        "[context notice] The conversation is still over its context budget \
         ({current_tokens} tokens against a budget of {budget}) after clearing old tool output. \
         Before continuing, call {MARK_TOOL_NAME} with the message_ids of earlier messages \
         that are no longer needed so they can be deleted on the next turn."
    )
}

/// Append the notice to the most recent user message, in place.
///
/// Returns the index of the message that received it, or `None` when there
/// is no user message to carry it.
pub fn escalate(messages: &mut [Message], current_tokens: usize, budget: usize) -> Option<usize> {
    let Some(index) = messages.iter().rposition(|m| m.role == Role::User) else {
        warn!(
            tokens = current_tokens,
            budget, "Over budget with no user message to carry the escalation notice"
        );
        return None;
    };

    let notice = escalation_notice(current_tokens, budget);
    let message = &messages[index];
    messages[index] = message.with_content(format!("{}\n\n{notice}", message.content));

    warn!(
        tokens = current_tokens,
        budget, "Context budget unsatisfiable; asked the agent to mark messages for deletion"
    );
    Some(index)
}
