//! Exact deletion of agent-marked messages.
//!
//! Short ids are read from rendered content, so only messages that carry an
//! id hint are addressable. With `preserve_pairs`, deleting one side of a
//! user/assistant pair deletes the other side too. The latest message is
//! never deleted.

use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};
use windlass_core::error::MarkWarning;
use windlass_core::marks::DeletionMark;
use windlass_core::message::{Message, Role};

/// What applying a mark did to a message list.
#[derive(Debug, Clone)]
pub struct DeletionOutcome {
    pub messages: Vec<Message>,

    /// Short ids removed, in order of appearance
    pub deleted_ids: Vec<String>,

    /// Ids deleted only because their pair partner was marked
    pub forced_pair_ids: Vec<String>,

    pub warnings: Vec<MarkWarning>,

    /// Marked ids that are neither deleted nor unknown; what the stored
    /// mark should hold afterwards
    pub remaining_ids: BTreeSet<String>,
}

/// User/assistant pairs by index.
///
/// A user message pairs with the next assistant message that follows it
/// before another user message. Pairs are kept only when both sides carry
/// an extractable short id.
pub fn pair_indices(messages: &[Message], ids: &[Option<String>]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    let mut pending_user: Option<usize> = None;
    for (i, message) in messages.iter().enumerate() {
        match message.role {
            Role::User => pending_user = Some(i),
            Role::Assistant => {
                if let Some(user) = pending_user.take() {
                    if ids[user].is_some() && ids[i].is_some() {
                        pairs.push((user, i));
                    }
                }
            }
            Role::System => {}
        }
    }
    pairs
}

/// Apply `mark` to `messages`, returning the reduced list.
pub fn apply_mark(messages: &[Message], mark: &DeletionMark) -> DeletionOutcome {
    let ids: Vec<Option<String>> = messages.iter().map(Message::embedded_short_id).collect();
    let present: HashSet<&str> = ids.iter().flatten().map(String::as_str).collect();
    let last_id = ids.last().cloned().flatten();

    let mut warnings = Vec::new();

    let unknown: Vec<String> = mark
        .message_ids
        .iter()
        .filter(|id| !present.contains(id.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        warn!(ids = ?unknown, "Deletion mark names messages not in the conversation");
        warnings.push(MarkWarning::UnknownIds {
            ids: unknown.clone(),
        });
    }

    let mut delete: BTreeSet<String> = mark
        .message_ids
        .iter()
        .filter(|id| present.contains(id.as_str()))
        .cloned()
        .collect();

    let mut protected = false;
    if let Some(last) = &last_id {
        protected = delete.remove(last);
    }

    let mut forced_pair_ids = Vec::new();
    if mark.preserve_pairs {
        for (user, assistant) in pair_indices(messages, &ids) {
            let (Some(user_id), Some(assistant_id)) = (&ids[user], &ids[assistant]) else {
                continue;
            };
            let forced = match (delete.contains(user_id), delete.contains(assistant_id)) {
                (true, false) => assistant_id,
                (false, true) => user_id,
                _ => continue,
            };
            if Some(forced) == last_id.as_ref() {
                protected = true;
                continue;
            }
            delete.insert(forced.clone());
            forced_pair_ids.push(forced.clone());
        }
        if !forced_pair_ids.is_empty() {
            warn!(ids = ?forced_pair_ids, "Pair integrity forced extra deletions");
            warnings.push(MarkWarning::ForcedPairDeletion {
                ids: forced_pair_ids.clone(),
            });
        }
    }

    if protected {
        if let Some(last) = &last_id {
            warn!(id = %last, "Latest message is never deleted");
            warnings.push(MarkWarning::LastMessageProtected { id: last.clone() });
        }
    }

    let last_index = messages.len().saturating_sub(1);
    let mut kept = Vec::with_capacity(messages.len());
    let mut deleted_ids = Vec::new();
    for (i, (message, id)) in messages.iter().zip(&ids).enumerate() {
        match id {
            Some(id) if i != last_index && delete.contains(id) => deleted_ids.push(id.clone()),
            _ => kept.push(message.clone()),
        }
    }

    let unknown: HashSet<&String> = unknown.iter().collect();
    let remaining_ids = mark
        .message_ids
        .iter()
        .filter(|id| !delete.contains(*id) && !unknown.contains(id))
        .cloned()
        .collect();

    debug!(
        deleted = deleted_ids.len(),
        forced = forced_pair_ids.len(),
        "Applied deletion mark"
    );

    DeletionOutcome {
        messages: kept,
        deleted_ids,
        forced_pair_ids,
        warnings,
        remaining_ids,
    }
}
