//! `windlass marks` — Inspect and edit deletion marks by hand.

use std::path::Path;
use windlass_core::marks::{DeletionMark, DeletionMarkStore, MarkAction};
use windlass_core::message::ConversationId;
use windlass_tools::mark_messages::parse_message_ids;

use super::{CommandResult, load_config, mark_store};

fn print_mark(mark: &DeletionMark) {
    println!("🏷️  Deletion mark for {}", mark.conversation_id);
    println!("   Preserve pairs: {}", mark.preserve_pairs);
    println!("   Updated:        {}", mark.updated_at.to_rfc3339());
    if mark.is_empty() {
        println!("   (no messages marked)");
    }
    for id in &mark.message_ids {
        println!("   • {id}");
    }
}

/// Validate ids and apply `action` to the stored mark.
pub async fn edit_mark(
    store: &dyn DeletionMarkStore,
    conversation: &str,
    action: &str,
    ids: Vec<String>,
    preserve_pairs: Option<bool>,
) -> Result<DeletionMark, Box<dyn std::error::Error>> {
    let action: MarkAction = action.parse()?;
    let ids = parse_message_ids(&ids.join(","))?;
    let mark = store
        .apply(&ConversationId::from(conversation), action, ids, preserve_pairs)
        .await?;
    Ok(mark)
}

pub async fn show(config_path: Option<&Path>, conversation: &str) -> CommandResult {
    let config = load_config(config_path)?;
    let store = mark_store(&config);
    let mark = store.load(&ConversationId::from(conversation)).await?;
    print_mark(&mark);
    Ok(())
}

pub async fn edit(
    config_path: Option<&Path>,
    conversation: &str,
    action: &str,
    ids: Vec<String>,
    preserve_pairs: Option<bool>,
) -> CommandResult {
    let config = load_config(config_path)?;
    let store = mark_store(&config);
    let mark = edit_mark(store.as_ref(), conversation, action, ids, preserve_pairs).await?;
    print_mark(&mark);
    Ok(())
}

pub async fn clear(config_path: Option<&Path>, conversation: &str) -> CommandResult {
    let config = load_config(config_path)?;
    let store = mark_store(&config);
    store.clear(&ConversationId::from(conversation)).await?;
    println!("🧹 Cleared deletion mark for {conversation}");
    Ok(())
}
