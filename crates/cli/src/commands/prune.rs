//! `windlass prune` — Show what the pruner would send for a saved conversation.

use std::path::Path;
use std::sync::Arc;
use windlass_agent::{ConversationPruner, PruneOutcome, PrunerConfig, counter_for};
use windlass_config::EngineConfig;
use windlass_core::marks::{DeletionMark, DeletionMarkStore, MarkAction};
use windlass_store::ConversationStore;

use super::decode::schemas;
use super::{CommandResult, load_config, mark_store};

/// Prune the rendered history of `store` against `mark`.
pub fn prune_snapshot(
    config: &EngineConfig,
    store: &ConversationStore,
    mark: &DeletionMark,
    budget: usize,
) -> PruneOutcome {
    let pruner = ConversationPruner::new(
        counter_for(config.budget.counter),
        Arc::new(schemas(config)),
        PrunerConfig::from(&config.pruner),
    );
    pruner.prune(&store.rendered(), mark, budget)
}

/// Write Stage A results back: drop deleted messages and store the
/// normalized mark. Returns the number of messages removed.
pub async fn apply_outcome(
    outcome: &PruneOutcome,
    store: &mut ConversationStore,
    marks: &dyn DeletionMarkStore,
    mark: &DeletionMark,
) -> Result<usize, Box<dyn std::error::Error>> {
    let removed = store.remove_short_ids(&outcome.report.deleted_ids);
    if let Some(normalized) = &outcome.report.normalized_mark {
        if *normalized != mark.message_ids {
            let next = mark.applied(MarkAction::Replace, normalized.iter().cloned());
            marks.save(&next).await?;
        }
    }
    Ok(removed)
}

pub async fn run(
    config_path: Option<&Path>,
    file: &Path,
    budget: Option<usize>,
    apply: bool,
) -> CommandResult {
    let config = load_config(config_path)?;
    let mut store = ConversationStore::load_from(file)?;
    let marks = mark_store(&config);
    let mark = marks.load(store.conversation_id()).await?;
    let budget = budget.unwrap_or(config.budget.max_context_tokens);

    let outcome = prune_snapshot(&config, &store, &mark, budget);
    let report = &outcome.report;

    println!("✂️  Pruned {}", store.conversation_id());
    println!("   Budget:     {budget}");
    println!(
        "   Tokens:     {} → {}",
        report.tokens_before, report.tokens_after
    );
    println!("   Stage:      {:?}", report.stage);
    println!("   Deleted:    {}", report.deleted_ids.len());
    if !report.forced_pair_ids.is_empty() {
        println!("   Pair-forced: {}", report.forced_pair_ids.join(", "));
    }
    println!("   Compacted:  {}", report.compacted.len());
    println!("   Escalated:  {}", report.escalated);
    for warning in &report.warnings {
        println!("   ⚠️  {warning}");
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&outcome.messages)?);

    if apply {
        let removed = apply_outcome(&outcome, &mut store, marks.as_ref(), &mark).await?;
        store.save_to(file)?;
        println!();
        println!("   ✅ Removed {removed} message(s) from {}", file.display());
    }

    Ok(())
}
