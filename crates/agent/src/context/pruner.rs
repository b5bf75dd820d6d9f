//! Per-turn conversation pruning.
//!
//! [`ConversationPruner::prune`] turns the full rendered history into the
//! view that is actually sent to the model:
//!
//! 1. Early exit when the history already fits the budget.
//! 2. Exact deletion of agent-marked messages ([`super::deletion`]).
//! 3. Priority compaction of tool payloads ([`super::compaction`]).
//! 4. Escalation: ask the agent to mark more messages ([`super::escalation`]).
//!
//! The pruner is a pure function of its inputs. Only the caller decides
//! whether Stage A deletions are written back to the canonical store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use windlass_config::PrunerSettings;
use windlass_core::error::MarkWarning;
use windlass_core::marks::DeletionMark;
use windlass_core::message::Message;
use windlass_core::tool::ToolSchemaRegistry;

use super::compaction::{CompactionRecord, compact};
use super::deletion::apply_mark;
use super::escalation::escalate;
use super::token::TokenCounter;

/// Tuning for the compaction stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrunerConfig {
    /// Classified messages that must stay unprocessed
    pub min_retained_classified: usize,
    /// Tool-call field values longer than this (in chars) are cleared
    pub field_clear_threshold: usize,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            min_retained_classified: 6,
            field_clear_threshold: 500,
        }
    }
}

impl From<&PrunerSettings> for PrunerConfig {
    fn from(settings: &PrunerSettings) -> Self {
        Self {
            min_retained_classified: settings.min_retained_classified,
            field_clear_threshold: settings.field_clear_threshold,
        }
    }
}

/// The last stage that changed the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneStage {
    Unchanged,
    Deletion,
    Compaction,
    Escalation,
}

/// What a prune call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub deleted_ids: Vec<String>,
    pub forced_pair_ids: Vec<String>,
    pub warnings: Vec<MarkWarning>,
    pub compacted: Vec<CompactionRecord>,
    /// The budget could not be met; the agent was asked to mark messages
    pub escalated: bool,
    pub stage: PruneStage,
    /// The mark as it should be stored after deletion, when a mark was applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_mark: Option<BTreeSet<String>>,
}

impl PruneReport {
    fn unchanged(tokens: usize) -> Self {
        Self {
            tokens_before: tokens,
            tokens_after: tokens,
            deleted_ids: Vec::new(),
            forced_pair_ids: Vec::new(),
            warnings: Vec::new(),
            compacted: Vec::new(),
            escalated: false,
            stage: PruneStage::Unchanged,
            normalized_mark: None,
        }
    }

    pub fn within_budget(&self, budget: usize) -> bool {
        self.tokens_after <= budget
    }
}

/// Pruned view plus its report.
#[derive(Debug, Clone)]
pub struct PruneOutcome {
    pub messages: Vec<Message>,
    pub report: PruneReport,
}

/// Keeps a conversation's transmitted history under a token budget.
pub struct ConversationPruner {
    counter: Arc<dyn TokenCounter>,
    registry: Arc<ToolSchemaRegistry>,
    config: PrunerConfig,
}

impl ConversationPruner {
    pub fn new(
        counter: Arc<dyn TokenCounter>,
        registry: Arc<ToolSchemaRegistry>,
        config: PrunerConfig,
    ) -> Self {
        Self {
            counter,
            registry,
            config,
        }
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    pub fn config(&self) -> PrunerConfig {
        self.config
    }

    /// Produce the budget-compliant view of `messages`.
    pub fn prune(&self, messages: &[Message], mark: &DeletionMark, budget: usize) -> PruneOutcome {
        let tokens_before = self.counter.count_messages(messages);
        if tokens_before <= budget {
            debug!(tokens = tokens_before, budget, "History within budget");
            return PruneOutcome {
                messages: messages.to_vec(),
                report: PruneReport::unchanged(tokens_before),
            };
        }

        let mut report = PruneReport::unchanged(tokens_before);
        let mut current_messages = messages.to_vec();
        let mut current = tokens_before;

        // Stage A
        if !mark.is_empty() {
            let deletion = apply_mark(&current_messages, mark);
            current_messages = deletion.messages;
            current = self.counter.count_messages(&current_messages);
            report.deleted_ids = deletion.deleted_ids;
            report.forced_pair_ids = deletion.forced_pair_ids;
            report.warnings = deletion.warnings;
            report.normalized_mark = Some(deletion.remaining_ids);
            report.stage = PruneStage::Deletion;
            debug!(
                deleted = report.deleted_ids.len(),
                tokens = current,
                "Stage A complete"
            );
        }

        // Stage B
        if current > budget {
            let compaction = compact(
                current_messages,
                self.counter.as_ref(),
                &self.registry,
                budget,
                self.config.min_retained_classified,
                self.config.field_clear_threshold,
            );
            current_messages = compaction.messages;
            current = compaction.tokens_after;
            report.compacted = compaction.records;
            report.stage = PruneStage::Compaction;
            debug!(
                compacted = report.compacted.len(),
                tokens = current,
                "Stage B complete"
            );
        }

        // Stage C
        if current > budget {
            escalate(&mut current_messages, current, budget);
            current = self.counter.count_messages(&current_messages);
            report.escalated = true;
            report.stage = PruneStage::Escalation;
        }

        report.tokens_after = current;
        info!(
            tokens_before,
            tokens_after = current,
            budget,
            deleted = report.deleted_ids.len(),
            compacted = report.compacted.len(),
            escalated = report.escalated,
            "Pruned conversation"
        );

        PruneOutcome {
            messages: current_messages,
            report,
        }
    }
}
