//! Context budget management.
//!
//! Keeps the history sent to the model under a token budget. Stages run in
//! order and each only when the previous one left the history over budget:
//!
//! | Stage | Module | What it removes |
//! |-------|--------|-----------------|
//! | A. Deletion | [`deletion`] | Messages the agent marked, with pair repair |
//! | B. Compaction | [`compaction`] | Tool result payloads and long tool-call fields, oldest first |
//! | C. Escalation | [`escalation`] | Nothing; asks the agent to mark more messages |

pub mod compaction;
pub mod deletion;
pub mod escalation;
pub mod pruner;
pub mod token;

pub use compaction::{CompactionRecord, MessageClass};
pub use deletion::DeletionOutcome;
pub use escalation::MARK_TOOL_NAME;
pub use pruner::{ConversationPruner, PruneOutcome, PruneReport, PruneStage, PrunerConfig};
pub use token::{HeuristicCounter, TokenCounter, WordCounter, counter_for};
