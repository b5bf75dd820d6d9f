//! The Windlass turn engine.
//!
//! One conversational turn runs as:
//!
//! 1. **Prune** the rendered history under the token budget
//!    (deletion marks → payload compaction → escalation)
//! 2. **Generate** through the [`Generator`], continuing across
//!    length-truncated rounds
//! 3. **Decode** the fragment stream into [`StreamEvent`]s
//! 4. **Execute** decoded tool calls and append their result envelopes
//!
//! Each stage is usable on its own; [`TurnRunner`] wires them together.
//!
//! [`Generator`]: windlass_core::provider::Generator

pub mod context;
pub mod continuation;
pub mod decoder;
pub mod loop_runner;
pub mod stream_event;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use context::{
    CompactionRecord, ConversationPruner, HeuristicCounter, MessageClass, PruneOutcome,
    PruneReport, PruneStage, PrunerConfig, TokenCounter, WordCounter, counter_for,
};
pub use continuation::{ContinuationDriver, ContinuationRun, ContinuationSummary, RoundFragment};
pub use decoder::{DecoderSettings, DecoderState, StreamDecoder, decode_stream};
pub use loop_runner::{TurnOutcome, TurnRunner};
pub use stream_event::{StreamEvent, coalesce_plain_text};
