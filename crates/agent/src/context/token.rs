//! Token estimation utilities.
//!
//! The default counter uses a character heuristic: ~4 characters per token,
//! accurate within ~10% for BPE tokenizers on English text. A word-based
//! counter and (behind the `tiktoken` feature) an exact BPE counter are
//! available for callers that need a different trade-off.

use std::sync::Arc;
use tracing::warn;
use windlass_config::CounterKind;
use windlass_core::message::Message;

/// Per-message overhead for role name, delimiters, and formatting markers
/// in the wire format.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimates the token cost of text and messages.
pub trait TokenCounter: Send + Sync {
    fn name(&self) -> &str;

    /// Tokens in a bare string.
    fn count_text(&self, text: &str) -> usize;

    /// Tokens for one message including overhead.
    fn count_message(&self, message: &Message) -> usize {
        MESSAGE_OVERHEAD_TOKENS + self.count_text(&message.content)
    }

    /// Tokens for a whole message list.
    fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// 1 token ≈ 4 characters, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn count_text(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        text.len().div_ceil(4)
    }
}

/// Word-based estimate (~1.3 tokens per word).
#[derive(Debug, Clone, Copy)]
pub struct WordCounter {
    tokens_per_word: f64,
}

impl WordCounter {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordCounter {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenCounter for WordCounter {
    fn name(&self) -> &str {
        "words"
    }

    fn count_text(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}

/// Exact BPE counting with the cl100k_base encoding.
#[cfg(feature = "tiktoken")]
pub struct TiktokenCounter {
    bpe: Arc<tiktoken_rs::CoreBPE>,
}

#[cfg(feature = "tiktoken")]
impl TiktokenCounter {
    pub fn new() -> windlass_core::Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| windlass_core::Error::Config {
            message: format!("failed to load cl100k_base encoding: {e}"),
        })?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

#[cfg(feature = "tiktoken")]
impl TokenCounter for TiktokenCounter {
    fn name(&self) -> &str {
        "tiktoken"
    }

    fn count_text(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Build the counter selected in configuration.
pub fn counter_for(kind: CounterKind) -> Arc<dyn TokenCounter> {
    match kind {
        CounterKind::Heuristic => Arc::new(HeuristicCounter),
        CounterKind::Words => Arc::new(WordCounter::default()),
        CounterKind::Tiktoken => tiktoken_or_fallback(),
    }
}

#[cfg(feature = "tiktoken")]
fn tiktoken_or_fallback() -> Arc<dyn TokenCounter> {
    match TiktokenCounter::new() {
        Ok(counter) => Arc::new(counter),
        Err(e) => {
            warn!(error = %e, "Falling back to heuristic token counter");
            Arc::new(HeuristicCounter)
        }
    }
}

#[cfg(not(feature = "tiktoken"))]
fn tiktoken_or_fallback() -> Arc<dyn TokenCounter> {
    warn!("Built without the tiktoken feature; using heuristic token counter");
    Arc::new(HeuristicCounter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(HeuristicCounter.count_text(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(HeuristicCounter.count_text("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(HeuristicCounter.count_text("hello"), 2);
    }

    #[test]
    fn message_includes_overhead() {
        let msg = Message::user("test"); // 1 token + 4 overhead
        assert_eq!(HeuristicCounter.count_message(&msg), 5);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![Message::user("hello"), Message::assistant("world")];
        assert_eq!(HeuristicCounter.count_messages(&msgs), 12);
    }

    #[test]
    fn word_counter_rounds_up() {
        // 3 words * 1.3 = 3.9 -> 4
        assert_eq!(WordCounter::default().count_text("Hello world test"), 4);
        assert_eq!(WordCounter::default().count_text("   "), 0);
    }

    #[test]
    fn counter_for_selects_kind() {
        assert_eq!(counter_for(CounterKind::Heuristic).name(), "heuristic");
        assert_eq!(counter_for(CounterKind::Words).name(), "words");
    }

    #[cfg(feature = "tiktoken")]
    #[test]
    fn tiktoken_counts_tokens() {
        let counter = TiktokenCounter::new().unwrap();
        let tokens = counter.count_text("Hello, world! This is a test.");
        assert!(tokens > 0 && tokens < 20);
    }
}
