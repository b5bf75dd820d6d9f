//! Generator trait — the abstraction over the model call.
//!
//! A Generator turns a message history into a stream of text fragments.
//! The engine treats it as an opaque token-stream producer: it never sees
//! HTTP, model names, or sampling parameters. The final fragment of a round
//! carries the finish reason and token usage.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::{Add, AddAssign};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// Why a generation round stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end of the reply
    Stop,
    /// Cut off by the output length limit; the reply should be continued
    Length,
    /// Any other provider-specific reason
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Other(s) => s,
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, FinishReason::Length)
    }
}

impl From<&str> for FinishReason {
    fn from(s: &str) -> Self {
        match s {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FinishReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FinishReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(FinishReason::from(s.as_str()))
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub generated_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, generated_tokens: u64) -> Self {
        Self {
            input_tokens,
            generated_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.generated_tokens
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            generated_tokens: self.generated_tokens + rhs.generated_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

/// Completion metadata reported with the last fragment of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishInfo {
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// A single incremental piece of generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Text delta (may be empty on the final fragment)
    #[serde(default)]
    pub text: String,

    /// Completion metadata (typically only on the final fragment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<FinishInfo>,
}

impl Fragment {
    /// A text delta with no completion metadata.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish: None,
        }
    }

    /// A fragment that ends the round.
    pub fn finished(text: impl Into<String>, finish_reason: FinishReason, usage: Usage) -> Self {
        Self {
            text: text.into(),
            finish: Some(FinishInfo {
                finish_reason,
                usage,
            }),
        }
    }

    /// Whether this fragment reports a length truncation.
    pub fn is_truncated(&self) -> bool {
        self.finish
            .as_ref()
            .is_some_and(|f| f.finish_reason.is_truncated())
    }
}

/// Receiving half of a generation round.
pub type FragmentReceiver = mpsc::Receiver<std::result::Result<Fragment, ProviderError>>;

/// The model-call collaborator.
///
/// `continuing` asks the model to resume a reply that was cut off by the
/// length limit rather than start a fresh one (no new preamble).
#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable name for this generator.
    fn name(&self) -> &str;

    /// Start one generation round over `history`.
    async fn generate(
        &self,
        history: &[Message],
        continuing: bool,
    ) -> std::result::Result<FragmentReceiver, ProviderError>;
}
