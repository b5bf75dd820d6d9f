//! Incremental decoding of model text into [`StreamEvent`]s.
//!
//! The decoder keeps one growing buffer and a three-state machine
//! (`Plain`, `InThinking`, `InTool`). Each pushed fragment is appended and
//! the machine advances as far as it can without more input:
//!
//! - `Plain` looks for the earliest thinking-open or registered tool-open
//!   marker. Text before it is confirmed prose. With no marker in sight, all
//!   but the trailing `holdback_chars` characters are emitted, so a marker
//!   split across fragments is never released as prose.
//! - `InThinking` waits for the close marker and emits the block whole.
//! - `InTool(tag)` waits for `</tag>` and emits a parsed [`ToolCall`].
//!
//! Ending the stream inside a block is recoverable: the buffered text is
//! flushed and a [`StreamEvent::Recovered`] follows it.
//!
//! [`ToolCall`]: windlass_core::tool::ToolCall

use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use windlass_config::DecoderConfig;
use windlass_core::error::MalformedMarkup;
use windlass_core::markup::{close_tag, find_open_tag};
use windlass_core::provider::Fragment;
use windlass_core::tool::ToolSchemaRegistry;

use crate::stream_event::StreamEvent;

/// Markers and buffering policy.
#[derive(Debug, Clone)]
pub struct DecoderSettings {
    pub holdback_chars: usize,
    pub thinking_open: String,
    pub thinking_close: String,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self::from(&DecoderConfig::default())
    }
}

impl From<&DecoderConfig> for DecoderSettings {
    fn from(config: &DecoderConfig) -> Self {
        Self {
            holdback_chars: config.holdback_chars,
            thinking_open: config.thinking_open.clone(),
            thinking_close: config.thinking_close.clone(),
        }
    }
}

/// Where the decoder is in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderState {
    Plain,
    InThinking,
    InTool(String),
}

/// A single-use decoder for one assistant turn.
pub struct StreamDecoder {
    settings: DecoderSettings,
    registry: Arc<ToolSchemaRegistry>,
    holdback: usize,
    state: DecoderState,
    buffer: String,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new(registry: Arc<ToolSchemaRegistry>, settings: DecoderSettings) -> Self {
        let longest_marker = settings
            .thinking_open
            .chars()
            .count()
            .max(settings.thinking_close.chars().count())
            .max(registry.longest_marker_len());
        let holdback = settings.holdback_chars.max(longest_marker);
        if holdback > settings.holdback_chars {
            debug!(
                configured = settings.holdback_chars,
                effective = holdback,
                "Raised decoder holdback to the longest marker"
            );
        }
        Self {
            settings,
            registry,
            holdback,
            state: DecoderState::Plain,
            buffer: String::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// Characters withheld at the end of the buffer while in `Plain`.
    pub fn holdback(&self) -> usize {
        self.holdback
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one fragment. A length-truncated fragment queues a
    /// [`StreamEvent::TruncatedSignal`] after its text; state is kept so a
    /// block can straddle the continuation boundary.
    pub fn push(&mut self, fragment: &Fragment) {
        self.push_text(&fragment.text);
        if fragment.is_truncated() {
            self.pending.push_back(StreamEvent::TruncatedSignal);
        }
    }

    /// Feed raw text.
    pub fn push_text(&mut self, text: &str) {
        if self.finished {
            warn!("Text pushed into a finished decoder was ignored");
            return;
        }
        self.buffer.push_str(text);
        self.advance();
    }

    /// Signal the end of the fragment stream and flush what is buffered.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.advance();

        let rest = std::mem::take(&mut self.buffer);
        match std::mem::replace(&mut self.state, DecoderState::Plain) {
            DecoderState::Plain => self.emit_plain(&rest),
            DecoderState::InThinking => {
                warn!(buffered = rest.len(), "Stream ended inside a thinking block");
                if !rest.is_empty() {
                    self.pending.push_back(StreamEvent::thinking(rest));
                }
                self.pending
                    .push_back(StreamEvent::Recovered(MalformedMarkup::UnclosedThinking));
            }
            DecoderState::InTool(tag) => {
                warn!(tool = %tag, buffered = rest.len(), "Stream ended inside a tool block");
                self.pending
                    .push_back(StreamEvent::MalformedBlock { text: rest });
                self.pending
                    .push_back(StreamEvent::Recovered(MalformedMarkup::UnclosedTool { tag }));
            }
        }
        self.finished = true;
    }

    /// Pop the next decoded event, if one is ready.
    pub fn next_event(&mut self) -> Option<StreamEvent> {
        self.pending.pop_front()
    }

    /// Take every event decoded so far.
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        self.pending.drain(..).collect()
    }

    fn emit_plain(&mut self, text: &str) {
        if !text.is_empty() {
            self.pending.push_back(StreamEvent::plain(text));
        }
    }

    fn advance(&mut self) {
        loop {
            let progressed = match self.state.clone() {
                DecoderState::Plain => self.advance_plain(),
                DecoderState::InThinking => self.advance_thinking(),
                DecoderState::InTool(tag) => self.advance_tool(&tag),
            };
            if !progressed {
                break;
            }
        }
    }

    /// Returns `true` when a state transition happened.
    fn advance_plain(&mut self) -> bool {
        let thinking = self.buffer.find(&self.settings.thinking_open);
        let registry = &self.registry;
        let tool = find_open_tag(&self.buffer, 0, |name| registry.contains(name))
            .map(|(start, _, name)| (start, name.to_string()));

        match (thinking, tool) {
            (Some(t), Some((start, _))) if t <= start => self.enter_thinking(t),
            (Some(t), None) => self.enter_thinking(t),
            (_, Some((start, name))) => {
                let before: String = self.buffer.drain(..start).collect();
                self.emit_plain(&before);
                // The open marker stays buffered so the raw markup is whole
                self.state = DecoderState::InTool(name);
                true
            }
            (None, None) => {
                let chars = self.buffer.chars().count();
                if chars > self.holdback {
                    let split = self
                        .buffer
                        .char_indices()
                        .nth(chars - self.holdback)
                        .map(|(idx, _)| idx)
                        .unwrap_or(self.buffer.len());
                    let confirmed: String = self.buffer.drain(..split).collect();
                    self.emit_plain(&confirmed);
                }
                false
            }
        }
    }

    fn enter_thinking(&mut self, at: usize) -> bool {
        let before: String = self.buffer.drain(..at).collect();
        self.emit_plain(&before);
        self.buffer.drain(..self.settings.thinking_open.len());
        self.state = DecoderState::InThinking;
        true
    }

    fn advance_thinking(&mut self) -> bool {
        let Some(end) = self.buffer.find(&self.settings.thinking_close) else {
            return false;
        };
        let body: String = self.buffer.drain(..end).collect();
        self.buffer.drain(..self.settings.thinking_close.len());
        self.pending.push_back(StreamEvent::thinking(body));
        self.state = DecoderState::Plain;
        true
    }

    fn advance_tool(&mut self, tag: &str) -> bool {
        let open_len = tag.len() + 2;
        let close = close_tag(tag);
        let Some(rel) = self.buffer[open_len..].find(&close) else {
            return false;
        };
        let inner_end = open_len + rel;
        let end = inner_end + close.len();
        let call = self
            .registry
            .parse_call(tag, &self.buffer[..end], &self.buffer[open_len..inner_end]);
        debug!(tool = %tag, args = call.args.len(), "Decoded tool call");
        self.buffer.drain(..end);
        self.pending.push_back(StreamEvent::ToolCall(call));
        self.state = DecoderState::Plain;
        true
    }
}

/// Decode a fragment stream into an event stream.
///
/// A fragment-source error is yielded once and ends the stream; nothing is
/// flushed after it. When the source ends normally the decoder is finished
/// and its remaining events are yielded.
pub fn decode_stream<S, E>(
    decoder: StreamDecoder,
    fragments: S,
) -> impl Stream<Item = Result<StreamEvent, E>>
where
    S: Stream<Item = Result<Fragment, E>>,
{
    let state = (decoder, Box::pin(fragments), false);
    futures::stream::unfold(state, |(mut decoder, mut fragments, mut done)| async move {
        loop {
            if let Some(event) = decoder.next_event() {
                return Some((Ok(event), (decoder, fragments, done)));
            }
            if done {
                return None;
            }
            match fragments.next().await {
                Some(Ok(fragment)) => decoder.push(&fragment),
                Some(Err(e)) => {
                    done = true;
                    return Some((Err(e), (decoder, fragments, done)));
                }
                None => {
                    decoder.finish();
                    done = true;
                }
            }
        }
    })
}

/// Split `text` into pieces of at most `chunk_chars` characters.
pub fn split_text(text: &str, chunk_chars: usize) -> Vec<String> {
    let chunk_chars = chunk_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
