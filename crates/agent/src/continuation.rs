//! Length-truncation continuation.
//!
//! A logical reply can span several generation rounds. When a round stops
//! at the length limit, the partial text is folded back into a working copy
//! of the history as an assistant message and the generator is asked to
//! continue. Usage is summed across rounds so the caller sees one total.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use windlass_core::error::{Error, Result};
use windlass_core::event::{DomainEvent, EventBus};
use windlass_core::message::{ConversationId, Message};
use windlass_core::provider::{FinishReason, Fragment, FragmentReceiver, Generator, Usage};

/// One fragment together with the round it belongs to (0-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundFragment {
    pub round: usize,
    pub fragment: Fragment,
}

/// The aggregate of a finished run.
#[derive(Debug, Clone)]
pub struct ContinuationSummary {
    /// Concatenation of every round's text
    pub text: String,

    /// Usage summed across rounds
    pub usage: Usage,

    /// Rounds that ran to completion
    pub rounds: usize,

    /// The last round was still truncated when the limit was reached
    pub truncated: bool,

    /// Working history including one assistant message per round
    pub history: Vec<Message>,
}

/// Drives one logical reply across continuation rounds.
pub struct ContinuationDriver {
    generator: Arc<dyn Generator>,
    max_continuations: usize,
    cancel: Option<watch::Receiver<bool>>,
    event_bus: Option<Arc<EventBus>>,
    conversation_id: Option<ConversationId>,
}

impl ContinuationDriver {
    /// `max_continuations` counts the rounds allowed after the first.
    pub fn new(generator: Arc<dyn Generator>, max_continuations: usize) -> Self {
        Self {
            generator,
            max_continuations,
            cancel: None,
            event_bus: None,
            conversation_id: None,
        }
    }

    /// Abort when the watched flag becomes `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Publish a `ContinuationRound` event after every round.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Conversation named in published events and logs.
    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    /// Begin a run over a working copy of `history`.
    pub fn start(&self, history: Vec<Message>) -> ContinuationRun {
        ContinuationRun {
            generator: Arc::clone(&self.generator),
            max_continuations: self.max_continuations,
            cancel: self.cancel.clone(),
            event_bus: self.event_bus.clone(),
            conversation_id: self.conversation_id.clone(),
            history,
            round: 0,
            receiver: None,
            round_text: String::new(),
            round_finish: None,
            text: String::new(),
            usage: Usage::default(),
            rounds: 0,
            truncated: false,
            done: false,
        }
    }

    /// Drain a whole run, discarding the fragments.
    pub async fn run_to_end(&self, history: Vec<Message>) -> Result<ContinuationSummary> {
        let mut run = self.start(history);
        while run.next_fragment().await?.is_some() {}
        Ok(run.summary())
    }
}

/// A pull-based sequence of fragments across rounds.
pub struct ContinuationRun {
    generator: Arc<dyn Generator>,
    max_continuations: usize,
    cancel: Option<watch::Receiver<bool>>,
    event_bus: Option<Arc<EventBus>>,
    conversation_id: Option<ConversationId>,
    history: Vec<Message>,
    round: usize,
    receiver: Option<FragmentReceiver>,
    round_text: String,
    round_finish: Option<(FinishReason, Usage)>,
    text: String,
    usage: Usage,
    rounds: usize,
    truncated: bool,
    done: bool,
}

impl ContinuationRun {
    /// The next fragment, or `None` once the final round has ended.
    ///
    /// Transport errors and cancellation end the run.
    pub async fn next_fragment(&mut self) -> Result<Option<RoundFragment>> {
        loop {
            if self.done {
                return Ok(None);
            }

            if self.receiver.is_none() {
                self.begin_round().await?;
            }

            let Some(receiver) = self.receiver.as_mut() else {
                continue;
            };
            let next = match self.cancel.as_mut() {
                Some(cancel) => {
                    tokio::select! {
                        biased;
                        _ = wait_for_cancellation(cancel) => None,
                        item = receiver.recv() => Some(item),
                    }
                }
                None => Some(receiver.recv().await),
            };

            match next {
                None => return Err(self.abort_cancelled()),
                Some(Some(Ok(fragment))) => {
                    self.round_text.push_str(&fragment.text);
                    if let Some(finish) = &fragment.finish {
                        self.round_finish = Some((finish.finish_reason.clone(), finish.usage));
                    }
                    return Ok(Some(RoundFragment {
                        round: self.round,
                        fragment,
                    }));
                }
                Some(Some(Err(e))) => {
                    self.done = true;
                    self.receiver = None;
                    warn!(round = self.round, error = %e, "Generation round failed");
                    return Err(Error::Transport(e));
                }
                Some(None) => self.end_round(),
            }
        }
    }

    /// Totals so far (final once `next_fragment` has returned `None`).
    pub fn summary(&self) -> ContinuationSummary {
        ContinuationSummary {
            text: self.text.clone(),
            usage: self.usage,
            rounds: self.rounds,
            truncated: self.truncated,
            history: self.history.clone(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    async fn begin_round(&mut self) -> Result<()> {
        if self.is_cancelled() {
            return Err(self.abort_cancelled());
        }

        let continuing = self.round > 0;
        debug!(round = self.round, continuing, "Starting generation round");

        let request = self.generator.generate(&self.history, continuing);
        let receiver = match self.cancel.as_mut() {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    _ = wait_for_cancellation(cancel) => None,
                    result = request => Some(result),
                }
            }
            None => Some(request.await),
        };

        match receiver {
            None => Err(self.abort_cancelled()),
            Some(Ok(rx)) => {
                self.receiver = Some(rx);
                self.round_text.clear();
                self.round_finish = None;
                Ok(())
            }
            Some(Err(e)) => {
                self.done = true;
                warn!(round = self.round, error = %e, "Generator failed to start a round");
                Err(Error::Transport(e))
            }
        }
    }

    fn end_round(&mut self) {
        self.receiver = None;
        let round_text = std::mem::take(&mut self.round_text);
        // A stream that closes without finish metadata ended naturally
        let (finish_reason, round_usage) = self
            .round_finish
            .take()
            .unwrap_or((FinishReason::Stop, Usage::default()));

        self.usage += round_usage;
        self.text.push_str(&round_text);
        self.history.push(Message::assistant(round_text));
        self.rounds += 1;

        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ContinuationRound {
                conversation_id: self.conversation_label(),
                round: self.round,
                finish_reason: finish_reason.to_string(),
                generated_tokens: round_usage.generated_tokens,
                timestamp: chrono::Utc::now(),
            });
        }

        if !finish_reason.is_truncated() {
            debug!(rounds = self.rounds, finish = %finish_reason, "Reply complete");
            self.done = true;
        } else if self.round < self.max_continuations {
            info!(round = self.round, "Reply truncated at length limit, continuing");
            self.round += 1;
        } else {
            warn!(
                rounds = self.rounds,
                max_continuations = self.max_continuations,
                "Continuation limit reached, returning partial reply"
            );
            self.truncated = true;
            self.done = true;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn abort_cancelled(&mut self) -> Error {
        self.done = true;
        self.receiver = None;
        info!(round = self.round, "Generation cancelled");
        Error::Cancelled
    }

    fn conversation_label(&self) -> String {
        self.conversation_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default()
    }
}

/// Resolve once the flag is `true`. A dropped sender can no longer cancel.
async fn wait_for_cancellation(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow_and_update() {
            return;
        }
        if cancel_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
