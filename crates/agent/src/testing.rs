//! A scripted [`Generator`] that replays canned rounds.
//!
//! Each call to `generate` returns the next scripted round as a fragment
//! channel. Compiled for this crate's tests and behind the `testing` feature.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use windlass_core::error::ProviderError;
use windlass_core::message::Message;
use windlass_core::provider::{FinishReason, Fragment, FragmentReceiver, Generator, Usage};

use crate::decoder::split_text;

type ScriptedRound = Vec<Result<Fragment, ProviderError>>;
type ParkedSender = mpsc::Sender<Result<Fragment, ProviderError>>;

/// Replays one scripted round per `generate` call.
#[derive(Default)]
pub struct ScriptedGenerator {
    rounds: Mutex<VecDeque<ScriptedRound>>,
    failure: Option<ProviderError>,
    stalled: bool,
    requests: Mutex<Vec<(bool, Vec<Message>)>>,
    parked: Mutex<Vec<ParkedSender>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedGenerator {
    /// Rounds of fragments, one round per call.
    pub fn new(rounds: Vec<Vec<Fragment>>) -> Self {
        Self::from_items(
            rounds
                .into_iter()
                .map(|round| round.into_iter().map(Ok).collect())
                .collect(),
        )
    }

    /// Rounds that may contain mid-stream errors.
    pub fn from_items(rounds: Vec<ScriptedRound>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            ..Self::default()
        }
    }

    /// A single round replaying `text` in `chunk_chars`-sized fragments,
    /// ending with `stop`.
    pub fn single_text(text: &str, chunk_chars: usize, usage: Usage) -> Self {
        let mut fragments: Vec<Fragment> = split_text(text, chunk_chars)
            .into_iter()
            .map(Fragment::text)
            .collect();
        fragments.push(Fragment::finished("", FinishReason::Stop, usage));
        Self::new(vec![fragments])
    }

    /// A generator whose rounds never produce a fragment.
    pub fn stalled() -> Self {
        Self {
            stalled: true,
            ..Self::default()
        }
    }

    /// Every `generate` call fails with `error`.
    pub fn failing_with(mut self, error: ProviderError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    /// The `continuing` flag of each call.
    pub fn continuing_flags(&self) -> Vec<bool> {
        lock(&self.requests).iter().map(|(c, _)| *c).collect()
    }

    /// History length of each call.
    pub fn history_lens(&self) -> Vec<usize> {
        lock(&self.requests).iter().map(|(_, h)| h.len()).collect()
    }

    /// The histories sent, in call order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        lock(&self.requests).iter().map(|(_, h)| h.clone()).collect()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        history: &[Message],
        continuing: bool,
    ) -> Result<FragmentReceiver, ProviderError> {
        lock(&self.requests).push((continuing, history.to_vec()));

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        if self.stalled {
            let (tx, rx) = mpsc::channel(1);
            // Keep the sender alive so the receiver never closes
            lock(&self.parked).push(tx);
            return Ok(rx);
        }

        let round = lock(&self.rounds).pop_front().ok_or_else(|| {
            ProviderError::NotConfigured("scripted generator has no rounds left".into())
        })?;

        let (tx, rx) = mpsc::channel(round.len().max(1));
        for item in round {
            tx.try_send(item).map_err(|e| {
                ProviderError::StreamInterrupted(format!("scripted channel rejected a fragment: {e}"))
            })?;
        }
        Ok(rx)
    }
}
