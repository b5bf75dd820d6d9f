//! The per-turn agent loop.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use windlass_config::EngineConfig;
use windlass_core::error::{Error, Result};
use windlass_core::event::{DomainEvent, EventBus};
use windlass_core::marks::{DeletionMarkStore, MarkAction};
use windlass_core::message::{ConversationId, Role};
use windlass_core::provider::{Generator, Usage};
use windlass_core::tool::{
    ToolContext, ToolOutput, ToolRegistry, ToolResultEnvelope, ToolSchemaRegistry,
};
use windlass_store::ConversationStore;

use crate::context::{
    ConversationPruner, PruneOutcome, PruneReport, PruneStage, PrunerConfig, counter_for,
};
use crate::continuation::ContinuationDriver;
use crate::decoder::{DecoderSettings, StreamDecoder};
use crate::stream_event::{StreamEvent, tool_calls};

/// Everything one turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Decoded events in order
    pub events: Vec<StreamEvent>,

    /// The full reply text across all rounds
    pub reply: String,

    /// Usage summed across rounds
    pub usage: Usage,

    pub prune_report: PruneReport,

    /// Envelopes appended for each executed tool call
    pub tool_results: Vec<ToolResultEnvelope>,

    pub rounds: usize,

    /// The reply was still truncated when the continuation limit was hit
    pub truncated: bool,
}

/// Orchestrates prune → generate → decode → execute for one conversation.
pub struct TurnRunner {
    /// The model-call collaborator
    generator: Arc<dyn Generator>,

    /// Executable tools
    tools: Arc<ToolRegistry>,

    /// Schemas recognised by the decoder and pruner
    schemas: Arc<ToolSchemaRegistry>,

    /// Deletion marks written by the agent
    marks: Arc<dyn DeletionMarkStore>,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,

    pruner: ConversationPruner,

    decoder_settings: DecoderSettings,

    /// Continuation rounds allowed after the first
    max_continuations: usize,

    /// Token budget for the history sent to the model
    budget: usize,

    cancel: Option<watch::Receiver<bool>>,
}

impl TurnRunner {
    /// Build a runner from configuration. Tool schemas from the registry
    /// and from config are merged; config entries win.
    pub fn from_config(
        config: &EngineConfig,
        generator: Arc<dyn Generator>,
        tools: Arc<ToolRegistry>,
        marks: Arc<dyn DeletionMarkStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let schemas = Arc::new(tools.schemas().merged(&config.schema_registry()));
        let pruner = ConversationPruner::new(
            counter_for(config.budget.counter),
            Arc::clone(&schemas),
            PrunerConfig::from(&config.pruner),
        );
        Self {
            generator,
            tools,
            schemas,
            marks,
            event_bus,
            pruner,
            decoder_settings: DecoderSettings::from(&config.decoder),
            max_continuations: config.continuation.max_continuations,
            budget: config.budget.max_context_tokens,
            cancel: None,
        }
    }

    /// Override the token budget.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    /// Abort generation when the watched flag becomes `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn schemas(&self) -> &ToolSchemaRegistry {
        &self.schemas
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Run one turn against `store`.
    ///
    /// Stage A deletions and the normalised mark are written before
    /// generation starts. On error or cancellation nothing else is appended.
    pub async fn run_turn(&self, store: &mut ConversationStore) -> Result<TurnOutcome> {
        let conversation_id = store.conversation_id().clone();
        info!(
            conversation_id = %conversation_id,
            messages = store.len(),
            budget = self.budget,
            "Starting turn"
        );

        let PruneOutcome {
            messages: view,
            report: prune_report,
        } = self.prune_store(store, &conversation_id).await?;

        let mut driver = ContinuationDriver::new(Arc::clone(&self.generator), self.max_continuations)
            .with_event_bus(Arc::clone(&self.event_bus))
            .with_conversation(conversation_id.clone());
        if let Some(cancel) = &self.cancel {
            driver = driver.with_cancellation(cancel.clone());
        }

        let mut run = driver.start(view);
        let mut decoder = StreamDecoder::new(Arc::clone(&self.schemas), self.decoder_settings.clone());
        let mut events = Vec::new();

        loop {
            match run.next_fragment().await {
                Ok(Some(item)) => {
                    decoder.push(&item.fragment);
                    self.collect(&mut decoder, &mut events, &conversation_id);
                }
                Ok(None) => break,
                Err(e) => {
                    self.report_error(&e, &conversation_id);
                    return Err(e);
                }
            }
        }
        decoder.finish();
        self.collect(&mut decoder, &mut events, &conversation_id);

        let summary = run.summary();
        if !summary.text.is_empty() {
            store.append(Role::Assistant, summary.text.clone())?;
        }

        let ctx = ToolContext {
            conversation_id: conversation_id.clone(),
        };
        let mut tool_results = Vec::new();
        for call in tool_calls(&events) {
            let start = Instant::now();
            let output = match self.tools.execute(&ctx, &call).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool execution failed");
                    ToolOutput::failed(e.to_string())
                }
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            self.event_bus.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success: output.success,
                duration_ms,
                timestamp: chrono::Utc::now(),
            });

            let envelope = ToolResultEnvelope::from_output(call.name.clone(), output);
            let mut metadata = serde_json::Map::new();
            metadata.insert("tool".into(), call.name.clone().into());
            store.append_with_metadata(Role::User, envelope.render(), metadata)?;
            tool_results.push(envelope);
        }

        info!(
            conversation_id = %conversation_id,
            rounds = summary.rounds,
            events = events.len(),
            tools = tool_results.len(),
            tokens = summary.usage.total(),
            "Turn complete"
        );

        Ok(TurnOutcome {
            events,
            reply: summary.text,
            usage: summary.usage,
            prune_report,
            tool_results,
            rounds: summary.rounds,
            truncated: summary.truncated,
        })
    }

    /// Prune the rendered history and apply Stage A to the canonical store.
    /// Returns the view to send.
    async fn prune_store(
        &self,
        store: &mut ConversationStore,
        conversation_id: &ConversationId,
    ) -> Result<PruneOutcome> {
        let mark = self.marks.load(conversation_id).await?;
        let outcome = self.pruner.prune(&store.rendered(), &mark, self.budget);
        let report = &outcome.report;

        if !report.deleted_ids.is_empty() {
            let removed = store.remove_short_ids(&report.deleted_ids);
            debug!(conversation_id = %conversation_id, removed, "Applied deletions to store");
        }

        if let Some(normalized) = &report.normalized_mark {
            if *normalized != mark.message_ids {
                let next = mark.applied(MarkAction::Replace, normalized.iter().cloned());
                self.marks.save(&next).await?;
                self.event_bus.publish(DomainEvent::DeletionMarksUpdated {
                    conversation_id: conversation_id.to_string(),
                    count: next.message_ids.len(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        if report.stage != PruneStage::Unchanged {
            self.event_bus.publish(DomainEvent::ContextPruned {
                conversation_id: conversation_id.to_string(),
                tokens_before: report.tokens_before,
                tokens_after: report.tokens_after,
                deleted: report.deleted_ids.len(),
                compacted: report.compacted.len(),
                escalated: report.escalated,
                timestamp: chrono::Utc::now(),
            });
        }

        Ok(outcome)
    }

    fn collect(
        &self,
        decoder: &mut StreamDecoder,
        events: &mut Vec<StreamEvent>,
        conversation_id: &ConversationId,
    ) {
        for event in decoder.drain() {
            if let StreamEvent::Recovered(detail) = &event {
                warn!(conversation_id = %conversation_id, detail = %detail, "Recovered from malformed markup");
                self.event_bus.publish(DomainEvent::MalformedMarkup {
                    conversation_id: conversation_id.to_string(),
                    detail: detail.to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
            events.push(event);
        }
    }

    fn report_error(&self, error: &Error, conversation_id: &ConversationId) {
        if error.is_cancelled() {
            info!(conversation_id = %conversation_id, "Turn cancelled");
            return;
        }
        warn!(conversation_id = %conversation_id, error = %error, "Turn failed");
        self.event_bus.publish(DomainEvent::ErrorOccurred {
            context: format!("turn:{conversation_id}"),
            error_message: error.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;
    use async_trait::async_trait;
    use windlass_core::error::{ProviderError, ToolError};
    use windlass_core::provider::{FinishReason, Fragment};
    use windlass_core::tool::{Tool, ToolArgs};
    use windlass_store::InMemoryMarkStore;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text field"
        }
        fn fields(&self) -> Vec<String> {
            vec!["text".into()]
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            args: &ToolArgs,
        ) -> std::result::Result<ToolOutput, ToolError> {
            let text = args.get("text").cloned().unwrap_or_default();
            Ok(ToolOutput::ok("Echoed", text))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn fields(&self) -> Vec<String> {
            vec![]
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            _args: &ToolArgs,
        ) -> std::result::Result<ToolOutput, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "broken".into(),
                reason: "disk on fire".into(),
            })
        }
    }

    fn tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(BrokenTool));
        Arc::new(registry)
    }

    fn runner(
        generator: Arc<ScriptedGenerator>,
        marks: Arc<InMemoryMarkStore>,
        bus: Arc<EventBus>,
    ) -> TurnRunner {
        TurnRunner::from_config(&EngineConfig::default(), generator, tools(), marks, bus)
    }

    fn store() -> ConversationStore {
        let mut store = ConversationStore::new(ConversationId::from("turn-test"));
        store.append(Role::System, "You are helpful.").unwrap();
        store.append(Role::User, "Hello!").unwrap();
        store
    }

    fn usage() -> Usage {
        Usage::new(10, 5)
    }

    #[tokio::test]
    async fn plain_reply_is_appended() {
        let generator = Arc::new(ScriptedGenerator::single_text("Hi, how can I help?", 4, usage()));
        let marks = Arc::new(InMemoryMarkStore::new());
        let runner = runner(generator.clone(), marks, Arc::new(EventBus::default()));

        let mut store = store();
        let outcome = runner.run_turn(&mut store).await.unwrap();

        assert_eq!(outcome.reply, "Hi, how can I help?");
        assert_eq!(outcome.usage, usage());
        assert_eq!(outcome.rounds, 1);
        assert!(outcome.tool_results.is_empty());
        assert_eq!(outcome.prune_report.stage, PruneStage::Unchanged);
        assert_eq!(store.len(), 3);
        assert_eq!(store.last().unwrap().role, Role::Assistant);
        // The model saw the rendered history
        let sent = &generator.requests()[0];
        assert_eq!(sent[1].embedded_short_id().as_deref(), Some(store.messages()[1].short_id()));
    }

    #[tokio::test]
    async fn tool_calls_are_executed_and_recorded() {
        let text = "Checking.<echo><text>ping</text></echo>";
        let generator = Arc::new(ScriptedGenerator::single_text(text, 7, usage()));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let runner = runner(generator, Arc::new(InMemoryMarkStore::new()), bus);

        let mut store = store();
        let outcome = runner.run_turn(&mut store).await.unwrap();

        assert_eq!(outcome.tool_results.len(), 1);
        assert!(outcome.tool_results[0].success);
        assert_eq!(outcome.tool_results[0].payload, "ping");
        assert_eq!(store.len(), 4);
        let result = store.last().unwrap();
        assert_eq!(result.role, Role::User);
        assert_eq!(result.metadata["tool"], "echo");
        assert!(ToolResultEnvelope::is_envelope(&result.content));

        let mut saw_tool_event = false;
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::ToolExecuted { tool_name, success, .. } = event.as_ref() {
                assert_eq!(tool_name, "echo");
                assert!(success);
                saw_tool_event = true;
            }
        }
        assert!(saw_tool_event);
    }

    #[tokio::test]
    async fn tool_failure_becomes_failed_envelope() {
        let generator = Arc::new(ScriptedGenerator::single_text(
            "<broken></broken>",
            100,
            usage(),
        ));
        let runner = runner(
            generator,
            Arc::new(InMemoryMarkStore::new()),
            Arc::new(EventBus::default()),
        );

        let mut store = store();
        let outcome = runner.run_turn(&mut store).await.unwrap();
        let envelope = &outcome.tool_results[0];
        assert!(!envelope.success);
        assert!(envelope.message.contains("disk on fire"));
    }

    #[tokio::test]
    async fn marked_messages_are_deleted_before_generation() {
        let mut store = ConversationStore::new(ConversationId::from("turn-test"));
        store.append(Role::System, "rules").unwrap();
        let q1 = store.append(Role::User, "x".repeat(2000)).unwrap().short_id().to_string();
        let a1 = store.append(Role::Assistant, "answer").unwrap().short_id().to_string();
        store.append(Role::User, "next question").unwrap();

        let marks = Arc::new(InMemoryMarkStore::new());
        marks
            .apply(store.conversation_id(), MarkAction::Append, vec![q1.clone()], None)
            .await
            .unwrap();

        let generator = Arc::new(ScriptedGenerator::single_text("ok", 10, usage()));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let runner = runner(generator.clone(), marks.clone(), bus).with_budget(100);

        let outcome = runner.run_turn(&mut store).await.unwrap();
        let report = &outcome.prune_report;
        assert_eq!(report.deleted_ids, vec![q1.clone(), a1.clone()]);
        assert_eq!(report.forced_pair_ids, vec![a1]);
        assert_eq!(report.stage, PruneStage::Deletion);

        assert!(store.find_by_short_id(&q1).is_none());
        assert_eq!(store.len(), 3);
        assert_eq!(generator.history_lens(), vec![2]);

        let mark = marks.load(store.conversation_id()).await.unwrap();
        assert!(mark.is_empty());

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event.as_ref() {
                DomainEvent::DeletionMarksUpdated { count, .. } => {
                    assert_eq!(*count, 0);
                    kinds.push("marks");
                }
                DomainEvent::ContextPruned { deleted, .. } => {
                    assert_eq!(*deleted, 2);
                    kinds.push("pruned");
                }
                _ => {}
            }
        }
        assert_eq!(kinds, vec!["marks", "pruned"]);
    }

    #[tokio::test]
    async fn cancellation_leaves_store_untouched() {
        let (tx, rx) = watch::channel(false);
        let generator = Arc::new(ScriptedGenerator::stalled());
        let runner = runner(
            generator,
            Arc::new(InMemoryMarkStore::new()),
            Arc::new(EventBus::default()),
        )
        .with_cancellation(rx);

        let mut store = store();
        let before = store.messages().to_vec();
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        });

        let err = runner.run_turn(&mut store).await.unwrap_err();
        cancel.await.unwrap();
        assert!(err.is_cancelled());
        assert_eq!(store.messages(), before.as_slice());
    }

    #[tokio::test]
    async fn transport_error_is_reported_and_propagated() {
        let generator = Arc::new(ScriptedGenerator::from_items(vec![vec![
            Ok(Fragment::text("partial")),
            Err(ProviderError::StreamInterrupted("connection reset".into())),
        ]]));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let runner = runner(generator, Arc::new(InMemoryMarkStore::new()), bus);

        let mut store = store();
        let err = runner.run_turn(&mut store).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(store.len(), 2);

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::ErrorOccurred { error_message, .. } = event.as_ref() {
                assert!(error_message.contains("connection reset"));
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn truncated_reply_is_continued_into_one_message() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            vec![
                Fragment::text("<echo><text>pi"),
                Fragment::finished("", FinishReason::Length, Usage::new(10, 100)),
            ],
            vec![
                Fragment::text("ng</text></echo>"),
                Fragment::finished("", FinishReason::Stop, Usage::new(12, 6)),
            ],
        ]));
        let runner = runner(
            generator,
            Arc::new(InMemoryMarkStore::new()),
            Arc::new(EventBus::default()),
        );

        let mut store = store();
        let outcome = runner.run_turn(&mut store).await.unwrap();
        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.usage, Usage::new(22, 106));
        assert_eq!(outcome.reply, "<echo><text>ping</text></echo>");
        assert!(outcome.events.contains(&StreamEvent::TruncatedSignal));
        assert_eq!(outcome.tool_results[0].payload, "ping");
        // system, user, assistant, tool result
        assert_eq!(store.len(), 4);
    }
}
