//! Several length-truncated rounds fold into one reply.

use std::sync::Arc;
use windlass_agent::testing::ScriptedGenerator;
use windlass_agent::{ContinuationDriver, DecoderSettings, StreamDecoder, StreamEvent};
use windlass_core::message::Message;
use windlass_core::provider::{FinishReason, Fragment, Usage};
use windlass_core::tool::ToolSchemaRegistry;

fn rounds() -> Vec<Vec<Fragment>> {
    vec![
        vec![
            Fragment::text("The plan has three steps. "),
            Fragment::text("First <read_file><pa"),
            Fragment::finished("", FinishReason::Length, Usage::new(100, 50)),
        ],
        vec![
            Fragment::text("th>Cargo.toml</path></read_file>, then "),
            Fragment::finished("", FinishReason::Length, Usage::new(160, 50)),
        ],
        vec![
            Fragment::text("we build."),
            Fragment::finished("", FinishReason::Stop, Usage::new(210, 4)),
        ],
    ]
}

#[tokio::test]
async fn usage_and_text_aggregate_across_rounds() {
    let generator = Arc::new(ScriptedGenerator::new(rounds()));
    let driver = ContinuationDriver::new(generator.clone(), 3);
    let summary = driver
        .run_to_end(vec![Message::user("How do we ship?")])
        .await
        .unwrap();

    assert_eq!(summary.rounds, 3);
    assert!(!summary.truncated);
    assert_eq!(summary.usage, Usage::new(470, 104));
    assert_eq!(
        summary.text,
        "The plan has three steps. First <read_file><path>Cargo.toml</path></read_file>, then we build."
    );
    // One assistant message per round was folded into the working history
    assert_eq!(summary.history.len(), 4);
    assert_eq!(generator.continuing_flags(), vec![false, true, true]);
    assert_eq!(generator.history_lens(), vec![1, 2, 3]);
}

#[tokio::test]
async fn decoded_reply_spans_round_boundaries() {
    let generator = Arc::new(ScriptedGenerator::new(rounds()));
    let driver = ContinuationDriver::new(generator, 3);
    let registry = Arc::new(ToolSchemaRegistry::new().with_tool("read_file", ["path"]));
    let mut decoder = StreamDecoder::new(registry, DecoderSettings::default());

    let mut run = driver.start(vec![Message::user("How do we ship?")]);
    while let Some(item) = run.next_fragment().await.unwrap() {
        decoder.push(&item.fragment);
    }
    decoder.finish();
    let events = windlass_agent::coalesce_plain_text(decoder.drain());

    let calls: Vec<_> = events.iter().filter_map(StreamEvent::as_tool_call).collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args["path"], "Cargo.toml");
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == StreamEvent::TruncatedSignal)
            .count(),
        2
    );
}

#[tokio::test]
async fn limit_reached_returns_partial_text() {
    let generator = Arc::new(ScriptedGenerator::new(rounds()));
    let driver = ContinuationDriver::new(generator.clone(), 1);
    let summary = driver.run_to_end(vec![Message::user("go")]).await.unwrap();

    assert_eq!(summary.rounds, 2);
    assert!(summary.truncated);
    assert_eq!(summary.usage, Usage::new(260, 100));
    assert!(summary.text.ends_with(", then "));
    assert_eq!(generator.calls(), 2);
}
