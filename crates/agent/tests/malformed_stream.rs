//! A stream that ends inside a tool block degrades to plain content.

use std::sync::Arc;
use windlass_agent::testing::ScriptedGenerator;
use windlass_agent::{StreamEvent, TurnRunner};
use windlass_config::EngineConfig;
use windlass_core::error::MalformedMarkup;
use windlass_core::event::{DomainEvent, EventBus};
use windlass_core::message::{ConversationId, Role};
use windlass_core::provider::Usage;
use windlass_core::tool::ToolRegistry;
use windlass_store::{ConversationStore, InMemoryMarkStore};

const REPLY: &str = "Looking now.\n<list_files>\n<path>src</path>\n</list_files>\n\
Next I will read it:\n<read_file>\n<path>src/lib.rs";

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.tools.push(windlass_config::ToolSchemaConfig {
        name: "read_file".into(),
        fields: vec!["path".into()],
    });
    config.tools.push(windlass_config::ToolSchemaConfig {
        name: "list_files".into(),
        fields: vec!["path".into()],
    });
    config
}

#[tokio::test]
async fn unclosed_tool_block_does_not_fail_the_turn() {
    let generator = Arc::new(ScriptedGenerator::single_text(REPLY, 5, Usage::new(40, 30)));
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let runner = TurnRunner::from_config(
        &config(),
        generator,
        Arc::new(ToolRegistry::new()),
        Arc::new(InMemoryMarkStore::new()),
        bus,
    );

    let mut store = ConversationStore::new(ConversationId::from("malformed"));
    store.append(Role::User, "What is in src?").unwrap();
    let outcome = runner.run_turn(&mut store).await.unwrap();

    let events = windlass_agent::coalesce_plain_text(outcome.events.clone());
    assert_eq!(events[0], StreamEvent::plain("Looking now.\n"));
    let call = events[1].as_tool_call().unwrap();
    assert_eq!(call.name, "list_files");
    assert_eq!(call.args["path"], "src");
    assert_eq!(events[2], StreamEvent::plain("\nNext I will read it:\n"));
    assert_eq!(
        events[3],
        StreamEvent::MalformedBlock {
            text: "<read_file>\n<path>src/lib.rs".into()
        }
    );
    assert_eq!(
        events[4],
        StreamEvent::Recovered(MalformedMarkup::UnclosedTool {
            tag: "read_file".into()
        })
    );
    assert_eq!(events.len(), 5);

    // list_files is known to the decoder but has no executor
    assert_eq!(outcome.tool_results.len(), 1);
    assert!(!outcome.tool_results[0].success);
    assert!(outcome.tool_results[0].message.contains("list_files"));

    // The reply is kept verbatim
    assert_eq!(store.messages()[1].content, REPLY);

    let mut saw_malformed = false;
    while let Ok(event) = rx.try_recv() {
        if let DomainEvent::MalformedMarkup { detail, .. } = event.as_ref() {
            assert!(detail.contains("read_file"));
            saw_malformed = true;
        }
    }
    assert!(saw_malformed);
}
