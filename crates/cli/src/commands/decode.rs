//! `windlass decode` — Run a saved model reply through the stream decoder.
//!
//! The file is split into fixed-size fragments to mimic a streaming
//! transport; the decoded events are printed as JSON lines.

use futures::StreamExt;
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use windlass_agent::decoder::split_text;
use windlass_agent::{DecoderSettings, StreamDecoder, StreamEvent, coalesce_plain_text, decode_stream};
use windlass_config::EngineConfig;
use windlass_core::provider::Fragment;
use windlass_core::tool::ToolSchemaRegistry;

use super::{CommandResult, load_config, mark_store};

/// Built-in tool schemas plus the ones declared in config.
pub fn schemas(config: &EngineConfig) -> ToolSchemaRegistry {
    windlass_tools::default_registry(mark_store(config))
        .schemas()
        .merged(&config.schema_registry())
}

/// Decode `text` delivered in `chunk`-character fragments.
pub async fn decode_text(
    text: &str,
    chunk: usize,
    registry: Arc<ToolSchemaRegistry>,
    settings: DecoderSettings,
) -> Vec<StreamEvent> {
    let fragments = split_text(text, chunk)
        .into_iter()
        .map(|piece| Ok::<_, Infallible>(Fragment::text(piece)));
    let decoder = StreamDecoder::new(registry, settings);

    decode_stream(decoder, futures::stream::iter(fragments))
        .filter_map(|event| async move { event.ok() })
        .collect()
        .await
}

pub async fn run(
    config_path: Option<&Path>,
    file: &Path,
    chunk: usize,
    coalesce: bool,
) -> CommandResult {
    let config = load_config(config_path)?;
    let text = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;

    let registry = Arc::new(schemas(&config));
    let mut events = decode_text(
        &text,
        chunk,
        registry,
        DecoderSettings::from(&config.decoder),
    )
    .await;
    if coalesce {
        events = coalesce_plain_text(events);
    }

    tracing::debug!(file = %file.display(), chunk, events = events.len(), "Decoded file");
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}
