//! Tool trait, schema registry, and the tool result envelope.
//!
//! Tools are invoked by markup the model writes inline (see
//! [`crate::markup`]). Two registries are involved:
//!
//! - [`ToolSchemaRegistry`] — immutable `name → field names` table used to
//!   recognise tool markup while decoding and pruning
//! - [`ToolRegistry`] — the executable tools, from which a schema registry
//!   can be derived

use async_trait::async_trait;
use indexmap::IndexMap;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use crate::error::ToolError;
use crate::markup::{close_tag, escape, extract_fields, unescape};
use crate::message::ConversationId;

/// Placeholder written where a payload or long field value was cleared.
pub const CLEARED_PLACEHOLDER: &str = "[content cleared]";

static ENVELOPE_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<tool_result tool="([^"]*)" success="(true|false)">"#)
        .expect("envelope pattern is valid")
});

const ENVELOPE_CLOSE: &str = "</tool_result>";

/// Parsed tool arguments, in order of appearance.
pub type ToolArgs = IndexMap<String, String>;

/// A fully decoded tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool (the markup tag)
    pub name: String,

    /// The exact `<name>…</name>` markup as generated
    pub raw_markup: String,

    /// Extracted `<key>value</key>` pairs
    pub args: ToolArgs,
}

/// Immutable table of tool names and their field names.
///
/// Built once at startup and shared behind an `Arc`; the decoder and the
/// pruner only ever read it.
#[derive(Debug, Clone, Default)]
pub struct ToolSchemaRegistry {
    schemas: HashMap<String, Vec<String>>,
}

impl ToolSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a tool schema.
    pub fn with_tool<I, S>(mut self, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schemas
            .insert(name.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    /// Merge another registry into this one; entries in `other` win.
    pub fn merged(mut self, other: &ToolSchemaRegistry) -> Self {
        for (name, fields) in &other.schemas {
            self.schemas.insert(name.clone(), fields.clone());
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn fields(&self, name: &str) -> Option<&[String]> {
        self.schemas.get(name).map(|f| f.as_slice())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Length in bytes of the longest `</name>` marker.
    pub fn longest_marker_len(&self) -> usize {
        self.schemas
            .keys()
            .map(|name| close_tag(name).len())
            .max()
            .unwrap_or(0)
    }

    /// Decode a block's inside into a [`ToolCall`].
    pub fn parse_call(&self, name: &str, raw_markup: &str, inner: &str) -> ToolCall {
        let fields = self.fields(name).unwrap_or(&[]);
        ToolCall {
            name: name.to_string(),
            raw_markup: raw_markup.to_string(),
            args: extract_fields(inner, fields),
        }
    }
}

/// Execution context handed to every tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub conversation_id: ConversationId,
}

/// What a tool produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,

    /// Short human-readable outcome
    pub message: String,

    /// Full payload for the model
    pub payload: String,
}

impl ToolOutput {
    pub fn ok(message: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            payload: payload.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            payload: String::new(),
        }
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool, also its markup tag.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// The `<key>` fields this tool accepts.
    fn fields(&self) -> Vec<String>;

    /// Execute the tool with decoded arguments.
    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &ToolArgs,
    ) -> std::result::Result<ToolOutput, ToolError>;
}

/// A registry of executable tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// The schema table for every registered tool.
    pub fn schemas(&self) -> ToolSchemaRegistry {
        self.tools
            .values()
            .fold(ToolSchemaRegistry::new(), |reg, tool| {
                reg.with_tool(tool.name(), tool.fields())
            })
    }

    /// Execute a decoded tool call.
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        call: &ToolCall,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.execute(ctx, &call.args).await
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The text a tool result is appended to the conversation as.
///
/// ```text
/// <tool_result tool="read_file" success="true">
/// <message>Read 120 lines</message>
/// <content>…payload…</content>
/// </tool_result>
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultEnvelope {
    pub tool_name: String,
    pub success: bool,
    pub message: String,
    pub payload: String,
}

impl ToolResultEnvelope {
    pub fn from_output(tool_name: impl Into<String>, output: ToolOutput) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: output.success,
            message: output.message,
            payload: output.payload,
        }
    }

    pub fn render(&self) -> String {
        format!(
            "<tool_result tool=\"{}\" success=\"{}\">\n<message>{}</message>\n<content>{}</content>\n{ENVELOPE_CLOSE}",
            escape(&self.tool_name),
            self.success,
            escape(&self.message),
            escape(&self.payload),
        )
    }

    /// Find and decode the first envelope in `content`.
    pub fn parse(content: &str) -> Option<Self> {
        let caps = ENVELOPE_OPEN.captures(content)?;
        let open = caps.get(0)?;
        let inner_len = content[open.end()..].find(ENVELOPE_CLOSE)?;
        let inner = &content[open.end()..open.end() + inner_len];
        let fields = ["message".to_string(), "content".to_string()];
        let mut args = extract_fields(inner, &fields);
        Some(Self {
            tool_name: unescape(caps.get(1)?.as_str()),
            success: caps.get(2)?.as_str() == "true",
            message: args.shift_remove("message").unwrap_or_default(),
            payload: args.shift_remove("content").unwrap_or_default(),
        })
    }

    /// Whether `content` wraps a tool result envelope.
    pub fn is_envelope(content: &str) -> bool {
        Self::parse(content).is_some()
    }

    /// The short stand-in used when the payload is evicted from context.
    pub fn cleared(&self) -> Self {
        Self {
            tool_name: self.tool_name.clone(),
            success: self.success,
            message: format!(
                "Output of {} was cleared to save context. Re-run the tool if it is needed again.",
                self.tool_name
            ),
            payload: CLEARED_PLACEHOLDER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn fields(&self) -> Vec<String> {
            vec!["text".into()]
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            args: &ToolArgs,
        ) -> std::result::Result<ToolOutput, ToolError> {
            let text = args
                .get("text")
                .ok_or_else(|| ToolError::InvalidArguments("missing <text>".into()))?;
            Ok(ToolOutput::ok("echoed", text.clone()))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            conversation_id: ConversationId::from("test"),
        }
    }

    #[test]
    fn schema_registry_lookup() {
        let reg = ToolSchemaRegistry::new()
            .with_tool("read_file", ["path"])
            .with_tool("write_to_file", ["path", "content"]);
        assert!(reg.contains("read_file"));
        assert!(!reg.contains("thinking"));
        assert_eq!(reg.fields("write_to_file").unwrap().len(), 2);
        assert_eq!(reg.longest_marker_len(), "</write_to_file>".len());
        assert_eq!(reg.names(), vec!["read_file", "write_to_file"]);
    }

    #[test]
    fn parse_call_uses_schema_fields() {
        let reg = ToolSchemaRegistry::new().with_tool("read_file", ["path"]);
        let raw = "<read_file><path>a.rs</path><junk>x</junk></read_file>";
        let call = reg.parse_call("read_file", raw, "<path>a.rs</path><junk>x</junk>");
        assert_eq!(call.args.len(), 1);
        assert_eq!(call.args["path"], "a.rs");
        assert_eq!(call.raw_markup, raw);
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let mut args = ToolArgs::new();
        args.insert("text".into(), "hello world".into());
        let call = ToolCall {
            name: "echo".into(),
            raw_markup: String::new(),
            args,
        };
        let out = registry.execute(&ctx(), &call).await.unwrap();
        assert!(out.success);
        assert_eq!(out.payload, "hello world");
        assert!(registry.schemas().contains("echo"));
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            name: "nonexistent".into(),
            raw_markup: String::new(),
            args: ToolArgs::new(),
        };
        let err = registry.execute(&ctx(), &call).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn envelope_render_and_parse() {
        let env = ToolResultEnvelope {
            tool_name: "read_file".into(),
            success: true,
            message: "Read 2 lines".into(),
            payload: "fn a() {}\n</content> <b>".into(),
        };
        let rendered = env.render();
        assert!(rendered.starts_with(r#"<tool_result tool="read_file" success="true">"#));
        assert_eq!(ToolResultEnvelope::parse(&rendered), Some(env));
    }

    #[test]
    fn envelope_parse_ignores_plain_text() {
        assert!(!ToolResultEnvelope::is_envelope("just a question"));
        assert!(!ToolResultEnvelope::is_envelope(
            r#"<tool_result tool="x" success="true"> never closed"#
        ));
    }

    #[test]
    fn cleared_envelope_names_tool() {
        let env = ToolResultEnvelope {
            tool_name: "search".into(),
            success: false,
            message: "m".into(),
            payload: "x".repeat(5000),
        };
        let cleared = env.cleared();
        assert_eq!(cleared.tool_name, "search");
        assert!(!cleared.success);
        assert_eq!(cleared.payload, CLEARED_PLACEHOLDER);
        assert!(cleared.message.contains("search"));
        assert!(cleared.render().len() < 300);
    }
}
