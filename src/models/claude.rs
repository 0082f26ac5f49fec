//! Usage: Claude Messages API request model (wire-faithful serde types + normalization).
//!
//! Every known shape keeps unrecognized provider fields via flattened extras,
//! and unknown content-block kinds fall through to a passthrough variant, so a
//! request round-trips byte-for-byte in meaning even when the upstream schema
//! grows ahead of this crate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_MODEL: &str = "claude-opus-4-20250514";
pub const DEFAULT_MAX_TOKENS: u64 = 8192;

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u64 {
    DEFAULT_MAX_TOKENS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Prompt-cache breakpoint marker (`{"type": "ephemeral"}` on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            kind: "ephemeral".to_string(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 {
        media_type: String,
        data: String,
    },
    Url {
        url: String,
    },
    File {
        file_uuid: String,
    },
    #[serde(untagged)]
    Unknown(Value),
}

/// Closed union of the content-block kinds this relay understands, plus a
/// passthrough variant for kinds it does not. Unrecognized fields on known
/// kinds land in `extra` and are re-serialized verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Image {
        source: ImageSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Thinking {
        thinking: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    RedactedThinking {
        data: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    ServerToolUse {
        id: String,
        name: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    WebSearchToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    WebSearchResult {
        title: String,
        url: String,
        encrypted_content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page_age: Option<String>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    #[serde(untagged)]
    Unknown(Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: MessageContent,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            extra: Map::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            extra: Map::new(),
        }
    }
}

/// A system-prompt segment. Always a text block on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SystemBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
            cache_control: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    #[default]
    Disabled,
    Enabled,
    Adaptive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type", default)]
    pub mode: ThinkingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoice {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_parallel_tool_use: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortLevel {
    Low,
    Medium,
    High,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<EffortLevel>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Deprecated structured-output form (`output_config.format` supersedes it);
/// still accepted and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFormat {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesRequest {
    #[serde(default = "default_model")]
    pub model: String,
    pub messages: Vec<InputMessage>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_config: Option<OutputConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessagesRequest {
    pub fn new(model: impl Into<String>, messages: Vec<InputMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            system: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: None,
            metadata: None,
            thinking: None,
            tool_choice: None,
            tools: None,
            output_config: None,
            output_format: None,
            extra: Map::new(),
        }
    }

    /// Invariant: when thinking is enabled or adaptive with a budget set,
    /// `max_tokens` must exceed the budget. Violating requests are repaired by
    /// raising `max_tokens` to `budget + 1`, never rejected.
    ///
    /// Returns whether a repair was applied. Call once, right after parsing.
    pub fn normalize(&mut self) -> bool {
        let Some(thinking) = self.thinking.as_ref() else {
            return false;
        };
        if !matches!(thinking.mode, ThinkingMode::Enabled | ThinkingMode::Adaptive) {
            return false;
        }
        let Some(budget) = thinking.budget_tokens else {
            return false;
        };
        if self.max_tokens > budget {
            return false;
        }
        self.max_tokens = budget + 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn thinking_request(mode: &str, budget: Option<u64>, max_tokens: u64) -> MessagesRequest {
        let mut request = MessagesRequest::new("claude-opus-4-20250514", vec![InputMessage::user("hi")]);
        request.max_tokens = max_tokens;
        request.thinking = Some(ThinkingConfig {
            mode: serde_json::from_value(json!(mode)).unwrap(),
            budget_tokens: budget,
            extra: Map::new(),
        });
        request
    }

    #[test]
    fn normalize_raises_max_tokens_above_thinking_budget() {
        let mut request = thinking_request("enabled", Some(4096), 2000);
        assert!(request.normalize());
        assert_eq!(request.max_tokens, 4097);
    }

    #[test]
    fn normalize_applies_to_adaptive_mode() {
        let mut request = thinking_request("adaptive", Some(8192), 8192);
        assert!(request.normalize());
        assert_eq!(request.max_tokens, 8193);
    }

    #[test]
    fn normalize_leaves_valid_requests_alone() {
        let mut request = thinking_request("enabled", Some(1024), 2000);
        assert!(!request.normalize());
        assert_eq!(request.max_tokens, 2000);

        let mut request = thinking_request("disabled", Some(4096), 2000);
        assert!(!request.normalize());
        assert_eq!(request.max_tokens, 2000);

        let mut request = thinking_request("enabled", None, 2000);
        assert!(!request.normalize());
    }

    #[test]
    fn request_defaults_apply_on_deserialize() {
        let request: MessagesRequest =
            serde_json::from_value(json!({ "messages": [{ "role": "user", "content": "hi" }] }))
                .unwrap();
        assert_eq!(request.model, DEFAULT_MODEL);
        assert_eq!(request.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn absent_optionals_are_omitted_from_serialization() {
        let request = MessagesRequest::new("claude-sonnet-4-20250514", vec![InputMessage::user("hi")]);
        let value = serde_json::to_value(&request).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("temperature"));
        assert!(!obj.contains_key("system"));
        assert!(!obj.contains_key("thinking"));
        assert!(obj.contains_key("max_tokens"));
    }

    #[test]
    fn unknown_fields_on_known_blocks_round_trip() {
        let input = json!({
            "type": "text",
            "text": "hello",
            "citations": [{"source": "doc-1"}],
            "cache_control": {"type": "ephemeral"}
        });
        let block: ContentBlock = serde_json::from_value(input.clone()).unwrap();
        match &block {
            ContentBlock::Text { extra, cache_control, .. } => {
                assert!(extra.contains_key("citations"));
                assert!(cache_control.is_some());
            }
            other => panic!("expected text block, got {other:?}"),
        }
        assert_eq!(serde_json::to_value(&block).unwrap(), input);
    }

    #[test]
    fn unknown_block_kinds_pass_through_verbatim() {
        let input = json!({
            "type": "mcp_tool_result",
            "tool_use_id": "tu_1",
            "payload": {"nested": [1, 2, 3]}
        });
        let block: ContentBlock = serde_json::from_value(input.clone()).unwrap();
        assert!(matches!(block, ContentBlock::Unknown(_)));
        assert_eq!(serde_json::to_value(&block).unwrap(), input);
    }

    #[test]
    fn unknown_request_fields_round_trip() {
        let input = json!({
            "model": "claude-opus-4-20250514",
            "messages": [{ "role": "user", "content": "hi" }],
            "max_tokens": 64,
            "context_management": {"edits": []}
        });
        let request: MessagesRequest = serde_json::from_value(input.clone()).unwrap();
        assert!(request.extra.contains_key("context_management"));
        assert_eq!(serde_json::to_value(&request).unwrap(), input);
    }

    #[test]
    fn system_prompt_accepts_string_and_block_list() {
        let as_string: SystemPrompt = serde_json::from_value(json!("be brief")).unwrap();
        assert!(matches!(as_string, SystemPrompt::Text(_)));

        let as_blocks: SystemPrompt = serde_json::from_value(json!([
            {"type": "text", "text": "be brief", "cache_control": {"type": "ephemeral"}}
        ]))
        .unwrap();
        match as_blocks {
            SystemPrompt::Blocks(blocks) => {
                assert_eq!(blocks.len(), 1);
                assert!(blocks[0].cache_control.is_some());
            }
            other => panic!("expected block list, got {other:?}"),
        }
    }

    #[test]
    fn tool_use_and_image_blocks_parse() {
        let blocks: Vec<ContentBlock> = serde_json::from_value(json!([
            {"type": "tool_use", "id": "tu_1", "name": "bash", "input": {"cmd": "ls"}},
            {"type": "tool_result", "tool_use_id": "tu_1", "content": "ok", "is_error": false},
            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "aGk="}},
            {"type": "redacted_thinking", "data": "opaque"},
        ]))
        .unwrap();
        assert!(matches!(blocks[0], ContentBlock::ToolUse { .. }));
        assert!(matches!(blocks[1], ContentBlock::ToolResult { .. }));
        assert!(matches!(
            blocks[2],
            ContentBlock::Image { source: ImageSource::Base64 { .. }, .. }
        ));
        assert!(matches!(blocks[3], ContentBlock::RedactedThinking { .. }));
    }
}
