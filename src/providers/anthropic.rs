// Anthropic messages-API provider implementation

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::types::{Attachment, ContentPart, Role, Turn, Usage};
use super::Provider;
use crate::errors::ProviderError;
use crate::exchange::{
    execute, PartDelta, RetryPolicy, SseEvent, SseLineBuffer, StreamAccumulator, StreamFrame,
};
use crate::tools::{ToolDefinition, ToolRegistry};
use crate::turns::{ModelExchange, TurnLoop};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Anthropic API provider
///
/// Speaks the messages API with api-key auth. Streaming uses real SSE;
/// the accumulator makes the result indistinguishable from a blocking
/// response.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    system_prompt: Option<String>,
    registry: Arc<dyn ToolRegistry>,
    policy: RetryPolicy,
}

impl AnthropicProvider {
    pub fn new(api_key: String, registry: Arc<dyn ToolRegistry>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
            registry,
            policy: RetryPolicy::default(),
        })
    }

    /// Override the endpoint (local gateways, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn build_request(
        &self,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: self.system_prompt.clone(),
            messages: conversation.iter().map(encode_turn).collect(),
            tools: tools.iter().map(encode_tool).collect(),
            stream,
        }
    }

    async fn send(&self, request: &MessagesRequest) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn exchange_once(
        &self,
        conversation: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<Turn, ProviderError> {
        let request = self.build_request(conversation, tools, false);
        tracing::debug!("Sending request to Anthropic API: {} turns", conversation.len());

        let response = self.send(&request).await?;
        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        Ok(decode_response(parsed))
    }

    async fn stream_once(
        &self,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        tokens: &mpsc::Sender<String>,
    ) -> Result<Turn, ProviderError> {
        let request = self.build_request(conversation, tools, true);
        tracing::debug!("Sending streaming request to Anthropic API");

        let response = self.send(&request).await?;
        let mut stream = response.bytes_stream();
        let mut lines = SseLineBuffer::new();
        let mut acc = StreamAccumulator::new();

        'outer: while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(ProviderError::from)?;
            for event in lines.push(&bytes) {
                let payload = match event {
                    SseEvent::Data(payload) => payload,
                    SseEvent::Done => break 'outer,
                };
                // Frames that fail to decode are skipped
                let Ok(event) = serde_json::from_str::<StreamEvent>(&payload) else {
                    tracing::debug!("Skipping undecodable stream event");
                    continue;
                };
                if event.event_type == "message_stop" {
                    break 'outer;
                }
                let Some(frame) = decode_stream_event(event) else {
                    continue;
                };
                if !acc.feed(frame, Some(tokens)).await {
                    break 'outer;
                }
            }
        }

        Ok(acc.finish().turn)
    }
}

#[async_trait]
impl ModelExchange for AnthropicProvider {
    fn label(&self) -> &str {
        "anthropic"
    }

    async fn exchange(
        &self,
        conversation: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<Turn, ProviderError> {
        execute(
            &self.policy,
            "anthropic",
            || self.exchange_once(conversation, tools),
            None,
        )
        .await
    }

    async fn exchange_stream(
        &self,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        tokens: &mpsc::Sender<String>,
    ) -> Result<Turn, ProviderError> {
        execute(
            &self.policy,
            "anthropic",
            || self.stream_once(conversation, tools, tokens),
            None,
        )
        .await
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn set_model(&mut self, model: &str) {
        if !model.is_empty() {
            self.model = model.to_string();
        }
    }

    fn set_system_prompt(&mut self, prompt: &str) {
        self.system_prompt = Some(prompt.to_string());
    }

    async fn generate(&self, prompt: &str, attachments: &[Attachment]) -> Result<String> {
        let turn_loop = TurnLoop::new(self.registry.clone());
        turn_loop
            .run(self, prompt, attachments, None)
            .await
            .context("Anthropic generation failed")
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        attachments: &[Attachment],
        tokens: mpsc::Sender<String>,
    ) -> Result<()> {
        let turn_loop = TurnLoop::new(self.registry.clone());
        turn_loop
            .run(self, prompt, attachments, Some(&tokens))
            .await
            .context("Anthropic streaming generation failed")?;
        Ok(())
    }
}

// Wire format

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "is_false")]
    stream: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<Value>,
}

fn encode_turn(turn: &Turn) -> WireMessage {
    let role = match turn.role {
        Role::Assistant => "assistant",
        // Tool results go back as user-role tool_result blocks
        Role::User | Role::Tool => "user",
    };
    let content = turn.parts.iter().filter_map(encode_part).collect();
    WireMessage { role, content }
}

fn encode_part(part: &ContentPart) -> Option<Value> {
    match part {
        ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
        ContentPart::Image { data, mime_type } => Some(json!({
            "type": "image",
            "source": {"type": "base64", "media_type": mime_type, "data": data},
        })),
        ContentPart::ToolUse { id, name, args } => Some(json!({
            "type": "tool_use", "id": id, "name": name, "input": args,
        })),
        ContentPart::ToolResult {
            tool_use_id,
            content,
        } => Some(json!({
            "type": "tool_result", "tool_use_id": tool_use_id, "content": content,
        })),
    }
}

fn encode_tool(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<WireBlock>,
    #[allow(dead_code)]
    stop_reason: Option<String>,
    #[allow(dead_code)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl From<WireUsage> for Usage {
    fn from(wire: WireUsage) -> Self {
        Usage {
            input_tokens: wire.input_tokens,
            output_tokens: wire.output_tokens,
        }
    }
}

fn decode_response(response: MessagesResponse) -> Turn {
    let mut turn = Turn::assistant();
    for block in response.content {
        match block {
            WireBlock::Text { text } => turn.push_part(ContentPart::Text { text }),
            WireBlock::ToolUse { id, name, input } => {
                turn.push_part(ContentPart::ToolUse {
                    id,
                    name,
                    args: input,
                })
            }
            WireBlock::Unknown => {}
        }
    }
    turn
}

// Streaming events

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    index: Option<usize>,
    content_block: Option<StreamBlockStart>,
    delta: Option<StreamDelta>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamBlockStart {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(rename = "type")]
    delta_type: Option<String>,
    text: Option<String>,
    partial_json: Option<String>,
    stop_reason: Option<String>,
}

/// One SSE event -> one accumulator frame, or nothing for events that
/// carry no content (message_start, ping, content_block_stop)
fn decode_stream_event(event: StreamEvent) -> Option<StreamFrame> {
    let mut frame = StreamFrame::default();

    match event.event_type.as_str() {
        "content_block_start" => {
            let block = event.content_block?;
            if block.block_type == "tool_use" {
                frame.parts.push(PartDelta::ToolUse {
                    index: event.index.unwrap_or(0),
                    id: block.id,
                    name: block.name,
                    arguments: String::new(),
                });
            } else {
                return None;
            }
        }
        "content_block_delta" => {
            let delta = event.delta?;
            match delta.delta_type.as_deref() {
                Some("text_delta") => {
                    frame.parts.push(PartDelta::Text(delta.text?));
                }
                Some("input_json_delta") => {
                    frame.parts.push(PartDelta::ToolUse {
                        index: event.index.unwrap_or(0),
                        id: None,
                        name: None,
                        arguments: delta.partial_json?,
                    });
                }
                _ => return None,
            }
        }
        "message_delta" => {
            frame.finish_reason = event.delta.and_then(|d| d.stop_reason);
            frame.usage = event.usage.map(Usage::from);
            if frame.finish_reason.is_none() && frame.usage.is_none() {
                return None;
            }
        }
        _ => return None,
    }

    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::StaticRegistry;

    fn registry() -> Arc<dyn ToolRegistry> {
        Arc::new(StaticRegistry::new())
    }

    #[test]
    fn test_provider_creation() {
        let provider = AnthropicProvider::new("test-key".to_string(), registry());
        assert!(provider.is_ok());
    }

    #[test]
    fn test_set_model_ignores_empty() {
        let mut provider = AnthropicProvider::new("k".to_string(), registry()).unwrap();
        provider.set_model("");
        assert_eq!(provider.model, DEFAULT_MODEL);
        provider.set_model("claude-opus-4-20250514");
        assert_eq!(provider.model, "claude-opus-4-20250514");
    }

    #[test]
    fn test_tool_turn_encodes_as_user_role() {
        let mut turn = Turn::tool();
        turn.push_part(ContentPart::ToolResult {
            tool_use_id: "toolu_1".to_string(),
            content: "output".to_string(),
        });
        let wire = encode_turn(&turn);
        assert_eq!(wire.role, "user");
        assert_eq!(wire.content[0]["type"], "tool_result");
    }

    #[test]
    fn test_decode_mixed_response() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "Let me check"},
                {"type": "tool_use", "id": "toolu_1", "name": "list_dir", "input": {"path": "."}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        let turn = decode_response(parsed);
        assert_eq!(turn.first_text(), Some("Let me check"));
        assert_eq!(turn.tool_uses().len(), 1);
    }

    #[test]
    fn test_decode_stream_text_delta() {
        let raw = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        let frame = decode_stream_event(event).unwrap();
        assert!(matches!(&frame.parts[0], PartDelta::Text(t) if t == "Hi"));
    }

    #[test]
    fn test_decode_stream_tool_use_start() {
        let raw = r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_9","name":"read"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        let frame = decode_stream_event(event).unwrap();
        assert!(matches!(
            &frame.parts[0],
            PartDelta::ToolUse { index: 1, id: Some(_), name: Some(_), .. }
        ));
    }

    #[test]
    fn test_ping_events_skipped() {
        let raw = r#"{"type":"ping"}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert!(decode_stream_event(event).is_none());
    }
}
