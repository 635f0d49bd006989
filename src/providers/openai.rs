// OpenAI-compatible provider implementation
//
// One adapter covers every chat/completions endpoint: OpenAI itself,
// LM Studio, Ollama, Qwen and other OAuth-managed gateways. Auth is
// either a static api key or a TokenSource whose refresh hook the
// executor invokes on 401.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::types::{Attachment, AttachmentKind, ContentPart, Role, Turn, Usage};
use super::Provider;
use crate::auth::{SourceRefresher, TokenSource};
use crate::errors::ProviderError;
use crate::exchange::{
    execute, CredentialRefresher, PartDelta, RetryPolicy, SseEvent, SseLineBuffer,
    StreamAccumulator, StreamFrame,
};
use crate::tools::{ToolDefinition, ToolRegistry};
use crate::turns::{ModelExchange, TurnLoop};

const DEFAULT_MODEL: &str = "gpt-4o";
const REQUEST_TIMEOUT_SECS: u64 = 60;

enum Auth {
    None,
    ApiKey(String),
    Token(Arc<dyn TokenSource>),
}

/// Provider for any OpenAI-compatible chat/completions endpoint
pub struct OpenAiProvider {
    client: Client,
    provider_name: String,
    base_url: String,
    model: String,
    system_prompt: Option<String>,
    auth: Auth,
    supports_images: bool,
    registry: Arc<dyn ToolRegistry>,
    policy: RetryPolicy,
}

impl OpenAiProvider {
    pub fn new(
        provider_name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        registry: Arc<dyn ToolRegistry>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            provider_name: provider_name.into(),
            base_url: base_url.into(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
            auth: match api_key {
                Some(key) => Auth::ApiKey(key),
                None => Auth::None,
            },
            supports_images: true,
            registry,
            policy: RetryPolicy::default(),
        })
    }

    /// Authenticate with a refreshable bearer token instead of an api key
    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.auth = Auth::Token(source);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Mark the endpoint text-only; image attachments become a hard error
    pub fn text_only(mut self) -> Self {
        self.supports_images = false;
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    async fn bearer(&self) -> Result<Option<String>, ProviderError> {
        match &self.auth {
            Auth::None => Ok(None),
            Auth::ApiKey(key) => Ok(Some(key.clone())),
            Auth::Token(source) => source.bearer().await.map(Some),
        }
    }

    fn refresher(&self) -> Option<SourceRefresher<'_>> {
        match &self.auth {
            Auth::Token(source) => Some(SourceRefresher(source.as_ref())),
            _ => None,
        }
    }

    fn build_request(
        &self,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        for turn in conversation {
            encode_turn(turn, &mut messages);
        }

        let mut request = json!({
            "model": self.model,
            "messages": messages,
        });
        if !tools.is_empty() {
            request["tools"] = Value::Array(tools.iter().map(encode_tool).collect());
        }
        if stream {
            request["stream"] = json!(true);
        }
        request
    }

    async fn send(&self, request: &Value) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(self.completions_url())
            .header("content-type", "application/json");
        if let Some(token) = self.bearer().await? {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = builder.json(request).send().await?;
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
        tracing::debug!(
            "Sending request to {}: {} turns",
            self.provider_name,
            conversation.len()
        );

        let response = self.send(&request).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        decode_response(parsed)
    }

    async fn stream_once(
        &self,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        tokens: &mpsc::Sender<String>,
    ) -> Result<Turn, ProviderError> {
        let request = self.build_request(conversation, tools, true);
        tracing::debug!("Sending streaming request to {}", self.provider_name);

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
                let Ok(chunk) = serde_json::from_str::<ChatChunk>(&payload) else {
                    tracing::debug!("Skipping undecodable stream chunk");
                    continue;
                };
                if !acc.feed(decode_chunk(chunk), Some(tokens)).await {
                    break 'outer;
                }
            }
        }

        Ok(acc.finish().turn)
    }

    fn check_attachments(&self, attachments: &[Attachment]) -> Result<(), ProviderError> {
        if self.supports_images {
            return Ok(());
        }
        if attachments.iter().any(|a| a.kind == AttachmentKind::Image) {
            return Err(ProviderError::CapabilityUnsupported {
                provider: self.provider_name.clone(),
                capability: "image attachments".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ModelExchange for OpenAiProvider {
    fn label(&self) -> &str {
        &self.provider_name
    }

    async fn exchange(
        &self,
        conversation: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<Turn, ProviderError> {
        let refresher = self.refresher();
        execute(
            &self.policy,
            &self.provider_name,
            || self.exchange_once(conversation, tools),
            refresher.as_ref().map(|r| r as &dyn CredentialRefresher),
        )
        .await
    }

    async fn exchange_stream(
        &self,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        tokens: &mpsc::Sender<String>,
    ) -> Result<Turn, ProviderError> {
        let refresher = self.refresher();
        execute(
            &self.policy,
            &self.provider_name,
            || self.stream_once(conversation, tools, tokens),
            refresher.as_ref().map(|r| r as &dyn CredentialRefresher),
        )
        .await
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
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
        self.check_attachments(attachments)?;
        let turn_loop = TurnLoop::new(self.registry.clone());
        turn_loop
            .run(self, prompt, attachments, None)
            .await
            .with_context(|| format!("{} generation failed", self.provider_name))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        attachments: &[Attachment],
        tokens: mpsc::Sender<String>,
    ) -> Result<()> {
        self.check_attachments(attachments)?;
        let turn_loop = TurnLoop::new(self.registry.clone());
        turn_loop
            .run(self, prompt, attachments, Some(&tokens))
            .await
            .with_context(|| format!("{} streaming generation failed", self.provider_name))?;
        Ok(())
    }
}

// Wire format

fn encode_turn(turn: &Turn, messages: &mut Vec<Value>) {
    match turn.role {
        Role::User => encode_user_turn(turn, messages),
        Role::Assistant => encode_assistant_turn(turn, messages),
        // One tool message per result
        Role::Tool => {
            for part in &turn.parts {
                if let ContentPart::ToolResult {
                    tool_use_id,
                    content,
                } = part
                {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    }));
                }
            }
        }
    }
}

fn encode_user_turn(turn: &Turn, messages: &mut Vec<Value>) {
    let has_images = turn
        .parts
        .iter()
        .any(|p| matches!(p, ContentPart::Image { .. }));

    let content = if has_images {
        let parts: Vec<Value> = turn
            .parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
                ContentPart::Image { data, mime_type } => Some(json!({
                    "type": "image_url",
                    "image_url": {"url": format!("data:{};base64,{}", mime_type, data)},
                })),
                _ => None,
            })
            .collect();
        Value::Array(parts)
    } else {
        let texts: Vec<&str> = turn.parts.iter().filter_map(|p| p.as_text()).collect();
        Value::String(texts.join("\n"))
    };

    messages.push(json!({"role": "user", "content": content}));
}

fn encode_assistant_turn(turn: &Turn, messages: &mut Vec<Value>) {
    let texts: Vec<&str> = turn.parts.iter().filter_map(|p| p.as_text()).collect();
    let tool_calls: Vec<Value> = turn
        .tool_uses()
        .into_iter()
        .map(|(id, name, args)| {
            json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": args.to_string()},
            })
        })
        .collect();

    let mut message = json!({"role": "assistant"});
    message["content"] = if texts.is_empty() {
        Value::Null
    } else {
        Value::String(texts.join("\n"))
    };
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    messages.push(message);
}

fn encode_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        },
    })
}

/// Tool arguments arrive as a JSON string; a malformed one is kept raw
/// so the loop can report it to the model
fn decode_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

fn decode_response(response: ChatResponse) -> Result<Turn, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(ProviderError::EmptyResponse)?;

    let mut turn = Turn::assistant();
    if let Some(text) = choice.message.content {
        turn.push_part(ContentPart::Text { text });
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        let id = if call.id.is_empty() {
            crate::tools::generate_call_id()
        } else {
            call.id
        };
        turn.push_part(ContentPart::ToolUse {
            id,
            name: call.function.name,
            args: decode_arguments(&call.function.arguments),
        });
    }
    Ok(turn)
}

// Streaming chunks

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

fn decode_chunk(chunk: ChatChunk) -> StreamFrame {
    let mut frame = StreamFrame {
        usage: chunk.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
        ..Default::default()
    };

    for choice in chunk.choices {
        if let Some(text) = choice.delta.content {
            frame.parts.push(PartDelta::Text(text));
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            frame.parts.push(PartDelta::ToolUse {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
        if let Some(reason) = choice.finish_reason {
            frame.finish_reason = Some(reason);
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::StaticRegistry;
    use serde_json::json;

    fn registry() -> Arc<dyn ToolRegistry> {
        Arc::new(StaticRegistry::new())
    }

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(
            "lmstudio",
            "http://localhost:1234",
            None,
            registry(),
        )
        .unwrap()
    }

    #[test]
    fn test_system_prompt_leads_messages() {
        let mut p = provider();
        p.set_system_prompt("be terse");
        let request = p.build_request(&[Turn::user().with_text("hi")], &[], false);

        let messages = request["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be terse");
        assert_eq!(messages[1]["role"], "user");
    }

    #[test]
    fn test_tool_results_become_tool_messages() {
        let mut results = Turn::tool();
        results.push_part(ContentPart::ToolResult {
            tool_use_id: "call_1".to_string(),
            content: "out1".to_string(),
        });
        results.push_part(ContentPart::ToolResult {
            tool_use_id: "call_2".to_string(),
            content: "out2".to_string(),
        });

        let mut messages = Vec::new();
        encode_turn(&results, &mut messages);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "tool");
        assert_eq!(messages[1]["tool_call_id"], "call_2");
    }

    #[test]
    fn test_assistant_tool_calls_serialized_as_strings() {
        let mut turn = Turn::assistant();
        turn.push_part(ContentPart::ToolUse {
            id: "call_1".to_string(),
            name: "read".to_string(),
            args: json!({"path": "x"}),
        });

        let mut messages = Vec::new();
        encode_turn(&turn, &mut messages);
        let arguments = messages[0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(arguments).unwrap(),
            json!({"path": "x"})
        );
    }

    #[test]
    fn test_image_turn_uses_content_parts() {
        let mut turn = Turn::user().with_text("what is this");
        turn.push_part(ContentPart::Image {
            data: "aWJr".to_string(),
            mime_type: "image/png".to_string(),
        });

        let mut messages = Vec::new();
        encode_turn(&turn, &mut messages);
        let content = messages[0]["content"].as_array().unwrap();
        assert_eq!(content[1]["type"], "image_url");
        assert!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_decode_response_with_tool_calls() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "list_dir", "arguments": "{\"path\": \".\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let turn = decode_response(parsed).unwrap();
        let uses = turn.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].1, "list_dir");
        assert_eq!(*uses[0].2, json!({"path": "."}));
    }

    #[test]
    fn test_decode_empty_choices_is_error() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            decode_response(parsed),
            Err(ProviderError::EmptyResponse)
        ));
    }

    #[test]
    fn test_decode_chunk_tool_fragments() {
        let raw = r#"{
            "choices": [{
                "delta": {
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_1",
                        "function": {"name": "read", "arguments": "{\"pa"}
                    }]
                },
                "finish_reason": null
            }]
        }"#;
        let chunk: ChatChunk = serde_json::from_str(raw).unwrap();
        let frame = decode_chunk(chunk);
        assert!(matches!(
            &frame.parts[0],
            PartDelta::ToolUse { index: 0, id: Some(_), .. }
        ));
    }

    #[test]
    fn test_malformed_arguments_kept_raw() {
        assert!(matches!(
            decode_arguments("{\"path\": truncated"),
            Value::String(_)
        ));
        assert_eq!(decode_arguments(""), json!({}));
    }

    #[tokio::test]
    async fn test_text_only_rejects_images() {
        let p = provider().text_only();
        let attachments = vec![Attachment::image("a.png", "aWJr", "image/png")];
        let err = p.generate("what", &attachments).await.unwrap_err();
        assert!(err.to_string().contains("image attachments"));
    }
}
