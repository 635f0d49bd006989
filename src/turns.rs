// Tool-calling turn loop
//
// Drives a multi-round conversation with a model until a plain-text
// answer appears: ask the model, execute any tools it requested, feed
// the results back, ask again. Implemented once; vendor adapters only
// supply the wire exchange.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::ProviderError;
use crate::providers::types::{Attachment, AttachmentKind, ContentPart, Turn};
use crate::tools::{ToolDefinition, ToolRegistry};

/// Environment escape hatch to run a turn without any tools
const DISABLE_TOOLS_ENV: &str = "LLM_ADAPTER_DISABLE_TOOLS";

/// The wire seam a vendor adapter implements: encode the conversation,
/// perform one resilient exchange, decode one assistant turn back.
#[async_trait]
pub trait ModelExchange: Send + Sync {
    /// Provider label for diagnostics
    fn label(&self) -> &str;

    /// One blocking request/response exchange
    async fn exchange(
        &self,
        conversation: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<Turn, ProviderError>;

    /// One streaming exchange; text deltas go to `tokens` as they
    /// arrive, and the reconstructed turn is returned at end of stream.
    async fn exchange_stream(
        &self,
        conversation: &[Turn],
        tools: &[ToolDefinition],
        tokens: &mpsc::Sender<String>,
    ) -> Result<Turn, ProviderError>;
}

/// The provider-agnostic conversation driver
pub struct TurnLoop {
    registry: Arc<dyn ToolRegistry>,
}

impl TurnLoop {
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Build the opening user turn: attachments first, prompt last.
    /// Folder attachments are expanded by the caller before reaching
    /// this layer and are skipped here, matching adapter behavior.
    pub fn initial_turn(prompt: &str, attachments: &[Attachment]) -> Turn {
        let mut turn = Turn::user();
        for att in attachments {
            match att.kind {
                AttachmentKind::Text => {
                    turn.push_part(ContentPart::text(att.framed_text()));
                }
                AttachmentKind::Image => {
                    turn.push_part(ContentPart::Image {
                        data: att.data.clone(),
                        mime_type: att.mime_type.clone(),
                    });
                }
                AttachmentKind::Folder => {}
            }
        }
        turn.push_part(ContentPart::text(prompt));
        turn
    }

    /// Run the loop to completion. With a token sink, every exchange
    /// streams; without one, every exchange blocks. Either way the
    /// final plain-text answer is returned (empty string when the model
    /// finished without text, never an error for that case).
    pub async fn run(
        &self,
        exchange: &dyn ModelExchange,
        prompt: &str,
        attachments: &[Attachment],
        tokens: Option<&mpsc::Sender<String>>,
    ) -> Result<String, ProviderError> {
        let mut conversation = vec![Self::initial_turn(prompt, attachments)];

        loop {
            // Tool availability may change between rounds; refetch
            let tools = self.active_tools();

            let response = match tokens {
                Some(tx) => exchange.exchange_stream(&conversation, &tools, tx).await?,
                None => exchange.exchange(&conversation, &tools).await?,
            };

            // Re-append through push_part so vendor empty-part quirks
            // never reach history
            let mut assistant = Turn::assistant();
            for part in response.parts {
                assistant.push_part(part);
            }

            let requests: Vec<(String, String, Value)> = assistant
                .tool_uses()
                .into_iter()
                .map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone()))
                .collect();

            let answer = assistant.first_text().map(str::to_string);
            conversation.push(assistant);

            if requests.is_empty() {
                // Tool-free turn: the first text part is the answer
                return Ok(answer.unwrap_or_default());
            }

            // Tool-use takes priority over any text in the same turn.
            // Execute sequentially, in response order: tool side effects
            // must not race.
            let mut results = Turn::tool();
            for (id, name, args) in requests {
                let part = self.run_tool(exchange.label(), id, &name, args).await;
                results.push_part(part);
            }
            conversation.push(results);
        }
    }

    fn active_tools(&self) -> Vec<ToolDefinition> {
        if std::env::var(DISABLE_TOOLS_ENV).as_deref() == Ok("1") {
            return Vec::new();
        }
        self.registry.active_definitions()
    }

    async fn run_tool(
        &self,
        provider: &str,
        tool_use_id: String,
        name: &str,
        args: Value,
    ) -> ContentPart {
        // Streamed arguments that never parsed arrive as a raw string;
        // surface that to the model instead of failing the loop
        let args = match args {
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!("Unparsable arguments for {}: {}", name, e);
                    return ContentPart::ToolResult {
                        tool_use_id,
                        content: format!("Error parsing arguments: {}", e),
                    };
                }
            },
            other => other,
        };

        tracing::info!("{}", self.registry.format_tool_call(provider, name, &args));
        let content = self.registry.safe_execute(name, &args).await;

        ContentPart::ToolResult {
            tool_use_id,
            content,
        }
    }
}
