// Streaming response accumulation
//
// Turns an incremental stream of vendor event frames into two things at
// once: live text deltas pushed to the caller's token sink, and one
// reconstructed logical turn the tool loop treats exactly like a
// blocking response.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::providers::types::{ContentPart, Turn, Usage};

/// One decoded event frame, vendor envelope already stripped
#[derive(Debug, Clone, Default)]
pub struct StreamFrame {
    pub parts: Vec<PartDelta>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// One content fragment within a frame
#[derive(Debug, Clone)]
pub enum PartDelta {
    Text(String),
    /// Tool-call fragment, addressed positionally. `name`, `id` and
    /// `arguments` may each arrive split across several frames.
    ToolUse {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates frames into one assistant turn
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

/// Everything a finished stream produced
#[derive(Debug)]
pub struct CompletedStream {
    pub turn: Turn,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one frame. Text deltas are forwarded to `tokens` in
    /// arrival order before this returns. Returns false once the sink
    /// is gone and streaming should stop.
    pub async fn feed(
        &mut self,
        frame: StreamFrame,
        tokens: Option<&mpsc::Sender<String>>,
    ) -> bool {
        for part in frame.parts {
            match part {
                PartDelta::Text(text) => {
                    // Empty parts never reach the sink or the buffer
                    if text.is_empty() {
                        continue;
                    }
                    self.text.push_str(&text);
                    if let Some(tx) = tokens {
                        if tx.send(text).await.is_err() {
                            tracing::debug!("Token sink dropped, stopping stream");
                            return false;
                        }
                    }
                }
                PartDelta::ToolUse {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    let call = self.calls.entry(index).or_default();
                    // Latest non-empty id/name wins; arguments append
                    if let Some(id) = id {
                        if !id.is_empty() {
                            call.id = id;
                        }
                    }
                    if let Some(name) = name {
                        if !name.is_empty() {
                            call.name = name;
                        }
                    }
                    call.arguments.push_str(&arguments);
                }
            }
        }

        if let Some(reason) = frame.finish_reason {
            if !reason.is_empty() {
                self.finish_reason = Some(reason);
            }
        }
        if let Some(usage) = frame.usage {
            self.usage = Some(usage);
        }

        true
    }

    /// End of stream: yield the reconstructed turn
    pub fn finish(self) -> CompletedStream {
        let mut turn = Turn::assistant();
        turn.push_part(ContentPart::Text { text: self.text });

        for (_, call) in self.calls {
            let args = parse_arguments(&call.arguments);
            // Some endpoints never send an id; results still need a key
            let id = if call.id.is_empty() {
                crate::tools::generate_call_id()
            } else {
                call.id
            };
            turn.push_part(ContentPart::ToolUse {
                id,
                name: call.name,
                args,
            });
        }

        CompletedStream {
            turn,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

/// Parse accumulated tool arguments. An empty fragment means no
/// arguments; a malformed fragment is preserved as a raw string so the
/// tool loop can surface a textual error instead of failing.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_frame(text: &str) -> StreamFrame {
        StreamFrame {
            parts: vec![PartDelta::Text(text.to_string())],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_text_forwarded_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut acc = StreamAccumulator::new();

        for chunk in ["Hel", "lo ", "world"] {
            assert!(acc.feed(text_frame(chunk), Some(&tx)).await);
        }
        drop(tx);

        let mut received = String::new();
        while let Some(tok) = rx.recv().await {
            received.push_str(&tok);
        }
        assert_eq!(received, "Hello world");

        let done = acc.finish();
        assert_eq!(done.turn.first_text(), Some("Hello world"));
    }

    #[tokio::test]
    async fn test_empty_deltas_dropped() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut acc = StreamAccumulator::new();

        acc.feed(text_frame(""), Some(&tx)).await;
        acc.feed(text_frame("x"), Some(&tx)).await;
        drop(tx);

        assert_eq!(rx.recv().await, Some("x".to_string()));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_tool_call_fragments_merge() {
        let mut acc = StreamAccumulator::new();

        // name and id arrive first, arguments split over two frames
        acc.feed(
            StreamFrame {
                parts: vec![PartDelta::ToolUse {
                    index: 0,
                    id: Some("call_1".to_string()),
                    name: Some("list_dir".to_string()),
                    arguments: "{\"pa".to_string(),
                }],
                ..Default::default()
            },
            None,
        )
        .await;
        acc.feed(
            StreamFrame {
                parts: vec![PartDelta::ToolUse {
                    index: 0,
                    id: None,
                    name: None,
                    arguments: "th\":\".\"}".to_string(),
                }],
                ..Default::default()
            },
            None,
        )
        .await;

        let done = acc.finish();
        let uses = done.turn.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].0, "call_1");
        assert_eq!(uses[0].1, "list_dir");
        assert_eq!(*uses[0].2, json!({"path": "."}));
    }

    #[tokio::test]
    async fn test_latest_nonempty_name_wins() {
        let mut acc = StreamAccumulator::new();
        for (name, id) in [(Some(""), Some("a")), (Some("real_name"), Some(""))] {
            acc.feed(
                StreamFrame {
                    parts: vec![PartDelta::ToolUse {
                        index: 0,
                        id: id.map(String::from),
                        name: name.map(String::from),
                        arguments: String::new(),
                    }],
                    ..Default::default()
                },
                None,
            )
            .await;
        }

        let done = acc.finish();
        let uses = done.turn.tool_uses();
        assert_eq!(uses[0].0, "a");
        assert_eq!(uses[0].1, "real_name");
    }

    #[tokio::test]
    async fn test_malformed_arguments_preserved_as_string() {
        let mut acc = StreamAccumulator::new();
        acc.feed(
            StreamFrame {
                parts: vec![PartDelta::ToolUse {
                    index: 0,
                    id: Some("call_1".to_string()),
                    name: Some("read".to_string()),
                    arguments: "{\"path\": truncated".to_string(),
                }],
                ..Default::default()
            },
            None,
        )
        .await;

        let done = acc.finish();
        let uses = done.turn.tool_uses();
        assert!(matches!(uses[0].2, Value::String(_)));
    }

    #[tokio::test]
    async fn test_finish_metadata_from_last_frame() {
        let mut acc = StreamAccumulator::new();
        acc.feed(
            StreamFrame {
                parts: vec![PartDelta::Text("hi".to_string())],
                finish_reason: Some("stop".to_string()),
                usage: None,
            },
            None,
        )
        .await;
        acc.feed(
            StreamFrame {
                parts: vec![],
                finish_reason: None,
                usage: Some(Usage {
                    input_tokens: Some(10),
                    output_tokens: Some(2),
                }),
            },
            None,
        )
        .await;

        let done = acc.finish();
        assert_eq!(done.finish_reason.as_deref(), Some("stop"));
        assert_eq!(done.usage.unwrap().output_tokens, Some(2));
    }

    #[tokio::test]
    async fn test_no_content_yields_empty_turn() {
        let acc = StreamAccumulator::new();
        let done = acc.finish();
        assert!(done.turn.parts.is_empty());
    }
}
