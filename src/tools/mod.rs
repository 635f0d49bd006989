// Tool registry boundary
//
// The turn loop receives a registry as an injected dependency; tests
// substitute scripted registries. Definitions are a read-only snapshot
// refetched every loop round, because tool availability may change
// between rounds.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub mod types;

pub use types::{generate_call_id, ToolDefinition, ToolInputSchema};

/// The registry surface the turn loop consumes
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Definitions currently available. Called once per loop round.
    fn active_definitions(&self) -> Vec<ToolDefinition>;

    /// Execute a tool by name. Never fails: internal errors come back as
    /// a textual result the model can read.
    async fn safe_execute(&self, name: &str, args: &Value) -> String;

    /// Diagnostic one-liner for operator logs
    fn format_tool_call(&self, provider: &str, name: &str, args: &Value) -> String {
        format!("[{}] tool call: {}({})", provider, name, args)
    }
}

/// Individual tool trait for the in-crate registry
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (e.g. "read_file", "list_dir")
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema defining expected input parameters
    fn input_schema(&self) -> ToolInputSchema;

    /// Execute the tool with the given input
    async fn execute(&self, input: Value) -> Result<String>;

    /// Full definition handed to the model
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// In-memory registry of tools
pub struct StaticRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl StaticRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get tool by name
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|b| b.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for StaticRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRegistry for StaticRegistry {
    fn active_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    async fn safe_execute(&self, name: &str, args: &Value) -> String {
        let Some(tool) = self.get(name) else {
            tracing::warn!("Model requested unknown tool: {}", name);
            return format!("Error: tool '{}' not found", name);
        };

        match tool.execute(args.clone()).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Tool {} failed: {}", name, e);
                format!("Error executing {}: {}", name, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes back the message parameter"
        }

        fn input_schema(&self) -> ToolInputSchema {
            ToolInputSchema::simple(vec![("message", "Text to echo")])
        }

        async fn execute(&self, input: Value) -> Result<String> {
            let msg = input["message"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("missing message"))?;
            Ok(msg.to_string())
        }
    }

    #[test]
    fn test_registry_definitions() {
        let mut registry = StaticRegistry::new();
        registry.register(Box::new(EchoTool));

        let defs = registry.active_definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[tokio::test]
    async fn test_safe_execute_success() {
        let mut registry = StaticRegistry::new();
        registry.register(Box::new(EchoTool));

        let result = registry
            .safe_execute("echo", &json!({"message": "hi"}))
            .await;
        assert_eq!(result, "hi");
    }

    #[tokio::test]
    async fn test_safe_execute_unknown_tool() {
        let registry = StaticRegistry::new();
        let result = registry.safe_execute("nope", &json!({})).await;
        assert!(result.contains("not found"));
    }

    #[tokio::test]
    async fn test_safe_execute_tool_failure_is_textual() {
        let mut registry = StaticRegistry::new();
        registry.register(Box::new(EchoTool));

        // Missing required argument: error comes back as text, not Err
        let result = registry.safe_execute("echo", &json!({})).await;
        assert!(result.starts_with("Error executing echo"));
    }

    #[test]
    fn test_format_tool_call() {
        let registry = StaticRegistry::new();
        let line = registry.format_tool_call("anthropic", "read", &json!({"path": "a.txt"}));
        assert!(line.contains("anthropic"));
        assert!(line.contains("read"));
    }
}
