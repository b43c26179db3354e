// dtsflow — Operation registry

pub mod expression;
pub mod filesystem;
pub mod plugin;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Tool result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Text produced by the operation
    pub content: String,
    /// Whether this result represents an error
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    NotFound(String),
    #[error("tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn execute(&self, args: HashMap<String, Value>) -> ToolResult;
}

/// The engine's only view of the outside world: run a named operation with
/// fully resolved parameters and return its text.
#[async_trait]
pub trait OperationRegistry: Send + Sync {
    async fn invoke(&self, name: &str, args: HashMap<String, Value>) -> Result<String, ToolError>;
}

// ---------------------------------------------------------------------------
// Tool registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name, tool);
    }

    pub async fn execute(&self, name: &str, args: HashMap<String, Value>) -> ToolResult {
        let tool = self.tools.read().await.get(name).cloned();
        match tool {
            Some(tool) => {
                tracing::debug!(tool = %name, "Executing tool");
                let start = std::time::Instant::now();
                let result = tool.execute(args).await;
                let duration = start.elapsed();

                if result.is_error {
                    tracing::error!(tool = %name, duration_ms = %duration.as_millis(), error = %result.content, "Tool failed");
                } else {
                    tracing::debug!(tool = %name, duration_ms = %duration.as_millis(), result_len = result.content.len(), "Tool completed");
                }

                result
            }
            None => {
                tracing::error!(tool = %name, "Tool not found");
                ToolResult::error(format!("tool '{}' not found", name))
            }
        }
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn count(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn get_summaries(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut summaries: Vec<String> = tools
            .values()
            .map(|t| format!("- `{}` - {}", t.name(), t.description()))
            .collect();
        summaries.sort();
        summaries
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationRegistry for ToolRegistry {
    async fn invoke(&self, name: &str, args: HashMap<String, Value>) -> Result<String, ToolError> {
        if !self.contains(name).await {
            return Err(ToolError::NotFound(name.to_string()));
        }
        let result = self.execute(name, args).await;
        if result.is_error {
            Err(ToolError::Failed {
                tool: name.to_string(),
                message: result.content,
            })
        } else {
            Ok(result.content)
        }
    }
}
