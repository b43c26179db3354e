// dtsflow — Command plugins: operations backed by shell command templates,
// declared as JSON files in the plugins directory.

use crate::tool::{Tool, ToolRegistry, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

/// A plugin definition loaded from a JSON file in the plugins directory.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    /// Plugin name (becomes the operation name used as a step `Type`).
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Shell command template (supports `{{param}}` substitution).
    pub command: String,
    /// Parameters the operation accepts.
    #[serde(default)]
    pub parameters: Vec<PluginParam>,
    /// Optional working directory.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Timeout in seconds (default 120).
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginParam {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
}

fn default_type() -> String {
    "string".into()
}

/// Operation backed by a shell command template.
pub struct PluginTool {
    config: PluginConfig,
    schema: Value,
}

impl PluginTool {
    pub fn new(config: PluginConfig) -> Self {
        let schema = build_schema(&config.parameters);
        Self { config, schema }
    }

    /// Substitute `{{param}}` placeholders with single-quoted argument values.
    fn render_command(&self, args: &HashMap<String, Value>) -> Result<String, String> {
        for param in self.config.parameters.iter().filter(|p| p.required) {
            if !args.contains_key(&param.name) {
                return Err(format!("{} is required", param.name));
            }
        }

        let mut resolved = self.config.command.clone();
        for (key, val) in args {
            let placeholder = format!("{{{{{}}}}}", key);
            let value_str = match val {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            resolved = resolved.replace(&placeholder, &shell_quote(&value_str));
        }
        Ok(resolved)
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn build_schema(parameters: &[PluginParam]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for param in parameters {
        let mut prop = serde_json::Map::new();
        prop.insert("type".into(), Value::String(param.param_type.clone()));
        prop.insert(
            "description".into(),
            Value::String(param.description.clone()),
        );
        properties.insert(param.name.clone(), Value::Object(prop));
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[async_trait]
impl Tool for PluginTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn parameters(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: HashMap<String, Value>) -> ToolResult {
        let resolved = match self.render_command(&args) {
            Ok(c) => c,
            Err(e) => return ToolResult::error(e),
        };

        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(&resolved)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.config.cwd {
            command.current_dir(dir);
        }

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(self.config.timeout),
            command.output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if output.status.success() {
                    ToolResult::success(stdout.to_string())
                } else {
                    ToolResult::error(format!("Exit {}: {}", output.status, stderr.trim()))
                }
            }
            Ok(Err(e)) => ToolResult::error(format!("Failed to run: {}", e)),
            Err(_) => ToolResult::error(format!("Plugin timed out after {}s", self.config.timeout)),
        }
    }
}

/// Load plugin configs from a directory of JSON files, in file name order.
pub async fn load_plugins(dir: &Path) -> Vec<PluginConfig> {
    let mut plugins = Vec::new();

    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return plugins;
    };

    let mut paths = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<PluginConfig>(&content) {
                Ok(plugin) => {
                    tracing::info!(name = %plugin.name, "Loaded plugin: {}", path.display());
                    plugins.push(plugin);
                }
                Err(e) => {
                    tracing::warn!("Failed to parse plugin {}: {}", path.display(), e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read plugin file {}: {}", path.display(), e);
            }
        }
    }

    plugins
}

/// Register loaded plugins as operations in the registry.
pub async fn register_plugins(registry: &ToolRegistry, plugins: Vec<PluginConfig>) {
    for plugin in plugins {
        let name = plugin.name.clone();
        registry.register(Arc::new(PluginTool::new(plugin))).await;
        tracing::info!(name = %name, "Registered plugin tool");
    }
}
