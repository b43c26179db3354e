// dtsflow — resolve_expression operation

use super::{Tool, ToolResult};
use crate::expression::{resolve_expression, VariableTable, MAX_EXPRESSION_DEPTH};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Expands `@[Scope::Name]` tokens in a text against a variables map.
pub struct ResolveExpressionTool {
    default_max_depth: usize,
}

impl ResolveExpressionTool {
    pub fn new(default_max_depth: usize) -> Self {
        Self { default_max_depth }
    }
}

/// Accepts either a JSON object or JSON text encoding one (the form a
/// placeholder resolves to).
fn variables_from(value: Option<&Value>) -> Result<VariableTable, String> {
    let object = match value {
        None | Some(Value::Null) => return Ok(VariableTable::new()),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(VariableTable::new()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => return Err("variables must be an object".into()),
        },
        Some(_) => return Err("variables must be an object".into()),
    };

    Ok(object
        .into_iter()
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, text)
        })
        .collect())
}

#[async_trait]
impl Tool for ResolveExpressionTool {
    fn name(&self) -> &str {
        "resolve_expression"
    }
    fn description(&self) -> &str {
        "Expand @[Scope::Name] variable tokens in an expression"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": { "type": "string", "description": "Text containing @[...] tokens" },
                "variables": { "type": "object", "description": "Variable name to value map" },
                "max_depth": { "type": "integer", "description": "Maximum nested expansion depth" }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> ToolResult {
        let expression = match args.get("expression").and_then(|v| v.as_str()) {
            Some(e) => e,
            None => return ToolResult::error("expression is required"),
        };

        let variables = match variables_from(args.get("variables")) {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };

        let max_depth = match args.get("max_depth") {
            Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .unwrap_or(self.default_max_depth)
        .min(MAX_EXPRESSION_DEPTH);

        ToolResult::success(resolve_expression(expression, &variables, max_depth))
    }
}
