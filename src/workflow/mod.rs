// dtsflow — Declarative workflow model

pub mod engine;
pub mod error;
pub mod expander;
pub mod materialize;
pub mod parser;
pub mod resolver;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

pub use engine::{OperationRegistry, RunState, WorkflowEngine};
pub use error::{ResolveError, WorkflowError};

// ---------------------------------------------------------------------------
// Parameter values
// ---------------------------------------------------------------------------

/// A declared parameter value: a string, an ordered list, or a map.
///
/// Documents may carry numbers and booleans; they are kept as text. `null`
/// becomes the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ParamValue {
    String(String),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Apply `f` to every string leaf, leaving map keys untouched.
    pub fn map_strings<F>(&self, f: &mut F) -> ParamValue
    where
        F: FnMut(&str) -> String,
    {
        match self {
            ParamValue::String(s) => ParamValue::String(f(s)),
            ParamValue::List(items) => {
                ParamValue::List(items.iter().map(|v| v.map_strings(f)).collect())
            }
            ParamValue::Map(map) => ParamValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.map_strings(f)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ParamValue::String(String::new()),
            Value::Bool(b) => ParamValue::String(b.to_string()),
            Value::Number(n) => ParamValue::String(n.to_string()),
            Value::String(s) => ParamValue::String(s),
            Value::Array(items) => ParamValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                ParamValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<ParamValue> for Value {
    fn from(value: ParamValue) -> Self {
        match value {
            ParamValue::String(s) => Value::String(s),
            ParamValue::List(items) => Value::Array(items.into_iter().map(Into::into).collect()),
            ParamValue::Map(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

pub type Parameters = BTreeMap<String, ParamValue>;

// ---------------------------------------------------------------------------
// Workflow document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default, rename = "Name", alias = "name")]
    pub name: Option<String>,
    #[serde(default, rename = "Description", alias = "description")]
    pub description: Option<String>,
    #[serde(rename = "Steps", alias = "steps")]
    pub steps: Vec<Step>,
    /// Directory of the source document; relative paths were resolved
    /// against it at load time.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Workflow {
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, rename = "Name", alias = "name")]
    pub name: String,
    #[serde(default, rename = "Type", alias = "type")]
    pub step_type: String,
    #[serde(default, rename = "Parameters", alias = "parameters")]
    pub parameters: Parameters,
    #[serde(default = "default_enabled", rename = "Enabled", alias = "enabled")]
    pub enabled: bool,
    #[serde(default, rename = "Output", alias = "output")]
    pub output: Option<OutputSpec>,
    #[serde(default, rename = "loop", alias = "Loop")]
    pub loop_spec: Option<LoopSpec>,
    #[serde(default, rename = "output_file_path", alias = "OutputFilePath")]
    pub output_file_path: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(default, rename = "Format", alias = "format")]
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSpec {
    #[serde(default, rename = "input_data", alias = "InputData")]
    pub input_data: String,
    #[serde(default, rename = "item_name", alias = "ItemName")]
    pub item_name: String,
}

// ---------------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub value: String,
    pub format: String,
}

impl StepResult {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// step name → output name → captured result.
pub type ExecutionResults = HashMap<String, HashMap<String, StepResult>>;

/// Lifecycle of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Resolving,
    Invoking,
    Captured,
    Skipped,
    Failed,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Captured | StepState::Skipped | StepState::Failed)
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepState::Pending => "pending",
            StepState::Resolving => "resolving",
            StepState::Invoking => "invoking",
            StepState::Captured => "captured",
            StepState::Skipped => "skipped",
            StepState::Failed => "failed",
        };
        f.write_str(s)
    }
}
