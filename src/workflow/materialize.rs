// dtsflow — Output materialization
//
// Writes captured step output to each step's `output_file_path`. JSON output
// is normalized into `{"data": [...]}`; anything else is written as text with
// exactly one trailing newline. A failure for one step never stops the others.

use super::expander::file_stem;
use super::{ExecutionResults, Step, StepResult, Workflow};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fields checked, in order, for a file path when deriving `package`.
pub const FILE_FIELDS: &[&str] = &["file", "file_path", "filePath", "File", "FilePath"];

pub const PACKAGE_FIELD: &str = "package";

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("step '{step}': failed to create directory {path:?}: {source}")]
    CreateDir {
        step: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("step '{step}': failed to write {path:?}: {source}")]
    Write {
        step: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("step '{step}': failed to encode JSON output: {source}")]
    Encode {
        step: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub step: String,
    pub path: PathBuf,
    pub bytes: usize,
}

#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub written: Vec<Materialized>,
    pub failures: Vec<MaterializeError>,
}

impl MaterializeReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Materialize every step that declares an output file and has a captured
/// result.
pub async fn materialize_workflow(
    workflow: &Workflow,
    results: &ExecutionResults,
) -> MaterializeReport {
    let mut report = MaterializeReport::default();

    for step in &workflow.steps {
        let Some(path) = step
            .output_file_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        else {
            continue;
        };

        let Some(result) = results.get(&step.name).and_then(|o| select_result(step, o)) else {
            tracing::debug!(step = %step.name, "No captured output, nothing to write");
            continue;
        };

        match materialize_step(&step.name, result, Path::new(path)).await {
            Ok(written) => {
                tracing::info!(
                    step = %written.step,
                    path = %written.path.display(),
                    bytes = written.bytes,
                    "Output written"
                );
                report.written.push(written);
            }
            Err(e) => {
                tracing::error!(step = %step.name, error = %e, "Failed to write output");
                report.failures.push(e);
            }
        }
    }

    report
}

/// The declared output if present, otherwise the step's only capture.
fn select_result<'a>(step: &Step, outputs: &'a HashMap<String, StepResult>) -> Option<&'a StepResult> {
    let declared = step
        .output
        .as_ref()
        .map(|o| o.name.trim())
        .filter(|n| !n.is_empty());
    match declared {
        Some(name) => outputs.get(name),
        None if outputs.len() == 1 => outputs.values().next(),
        None => None,
    }
}

/// Render and write one captured result to `path`.
pub async fn materialize_step(
    step: &str,
    result: &StepResult,
    path: &Path,
) -> Result<Materialized, MaterializeError> {
    let content = if result.is_json() {
        match normalize_json(&result.value) {
            Some(document) => {
                let mut text = serde_json::to_string_pretty(&document).map_err(|source| {
                    MaterializeError::Encode {
                        step: step.to_string(),
                        source,
                    }
                })?;
                text.push('\n');
                text
            }
            None => {
                tracing::warn!(step = %step, "Output declared as JSON but does not decode, writing as text");
                render_text(&result.value)
            }
        }
    } else {
        render_text(&result.value)
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| MaterializeError::CreateDir {
                step: step.to_string(),
                path: parent.to_path_buf(),
                source,
            })?;
    }

    tokio::fs::write(path, &content)
        .await
        .map_err(|source| MaterializeError::Write {
            step: step.to_string(),
            path: path.to_path_buf(),
            source,
        })?;

    Ok(Materialized {
        step: step.to_string(),
        path: path.to_path_buf(),
        bytes: content.len(),
    })
}

/// Raw text with exactly one trailing newline.
pub fn render_text(text: &str) -> String {
    let mut out = text.trim_end_matches(['\n', '\r']).to_string();
    out.push('\n');
    out
}

/// Decode one or more concatenated JSON values and wrap them as
/// `{"data": [...]}`. Returns `None` when the text is not JSON.
pub fn normalize_json(text: &str) -> Option<Value> {
    let values = decode_concatenated(text)?;

    let mut items = match values.len() {
        1 => match values.into_iter().next() {
            Some(Value::Array(items)) => items,
            Some(single) => vec![single],
            None => Vec::new(),
        },
        _ => values,
    };

    for item in &mut items {
        if let Value::Object(map) = item {
            inject_package(map);
        }
    }

    Some(json!({ "data": items }))
}

/// Every top-level JSON value in `text`, in order. Values may be separated
/// by whitespace or directly adjacent.
pub fn decode_concatenated(text: &str) -> Option<Vec<Value>> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .collect::<Result<Vec<_>, _>>()
        .ok()
}

fn inject_package(map: &mut Map<String, Value>) {
    if map.contains_key(PACKAGE_FIELD) {
        return;
    }
    let stem = FILE_FIELDS
        .iter()
        .find_map(|field| map.get(*field).and_then(Value::as_str))
        .map(file_stem)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    if let Some(stem) = stem {
        map.insert(PACKAGE_FIELD.to_string(), Value::String(stem));
    }
}
