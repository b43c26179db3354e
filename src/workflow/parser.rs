use super::error::WorkflowError;
use super::resolver::is_addressable_step_name;
use super::{ParamValue, Workflow};
use crate::config::EngineConfig;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    /// Try JSON, then YAML.
    Auto,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => DocumentFormat::Json,
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Auto,
        }
    }
}

/// Load, path-resolve and validate a workflow document.
pub fn load_workflow(path: &Path, settings: &EngineConfig) -> Result<Workflow, WorkflowError> {
    let content = std::fs::read_to_string(path).map_err(|source| WorkflowError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut workflow = parse_workflow(&content, DocumentFormat::from_path(path))?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    resolve_relative_paths(&mut workflow, base_dir, &settings.path_parameters);

    validate(&workflow)?;
    tracing::info!(
        path = %path.display(),
        steps = workflow.steps.len(),
        "Loaded workflow"
    );
    Ok(workflow)
}

/// Parse a workflow document without touching the filesystem.
pub fn parse_workflow(content: &str, format: DocumentFormat) -> Result<Workflow, WorkflowError> {
    match format {
        DocumentFormat::Json => {
            serde_json::from_str(content).map_err(|e| WorkflowError::Parse(e.to_string()))
        }
        DocumentFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| WorkflowError::Parse(e.to_string()))
        }
        DocumentFormat::Auto => serde_json::from_str(content).or_else(|json_err| {
            serde_yaml::from_str(content).map_err(|yaml_err| {
                WorkflowError::Parse(format!("not JSON ({}) nor YAML ({})", json_err, yaml_err))
            })
        }),
    }
}

/// Check the structural invariants of a workflow before anything runs.
pub fn validate(workflow: &Workflow) -> Result<(), WorkflowError> {
    if workflow.steps.is_empty() {
        return Err(WorkflowError::Empty);
    }

    let mut seen = HashSet::new();
    for (index, step) in workflow.steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            return Err(WorkflowError::MissingStepName { index });
        }
        if !is_addressable_step_name(&step.name) {
            return Err(WorkflowError::InvalidStepName(step.name.clone()));
        }
        if !seen.insert(step.name.as_str()) {
            return Err(WorkflowError::DuplicateStep(step.name.clone()));
        }
        if step.step_type.trim().is_empty() {
            return Err(WorkflowError::MissingStepType(step.name.clone()));
        }
        if let Some(spec) = &step.loop_spec {
            let invalid = |reason: &str| WorkflowError::InvalidLoop {
                step: step.name.clone(),
                reason: reason.to_string(),
            };
            if spec.input_data.trim().is_empty() {
                return Err(invalid("input_data is empty"));
            }
            if spec.item_name.trim().is_empty() {
                return Err(invalid("item_name is empty"));
            }
            if spec.item_name.contains(['{', '}', '.']) {
                return Err(invalid("item_name must not contain '{', '}' or '.'"));
            }
        }
    }
    Ok(())
}

/// Join relative file references onto the document's directory.
///
/// Applies to each step's `output_file_path` and to top-level string
/// parameters named in `path_parameters` that carry no `{...}` token.
pub fn resolve_relative_paths(workflow: &mut Workflow, base_dir: &Path, path_parameters: &[String]) {
    for step in &mut workflow.steps {
        if let Some(out) = step.output_file_path.as_mut() {
            if !out.trim().is_empty() && !is_absolute_like(out) {
                *out = base_dir.join(out.as_str()).to_string_lossy().to_string();
            }
        }

        for key in path_parameters {
            if let Some(ParamValue::String(value)) = step.parameters.get_mut(key) {
                if value.trim().is_empty() || value.contains('{') || is_absolute_like(value) {
                    continue;
                }
                *value = base_dir.join(value.as_str()).to_string_lossy().to_string();
            }
        }
    }
    workflow.base_dir = Some(base_dir.to_path_buf());
}

/// Absolute on this platform, or a Windows drive/UNC path on any platform.
fn is_absolute_like(path: &str) -> bool {
    let bytes = path.as_bytes();
    Path::new(path).is_absolute()
        || path.starts_with('\\')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}
