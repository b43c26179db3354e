// dtsflow — Workflow error taxonomy

use std::path::PathBuf;
use thiserror::Error;

/// Failures while resolving `{Step.Output[.path]}` placeholders or
/// discovering loop items.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("referenced step '{0}' has not produced outputs")]
    StepNotProduced(String),
    #[error("step '{step}' does not contain output {output}")]
    MissingOutput { step: String, output: String },
    #[error("path '{path}' cannot be addressed: output is not valid JSON")]
    NotJson { path: String },
    #[error("path '{path}' not found in step output")]
    PathNotFound { path: String },
    #[error("loop input did not yield any items")]
    EmptyLoopInput,
}

/// Errors that end a workflow run (or prevent it from starting).
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("failed to read workflow {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse workflow document: {0}")]
    Parse(String),
    #[error("workflow has no steps")]
    Empty,
    #[error("step #{index} has no name")]
    MissingStepName { index: usize },
    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),
    #[error("step name '{0}' cannot be referenced: names may not contain whitespace, quotes, ':', '.', '{{' or '}}'")]
    InvalidStepName(String),
    #[error("step '{0}' has no type")]
    MissingStepType(String),
    #[error("step '{step}' has an invalid loop: {reason}")]
    InvalidLoop { step: String, reason: String },
    #[error("step '{step}': {source}")]
    Resolution {
        step: String,
        #[source]
        source: ResolveError,
    },
    #[error("step '{step}'{}: {message}", iteration_suffix(.iteration))]
    Invocation {
        step: String,
        iteration: Option<usize>,
        message: String,
    },
}

fn iteration_suffix(iteration: &Option<usize>) -> String {
    iteration
        .map(|i| format!(" (loop iteration {})", i))
        .unwrap_or_default()
}

impl WorkflowError {
    pub fn resolution(step: &str, source: ResolveError) -> Self {
        WorkflowError::Resolution {
            step: step.to_string(),
            source,
        }
    }

    /// Name of the step the error is attributed to, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            WorkflowError::DuplicateStep(step)
            | WorkflowError::InvalidStepName(step)
            | WorkflowError::MissingStepType(step) => Some(step),
            WorkflowError::InvalidLoop { step, .. }
            | WorkflowError::Resolution { step, .. }
            | WorkflowError::Invocation { step, .. } => Some(step),
            _ => None,
        }
    }

    /// True for errors detected before any operation runs.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            WorkflowError::Read { .. }
                | WorkflowError::Parse(_)
                | WorkflowError::Empty
                | WorkflowError::MissingStepName { .. }
                | WorkflowError::DuplicateStep(_)
                | WorkflowError::InvalidStepName(_)
                | WorkflowError::MissingStepType(_)
                | WorkflowError::InvalidLoop { .. }
        )
    }
}
