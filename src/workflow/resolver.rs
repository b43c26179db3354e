// dtsflow — Cross-step placeholder resolution
//
// Replaces `{StepName.Output[.path...]}` tokens with values captured by steps
// that already ran. Resolution is pure: it reads only the results snapshot
// it is handed.

use super::error::ResolveError;
use super::{ExecutionResults, ParamValue, Parameters};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{([^{}."':\s]+)\.([^{}"'\s]+)\}"#).expect("placeholder regex is valid")
});

/// Characters a step name may not contain, or `{Step.Output}` could not
/// address it.
pub const STEP_NAME_FORBIDDEN: &[char] = &['{', '}', '.', '"', '\'', ':'];

/// True when `name` can appear as the step part of a placeholder.
pub fn is_addressable_step_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || STEP_NAME_FORBIDDEN.contains(&c))
}

/// Resolve every placeholder inside `value`, recursing through lists and map
/// values. Map keys are never rewritten.
pub fn resolve_value(
    value: &ParamValue,
    results: &ExecutionResults,
) -> Result<ParamValue, ResolveError> {
    match value {
        ParamValue::String(s) => Ok(ParamValue::String(resolve_str(s, results)?)),
        ParamValue::List(items) => items
            .iter()
            .map(|item| resolve_value(item, results))
            .collect::<Result<Vec<_>, _>>()
            .map(ParamValue::List),
        ParamValue::Map(map) => resolve_parameters(map, results).map(ParamValue::Map),
    }
}

/// Resolve a whole parameter map into a fresh copy.
pub fn resolve_parameters(
    parameters: &Parameters,
    results: &ExecutionResults,
) -> Result<Parameters, ResolveError> {
    let mut resolved = Parameters::new();
    for (key, value) in parameters {
        resolved.insert(key.clone(), resolve_value(value, results)?);
    }
    Ok(resolved)
}

/// Resolve placeholders in a single string, left to right.
pub fn resolve_str(text: &str, results: &ExecutionResults) -> Result<String, ResolveError> {
    if !text.contains('{') {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&lookup(&caps[1], &caps[2], results)?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn lookup(step: &str, spec: &str, results: &ExecutionResults) -> Result<String, ResolveError> {
    let outputs = results
        .get(step)
        .ok_or_else(|| ResolveError::StepNotProduced(step.to_string()))?;

    let mut segments = spec.split('.');
    let output = segments.next().unwrap_or_default();
    let captured = outputs
        .get(output)
        .ok_or_else(|| ResolveError::MissingOutput {
            step: step.to_string(),
            output: output.to_string(),
        })?;

    let path: Vec<&str> = segments.collect();
    if path.is_empty() {
        return Ok(captured.value.clone());
    }

    let full_path = format!("{}.{}", step, spec);
    let root: Value = serde_json::from_str(captured.value.trim()).map_err(|_| {
        ResolveError::NotJson {
            path: full_path.clone(),
        }
    })?;

    let mut current = &root;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| ResolveError::PathNotFound {
            path: full_path.clone(),
        })?;
    }

    Ok(stringify(current))
}

/// Scalars become their plain text (null is empty); composites become
/// compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
