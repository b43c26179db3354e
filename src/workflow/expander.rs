// dtsflow — Loop expansion
//
// Turns one step declaration into one parameter set per item discovered in
// the loop's input data.

use super::error::ResolveError;
use super::resolver::{resolve_parameters, resolve_str};
use super::{ExecutionResults, LoopSpec, ParamValue, Parameters};
use serde_json::Value;

/// Object fields searched, in order, for the item array when the loop input
/// is a JSON object.
pub const COLLECTION_FIELDS: &[&str] = &["packages", "items", "files"];

/// Parameter whose item substitution uses a filesystem-safe name.
pub const OUTPUT_FILE_PARAM: &str = "output_file_path";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopIteration {
    pub item: String,
    pub parameters: Parameters,
}

/// Expand `parameters` once per item discovered in `spec.input_data`.
pub fn expand(
    spec: &LoopSpec,
    parameters: &Parameters,
    results: &ExecutionResults,
) -> Result<Vec<LoopIteration>, ResolveError> {
    let input = resolve_str(&spec.input_data, results)?;
    let items = discover_items(&input);
    if items.is_empty() {
        return Err(ResolveError::EmptyLoopInput);
    }

    let token = format!("{{{}}}", spec.item_name);
    let mut iterations = Vec::with_capacity(items.len());
    for item in items {
        let resolved = resolve_parameters(parameters, results)?;
        let substituted = substitute_item(&resolved, &token, &item);
        iterations.push(LoopIteration {
            item,
            parameters: substituted,
        });
    }
    Ok(iterations)
}

fn substitute_item(parameters: &Parameters, token: &str, item: &str) -> Parameters {
    parameters
        .iter()
        .map(|(key, value)| {
            let replacement = if key == OUTPUT_FILE_PARAM {
                safe_file_stem(item)
            } else {
                item.to_string()
            };
            let value = value.map_strings(&mut |s| s.replace(token, &replacement));
            (key.clone(), value)
        })
        .collect()
}

/// Discover loop items from resolved input text.
///
/// JSON arrays yield their elements; JSON objects yield the first array found
/// under [`COLLECTION_FIELDS`]; anything else is split on newlines, commas and
/// semicolons.
pub fn discover_items(input: &str) -> Vec<String> {
    match serde_json::from_str::<Value>(input.trim()) {
        Ok(Value::Array(elements)) => items_from_array(&elements),
        Ok(Value::Object(map)) => COLLECTION_FIELDS
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_array))
            .map(|elements| items_from_array(elements))
            .unwrap_or_default(),
        _ => split_text(input),
    }
}

fn items_from_array(elements: &[Value]) -> Vec<String> {
    elements
        .iter()
        .filter_map(|element| match element {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
        .collect()
}

fn split_text(input: &str) -> Vec<String> {
    input
        .split(['\n', ',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Final path segment of `path` (either separator) without its extension.
pub fn file_stem(path: &str) -> &str {
    let base = path.trim().rsplit(['/', '\\']).next().unwrap_or_default();
    match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    }
}

/// [`file_stem`] of `item` with characters that are unsafe in file names
/// replaced.
pub fn safe_file_stem(item: &str) -> String {
    let cleaned: String = file_stem(item)
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "item".to_string()
    } else {
        cleaned
    }
}
