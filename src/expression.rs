// dtsflow — Variable expression resolution
//
// Expands `@[Scope::Name]` / `@[Name]` tokens found in package content against
// a flat variable table. Expansion is recursive but bounded by a depth counter
// so cyclic definitions terminate.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static EXPRESSION_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@\[(?:([^\[\]:]+)::)?([^\[\]]+)\]").expect("expression token regex is valid")
});

/// Flat name → value table. Keys may be bare (`Counter`) or scoped
/// (`User::Counter`, `$Project::Server`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableTable {
    values: HashMap<String, String>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = VariableTable::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

/// Placeholder substituted for `System::` variables. Their values only exist
/// at package run time.
pub fn system_placeholder(name: &str) -> String {
    format!("<System::{}>", name)
}

/// Upper bound on nested expansion, whatever depth a caller asks for.
pub const MAX_EXPRESSION_DEPTH: usize = 64;

/// Total variable substitutions allowed in one resolution.
const MAX_SUBSTITUTIONS: usize = 10_000;

/// Resolve every expression token in `text`.
///
/// Unknown variables are left verbatim. Once `max_depth` (capped at
/// [`MAX_EXPRESSION_DEPTH`]) reaches zero, or the substitution budget runs
/// out, remaining tokens are returned unexpanded.
pub fn resolve_expression(text: &str, variables: &VariableTable, max_depth: usize) -> String {
    let mut budget = MAX_SUBSTITUTIONS;
    expand(text, variables, max_depth.min(MAX_EXPRESSION_DEPTH), &mut budget)
}

fn expand(text: &str, variables: &VariableTable, depth: usize, budget: &mut usize) -> String {
    if depth == 0 || !text.contains("@[") {
        return text.to_string();
    }

    EXPRESSION_TOKEN
        .replace_all(text, |caps: &Captures| {
            let scope = caps.get(1).map(|m| m.as_str().trim());
            let name = caps[2].trim();
            match lookup(scope, name, variables) {
                Lookup::System => system_placeholder(name),
                Lookup::Found(value) if *budget > 0 => {
                    *budget -= 1;
                    expand(value, variables, depth - 1, budget)
                }
                Lookup::Found(_) | Lookup::Missing => caps[0].to_string(),
            }
        })
        .into_owned()
}

enum Lookup<'a> {
    System,
    Found(&'a str),
    Missing,
}

fn lookup<'a>(scope: Option<&str>, name: &str, variables: &'a VariableTable) -> Lookup<'a> {
    match scope {
        Some("System") => Lookup::System,
        Some("User") => variables
            .get(name)
            .or_else(|| variables.get(&format!("User::{}", name)))
            .map_or(Lookup::Missing, Lookup::Found),
        Some(other) => variables
            .get(&format!("{}::{}", other, name))
            .or_else(|| variables.get(name))
            .map_or(Lookup::Missing, Lookup::Found),
        None => variables.get(name).map_or(Lookup::Missing, Lookup::Found),
    }
}
