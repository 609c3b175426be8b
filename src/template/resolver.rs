//! `{{key}}` placeholder resolution

use super::context::RunContext;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Matches `{{key}}` where key is any non-empty run of characters without braces.
/// Keys are taken verbatim; `{{ task }}` names the key `" task "`.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("placeholder regex is valid"));

/// Result of resolving a template, including the keys that had no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub text: String,
    /// Missing keys, deduplicated, in first-seen order
    pub missing: Vec<String>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Substitute every `{{key}}` in `template` with its value from `vars`
///
/// Absent keys render as `[missing: key]`. Substituted values are not
/// scanned again.
///
/// ```ignore
/// let mut vars = RunContext::new();
/// vars.insert("x", "true");
/// assert_eq!(resolve_template("Mode: {{x}}", &vars), "Mode: true");
/// ```
pub fn resolve_template(template: &str, vars: &RunContext) -> String {
    resolve_with_report(template, vars).text
}

/// Same as [`resolve_template`], also reporting unresolved keys
pub fn resolve_with_report(template: &str, vars: &RunContext) -> Resolution {
    let mut missing: Vec<String> = Vec::new();

    let text = PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            match vars.get(key) {
                Some(value) => value.to_string(),
                None => {
                    if !missing.iter().any(|m| m == key) {
                        missing.push(key.to_string());
                    }
                    format!("[missing: {}]", key)
                }
            }
        })
        .into_owned();

    Resolution { text, missing }
}
