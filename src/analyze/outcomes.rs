//! Ordered outcome evaluation.
//!
//! Outcomes run top to bottom; the first entry whose `when` holds wins, and
//! an entry without `when` matches unconditionally as the default. Messages
//! are templates over analyzer-scoped variables (`{{ .Name }}` / `{{ name }}`).

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::errors::Result;
use crate::core::spec::types::{Outcome, OutcomeSpec};

/// Verdict severity of one analyzer result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Requirement met
    Pass,
    /// Degraded but not blocking
    Warn,
    /// Requirement not met
    Fail,
}

static TEMPLATE_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*\.?([A-Za-z0-9_]+)\s*\}\}").expect("static pattern"));

/// Render a message template with analyzer variables. Unknown variables
/// render empty rather than failing the analysis.
pub fn render_message(template: &str, vars: &BTreeMap<String, String>) -> String {
    TEMPLATE_VAR
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            vars.get(key)
                .or_else(|| vars.get(&key.to_ascii_lowercase()))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

/// Evaluate outcomes in order with the analyzer-supplied `when` evaluator.
/// Returns the winning severity and its rendered spec.
pub fn evaluate_outcomes<F>(
    outcomes: &[Outcome],
    vars: &BTreeMap<String, String>,
    mut when_eval: F,
) -> Result<(Severity, OutcomeSpec)>
where
    F: FnMut(&str) -> Result<bool>,
{
    for outcome in outcomes {
        let (severity, spec) = match outcome {
            Outcome::Fail(spec) => (Severity::Fail, spec),
            Outcome::Warn(spec) => (Severity::Warn, spec),
            Outcome::Pass(spec) => (Severity::Pass, spec),
        };
        let matched = match &spec.when {
            None => true,
            Some(when) => when_eval(when)?,
        };
        if matched {
            return Ok((
                severity,
                OutcomeSpec {
                    when: spec.when.clone(),
                    message: render_message(&spec.message, vars),
                    uri: spec.uri.clone(),
                },
            ));
        }
    }

    // Every entry had a `when` and none held.
    Ok((
        Severity::Warn,
        OutcomeSpec {
            when: None,
            message: "no outcome matched".to_string(),
            uri: None,
        },
    ))
}
