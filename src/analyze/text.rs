//! Regex analysis over collected files.
//!
//! `regexPattern` asks "did the pattern match anywhere in the referenced
//! files" and is evaluated with `when: "true"` / `when: "false"`.
//! `regexGroups` captures named groups from the first match and exposes
//! them as message variables and numeric `when` comparisons.

use std::collections::BTreeMap;

use regex::Regex;

use crate::analyze::{compare, outcomes, AnalyzeResult, Analyzer};
use crate::bundle::store::BundleReader;
use crate::collect::evaluate_exclude;
use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::types::TextAnalyze;

/// Regex verdicts over bundle files selected by glob.
pub struct TextAnalyzer {
    spec: TextAnalyze,
}

impl TextAnalyzer {
    /// Build from spec.
    pub fn new(spec: TextAnalyze) -> Self {
        Self { spec }
    }

    fn glob(&self) -> String {
        match &self.spec.collector_name {
            Some(collector) => format!("{collector}/{}", self.spec.file_name),
            None => self.spec.file_name.clone(),
        }
    }
}

impl Analyzer for TextAnalyzer {
    fn title(&self) -> String {
        self.spec
            .check_name
            .clone()
            .unwrap_or_else(|| format!("Text Analyze: {}", self.glob()))
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn is_strict(&self) -> Result<bool> {
        evaluate_exclude(self.spec.strict.as_ref())
    }

    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult> {
        let glob = self.glob();
        let files = bundle.glob(&glob)?;
        if files.is_empty() {
            return Ok(AnalyzeResult::warned(
                self.title(),
                format!("no bundle files match {glob}"),
            ));
        }

        let pattern = self
            .spec
            .regex_pattern
            .as_deref()
            .or(self.spec.regex_groups.as_deref())
            .ok_or_else(|| {
                PeriscopeError::spec("", "pattern-required", "textAnalyze needs a pattern")
            })?;
        let regex = Regex::new(pattern)?;

        let mut matched = false;
        let mut vars: BTreeMap<String, String> = BTreeMap::new();
        for file in &files {
            let content = bundle.read(file)?;
            let text = String::from_utf8_lossy(&content);
            if let Some(caps) = regex.captures(&text) {
                matched = true;
                for name in regex.capture_names().flatten() {
                    if let Some(value) = caps.name(name) {
                        vars.insert(name.to_string(), value.as_str().to_string());
                    }
                }
                break;
            }
        }

        let (severity, spec) = outcomes::evaluate_outcomes(&self.spec.outcomes, &vars, |when| {
            match when.trim() {
                "true" => Ok(matched),
                "false" => Ok(!matched),
                expr => {
                    // Named-group numeric comparison: "Total > 5".
                    let (name, comparison) = expr.split_once(' ').ok_or_else(|| {
                        PeriscopeError::spec(
                            "",
                            "invalid-when",
                            format!("cannot evaluate {expr:?}"),
                        )
                    })?;
                    let value: f64 = vars
                        .get(name)
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| {
                            PeriscopeError::spec(
                                "",
                                "invalid-when",
                                format!("no numeric capture named {name:?}"),
                            )
                        })?;
                    compare::compare_numbers(value, comparison)
                }
            }
        })?;
        Ok(AnalyzeResult::from_outcome(self.title(), severity, spec))
    }
}
