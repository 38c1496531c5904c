//! Database ping analyzer: verdicts over databasePing collector results.
//!
//! `when` forms: `connected == true|false` (or bare `true`/`false`), and
//! `version >= 14` against the server-reported version.

use std::collections::BTreeMap;

use crate::analyze::{compare, outcomes, read_json_opt, AnalyzeResult, Analyzer};
use crate::bundle::store::BundleReader;
use crate::collect::evaluate_exclude;
use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::types::DatabasePingAnalyze;

/// Extract the leading numeric version from a server version banner, e.g.
/// "PostgreSQL 14.11 on x86_64" -> "14.11".
fn extract_version(banner: &str) -> Option<String> {
    banner
        .split_whitespace()
        .find(|token| {
            token
                .chars()
                .next()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
        })
        .map(|token| {
            token
                .trim_end_matches(|c: char| !c.is_ascii_digit())
                .to_string()
        })
}

/// Verdicts over one databasePing result document.
pub struct DatabasePingAnalyzer {
    spec: DatabasePingAnalyze,
}

impl DatabasePingAnalyzer {
    /// Build from spec.
    pub fn new(spec: DatabasePingAnalyze) -> Self {
        Self { spec }
    }
}

impl Analyzer for DatabasePingAnalyzer {
    fn title(&self) -> String {
        self.spec
            .check_name
            .clone()
            .unwrap_or_else(|| format!("Database Ping: {}", self.spec.collector_name))
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn is_strict(&self) -> Result<bool> {
        evaluate_exclude(self.spec.strict.as_ref())
    }

    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult> {
        let path = format!("{}.json", self.spec.collector_name);
        let Some(doc) = read_json_opt(bundle, &path)? else {
            return Ok(AnalyzeResult::warned(
                self.title(),
                format!("{path} was not collected"),
            ));
        };

        let connected = doc
            .get("isConnected")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let banner = doc
            .get("version")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let error = doc
            .get("error")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let version = extract_version(&banner).unwrap_or_else(|| banner.clone());

        let mut vars = BTreeMap::new();
        vars.insert("IsConnected".to_string(), connected.to_string());
        vars.insert("Version".to_string(), version.clone());
        vars.insert("Error".to_string(), error);

        let (severity, spec) =
            outcomes::evaluate_outcomes(&self.spec.outcomes, &vars, |when| {
                let when = when.trim();
                if let Some(rest) = when.strip_prefix("connected") {
                    return compare::compare_strings(&connected.to_string(), rest.trim());
                }
                if let Some(rest) = when.strip_prefix("version") {
                    return compare::compare_versions(&version, rest.trim());
                }
                match when {
                    "true" => Ok(connected),
                    "false" => Ok(!connected),
                    other => Err(PeriscopeError::spec(
                        "",
                        "invalid-when",
                        format!("cannot evaluate {other:?}"),
                    )),
                }
            })?;
        Ok(AnalyzeResult::from_outcome(self.title(), severity, spec))
    }
}
