//! Cluster server version analyzer.

use std::collections::BTreeMap;

use crate::analyze::{compare, outcomes, read_json_opt, AnalyzeResult, Analyzer};
use crate::bundle::store::BundleReader;
use crate::collect::evaluate_exclude;
use crate::core::errors::Result;
use crate::core::spec::types::ClusterVersionAnalyze;

const VERSION_FILE: &str = "cluster-info/cluster_version.json";

/// Compares the captured `gitVersion` against semver requirements.
pub struct ClusterVersionAnalyzer {
    spec: ClusterVersionAnalyze,
}

impl ClusterVersionAnalyzer {
    /// Build from spec.
    pub fn new(spec: ClusterVersionAnalyze) -> Self {
        Self { spec }
    }
}

impl Analyzer for ClusterVersionAnalyzer {
    fn title(&self) -> String {
        self.spec
            .check_name
            .clone()
            .unwrap_or_else(|| "Cluster Version".to_string())
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn is_strict(&self) -> Result<bool> {
        evaluate_exclude(self.spec.strict.as_ref())
    }

    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult> {
        let Some(doc) = read_json_opt(bundle, VERSION_FILE)? else {
            return Ok(AnalyzeResult::warned(
                self.title(),
                format!("{VERSION_FILE} was not collected"),
            ));
        };
        let version = doc
            .pointer("/info/gitVersion")
            .or_else(|| doc.get("string"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut vars = BTreeMap::new();
        vars.insert("ClusterVersion".to_string(), version.clone());

        let (severity, spec) =
            outcomes::evaluate_outcomes(&self.spec.outcomes, &vars, |when| {
                compare::compare_versions(&version, when)
            })?;
        Ok(AnalyzeResult::from_outcome(self.title(), severity, spec))
    }
}
