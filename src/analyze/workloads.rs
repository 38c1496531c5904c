//! Workload readiness analyzers: deployment and statefulset status.
//!
//! The `when` expression is a bare numeric comparison against ready
//! replicas (`"< 1"`, `">= 2"`).

use std::collections::BTreeMap;

use crate::analyze::{compare, outcomes, read_json_opt, AnalyzeResult, Analyzer};
use crate::bundle::store::BundleReader;
use crate::collect::evaluate_exclude;
use crate::core::errors::Result;
use crate::core::spec::types::{DeploymentStatusAnalyze, Outcome, StatefulsetStatusAnalyze};

/// Shared evaluation once the workload document is located.
fn analyze_ready_replicas(
    title: String,
    bundle: &dyn BundleReader,
    plural: &str,
    namespace: &str,
    name: &str,
    outcome_list: &[Outcome],
) -> Result<AnalyzeResult> {
    let path = format!("cluster-resources/{plural}/{namespace}.json");
    let Some(doc) = read_json_opt(bundle, &path)? else {
        return Ok(AnalyzeResult::warned(
            title,
            format!("{path} was not collected"),
        ));
    };

    let workload = doc.as_array().and_then(|items| {
        items
            .iter()
            .find(|item| {
                item.pointer("/metadata/name").and_then(serde_json::Value::as_str) == Some(name)
            })
            .cloned()
    });
    let Some(workload) = workload else {
        return Ok(AnalyzeResult::warned(
            title,
            format!("{plural}/{namespace}/{name} was not found in the bundle"),
        ));
    };

    let ready = workload
        .pointer("/status/readyReplicas")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0);
    let desired = workload
        .pointer("/spec/replicas")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0);

    let mut vars = BTreeMap::new();
    vars.insert("Name".to_string(), name.to_string());
    vars.insert("Namespace".to_string(), namespace.to_string());
    vars.insert("ReadyReplicas".to_string(), ready.to_string());
    vars.insert("DesiredReplicas".to_string(), desired.to_string());

    let (severity, spec) = outcomes::evaluate_outcomes(outcome_list, &vars, |when| {
        compare::compare_numbers(ready as f64, when)
    })?;
    Ok(AnalyzeResult::from_outcome(title, severity, spec))
}

/// Ready-replica verdict for one deployment.
pub struct DeploymentStatusAnalyzer {
    spec: DeploymentStatusAnalyze,
}

impl DeploymentStatusAnalyzer {
    /// Build from spec.
    pub fn new(spec: DeploymentStatusAnalyze) -> Self {
        Self { spec }
    }
}

impl Analyzer for DeploymentStatusAnalyzer {
    fn title(&self) -> String {
        self.spec.check_name.clone().unwrap_or_else(|| {
            format!(
                "Deployment Status: {}/{}",
                self.spec.namespace, self.spec.name
            )
        })
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn is_strict(&self) -> Result<bool> {
        evaluate_exclude(self.spec.strict.as_ref())
    }

    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult> {
        analyze_ready_replicas(
            self.title(),
            bundle,
            "deployments",
            &self.spec.namespace,
            &self.spec.name,
            &self.spec.outcomes,
        )
    }
}

/// Ready-replica verdict for one statefulset.
pub struct StatefulsetStatusAnalyzer {
    spec: StatefulsetStatusAnalyze,
}

impl StatefulsetStatusAnalyzer {
    /// Build from spec.
    pub fn new(spec: StatefulsetStatusAnalyze) -> Self {
        Self { spec }
    }
}

impl Analyzer for StatefulsetStatusAnalyzer {
    fn title(&self) -> String {
        self.spec.check_name.clone().unwrap_or_else(|| {
            format!(
                "StatefulSet Status: {}/{}",
                self.spec.namespace, self.spec.name
            )
        })
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn is_strict(&self) -> Result<bool> {
        evaluate_exclude(self.spec.strict.as_ref())
    }

    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult> {
        analyze_ready_replicas(
            self.title(),
            bundle,
            "statefulsets",
            &self.spec.namespace,
            &self.spec.name,
            &self.spec.outcomes,
        )
    }
}
