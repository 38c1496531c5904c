//! Aggregate node capacity analyzer.
//!
//! `when` expressions take the form `fn(property) op quantity`:
//! `count() < 3`, `min(memoryCapacity) < 8Gi`, `sum(cpuCapacity) >= 4`.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::analyze::{compare, outcomes, read_json_opt, AnalyzeResult, Analyzer};
use crate::bundle::store::BundleReader;
use crate::collect::evaluate_exclude;
use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::types::NodeResourcesAnalyze;

const NODES_FILE: &str = "cluster-resources/nodes.json";

static WHEN_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(count|sum|min|max)\(\s*(\w*)\s*\)\s*(.+)$").expect("static"));

/// One node's parsed capacity figures.
#[derive(Debug, Default)]
struct NodeFigures {
    values: BTreeMap<&'static str, f64>,
}

const PROPERTIES: &[(&str, &str, &str)] = &[
    // (expression property, status section, capacity key)
    ("cpuCapacity", "capacity", "cpu"),
    ("cpuAllocatable", "allocatable", "cpu"),
    ("memoryCapacity", "capacity", "memory"),
    ("memoryAllocatable", "allocatable", "memory"),
    ("podCapacity", "capacity", "pods"),
    ("podAllocatable", "allocatable", "pods"),
    ("ephemeralStorageCapacity", "capacity", "ephemeral-storage"),
    ("ephemeralStorageAllocatable", "allocatable", "ephemeral-storage"),
];

fn parse_node(node: &serde_json::Value) -> NodeFigures {
    let mut figures = NodeFigures::default();
    for &(property, section, key) in PROPERTIES {
        let raw = node
            .pointer(&format!("/status/{section}/{key}"))
            .and_then(serde_json::Value::as_str);
        if let Some(raw) = raw {
            if let Ok(value) = compare::parse_quantity(raw) {
                figures.values.insert(property, value);
            }
        }
    }
    figures
}

/// Aggregate checks over every node in the bundle.
pub struct NodeResourcesAnalyzer {
    spec: NodeResourcesAnalyze,
}

impl NodeResourcesAnalyzer {
    /// Build from spec.
    pub fn new(spec: NodeResourcesAnalyze) -> Self {
        Self { spec }
    }

    fn evaluate_when(nodes: &[NodeFigures], when: &str) -> Result<bool> {
        let caps = WHEN_SHAPE.captures(when).ok_or_else(|| {
            PeriscopeError::spec(
                "",
                "invalid-when",
                format!("expected fn(property) op value, got {when:?}"),
            )
        })?;
        let function = &caps[1];
        let property = caps[2].to_string();
        let comparison = caps[3].trim();

        let actual = match function {
            "count" => nodes.len() as f64,
            aggregate => {
                if !PROPERTIES.iter().any(|&(p, _, _)| p == property) {
                    return Err(PeriscopeError::spec(
                        "",
                        "invalid-when",
                        format!("unknown node property {property:?}"),
                    ));
                }
                let samples: Vec<f64> = nodes
                    .iter()
                    .filter_map(|n| n.values.get(property.as_str()).copied())
                    .collect();
                if samples.is_empty() {
                    return Err(PeriscopeError::spec(
                        "",
                        "invalid-when",
                        format!("no node reports property {property:?}"),
                    ));
                }
                match aggregate {
                    "sum" => samples.iter().sum(),
                    "min" => samples.iter().copied().fold(f64::INFINITY, f64::min),
                    "max" => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    _ => unreachable!("constrained by the regex"),
                }
            }
        };

        compare::compare_quantities(actual, comparison)
    }
}

impl Analyzer for NodeResourcesAnalyzer {
    fn title(&self) -> String {
        self.spec
            .check_name
            .clone()
            .unwrap_or_else(|| "Node Resources".to_string())
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn is_strict(&self) -> Result<bool> {
        evaluate_exclude(self.spec.strict.as_ref())
    }

    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult> {
        let Some(doc) = read_json_opt(bundle, NODES_FILE)? else {
            return Ok(AnalyzeResult::warned(
                self.title(),
                format!("{NODES_FILE} was not collected"),
            ));
        };
        let nodes: Vec<NodeFigures> = doc
            .as_array()
            .map(|items| items.iter().map(parse_node).collect())
            .unwrap_or_default();

        let mut vars = BTreeMap::new();
        vars.insert("NodeCount".to_string(), nodes.len().to_string());

        let (severity, spec) =
            outcomes::evaluate_outcomes(&self.spec.outcomes, &vars, |when| {
                Self::evaluate_when(&nodes, when)
            })?;
        Ok(AnalyzeResult::from_outcome(self.title(), severity, spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::types::{Outcome, OutcomeSpec};

    struct OneFile(Vec<u8>);
    impl BundleReader for OneFile {
        fn read(&self, path: &str) -> Result<Vec<u8>> {
            if path == NODES_FILE {
                Ok(self.0.clone())
            } else {
                Err(PeriscopeError::internal("missing"))
            }
        }
        fn glob(&self, _pattern: &str) -> Result<Vec<String>> {
            Ok(vec![NODES_FILE.to_string()])
        }
        fn exists(&self, path: &str) -> bool {
            path == NODES_FILE
        }
    }

    fn nodes_bundle() -> OneFile {
        OneFile(
            serde_json::to_vec(&serde_json::json!([
                {"status": {"capacity": {"cpu": "4", "memory": "16Gi", "pods": "110"},
                             "allocatable": {"cpu": "3800m", "memory": "15Gi", "pods": "110"}}},
                {"status": {"capacity": {"cpu": "8", "memory": "32Gi", "pods": "110"},
                             "allocatable": {"cpu": "7800m", "memory": "31Gi", "pods": "110"}}},
            ]))
            .unwrap(),
        )
    }

    fn analyzer(when: &str) -> NodeResourcesAnalyzer {
        NodeResourcesAnalyzer::new(NodeResourcesAnalyze {
            outcomes: vec![
                Outcome::Fail(OutcomeSpec {
                    when: Some(when.into()),
                    message: "insufficient".into(),
                    uri: None,
                }),
                Outcome::Pass(OutcomeSpec {
                    when: None,
                    message: "{{ .NodeCount }} nodes are enough".into(),
                    uri: None,
                }),
            ],
            ..NodeResourcesAnalyze::default()
        })
    }

    #[test]
    fn count_comparisons() {
        let result = analyzer("count() < 3").analyze(&nodes_bundle()).unwrap();
        assert!(result.is_fail);

        let result = analyzer("count() < 2").analyze(&nodes_bundle()).unwrap();
        assert!(result.is_pass);
        assert_eq!(result.message, "2 nodes are enough");
    }

    #[test]
    fn min_and_sum_aggregates_use_quantities() {
        let result = analyzer("min(memoryCapacity) < 8Gi")
            .analyze(&nodes_bundle())
            .unwrap();
        assert!(result.is_pass, "16Gi min is not under 8Gi");

        let result = analyzer("sum(cpuCapacity) < 16")
            .analyze(&nodes_bundle())
            .unwrap();
        assert!(result.is_fail, "12 total cpus is under 16");
    }

    #[test]
    fn unknown_property_is_a_spec_error() {
        let err = NodeResourcesAnalyzer::evaluate_when(&[], "min(flux) > 1").unwrap_err();
        assert!(matches!(err, PeriscopeError::Spec { .. }));
    }
}
