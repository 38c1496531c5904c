//! Analyzer engine.
//!
//! Analyzers resolve spec variants to readers over a finalized bundle
//! (live store or extracted archive), evaluate their ordered outcomes, and
//! produce verdicts. Engine errors from one analyzer never stop the others:
//! a catastrophic read or parse failure becomes a warn result describing
//! the error.

pub mod cluster_version;
pub mod compare;
pub mod database;
pub mod host;
pub mod node_resources;
pub mod outcomes;
pub mod resources;
pub mod text;
pub mod workloads;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bundle::store::BundleReader;
use crate::core::context::{ProgressPhase, ProgressSender};
use crate::core::errors::Result;
use crate::core::spec::types::{Analyze, HostAnalyze, OutcomeSpec};
use outcomes::Severity;

/// One analyzer verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    /// Analyzer title
    pub title: String,
    /// Requirement met
    pub is_pass: bool,
    /// Degraded but not blocking
    pub is_warn: bool,
    /// Requirement not met
    pub is_fail: bool,
    /// Rendered outcome message
    pub message: String,
    /// Optional documentation link
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// UI icon key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_key: Option<String>,
    /// UI icon URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_uri: Option<String>,
    /// Strict analyzers promote warn to fail for the exit code
    #[serde(default)]
    pub strict: bool,
}

impl AnalyzeResult {
    /// Build from a winning outcome.
    pub fn from_outcome(title: impl Into<String>, severity: Severity, spec: OutcomeSpec) -> Self {
        Self {
            title: title.into(),
            is_pass: severity == Severity::Pass,
            is_warn: severity == Severity::Warn,
            is_fail: severity == Severity::Fail,
            message: spec.message,
            uri: spec.uri,
            icon_key: None,
            icon_uri: None,
            strict: false,
        }
    }

    /// A warn verdict, used for missing files and read errors.
    pub fn warned(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            is_warn: true,
            message: message.into(),
            ..Self::default()
        }
    }

    /// Whether this result fails the run, honoring strictness.
    pub fn fails_run(&self) -> bool {
        self.is_fail || (self.strict && self.is_warn)
    }
}

/// A runnable analyzer over bundle contents.
pub trait Analyzer: Send + Sync {
    /// Display title.
    fn title(&self) -> String;

    /// Evaluate the spec's exclude predicate.
    fn is_excluded(&self) -> Result<bool> {
        Ok(false)
    }

    /// Whether warn promotes to fail for the exit code.
    fn is_strict(&self) -> Result<bool> {
        Ok(false)
    }

    /// Read the bundle and produce a verdict.
    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult>;
}

/// Tag-to-implementation dispatch for cluster analyzers.
pub fn build_analyzers(specs: &[Analyze]) -> Vec<Box<dyn Analyzer>> {
    specs
        .iter()
        .map(|spec| -> Box<dyn Analyzer> {
            match spec.clone() {
                Analyze::ClusterVersion(spec) => {
                    Box::new(cluster_version::ClusterVersionAnalyzer::new(spec))
                }
                Analyze::DeploymentStatus(spec) => {
                    Box::new(workloads::DeploymentStatusAnalyzer::new(spec))
                }
                Analyze::StatefulsetStatus(spec) => {
                    Box::new(workloads::StatefulsetStatusAnalyzer::new(spec))
                }
                Analyze::NodeResources(spec) => {
                    Box::new(node_resources::NodeResourcesAnalyzer::new(spec))
                }
                Analyze::TextAnalyze(spec) => Box::new(text::TextAnalyzer::new(spec)),
                Analyze::Secret(spec) => Box::new(resources::SecretAnalyzer::new(spec)),
                Analyze::ConfigMap(spec) => Box::new(resources::ConfigMapAnalyzer::new(spec)),
                Analyze::DatabasePing(spec) => {
                    Box::new(database::DatabasePingAnalyzer::new(spec))
                }
            }
        })
        .collect()
}

/// Tag-to-implementation dispatch for host analyzers.
pub fn build_host_analyzers(specs: &[HostAnalyze]) -> Vec<Box<dyn Analyzer>> {
    specs
        .iter()
        .map(|spec| -> Box<dyn Analyzer> {
            match spec.clone() {
                HostAnalyze::FilesystemUsage(spec) => {
                    Box::new(host::FilesystemUsageAnalyzer::new(spec))
                }
                HostAnalyze::Time(spec) => Box::new(host::TimeAnalyzer::new(spec)),
                HostAnalyze::TcpPort(spec) => Box::new(host::PortAnalyzer::tcp(spec)),
                HostAnalyze::UdpPort(spec) => Box::new(host::PortAnalyzer::udp(spec)),
            }
        })
        .collect()
}

/// Evaluate every analyzer against the bundle. Failures are isolated: each
/// analyzer records a result even when it errors.
pub fn analyze_bundle(
    bundle: &dyn BundleReader,
    analyzers: &[Analyze],
    host_analyzers: &[HostAnalyze],
    progress: &ProgressSender,
) -> Result<Vec<AnalyzeResult>> {
    let mut all: Vec<Box<dyn Analyzer>> = build_analyzers(analyzers);
    all.extend(build_host_analyzers(host_analyzers));

    let mut results = Vec::with_capacity(all.len());
    for analyzer in all {
        let title = analyzer.title();
        if analyzer.is_excluded()? {
            debug!(analyzer = %title, "excluded by spec predicate");
            continue;
        }
        progress.emit(ProgressPhase::Analyze, title.clone(), None);

        let mut result = match analyzer.analyze(bundle) {
            Ok(result) => result,
            Err(e) => {
                warn!(analyzer = %title, error = %e, "analyzer failed");
                AnalyzeResult::warned(title, format!("analyzer failed: {e}"))
            }
        };
        result.strict = analyzer.is_strict()?;
        results.push(result);
    }
    Ok(results)
}

/// Read one JSON document from the bundle; `Ok(None)` when the file is
/// absent (the analyzer degrades to warn, not error).
pub(crate) fn read_json_opt(
    bundle: &dyn BundleReader,
    path: &str,
) -> Result<Option<serde_json::Value>> {
    if !bundle.exists(path) {
        return Ok(None);
    }
    let bytes = bundle.read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}
