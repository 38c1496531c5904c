//! Collector registry and runtime.
//!
//! Each spec variant maps to one implementation struct through the table in
//! [`build_collectors`]; there is no inheritance hierarchy. The scheduler in
//! [`scheduler`] drives collectors concurrently; [`podlogs`] owns the single
//! writer for consolidated container logs.

pub mod ceph;
pub mod cluster_info;
pub mod cluster_resources;
pub mod configmap;
pub mod copy_from_host;
pub mod data;
pub mod database;
pub mod exec;
pub mod host;
pub mod http;
pub mod logs;
pub mod longhorn;
pub mod podlogs;
pub mod registry_images;
pub mod run_pod;
pub mod scheduler;
pub mod secret;

#[cfg(test)]
pub(crate) mod testutil;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::bundle::store::BundleStore;
use crate::cluster::LogStream;
use crate::core::context::{RunContext, RunOptions};
use crate::core::errors::{PeriscopeError, RbacDenial, Result};
use crate::core::spec::types::Collect;
use crate::redact::{RedactionReport, Redactors};
use podlogs::PodLogSink;

/// One collected payload: in-memory bytes or a byte stream.
pub enum Payload {
    /// Fully materialized content
    Bytes(Vec<u8>),
    /// Streamed content (large files, logs)
    Reader(LogStream),
}

impl Payload {
    /// JSON-serialize a value into a payload.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Bytes(serde_json::to_vec_pretty(value)?))
    }

    /// Text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Bytes(text.into().into_bytes())
    }
}

/// Mapping from bundle-relative path to payload, in insertion order.
pub type CollectorResult = IndexMap<String, Payload>;

/// Per-task environment handed to a running collector.
pub struct CollectEnv {
    /// The run-scoped context
    pub ctx: Arc<RunContext>,
    /// Channel into the pod-log consolidator
    pub pod_logs: PodLogSink,
}

/// A runnable collector.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Human-readable title for progress and error reporting.
    fn title(&self) -> String;

    /// Directory-safe name used for `<collector>/errors.json`.
    fn slug(&self) -> String {
        self.title()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect::<String>()
            .to_ascii_lowercase()
    }

    /// Evaluate the spec's exclude predicate.
    fn is_excluded(&self) -> Result<bool> {
        Ok(false)
    }

    /// Whether the scheduler must run this collector to completion before
    /// dispatching the rest (cluster-resources: its output is referenced by
    /// other collectors and by analyzers).
    fn runs_first(&self) -> bool {
        false
    }

    /// Per-collector deadline; may shorten the run deadline, never extend.
    fn requested_timeout(&self) -> Option<Duration> {
        None
    }

    /// Record the verbs/resources this collector needs and return denials.
    async fn check_rbac(&self, ctx: &RunContext) -> Result<Vec<RbacDenial>>;

    /// Capture the data. Pod logs go through `env.pod_logs`, never into the
    /// returned map.
    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult>;
}

/// Evaluate the required (verb, group, resource, namespace) tuples against
/// the cluster's self-subject access review, returning the denied ones.
pub(crate) async fn check_access(
    ctx: &RunContext,
    checks: &[(&str, &str, &str, Option<&str>)],
) -> Result<Vec<RbacDenial>> {
    let mut denied = Vec::new();
    for (verb, group, resource, namespace) in checks {
        ctx.checkpoint()?;
        if !ctx.cluster.can_i(verb, group, resource, *namespace).await? {
            denied.push(RbacDenial {
                verb: verb.to_string(),
                resource: resource.to_string(),
                namespace: namespace.map(str::to_string),
            });
        }
    }
    Ok(denied)
}

/// Redact a payload and write it into the store at `path`.
pub(crate) async fn write_redacted(
    store: &Arc<BundleStore>,
    redactors: &Arc<Redactors>,
    report: &Arc<parking_lot::Mutex<RedactionReport>>,
    path: &str,
    payload: Payload,
) -> Result<()> {
    match payload {
        Payload::Bytes(bytes) => {
            let redacted = redactors.redact_bytes(path, &bytes, report).await?;
            store.write(path, std::io::Cursor::new(redacted)).await
        }
        Payload::Reader(reader) => {
            let (read_half, mut write_half) = tokio::io::duplex(64 * 1024);
            let redactors = Arc::clone(redactors);
            let report = Arc::clone(report);
            let task_path = path.to_string();
            let redact_task = tokio::spawn(async move {
                let result = redactors
                    .redact_stream(
                        &task_path,
                        tokio::io::BufReader::new(reader),
                        &mut write_half,
                        &report,
                    )
                    .await;
                drop(write_half);
                result
            });
            let write_result = store.write(path, read_half).await;
            let redact_result = redact_task
                .await
                .map_err(|e| PeriscopeError::internal(format!("redaction task failed: {e}")))?;
            redact_result?;
            write_result
        }
    }
}

/// Merge and dedupe collector specs. Idempotent: `merge(merge(xs)) ==
/// merge(xs)`.
///
/// - exact duplicates collapse to the first occurrence
/// - `clusterInfo` and `clusterResources` are force-inserted when absent
/// - `clusterResources` entries with identical namespace sets merge
/// - `clusterResources` sorts to the front (it runs first)
pub fn merge_collect_specs(specs: &[Collect]) -> Vec<Collect> {
    use crate::core::spec::types::{ClusterInfoCollect, ClusterResourcesCollect};

    let mut seen = std::collections::HashSet::new();
    let mut merged: Vec<Collect> = Vec::new();
    let mut resource_sets: Vec<BTreeSet<String>> = Vec::new();

    for spec in specs {
        let canon = serde_json::to_string(spec).unwrap_or_default();
        if !seen.insert(canon) {
            continue;
        }
        if let Collect::ClusterResources(cr) = spec {
            let set: BTreeSet<String> = cr.namespaces.iter().cloned().collect();
            if resource_sets.contains(&set) {
                continue; // identical namespace coverage already merged
            }
            resource_sets.push(set);
        }
        merged.push(spec.clone());
    }

    if !merged
        .iter()
        .any(|c| matches!(c, Collect::ClusterResources(_)))
    {
        merged.push(Collect::ClusterResources(ClusterResourcesCollect::default()));
    }
    if !merged.iter().any(|c| matches!(c, Collect::ClusterInfo(_))) {
        merged.push(Collect::ClusterInfo(ClusterInfoCollect::default()));
    }

    // Stable priority sort: cluster-resources, cluster-info, then spec order.
    merged.sort_by_key(|c| match c {
        Collect::ClusterResources(_) => 0u8,
        Collect::ClusterInfo(_) => 1,
        _ => 2,
    });
    merged
}

/// Tag-to-implementation dispatch table.
pub fn build_collectors(specs: &[Collect], options: &RunOptions) -> Vec<Box<dyn Collector>> {
    specs
        .iter()
        .map(|spec| -> Box<dyn Collector> {
            match spec.clone() {
                Collect::ClusterInfo(spec) => Box::new(cluster_info::ClusterInfoCollector::new(spec)),
                Collect::ClusterResources(spec) => {
                    Box::new(cluster_resources::ClusterResourcesCollector::new(spec))
                }
                Collect::Logs(spec) => Box::new(logs::LogsCollector::new(spec)),
                Collect::RunPod(spec) => {
                    Box::new(run_pod::RunPodCollector::new(spec, options.clone()))
                }
                Collect::Exec(spec) => Box::new(exec::ExecCollector::new(spec)),
                Collect::CopyFromHost(spec) => {
                    Box::new(copy_from_host::CopyFromHostCollector::new(spec, options.clone()))
                }
                Collect::Http(spec) => Box::new(http::HttpCollector::new(spec)),
                Collect::Secret(spec) => Box::new(secret::SecretCollector::new(spec)),
                Collect::ConfigMap(spec) => Box::new(configmap::ConfigMapCollector::new(spec)),
                Collect::DatabasePing(spec) => Box::new(database::DatabasePingCollector::new(spec)),
                Collect::Ceph(spec) => Box::new(ceph::CephCollector::new(spec)),
                Collect::Longhorn(spec) => Box::new(longhorn::LonghornCollector::new(spec)),
                Collect::RegistryImages(spec) => {
                    Box::new(registry_images::RegistryImagesCollector::new(spec))
                }
                Collect::Data(spec) => Box::new(data::DataCollector::new(spec)),
            }
        })
        .collect()
}

/// Evaluate an optional exclude predicate.
pub(crate) fn evaluate_exclude(
    exclude: Option<&crate::core::spec::types::BoolString>,
) -> Result<bool> {
    exclude.map(|e| e.evaluate()).transpose().map(|o| o.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::types::{ClusterResourcesCollect, DataCollect, LogsCollect};

    fn logs(ns: &str) -> Collect {
        Collect::Logs(LogsCollect {
            namespace: Some(ns.to_string()),
            selector: vec!["app=web".to_string()],
            ..LogsCollect::default()
        })
    }

    #[test]
    fn merge_inserts_forced_collectors() {
        let merged = merge_collect_specs(&[logs("demo")]);
        assert!(matches!(merged[0], Collect::ClusterResources(_)));
        assert!(merged.iter().any(|c| matches!(c, Collect::ClusterInfo(_))));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn merge_collapses_exact_duplicates() {
        let merged = merge_collect_specs(&[logs("demo"), logs("demo"), logs("other")]);
        let log_count = merged
            .iter()
            .filter(|c| matches!(c, Collect::Logs(_)))
            .count();
        assert_eq!(log_count, 2);
    }

    #[test]
    fn cluster_resources_with_identical_namespace_sets_merge() {
        let a = Collect::ClusterResources(ClusterResourcesCollect {
            namespaces: vec!["a".into(), "b".into()],
            ..ClusterResourcesCollect::default()
        });
        let b = Collect::ClusterResources(ClusterResourcesCollect {
            namespaces: vec!["b".into(), "a".into()],
            ..ClusterResourcesCollect::default()
        });
        let disjoint = Collect::ClusterResources(ClusterResourcesCollect {
            namespaces: vec!["c".into()],
            ..ClusterResourcesCollect::default()
        });

        let merged = merge_collect_specs(&[a, b, disjoint]);
        let resource_count = merged
            .iter()
            .filter(|c| matches!(c, Collect::ClusterResources(_)))
            .count();
        assert_eq!(resource_count, 2);
    }

    #[test]
    fn merge_is_idempotent() {
        let specs = vec![
            logs("demo"),
            logs("demo"),
            Collect::Data(DataCollect {
                name: "notes.txt".into(),
                data: "hello".into(),
                ..DataCollect::default()
            }),
        ];
        let once = merge_collect_specs(&specs);
        let twice = merge_collect_specs(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn dispatch_table_covers_every_variant() {
        let specs = vec![
            Collect::ClusterInfo(Default::default()),
            Collect::Data(DataCollect {
                name: "n".into(),
                data: "d".into(),
                ..DataCollect::default()
            }),
        ];
        let built = build_collectors(&specs, &RunOptions::default());
        assert_eq!(built.len(), 2);
        assert_eq!(built[0].title(), "cluster-info");
    }
}
