//! Bulk dump of API resources by kind and namespace.
//!
//! Writes `cluster-resources/<plural>/<namespace>.json` for namespaced
//! kinds and `cluster-resources/<plural>.json` for cluster-scoped kinds.
//! Secrets are intentionally absent from the table; the dedicated secret
//! collector records existence without values.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::cluster::ResourceRef;
use crate::collect::{
    check_access, evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload,
};
use crate::core::context::RunContext;
use crate::core::errors::{RbacDenial, Result};
use crate::core::spec::types::ClusterResourcesCollect;

/// Resource kinds captured by the collector, in output order.
static KINDS: Lazy<Vec<ResourceRef>> = Lazy::new(|| {
    vec![
        ResourceRef::core("Namespace", "namespaces", false),
        ResourceRef::core("Node", "nodes", false),
        ResourceRef::core("Pod", "pods", true),
        ResourceRef::core("Service", "services", true),
        ResourceRef::core("Event", "events", true),
        ResourceRef::core("LimitRange", "limitranges", true),
        ResourceRef::core("ResourceQuota", "resourcequotas", true),
        ResourceRef::core("PersistentVolume", "persistentvolumes", false),
        ResourceRef::core("PersistentVolumeClaim", "persistentvolumeclaims", true),
        ResourceRef::core("ServiceAccount", "serviceaccounts", true),
        ResourceRef::core("ConfigMap", "configmaps", true),
        ResourceRef::grouped("apps", "v1", "Deployment", "deployments", true),
        ResourceRef::grouped("apps", "v1", "StatefulSet", "statefulsets", true),
        ResourceRef::grouped("apps", "v1", "DaemonSet", "daemonsets", true),
        ResourceRef::grouped("apps", "v1", "ReplicaSet", "replicasets", true),
        ResourceRef::grouped("batch", "v1", "Job", "jobs", true),
        ResourceRef::grouped("batch", "v1", "CronJob", "cronjobs", true),
        ResourceRef::grouped("networking.k8s.io", "v1", "Ingress", "ingresses", true),
        ResourceRef::grouped(
            "networking.k8s.io",
            "v1",
            "NetworkPolicy",
            "networkpolicies",
            true,
        ),
        ResourceRef::grouped("storage.k8s.io", "v1", "StorageClass", "storageclasses", false),
        ResourceRef::grouped(
            "apiextensions.k8s.io",
            "v1",
            "CustomResourceDefinition",
            "customresourcedefinitions",
            false,
        ),
    ]
});

/// The cluster-resources collector.
pub struct ClusterResourcesCollector {
    spec: ClusterResourcesCollect,
}

impl ClusterResourcesCollector {
    /// Build from spec.
    pub fn new(spec: ClusterResourcesCollect) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Collector for ClusterResourcesCollector {
    fn title(&self) -> String {
        self.spec
            .collector_name
            .clone()
            .unwrap_or_else(|| "cluster-resources".to_string())
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn runs_first(&self) -> bool {
        true
    }

    async fn check_rbac(&self, ctx: &RunContext) -> Result<Vec<RbacDenial>> {
        if self.spec.ignore_rbac {
            return Ok(Vec::new());
        }
        let ns = self.spec.namespaces.first().map(String::as_str);
        check_access(
            ctx,
            &[
                ("list", "", "namespaces", None),
                ("list", "", "nodes", None),
                ("list", "", "pods", ns),
                ("list", "", "services", ns),
                ("list", "", "events", ns),
                ("list", "apps", "deployments", ns),
                ("list", "apps", "statefulsets", ns),
            ],
        )
        .await
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        let ctx = &env.ctx;
        let mut result = CollectorResult::new();

        let namespaces: Vec<String> = if self.spec.namespaces.is_empty() {
            ctx.cluster.list_namespaces().await?
        } else {
            self.spec.namespaces.clone()
        };

        for kind in KINDS.iter() {
            ctx.checkpoint()?;
            if kind.namespaced {
                for ns in &namespaces {
                    match ctx.cluster.list_objects(kind, Some(ns), None).await {
                        Ok(items) => {
                            result.insert(
                                format!("cluster-resources/{}/{}.json", kind.plural, ns),
                                Payload::json(&items)?,
                            );
                        }
                        Err(e) => {
                            debug!(kind = %kind.plural, namespace = %ns, error = %e, "list failed");
                            result.insert(
                                format!(
                                    "cluster-resources/{}/{}-errors.json",
                                    kind.plural, ns
                                ),
                                Payload::json(&serde_json::json!([e.to_string()]))?,
                            );
                        }
                    }
                }
            } else {
                match ctx.cluster.list_objects(kind, None, None).await {
                    Ok(items) => {
                        result.insert(
                            format!("cluster-resources/{}.json", kind.plural),
                            Payload::json(&items)?,
                        );
                    }
                    Err(e) => {
                        debug!(kind = %kind.plural, error = %e, "list failed");
                        result.insert(
                            format!("cluster-resources/{}-errors.json", kind.plural),
                            Payload::json(&serde_json::json!([e.to_string()]))?,
                        );
                    }
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::collect::testutil::collect_env;

    #[tokio::test]
    async fn namespaced_kinds_emit_one_file_per_namespace() {
        let cluster = FakeCluster::new()
            .with_pod("a", "web-1", &[("app", "web")], &["nginx"])
            .with_pod("b", "web-2", &[("app", "web")], &["nginx"]);
        let harness = collect_env(cluster);

        let collector = ClusterResourcesCollector::new(ClusterResourcesCollect {
            namespaces: vec!["a".into(), "b".into()],
            ..ClusterResourcesCollect::default()
        });
        let result = collector.collect(&harness.env).await.unwrap();

        assert!(result.contains_key("cluster-resources/pods/a.json"));
        assert!(result.contains_key("cluster-resources/pods/b.json"));
        assert!(result.contains_key("cluster-resources/nodes.json"));

        let Payload::Bytes(bytes) = result.get("cluster-resources/pods/a.json").unwrap() else {
            panic!("expected bytes");
        };
        let pods: Vec<serde_json::Value> = serde_json::from_slice(bytes).unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].pointer("/metadata/name").unwrap(), "web-1");
    }

    #[tokio::test]
    async fn namespaces_default_to_all_reachable() {
        let cluster = FakeCluster::new().with_pod("demo", "web-1", &[], &["nginx"]);
        let harness = collect_env(cluster);

        let collector = ClusterResourcesCollector::new(ClusterResourcesCollect::default());
        let result = collector.collect(&harness.env).await.unwrap();
        assert!(result.contains_key("cluster-resources/pods/demo.json"));
    }

    #[tokio::test]
    async fn rbac_check_reports_denied_verbs() {
        let cluster = FakeCluster::new().deny("list", "nodes");
        let harness = collect_env(cluster);

        let collector = ClusterResourcesCollector::new(ClusterResourcesCollect::default());
        let denied = collector.check_rbac(&harness.env.ctx).await.unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].resource, "nodes");

        let ignoring = ClusterResourcesCollector::new(ClusterResourcesCollect {
            ignore_rbac: true,
            ..ClusterResourcesCollect::default()
        });
        assert!(ignoring.check_rbac(&harness.env.ctx).await.unwrap().is_empty());
    }
}
