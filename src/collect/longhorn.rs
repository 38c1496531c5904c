//! Longhorn storage collector.
//!
//! Dumps the longhorn.io custom resources and routes longhorn-manager logs
//! through the consolidator.

use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::ResourceRef;
use crate::collect::podlogs::PodLogRequest;
use crate::collect::{
    check_access, evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload,
};
use crate::core::context::RunContext;
use crate::core::errors::{RbacDenial, Result};
use crate::core::spec::types::{parse_duration, LonghornCollect};

const DEFAULT_NAMESPACE: &str = "longhorn-system";
const GROUP: &str = "longhorn.io";
const VERSION: &str = "v1beta2";

/// (kind, plural) custom resources captured from the longhorn group.
const CRDS: &[(&str, &str)] = &[
    ("Volume", "volumes"),
    ("Engine", "engines"),
    ("Replica", "replicas"),
    ("Node", "nodes"),
    ("Setting", "settings"),
    ("EngineImage", "engineimages"),
];

/// Writes `longhorn/<plural>.yaml` and requests manager logs.
pub struct LonghornCollector {
    spec: LonghornCollect,
}

impl LonghornCollector {
    /// Build from spec.
    pub fn new(spec: LonghornCollect) -> Self {
        Self { spec }
    }

    fn namespace(&self) -> &str {
        self.spec.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

#[async_trait]
impl Collector for LonghornCollector {
    fn title(&self) -> String {
        self.spec
            .collector_name
            .clone()
            .unwrap_or_else(|| "longhorn".to_string())
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn requested_timeout(&self) -> Option<Duration> {
        self.spec
            .timeout
            .as_deref()
            .and_then(|t| parse_duration(t).ok())
    }

    async fn check_rbac(&self, ctx: &RunContext) -> Result<Vec<RbacDenial>> {
        let ns = Some(self.namespace());
        let mut checks: Vec<(&str, &str, &str, Option<&str>)> =
            vec![("list", "", "pods", ns), ("get", "", "pods/log", ns)];
        for (_, plural) in CRDS {
            checks.push(("list", GROUP, *plural, ns));
        }
        check_access(ctx, &checks).await
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        let ctx = &env.ctx;
        ctx.checkpoint()?;
        let namespace = self.namespace();
        let dir = self.title();
        let mut result = CollectorResult::new();

        for (kind, plural) in CRDS {
            ctx.checkpoint()?;
            let gvk = ResourceRef::grouped(GROUP, VERSION, kind, plural, true);
            match ctx.cluster.list_objects(&gvk, Some(namespace), None).await {
                Ok(items) => {
                    let rendered = serde_yaml::to_string(&items)?;
                    result.insert(
                        format!("{dir}/{plural}.yaml"),
                        Payload::text(rendered),
                    );
                }
                Err(e) => {
                    result.insert(
                        format!("{dir}/{plural}-errors.json"),
                        Payload::json(&serde_json::json!([e.to_string()]))?,
                    );
                }
            }
        }

        env.pod_logs
            .send(PodLogRequest {
                namespace: namespace.to_string(),
                selector: Some("app=longhorn-manager".to_string()),
                ..PodLogRequest::default()
            })
            .await?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::collect::testutil::collect_env;

    #[tokio::test]
    async fn dumps_longhorn_custom_resources_as_yaml() {
        let cluster = FakeCluster::new().with_object(
            "volumes",
            serde_json::json!({
                "apiVersion": "longhorn.io/v1beta2",
                "kind": "Volume",
                "metadata": {"name": "pvc-1234", "namespace": "longhorn-system"},
                "spec": {"size": "10737418240"}
            }),
        );
        let harness = collect_env(cluster);

        let collector = LonghornCollector::new(LonghornCollect::default());
        let result = collector.collect(&harness.env).await.unwrap();
        let Payload::Bytes(bytes) = result.get("longhorn/volumes.yaml").unwrap() else {
            panic!("expected bytes")
        };
        let text = String::from_utf8_lossy(bytes);
        assert!(text.contains("pvc-1234"), "{text}");
    }

    #[tokio::test]
    async fn manager_logs_are_requested_from_the_consolidator() {
        let cluster = FakeCluster::new()
            .with_pod(
                "longhorn-system",
                "longhorn-manager-x",
                &[("app", "longhorn-manager")],
                &["manager"],
            )
            .with_pod_logs("longhorn-system", "longhorn-manager-x", "manager", "mgr\n");
        let harness = collect_env(cluster);

        let collector = LonghornCollector::new(LonghornCollect::default());
        collector.collect(&harness.env).await.unwrap();
        let summary = harness.finish().await;
        assert_eq!(summary.fetched, 1);
    }
}
