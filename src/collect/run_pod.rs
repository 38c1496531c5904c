//! Run-pod collector: launch a pod, wait for completion, capture output.
//!
//! The pod is created from spec parameters (image override and pull policy
//! may come from run options), polled until it finishes or the deadline
//! expires, its logs captured, and the pod deleted. Deletion happens on
//! every path, including timeout.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::cluster::{LogOptions, ResourceRef};
use crate::collect::{
    check_access, evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload,
};
use crate::core::context::RunContext;
use crate::core::errors::{PeriscopeError, RbacDenial, Result};
use crate::core::spec::types::{parse_duration, RunPodCollect};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Writes `<name>/<name>.log` and `<name>/pod.json`.
pub struct RunPodCollector {
    spec: RunPodCollect,
    options: crate::core::context::RunOptions,
}

impl RunPodCollector {
    /// Build from spec plus run options (image override, pull policy).
    pub fn new(spec: RunPodCollect, options: crate::core::context::RunOptions) -> Self {
        Self { spec, options }
    }

    fn name(&self) -> String {
        self.spec
            .collector_name
            .clone()
            .or_else(|| self.spec.name.clone())
            .unwrap_or_else(|| "run-pod".to_string())
    }

    fn namespace(&self) -> &str {
        self.spec.namespace.as_deref().unwrap_or("default")
    }

    fn manifest(&self) -> Result<serde_json::Value> {
        let image = self
            .options
            .collector_image
            .clone()
            .or_else(|| self.spec.image.clone())
            .ok_or_else(|| {
                PeriscopeError::spec("", "image-required", "runPod needs an image")
            })?;
        let pull_policy = self
            .spec
            .image_pull_policy
            .clone()
            .unwrap_or_else(|| self.options.collector_pull_policy.as_str().to_string());

        let mut container = serde_json::json!({
            "name": "collector",
            "image": image,
            "imagePullPolicy": pull_policy,
        });
        if !self.spec.command.is_empty() {
            container["command"] = serde_json::json!(self.spec.command);
        }
        if !self.spec.args.is_empty() {
            container["args"] = serde_json::json!(self.spec.args);
        }

        let mut spec = serde_json::json!({
            "restartPolicy": "Never",
            "containers": [container],
        });
        if let Some(sa) = &self.spec.service_account_name {
            spec["serviceAccountName"] = serde_json::json!(sa);
        }

        Ok(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": self.name(),
                "namespace": self.namespace(),
                "labels": {"troubleshoot.sh/collector": "run-pod"},
            },
            "spec": spec,
        }))
    }

    async fn wait_for_completion(&self, ctx: &RunContext, deadline: Duration) -> Result<String> {
        let start = std::time::Instant::now();
        loop {
            ctx.checkpoint()?;
            let pod = ctx
                .cluster
                .get_object(&ResourceRef::pods(), Some(self.namespace()), &self.name())
                .await?;
            let phase = pod
                .as_ref()
                .and_then(|p| p.pointer("/status/phase"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("Unknown")
                .to_string();
            if phase == "Succeeded" || phase == "Failed" {
                return Ok(phase);
            }
            if start.elapsed() >= deadline {
                return Err(PeriscopeError::timeout(format!(
                    "run-pod {} completion",
                    self.name()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Collector for RunPodCollector {
    fn title(&self) -> String {
        format!("run-pod/{}", self.name())
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
        check_access(
            ctx,
            &[
                ("create", "", "pods", ns),
                ("get", "", "pods", ns),
                ("get", "", "pods/log", ns),
                ("delete", "", "pods", ns),
            ],
        )
        .await
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        let ctx = &env.ctx;
        ctx.checkpoint()?;
        let manifest = self.manifest()?;
        let namespace = self.namespace();
        let name = self.name();

        debug!(pod = %name, namespace, "creating run-pod workload");
        ctx.cluster
            .create_object(&ResourceRef::pods(), Some(namespace), manifest)
            .await?;

        let deadline = self.requested_timeout().unwrap_or(DEFAULT_TIMEOUT);
        let run = async {
            let phase = self.wait_for_completion(ctx, deadline).await?;

            let mut log_bytes = Vec::new();
            match ctx
                .cluster
                .pod_logs(namespace, &name, "collector", &LogOptions::default())
                .await
            {
                Ok(mut stream) => {
                    stream
                        .read_to_end(&mut log_bytes)
                        .await
                        .map_err(|e| PeriscopeError::io("reading run-pod output", e))?;
                }
                Err(e) => warn!(pod = %name, error = %e, "run-pod log fetch failed"),
            }

            let pod = ctx
                .cluster
                .get_object(&ResourceRef::pods(), Some(namespace), &name)
                .await?;

            let mut result = CollectorResult::new();
            result.insert(format!("{name}/{name}.log"), Payload::Bytes(log_bytes));
            result.insert(
                format!("{name}/pod.json"),
                Payload::json(&serde_json::json!({
                    "phase": phase,
                    "pod": pod,
                }))?,
            );
            Ok(result)
        }
        .await;

        // Best-effort cleanup on every path.
        if let Err(e) = ctx
            .cluster
            .delete_object(&ResourceRef::pods(), Some(namespace), &name)
            .await
        {
            warn!(pod = %name, error = %e, "run-pod cleanup failed");
        }

        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::collect::testutil::collect_env;
    use crate::core::context::RunOptions;

    #[tokio::test]
    async fn runs_to_completion_and_cleans_up() {
        let cluster = FakeCluster::new().with_pod_logs("demo", "ping", "collector", "pong\n");
        let harness = collect_env(cluster);

        let collector = RunPodCollector::new(
            RunPodCollect {
                name: Some("ping".into()),
                namespace: Some("demo".into()),
                image: Some("busybox".into()),
                command: vec!["ping".into()],
                ..RunPodCollect::default()
            },
            RunOptions::default(),
        );
        let result = collector.collect(&harness.env).await.unwrap();

        let Payload::Bytes(bytes) = result.get("ping/ping.log").unwrap() else {
            panic!("expected bytes")
        };
        assert_eq!(bytes, b"pong\n");

        // The pod was deleted after collection.
        let leftover = harness
            .env
            .ctx
            .cluster
            .get_object(&ResourceRef::pods(), Some("demo"), "ping")
            .await
            .unwrap();
        assert!(leftover.is_none());
    }

    #[tokio::test]
    async fn image_override_from_run_options_wins() {
        let collector = RunPodCollector::new(
            RunPodCollect {
                name: Some("ping".into()),
                image: Some("busybox".into()),
                ..RunPodCollect::default()
            },
            RunOptions {
                collector_image: Some("registry.internal/busybox:pinned".into()),
                ..RunOptions::default()
            },
        );
        let manifest = collector.manifest().unwrap();
        assert_eq!(
            manifest.pointer("/spec/containers/0/image").unwrap(),
            "registry.internal/busybox:pinned"
        );
    }

    #[test]
    fn missing_image_fails_manifest_construction() {
        let collector = RunPodCollector::new(RunPodCollect::default(), RunOptions::default());
        assert!(collector.manifest().is_err());
    }
}
