//! Copy-from-host collector.
//!
//! Launches a short-lived daemonset whose pods mount the requested host
//! path, waits for the pods to come up, then execs `tar` in each pod and
//! unpacks the stream into `<name>/<node>/...`. The daemonset is deleted on
//! every path.

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cluster::ResourceRef;
use crate::collect::{
    check_access, evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload,
};
use crate::core::context::RunContext;
use crate::core::errors::{PeriscopeError, RbacDenial, Result};
use crate::core::spec::types::{parse_duration, CopyFromHostCollect};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_IMAGE: &str = "busybox:1.36";

/// Writes `<name>/<node>/<copied files>`.
pub struct CopyFromHostCollector {
    spec: CopyFromHostCollect,
    options: crate::core::context::RunOptions,
}

impl CopyFromHostCollector {
    /// Build from spec plus run options (image override, pull policy).
    pub fn new(spec: CopyFromHostCollect, options: crate::core::context::RunOptions) -> Self {
        Self { spec, options }
    }

    fn name(&self) -> String {
        self.spec
            .collector_name
            .clone()
            .or_else(|| self.spec.name.clone())
            .unwrap_or_else(|| "copy-from-host".to_string())
    }

    fn namespace(&self) -> &str {
        self.spec.namespace.as_deref().unwrap_or("default")
    }

    fn workload_name(&self) -> String {
        format!("periscope-copy-{}", self.name())
    }

    fn manifest(&self) -> serde_json::Value {
        let image = self
            .options
            .collector_image
            .clone()
            .or_else(|| self.spec.image.clone())
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string());
        let pull_policy = self
            .spec
            .image_pull_policy
            .clone()
            .unwrap_or_else(|| self.options.collector_pull_policy.as_str().to_string());
        let name = self.workload_name();

        serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": {
                "name": name,
                "namespace": self.namespace(),
                "labels": {"troubleshoot.sh/collector": "copy-from-host"},
            },
            "spec": {
                "selector": {"matchLabels": {"app": name}},
                "template": {
                    "metadata": {"labels": {"app": name}},
                    "spec": {
                        "containers": [{
                            "name": "copy",
                            "image": image,
                            "imagePullPolicy": pull_policy,
                            "command": ["sleep", "3600"],
                            "volumeMounts": [{
                                "name": "host",
                                "mountPath": "/host",
                                "readOnly": true,
                            }],
                        }],
                        "volumes": [{
                            "name": "host",
                            "hostPath": {"path": self.spec.host_path},
                        }],
                        "tolerations": [{"operator": "Exists"}],
                    },
                },
            },
        })
    }

    async fn wait_for_pods(
        &self,
        ctx: &RunContext,
        deadline: Duration,
    ) -> Result<Vec<crate::cluster::PodInfo>> {
        let selector = format!("app={}", self.workload_name());
        let start = std::time::Instant::now();
        loop {
            ctx.checkpoint()?;
            let pods = ctx
                .cluster
                .list_pods(Some(self.namespace()), Some(&selector))
                .await?;
            let ready: Vec<_> = pods
                .into_iter()
                .filter(|p| p.phase == "Running" || p.phase == "Succeeded")
                .collect();
            if !ready.is_empty() {
                return Ok(ready);
            }
            if start.elapsed() >= deadline {
                return Err(PeriscopeError::timeout("copy-from-host pod readiness"));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Collector for CopyFromHostCollector {
    fn title(&self) -> String {
        format!("copy-from-host/{}", self.name())
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
                ("create", "apps", "daemonsets", ns),
                ("delete", "apps", "daemonsets", ns),
                ("list", "", "pods", ns),
                ("create", "", "pods/exec", ns),
            ],
        )
        .await
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        let ctx = &env.ctx;
        ctx.checkpoint()?;
        let namespace = self.namespace();
        let workload = self.workload_name();

        debug!(daemonset = %workload, "creating copy-from-host workload");
        ctx.cluster
            .create_object(&ResourceRef::daemonsets(), Some(namespace), self.manifest())
            .await?;

        let deadline = self.requested_timeout().unwrap_or(DEFAULT_TIMEOUT);
        let run = async {
            let pods = self.wait_for_pods(ctx, deadline).await?;
            let name = self.name();
            let mut result = CollectorResult::new();

            for pod in pods {
                ctx.checkpoint()?;
                let node = pod.node.clone().unwrap_or_else(|| pod.name.clone());
                let command = vec![
                    "tar".to_string(),
                    "-C".to_string(),
                    "/host".to_string(),
                    "-cf".to_string(),
                    "-".to_string(),
                    ".".to_string(),
                ];
                let output = ctx
                    .cluster
                    .exec(&pod.namespace, &pod.name, Some("copy"), &command)
                    .await?;
                if output.exit_code != 0 {
                    result.insert(
                        format!("{name}/{node}/errors.json"),
                        Payload::json(&serde_json::json!({
                            "exitCode": output.exit_code,
                            "stderr": String::from_utf8_lossy(&output.stderr),
                        }))?,
                    );
                    continue;
                }

                for (rel, bytes) in unpack_tar(&output.stdout)? {
                    result.insert(format!("{name}/{node}/{rel}"), Payload::Bytes(bytes));
                }
            }
            Ok(result)
        }
        .await;

        if let Err(e) = ctx
            .cluster
            .delete_object(&ResourceRef::daemonsets(), Some(namespace), &workload)
            .await
        {
            warn!(daemonset = %workload, error = %e, "copy-from-host cleanup failed");
        }

        run
    }
}

/// Unpack an in-memory tar stream into (relative path, bytes) pairs.
/// Entries that would escape the destination are skipped.
fn unpack_tar(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = tar::Archive::new(std::io::Cursor::new(bytes));
    let mut files = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| PeriscopeError::io("reading copied tar stream", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| PeriscopeError::io("reading tar entry", e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| PeriscopeError::io("reading tar entry path", e))?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        if path.is_empty() || path.split('/').any(|seg| seg == "..") {
            continue;
        }
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| PeriscopeError::io("reading tar entry content", e))?;
        files.push((path, content));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn unpack_extracts_regular_files() {
        let tar = make_tar(&[("etc/os-release", b"ID=flatcar\n"), ("proc/version", b"6.1\n")]);
        let files = unpack_tar(&tar).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "etc/os-release");
        assert_eq!(files[0].1, b"ID=flatcar\n");
    }

    #[test]
    fn unpack_skips_traversal_entries() {
        let tar = make_tar(&[("../escape", b"nope"), ("ok.txt", b"fine")]);
        let files = unpack_tar(&tar).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "ok.txt");
    }

    #[test]
    fn manifest_mounts_the_requested_host_path() {
        let collector = CopyFromHostCollector::new(
            CopyFromHostCollect {
                name: Some("os-info".into()),
                host_path: "/etc".into(),
                ..CopyFromHostCollect::default()
            },
            crate::core::context::RunOptions::default(),
        );
        let manifest = collector.manifest();
        assert_eq!(
            manifest
                .pointer("/spec/template/spec/volumes/0/hostPath/path")
                .unwrap(),
            "/etc"
        );
    }
}
