//! Rook-Ceph status collector.
//!
//! Finds the rook tools pod, execs the standard status commands, and
//! advertises the rook pods to the log consolidator so their logs land in
//! the canonical location exactly once even when other collectors ask for
//! the same pods.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::collect::podlogs::PodLogRequest;
use crate::collect::{
    check_access, evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload,
};
use crate::core::context::RunContext;
use crate::core::errors::{PeriscopeError, RbacDenial, Result};
use crate::core::spec::types::{parse_duration, CephCollect};

const DEFAULT_NAMESPACE: &str = "rook-ceph";
const TOOLS_SELECTOR: &str = "app=rook-ceph-tools";

/// (command, output file) pairs run in the tools pod.
const COMMANDS: &[(&str, &str)] = &[
    ("ceph status -f json-pretty", "status.json"),
    ("ceph health detail -f json-pretty", "health.json"),
    ("ceph osd status", "osd-status.txt"),
    ("ceph osd df -f json-pretty", "osd-df.json"),
    ("ceph df -f json-pretty", "df.json"),
    ("ceph fs status -f json-pretty", "fs-status.json"),
];

/// Writes `ceph/<command>.json|txt` and requests rook pod logs.
pub struct CephCollector {
    spec: CephCollect,
}

impl CephCollector {
    /// Build from spec.
    pub fn new(spec: CephCollect) -> Self {
        Self { spec }
    }

    fn namespace(&self) -> &str {
        self.spec.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

#[async_trait]
impl Collector for CephCollector {
    fn title(&self) -> String {
        self.spec
            .collector_name
            .clone()
            .unwrap_or_else(|| "ceph".to_string())
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
                ("list", "", "pods", ns),
                ("create", "", "pods/exec", ns),
                ("get", "", "pods/log", ns),
            ],
        )
        .await
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        let ctx = &env.ctx;
        ctx.checkpoint()?;
        let namespace = self.namespace();

        let tools = ctx
            .cluster
            .list_pods(Some(namespace), Some(TOOLS_SELECTOR))
            .await?;
        let tools_pod = tools.first().ok_or_else(|| {
            PeriscopeError::network(format!("no rook tools pod found in {namespace}"))
        })?;
        debug!(pod = %tools_pod.name, "found rook tools pod");

        let dir = self.title();
        let mut result = CollectorResult::new();
        for (command, file) in COMMANDS {
            ctx.checkpoint()?;
            let argv: Vec<String> = command.split(' ').map(str::to_string).collect();
            let output = ctx
                .cluster
                .exec(namespace, &tools_pod.name, None, &argv)
                .await?;
            if output.exit_code == 0 {
                result.insert(format!("{dir}/{file}"), Payload::Bytes(output.stdout));
            } else {
                result.insert(
                    format!("{dir}/{file}-errors.json"),
                    Payload::json(&serde_json::json!({
                        "command": command,
                        "exitCode": output.exit_code,
                        "stderr": String::from_utf8_lossy(&output.stderr),
                    }))?,
                );
            }
        }

        // Rook operator and daemon logs go through the consolidator; any
        // other collector asking for the same pods dedupes there.
        for selector in ["app=rook-ceph-operator", "app=rook-ceph-mon", "app=rook-ceph-osd"] {
            env.pod_logs
                .send(PodLogRequest {
                    namespace: namespace.to_string(),
                    selector: Some(selector.to_string()),
                    ..PodLogRequest::default()
                })
                .await?;
        }

        Ok(result)
    }
}
