//! Container log collection.
//!
//! This collector never writes log files itself: it resolves its selector
//! or pod name into pod-log requests and sends them to the consolidator,
//! which owns the canonical location and dedupes across collectors.

use async_trait::async_trait;

use crate::collect::podlogs::PodLogRequest;
use crate::collect::{check_access, evaluate_exclude, CollectEnv, Collector, CollectorResult};
use crate::core::context::RunContext;
use crate::core::errors::{RbacDenial, Result};
use crate::core::spec::types::{parse_duration, LogsCollect};

/// Advertises pods of interest to the pod-log consolidator.
pub struct LogsCollector {
    spec: LogsCollect,
}

impl LogsCollector {
    /// Build from spec.
    pub fn new(spec: LogsCollect) -> Self {
        Self { spec }
    }

    fn selector(&self) -> Option<String> {
        if self.spec.selector.is_empty() {
            None
        } else {
            Some(self.spec.selector.join(","))
        }
    }
}

#[async_trait]
impl Collector for LogsCollector {
    fn title(&self) -> String {
        if let Some(name) = &self.spec.collector_name {
            return format!("logs/{name}");
        }
        match (&self.spec.name, self.selector()) {
            (Some(name), _) => format!("logs/{name}"),
            (None, Some(selector)) => format!("logs/{selector}"),
            (None, None) => "logs".to_string(),
        }
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    async fn check_rbac(&self, ctx: &RunContext) -> Result<Vec<RbacDenial>> {
        let ns = self.spec.namespace.as_deref();
        check_access(
            ctx,
            &[("list", "", "pods", ns), ("get", "", "pods/log", ns)],
        )
        .await
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        env.ctx.checkpoint()?;

        let max_age_seconds = self
            .spec
            .limits
            .as_ref()
            .and_then(|l| l.max_age.as_deref())
            .map(parse_duration)
            .transpose()?
            .map(|d| d.as_secs() as i64);

        let namespaces: Vec<String> = match &self.spec.namespace {
            Some(ns) => vec![ns.clone()],
            None => env.ctx.cluster.list_namespaces().await?,
        };

        for namespace in namespaces {
            env.ctx.checkpoint()?;
            env.pod_logs
                .send(PodLogRequest {
                    namespace,
                    pod: self.spec.name.clone(),
                    selector: self.selector(),
                    containers: self.spec.container_names.clone(),
                    max_lines: self.spec.limits.as_ref().and_then(|l| l.max_lines),
                    since_seconds: max_age_seconds,
                    previous: false,
                })
                .await?;
        }

        // All file output happens in the consolidator.
        Ok(CollectorResult::new())
    }
}
