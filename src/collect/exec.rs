//! Exec collector: run a command inside existing pods.

use std::time::Duration;

use async_trait::async_trait;

use crate::collect::{
    check_access, evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload,
};
use crate::core::context::RunContext;
use crate::core::errors::{RbacDenial, Result};
use crate::core::spec::types::{parse_duration, ExecCollect};

/// Writes `<name>/<pod>-stdout.txt`, `<name>/<pod>-stderr.txt`, and
/// `<name>/<pod>-errors.json` for non-zero exits.
pub struct ExecCollector {
    spec: ExecCollect,
}

impl ExecCollector {
    /// Build from spec.
    pub fn new(spec: ExecCollect) -> Self {
        Self { spec }
    }

    fn name(&self) -> String {
        self.spec
            .collector_name
            .clone()
            .or_else(|| self.spec.name.clone())
            .unwrap_or_else(|| "exec".to_string())
    }

    fn namespace(&self) -> &str {
        self.spec.namespace.as_deref().unwrap_or("default")
    }

    fn command(&self) -> Vec<String> {
        let mut command = self.spec.command.clone();
        command.extend(self.spec.args.iter().cloned());
        command
    }
}

#[async_trait]
impl Collector for ExecCollector {
    fn title(&self) -> String {
        format!("exec/{}", self.name())
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
            &[("list", "", "pods", ns), ("create", "", "pods/exec", ns)],
        )
        .await
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        let ctx = &env.ctx;
        ctx.checkpoint()?;

        let selector = if self.spec.selector.is_empty() {
            None
        } else {
            Some(self.spec.selector.join(","))
        };
        let pods = ctx
            .cluster
            .list_pods(Some(self.namespace()), selector.as_deref())
            .await?;

        let name = self.name();
        let command = self.command();
        let mut result = CollectorResult::new();

        for pod in pods {
            ctx.checkpoint()?;
            let output = ctx
                .cluster
                .exec(
                    &pod.namespace,
                    &pod.name,
                    self.spec.container_name.as_deref(),
                    &command,
                )
                .await?;

            result.insert(
                format!("{name}/{}-stdout.txt", pod.name),
                Payload::Bytes(output.stdout),
            );
            if !output.stderr.is_empty() {
                result.insert(
                    format!("{name}/{}-stderr.txt", pod.name),
                    Payload::Bytes(output.stderr),
                );
            }
            if output.exit_code != 0 {
                result.insert(
                    format!("{name}/{}-errors.json", pod.name),
                    Payload::json(&serde_json::json!({
                        "command": command,
                        "exitCode": output.exit_code,
                    }))?,
                );
            }
        }

        Ok(result)
    }
}
