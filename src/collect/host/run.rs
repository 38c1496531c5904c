//! Arbitrary host command collector.

use std::time::Duration;

use async_trait::async_trait;

use crate::collect::host::{host_excluded, HostCollector, Payload};
use crate::collect::CollectorResult;
use crate::core::context::RunContext;
use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::types::{parse_duration, RunHostCollect};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Writes `host-collectors/run/<name>.json` plus raw stdout/stderr files.
pub struct RunHostCollector {
    spec: RunHostCollect,
}

impl RunHostCollector {
    /// Build from spec.
    pub fn new(spec: RunHostCollect) -> Self {
        Self { spec }
    }

    fn name(&self) -> String {
        self.spec
            .collector_name
            .clone()
            .unwrap_or_else(|| self.spec.command.replace('/', "-"))
    }
}

#[async_trait]
impl HostCollector for RunHostCollector {
    fn title(&self) -> String {
        format!("run/{}", self.name())
    }

    fn is_excluded(&self) -> Result<bool> {
        host_excluded(self.spec.exclude.as_ref())
    }

    async fn collect(&self, ctx: &RunContext) -> Result<CollectorResult> {
        ctx.checkpoint()?;
        let timeout = self
            .spec
            .timeout
            .as_deref()
            .map(parse_duration)
            .transpose()?
            .unwrap_or(DEFAULT_TIMEOUT);

        let command = tokio::process::Command::new(&self.spec.command)
            .args(&self.spec.args)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(timeout, command)
            .await
            .map_err(|_| {
                PeriscopeError::timeout(format!("host command {}", self.spec.command))
            })?
            .map_err(|e| PeriscopeError::io(format!("running {}", self.spec.command), e))?;

        let name = self.name();
        let mut result = CollectorResult::new();
        result.insert(
            format!("host-collectors/run/{name}.json"),
            Payload::json(&serde_json::json!({
                "command": self.spec.command,
                "args": self.spec.args,
                "exitCode": output.status.code().unwrap_or(-1),
            }))?,
        );
        result.insert(
            format!("host-collectors/run/{name}-stdout.txt"),
            Payload::Bytes(output.stdout),
        );
        if !output.stderr.is_empty() {
            result.insert(
                format!("host-collectors/run/{name}-stderr.txt"),
                Payload::Bytes(output.stderr),
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::core::context::{RunContext, RunOptions};
    use std::sync::Arc;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let ctx = RunContext::new(Arc::new(FakeCluster::new()), RunOptions::default());
        let collector = RunHostCollector::new(RunHostCollect {
            collector_name: Some("uname".into()),
            command: "uname".into(),
            args: vec!["-s".into()],
            ..RunHostCollect::default()
        });
        let result = collector.collect(&ctx).await.unwrap();

        let Payload::Bytes(meta) = result.get("host-collectors/run/uname.json").unwrap() else {
            panic!("expected bytes")
        };
        let body: serde_json::Value = serde_json::from_slice(meta).unwrap();
        assert_eq!(body["exitCode"], 0);

        let Payload::Bytes(stdout) = result.get("host-collectors/run/uname-stdout.txt").unwrap()
        else {
            panic!("expected bytes")
        };
        assert_eq!(String::from_utf8_lossy(stdout).trim(), "Linux");
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let ctx = RunContext::new(Arc::new(FakeCluster::new()), RunOptions::default());
        let collector = RunHostCollector::new(RunHostCollect {
            command: "/definitely/not/a/binary".into(),
            ..RunHostCollect::default()
        });
        assert!(collector.collect(&ctx).await.is_err());
    }
}
