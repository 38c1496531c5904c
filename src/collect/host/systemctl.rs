//! Systemd unit state host collector.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::collect::host::{host_excluded, HostCollector, Payload};
use crate::collect::CollectorResult;
use crate::core::context::RunContext;
use crate::core::errors::Result;
use crate::core::spec::types::SystemctlCollect;

/// State of one queried unit.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitState {
    /// `systemctl is-active` output (active, inactive, failed, unknown)
    pub active: String,
    /// `systemctl is-enabled` output (enabled, disabled, unknown)
    pub enabled: String,
}

async fn query(kind: &str, unit: &str) -> String {
    let output = tokio::process::Command::new("systemctl")
        .args([kind, unit])
        .output()
        .await;
    match output {
        Ok(out) => {
            let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if text.is_empty() {
                "unknown".to_string()
            } else {
                text
            }
        }
        Err(_) => "unknown".to_string(),
    }
}

/// Writes `host-collectors/systemctl/<name>.json`.
pub struct SystemctlCollector {
    spec: SystemctlCollect,
}

impl SystemctlCollector {
    /// Build from spec.
    pub fn new(spec: SystemctlCollect) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl HostCollector for SystemctlCollector {
    fn title(&self) -> String {
        "systemctl".to_string()
    }

    fn is_excluded(&self) -> Result<bool> {
        host_excluded(self.spec.exclude.as_ref())
    }

    async fn collect(&self, ctx: &RunContext) -> Result<CollectorResult> {
        let mut services: BTreeMap<String, UnitState> = BTreeMap::new();
        for unit in &self.spec.services {
            ctx.checkpoint()?;
            services.insert(
                unit.clone(),
                UnitState {
                    active: query("is-active", unit).await,
                    enabled: query("is-enabled", unit).await,
                },
            );
        }

        let name = self.spec.collector_name.as_deref().unwrap_or("services");
        let mut result = CollectorResult::new();
        result.insert(
            format!("host-collectors/systemctl/{name}.json"),
            Payload::json(&serde_json::json!({ "services": services }))?,
        );
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
    async fn queries_each_listed_unit() {
        let ctx = RunContext::new(Arc::new(FakeCluster::new()), RunOptions::default());
        let collector = SystemctlCollector::new(SystemctlCollect {
            services: vec!["definitely-not-a-unit.service".into()],
            ..SystemctlCollect::default()
        });
        let result = collector.collect(&ctx).await.unwrap();
        let Payload::Bytes(bytes) = result
            .get("host-collectors/systemctl/services.json")
            .unwrap()
        else {
            panic!("expected bytes")
        };
        let body: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        // The unit is absent (or systemctl itself is); either way a state
        // string is recorded rather than an error.
        assert!(body["services"]["definitely-not-a-unit.service"]["active"].is_string());
    }
}
