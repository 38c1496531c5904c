//! Cluster version and platform summary.

use async_trait::async_trait;

use crate::collect::{evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload};
use crate::core::context::RunContext;
use crate::core::errors::{RbacDenial, Result};
use crate::core::spec::types::ClusterInfoCollect;

/// Writes `cluster-info/cluster_version.json`.
pub struct ClusterInfoCollector {
    spec: ClusterInfoCollect,
}

impl ClusterInfoCollector {
    /// Build from spec.
    pub fn new(spec: ClusterInfoCollect) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Collector for ClusterInfoCollector {
    fn title(&self) -> String {
        self.spec
            .collector_name
            .clone()
            .unwrap_or_else(|| "cluster-info".to_string())
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    async fn check_rbac(&self, _ctx: &RunContext) -> Result<Vec<RbacDenial>> {
        // The version endpoint is unauthenticated discovery; no resource
        // verbs are involved.
        Ok(Vec::new())
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        env.ctx.checkpoint()?;
        let version = env.ctx.cluster.server_version().await?;

        let body = serde_json::json!({
            "info": {
                "major": version.major,
                "minor": version.minor,
                "gitVersion": version.git_version,
                "platform": version.platform,
            },
            "string": version.git_version,
        });

        let mut result = CollectorResult::new();
        result.insert(
            "cluster-info/cluster_version.json".to_string(),
            Payload::json(&body)?,
        );
        Ok(result)
    }
}
