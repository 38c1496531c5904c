//! Inline data collector: writes spec-supplied content verbatim (minus
//! redaction, which applies to every bundle byte).

use async_trait::async_trait;

use crate::collect::{evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload};
use crate::core::context::RunContext;
use crate::core::errors::{RbacDenial, Result};
use crate::core::spec::types::DataCollect;

/// Writes `<collectorName|data>/<name>`.
pub struct DataCollector {
    spec: DataCollect,
}

impl DataCollector {
    /// Build from spec.
    pub fn new(spec: DataCollect) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Collector for DataCollector {
    fn title(&self) -> String {
        format!("data/{}", self.spec.name)
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    async fn check_rbac(&self, _ctx: &RunContext) -> Result<Vec<RbacDenial>> {
        Ok(Vec::new())
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        env.ctx.checkpoint()?;
        let dir = self.spec.collector_name.as_deref().unwrap_or("data");
        let mut result = CollectorResult::new();
        result.insert(
            format!("{dir}/{}", self.spec.name),
            Payload::text(self.spec.data.clone()),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::collect::testutil::collect_env;

    #[tokio::test]
    async fn writes_inline_content_at_the_named_path() {
        let harness = collect_env(FakeCluster::new());
        let collector = DataCollector::new(DataCollect {
            collector_name: Some("static".into()),
            name: "notes.txt".into(),
            data: "token=sk-XYZ\n".into(),
            ..DataCollect::default()
        });
        let result = collector.collect(&harness.env).await.unwrap();
        let Payload::Bytes(bytes) = result.get("static/notes.txt").unwrap() else {
            panic!("expected bytes")
        };
        assert_eq!(bytes, b"token=sk-XYZ\n");
    }
}
