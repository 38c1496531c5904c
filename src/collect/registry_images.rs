//! Registry image existence collector.
//!
//! Probes each image's manifest against its registry over the plain
//! Docker/OCI v2 API and records existence per image. Probe failures are
//! recorded per image, never fatal for the collector.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::cluster::registry::RegistryClient;
use crate::collect::{evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload};
use crate::core::context::RunContext;
use crate::core::errors::{RbacDenial, Result};
use crate::core::spec::types::RegistryImagesCollect;

/// Per-image probe result.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatus {
    /// Whether the manifest exists
    pub exists: bool,
    /// Probe error, when the registry could not answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Writes `registry/<collectorName|images>.json`.
pub struct RegistryImagesCollector {
    spec: RegistryImagesCollect,
}

impl RegistryImagesCollector {
    /// Build from spec.
    pub fn new(spec: RegistryImagesCollect) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Collector for RegistryImagesCollector {
    fn title(&self) -> String {
        format!(
            "registry-images/{}",
            self.spec.collector_name.as_deref().unwrap_or("images")
        )
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    async fn check_rbac(&self, _ctx: &RunContext) -> Result<Vec<RbacDenial>> {
        // Registry traffic only; no cluster verbs.
        Ok(Vec::new())
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        env.ctx.checkpoint()?;
        let client = match &self.spec.auth {
            Some(auth) => RegistryClient::with_auth(&auth.username, &auth.password)?,
            None => RegistryClient::anonymous()?,
        };

        let probes: Vec<(String, ImageStatus)> = stream::iter(self.spec.images.iter().cloned())
            .map(|image| {
                let client = &client;
                async move {
                    let status = match client.manifest_exists(&image).await {
                        Ok(exists) => ImageStatus {
                            exists,
                            error: None,
                        },
                        Err(e) => ImageStatus {
                            exists: false,
                            error: Some(e.to_string()),
                        },
                    };
                    (image, status)
                }
            })
            .buffer_unordered(4)
            .collect()
            .await;

        env.ctx.checkpoint()?;
        let mut images = serde_json::Map::new();
        for (image, status) in probes {
            images.insert(image, serde_json::to_value(&status)?);
        }

        let name = self.spec.collector_name.as_deref().unwrap_or("images");
        let mut result = CollectorResult::new();
        result.insert(
            format!("registry/{name}.json"),
            Payload::json(&serde_json::json!({ "images": images }))?,
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
    async fn unreachable_registry_records_per_image_errors() {
        let harness = collect_env(FakeCluster::new());
        let collector = RegistryImagesCollector::new(RegistryImagesCollect {
            // TEST-NET host: the probe fails without touching a real registry.
            images: vec!["192.0.2.1:1/org/app:v1".into()],
            ..RegistryImagesCollect::default()
        });
        let result = collector.collect(&harness.env).await.unwrap();
        let Payload::Bytes(bytes) = result.get("registry/images.json").unwrap() else {
            panic!("expected bytes")
        };
        let body: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        let entry = &body["images"]["192.0.2.1:1/org/app:v1"];
        assert_eq!(entry["exists"], false);
        assert!(entry.get("error").is_some());
    }
}
