//! ConfigMap existence collector.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::cluster::ResourceRef;
use crate::collect::{
    check_access, evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload,
};
use crate::core::context::RunContext;
use crate::core::errors::{RbacDenial, Result};
use crate::core::spec::types::ConfigMapCollect;

/// Result document shape shared with the configMap analyzer.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapOutput {
    /// ConfigMap namespace
    pub namespace: String,
    /// ConfigMap name
    pub name: String,
    /// Key that was checked, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Whether the configmap exists
    pub configmap_exists: bool,
    /// Whether the key exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_exists: Option<bool>,
    /// Value of the key, when includeValue was set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Full data map, when includeAllData was set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, String>>,
}

/// Writes `configmaps/<namespace>/<name>[/<key>].json`.
pub struct ConfigMapCollector {
    spec: ConfigMapCollect,
}

impl ConfigMapCollector {
    /// Build from spec.
    pub fn new(spec: ConfigMapCollect) -> Self {
        Self { spec }
    }

    fn namespace(&self) -> &str {
        self.spec.namespace.as_deref().unwrap_or("default")
    }
}

#[async_trait]
impl Collector for ConfigMapCollector {
    fn title(&self) -> String {
        format!("configmap/{}/{}", self.namespace(), self.spec.name)
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    async fn check_rbac(&self, ctx: &RunContext) -> Result<Vec<RbacDenial>> {
        check_access(ctx, &[("get", "", "configmaps", Some(self.namespace()))]).await
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        env.ctx.checkpoint()?;
        let namespace = self.namespace();
        let object = env
            .ctx
            .cluster
            .get_object(&ResourceRef::configmaps(), Some(namespace), &self.spec.name)
            .await?;

        let data: Option<BTreeMap<String, String>> = object.as_ref().and_then(|o| {
            o.pointer("/data").and_then(serde_json::Value::as_object).map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
        });

        let mut output = ConfigMapOutput {
            namespace: namespace.to_string(),
            name: self.spec.name.clone(),
            key: self.spec.key.clone(),
            configmap_exists: object.is_some(),
            key_exists: None,
            value: None,
            data: None,
        };

        if let Some(key) = &self.spec.key {
            let value = data.as_ref().and_then(|d| d.get(key)).cloned();
            output.key_exists = Some(value.is_some());
            if self.spec.include_value {
                output.value = value;
            }
        }
        if self.spec.include_all_data {
            output.data = data;
        }

        let path = match &self.spec.key {
            Some(key) => format!("configmaps/{namespace}/{}/{key}.json", self.spec.name),
            None => format!("configmaps/{namespace}/{}.json", self.spec.name),
        };

        let mut result = CollectorResult::new();
        result.insert(path, Payload::json(&output)?);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::collect::testutil::collect_env;

    fn seeded() -> FakeCluster {
        FakeCluster::new().with_object(
            "configmaps",
            serde_json::json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "app-config", "namespace": "demo"},
                "data": {"mode": "production", "replicas": "3"}
            }),
        )
    }

    #[tokio::test]
    async fn key_presence_and_value_collection() {
        let harness = collect_env(seeded());
        let collector = ConfigMapCollector::new(ConfigMapCollect {
            name: "app-config".into(),
            namespace: Some("demo".into()),
            key: Some("mode".into()),
            include_value: true,
            ..ConfigMapCollect::default()
        });
        let result = collector.collect(&harness.env).await.unwrap();
        let Payload::Bytes(bytes) = result.get("configmaps/demo/app-config/mode.json").unwrap()
        else {
            panic!("expected bytes")
        };
        let output: ConfigMapOutput = serde_json::from_slice(bytes).unwrap();
        assert!(output.configmap_exists);
        assert_eq!(output.key_exists, Some(true));
        assert_eq!(output.value.as_deref(), Some("production"));
    }

    #[tokio::test]
    async fn include_all_data_captures_the_map() {
        let harness = collect_env(seeded());
        let collector = ConfigMapCollector::new(ConfigMapCollect {
            name: "app-config".into(),
            namespace: Some("demo".into()),
            include_all_data: true,
            ..ConfigMapCollect::default()
        });
        let result = collector.collect(&harness.env).await.unwrap();
        let Payload::Bytes(bytes) = result.get("configmaps/demo/app-config.json").unwrap() else {
            panic!("expected bytes")
        };
        let output: ConfigMapOutput = serde_json::from_slice(bytes).unwrap();
        assert_eq!(output.data.unwrap().len(), 2);
    }
}
