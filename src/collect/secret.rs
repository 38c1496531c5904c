//! Secret existence collector.
//!
//! Records whether a secret and optionally one of its keys exist. The value
//! itself is only included when the spec opts in, and even then it passes
//! through the redactor chain like every other byte.

use async_trait::async_trait;
use base64::Engine as _;

use crate::cluster::ResourceRef;
use crate::collect::{
    check_access, evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload,
};
use crate::core::context::RunContext;
use crate::core::errors::{RbacDenial, Result};
use crate::core::spec::types::SecretCollect;

/// Result document shape shared with the secret analyzer.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretOutput {
    /// Secret namespace
    pub namespace: String,
    /// Secret name
    pub name: String,
    /// Key that was checked, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Whether the secret exists
    pub secret_exists: bool,
    /// Whether the key exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_exists: Option<bool>,
    /// Decoded value, only when includeValue was set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Writes `secrets/<namespace>/<name>[/<key>].json`.
pub struct SecretCollector {
    spec: SecretCollect,
}

impl SecretCollector {
    /// Build from spec.
    pub fn new(spec: SecretCollect) -> Self {
        Self { spec }
    }

    fn namespace(&self) -> &str {
        self.spec.namespace.as_deref().unwrap_or("default")
    }
}

#[async_trait]
impl Collector for SecretCollector {
    fn title(&self) -> String {
        format!("secret/{}/{}", self.namespace(), self.spec.name)
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    async fn check_rbac(&self, ctx: &RunContext) -> Result<Vec<RbacDenial>> {
        check_access(ctx, &[("get", "", "secrets", Some(self.namespace()))]).await
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        env.ctx.checkpoint()?;
        let namespace = self.namespace();
        let object = env
            .ctx
            .cluster
            .get_object(&ResourceRef::secrets(), Some(namespace), &self.spec.name)
            .await?;

        let mut output = SecretOutput {
            namespace: namespace.to_string(),
            name: self.spec.name.clone(),
            key: self.spec.key.clone(),
            secret_exists: object.is_some(),
            key_exists: None,
            value: None,
        };

        if let (Some(object), Some(key)) = (&object, &self.spec.key) {
            let entry = object
                .pointer("/data")
                .and_then(|d| d.get(key))
                .and_then(serde_json::Value::as_str);
            output.key_exists = Some(entry.is_some());
            if self.spec.include_value {
                output.value = entry.and_then(|raw| {
                    base64::engine::general_purpose::STANDARD
                        .decode(raw)
                        .ok()
                        .and_then(|bytes| String::from_utf8(bytes).ok())
                });
            }
        }

        let path = match &self.spec.key {
            Some(key) => format!("secrets/{namespace}/{}/{key}.json", self.spec.name),
            None => format!("secrets/{namespace}/{}.json", self.spec.name),
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

    fn seeded_secret() -> serde_json::Value {
        let encoded = base64::engine::general_purpose::STANDARD.encode("hunter2");
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "db-credentials", "namespace": "demo"},
            "data": {"password": encoded}
        })
    }

    #[tokio::test]
    async fn records_existence_without_value_by_default() {
        let cluster = FakeCluster::new().with_object("secrets", seeded_secret());
        let harness = collect_env(cluster);

        let collector = SecretCollector::new(SecretCollect {
            name: "db-credentials".into(),
            namespace: Some("demo".into()),
            key: Some("password".into()),
            ..SecretCollect::default()
        });
        let result = collector.collect(&harness.env).await.unwrap();
        let Payload::Bytes(bytes) = result
            .get("secrets/demo/db-credentials/password.json")
            .unwrap()
        else {
            panic!("expected bytes")
        };
        let output: SecretOutput = serde_json::from_slice(bytes).unwrap();
        assert!(output.secret_exists);
        assert_eq!(output.key_exists, Some(true));
        assert!(output.value.is_none());
    }

    #[tokio::test]
    async fn include_value_decodes_the_payload() {
        let cluster = FakeCluster::new().with_object("secrets", seeded_secret());
        let harness = collect_env(cluster);

        let collector = SecretCollector::new(SecretCollect {
            name: "db-credentials".into(),
            namespace: Some("demo".into()),
            key: Some("password".into()),
            include_value: true,
            ..SecretCollect::default()
        });
        let result = collector.collect(&harness.env).await.unwrap();
        let Payload::Bytes(bytes) = result
            .get("secrets/demo/db-credentials/password.json")
            .unwrap()
        else {
            panic!("expected bytes")
        };
        let output: SecretOutput = serde_json::from_slice(bytes).unwrap();
        assert_eq!(output.value.as_deref(), Some("hunter2"));
    }

    #[tokio::test]
    async fn missing_secret_is_a_document_not_an_error() {
        let harness = collect_env(FakeCluster::new());
        let collector = SecretCollector::new(SecretCollect {
            name: "missing".into(),
            namespace: Some("demo".into()),
            ..SecretCollect::default()
        });
        let result = collector.collect(&harness.env).await.unwrap();
        let Payload::Bytes(bytes) = result.get("secrets/demo/missing.json").unwrap() else {
            panic!("expected bytes")
        };
        let output: SecretOutput = serde_json::from_slice(bytes).unwrap();
        assert!(!output.secret_exists);
    }
}
