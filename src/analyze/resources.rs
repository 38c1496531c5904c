//! Secret and configmap existence analyzers.
//!
//! Both read the result documents their collectors wrote. `when` is a
//! boolean word: `"true"` / `"false"` against key existence (when a key was
//! specified) or object existence.

use std::collections::BTreeMap;

use crate::analyze::{outcomes, read_json_opt, AnalyzeResult, Analyzer};
use crate::bundle::store::BundleReader;
use crate::collect::evaluate_exclude;
use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::types::{ConfigMapAnalyze, SecretAnalyze};

fn bool_when(when: &str, actual: bool) -> Result<bool> {
    match when.trim() {
        "true" => Ok(actual),
        "false" => Ok(!actual),
        other => Err(PeriscopeError::spec(
            "",
            "invalid-when",
            format!("expected true/false, got {other:?}"),
        )),
    }
}

/// Verdict over a collected secret document.
pub struct SecretAnalyzer {
    spec: SecretAnalyze,
}

impl SecretAnalyzer {
    /// Build from spec.
    pub fn new(spec: SecretAnalyze) -> Self {
        Self { spec }
    }

    fn path(&self) -> String {
        match &self.spec.key {
            Some(key) => format!(
                "secrets/{}/{}/{key}.json",
                self.spec.namespace, self.spec.secret_name
            ),
            None => format!("secrets/{}/{}.json", self.spec.namespace, self.spec.secret_name),
        }
    }
}

impl Analyzer for SecretAnalyzer {
    fn title(&self) -> String {
        self.spec.check_name.clone().unwrap_or_else(|| {
            format!("Secret: {}/{}", self.spec.namespace, self.spec.secret_name)
        })
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn is_strict(&self) -> Result<bool> {
        evaluate_exclude(self.spec.strict.as_ref())
    }

    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult> {
        let path = self.path();
        let Some(doc) = read_json_opt(bundle, &path)? else {
            return Ok(AnalyzeResult::warned(
                self.title(),
                format!("{path} was not collected"),
            ));
        };

        let secret_exists = doc
            .get("secretExists")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let key_exists = doc.get("keyExists").and_then(serde_json::Value::as_bool);
        let subject = match (&self.spec.key, key_exists) {
            (Some(_), Some(exists)) => secret_exists && exists,
            _ => secret_exists,
        };

        let mut vars = BTreeMap::new();
        vars.insert("SecretName".to_string(), self.spec.secret_name.clone());
        vars.insert("Namespace".to_string(), self.spec.namespace.clone());
        if let Some(key) = &self.spec.key {
            vars.insert("Key".to_string(), key.clone());
        }

        let (severity, spec) =
            outcomes::evaluate_outcomes(&self.spec.outcomes, &vars, |when| {
                bool_when(when, subject)
            })?;
        Ok(AnalyzeResult::from_outcome(self.title(), severity, spec))
    }
}

/// Verdict over a collected configmap document.
pub struct ConfigMapAnalyzer {
    spec: ConfigMapAnalyze,
}

impl ConfigMapAnalyzer {
    /// Build from spec.
    pub fn new(spec: ConfigMapAnalyze) -> Self {
        Self { spec }
    }

    fn path(&self) -> String {
        match &self.spec.key {
            Some(key) => format!(
                "configmaps/{}/{}/{key}.json",
                self.spec.namespace, self.spec.configmap_name
            ),
            None => format!(
                "configmaps/{}/{}.json",
                self.spec.namespace, self.spec.configmap_name
            ),
        }
    }
}

impl Analyzer for ConfigMapAnalyzer {
    fn title(&self) -> String {
        self.spec.check_name.clone().unwrap_or_else(|| {
            format!(
                "ConfigMap: {}/{}",
                self.spec.namespace, self.spec.configmap_name
            )
        })
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn is_strict(&self) -> Result<bool> {
        evaluate_exclude(self.spec.strict.as_ref())
    }

    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult> {
        let path = self.path();
        let Some(doc) = read_json_opt(bundle, &path)? else {
            return Ok(AnalyzeResult::warned(
                self.title(),
                format!("{path} was not collected"),
            ));
        };

        let exists = doc
            .get("configmapExists")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let key_exists = doc.get("keyExists").and_then(serde_json::Value::as_bool);
        let subject = match (&self.spec.key, key_exists) {
            (Some(_), Some(key_exists)) => exists && key_exists,
            _ => exists,
        };

        let mut vars = BTreeMap::new();
        vars.insert(
            "ConfigMapName".to_string(),
            self.spec.configmap_name.clone(),
        );
        vars.insert("Namespace".to_string(), self.spec.namespace.clone());

        let (severity, spec) =
            outcomes::evaluate_outcomes(&self.spec.outcomes, &vars, |when| {
                bool_when(when, subject)
            })?;
        Ok(AnalyzeResult::from_outcome(self.title(), severity, spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::types::{Outcome, OutcomeSpec};
    use std::collections::BTreeMap as Map;

    struct MemoryBundle(Map<String, Vec<u8>>);
    impl BundleReader for MemoryBundle {
        fn read(&self, path: &str) -> Result<Vec<u8>> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| PeriscopeError::internal(format!("missing {path}")))
        }
        fn glob(&self, _pattern: &str) -> Result<Vec<String>> {
            Ok(self.0.keys().cloned().collect())
        }
        fn exists(&self, path: &str) -> bool {
            self.0.contains_key(path)
        }
    }

    fn analyzer() -> SecretAnalyzer {
        SecretAnalyzer::new(SecretAnalyze {
            secret_name: "db-credentials".into(),
            namespace: "demo".into(),
            key: Some("password".into()),
            outcomes: vec![
                Outcome::Fail(OutcomeSpec {
                    when: Some("false".into()),
                    message: "secret {{ .SecretName }} is missing key {{ .Key }}".into(),
                    uri: None,
                }),
                Outcome::Pass(OutcomeSpec {
                    when: None,
                    message: "secret present".into(),
                    uri: None,
                }),
            ],
            ..SecretAnalyze::default()
        })
    }

    fn bundle(secret_exists: bool, key_exists: bool) -> MemoryBundle {
        let mut files = Map::new();
        files.insert(
            "secrets/demo/db-credentials/password.json".to_string(),
            serde_json::to_vec(&serde_json::json!({
                "namespace": "demo",
                "name": "db-credentials",
                "key": "password",
                "secretExists": secret_exists,
                "keyExists": key_exists,
            }))
            .unwrap(),
        );
        MemoryBundle(files)
    }

    #[test]
    fn missing_key_fails_with_rendered_message() {
        let result = analyzer().analyze(&bundle(true, false)).unwrap();
        assert!(result.is_fail);
        assert_eq!(
            result.message,
            "secret db-credentials is missing key password"
        );
    }

    #[test]
    fn present_key_passes() {
        let result = analyzer().analyze(&bundle(true, true)).unwrap();
        assert!(result.is_pass);
    }

    #[test]
    fn uncollected_secret_warns() {
        let result = analyzer().analyze(&MemoryBundle(Map::new())).unwrap();
        assert!(result.is_warn);
    }
}
