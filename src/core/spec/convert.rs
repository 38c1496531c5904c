//! Conversion of legacy spec schemas to the current version.
//!
//! v1beta1 documents are converted with explicit field mappings; anything
//! the current schema cannot express is surfaced as a warning rather than
//! silently dropped. Conversion operates on the raw YAML value so unknown
//! collectors fail later with a precise pointer instead of here.

use serde_yaml::{Mapping, Value};

use crate::core::errors::{PeriscopeError, Result};

/// Outcome of converting one legacy document.
pub struct Converted {
    /// The document rewritten in the v1beta2 shape
    pub value: Value,
    /// Information lost or renamed during conversion
    pub warnings: Vec<String>,
}

fn key(s: &str) -> Value {
    Value::String(s.to_string())
}

/// Convert a v1beta1 document to the v1beta2 shape.
///
/// Mappings:
/// - kind `Collector` becomes kind `SupportBundle`
/// - collector tag `run` becomes `runPod`
/// - collector tag `copy` becomes `copyFromHost`
/// - `spec.afterCollection` is dropped with a warning
pub fn convert_v1beta1(mut doc: Value) -> Result<Converted> {
    let mut warnings = Vec::new();

    let map = doc
        .as_mapping_mut()
        .ok_or_else(|| PeriscopeError::spec("", "invalid-document", "document is not a mapping"))?;

    map.insert(key("apiVersion"), key(super::types::API_VERSION_V1BETA2));

    let kind = map
        .get(&key("kind"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if kind == "Collector" {
        map.insert(key("kind"), key("SupportBundle"));
    }

    if let Some(spec) = map.get_mut(&key("spec")).and_then(Value::as_mapping_mut) {
        if spec.remove(&key("afterCollection")).is_some() {
            warnings.push(
                "v1beta1 afterCollection hooks are not supported and were dropped".to_string(),
            );
        }

        if let Some(collectors) = spec
            .get_mut(&key("collectors"))
            .and_then(Value::as_sequence_mut)
        {
            for entry in collectors.iter_mut() {
                rename_collector_tag(entry, "run", "runPod", &mut warnings);
                rename_collector_tag(entry, "copy", "copyFromHost", &mut warnings);
            }
        }
    }

    Ok(Converted {
        value: doc,
        warnings,
    })
}

fn rename_collector_tag(entry: &mut Value, from: &str, to: &str, warnings: &mut Vec<String>) {
    let Some(map) = entry.as_mapping_mut() else {
        return;
    };
    if let Some(inner) = map.remove(&key(from)) {
        map.insert(key(to), inner);
        warnings.push(format!("v1beta1 collector '{from}' was converted to '{to}'"));
    }
}

/// Normalize a map entry in place if the document is a supported legacy
/// version; returns the (possibly converted) document and any warnings.
pub fn normalize(doc: Value, api_version: &str) -> Result<Converted> {
    match api_version {
        super::types::API_VERSION_V1BETA1 | "troubleshoot.replicated.com/v1beta1" => {
            convert_v1beta1(doc)
        }
        super::types::API_VERSION_V1BETA3 => {
            // Same shape as v1beta2; templating is not evaluated here.
            let mut converted = Converted {
                value: doc,
                warnings: Vec::new(),
            };
            if let Some(map) = converted.value.as_mapping_mut() {
                map.insert(key("apiVersion"), key(super::types::API_VERSION_V1BETA2));
            }
            Ok(converted)
        }
        _ => Ok(Converted {
            value: doc,
            warnings: Vec::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1beta1_collector_kind_converts_to_support_bundle() {
        let doc: Value = serde_yaml::from_str(
            r#"
apiVersion: troubleshoot.sh/v1beta1
kind: Collector
metadata:
  name: legacy
spec:
  afterCollection:
    - uploadResultsTo: https://example.com
  collectors:
    - run:
        name: ping
        image: busybox
"#,
        )
        .unwrap();

        let converted = convert_v1beta1(doc).unwrap();
        let map = converted.value.as_mapping().unwrap();
        assert_eq!(
            map.get(&key("kind")).and_then(Value::as_str),
            Some("SupportBundle")
        );
        assert_eq!(
            map.get(&key("apiVersion")).and_then(Value::as_str),
            Some(crate::core::spec::types::API_VERSION_V1BETA2)
        );

        let collectors = map
            .get(&key("spec"))
            .and_then(|s| s.as_mapping())
            .and_then(|s| s.get(&key("collectors")))
            .and_then(Value::as_sequence)
            .unwrap();
        assert!(collectors[0].as_mapping().unwrap().contains_key(&key("runPod")));

        // Both the drop and the rename are reported.
        assert_eq!(converted.warnings.len(), 2);
    }

    #[test]
    fn v1beta3_passes_through_with_rewritten_api_version() {
        let doc: Value = serde_yaml::from_str(
            r#"
apiVersion: troubleshoot.sh/v1beta3
kind: SupportBundle
metadata:
  name: modern
spec:
  collectors: []
"#,
        )
        .unwrap();

        let converted = normalize(doc, crate::core::spec::types::API_VERSION_V1BETA3).unwrap();
        assert!(converted.warnings.is_empty());
        assert_eq!(
            converted
                .value
                .as_mapping()
                .unwrap()
                .get(&key("apiVersion"))
                .and_then(Value::as_str),
            Some(crate::core::spec::types::API_VERSION_V1BETA2)
        );
    }
}
