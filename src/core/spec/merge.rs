//! Merging of loaded documents into one normalized spec.
//!
//! Documents merge by stable identity (`kind/name[/namespace]`). List fields
//! concatenate with exact-duplicate suppression; scalar fields that differ
//! between documents sharing an identity are reported as conflicts annotated
//! with provenance rather than silently last-write-wins.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::core::spec::types::{
    LoadedDoc, Provenance, ResolvedSpec, SpecConflict, TroubleshootDoc,
};

/// Merge parsed documents into one [`ResolvedSpec`].
pub fn merge_docs(docs: Vec<LoadedDoc>) -> ResolvedSpec {
    let mut resolved = ResolvedSpec::default();
    let mut dedupe = MergeDedupe::default();
    // merge identity -> (uri value, provenance) for conflict detection
    let mut uris: HashMap<String, (String, Provenance)> = HashMap::new();

    for loaded in docs {
        let key = loaded.doc.merge_key();
        debug!(key = %key, source = %loaded.source, "merging spec document");

        match loaded.doc {
            TroubleshootDoc::SupportBundle(_, spec) => {
                dedupe.collectors(&mut resolved, spec.collectors);
                dedupe.host_collectors(&mut resolved, spec.host_collectors);
                dedupe.analyzers(&mut resolved, spec.analyzers);
                dedupe.host_analyzers(&mut resolved, spec.host_analyzers);
                dedupe.redactors(&mut resolved, spec.redactors);
                if let Some(uri) = spec.uri {
                    record_uri_conflict(&mut resolved, &mut uris, key, uri, loaded.provenance);
                }
            }
            TroubleshootDoc::Preflight(_, spec) => {
                dedupe.collectors(&mut resolved, spec.collectors);
                dedupe.analyzers(&mut resolved, spec.analyzers);
                if let Some(uri) = spec.uri {
                    record_uri_conflict(&mut resolved, &mut uris, key, uri, loaded.provenance);
                }
            }
            TroubleshootDoc::Redactor(_, spec) => {
                dedupe.redactors(&mut resolved, spec.redactors);
            }
            TroubleshootDoc::Analyzer(_, spec) => {
                dedupe.analyzers(&mut resolved, spec.analyzers);
            }
            TroubleshootDoc::HostPreflight(_, spec) | TroubleshootDoc::HostSupportBundle(_, spec) => {
                dedupe.host_collectors(&mut resolved, spec.collectors);
                dedupe.host_analyzers(&mut resolved, spec.analyzers);
            }
        }
    }

    resolved
}

fn record_uri_conflict(
    resolved: &mut ResolvedSpec,
    uris: &mut HashMap<String, (String, Provenance)>,
    key: String,
    uri: String,
    provenance: Provenance,
) {
    match uris.get(&key) {
        Some((existing, existing_prov)) if *existing != uri => {
            resolved.conflicts.push(SpecConflict {
                key,
                field: "/spec/uri".to_string(),
                values: vec![
                    (*existing_prov, existing.clone()),
                    (provenance, uri),
                ],
            });
        }
        Some(_) => {}
        None => {
            uris.insert(key, (uri, provenance));
        }
    }
}

/// Exact-duplicate suppression backed by canonical JSON serialization.
#[derive(Default)]
struct MergeDedupe {
    seen: HashSet<String>,
}

impl MergeDedupe {
    fn admit<T: serde::Serialize>(&mut self, scope: &str, item: &T) -> bool {
        let canon = format!(
            "{scope}:{}",
            serde_json::to_string(item).unwrap_or_default()
        );
        self.seen.insert(canon)
    }

    fn collectors(
        &mut self,
        resolved: &mut ResolvedSpec,
        items: Vec<crate::core::spec::types::Collect>,
    ) {
        for item in items {
            if self.admit("collect", &item) {
                resolved.collectors.push(item);
            }
        }
    }

    fn host_collectors(
        &mut self,
        resolved: &mut ResolvedSpec,
        items: Vec<crate::core::spec::types::HostCollect>,
    ) {
        for item in items {
            if self.admit("host-collect", &item) {
                resolved.host_collectors.push(item);
            }
        }
    }

    fn analyzers(
        &mut self,
        resolved: &mut ResolvedSpec,
        items: Vec<crate::core::spec::types::Analyze>,
    ) {
        for item in items {
            if self.admit("analyze", &item) {
                resolved.analyzers.push(item);
            }
        }
    }

    fn host_analyzers(
        &mut self,
        resolved: &mut ResolvedSpec,
        items: Vec<crate::core::spec::types::HostAnalyze>,
    ) {
        for item in items {
            if self.admit("host-analyze", &item) {
                resolved.host_analyzers.push(item);
            }
        }
    }

    fn redactors(
        &mut self,
        resolved: &mut ResolvedSpec,
        items: Vec<crate::core::spec::types::RedactSpec>,
    ) {
        for item in items {
            if self.admit("redact", &item) {
                resolved.redactors.push(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::loader::parse_documents;

    fn load(text: &str, provenance: Provenance) -> Vec<LoadedDoc> {
        parse_documents(text, provenance, "test").unwrap().0
    }

    #[test]
    fn duplicate_collectors_across_documents_collapse() {
        let a = load(
            r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: vendor
spec:
  collectors:
    - clusterInfo: {}
    - logs:
        namespace: demo
        selector: ["app=web"]
"#,
            Provenance::Vendor,
        );
        let b = load(
            r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: user
spec:
  collectors:
    - clusterInfo: {}
    - logs:
        namespace: demo
        selector: ["app=api"]
"#,
            Provenance::User,
        );

        let mut docs = a;
        docs.extend(b);
        let resolved = merge_docs(docs);

        // clusterInfo deduped, the two distinct logs collectors survive
        assert_eq!(resolved.collectors.len(), 3);
        assert!(resolved.conflicts.is_empty());
    }

    #[test]
    fn differing_uri_on_same_identity_is_a_conflict() {
        let mut docs = load(
            r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: app
spec:
  uri: https://vendor.example.com/spec.yaml
"#,
            Provenance::Vendor,
        );
        docs.extend(load(
            r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: app
spec:
  uri: https://user.example.com/spec.yaml
"#,
            Provenance::User,
        ));

        let resolved = merge_docs(docs);
        assert_eq!(resolved.conflicts.len(), 1);
        let conflict = &resolved.conflicts[0];
        assert_eq!(conflict.key, "SupportBundle/app");
        assert_eq!(conflict.field, "/spec/uri");
        assert_eq!(conflict.values.len(), 2);
    }

    #[test]
    fn redactor_documents_contribute_rules() {
        let mut docs = load(
            r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: app
spec:
  redactors:
    - removals:
        values: ["alpha"]
"#,
            Provenance::Vendor,
        );
        docs.extend(load(
            r#"
apiVersion: troubleshoot.sh/v1beta2
kind: Redactor
metadata:
  name: extra
spec:
  redactors:
    - removals:
        values: ["beta"]
"#,
            Provenance::User,
        ));

        let resolved = merge_docs(docs);
        assert_eq!(resolved.redactors.len(), 2);
    }
}
