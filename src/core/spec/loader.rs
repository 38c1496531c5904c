//! Spec loading from files, stdin, URLs, cluster objects, and OCI artifacts.
//!
//! Every source yields raw multi-document YAML which is parsed, converted to
//! the current schema version, and tagged with provenance. SupportBundle and
//! Preflight documents may point at a canonical `uri`; those are followed to
//! a bounded depth with identical-URI short-circuiting.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_yaml::Value;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::cluster::registry::RegistryClient;
use crate::cluster::{ClusterAccess, ResourceRef};
use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::convert;
use crate::core::spec::types::{
    AnalyzerSpec, HostSpec, LoadedDoc, Metadata, PreflightSpec, Provenance, RedactorSpec,
    SupportBundleSpec, TroubleshootDoc, API_VERSION_V1BETA2,
};

/// Maximum depth when following `uri` references between specs.
const MAX_URI_DEPTH: usize = 5;

/// Well-known data keys checked first when reading specs out of cluster
/// secrets and configmaps.
const PREFERRED_SPEC_KEYS: &[&str] = &[
    "support-bundle-spec",
    "preflight-spec",
    "preflight.yaml",
    "spec",
];

/// A parsed spec source locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecLocator {
    /// Local file path
    Path(PathBuf),
    /// Read from standard input (`-`)
    Stdin,
    /// http(s) URL
    Url(String),
    /// `secret/<namespace>/<name>`
    Secret {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
    },
    /// `configmap/<namespace>/<name>`
    ConfigMap {
        /// ConfigMap namespace
        namespace: String,
        /// ConfigMap name
        name: String,
    },
    /// `oci://registry/repo:tag`
    Oci(String),
}

impl SpecLocator {
    /// Parse a command-line locator.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == "-" {
            return Ok(Self::Stdin);
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Url(raw.to_string()));
        }
        if raw.starts_with("oci://") {
            return Ok(Self::Oci(raw.to_string()));
        }
        if let Some(rest) = raw.strip_prefix("secret/") {
            let (namespace, name) = split_ns_name(rest, raw)?;
            return Ok(Self::Secret { namespace, name });
        }
        if let Some(rest) = raw.strip_prefix("configmap/") {
            let (namespace, name) = split_ns_name(rest, raw)?;
            return Ok(Self::ConfigMap { namespace, name });
        }
        Ok(Self::Path(PathBuf::from(raw)))
    }
}

fn split_ns_name(rest: &str, raw: &str) -> Result<(String, String)> {
    let mut parts = rest.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(ns), Some(name)) if !ns.is_empty() && !name.is_empty() => {
            Ok((ns.to_string(), name.to_string()))
        }
        _ => Err(PeriscopeError::spec(
            "",
            "invalid-locator",
            format!("expected <kind>/<namespace>/<name>, got {raw:?}"),
        )),
    }
}

/// Parse one blob of (possibly multi-document) YAML into typed documents.
///
/// Unknown kinds and foreign apiVersions are skipped with a warning, never
/// an error, so a spec stream can carry unrelated manifests.
pub fn parse_documents(
    text: &str,
    provenance: Provenance,
    source: &str,
) -> Result<(Vec<LoadedDoc>, Vec<String>)> {
    let mut docs = Vec::new();
    let mut warnings = Vec::new();

    for de in serde_yaml::Deserializer::from_str(text) {
        let value = match Value::deserialize(de) {
            Ok(v) => v,
            Err(e) => {
                return Err(PeriscopeError::spec(
                    "",
                    "parse-failed",
                    format!("{source}: {e}"),
                ))
            }
        };
        if value.is_null() {
            continue;
        }

        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !api_version.starts_with("troubleshoot.sh/")
            && !api_version.starts_with("troubleshoot.replicated.com/")
        {
            warnings.push(format!(
                "{source}: skipping document with apiVersion {api_version:?}"
            ));
            continue;
        }

        let converted = convert::normalize(value, &api_version)?;
        warnings.extend(converted.warnings.iter().map(|w| format!("{source}: {w}")));
        let value = converted.value;

        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if api_version != API_VERSION_V1BETA2 {
            warnings.push(format!(
                "{source}: skipping document with unsupported apiVersion {api_version:?}"
            ));
            continue;
        }

        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let metadata: Metadata = value
            .get("metadata")
            .cloned()
            .map(serde_yaml::from_value)
            .transpose()
            .map_err(|e| PeriscopeError::spec("/metadata", "invalid-metadata", e.to_string()))?
            .unwrap_or_default();
        let spec_value = value.get("spec").cloned().unwrap_or(Value::Null);

        let doc = match kind.as_str() {
            "SupportBundle" => {
                let spec: SupportBundleSpec = from_spec(spec_value, source)?;
                TroubleshootDoc::SupportBundle(metadata, spec)
            }
            "Preflight" => {
                let spec: PreflightSpec = from_spec(spec_value, source)?;
                TroubleshootDoc::Preflight(metadata, spec)
            }
            "Redactor" => {
                let spec: RedactorSpec = from_spec(spec_value, source)?;
                TroubleshootDoc::Redactor(metadata, spec)
            }
            "Analyzer" => {
                let spec: AnalyzerSpec = from_spec(spec_value, source)?;
                TroubleshootDoc::Analyzer(metadata, spec)
            }
            "HostPreflight" => {
                let spec: HostSpec = from_spec(spec_value, source)?;
                TroubleshootDoc::HostPreflight(metadata, spec)
            }
            "HostSupportBundle" => {
                let spec: HostSpec = from_spec(spec_value, source)?;
                TroubleshootDoc::HostSupportBundle(metadata, spec)
            }
            other => {
                warnings.push(format!("{source}: skipping unknown kind {other:?}"));
                continue;
            }
        };

        docs.push(LoadedDoc {
            doc,
            provenance,
            source: source.to_string(),
        });
    }

    Ok((docs, warnings))
}

fn from_spec<T: serde::de::DeserializeOwned>(value: Value, source: &str) -> Result<T> {
    serde_yaml::from_value(value)
        .map_err(|e| PeriscopeError::spec("/spec", "invalid-spec", format!("{source}: {e}")))
}

/// Load every locator, follow `uri` references, and return the parsed
/// documents plus accumulated warnings.
pub async fn load_specs(
    locators: &[String],
    cluster: Option<Arc<dyn ClusterAccess>>,
) -> Result<(Vec<LoadedDoc>, Vec<String>)> {
    let mut docs = Vec::new();
    let mut warnings = Vec::new();
    let mut seen_uris: HashSet<String> = HashSet::new();

    for raw in locators {
        let locator = SpecLocator::parse(raw)?;
        let (text, provenance, source) = fetch_locator(&locator, cluster.as_deref()).await?;
        let (mut batch, mut warns) = parse_documents(&text, provenance, &source)?;
        warnings.append(&mut warns);
        follow_uris(&batch, 0, &mut seen_uris, &mut docs, &mut warnings).await?;
        docs.append(&mut batch);
    }

    Ok((docs, warnings))
}

/// Discover specs stored in the cluster: secrets and configmaps carrying the
/// given label selector.
pub async fn discover_cluster_specs(
    cluster: &dyn ClusterAccess,
    namespace: Option<&str>,
    selector: &str,
) -> Result<(Vec<LoadedDoc>, Vec<String>)> {
    let mut docs = Vec::new();
    let mut warnings = Vec::new();

    for gvk in [ResourceRef::secrets(), ResourceRef::configmaps()] {
        let objects = cluster.list_objects(&gvk, namespace, Some(selector)).await?;
        for obj in objects {
            let name = obj
                .pointer("/metadata/name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let ns = obj
                .pointer("/metadata/namespace")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            let source = format!("{}/{}/{}", gvk.plural, ns, name);
            let decode = gvk.plural == "secrets";
            match extract_spec_data(&obj, decode) {
                Some(text) => {
                    let (mut batch, mut warns) =
                        parse_documents(&text, Provenance::Cluster, &source)?;
                    docs.append(&mut batch);
                    warnings.append(&mut warns);
                }
                None => warnings.push(format!("{source}: no spec data found")),
            }
        }
    }

    Ok((docs, warnings))
}

async fn fetch_locator(
    locator: &SpecLocator,
    cluster: Option<&dyn ClusterAccess>,
) -> Result<(String, Provenance, String)> {
    match locator {
        SpecLocator::Path(path) => {
            let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                PeriscopeError::io(format!("reading spec {}", path.display()), e)
            })?;
            Ok((text, Provenance::User, path.display().to_string()))
        }
        SpecLocator::Stdin => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .map_err(|e| PeriscopeError::io("reading spec from stdin", e))?;
            Ok((text, Provenance::User, "stdin".to_string()))
        }
        SpecLocator::Url(url) => {
            let text = fetch_url(url).await?;
            Ok((text, Provenance::User, url.clone()))
        }
        SpecLocator::Oci(reference) => {
            let client = RegistryClient::anonymous()?;
            let text = client.fetch_artifact(reference).await?;
            Ok((text, Provenance::Vendor, reference.clone()))
        }
        SpecLocator::Secret { namespace, name } => {
            let cluster = cluster.ok_or_else(|| {
                PeriscopeError::spec("", "cluster-required", "secret locators need cluster access")
            })?;
            let obj = cluster
                .get_object(&ResourceRef::secrets(), Some(namespace), name)
                .await?
                .ok_or_else(|| {
                    PeriscopeError::spec(
                        "",
                        "no-spec-data",
                        format!("secret {namespace}/{name} does not exist"),
                    )
                })?;
            let text = extract_spec_data(&obj, true).ok_or_else(|| {
                PeriscopeError::spec(
                    "",
                    "no-spec-data",
                    format!("secret {namespace}/{name} carries no spec data"),
                )
            })?;
            Ok((
                text,
                Provenance::Cluster,
                format!("secret/{namespace}/{name}"),
            ))
        }
        SpecLocator::ConfigMap { namespace, name } => {
            let cluster = cluster.ok_or_else(|| {
                PeriscopeError::spec(
                    "",
                    "cluster-required",
                    "configmap locators need cluster access",
                )
            })?;
            let obj = cluster
                .get_object(&ResourceRef::configmaps(), Some(namespace), name)
                .await?
                .ok_or_else(|| {
                    PeriscopeError::spec(
                        "",
                        "no-spec-data",
                        format!("configmap {namespace}/{name} does not exist"),
                    )
                })?;
            let text = extract_spec_data(&obj, false).ok_or_else(|| {
                PeriscopeError::spec(
                    "",
                    "no-spec-data",
                    format!("configmap {namespace}/{name} carries no spec data"),
                )
            })?;
            Ok((
                text,
                Provenance::Cluster,
                format!("configmap/{namespace}/{name}"),
            ))
        }
    }
}

async fn fetch_url(url: &str) -> Result<String> {
    debug!(url, "fetching spec");
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        return Err(PeriscopeError::network_endpoint(
            format!("spec fetch returned {}", response.status()),
            url,
        ));
    }
    Ok(response.text().await?)
}

/// Pull spec text out of a secret/configmap object. Secret values are
/// base64-decoded. Preferred keys are tried first, then any value that looks
/// like a troubleshoot document.
fn extract_spec_data(obj: &serde_json::Value, base64_encoded: bool) -> Option<String> {
    let data = obj.get("data")?.as_object()?;

    let decode = |v: &serde_json::Value| -> Option<String> {
        let raw = v.as_str()?;
        if base64_encoded {
            use base64::Engine as _;
            let bytes = base64::engine::general_purpose::STANDARD.decode(raw).ok()?;
            String::from_utf8(bytes).ok()
        } else {
            Some(raw.to_string())
        }
    };

    for key in PREFERRED_SPEC_KEYS {
        if let Some(text) = data.get(*key).and_then(decode) {
            return Some(text);
        }
    }
    for value in data.values() {
        if let Some(text) = decode(value) {
            if text.contains("troubleshoot.sh/") || text.contains("troubleshoot.replicated.com/") {
                return Some(text);
            }
        }
    }
    None
}

/// Follow `uri` fields on support-bundle and preflight documents. Cycles by
/// identical URI short-circuit; expansion stops at [`MAX_URI_DEPTH`].
async fn follow_uris(
    batch: &[LoadedDoc],
    depth: usize,
    seen: &mut HashSet<String>,
    docs: &mut Vec<LoadedDoc>,
    warnings: &mut Vec<String>,
) -> Result<()> {
    if depth >= MAX_URI_DEPTH {
        warnings.push(format!("spec uri expansion stopped at depth {MAX_URI_DEPTH}"));
        return Ok(());
    }

    // Box the recursive future; async fn recursion is not object-safe.
    for loaded in batch {
        let uri = match &loaded.doc {
            TroubleshootDoc::SupportBundle(_, spec) => spec.uri.clone(),
            TroubleshootDoc::Preflight(_, spec) => spec.uri.clone(),
            _ => None,
        };
        let Some(uri) = uri else { continue };
        if !seen.insert(uri.clone()) {
            debug!(uri, "skipping already-expanded spec uri");
            continue;
        }
        if !uri.starts_with("http://") && !uri.starts_with("https://") {
            warnings.push(format!("ignoring non-http spec uri {uri:?}"));
            continue;
        }

        match fetch_url(&uri).await {
            Ok(text) => {
                let (nested, mut warns) = parse_documents(&text, Provenance::Vendor, &uri)?;
                warnings.append(&mut warns);
                Box::pin(follow_uris(&nested, depth + 1, seen, docs, warnings)).await?;
                docs.extend(nested);
            }
            Err(e) => {
                // An unreachable canonical uri downgrades to the inline spec.
                warn!(uri, error = %e, "failed to follow spec uri");
                warnings.push(format!("failed to follow spec uri {uri}: {e}"));
            }
        }
    }
    Ok(())
}
