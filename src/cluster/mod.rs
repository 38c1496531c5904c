//! Cluster access abstraction.
//!
//! The rest of the crate talks to the cluster exclusively through the
//! [`ClusterAccess`] trait: typed and dynamic reads, discovery, self-subject
//! access review, log streaming, exec, and port-forward. The production
//! implementation wraps a `kube` client; [`fake::FakeCluster`] backs the
//! test suite without a cluster.

pub mod client;
pub mod fake;
pub mod portforward;
pub mod registry;

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::core::errors::Result;

pub use client::KubeCluster;

/// A group/version/kind plus the plural and scope needed for REST access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// API group; empty for the core group
    pub group: String,
    /// API version
    pub version: String,
    /// Kind name
    pub kind: String,
    /// Plural resource name used in paths
    pub plural: String,
    /// Whether the resource is namespaced
    pub namespaced: bool,
}

impl ResourceRef {
    /// A core/v1 resource.
    pub fn core(kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            group: String::new(),
            version: "v1".to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }

    /// Any group/version resource.
    pub fn grouped(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }

    /// core/v1 secrets.
    pub fn secrets() -> Self {
        Self::core("Secret", "secrets", true)
    }

    /// core/v1 configmaps.
    pub fn configmaps() -> Self {
        Self::core("ConfigMap", "configmaps", true)
    }

    /// core/v1 pods.
    pub fn pods() -> Self {
        Self::core("Pod", "pods", true)
    }

    /// core/v1 namespaces.
    pub fn namespaces() -> Self {
        Self::core("Namespace", "namespaces", false)
    }

    /// apps/v1 daemonsets.
    pub fn daemonsets() -> Self {
        Self::grouped("apps", "v1", "DaemonSet", "daemonsets", true)
    }

    /// The apiVersion string for manifests.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Summary of one pod, enough for log collection and exec targeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
    /// Container names in declaration order
    pub containers: Vec<String>,
    /// Node the pod is scheduled on
    pub node: Option<String>,
    /// Pod phase (Running, Succeeded, ...)
    pub phase: String,
    /// Pod labels
    pub labels: BTreeMap<String, String>,
}

/// Cluster server version facts.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServerVersion {
    /// Major version component
    pub major: String,
    /// Minor version component
    pub minor: String,
    /// Full git version, e.g. "v1.29.3"
    pub git_version: String,
    /// Build platform
    pub platform: String,
}

impl Default for ServerVersion {
    fn default() -> Self {
        Self {
            major: "1".to_string(),
            minor: "29".to_string(),
            git_version: "v1.29.0".to_string(),
            platform: "linux/amd64".to_string(),
        }
    }
}

/// Captured output of an exec invocation.
#[derive(Debug, Default)]
pub struct ExecOutput {
    /// Collected stdout
    pub stdout: Vec<u8>,
    /// Collected stderr
    pub stderr: Vec<u8>,
    /// Process exit code
    pub exit_code: i32,
}

/// Options for one container log fetch.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Limit to the trailing N lines
    pub tail_lines: Option<i64>,
    /// Limit to entries newer than N seconds
    pub since_seconds: Option<i64>,
    /// Fetch the previous container instance's logs
    pub previous: bool,
}

/// A boxed async log byte stream.
pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

/// Bidirectional byte stream (port-forward).
pub trait AsyncStream: AsyncRead + AsyncWrite + Send {}
impl<T: AsyncRead + AsyncWrite + Send> AsyncStream for T {}

/// A boxed bidirectional stream.
pub type ForwardStream = Pin<Box<dyn AsyncStream>>;

/// Read-mostly cluster access. Shared by every collector; rate limits are
/// applied once inside the implementation and honored by all callers.
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Server version facts.
    async fn server_version(&self) -> Result<ServerVersion>;

    /// Listable resources discovered from the API server.
    async fn list_api_resources(&self) -> Result<Vec<ResourceRef>>;

    /// Names of all reachable namespaces.
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// List objects of a resource, optionally scoped and label-filtered.
    /// Items are returned as raw JSON objects.
    async fn list_objects(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<serde_json::Value>>;

    /// Fetch one object; `Ok(None)` when it does not exist.
    async fn get_object(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<serde_json::Value>>;

    /// Create an object from a manifest (run-pod, copy-from-host).
    async fn create_object(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        manifest: serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Delete an object, ignoring not-found.
    async fn delete_object(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()>;

    /// Pods in a namespace (or all namespaces), label-filtered.
    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<PodInfo>>;

    /// Stream one container's logs.
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        options: &LogOptions,
    ) -> Result<LogStream>;

    /// Exec a command in a container and capture its output.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput>;

    /// Self-subject access review: may the caller perform verb on resource?
    async fn can_i(
        &self,
        verb: &str,
        group: &str,
        resource: &str,
        namespace: Option<&str>,
    ) -> Result<bool>;

    /// Open a bidirectional stream to a pod port.
    async fn port_forward(&self, namespace: &str, pod: &str, port: u16) -> Result<ForwardStream>;
}

/// Evaluate an equality-based label selector ("a=b,c!=d") against labels.
pub fn selector_matches(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    for term in selector.split(',') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        if let Some((k, v)) = term.split_once("!=") {
            if labels.get(k.trim()).map(String::as_str) == Some(v.trim()) {
                return false;
            }
        } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
            if labels.get(k.trim()).map(String::as_str) != Some(v.trim()) {
                return false;
            }
        } else {
            // bare key term: label must exist
            if !labels.contains_key(term) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn selector_equality_and_inequality() {
        let l = labels(&[("app", "web"), ("tier", "front")]);
        assert!(selector_matches(&l, "app=web"));
        assert!(selector_matches(&l, "app==web,tier=front"));
        assert!(!selector_matches(&l, "app=api"));
        assert!(!selector_matches(&l, "app!=web"));
        assert!(selector_matches(&l, "tier"));
        assert!(!selector_matches(&l, "missing"));
    }

    #[test]
    fn resource_ref_api_version() {
        assert_eq!(ResourceRef::pods().api_version(), "v1");
        assert_eq!(ResourceRef::daemonsets().api_version(), "apps/v1");
    }
}
