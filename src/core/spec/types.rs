//! Typed model for troubleshoot.sh spec documents.
//!
//! Collector and analyzer specs are tagged unions: one YAML list item maps to
//! exactly one variant (`- logs: {...}`), which serde models as externally
//! tagged enums. Dispatch from variant to implementation lives in the
//! collector and analyzer registries, not in a class hierarchy.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{PeriscopeError, Result};

/// Current schema group/version accepted without conversion.
pub const API_VERSION_V1BETA2: &str = "troubleshoot.sh/v1beta2";
/// Newer schema accepted as the v1beta2 shape (templating not evaluated).
pub const API_VERSION_V1BETA3: &str = "troubleshoot.sh/v1beta3";
/// Legacy schema converted on load.
pub const API_VERSION_V1BETA1: &str = "troubleshoot.sh/v1beta1";

/// Where a spec document came from, attached to merge conflict reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Shipped by the software vendor
    Vendor,
    /// Supplied by the operator on the command line
    User,
    /// Discovered in the cluster (secret or configmap)
    Cluster,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vendor => write!(f, "vendor"),
            Self::User => write!(f, "user"),
            Self::Cluster => write!(f, "cluster"),
        }
    }
}

/// Object metadata subset we care about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Document name, used in the merge identity key
    #[serde(default)]
    pub name: Option<String>,
    /// Namespace, when sourced from a namespaced object
    #[serde(default)]
    pub namespace: Option<String>,
    /// Labels, used for in-cluster spec discovery
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A boolean that specs may spell as a YAML bool or a string (the string
/// form survives templating in upstream specs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoolString {
    /// Native boolean
    Bool(bool),
    /// String form: "true" / "false" (case-insensitive), empty = false
    String(String),
}

impl BoolString {
    /// Resolve to a boolean. Unparseable strings are an error so a typo in
    /// an `exclude` predicate cannot silently enable a collector.
    pub fn evaluate(&self) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "" | "false" | "no" | "0" => Ok(false),
                "true" | "yes" | "1" => Ok(true),
                other => Err(PeriscopeError::spec(
                    "",
                    "invalid-bool-string",
                    format!("cannot interpret {other:?} as a boolean"),
                )),
            },
        }
    }
}

/// Parse a spec timeout string ("30s", "5m") into a duration.
pub fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s.trim()).map_err(|e| {
        PeriscopeError::spec("", "invalid-duration", format!("bad duration {s:?}: {e}"))
    })
}

// ---------------------------------------------------------------------------
// Collectors
// ---------------------------------------------------------------------------

/// One collector entry: a tagged union of every supported variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collect {
    /// Cluster version and platform summary
    ClusterInfo(ClusterInfoCollect),
    /// Bulk dump of API resources by kind and namespace
    ClusterResources(ClusterResourcesCollect),
    /// Container logs for pods matched by name or selector
    Logs(LogsCollect),
    /// Launch a pod, wait for completion, capture its output
    RunPod(RunPodCollect),
    /// Exec a command inside existing pods
    Exec(ExecCollect),
    /// Copy a host path from every node via a short-lived daemonset
    CopyFromHost(CopyFromHostCollect),
    /// Perform an HTTP request and record the response
    Http(HttpCollect),
    /// Record existence (and optionally value) of a secret key
    Secret(SecretCollect),
    /// Record existence (and optionally data) of a configmap key
    ConfigMap(ConfigMapCollect),
    /// Connectivity check against postgres/mysql/redis
    DatabasePing(DatabasePingCollect),
    /// Rook-Ceph status via exec in the tools pod
    Ceph(CephCollect),
    /// Longhorn custom resources and manager logs
    Longhorn(LonghornCollect),
    /// Image manifest existence checks against a registry
    RegistryImages(RegistryImagesCollect),
    /// Inline data written verbatim into the bundle
    Data(DataCollect),
}

impl Collect {
    /// The YAML tag of the variant, used in progress output and error paths.
    pub fn variant(&self) -> &'static str {
        match self {
            Self::ClusterInfo(_) => "clusterInfo",
            Self::ClusterResources(_) => "clusterResources",
            Self::Logs(_) => "logs",
            Self::RunPod(_) => "runPod",
            Self::Exec(_) => "exec",
            Self::CopyFromHost(_) => "copyFromHost",
            Self::Http(_) => "http",
            Self::Secret(_) => "secret",
            Self::ConfigMap(_) => "configMap",
            Self::DatabasePing(_) => "databasePing",
            Self::Ceph(_) => "ceph",
            Self::Longhorn(_) => "longhorn",
            Self::RegistryImages(_) => "registryImages",
            Self::Data(_) => "data",
        }
    }

    /// The exclude predicate shared by all variants.
    pub fn exclude(&self) -> Option<&BoolString> {
        match self {
            Self::ClusterInfo(c) => c.exclude.as_ref(),
            Self::ClusterResources(c) => c.exclude.as_ref(),
            Self::Logs(c) => c.exclude.as_ref(),
            Self::RunPod(c) => c.exclude.as_ref(),
            Self::Exec(c) => c.exclude.as_ref(),
            Self::CopyFromHost(c) => c.exclude.as_ref(),
            Self::Http(c) => c.exclude.as_ref(),
            Self::Secret(c) => c.exclude.as_ref(),
            Self::ConfigMap(c) => c.exclude.as_ref(),
            Self::DatabasePing(c) => c.exclude.as_ref(),
            Self::Ceph(c) => c.exclude.as_ref(),
            Self::Longhorn(c) => c.exclude.as_ref(),
            Self::RegistryImages(c) => c.exclude.as_ref(),
            Self::Data(c) => c.exclude.as_ref(),
        }
    }
}

/// Cluster version and platform summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfoCollect {
    /// Output directory override
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
}

/// Bulk dump of API resources by kind and namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourcesCollect {
    /// Output directory override
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Namespaces to dump; empty = all reachable namespaces
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Record RBAC denials instead of failing the pre-check
    #[serde(default)]
    pub ignore_rbac: bool,
}

/// Limits applied to one logs collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLimits {
    /// Maximum log age, e.g. "720h"
    #[serde(default)]
    pub max_age: Option<String>,
    /// Maximum number of lines per container
    #[serde(default)]
    pub max_lines: Option<i64>,
}

/// Container logs for pods matched by name or selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsCollect {
    /// Output name; logs always land in the consolidated location
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Namespace to search; empty = all reachable
    #[serde(default)]
    pub namespace: Option<String>,
    /// Label selector terms, ANDed
    #[serde(default)]
    pub selector: Vec<String>,
    /// Explicit pod name, bypassing the selector
    #[serde(default)]
    pub name: Option<String>,
    /// Restrict to these container names
    #[serde(default)]
    pub container_names: Vec<String>,
    /// Line and age limits
    #[serde(default)]
    pub limits: Option<LogLimits>,
}

/// Launch a pod, wait for completion, capture its output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPodCollect {
    /// Output directory name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Pod name; defaults to the collector name
    #[serde(default)]
    pub name: Option<String>,
    /// Namespace the pod runs in
    #[serde(default)]
    pub namespace: Option<String>,
    /// Container image
    #[serde(default)]
    pub image: Option<String>,
    /// Entrypoint override
    #[serde(default)]
    pub command: Vec<String>,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Image pull policy override
    #[serde(default)]
    pub image_pull_policy: Option<String>,
    /// Service account the pod runs under
    #[serde(default)]
    pub service_account_name: Option<String>,
    /// Completion timeout, e.g. "60s"
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Exec a command inside existing pods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCollect {
    /// Output directory name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Friendly name used in the output path
    #[serde(default)]
    pub name: Option<String>,
    /// Namespace to search
    #[serde(default)]
    pub namespace: Option<String>,
    /// Label selector terms, ANDed
    #[serde(default)]
    pub selector: Vec<String>,
    /// Container to exec in; defaults to the first container
    #[serde(default)]
    pub container_name: Option<String>,
    /// Command to run
    #[serde(default)]
    pub command: Vec<String>,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-exec timeout
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Copy a host path from every node via a short-lived daemonset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyFromHostCollect {
    /// Output directory name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Workload name prefix
    #[serde(default)]
    pub name: Option<String>,
    /// Namespace the daemonset runs in
    #[serde(default)]
    pub namespace: Option<String>,
    /// Image used by the daemonset pods
    #[serde(default)]
    pub image: Option<String>,
    /// Host path to copy
    pub host_path: String,
    /// Image pull policy override
    #[serde(default)]
    pub image_pull_policy: Option<String>,
    /// Readiness + copy timeout
    #[serde(default)]
    pub timeout: Option<String>,
}

/// HTTP GET parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpGet {
    /// Request URL
    pub url: String,
    /// Skip TLS verification
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// HTTP POST parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpPost {
    /// Request URL
    pub url: String,
    /// Request body
    #[serde(default)]
    pub body: String,
    /// Skip TLS verification
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Perform an HTTP request and record the response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCollect {
    /// Output file name (`<name>.json`)
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// GET request, mutually exclusive with `post`
    #[serde(default)]
    pub get: Option<HttpGet>,
    /// POST request, mutually exclusive with `get`
    #[serde(default)]
    pub post: Option<HttpPost>,
    /// Request timeout
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Record existence (and optionally value) of a secret key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretCollect {
    /// Output name override
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Secret name
    pub name: String,
    /// Namespace of the secret
    #[serde(default)]
    pub namespace: Option<String>,
    /// Specific key to check
    #[serde(default)]
    pub key: Option<String>,
    /// Include the (redacted) value in the bundle
    #[serde(default)]
    pub include_value: bool,
}

/// Record existence (and optionally data) of a configmap key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapCollect {
    /// Output name override
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// ConfigMap name
    pub name: String,
    /// Namespace of the configmap
    #[serde(default)]
    pub namespace: Option<String>,
    /// Specific key to check
    #[serde(default)]
    pub key: Option<String>,
    /// Include the key's value
    #[serde(default)]
    pub include_value: bool,
    /// Include all data entries
    #[serde(default)]
    pub include_all_data: bool,
}

/// Connectivity check against postgres/mysql/redis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabasePingCollect {
    /// Output file name (`<name>.json`)
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Connection URI; the scheme selects the protocol
    pub uri: String,
    /// Connect timeout
    #[serde(default)]
    pub timeout: Option<String>,
    /// Reach the database through a pod port-forward: "namespace/pod:port"
    #[serde(default)]
    pub pod_port_forward: Option<String>,
}

/// Rook-Ceph status via exec in the tools pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CephCollect {
    /// Output directory name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Namespace rook runs in
    #[serde(default)]
    pub namespace: Option<String>,
    /// Per-command timeout
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Longhorn custom resources and manager logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LonghornCollect {
    /// Output directory name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Namespace longhorn runs in
    #[serde(default)]
    pub namespace: Option<String>,
    /// Collection timeout
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Basic credentials for registry manifest checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryAuth {
    /// Username
    pub username: String,
    /// Password or token
    pub password: String,
}

/// Image manifest existence checks against a registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryImagesCollect {
    /// Output file name (`registry/images.json` by default)
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Image references to probe
    #[serde(default)]
    pub images: Vec<String>,
    /// Basic-auth credentials
    #[serde(default)]
    pub auth: Option<RegistryAuth>,
}

/// Inline data written verbatim into the bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCollect {
    /// Output directory
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// File name within the collector directory
    pub name: String,
    /// File contents
    pub data: String,
}

// ---------------------------------------------------------------------------
// Host collectors
// ---------------------------------------------------------------------------

/// One host collector entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostCollect {
    /// Filesystem capacity and usage for a directory
    FilesystemUsage(FilesystemUsageCollect),
    /// Loaded kernel modules
    KernelModules(KernelModulesCollect),
    /// Wall clock, timezone, and NTP sync state
    Time(TimeCollect),
    /// Systemd unit states
    Systemctl(SystemctlCollect),
    /// Arbitrary host command
    Run(RunHostCollect),
    /// TCP port availability probe
    TcpPort(TcpPortCollect),
    /// UDP port availability probe
    UdpPort(UdpPortCollect),
}

impl HostCollect {
    /// The YAML tag of the variant.
    pub fn variant(&self) -> &'static str {
        match self {
            Self::FilesystemUsage(_) => "filesystemUsage",
            Self::KernelModules(_) => "kernelModules",
            Self::Time(_) => "time",
            Self::Systemctl(_) => "systemctl",
            Self::Run(_) => "run",
            Self::TcpPort(_) => "tcpPort",
            Self::UdpPort(_) => "udpPort",
        }
    }

    /// The exclude predicate shared by all variants.
    pub fn exclude(&self) -> Option<&BoolString> {
        match self {
            Self::FilesystemUsage(c) => c.exclude.as_ref(),
            Self::KernelModules(c) => c.exclude.as_ref(),
            Self::Time(c) => c.exclude.as_ref(),
            Self::Systemctl(c) => c.exclude.as_ref(),
            Self::Run(c) => c.exclude.as_ref(),
            Self::TcpPort(c) => c.exclude.as_ref(),
            Self::UdpPort(c) => c.exclude.as_ref(),
        }
    }
}

/// Filesystem capacity and usage for a directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemUsageCollect {
    /// Output file name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate (host facts only)
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Directory to stat
    pub path: String,
}

/// Loaded kernel modules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelModulesCollect {
    /// Output file name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate (host facts only)
    #[serde(default)]
    pub exclude: Option<BoolString>,
}

/// Wall clock, timezone, and NTP sync state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeCollect {
    /// Output file name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate (host facts only)
    #[serde(default)]
    pub exclude: Option<BoolString>,
}

/// Systemd unit states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemctlCollect {
    /// Output file name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate (host facts only)
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Units to query
    #[serde(default)]
    pub services: Vec<String>,
}

/// Arbitrary host command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHostCollect {
    /// Output file name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate (host facts only)
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Command to run
    pub command: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Execution timeout
    #[serde(default)]
    pub timeout: Option<String>,
}

/// TCP port availability probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpPortCollect {
    /// Output file name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate (host facts only)
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Port to probe
    pub port: u16,
    /// Interface address to bind, defaults to 0.0.0.0
    #[serde(default)]
    pub interface: Option<String>,
}

/// UDP port availability probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdpPortCollect {
    /// Output file name
    #[serde(default)]
    pub collector_name: Option<String>,
    /// Skip predicate (host facts only)
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Port to probe
    pub port: u16,
    /// Interface address to bind, defaults to 0.0.0.0
    #[serde(default)]
    pub interface: Option<String>,
}

// ---------------------------------------------------------------------------
// Analyzers
// ---------------------------------------------------------------------------

/// One pass/warn/fail rule inside an analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// Failing outcome
    Fail(OutcomeSpec),
    /// Warning outcome
    Warn(OutcomeSpec),
    /// Passing outcome
    Pass(OutcomeSpec),
}

impl Outcome {
    /// The inner spec regardless of severity.
    pub fn spec(&self) -> &OutcomeSpec {
        match self {
            Self::Fail(s) | Self::Warn(s) | Self::Pass(s) => s,
        }
    }
}

/// Condition and message carried by one outcome entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSpec {
    /// Boolean expression; absent = unconditional default
    #[serde(default)]
    pub when: Option<String>,
    /// Message template rendered with analyzer-scoped variables
    #[serde(default)]
    pub message: String,
    /// Optional documentation link
    #[serde(default)]
    pub uri: Option<String>,
}

/// One analyzer entry: a tagged union of every supported variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Analyze {
    /// Compare the cluster server version against semver requirements
    ClusterVersion(ClusterVersionAnalyze),
    /// Ready-replica checks against one deployment
    DeploymentStatus(DeploymentStatusAnalyze),
    /// Ready-replica checks against one statefulset
    StatefulsetStatus(StatefulsetStatusAnalyze),
    /// Aggregate node capacity checks
    NodeResources(NodeResourcesAnalyze),
    /// Regex evaluation over collected files
    TextAnalyze(TextAnalyze),
    /// Existence checks against a collected secret
    Secret(SecretAnalyze),
    /// Existence checks against a collected configmap
    ConfigMap(ConfigMapAnalyze),
    /// Verdict over a databasePing collector result
    DatabasePing(DatabasePingAnalyze),
}

impl Analyze {
    /// The YAML tag of the variant.
    pub fn variant(&self) -> &'static str {
        match self {
            Self::ClusterVersion(_) => "clusterVersion",
            Self::DeploymentStatus(_) => "deploymentStatus",
            Self::StatefulsetStatus(_) => "statefulsetStatus",
            Self::NodeResources(_) => "nodeResources",
            Self::TextAnalyze(_) => "textAnalyze",
            Self::Secret(_) => "secret",
            Self::ConfigMap(_) => "configMap",
            Self::DatabasePing(_) => "databasePing",
        }
    }

    /// The outcome list shared by all variants.
    pub fn outcomes(&self) -> &[Outcome] {
        match self {
            Self::ClusterVersion(a) => &a.outcomes,
            Self::DeploymentStatus(a) => &a.outcomes,
            Self::StatefulsetStatus(a) => &a.outcomes,
            Self::NodeResources(a) => &a.outcomes,
            Self::TextAnalyze(a) => &a.outcomes,
            Self::Secret(a) => &a.outcomes,
            Self::ConfigMap(a) => &a.outcomes,
            Self::DatabasePing(a) => &a.outcomes,
        }
    }

    /// The strict flag shared by all variants.
    pub fn strict(&self) -> Option<&BoolString> {
        match self {
            Self::ClusterVersion(a) => a.strict.as_ref(),
            Self::DeploymentStatus(a) => a.strict.as_ref(),
            Self::StatefulsetStatus(a) => a.strict.as_ref(),
            Self::NodeResources(a) => a.strict.as_ref(),
            Self::TextAnalyze(a) => a.strict.as_ref(),
            Self::Secret(a) => a.strict.as_ref(),
            Self::ConfigMap(a) => a.strict.as_ref(),
            Self::DatabasePing(a) => a.strict.as_ref(),
        }
    }

    /// The exclude predicate shared by all variants.
    pub fn exclude(&self) -> Option<&BoolString> {
        match self {
            Self::ClusterVersion(a) => a.exclude.as_ref(),
            Self::DeploymentStatus(a) => a.exclude.as_ref(),
            Self::StatefulsetStatus(a) => a.exclude.as_ref(),
            Self::NodeResources(a) => a.exclude.as_ref(),
            Self::TextAnalyze(a) => a.exclude.as_ref(),
            Self::Secret(a) => a.exclude.as_ref(),
            Self::ConfigMap(a) => a.exclude.as_ref(),
            Self::DatabasePing(a) => a.exclude.as_ref(),
        }
    }
}

/// Compare the cluster server version against semver requirements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersionAnalyze {
    /// Display title override
    #[serde(default)]
    pub check_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Promote warn to fail for the exit code
    #[serde(default)]
    pub strict: Option<BoolString>,
    /// Ordered outcome rules
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// Ready-replica checks against one deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusAnalyze {
    /// Display title override
    #[serde(default)]
    pub check_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Promote warn to fail for the exit code
    #[serde(default)]
    pub strict: Option<BoolString>,
    /// Deployment name
    pub name: String,
    /// Deployment namespace
    pub namespace: String,
    /// Ordered outcome rules; bare comparisons target ready replicas
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// Ready-replica checks against one statefulset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulsetStatusAnalyze {
    /// Display title override
    #[serde(default)]
    pub check_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Promote warn to fail for the exit code
    #[serde(default)]
    pub strict: Option<BoolString>,
    /// StatefulSet name
    pub name: String,
    /// StatefulSet namespace
    pub namespace: String,
    /// Ordered outcome rules; bare comparisons target ready replicas
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// Aggregate node capacity checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResourcesAnalyze {
    /// Display title override
    #[serde(default)]
    pub check_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Promote warn to fail for the exit code
    #[serde(default)]
    pub strict: Option<BoolString>,
    /// Ordered outcome rules; `when` uses count()/min()/max()/sum()
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// Regex evaluation over collected files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextAnalyze {
    /// Display title override
    #[serde(default)]
    pub check_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Promote warn to fail for the exit code
    #[serde(default)]
    pub strict: Option<BoolString>,
    /// Collector directory the files live under
    #[serde(default)]
    pub collector_name: Option<String>,
    /// File glob within the collector directory
    pub file_name: String,
    /// Pattern whose presence is the analysis subject
    #[serde(default)]
    pub regex_pattern: Option<String>,
    /// Pattern with named groups exposed as message variables
    #[serde(default)]
    pub regex_groups: Option<String>,
    /// Ordered outcome rules; `when` is "true"/"false" or group comparisons
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// Existence checks against a collected secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretAnalyze {
    /// Display title override
    #[serde(default)]
    pub check_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Promote warn to fail for the exit code
    #[serde(default)]
    pub strict: Option<BoolString>,
    /// Secret name
    pub secret_name: String,
    /// Secret namespace
    pub namespace: String,
    /// Specific key to check
    #[serde(default)]
    pub key: Option<String>,
    /// Ordered outcome rules
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// Existence checks against a collected configmap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapAnalyze {
    /// Display title override
    #[serde(default)]
    pub check_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Promote warn to fail for the exit code
    #[serde(default)]
    pub strict: Option<BoolString>,
    /// ConfigMap name
    pub configmap_name: String,
    /// ConfigMap namespace
    pub namespace: String,
    /// Specific key to check
    #[serde(default)]
    pub key: Option<String>,
    /// Ordered outcome rules
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// Verdict over a databasePing collector result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabasePingAnalyze {
    /// Display title override
    #[serde(default)]
    pub check_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Promote warn to fail for the exit code
    #[serde(default)]
    pub strict: Option<BoolString>,
    /// Name of the databasePing collector to read
    pub collector_name: String,
    /// Ordered outcome rules; `when` uses connected == true / version >= N
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

// ---------------------------------------------------------------------------
// Host analyzers
// ---------------------------------------------------------------------------

/// One host analyzer entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostAnalyze {
    /// Free/used space checks for a collected filesystem stat
    FilesystemUsage(FilesystemUsageAnalyze),
    /// NTP sync and timezone checks
    Time(TimeAnalyze),
    /// TCP port probe verdicts
    TcpPort(PortAnalyze),
    /// UDP port probe verdicts
    UdpPort(PortAnalyze),
}

impl HostAnalyze {
    /// The YAML tag of the variant.
    pub fn variant(&self) -> &'static str {
        match self {
            Self::FilesystemUsage(_) => "filesystemUsage",
            Self::Time(_) => "time",
            Self::TcpPort(_) => "tcpPort",
            Self::UdpPort(_) => "udpPort",
        }
    }

    /// The outcome list shared by all variants.
    pub fn outcomes(&self) -> &[Outcome] {
        match self {
            Self::FilesystemUsage(a) => &a.outcomes,
            Self::Time(a) => &a.outcomes,
            Self::TcpPort(a) | Self::UdpPort(a) => &a.outcomes,
        }
    }

    /// The strict flag shared by all variants.
    pub fn strict(&self) -> Option<&BoolString> {
        match self {
            Self::FilesystemUsage(a) => a.strict.as_ref(),
            Self::Time(a) => a.strict.as_ref(),
            Self::TcpPort(a) | Self::UdpPort(a) => a.strict.as_ref(),
        }
    }
}

/// Free/used space checks for a collected filesystem stat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemUsageAnalyze {
    /// Display title override
    #[serde(default)]
    pub check_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Promote warn to fail for the exit code
    #[serde(default)]
    pub strict: Option<BoolString>,
    /// Name of the filesystemUsage collector to read
    pub collector_name: String,
    /// Ordered outcome rules; `when` compares available/used/usedPercent
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// NTP sync and timezone checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeAnalyze {
    /// Display title override
    #[serde(default)]
    pub check_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Promote warn to fail for the exit code
    #[serde(default)]
    pub strict: Option<BoolString>,
    /// Ordered outcome rules; `when` uses ntp == synchronized / timezone == X
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// TCP/UDP port probe verdicts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortAnalyze {
    /// Display title override
    #[serde(default)]
    pub check_name: Option<String>,
    /// Skip predicate
    #[serde(default)]
    pub exclude: Option<BoolString>,
    /// Promote warn to fail for the exit code
    #[serde(default)]
    pub strict: Option<BoolString>,
    /// Name of the port collector to read
    pub collector_name: String,
    /// Ordered outcome rules; `when` compares the probe status string
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

// ---------------------------------------------------------------------------
// Redactors
// ---------------------------------------------------------------------------

/// Globs restricting which bundle files a redactor applies to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSelector {
    /// Single glob
    #[serde(default)]
    pub file: Option<String>,
    /// Multiple globs, ORed
    #[serde(default)]
    pub files: Vec<String>,
}

impl FileSelector {
    /// True when no glob was given (rule applies to every file).
    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.files.is_empty()
    }

    /// All globs in declaration order.
    pub fn globs(&self) -> impl Iterator<Item = &str> {
        self.file.iter().map(String::as_str).chain(self.files.iter().map(String::as_str))
    }
}

/// Line-gated regex removal: `redactor` runs only on lines where `selector`
/// matched (absent selector = every line). The `mask` named capture is
/// replaced with the sentinel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexRedact {
    /// Line-level gate
    #[serde(default)]
    pub selector: Option<String>,
    /// Pattern with a `mask` named capture group
    pub redactor: String,
}

/// Lookback removal: when `selector` matches line N-1, `redactor` is applied
/// to line N.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiLineRedact {
    /// Preceding-line gate
    pub selector: String,
    /// Pattern with a `mask` named capture group
    pub redactor: String,
}

/// The removal set of one redactor rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Removals {
    /// Literal strings replaced verbatim
    #[serde(default)]
    pub values: Vec<String>,
    /// Line-gated regex removals
    #[serde(default)]
    pub regex: Vec<RegexRedact>,
    /// Lookback removals
    #[serde(default)]
    pub multi_line: Vec<MultiLineRedact>,
    /// Dotted paths redacted when the file parses as YAML
    #[serde(default)]
    pub yaml_path: Vec<String>,
    /// Dotted paths redacted when the file parses as JSON
    #[serde(default)]
    pub json_path: Vec<String>,
}

/// One redactor rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactSpec {
    /// Rule name, surfaced in the redaction report
    #[serde(default)]
    pub name: Option<String>,
    /// Files the rule applies to; absent = all
    #[serde(default)]
    pub file_selector: Option<FileSelector>,
    /// What to remove
    #[serde(default)]
    pub removals: Removals,
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Spec of a SupportBundle document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportBundleSpec {
    /// Cluster collectors
    #[serde(default)]
    pub collectors: Vec<Collect>,
    /// Host collectors
    #[serde(default)]
    pub host_collectors: Vec<HostCollect>,
    /// Cluster analyzers
    #[serde(default)]
    pub analyzers: Vec<Analyze>,
    /// Host analyzers
    #[serde(default)]
    pub host_analyzers: Vec<HostAnalyze>,
    /// Redactor rules bundled with the spec
    #[serde(default)]
    pub redactors: Vec<RedactSpec>,
    /// Canonical location of a newer revision of this spec
    #[serde(default)]
    pub uri: Option<String>,
}

/// Spec of a Preflight document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightSpec {
    /// Cluster collectors
    #[serde(default)]
    pub collectors: Vec<Collect>,
    /// Cluster analyzers
    #[serde(default)]
    pub analyzers: Vec<Analyze>,
    /// Canonical location of a newer revision of this spec
    #[serde(default)]
    pub uri: Option<String>,
}

/// Spec of a HostPreflight / HostSupportBundle document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSpec {
    /// Host collectors
    #[serde(default)]
    pub collectors: Vec<HostCollect>,
    /// Host analyzers
    #[serde(default)]
    pub analyzers: Vec<HostAnalyze>,
}

/// Spec of a standalone Redactor document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactorSpec {
    /// Redactor rules
    #[serde(default)]
    pub redactors: Vec<RedactSpec>,
}

/// Spec of a standalone Analyzer document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerSpec {
    /// Cluster analyzers
    #[serde(default)]
    pub analyzers: Vec<Analyze>,
}

/// One parsed troubleshoot.sh document of a known kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TroubleshootDoc {
    /// SupportBundle kind
    SupportBundle(Metadata, SupportBundleSpec),
    /// Preflight kind
    Preflight(Metadata, PreflightSpec),
    /// Redactor kind
    Redactor(Metadata, RedactorSpec),
    /// Analyzer kind
    Analyzer(Metadata, AnalyzerSpec),
    /// HostPreflight kind
    HostPreflight(Metadata, HostSpec),
    /// HostSupportBundle kind
    HostSupportBundle(Metadata, HostSpec),
}

impl TroubleshootDoc {
    /// Kind string as it appears in the document.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SupportBundle(..) => "SupportBundle",
            Self::Preflight(..) => "Preflight",
            Self::Redactor(..) => "Redactor",
            Self::Analyzer(..) => "Analyzer",
            Self::HostPreflight(..) => "HostPreflight",
            Self::HostSupportBundle(..) => "HostSupportBundle",
        }
    }

    /// Document metadata.
    pub fn metadata(&self) -> &Metadata {
        match self {
            Self::SupportBundle(m, _)
            | Self::Preflight(m, _)
            | Self::Redactor(m, _)
            | Self::Analyzer(m, _)
            | Self::HostPreflight(m, _)
            | Self::HostSupportBundle(m, _) => m,
        }
    }

    /// Stable identity used when merging documents: `kind/name[/namespace]`.
    pub fn merge_key(&self) -> String {
        let meta = self.metadata();
        let name = meta.name.as_deref().unwrap_or("default");
        match &meta.namespace {
            Some(ns) => format!("{}/{}/{}", self.kind(), name, ns),
            None => format!("{}/{}", self.kind(), name),
        }
    }
}

/// A parsed document plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedDoc {
    /// The parsed document
    pub doc: TroubleshootDoc,
    /// Origin category for conflict reports
    pub provenance: Provenance,
    /// Human-readable source (path, URL, secret ref)
    pub source: String,
}

/// A field-level conflict discovered while merging documents.
#[derive(Debug, Clone, Serialize)]
pub struct SpecConflict {
    /// Merge identity the conflict occurred under
    pub key: String,
    /// JSON-pointer of the differing field
    pub field: String,
    /// The competing values with their provenance
    pub values: Vec<(Provenance, String)>,
}

/// The fully merged, normalized spec the pipeline consumes.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSpec {
    /// Cluster collectors
    pub collectors: Vec<Collect>,
    /// Host collectors
    pub host_collectors: Vec<HostCollect>,
    /// Cluster analyzers
    pub analyzers: Vec<Analyze>,
    /// Host analyzers
    pub host_analyzers: Vec<HostAnalyze>,
    /// Redactor rules from every source
    pub redactors: Vec<RedactSpec>,
    /// Non-fatal findings from loading and merging
    pub warnings: Vec<String>,
    /// Field-level merge conflicts
    pub conflicts: Vec<SpecConflict>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_variants_deserialize_from_tagged_yaml() {
        let yaml = r#"
- clusterInfo: {}
- logs:
    namespace: demo
    selector:
      - app=web
    limits:
      maxLines: 500
- secret:
    name: db-credentials
    namespace: demo
    key: password
"#;
        let collectors: Vec<Collect> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(collectors.len(), 3);
        assert_eq!(collectors[0].variant(), "clusterInfo");
        match &collectors[1] {
            Collect::Logs(logs) => {
                assert_eq!(logs.namespace.as_deref(), Some("demo"));
                assert_eq!(logs.selector, vec!["app=web"]);
                assert_eq!(logs.limits.as_ref().unwrap().max_lines, Some(500));
            }
            other => panic!("expected logs collector, got {other:?}"),
        }
        assert_eq!(collectors[2].variant(), "secret");
    }

    #[test]
    fn outcomes_preserve_declaration_order() {
        let yaml = r#"
- fail:
    when: "< 1"
    message: down
- pass:
    message: ok
"#;
        let outcomes: Vec<Outcome> = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(outcomes[0], Outcome::Fail(_)));
        assert!(matches!(outcomes[1], Outcome::Pass(_)));
        assert_eq!(outcomes[0].spec().when.as_deref(), Some("< 1"));
        assert!(outcomes[1].spec().when.is_none());
    }

    #[test]
    fn bool_string_accepts_both_spellings() {
        assert!(BoolString::Bool(true).evaluate().unwrap());
        assert!(BoolString::String("True".into()).evaluate().unwrap());
        assert!(!BoolString::String(String::new()).evaluate().unwrap());
        assert!(BoolString::String("maybe".into()).evaluate().is_err());
    }

    #[test]
    fn merge_key_includes_namespace_when_present() {
        let doc = TroubleshootDoc::SupportBundle(
            Metadata {
                name: Some("app".into()),
                namespace: Some("demo".into()),
                ..Metadata::default()
            },
            SupportBundleSpec::default(),
        );
        assert_eq!(doc.merge_key(), "SupportBundle/app/demo");
    }

    #[test]
    fn redact_spec_roundtrips() {
        let yaml = r#"
name: strip-tokens
fileSelector:
  files:
    - "cluster-resources/**"
removals:
  values:
    - sk-XYZ
  regex:
    - selector: "token"
      redactor: "token=(?P<mask>\\S+)"
  yamlPath:
    - data.password
"#;
        let spec: RedactSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.name.as_deref(), Some("strip-tokens"));
        assert_eq!(spec.removals.values, vec!["sk-XYZ"]);
        assert_eq!(spec.removals.regex[0].selector.as_deref(), Some("token"));
        assert_eq!(spec.removals.yaml_path, vec!["data.password"]);
    }
}
