//! Shared CLI plumbing for the `support-bundle` and `preflight` binaries.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Args;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::analyze::AnalyzeResult;
use crate::api::PipelineOptions;
use crate::core::context::{ProgressEvent, ProgressSender, PullPolicy, RunOptions};
use crate::core::errors::PeriscopeError;

/// Process exit codes shared by both binaries.
pub mod exit {
    /// Clean run
    pub const SUCCESS: i32 = 0;
    /// Unclassified failure
    pub const GENERIC: i32 = 1;
    /// Bad invocation
    pub const USAGE: i32 = 2;
    /// Cluster or URL fetch failure
    pub const NETWORK: i32 = 3;
    /// Spec parse/convert/validate failure
    pub const SCHEMA: i32 = 4;
    /// Server API incompatible with the requested collection
    pub const INCOMPATIBLE_API: i32 = 5;
    /// Self-update failed
    pub const UPDATE_FAILED: i32 = 6;
    /// RBAC pre-check denied and permissive mode off
    pub const PERMISSION_DENIED: i32 = 7;
    /// Collectors or analyzers had non-fatal failures
    pub const PARTIAL: i32 = 8;
}

/// Map a pipeline error onto the exit code table.
pub fn exit_code_for(error: &PeriscopeError) -> i32 {
    match error {
        PeriscopeError::Spec { .. } => exit::SCHEMA,
        PeriscopeError::Network { .. } => exit::NETWORK,
        PeriscopeError::Rbac { .. } => exit::PERMISSION_DENIED,
        _ => exit::GENERIC,
    }
}

/// Flags shared by both binaries. `TROUBLESHOOT_*` environment variables
/// map onto the hyphenated flags.
#[derive(Debug, Args)]
pub struct SharedArgs {
    /// Spec locators: path, URL, secret/<ns>/<name>, configmap/<ns>/<name>,
    /// oci://..., or - for stdin
    #[arg(value_name = "SPEC")]
    pub specs: Vec<String>,

    /// Additional redactor spec locators
    #[arg(long = "redactors", env = "TROUBLESHOOT_REDACTORS", value_delimiter = ',')]
    pub redactors: Vec<String>,

    /// Enable the built-in default redaction rules
    #[arg(long, env = "TROUBLESHOOT_REDACT", default_value_t = true, action = clap::ArgAction::Set)]
    pub redact: bool,

    /// Namespace for in-cluster spec discovery
    #[arg(long, short = 'n', env = "TROUBLESHOOT_NAMESPACE")]
    pub namespace: Option<String>,

    /// Label selector for spec discovery in cluster secrets/configmaps
    #[arg(long, short = 'l', env = "TROUBLESHOOT_SELECTOR")]
    pub selector: Option<String>,

    /// Continue collection and record RBAC denials instead of aborting
    #[arg(long, env = "TROUBLESHOOT_COLLECT_WITHOUT_PERMISSIONS")]
    pub collect_without_permissions: bool,

    /// Image override for run-pod and copy-from-host workloads
    #[arg(long, env = "TROUBLESHOOT_COLLECTOR_IMAGE")]
    pub collector_image: Option<String>,

    /// Pull policy for collector workloads
    #[arg(long, env = "TROUBLESHOOT_COLLECTOR_PULLPOLICY", value_parser = parse_pull_policy)]
    pub collector_pullpolicy: Option<PullPolicy>,

    /// Collect logs newer than this duration (e.g. 24h)
    #[arg(long, env = "TROUBLESHOOT_SINCE")]
    pub since: Option<String>,

    /// Collect logs newer than this RFC 3339 timestamp
    #[arg(long, env = "TROUBLESHOOT_SINCE_TIME")]
    pub since_time: Option<String>,

    /// Output path for the archive
    #[arg(long, short = 'o', env = "TROUBLESHOOT_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Accepted for compatibility; progress renders as plain lines
    #[arg(long, env = "TROUBLESHOOT_INTERACTIVE")]
    pub interactive: bool,

    /// Verbose diagnostics
    #[arg(long, env = "TROUBLESHOOT_DEBUG")]
    pub debug: bool,
}

fn parse_pull_policy(raw: &str) -> Result<PullPolicy, String> {
    match raw {
        "IfNotPresent" => Ok(PullPolicy::IfNotPresent),
        "Always" => Ok(PullPolicy::Always),
        "Never" => Ok(PullPolicy::Never),
        other => Err(format!("unknown pull policy {other:?}")),
    }
}

impl SharedArgs {
    /// Resolve the global log-collection start offset.
    pub fn since(&self) -> Result<Option<DateTime<Utc>>, PeriscopeError> {
        if let Some(raw) = &self.since_time {
            let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| {
                PeriscopeError::spec("", "invalid-since-time", format!("{raw:?}: {e}"))
            })?;
            return Ok(Some(parsed.with_timezone(&Utc)));
        }
        if let Some(raw) = &self.since {
            let duration = humantime::parse_duration(raw).map_err(|e| {
                PeriscopeError::spec("", "invalid-since", format!("{raw:?}: {e}"))
            })?;
            let duration = chrono::Duration::from_std(duration).map_err(|e| {
                PeriscopeError::spec("", "invalid-since", format!("{raw:?}: {e}"))
            })?;
            return Ok(Some(Utc::now() - duration));
        }
        Ok(None)
    }

    /// Build pipeline options, wiring a progress printer onto stderr.
    pub fn pipeline_options(&self) -> Result<(PipelineOptions, ProgressTask), PeriscopeError> {
        let run = RunOptions {
            collect_without_permissions: self.collect_without_permissions,
            since: self.since()?,
            collector_image: self.collector_image.clone(),
            collector_pull_policy: self.collector_pullpolicy.unwrap_or_default(),
            ..RunOptions::default()
        };

        let (tx, rx) = mpsc::channel(64);
        let task = ProgressTask::spawn(rx);

        let options = PipelineOptions {
            redact_defaults: self.redact,
            redactor_uris: self.redactors.clone(),
            output: self.output.clone(),
            namespace: self.namespace.clone(),
            discovery_selector: self.selector.clone(),
            archive_timestamp: None,
            run,
            progress: ProgressSender::new(tx),
        };
        Ok((options, task))
    }
}

/// Background task rendering progress events onto stderr.
pub struct ProgressTask {
    handle: tokio::task::JoinHandle<()>,
}

impl ProgressTask {
    fn spawn(mut rx: mpsc::Receiver<ProgressEvent>) -> Self {
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match &event.detail {
                    Some(detail) => {
                        eprintln!("  [{:?}] {}: {detail}", event.phase, event.title)
                    }
                    None => eprintln!("  [{:?}] {}", event.phase, event.title),
                }
            }
        });
        Self { handle }
    }

    /// Stop rendering (the channel sender side must be dropped first).
    pub async fn finish(self) {
        let _ = self.handle.await;
    }
}

/// Initialize tracing for a binary.
pub fn init_tracing(debug: bool) {
    let default_filter = if debug { "periscope=debug" } else { "periscope=warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Render analyzer verdicts as a human-readable table on stdout.
pub fn print_analysis(results: &[AnalyzeResult]) {
    for result in results {
        let marker = if result.is_fail {
            "FAIL"
        } else if result.is_warn {
            "WARN"
        } else {
            "PASS"
        };
        println!("[{marker}] {}: {}", result.title, result.message);
        if let Some(uri) = &result.uri {
            println!("       see {uri}");
        }
    }
}
