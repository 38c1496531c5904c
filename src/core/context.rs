//! Run-scoped context threaded through collectors, the consolidator, and
//! the analyzer engine.
//!
//! A single [`RunContext`] carries cancellation, the run deadline, the
//! progress channel, and the shared cluster handle. No globals are consulted
//! mid-run; collectors must call [`RunContext::checkpoint`] at every I/O
//! boundary so cancellation and deadline expiry propagate promptly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterAccess;
use crate::core::errors::{PeriscopeError, Result};

/// Pipeline phase attached to progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    /// RBAC pre-checks before any collection I/O
    Rbac,
    /// Collector execution
    Collect,
    /// Pod-log consolidation
    PodLogs,
    /// Redaction fallbacks and warnings
    Redact,
    /// Analyzer evaluation
    Analyze,
    /// Archive finalization
    Archive,
}

/// A single progress event broadcast to the host.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressEvent {
    /// Pipeline phase the event belongs to
    pub phase: ProgressPhase,
    /// Collector or analyzer title the event concerns
    pub title: String,
    /// Optional free-form detail
    pub detail: Option<String>,
}

/// Non-blocking progress sender. Events are dropped when no listener is
/// attached or the channel is full.
#[derive(Debug, Clone, Default)]
pub struct ProgressSender {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSender {
    /// A sender that forwards events into the given channel.
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sender that discards all events.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an event. Never blocks; silently drops when unobserved.
    pub fn emit(&self, phase: ProgressPhase, title: impl Into<String>, detail: Option<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(ProgressEvent {
                phase,
                title: title.into(),
                detail,
            });
        }
    }
}

/// Image pull policy applied to workloads launched by collectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    /// Pull when the image is not present on the node
    #[default]
    IfNotPresent,
    /// Always pull
    Always,
    /// Never pull
    Never,
}

impl PullPolicy {
    /// Kubernetes manifest spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IfNotPresent => "IfNotPresent",
            Self::Always => "Always",
            Self::Never => "Never",
        }
    }
}

/// Options applied to a single pipeline run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Continue and record denials instead of aborting on RBAC failures
    pub collect_without_permissions: bool,
    /// Abort the run on the first collector failure
    pub strict: bool,
    /// Maximum number of collectors in flight
    pub parallelism: usize,
    /// Run-level deadline applied to all collectors
    pub timeout: Option<Duration>,
    /// Global log-collection start offset
    pub since: Option<DateTime<Utc>>,
    /// Image override for run-pod and copy-from-host workloads
    pub collector_image: Option<String>,
    /// Pull policy for collector workloads
    pub collector_pull_policy: PullPolicy,
    /// Buffer cap for structured-document redaction, in bytes
    pub redact_buffer_limit: usize,
    /// Namespaces the run is scoped to; empty = all reachable
    pub namespaces: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            collect_without_permissions: false,
            strict: false,
            parallelism: 4,
            timeout: None,
            since: None,
            collector_image: None,
            collector_pull_policy: PullPolicy::default(),
            redact_buffer_limit: 16 * 1024 * 1024,
            namespaces: Vec::new(),
        }
    }
}

/// Per-run scope carrying cancellation, deadline, progress, and the shared
/// cluster handle into every collector and the log consolidator.
pub struct RunContext {
    /// Shared read-only cluster access
    pub cluster: Arc<dyn ClusterAccess>,
    /// Cooperative cancellation for every task in the run
    pub cancel: CancellationToken,
    /// Absolute deadline derived from `options.timeout` at run start
    pub deadline: Option<Instant>,
    /// Progress channel to the host
    pub progress: ProgressSender,
    /// Run options
    pub options: RunOptions,
}

impl RunContext {
    /// Build a context for a new run. The deadline is pinned here so every
    /// collector observes the same absolute expiry.
    pub fn new(cluster: Arc<dyn ClusterAccess>, options: RunOptions) -> Self {
        let deadline = options.timeout.map(|t| Instant::now() + t);
        Self {
            cluster,
            cancel: CancellationToken::new(),
            deadline,
            progress: ProgressSender::disabled(),
            options,
        }
    }

    /// Attach a progress sender.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = progress;
        self
    }

    /// Fail fast when the run was cancelled or the deadline has passed.
    /// Collectors call this at every suspension point.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PeriscopeError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(PeriscopeError::timeout("run deadline"));
            }
        }
        Ok(())
    }

    /// Time left before the run deadline, if one was set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Effective timeout for one collector: the per-collector override may
    /// shorten the run-level deadline but never extend it.
    pub fn collector_timeout(&self, per_collector: Option<Duration>) -> Option<Duration> {
        match (self.remaining(), per_collector) {
            (Some(run), Some(own)) => Some(run.min(own)),
            (Some(run), None) => Some(run),
            (None, own) => own,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;

    fn test_context(options: RunOptions) -> RunContext {
        RunContext::new(Arc::new(FakeCluster::new()), options)
    }

    #[test]
    fn checkpoint_passes_for_fresh_context() {
        let ctx = test_context(RunOptions::default());
        assert!(ctx.checkpoint().is_ok());
    }

    #[test]
    fn checkpoint_fails_after_cancel() {
        let ctx = test_context(RunOptions::default());
        ctx.cancel.cancel();
        assert!(matches!(ctx.checkpoint(), Err(PeriscopeError::Cancelled)));
    }

    #[test]
    fn checkpoint_distinguishes_timeout_from_cancel() {
        let ctx = test_context(RunOptions {
            timeout: Some(Duration::ZERO),
            ..RunOptions::default()
        });
        assert!(matches!(
            ctx.checkpoint(),
            Err(PeriscopeError::Timeout { .. })
        ));
    }

    #[test]
    fn collector_timeout_never_extends_run_deadline() {
        let ctx = test_context(RunOptions {
            timeout: Some(Duration::from_secs(10)),
            ..RunOptions::default()
        });
        let capped = ctx
            .collector_timeout(Some(Duration::from_secs(300)))
            .unwrap();
        assert!(capped <= Duration::from_secs(10));

        let shortened = ctx.collector_timeout(Some(Duration::from_secs(1))).unwrap();
        assert!(shortened <= Duration::from_secs(1));
    }

    #[test]
    fn progress_sender_drops_without_listener() {
        let sender = ProgressSender::disabled();
        sender.emit(ProgressPhase::Collect, "cluster-info", None);

        let (tx, mut rx) = mpsc::channel(1);
        let sender = ProgressSender::new(tx);
        sender.emit(ProgressPhase::Collect, "cluster-info", None);
        sender.emit(ProgressPhase::Collect, "overflow", None); // dropped, channel full
        assert_eq!(rx.try_recv().unwrap().title, "cluster-info");
        assert!(rx.try_recv().is_err());
    }
}
