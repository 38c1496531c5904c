//! Pod-log consolidation.
//!
//! A single long-lived task owns the canonical log location
//! `cluster-resources/pods/logs/<ns>/<pod>/<container>.log`. Collectors
//! advertise pods of interest on a bounded channel; the consolidator lists,
//! dedupes by (namespace, pod, container), fetches each log exactly once,
//! and streams it through redaction into the store. The scheduler closes
//! the channel after all collectors complete; remaining requests drain
//! before the task exits.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bundle::store::BundleStore;
use crate::cluster::LogOptions;
use crate::collect::{write_redacted, Payload};
use crate::core::context::{ProgressPhase, RunContext};
use crate::core::errors::{PeriscopeError, Result};
use crate::redact::{RedactionReport, Redactors};

/// Default per-container line cap when a request does not set one.
pub const DEFAULT_MAX_LINES: i64 = 10_000;

/// Channel capacity; senders may block briefly when the consolidator lags.
pub const CHANNEL_CAPACITY: usize = 32;

/// One request for container logs.
#[derive(Debug, Clone, Default)]
pub struct PodLogRequest {
    /// Namespace to fetch from
    pub namespace: String,
    /// Explicit pod name; mutually exclusive with `selector`
    pub pod: Option<String>,
    /// Label selector fanout: matching pods are listed first
    pub selector: Option<String>,
    /// Restrict to these containers; empty = all containers of the pod
    pub containers: Vec<String>,
    /// Per-container line cap; defaults to [`DEFAULT_MAX_LINES`]
    pub max_lines: Option<i64>,
    /// Only entries newer than this many seconds
    pub since_seconds: Option<i64>,
    /// Fetch the previous container instance
    pub previous: bool,
}

/// Sending side handed to collectors. A collector that has declared
/// completion must not send again; the send fails once the scheduler closes
/// the channel.
#[derive(Clone)]
pub struct PodLogSink {
    tx: mpsc::Sender<PodLogRequest>,
}

impl PodLogSink {
    /// Advertise a pod of interest. Blocks briefly under backpressure.
    pub async fn send(&self, request: PodLogRequest) -> Result<()> {
        self.tx.send(request).await.map_err(|_| {
            PeriscopeError::internal("pod-log request sent after collection completed")
        })
    }
}

/// What the consolidator did, for the run summary.
#[derive(Debug, Default)]
pub struct PodLogSummary {
    /// Number of log files fetched and written
    pub fetched: usize,
    /// Fetch failures, recorded not fatal
    pub errors: Vec<String>,
}

/// Start the consolidator task. Returns the collector-facing sink and the
/// join handle resolving to a summary once the channel drains.
pub fn start(
    ctx: Arc<RunContext>,
    store: Arc<BundleStore>,
    redactors: Arc<Redactors>,
    report: Arc<parking_lot::Mutex<RedactionReport>>,
) -> (PodLogSink, tokio::task::JoinHandle<PodLogSummary>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(consolidate(ctx, store, redactors, report, rx));
    (PodLogSink { tx }, handle)
}

async fn consolidate(
    ctx: Arc<RunContext>,
    store: Arc<BundleStore>,
    redactors: Arc<Redactors>,
    report: Arc<parking_lot::Mutex<RedactionReport>>,
    mut rx: mpsc::Receiver<PodLogRequest>,
) -> PodLogSummary {
    // The dedup set is owned by this task alone.
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    let mut summary = PodLogSummary::default();

    while let Some(request) = rx.recv().await {
        if ctx.cancel.is_cancelled() {
            // Keep draining so senders never block on a dead channel.
            continue;
        }
        if let Err(e) = handle_request(
            &ctx, &store, &redactors, &report, &mut seen, &mut summary, request,
        )
        .await
        {
            summary.errors.push(e.to_string());
        }
    }

    debug!(
        fetched = summary.fetched,
        errors = summary.errors.len(),
        "pod-log consolidator drained"
    );
    summary
}

async fn handle_request(
    ctx: &Arc<RunContext>,
    store: &Arc<BundleStore>,
    redactors: &Arc<Redactors>,
    report: &Arc<parking_lot::Mutex<RedactionReport>>,
    seen: &mut HashSet<(String, String, String)>,
    summary: &mut PodLogSummary,
    request: PodLogRequest,
) -> Result<()> {
    // Selector fanout: list matching pods first.
    let pods = match (&request.pod, &request.selector) {
        (Some(pod), _) => {
            let all = ctx.cluster.list_pods(Some(&request.namespace), None).await?;
            all.into_iter().filter(|p| &p.name == pod).collect()
        }
        (None, Some(selector)) => {
            ctx.cluster
                .list_pods(Some(&request.namespace), Some(selector))
                .await?
        }
        (None, None) => Vec::new(),
    };

    for pod in pods {
        let containers: Vec<String> = if request.containers.is_empty() {
            pod.containers.clone()
        } else {
            pod.containers
                .iter()
                .filter(|c| request.containers.contains(c))
                .cloned()
                .collect()
        };

        for container in containers {
            let key = (pod.namespace.clone(), pod.name.clone(), container.clone());
            if !seen.insert(key) {
                debug!(
                    pod = %pod.name,
                    container = %container,
                    "log already fetched; skipping duplicate request"
                );
                continue;
            }

            let options = LogOptions {
                tail_lines: Some(request.max_lines.unwrap_or(DEFAULT_MAX_LINES)),
                since_seconds: request.since_seconds.or_else(|| {
                    ctx.options
                        .since
                        .map(|since| (Utc::now() - since).num_seconds().max(0))
                }),
                previous: request.previous,
            };

            let path = format!(
                "cluster-resources/pods/logs/{}/{}/{}.log",
                pod.namespace, pod.name, container
            );
            match ctx
                .cluster
                .pod_logs(&pod.namespace, &pod.name, &container, &options)
                .await
            {
                Ok(stream) => {
                    write_redacted(store, redactors, report, &path, Payload::Reader(stream))
                        .await?;
                    summary.fetched += 1;
                    ctx.progress.emit(
                        ProgressPhase::PodLogs,
                        format!("{}/{}/{}", pod.namespace, pod.name, container),
                        None,
                    );
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "log fetch failed");
                    summary
                        .errors
                        .push(format!("{}/{}/{}: {e}", pod.namespace, pod.name, container));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::core::context::{RunContext, RunOptions};

    fn harness(
        cluster: Arc<FakeCluster>,
    ) -> (
        Arc<RunContext>,
        Arc<BundleStore>,
        Arc<Redactors>,
        Arc<parking_lot::Mutex<RedactionReport>>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BundleStore::open(dir.path()).unwrap());
        let ctx = Arc::new(RunContext::new(cluster, RunOptions::default()));
        (
            ctx,
            store,
            Arc::new(Redactors::none()),
            Arc::new(parking_lot::Mutex::new(RedactionReport::default())),
            dir,
        )
    }

    #[tokio::test]
    async fn selector_fanout_fetches_every_container_once() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_pod("demo", "web-1", &[("app", "web")], &["nginx", "sidecar"])
                .with_pod_logs("demo", "web-1", "nginx", "nginx logs\n")
                .with_pod_logs("demo", "web-1", "sidecar", "sidecar logs\n"),
        );
        let (ctx, store, redactors, report, _dir) = harness(Arc::clone(&cluster));
        let (sink, handle) = start(ctx, Arc::clone(&store), redactors, report);

        sink.send(PodLogRequest {
            namespace: "demo".into(),
            selector: Some("app=web".into()),
            ..PodLogRequest::default()
        })
        .await
        .unwrap();
        drop(sink);

        let summary = handle.await.unwrap();
        assert_eq!(summary.fetched, 2);
        assert!(summary.errors.is_empty());
        use crate::bundle::store::BundleReader;
        assert_eq!(
            store
                .read("cluster-resources/pods/logs/demo/web-1/nginx.log")
                .unwrap(),
            b"nginx logs\n"
        );
    }

    #[tokio::test]
    async fn duplicate_requests_from_different_sources_fetch_once() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_pod("rook-a", "monitor", &[("app", "rook-ceph-mon")], &["mon"])
                .with_pod_logs("rook-a", "monitor", "mon", "mon log\n"),
        );
        let (ctx, store, redactors, report, _dir) = harness(Arc::clone(&cluster));
        let (sink, handle) = start(ctx, store, redactors, report);

        // One collector asks by name, another by selector.
        sink.send(PodLogRequest {
            namespace: "rook-a".into(),
            pod: Some("monitor".into()),
            ..PodLogRequest::default()
        })
        .await
        .unwrap();
        sink.send(PodLogRequest {
            namespace: "rook-a".into(),
            selector: Some("app=rook-ceph-mon".into()),
            ..PodLogRequest::default()
        })
        .await
        .unwrap();
        drop(sink);

        let summary = handle.await.unwrap();
        assert_eq!(summary.fetched, 1);
        assert_eq!(cluster.log_fetch_count(), 1);
    }

    #[tokio::test]
    async fn fetch_errors_are_recorded_not_fatal() {
        let cluster = Arc::new(
            // Pod exists but no logs were seeded: fetch fails.
            FakeCluster::new().with_pod("demo", "web-1", &[("app", "web")], &["nginx"]),
        );
        let (ctx, store, redactors, report, _dir) = harness(cluster);
        let (sink, handle) = start(ctx, store, redactors, report);

        sink.send(PodLogRequest {
            namespace: "demo".into(),
            pod: Some("web-1".into()),
            ..PodLogRequest::default()
        })
        .await
        .unwrap();
        drop(sink);

        let summary = handle.await.unwrap();
        assert_eq!(summary.fetched, 0);
        assert_eq!(summary.errors.len(), 1);
    }

    #[tokio::test]
    async fn container_filter_restricts_fetches() {
        let cluster = Arc::new(
            FakeCluster::new()
                .with_pod("demo", "web-1", &[("app", "web")], &["nginx", "sidecar"])
                .with_pod_logs("demo", "web-1", "nginx", "nginx\n")
                .with_pod_logs("demo", "web-1", "sidecar", "sidecar\n"),
        );
        let (ctx, store, redactors, report, _dir) = harness(cluster);
        let (sink, handle) = start(ctx, store, redactors, report);

        sink.send(PodLogRequest {
            namespace: "demo".into(),
            pod: Some("web-1".into()),
            containers: vec!["nginx".into()],
            ..PodLogRequest::default()
        })
        .await
        .unwrap();
        drop(sink);

        assert_eq!(handle.await.unwrap().fetched, 1);
    }
}
