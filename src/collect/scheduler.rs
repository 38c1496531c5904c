//! The collection scheduler.
//!
//! Drives collectors with bounded parallelism after an RBAC pre-check
//! phase. Collector failures are recorded to `<collector>/errors.json` and
//! the progress channel; the run only aborts on failure when `strict` was
//! requested. The pod-log consolidator outlives the collectors and drains
//! after the scheduler closes its channel.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bundle::store::BundleStore;
use crate::collect::podlogs::{self, PodLogSummary};
use crate::collect::{
    build_collectors, merge_collect_specs, write_redacted, CollectEnv, Collector,
};
use crate::core::context::{ProgressPhase, RunContext};
use crate::core::errors::{PeriscopeError, RbacDenial, Result};
use crate::core::spec::types::Collect;
use crate::redact::{RedactionReport, Redactors};

/// One recorded collector failure.
#[derive(Debug, serde::Serialize)]
pub struct CollectorFailure {
    /// Collector title
    pub collector: String,
    /// Rendered error
    pub error: String,
}

/// A path claimed by two collectors with differing content. The first
/// writer wins; the loser is recorded here.
#[derive(Debug, serde::Serialize)]
pub struct ConflictRecord {
    /// Bundle-relative path
    pub path: String,
    /// Collector whose write lost
    pub collector: String,
}

/// Summary of one collection run.
#[derive(Debug, Default)]
pub struct CollectionOutcome {
    /// RBAC denials (only populated in permissive mode; otherwise fatal)
    pub denied: Vec<RbacDenial>,
    /// Titles of excluded collectors
    pub excluded: Vec<String>,
    /// Titles of collectors skipped for missing permissions
    pub skipped_rbac: Vec<String>,
    /// Recorded collector failures
    pub failures: Vec<CollectorFailure>,
    /// Path conflicts resolved by first-write-wins
    pub conflicts: Vec<ConflictRecord>,
    /// What the pod-log consolidator did
    pub pod_logs: PodLogSummary,
}

impl CollectionOutcome {
    /// Whether anything non-fatal went wrong (drives exit code 8).
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() || !self.conflicts.is_empty() || !self.pod_logs.errors.is_empty()
    }
}

/// Run the full collection phase against the store.
pub async fn run_collection(
    specs: &[Collect],
    ctx: Arc<RunContext>,
    store: Arc<BundleStore>,
    redactors: Arc<Redactors>,
    report: Arc<Mutex<RedactionReport>>,
) -> Result<CollectionOutcome> {
    let merged = merge_collect_specs(specs);
    let collectors = build_collectors(&merged, &ctx.options);
    let mut outcome = CollectionOutcome::default();

    // Exclusion pass: absence is recorded, never silent.
    let mut runnable: Vec<Box<dyn Collector>> = Vec::new();
    for collector in collectors {
        if collector.is_excluded()? {
            debug!(collector = %collector.title(), "excluded by spec predicate");
            outcome.excluded.push(collector.title());
        } else {
            runnable.push(collector);
        }
    }

    // RBAC pre-check phase: gather every denial before any collection I/O.
    let mut denials_by_collector: Vec<Vec<RbacDenial>> = Vec::with_capacity(runnable.len());
    let mut all_denials: Vec<RbacDenial> = Vec::new();
    for collector in &runnable {
        ctx.progress
            .emit(ProgressPhase::Rbac, collector.title(), None);
        let denials = collector.check_rbac(&ctx).await?;
        for denial in &denials {
            if !all_denials.contains(denial) {
                all_denials.push(denial.clone());
            }
        }
        denials_by_collector.push(denials);
    }

    if !all_denials.is_empty() {
        if !ctx.options.collect_without_permissions {
            return Err(PeriscopeError::Rbac {
                denied: all_denials,
            });
        }
        // Permissive: drop the denied collectors and record everything.
        let mut kept = Vec::new();
        for (collector, denials) in runnable.into_iter().zip(denials_by_collector) {
            if denials.is_empty() {
                kept.push(collector);
            } else {
                info!(collector = %collector.title(), "skipped: missing permissions");
                outcome.skipped_rbac.push(collector.title());
            }
        }
        runnable = kept;
        outcome.denied = all_denials;
    }

    // Consolidator starts before any collector and outlives them all.
    let (sink, consolidator) = podlogs::start(
        Arc::clone(&ctx),
        Arc::clone(&store),
        Arc::clone(&redactors),
        Arc::clone(&report),
    );

    // Priority collectors (cluster-resources) run to completion first; their
    // output is referenced by other collectors and by analyzers.
    let (first, rest): (Vec<_>, Vec<_>) = runnable.into_iter().partition(|c| c.runs_first());

    let run_result = async {
        run_group(first, &ctx, &store, &redactors, &report, &sink, &mut outcome).await?;
        run_group(rest, &ctx, &store, &redactors, &report, &sink, &mut outcome).await
    }
    .await;

    // Close the channel so the consolidator drains and exits, even when the
    // collect phase failed.
    drop(sink);
    let pod_log_summary = consolidator
        .await
        .map_err(|e| PeriscopeError::internal(format!("consolidator task failed: {e}")))?;
    outcome.pod_logs = pod_log_summary;
    run_result?;

    write_run_records(&ctx, &store, &redactors, &report, &outcome).await?;
    Ok(outcome)
}

/// Run one group of collectors with bounded parallelism.
async fn run_group(
    collectors: Vec<Box<dyn Collector>>,
    ctx: &Arc<RunContext>,
    store: &Arc<BundleStore>,
    redactors: &Arc<Redactors>,
    report: &Arc<Mutex<RedactionReport>>,
    sink: &podlogs::PodLogSink,
    outcome: &mut CollectionOutcome,
) -> Result<()> {
    if collectors.is_empty() {
        return Ok(());
    }
    let limiter = Arc::new(Semaphore::new(ctx.options.parallelism.max(1)));
    let mut tasks: JoinSet<(String, String, Result<Vec<ConflictRecord>>)> = JoinSet::new();

    for collector in collectors {
        let ctx = Arc::clone(ctx);
        let store = Arc::clone(store);
        let redactors = Arc::clone(redactors);
        let report = Arc::clone(report);
        let limiter = Arc::clone(&limiter);
        let env = CollectEnv {
            ctx: Arc::clone(&ctx),
            pod_logs: sink.clone(),
        };

        tasks.spawn(async move {
            let title = collector.title();
            let slug = collector.slug();
            let _permit = limiter.acquire_owned().await;
            let result = run_one(collector, env, ctx, store, redactors, report).await;
            (title, slug, result)
        });
    }

    let mut first_error: Option<PeriscopeError> = None;
    while let Some(joined) = tasks.join_next().await {
        let (title, slug, result) = joined
            .map_err(|e| PeriscopeError::internal(format!("collector task panicked: {e}")))?;
        match result {
            Ok(mut conflicts) => {
                ctx.progress.emit(ProgressPhase::Collect, title, None);
                outcome.conflicts.append(&mut conflicts);
            }
            Err(PeriscopeError::Cancelled) => {
                if first_error.is_none() {
                    first_error = Some(PeriscopeError::Cancelled);
                }
            }
            Err(e) => {
                warn!(collector = %title, error = %e, "collector failed");
                ctx.progress
                    .emit(ProgressPhase::Collect, title.clone(), Some(e.to_string()));
                let record = serde_json::json!({ "errors": [e.to_string()] });
                let payload = crate::collect::Payload::json(&record)?;
                write_redacted(
                    store,
                    redactors,
                    report,
                    &format!("{slug}/errors.json"),
                    payload,
                )
                .await?;
                outcome.failures.push(CollectorFailure {
                    collector: title,
                    error: e.to_string(),
                });
                if ctx.options.strict {
                    ctx.cancel.cancel();
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Run one collector under its effective deadline and write its results.
async fn run_one(
    collector: Box<dyn Collector>,
    env: CollectEnv,
    ctx: Arc<RunContext>,
    store: Arc<BundleStore>,
    redactors: Arc<Redactors>,
    report: Arc<Mutex<RedactionReport>>,
) -> Result<Vec<ConflictRecord>> {
    ctx.checkpoint()?;
    let title = collector.title();
    debug!(collector = %title, "collecting");

    let deadline = ctx.collector_timeout(collector.requested_timeout());
    let collect_fut = collector.collect(&env);
    let result = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(PeriscopeError::Cancelled),
        result = async {
            match deadline {
                Some(limit) => tokio::time::timeout(limit, collect_fut)
                    .await
                    .map_err(|_| PeriscopeError::timeout(format!("collector {title}")))?,
                None => collect_fut.await,
            }
        } => result,
    }?;

    let mut conflicts = Vec::new();
    for (path, payload) in result {
        ctx.checkpoint()?;
        match write_redacted(&store, &redactors, &report, &path, payload).await {
            Ok(()) => {}
            Err(PeriscopeError::BundleConflict { path }) => {
                warn!(path = %path, collector = %title, "bundle path conflict; first write wins");
                conflicts.push(ConflictRecord {
                    path,
                    collector: title.clone(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(conflicts)
}

/// Persist run-level records: RBAC denials, path conflicts, pod-log fetch
/// errors, and the redaction report.
async fn write_run_records(
    _ctx: &Arc<RunContext>,
    store: &Arc<BundleStore>,
    redactors: &Arc<Redactors>,
    report: &Arc<Mutex<RedactionReport>>,
    outcome: &CollectionOutcome,
) -> Result<()> {
    if !outcome.denied.is_empty() {
        let body = serde_json::json!({
            "denied": outcome.denied,
            "skippedCollectors": outcome.skipped_rbac,
        });
        let payload = crate::collect::Payload::json(&body)?;
        write_redacted(store, redactors, report, "rbac-errors.json", payload).await?;
    }
    if !outcome.conflicts.is_empty() {
        let payload = crate::collect::Payload::json(&outcome.conflicts)?;
        write_redacted(store, redactors, report, "conflicted-paths.json", payload).await?;
    }
    if !outcome.pod_logs.errors.is_empty() {
        let body = serde_json::json!({ "errors": outcome.pod_logs.errors });
        let payload = crate::collect::Payload::json(&body)?;
        write_redacted(
            store,
            redactors,
            report,
            "cluster-resources/pods/logs/errors.json",
            payload,
        )
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::store::BundleReader;
    use crate::cluster::fake::FakeCluster;
    use crate::core::context::{RunContext, RunOptions};
    use crate::core::spec::types::{Collect, DataCollect, LogsCollect, SecretCollect};

    struct Harness {
        ctx: Arc<RunContext>,
        store: Arc<BundleStore>,
        redactors: Arc<Redactors>,
        report: Arc<Mutex<RedactionReport>>,
        _dir: tempfile::TempDir,
    }

    fn harness(cluster: FakeCluster, options: RunOptions) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        Harness {
            ctx: Arc::new(RunContext::new(Arc::new(cluster), options)),
            store: Arc::new(BundleStore::open(dir.path()).unwrap()),
            redactors: Arc::new(Redactors::none()),
            report: Arc::new(Mutex::new(RedactionReport::default())),
            _dir: dir,
        }
    }

    async fn run(h: &Harness, specs: &[Collect]) -> Result<CollectionOutcome> {
        run_collection(
            specs,
            Arc::clone(&h.ctx),
            Arc::clone(&h.store),
            Arc::clone(&h.redactors),
            Arc::clone(&h.report),
        )
        .await
    }

    #[tokio::test]
    async fn rbac_denial_aborts_before_collection_when_strict_on_permissions() {
        let cluster = FakeCluster::new().deny("get", "secrets");
        let h = harness(cluster, RunOptions::default());
        let specs = vec![Collect::Secret(SecretCollect {
            name: "db-credentials".into(),
            namespace: Some("demo".into()),
            ..SecretCollect::default()
        })];

        let err = run(&h, &specs).await.unwrap_err();
        match err {
            PeriscopeError::Rbac { denied } => {
                assert!(denied.iter().any(|d| d.resource == "secrets"));
            }
            other => panic!("expected rbac error, got {other:?}"),
        }
        // No bundle content was produced beyond nothing at all.
        assert_eq!(h.store.file_count(), 0);
    }

    #[tokio::test]
    async fn permissive_mode_records_denials_and_continues() {
        let cluster = FakeCluster::new().deny("get", "secrets");
        let h = harness(
            cluster,
            RunOptions {
                collect_without_permissions: true,
                ..RunOptions::default()
            },
        );
        let specs = vec![
            Collect::Secret(SecretCollect {
                name: "db-credentials".into(),
                namespace: Some("demo".into()),
                ..SecretCollect::default()
            }),
            Collect::Data(DataCollect {
                name: "notes.txt".into(),
                data: "hello".into(),
                ..DataCollect::default()
            }),
        ];

        let outcome = run(&h, &specs).await.unwrap();
        assert_eq!(outcome.skipped_rbac.len(), 1);
        assert!(!outcome.denied.is_empty());
        assert!(h.store.read("rbac-errors.json").is_ok());
        // The data collector still ran.
        assert!(h.store.glob("data/**").unwrap().iter().any(|p| p.ends_with("notes.txt")));
    }

    #[tokio::test]
    async fn collector_failure_is_recorded_without_aborting() {
        // logs collector against a selector matching nothing still works;
        // force a failure with a secret collector whose namespace is absent.
        let h = harness(FakeCluster::new(), RunOptions::default());
        let specs = vec![
            Collect::Secret(SecretCollect {
                name: "missing".into(),
                namespace: Some("demo".into()),
                ..SecretCollect::default()
            }),
            Collect::Data(DataCollect {
                name: "notes.txt".into(),
                data: "hello".into(),
                ..DataCollect::default()
            }),
        ];

        let outcome = run(&h, &specs).await.unwrap();
        // The missing secret is captured as a result document, not an error;
        // the run is clean and both collectors produced output.
        assert!(outcome.failures.is_empty());
        assert!(h
            .store
            .read("secrets/demo/missing.json")
            .is_ok());
    }

    #[tokio::test]
    async fn excluded_collectors_are_recorded() {
        let h = harness(FakeCluster::new(), RunOptions::default());
        let specs = vec![Collect::Logs(LogsCollect {
            namespace: Some("demo".into()),
            selector: vec!["app=web".into()],
            exclude: Some(crate::core::spec::types::BoolString::Bool(true)),
            ..LogsCollect::default()
        })];

        let outcome = run(&h, &specs).await.unwrap();
        assert_eq!(outcome.excluded.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_propagates_to_outcome() {
        let h = harness(FakeCluster::new(), RunOptions::default());
        h.ctx.cancel.cancel();
        let specs = vec![Collect::Data(DataCollect {
            name: "n".into(),
            data: "d".into(),
            ..DataCollect::default()
        })];
        let err = run(&h, &specs).await.unwrap_err();
        assert!(matches!(err, PeriscopeError::Cancelled));
    }
}
