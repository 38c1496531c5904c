//! High-level pipeline API used by the binaries.
//!
//! [`SupportBundlePipeline`] drives the full lifecycle: spec load/merge/
//! validate, bundle work directory, concurrent collection through
//! redaction, pod-log consolidation, analysis, and atomic archival.
//! [`PreflightPipeline`] runs the same collection+analysis pipeline and
//! returns verdicts without producing an archive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::analyze::{analyze_bundle, AnalyzeResult};
use crate::bundle::archive;
use crate::bundle::store::BundleStore;
use crate::cluster::{ClusterAccess, KubeCluster};
use crate::collect::host::run_host_collection;
use crate::collect::scheduler::{run_collection, CollectionOutcome};
use crate::core::context::{ProgressPhase, ProgressSender, RunContext, RunOptions};
use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::{
    load_specs, loader::discover_cluster_specs, merge_docs, types::ResolvedSpec, validate,
};
use crate::redact::{RedactionReport, Redactors};

/// Options for one pipeline invocation.
#[derive(Clone, Default)]
pub struct PipelineOptions {
    /// Apply the built-in default redaction rules
    pub redact_defaults: bool,
    /// Additional redactor spec locators
    pub redactor_uris: Vec<String>,
    /// Archive output path; a timestamped name is derived when absent
    pub output: Option<PathBuf>,
    /// Namespace for in-cluster spec discovery
    pub namespace: Option<String>,
    /// Label selector for in-cluster spec discovery; empty disables it
    pub discovery_selector: Option<String>,
    /// Pinned archive mtime for reproducible archives
    pub archive_timestamp: Option<u64>,
    /// Run-level options (parallelism, timeouts, permissive RBAC, ...)
    pub run: RunOptions,
    /// Progress channel to the host
    pub progress: ProgressSender,
}

impl PipelineOptions {
    /// Defaults plus default redaction enabled.
    pub fn new() -> Self {
        Self {
            redact_defaults: true,
            ..Self::default()
        }
    }

    /// Set the archive output path.
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// What a support-bundle run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Path of the finished archive
    pub archive_path: Option<PathBuf>,
    /// Analyzer verdicts (also written to analysis.json in the bundle)
    pub analysis: Vec<AnalyzeResult>,
    /// Collection summary
    pub collection: CollectionOutcome,
    /// Loader/merger/validator warnings
    pub warnings: Vec<String>,
}

impl RunOutcome {
    /// Whether anything non-fatal went wrong (exit code 8).
    pub fn is_partial(&self) -> bool {
        self.collection.is_partial()
    }

    /// Whether any analyzer fails the run, honoring strictness.
    pub fn has_analysis_failures(&self) -> bool {
        self.analysis.iter().any(AnalyzeResult::fails_run)
    }
}

/// What a preflight run produced.
pub struct PreflightOutcome {
    /// Analyzer verdicts
    pub analysis: Vec<AnalyzeResult>,
    /// Loader/merger/validator warnings
    pub warnings: Vec<String>,
}

impl PreflightOutcome {
    /// Whether the preflight verdict is a no-go.
    pub fn failed(&self) -> bool {
        self.analysis.iter().any(AnalyzeResult::fails_run)
    }
}

/// Load, merge, and validate specs from locators plus optional in-cluster
/// discovery and extra redactor locators.
async fn resolve_spec(
    locators: &[String],
    options: &PipelineOptions,
    cluster: Option<Arc<dyn ClusterAccess>>,
) -> Result<ResolvedSpec> {
    let (mut docs, mut warnings) = load_specs(locators, cluster.clone()).await?;

    if !options.redactor_uris.is_empty() {
        let (extra, mut warns) = load_specs(&options.redactor_uris, cluster.clone()).await?;
        docs.extend(extra);
        warnings.append(&mut warns);
    }

    if let (Some(selector), Some(cluster)) = (&options.discovery_selector, cluster.as_deref()) {
        match discover_cluster_specs(cluster, options.namespace.as_deref(), selector).await {
            Ok((found, mut warns)) => {
                docs.extend(found);
                warnings.append(&mut warns);
            }
            Err(e) => warn!(error = %e, "in-cluster spec discovery failed"),
        }
    }

    if docs.is_empty() {
        return Err(PeriscopeError::spec(
            "",
            "no-specs",
            "no troubleshoot documents were loaded",
        ));
    }

    let mut resolved = merge_docs(docs);
    resolved.warnings.extend(warnings);
    let validation_warnings = validate(&resolved)?;
    resolved.warnings.extend(validation_warnings);
    for conflict in &resolved.conflicts {
        warn!(key = %conflict.key, field = %conflict.field, "spec merge conflict");
    }
    Ok(resolved)
}

/// The support-bundle pipeline.
pub struct SupportBundlePipeline {
    spec: ResolvedSpec,
    cluster: Arc<dyn ClusterAccess>,
    options: PipelineOptions,
}

impl SupportBundlePipeline {
    /// Connect to the cluster and resolve specs from locators.
    pub async fn from_locators(locators: &[String], options: PipelineOptions) -> Result<Self> {
        let cluster: Arc<dyn ClusterAccess> = Arc::new(KubeCluster::connect().await?);
        let spec = resolve_spec(locators, &options, Some(Arc::clone(&cluster))).await?;
        Ok(Self {
            spec,
            cluster,
            options,
        })
    }

    /// Build over an existing cluster handle (tests, embedding).
    pub fn with_cluster(
        spec: ResolvedSpec,
        cluster: Arc<dyn ClusterAccess>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            spec,
            cluster,
            options,
        }
    }

    /// Run the full collect → redact → analyze → archive lifecycle.
    pub async fn run(self) -> Result<RunOutcome> {
        let redactors = Arc::new(Redactors::compile(
            &self.spec.redactors,
            self.options.redact_defaults,
            self.options.run.redact_buffer_limit,
        )?);
        let report = Arc::new(Mutex::new(RedactionReport::default()));
        let store = Arc::new(BundleStore::create("bundle")?);
        let ctx = Arc::new(
            RunContext::new(Arc::clone(&self.cluster), self.options.run.clone())
                .with_progress(self.options.progress.clone()),
        );

        // Collection; the work directory never survives a fatal collect
        // error (an RBAC denial must not leave a partial bundle behind).
        let collect_result = async {
            let mut outcome = run_collection(
                &self.spec.collectors,
                Arc::clone(&ctx),
                Arc::clone(&store),
                Arc::clone(&redactors),
                Arc::clone(&report),
            )
            .await?;

            let (host_excluded, host_failures) = run_host_collection(
                &self.spec.host_collectors,
                &ctx,
                &store,
                &redactors,
                &report,
            )
            .await?;
            outcome.excluded.extend(host_excluded);
            outcome.failures.extend(host_failures);
            Ok::<_, PeriscopeError>(outcome)
        }
        .await;

        let collection = match collect_result {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(cleanup) = store.remove().await {
                    warn!(error = %cleanup, "failed to remove bundle work directory");
                }
                return Err(e);
            }
        };

        // Analysis runs against the live store and lands in the bundle.
        let analysis = analyze_bundle(
            store.as_ref(),
            &self.spec.analyzers,
            &self.spec.host_analyzers,
            &ctx.progress,
        )?;
        crate::collect::write_redacted(
            &store,
            &redactors,
            &report,
            "analysis.json",
            crate::collect::Payload::json(&analysis)?,
        )
        .await?;

        // version.yaml identifies the producing tool and schema.
        let version = serde_yaml::to_string(&serde_json::json!({
            "tool": "periscope",
            "version": crate::VERSION,
            "apiVersion": crate::SCHEMA_VERSION,
        }))?;
        crate::collect::write_redacted(
            &store,
            &redactors,
            &report,
            "version.yaml",
            crate::collect::Payload::text(version),
        )
        .await?;

        let report_body = {
            let report = report.lock();
            if report.is_empty() {
                None
            } else {
                Some(serde_json::to_vec_pretty(&*report)?)
            }
        };
        if let Some(body) = report_body {
            store.write_bytes("redaction-report.json", &body).await?;
        }

        // Atomic archival; failure leaves the work directory for debugging.
        let archive_path = self.options.output.clone().unwrap_or_else(|| {
            PathBuf::from(format!(
                "support-bundle-{}.tar.gz",
                Utc::now().format("%Y-%m-%dT%H-%M-%S")
            ))
        });
        ctx.progress.emit(
            ProgressPhase::Archive,
            archive_path.display().to_string(),
            None,
        );
        archive::finalize(&store, &archive_path, self.options.archive_timestamp).await?;
        info!(archive = %archive_path.display(), "support bundle complete");

        Ok(RunOutcome {
            archive_path: Some(archive_path),
            analysis,
            collection,
            warnings: self.spec.warnings,
        })
    }
}

/// The preflight pipeline: same collection and analysis, verdict output,
/// no archive.
pub struct PreflightPipeline {
    spec: ResolvedSpec,
    cluster: Arc<dyn ClusterAccess>,
    options: PipelineOptions,
}

impl PreflightPipeline {
    /// Connect to the cluster and resolve specs from locators.
    pub async fn from_locators(locators: &[String], options: PipelineOptions) -> Result<Self> {
        let cluster: Arc<dyn ClusterAccess> = Arc::new(KubeCluster::connect().await?);
        let spec = resolve_spec(locators, &options, Some(Arc::clone(&cluster))).await?;
        Ok(Self {
            spec,
            cluster,
            options,
        })
    }

    /// Build over an existing cluster handle (tests, embedding).
    pub fn with_cluster(
        spec: ResolvedSpec,
        cluster: Arc<dyn ClusterAccess>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            spec,
            cluster,
            options,
        }
    }

    /// Run collection and analysis; the scratch bundle is always removed.
    pub async fn run(self) -> Result<PreflightOutcome> {
        let redactors = Arc::new(Redactors::compile(
            &self.spec.redactors,
            self.options.redact_defaults,
            self.options.run.redact_buffer_limit,
        )?);
        let report = Arc::new(Mutex::new(RedactionReport::default()));
        let store = Arc::new(BundleStore::create("preflight")?);
        let ctx = Arc::new(
            RunContext::new(Arc::clone(&self.cluster), self.options.run.clone())
                .with_progress(self.options.progress.clone()),
        );

        let run = async {
            run_collection(
                &self.spec.collectors,
                Arc::clone(&ctx),
                Arc::clone(&store),
                Arc::clone(&redactors),
                Arc::clone(&report),
            )
            .await?;
            run_host_collection(
                &self.spec.host_collectors,
                &ctx,
                &store,
                &redactors,
                &report,
            )
            .await?;
            analyze_bundle(
                store.as_ref(),
                &self.spec.analyzers,
                &self.spec.host_analyzers,
                &ctx.progress,
            )
        }
        .await;

        if let Err(e) = store.remove().await {
            warn!(error = %e, "failed to remove preflight work directory");
        }

        Ok(PreflightOutcome {
            analysis: run?,
            warnings: self.spec.warnings,
        })
    }
}

/// Analyze an existing archive: extract to scratch, evaluate, clean up.
pub async fn analyze_archive(
    archive_path: &Path,
    spec: &ResolvedSpec,
    progress: &ProgressSender,
) -> Result<Vec<AnalyzeResult>> {
    let scratch = std::env::temp_dir().join(format!(
        "periscope-analyze-{}-{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    std::fs::create_dir_all(&scratch)
        .map_err(|e| PeriscopeError::io("creating analysis scratch dir", e))?;

    let result = (|| {
        let bundle = archive::ExtractedBundle::from_archive(archive_path, &scratch)?;
        analyze_bundle(&bundle, &spec.analyzers, &spec.host_analyzers, progress)
    })();

    let _ = std::fs::remove_dir_all(&scratch);
    result
}
