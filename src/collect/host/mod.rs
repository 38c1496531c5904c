//! Host collectors: diagnostics captured from the local machine rather
//! than through the cluster API.
//!
//! Host collectors are cheap and local, so the runner executes them
//! sequentially; failures are recorded per collector exactly like cluster
//! collectors.

pub mod filesystem;
pub mod kernel;
pub mod ports;
pub mod run;
pub mod systemctl;
pub mod time;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bundle::store::BundleStore;
use crate::collect::scheduler::CollectorFailure;
use crate::collect::{evaluate_exclude, write_redacted, CollectorResult};
use crate::core::context::{ProgressPhase, RunContext};
use crate::core::errors::Result;
use crate::core::spec::types::HostCollect;
use crate::redact::{RedactionReport, Redactors};

/// A runnable host collector.
#[async_trait]
pub trait HostCollector: Send + Sync {
    /// Human-readable title.
    fn title(&self) -> String;

    /// Directory-safe name for `<collector>/errors.json`.
    fn slug(&self) -> String {
        self.title().replace('/', "-")
    }

    /// Evaluate the spec's exclude predicate against host facts.
    fn is_excluded(&self) -> Result<bool> {
        Ok(false)
    }

    /// Capture the data.
    async fn collect(&self, ctx: &RunContext) -> Result<CollectorResult>;
}

/// Tag-to-implementation dispatch for host collectors.
pub fn build_host_collectors(specs: &[HostCollect]) -> Vec<Box<dyn HostCollector>> {
    specs
        .iter()
        .map(|spec| -> Box<dyn HostCollector> {
            match spec.clone() {
                HostCollect::FilesystemUsage(spec) => {
                    Box::new(filesystem::FilesystemUsageCollector::new(spec))
                }
                HostCollect::KernelModules(spec) => {
                    Box::new(kernel::KernelModulesCollector::new(spec))
                }
                HostCollect::Time(spec) => Box::new(time::TimeCollector::new(spec)),
                HostCollect::Systemctl(spec) => {
                    Box::new(systemctl::SystemctlCollector::new(spec))
                }
                HostCollect::Run(spec) => Box::new(run::RunHostCollector::new(spec)),
                HostCollect::TcpPort(spec) => Box::new(ports::TcpPortCollector::new(spec)),
                HostCollect::UdpPort(spec) => Box::new(ports::UdpPortCollector::new(spec)),
            }
        })
        .collect()
}

/// Run host collectors and write their output through redaction.
pub async fn run_host_collection(
    specs: &[HostCollect],
    ctx: &Arc<RunContext>,
    store: &Arc<BundleStore>,
    redactors: &Arc<Redactors>,
    report: &Arc<Mutex<RedactionReport>>,
) -> Result<(Vec<String>, Vec<CollectorFailure>)> {
    let mut excluded = Vec::new();
    let mut failures = Vec::new();

    for collector in build_host_collectors(specs) {
        ctx.checkpoint()?;
        if collector.is_excluded()? {
            debug!(collector = %collector.title(), "excluded by spec predicate");
            excluded.push(collector.title());
            continue;
        }

        match collector.collect(ctx).await {
            Ok(result) => {
                for (path, payload) in result {
                    write_redacted(store, redactors, report, &path, payload).await?;
                }
                ctx.progress
                    .emit(ProgressPhase::Collect, collector.title(), None);
            }
            Err(e) => {
                warn!(collector = %collector.title(), error = %e, "host collector failed");
                let record = serde_json::json!({ "errors": [e.to_string()] });
                write_redacted(
                    store,
                    redactors,
                    report,
                    &format!("host-collectors/{}/errors.json", collector.slug()),
                    crate::collect::Payload::json(&record)?,
                )
                .await?;
                failures.push(CollectorFailure {
                    collector: collector.title(),
                    error: e.to_string(),
                });
                if ctx.options.strict {
                    return Err(e);
                }
            }
        }
    }

    Ok((excluded, failures))
}

pub(crate) use crate::collect::Payload;

/// Shared exclude evaluation for host collector impls.
pub(crate) fn host_excluded(
    exclude: Option<&crate::core::spec::types::BoolString>,
) -> Result<bool> {
    evaluate_exclude(exclude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::store::BundleReader;
    use crate::cluster::fake::FakeCluster;
    use crate::core::context::RunOptions;
    use crate::core::spec::types::{BoolString, TcpPortCollect, TimeCollect};

    #[tokio::test]
    async fn excluded_host_collectors_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BundleStore::open(dir.path()).unwrap());
        let ctx = Arc::new(RunContext::new(
            Arc::new(FakeCluster::new()),
            RunOptions::default(),
        ));
        let specs = vec![
            HostCollect::Time(TimeCollect {
                exclude: Some(BoolString::Bool(true)),
                ..TimeCollect::default()
            }),
            HostCollect::TcpPort(TcpPortCollect {
                collector_name: Some("kubelet".into()),
                port: 0,
                ..TcpPortCollect::default()
            }),
        ];

        let (excluded, failures) = run_host_collection(
            &specs,
            &ctx,
            &store,
            &Arc::new(Redactors::none()),
            &Arc::new(Mutex::new(RedactionReport::default())),
        )
        .await
        .unwrap();

        assert_eq!(excluded, vec!["time"]);
        assert!(failures.is_empty());
        assert!(store.read("host-collectors/tcpPort/kubelet.json").is_ok());
    }
}
