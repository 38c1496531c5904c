//! Shared fixtures for collector unit tests.

use std::sync::Arc;

use crate::bundle::store::BundleStore;
use crate::cluster::fake::FakeCluster;
use crate::collect::podlogs::{self, PodLogSummary};
use crate::collect::CollectEnv;
use crate::core::context::{RunContext, RunOptions};
use crate::redact::{RedactionReport, Redactors};

/// A collector environment over a fake cluster plus the live consolidator.
pub(crate) struct TestEnv {
    pub env: CollectEnv,
    pub store: Arc<BundleStore>,
    pub consolidator: tokio::task::JoinHandle<PodLogSummary>,
    _dir: tempfile::TempDir,
}

impl TestEnv {
    /// Drop the sink and wait for the consolidator to drain.
    pub async fn finish(self) -> PodLogSummary {
        drop(self.env);
        self.consolidator.await.unwrap()
    }
}

pub(crate) fn collect_env(cluster: FakeCluster) -> TestEnv {
    collect_env_with_options(cluster, RunOptions::default())
}

pub(crate) fn collect_env_with_options(cluster: FakeCluster, options: RunOptions) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(BundleStore::open(dir.path()).unwrap());
    let ctx = Arc::new(RunContext::new(Arc::new(cluster), options));
    let (sink, consolidator) = podlogs::start(
        Arc::clone(&ctx),
        Arc::clone(&store),
        Arc::new(Redactors::none()),
        Arc::new(parking_lot::Mutex::new(RedactionReport::default())),
    );
    TestEnv {
        env: CollectEnv {
            ctx,
            pod_logs: sink,
        },
        store,
        consolidator,
        _dir: dir,
    }
}
