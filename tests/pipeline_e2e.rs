//! End-to-end pipeline scenarios over the in-memory cluster.
//!
//! Each test drives the public pipeline API the way the binaries do: parse
//! a spec, run collection through redaction and consolidation, finalize an
//! archive, and assert on the extracted result.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use periscope::api::{PipelineOptions, RunOutcome, SupportBundlePipeline};
use periscope::cli::{exit, exit_code_for};
use periscope::cluster::fake::FakeCluster;
use periscope::core::context::{ProgressPhase, ProgressSender};
use periscope::core::spec::{merge_docs, parse_documents, types::Provenance};
use periscope::PeriscopeError;

fn resolved_spec(yaml: &str) -> periscope::core::spec::types::ResolvedSpec {
    let (docs, _warnings) = parse_documents(yaml, Provenance::User, "test").unwrap();
    merge_docs(docs)
}

async fn run_to_archive(
    cluster: FakeCluster,
    yaml: &str,
    out_dir: &Path,
) -> Result<(RunOutcome, tempfile::TempDir)> {
    let spec = resolved_spec(yaml);
    let options = PipelineOptions {
        redact_defaults: false,
        output: Some(out_dir.join("bundle.tar.gz")),
        archive_timestamp: Some(0),
        ..PipelineOptions::default()
    };
    let pipeline = SupportBundlePipeline::with_cluster(spec, Arc::new(cluster), options);
    let outcome = pipeline.run().await?;

    let extracted = tempdir()?;
    periscope::bundle::archive::extract_archive(
        outcome.archive_path.as_ref().unwrap(),
        extracted.path(),
    )?;
    Ok((outcome, extracted))
}

fn demo_cluster() -> FakeCluster {
    FakeCluster::new()
        .with_version("v1.29.3", "1", "29")
        .with_pod("demo", "web-1", &[("app", "web")], &["nginx", "sidecar"])
        .with_pod("demo", "web-2", &[("app", "web")], &["nginx", "sidecar"])
        .with_pod_logs("demo", "web-1", "nginx", "web-1 nginx\n")
        .with_pod_logs("demo", "web-1", "sidecar", "web-1 sidecar\n")
        .with_pod_logs("demo", "web-2", "nginx", "web-2 nginx\n")
        .with_pod_logs("demo", "web-2", "sidecar", "web-2 sidecar\n")
        .with_object(
            "deployments",
            serde_json::json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "web", "namespace": "demo"},
                "spec": {"replicas": 2},
                "status": {"readyReplicas": 2},
            }),
        )
}

/// E1: selector logs consolidate into exactly one file per container and a
/// deploymentStatus analyzer passes against the captured state.
#[tokio::test]
async fn e1_selector_logs_consolidate_and_analysis_passes() -> Result<()> {
    let out = tempdir()?;
    let spec = r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: e1
spec:
  collectors:
    - clusterInfo: {}
    - logs:
        namespace: demo
        selector:
          - app=web
  analyzers:
    - deploymentStatus:
        name: web
        namespace: demo
        outcomes:
          - fail:
              when: "< 1"
              message: down
          - pass:
              message: ok
"#;
    let (outcome, extracted) = run_to_archive(demo_cluster(), spec, out.path()).await?;

    let logs_root = extracted.path().join("cluster-resources/pods/logs/demo");
    let mut log_files = Vec::new();
    for pod in ["web-1", "web-2"] {
        for container in ["nginx", "sidecar"] {
            let path = logs_root.join(pod).join(format!("{container}.log"));
            assert!(path.is_file(), "missing {}", path.display());
            log_files.push(path);
        }
    }
    assert_eq!(log_files.len(), 4);
    assert_eq!(outcome.collection.pod_logs.fetched, 4);

    let pass = outcome
        .analysis
        .iter()
        .find(|r| r.title.contains("web"))
        .unwrap();
    assert!(pass.is_pass);
    assert_eq!(pass.message, "ok");

    // analysis.json landed inside the bundle too.
    assert!(extracted.path().join("analysis.json").is_file());

    // Re-analyzing the finished archive reproduces the verdict.
    let respec = resolved_spec(spec);
    let reanalyzed = periscope::api::analyze_archive(
        outcome.archive_path.as_ref().unwrap(),
        &respec,
        &ProgressSender::disabled(),
    )
    .await?;
    assert!(reanalyzed.iter().any(|r| r.is_pass && r.message == "ok"));
    Ok(())
}

/// E2: a literal redaction value never reaches the archive.
#[tokio::test]
async fn e2_literal_redaction_masks_collected_bytes() -> Result<()> {
    let out = tempdir()?;
    let spec = r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: e2
spec:
  collectors:
    - data:
        collectorName: static
        name: token.txt
        data: "token=sk-XYZ\n"
  redactors:
    - name: strip-api-token
      removals:
        values:
          - sk-XYZ
"#;
    let (_outcome, extracted) = run_to_archive(demo_cluster(), spec, out.path()).await?;

    let content = std::fs::read_to_string(extracted.path().join("static/token.txt"))?;
    assert_eq!(content, "token=***HIDDEN***\n");

    let report = std::fs::read_to_string(extracted.path().join("redaction-report.json"))?;
    assert!(report.contains("strip-api-token"));
    Ok(())
}

/// E3: clusterResources entries with identical namespace sets merge to one
/// run producing one file per namespace.
#[tokio::test]
async fn e3_identical_cluster_resources_merge() -> Result<()> {
    let out = tempdir()?;
    let cluster = FakeCluster::new()
        .with_pod("a", "pod-a", &[], &["main"])
        .with_pod("b", "pod-b", &[], &["main"]);
    let spec = r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: e3
spec:
  collectors:
    - clusterResources:
        namespaces: [a, b]
    - clusterResources:
        namespaces: [b, a]
"#;
    let (outcome, extracted) = run_to_archive(cluster, spec, out.path()).await?;

    assert!(extracted
        .path()
        .join("cluster-resources/pods/a.json")
        .is_file());
    assert!(extracted
        .path()
        .join("cluster-resources/pods/b.json")
        .is_file());
    // One merged run: no path conflicts were recorded.
    assert!(outcome.collection.conflicts.is_empty());
    assert!(!extracted.path().join("conflicted-paths.json").exists());
    Ok(())
}

/// E4: a deploymentStatus analyzer fails on zero ready replicas.
#[tokio::test]
async fn e4_deployment_status_fails_on_zero_ready() -> Result<()> {
    let out = tempdir()?;
    let cluster = FakeCluster::new().with_object(
        "deployments",
        serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "demo"},
            "spec": {"replicas": 2},
            "status": {"readyReplicas": 0},
        }),
    );
    let spec = r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: e4
spec:
  collectors:
    - clusterResources:
        namespaces: [demo]
  analyzers:
    - deploymentStatus:
        name: web
        namespace: demo
        outcomes:
          - fail:
              when: "< 1"
              message: down
          - pass:
              message: ok
"#;
    let (outcome, _extracted) = run_to_archive(cluster, spec, out.path()).await?;

    let verdict = &outcome.analysis[0];
    assert!(verdict.is_fail);
    assert_eq!(verdict.message, "down");
    Ok(())
}

/// E5: two collectors requesting the same pod's logs fetch once, produce
/// one file, and emit one pod-log progress event.
#[tokio::test]
async fn e5_duplicate_log_requests_consolidate() -> Result<()> {
    let out = tempdir()?;
    let cluster = FakeCluster::new()
        .with_pod("rook-a", "tools-1", &[("app", "rook-ceph-tools")], &["tools"])
        .with_pod("rook-a", "monitor", &[("app", "rook-ceph-mon")], &["mon"])
        .with_pod_logs("rook-a", "monitor", "mon", "monitor log\n");
    let spec_yaml = r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: e5
spec:
  collectors:
    - logs:
        namespace: rook-a
        name: monitor
    - ceph:
        namespace: rook-a
"#;
    let spec = resolved_spec(spec_yaml);
    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let options = PipelineOptions {
        redact_defaults: false,
        output: Some(out.path().join("bundle.tar.gz")),
        archive_timestamp: Some(0),
        progress: ProgressSender::new(tx),
        ..PipelineOptions::default()
    };
    let pipeline = SupportBundlePipeline::with_cluster(spec, Arc::new(cluster), options);
    let outcome = pipeline.run().await?;

    assert_eq!(outcome.collection.pod_logs.fetched, 1);

    let extracted = tempdir()?;
    periscope::bundle::archive::extract_archive(
        outcome.archive_path.as_ref().unwrap(),
        extracted.path(),
    )?;
    assert!(extracted
        .path()
        .join("cluster-resources/pods/logs/rook-a/monitor/mon.log")
        .is_file());

    let mut podlog_events = 0;
    while let Ok(event) = rx.try_recv() {
        if event.phase == ProgressPhase::PodLogs && event.title.contains("monitor") {
            podlog_events += 1;
        }
    }
    assert_eq!(podlog_events, 1);
    Ok(())
}

/// E6: an RBAC denial with permissive mode off produces no archive and
/// maps to exit code 7 with the denied verbs enumerated.
#[tokio::test]
async fn e6_rbac_denial_aborts_without_archive() -> Result<()> {
    let out = tempdir()?;
    let cluster = FakeCluster::new().deny("get", "secrets");
    let spec = resolved_spec(
        r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: e6
spec:
  collectors:
    - secret:
        name: db-credentials
        namespace: demo
        key: password
"#,
    );
    let archive_path = out.path().join("bundle.tar.gz");
    let options = PipelineOptions {
        redact_defaults: false,
        output: Some(archive_path.clone()),
        archive_timestamp: Some(0),
        ..PipelineOptions::default()
    };
    let pipeline = SupportBundlePipeline::with_cluster(spec, Arc::new(cluster), options);

    let err = pipeline.run().await.unwrap_err();
    assert_eq!(exit_code_for(&err), exit::PERMISSION_DENIED);
    match &err {
        PeriscopeError::Rbac { denied } => {
            assert!(denied
                .iter()
                .any(|d| d.verb == "get" && d.resource == "secrets"));
        }
        other => panic!("expected rbac error, got {other:?}"),
    }
    assert!(err.to_string().contains("get secrets"));
    assert!(!archive_path.exists());
    Ok(())
}

/// Property 1 + 3: nothing matching an enabled redaction literal appears
/// anywhere in the bundle, and every consolidated log lives under the
/// canonical location.
#[tokio::test]
async fn redaction_completeness_and_log_canonicality() -> Result<()> {
    let out = tempdir()?;
    let cluster = demo_cluster().with_pod_logs("demo", "web-1", "nginx", "password=sk-XYZ\n");
    let spec = r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: sweep
spec:
  collectors:
    - clusterInfo: {}
    - logs:
        namespace: demo
        selector:
          - app=web
    - data:
        collectorName: static
        name: config.txt
        data: "secret=sk-XYZ\n"
  redactors:
    - removals:
        values:
          - sk-XYZ
"#;
    let (_outcome, extracted) = run_to_archive(cluster, spec, out.path()).await?;

    for entry in walkdir::WalkDir::new(extracted.path()) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let content = std::fs::read(entry.path())?;
        assert!(
            !content.windows(6).any(|w| w == b"sk-XYZ"),
            "unredacted literal in {}",
            entry.path().display()
        );

        let rel = entry
            .path()
            .strip_prefix(extracted.path())
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if rel.ends_with(".log") {
            assert!(
                rel.starts_with("cluster-resources/pods/logs/"),
                "log outside canonical location: {rel}"
            );
        }
    }
    Ok(())
}

/// Property 2: at most one log file per (namespace, pod, container).
#[tokio::test]
async fn log_uniqueness_across_duplicate_collectors() -> Result<()> {
    let out = tempdir()?;
    let spec = r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: dupes
spec:
  collectors:
    - logs:
        namespace: demo
        selector:
          - app=web
    - logs:
        namespace: demo
        name: web-1
"#;
    let (outcome, extracted) = run_to_archive(demo_cluster(), spec, out.path()).await?;

    // The named-pod collector overlaps the selector collector entirely:
    // still one file per container.
    let mut seen = std::collections::HashSet::new();
    for entry in walkdir::WalkDir::new(extracted.path().join("cluster-resources/pods/logs")) {
        let entry = entry?;
        if entry.file_type().is_file() {
            assert!(seen.insert(entry.path().to_path_buf()));
        }
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(outcome.collection.pod_logs.fetched, 4);
    Ok(())
}

/// Property 6: archiving then extracting reproduces the tree byte for byte
/// given a pinned timestamp.
#[tokio::test]
async fn archive_roundtrip_is_deterministic() -> Result<()> {
    let out_a = tempdir()?;
    let out_b = tempdir()?;
    let spec = r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: deterministic
spec:
  collectors:
    - data:
        collectorName: static
        name: a.txt
        data: alpha
    - data:
        collectorName: static
        name: b.txt
        data: beta
"#;
    let (outcome_a, _) = run_to_archive(demo_cluster(), spec, out_a.path()).await?;
    let (outcome_b, _) = run_to_archive(demo_cluster(), spec, out_b.path()).await?;

    let bytes_a = std::fs::read(outcome_a.archive_path.unwrap())?;
    let bytes_b = std::fs::read(outcome_b.archive_path.unwrap())?;
    assert_eq!(bytes_a, bytes_b);
    Ok(())
}

/// version.yaml identifies the producing tool inside every archive.
#[tokio::test]
async fn bundle_carries_version_document() -> Result<()> {
    let out = tempdir()?;
    let spec = r#"
apiVersion: troubleshoot.sh/v1beta2
kind: SupportBundle
metadata:
  name: version
spec:
  collectors:
    - clusterInfo: {}
"#;
    let (_outcome, extracted) = run_to_archive(demo_cluster(), spec, out.path()).await?;
    let version = std::fs::read_to_string(extracted.path().join("version.yaml"))?;
    assert!(version.contains("periscope"));
    assert!(version.contains("troubleshoot.sh/v1beta2"));
    Ok(())
}
