//! In-memory [`ClusterAccess`] used by the test suite.
//!
//! State is seeded through the builder methods; every trait operation reads
//! that state without touching the network. Log fetches are counted so tests
//! can assert consolidator dedup behavior.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cluster::{
    selector_matches, ClusterAccess, ExecOutput, ForwardStream, LogOptions, LogStream, PodInfo,
    ResourceRef, ServerVersion,
};
use crate::core::errors::{PeriscopeError, Result};

/// In-memory cluster double.
#[derive(Default)]
pub struct FakeCluster {
    version: Mutex<ServerVersion>,
    api_resources: Mutex<Vec<ResourceRef>>,
    /// plural -> objects
    objects: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    pods: Mutex<Vec<PodInfo>>,
    /// (namespace, pod, container) -> log bytes
    logs: Mutex<HashMap<(String, String, String), Vec<u8>>>,
    /// (verb, resource) pairs denied by the access review
    denied: Mutex<HashSet<(String, String)>>,
    /// joined command prefix -> (stdout, stderr, exit code)
    exec_responses: Mutex<Vec<(String, Vec<u8>, Vec<u8>, i32)>>,
    log_fetches: AtomicUsize,
}

impl FakeCluster {
    /// An empty cluster at the default server version.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reported server version.
    pub fn with_version(self, git_version: &str, major: &str, minor: &str) -> Self {
        *self.version.lock() = ServerVersion {
            major: major.to_string(),
            minor: minor.to_string(),
            git_version: git_version.to_string(),
            platform: "linux/amd64".to_string(),
        };
        self
    }

    /// Register a listable API resource for discovery.
    pub fn with_api_resource(self, resource: ResourceRef) -> Self {
        self.api_resources.lock().push(resource);
        self
    }

    /// Seed one object under its plural resource name.
    pub fn with_object(self, plural: &str, object: serde_json::Value) -> Self {
        self.objects
            .lock()
            .entry(plural.to_string())
            .or_default()
            .push(object);
        self
    }

    /// Seed a pod with labels and containers.
    pub fn with_pod(
        self,
        namespace: &str,
        name: &str,
        labels: &[(&str, &str)],
        containers: &[&str],
    ) -> Self {
        let info = PodInfo {
            namespace: namespace.to_string(),
            name: name.to_string(),
            containers: containers.iter().map(|c| c.to_string()).collect(),
            node: Some("node-a".to_string()),
            phase: "Running".to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        // Keep the dynamic view consistent with the typed view.
        let object = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": labels.iter().map(|(k, v)| (k.to_string(), serde_json::json!(v))).collect::<serde_json::Map<_, _>>(),
            },
            "spec": {
                "containers": containers.iter().map(|c| serde_json::json!({"name": c})).collect::<Vec<_>>(),
            },
            "status": {"phase": "Running"}
        });
        self.pods.lock().push(info);
        self.with_object("pods", object)
    }

    /// Seed one container's log content.
    pub fn with_pod_logs(self, namespace: &str, pod: &str, container: &str, logs: &str) -> Self {
        self.logs.lock().insert(
            (
                namespace.to_string(),
                pod.to_string(),
                container.to_string(),
            ),
            logs.as_bytes().to_vec(),
        );
        self
    }

    /// Deny a verb/resource pair in the access review.
    pub fn deny(self, verb: &str, resource: &str) -> Self {
        self.denied
            .lock()
            .insert((verb.to_string(), resource.to_string()));
        self
    }

    /// Register an exec response for commands starting with `prefix`.
    pub fn with_exec_response(self, prefix: &str, stdout: &str, exit_code: i32) -> Self {
        self.exec_responses.lock().push((
            prefix.to_string(),
            stdout.as_bytes().to_vec(),
            Vec::new(),
            exit_code,
        ));
        self
    }

    /// Number of log streams served so far.
    pub fn log_fetch_count(&self) -> usize {
        self.log_fetches.load(Ordering::SeqCst)
    }

    fn object_namespace(object: &serde_json::Value) -> Option<&str> {
        object
            .pointer("/metadata/namespace")
            .and_then(serde_json::Value::as_str)
    }

    fn object_labels(object: &serde_json::Value) -> BTreeMap<String, String> {
        object
            .pointer("/metadata/labels")
            .and_then(serde_json::Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClusterAccess for FakeCluster {
    async fn server_version(&self) -> Result<ServerVersion> {
        Ok(self.version.lock().clone())
    }

    async fn list_api_resources(&self) -> Result<Vec<ResourceRef>> {
        Ok(self.api_resources.lock().clone())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .objects
            .lock()
            .get("namespaces")
            .map(|objs| {
                objs.iter()
                    .filter_map(|o| o.pointer("/metadata/name"))
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if names.is_empty() {
            // Derive from seeded pods so simple fixtures work.
            let mut seen: HashSet<String> = HashSet::new();
            for pod in self.pods.lock().iter() {
                seen.insert(pod.namespace.clone());
            }
            names = seen.into_iter().collect();
            names.sort();
        }
        Ok(names)
    }

    async fn list_objects(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<serde_json::Value>> {
        let objects = self.objects.lock();
        let Some(items) = objects.get(&resource.plural) else {
            return Ok(Vec::new());
        };
        Ok(items
            .iter()
            .filter(|o| match namespace {
                Some(ns) => Self::object_namespace(o) == Some(ns),
                None => true,
            })
            .filter(|o| match label_selector {
                Some(selector) => selector_matches(&Self::object_labels(o), selector),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get_object(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<serde_json::Value>> {
        let items = self.list_objects(resource, namespace, None).await?;
        Ok(items.into_iter().find(|o| {
            o.pointer("/metadata/name").and_then(serde_json::Value::as_str) == Some(name)
        }))
    }

    async fn create_object(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        mut manifest: serde_json::Value,
    ) -> Result<serde_json::Value> {
        if let Some(ns) = namespace {
            if manifest.pointer("/metadata/namespace").is_none() {
                if let Some(meta) = manifest
                    .pointer_mut("/metadata")
                    .and_then(serde_json::Value::as_object_mut)
                {
                    meta.insert("namespace".to_string(), serde_json::json!(ns));
                }
            }
        }
        // Created pods complete immediately so run-pod collectors can poll
        // to completion without a scheduler.
        if resource.plural == "pods" {
            manifest["status"] = serde_json::json!({"phase": "Succeeded"});
            let name = manifest
                .pointer("/metadata/name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("created")
                .to_string();
            let ns = namespace.unwrap_or("default").to_string();
            let containers = manifest
                .pointer("/spec/containers")
                .and_then(serde_json::Value::as_array)
                .map(|cs| {
                    cs.iter()
                        .filter_map(|c| c.get("name"))
                        .filter_map(serde_json::Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            self.pods.lock().push(PodInfo {
                namespace: ns,
                name,
                containers,
                node: Some("node-a".to_string()),
                phase: "Succeeded".to_string(),
                labels: BTreeMap::new(),
            });
        }
        self.objects
            .lock()
            .entry(resource.plural.clone())
            .or_default()
            .push(manifest.clone());
        Ok(manifest)
    }

    async fn delete_object(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        if let Some(items) = self.objects.lock().get_mut(&resource.plural) {
            items.retain(|o| {
                let matches_name = o
                    .pointer("/metadata/name")
                    .and_then(serde_json::Value::as_str)
                    == Some(name);
                let matches_ns = match namespace {
                    Some(ns) => Self::object_namespace(o) == Some(ns),
                    None => true,
                };
                !(matches_name && matches_ns)
            });
        }
        if resource.plural == "pods" {
            self.pods
                .lock()
                .retain(|p| !(p.name == name && namespace.map_or(true, |ns| p.namespace == ns)));
        }
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<PodInfo>> {
        Ok(self
            .pods
            .lock()
            .iter()
            .filter(|p| namespace.map_or(true, |ns| p.namespace == ns))
            .filter(|p| {
                label_selector.map_or(true, |selector| selector_matches(&p.labels, selector))
            })
            .cloned()
            .collect())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        _options: &LogOptions,
    ) -> Result<LogStream> {
        let key = (
            namespace.to_string(),
            pod.to_string(),
            container.to_string(),
        );
        let bytes = self.logs.lock().get(&key).cloned().ok_or_else(|| {
            PeriscopeError::network(format!("no logs for {namespace}/{pod}/{container}"))
        })?;
        self.log_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }

    async fn exec(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput> {
        let joined = command.join(" ");
        let responses = self.exec_responses.lock();
        for (prefix, stdout, stderr, code) in responses.iter() {
            if joined.starts_with(prefix.as_str()) {
                return Ok(ExecOutput {
                    stdout: stdout.clone(),
                    stderr: stderr.clone(),
                    exit_code: *code,
                });
            }
        }
        Ok(ExecOutput::default())
    }

    async fn can_i(
        &self,
        verb: &str,
        _group: &str,
        resource: &str,
        _namespace: Option<&str>,
    ) -> Result<bool> {
        Ok(!self
            .denied
            .lock()
            .contains(&(verb.to_string(), resource.to_string())))
    }

    async fn port_forward(
        &self,
        namespace: &str,
        pod: &str,
        port: u16,
    ) -> Result<ForwardStream> {
        Err(PeriscopeError::network(format!(
            "fake cluster cannot forward {namespace}/{pod}:{port}"
        )))
    }
}
