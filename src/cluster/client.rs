//! Production [`ClusterAccess`] implementation over a `kube` client.
//!
//! REST config is inferred from the standard precedence (flags/env via
//! `KUBECONFIG`, then in-cluster service account). A semaphore applies the
//! client-side request limit once for every caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    ApiResource, AttachParams, DeleteParams, DynamicObject, ListParams, LogParams, PostParams,
};
use kube::discovery::{verbs, Discovery, Scope};
use kube::Api;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, warn};

use crate::cluster::{
    ClusterAccess, ExecOutput, ForwardStream, LogOptions, LogStream, PodInfo, ResourceRef,
    ServerVersion,
};
use crate::core::errors::{PeriscopeError, Result};

/// Concurrent in-flight request cap applied across all collectors.
const REQUEST_LIMIT: usize = 10;

/// Kube-backed cluster access.
pub struct KubeCluster {
    client: kube::Client,
    limiter: Arc<Semaphore>,
}

impl KubeCluster {
    /// Connect using the inferred REST config (KUBECONFIG, then in-cluster).
    pub async fn connect() -> Result<Self> {
        let config = kube::Config::infer().await.map_err(|e| {
            PeriscopeError::network(format!("loading kubernetes config: {e}"))
        })?;
        let client = kube::Client::try_from(config)?;
        Ok(Self {
            client,
            limiter: Arc::new(Semaphore::new(REQUEST_LIMIT)),
        })
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.limiter
            .acquire()
            .await
            .map_err(|_| PeriscopeError::internal("request limiter closed"))
    }

    fn api_resource(resource: &ResourceRef) -> ApiResource {
        ApiResource {
            group: resource.group.clone(),
            version: resource.version.clone(),
            api_version: resource.api_version(),
            kind: resource.kind.clone(),
            plural: resource.plural.clone(),
        }
    }

    fn dynamic_api(&self, resource: &ResourceRef, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = Self::api_resource(resource);
        match (resource.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn pods_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterAccess for KubeCluster {
    async fn server_version(&self) -> Result<ServerVersion> {
        let _permit = self.permit().await?;
        let info = self.client.apiserver_version().await?;
        Ok(ServerVersion {
            major: info.major,
            minor: info.minor,
            git_version: info.git_version,
            platform: info.platform,
        })
    }

    async fn list_api_resources(&self) -> Result<Vec<ResourceRef>> {
        let _permit = self.permit().await?;
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut resources = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if !caps.supports_operation(verbs::LIST) {
                    continue;
                }
                resources.push(ResourceRef {
                    group: ar.group.clone(),
                    version: ar.version.clone(),
                    kind: ar.kind.clone(),
                    plural: ar.plural.clone(),
                    namespaced: caps.scope == Scope::Namespaced,
                });
            }
        }
        Ok(resources)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let objects = self
            .list_objects(&ResourceRef::namespaces(), None, None)
            .await?;
        Ok(objects
            .iter()
            .filter_map(|o| o.pointer("/metadata/name"))
            .filter_map(serde_json::Value::as_str)
            .map(str::to_string)
            .collect())
    }

    async fn list_objects(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<serde_json::Value>> {
        let _permit = self.permit().await?;
        let api = self.dynamic_api(resource, namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = api.list(&params).await?;
        let mut items = Vec::with_capacity(list.items.len());
        for obj in list.items {
            items.push(serde_json::to_value(&obj)?);
        }
        Ok(items)
    }

    async fn get_object(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<serde_json::Value>> {
        let _permit = self.permit().await?;
        let api = self.dynamic_api(resource, namespace);
        match api.get(name).await {
            Ok(obj) => Ok(Some(serde_json::to_value(&obj)?)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_object(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        manifest: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let _permit = self.permit().await?;
        let api = self.dynamic_api(resource, namespace);
        let obj: DynamicObject = serde_json::from_value(manifest)?;
        let created = api.create(&PostParams::default(), &obj).await?;
        Ok(serde_json::to_value(&created)?)
    }

    async fn delete_object(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let _permit = self.permit().await?;
        let api = self.dynamic_api(resource, namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<PodInfo>> {
        let _permit = self.permit().await?;
        let api: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = api.list(&params).await?;
        Ok(list
            .items
            .into_iter()
            .map(|pod| {
                let containers = pod
                    .spec
                    .as_ref()
                    .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_default();
                PodInfo {
                    namespace: pod.metadata.namespace.clone().unwrap_or_default(),
                    name: pod.metadata.name.clone().unwrap_or_default(),
                    containers,
                    node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
                    phase: pod
                        .status
                        .as_ref()
                        .and_then(|s| s.phase.clone())
                        .unwrap_or_default(),
                    labels: pod
                        .metadata
                        .labels
                        .map(|l| l.into_iter().collect::<BTreeMap<_, _>>())
                        .unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        options: &LogOptions,
    ) -> Result<LogStream> {
        let _permit = self.permit().await?;
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines: options.tail_lines,
            since_seconds: options.since_seconds,
            previous: options.previous,
            ..LogParams::default()
        };
        let stream = self.pods_api(namespace).log_stream(pod, &params).await?;
        Ok(Box::pin(stream.compat()))
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput> {
        let _permit = self.permit().await?;
        let mut params = AttachParams::default().stdout(true).stderr(true).stdin(false);
        if let Some(container) = container {
            params = params.container(container);
        }
        let mut attached = self
            .pods_api(namespace)
            .exec(pod, command.to_vec(), &params)
            .await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();
        let stdout_fut = async {
            if let Some(mut reader) = stdout_reader {
                let _ = reader.read_to_end(&mut stdout).await;
            }
        };
        let stderr_fut = async {
            if let Some(mut reader) = stderr_reader {
                let _ = reader.read_to_end(&mut stderr).await;
            }
        };
        tokio::join!(stdout_fut, stderr_fut);

        let status = match attached.take_status() {
            Some(status_fut) => status_fut.await,
            None => None,
        };
        let exit_code = exit_code_from_status(status.as_ref());
        if let Err(e) = attached.join().await {
            warn!(pod, error = %e, "exec stream join failed");
        }

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn can_i(
        &self,
        verb: &str,
        group: &str,
        resource: &str,
        namespace: Option<&str>,
    ) -> Result<bool> {
        let _permit = self.permit().await?;
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    verb: Some(verb.to_string()),
                    group: Some(group.to_string()),
                    resource: Some(resource.to_string()),
                    namespace: namespace.map(str::to_string),
                    ..ResourceAttributes::default()
                }),
                ..SelfSubjectAccessReviewSpec::default()
            },
            ..SelfSubjectAccessReview::default()
        };
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let created = api.create(&PostParams::default(), &review).await?;
        let allowed = created.status.map(|s| s.allowed).unwrap_or(false);
        debug!(verb, resource, allowed, "self-subject access review");
        Ok(allowed)
    }

    async fn port_forward(&self, namespace: &str, pod: &str, port: u16) -> Result<ForwardStream> {
        let _permit = self.permit().await?;
        let mut forwarder = self.pods_api(namespace).portforward(pod, &[port]).await?;
        let stream = forwarder.take_stream(port).ok_or_else(|| {
            PeriscopeError::network(format!("no forward stream for port {port}"))
        })?;
        // Keep the forwarder driving the websocket until the stream closes.
        tokio::spawn(async move {
            if let Err(e) = forwarder.join().await {
                warn!(error = %e, "port-forward terminated");
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Map an exec Status object to a process exit code.
fn exit_code_from_status(
    status: Option<&k8s_openapi::apimachinery::pkg::apis::meta::v1::Status>,
) -> i32 {
    let Some(status) = status else { return 0 };
    if status.status.as_deref() == Some("Success") {
        return 0;
    }
    status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|c| c.reason.as_deref() == Some("ExitCode"))
                .and_then(|c| c.message.as_ref())
                .and_then(|m| m.parse::<i32>().ok())
        })
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Status, StatusCause, StatusDetails};

    #[test]
    fn exit_code_success() {
        let status = Status {
            status: Some("Success".to_string()),
            ..Status::default()
        };
        assert_eq!(exit_code_from_status(Some(&status)), 0);
        assert_eq!(exit_code_from_status(None), 0);
    }

    #[test]
    fn exit_code_from_failure_causes() {
        let status = Status {
            status: Some("Failure".to_string()),
            details: Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    reason: Some("ExitCode".to_string()),
                    message: Some("3".to_string()),
                    ..StatusCause::default()
                }]),
                ..StatusDetails::default()
            }),
            ..Status::default()
        };
        assert_eq!(exit_code_from_status(Some(&status)), 3);
    }

    #[test]
    fn exit_code_defaults_to_one_on_opaque_failure() {
        let status = Status {
            status: Some("Failure".to_string()),
            ..Status::default()
        };
        assert_eq!(exit_code_from_status(Some(&status)), 1);
    }
}
