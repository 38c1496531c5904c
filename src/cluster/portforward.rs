//! Local TCP bridge over a pod port-forward.
//!
//! Binds an ephemeral loopback listener and pipes each accepted connection
//! through a fresh forward stream. Used by collectors that need to hand a
//! plain TCP endpoint to a client library (database pings against
//! in-cluster services).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::cluster::ClusterAccess;
use crate::core::errors::{PeriscopeError, Result};

/// A running local forward. Dropping the handle stops accepting new
/// connections; in-flight ones run to completion.
pub struct LocalForward {
    /// Loopback address clients should connect to
    pub local_addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl LocalForward {
    /// Stop the accept loop.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for LocalForward {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Bind 127.0.0.1:0 and forward each accepted connection to the pod port.
pub async fn local_forward(
    cluster: Arc<dyn ClusterAccess>,
    namespace: &str,
    pod: &str,
    port: u16,
) -> Result<LocalForward> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| PeriscopeError::io("binding port-forward listener", e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| PeriscopeError::io("reading listener address", e))?;

    let namespace = namespace.to_string();
    let pod = pod.to_string();
    let task = tokio::spawn(async move {
        loop {
            let (mut conn, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "port-forward accept failed");
                    break;
                }
            };
            debug!(%peer, pod = %pod, port, "forwarding connection");
            let stream = match cluster.port_forward(&namespace, &pod, port).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "opening forward stream failed");
                    continue;
                }
            };
            tokio::spawn(async move {
                let mut stream = stream;
                if let Err(e) = tokio::io::copy_bidirectional(&mut conn, &mut stream).await {
                    debug!(error = %e, "forwarded connection closed");
                }
            });
        }
    });

    Ok(LocalForward { local_addr, task })
}

/// Parse a "namespace/pod:port" forward target.
pub fn parse_forward_target(raw: &str) -> Result<(String, String, u16)> {
    let (ns_pod, port) = raw.rsplit_once(':').ok_or_else(|| {
        PeriscopeError::spec(
            "",
            "invalid-forward-target",
            format!("expected namespace/pod:port, got {raw:?}"),
        )
    })?;
    let (namespace, pod) = ns_pod.split_once('/').ok_or_else(|| {
        PeriscopeError::spec(
            "",
            "invalid-forward-target",
            format!("expected namespace/pod:port, got {raw:?}"),
        )
    })?;
    let port: u16 = port.parse().map_err(|_| {
        PeriscopeError::spec(
            "",
            "invalid-forward-target",
            format!("bad port in {raw:?}"),
        )
    })?;
    Ok((namespace.to_string(), pod.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_target_parsing() {
        assert_eq!(
            parse_forward_target("demo/postgres-0:5432").unwrap(),
            ("demo".to_string(), "postgres-0".to_string(), 5432)
        );
        assert!(parse_forward_target("no-port").is_err());
        assert!(parse_forward_target("demo:5432").is_err());
    }
}
