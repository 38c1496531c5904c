//! TCP/UDP port availability probes.
//!
//! A probe binds the requested port: success means "available", an
//! in-use error means something already listens, anything else is an
//! error status. The socket is released immediately.

use async_trait::async_trait;

use crate::collect::host::{host_excluded, HostCollector, Payload};
use crate::collect::CollectorResult;
use crate::core::context::RunContext;
use crate::core::errors::Result;
use crate::core::spec::types::{TcpPortCollect, UdpPortCollect};

/// Result document shape shared with the port host analyzers.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortStatus {
    /// Probed port
    pub port: u16,
    /// Interface address that was bound
    pub interface: String,
    /// "available", "in-use", or "error"
    pub status: String,
    /// OS error detail for the error status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn classify_bind<T>(result: std::io::Result<T>, port: u16, interface: &str) -> PortStatus {
    match result {
        Ok(_) => PortStatus {
            port,
            interface: interface.to_string(),
            status: "available".to_string(),
            message: None,
        },
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => PortStatus {
            port,
            interface: interface.to_string(),
            status: "in-use".to_string(),
            message: None,
        },
        Err(e) => PortStatus {
            port,
            interface: interface.to_string(),
            status: "error".to_string(),
            message: Some(e.to_string()),
        },
    }
}

/// Writes `host-collectors/tcpPort/<name>.json`.
pub struct TcpPortCollector {
    spec: TcpPortCollect,
}

impl TcpPortCollector {
    /// Build from spec.
    pub fn new(spec: TcpPortCollect) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl HostCollector for TcpPortCollector {
    fn title(&self) -> String {
        format!("tcpPort/{}", self.spec.port)
    }

    fn is_excluded(&self) -> Result<bool> {
        host_excluded(self.spec.exclude.as_ref())
    }

    async fn collect(&self, ctx: &RunContext) -> Result<CollectorResult> {
        ctx.checkpoint()?;
        let interface = self.spec.interface.as_deref().unwrap_or("0.0.0.0");
        let status = classify_bind(
            tokio::net::TcpListener::bind((interface, self.spec.port)).await,
            self.spec.port,
            interface,
        );

        let name = self
            .spec
            .collector_name
            .clone()
            .unwrap_or_else(|| self.spec.port.to_string());
        let mut result = CollectorResult::new();
        result.insert(
            format!("host-collectors/tcpPort/{name}.json"),
            Payload::json(&status)?,
        );
        Ok(result)
    }
}

/// Writes `host-collectors/udpPort/<name>.json`.
pub struct UdpPortCollector {
    spec: UdpPortCollect,
}

impl UdpPortCollector {
    /// Build from spec.
    pub fn new(spec: UdpPortCollect) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl HostCollector for UdpPortCollector {
    fn title(&self) -> String {
        format!("udpPort/{}", self.spec.port)
    }

    fn is_excluded(&self) -> Result<bool> {
        host_excluded(self.spec.exclude.as_ref())
    }

    async fn collect(&self, ctx: &RunContext) -> Result<CollectorResult> {
        ctx.checkpoint()?;
        let interface = self.spec.interface.as_deref().unwrap_or("0.0.0.0");
        let status = classify_bind(
            tokio::net::UdpSocket::bind((interface, self.spec.port)).await,
            self.spec.port,
            interface,
        );

        let name = self
            .spec
            .collector_name
            .clone()
            .unwrap_or_else(|| self.spec.port.to_string());
        let mut result = CollectorResult::new();
        result.insert(
            format!("host-collectors/udpPort/{name}.json"),
            Payload::json(&status)?,
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::core::context::{RunContext, RunOptions};
    use std::sync::Arc;

    #[tokio::test]
    async fn ephemeral_port_probe_reports_available() {
        let ctx = RunContext::new(Arc::new(FakeCluster::new()), RunOptions::default());
        let collector = TcpPortCollector::new(TcpPortCollect {
            collector_name: Some("probe".into()),
            port: 0,
            interface: Some("127.0.0.1".into()),
            ..TcpPortCollect::default()
        });
        let result = collector.collect(&ctx).await.unwrap();
        let Payload::Bytes(bytes) = result.get("host-collectors/tcpPort/probe.json").unwrap()
        else {
            panic!("expected bytes")
        };
        let status: PortStatus = serde_json::from_slice(bytes).unwrap();
        assert_eq!(status.status, "available");
    }

    #[tokio::test]
    async fn occupied_tcp_port_reports_in_use() {
        let holder = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let ctx = RunContext::new(Arc::new(FakeCluster::new()), RunOptions::default());
        let collector = TcpPortCollector::new(TcpPortCollect {
            port,
            interface: Some("127.0.0.1".into()),
            ..TcpPortCollect::default()
        });
        let result = collector.collect(&ctx).await.unwrap();
        let path = format!("host-collectors/tcpPort/{port}.json");
        let Payload::Bytes(bytes) = result.get(&path).unwrap() else {
            panic!("expected bytes")
        };
        let status: PortStatus = serde_json::from_slice(bytes).unwrap();
        assert_eq!(status.status, "in-use");
    }
}
