//! Database connectivity collector.
//!
//! The URI scheme selects the protocol: postgres/mysql connect through sqlx
//! and ask the server for its version; redis speaks RESP directly over TCP.
//! Connection failures are part of the result document so analyzers can
//! gate on them. An optional pod port-forward bridges to databases only
//! reachable inside the cluster.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::cluster::portforward::{local_forward, parse_forward_target};
use crate::collect::{evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload};
use crate::core::context::RunContext;
use crate::core::errors::{PeriscopeError, RbacDenial, Result};
use crate::core::spec::types::{parse_duration, DatabasePingCollect};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result document shape shared with the databasePing analyzer.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseOutput {
    /// Whether the connection and ping succeeded
    pub is_connected: bool,
    /// Connection error, when not connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server-reported version string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Writes `<collectorName|scheme>.json`.
pub struct DatabasePingCollector {
    spec: DatabasePingCollect,
}

impl DatabasePingCollector {
    /// Build from spec.
    pub fn new(spec: DatabasePingCollect) -> Self {
        Self { spec }
    }

    fn scheme(&self) -> &str {
        self.spec.uri.split("://").next().unwrap_or_default()
    }

    fn output_name(&self) -> String {
        self.spec
            .collector_name
            .clone()
            .unwrap_or_else(|| self.scheme().to_string())
    }

    fn timeout(&self) -> Duration {
        self.spec
            .timeout
            .as_deref()
            .and_then(|t| parse_duration(t).ok())
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    async fn ping(&self, env: &CollectEnv) -> DatabaseOutput {
        // Optionally bridge through a pod port-forward and rewrite the URI
        // authority to the local listener.
        let mut uri = self.spec.uri.clone();
        let _forward = match &self.spec.pod_port_forward {
            Some(target) => {
                let (namespace, pod, port) = match parse_forward_target(target) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        return DatabaseOutput {
                            error: Some(e.to_string()),
                            ..DatabaseOutput::default()
                        }
                    }
                };
                match local_forward(env.ctx.cluster.clone(), &namespace, &pod, port).await {
                    Ok(forward) => {
                        uri = rewrite_authority(&uri, &forward.local_addr.to_string());
                        debug!(uri = %uri, "database ping through port-forward");
                        Some(forward)
                    }
                    Err(e) => {
                        return DatabaseOutput {
                            error: Some(format!("port-forward failed: {e}")),
                            ..DatabaseOutput::default()
                        }
                    }
                }
            }
            None => None,
        };

        let timeout = self.timeout();
        let attempt = match self.scheme() {
            "postgres" | "postgresql" => ping_postgres(&uri, timeout).await,
            "mysql" => ping_mysql(&uri, timeout).await,
            "redis" => ping_redis(&uri, timeout).await,
            other => Err(PeriscopeError::spec(
                "",
                "unknown-uri-scheme",
                format!("unsupported database scheme {other:?}"),
            )),
        };

        match attempt {
            Ok(version) => DatabaseOutput {
                is_connected: true,
                error: None,
                version,
            },
            Err(e) => DatabaseOutput {
                is_connected: false,
                error: Some(e.to_string()),
                version: None,
            },
        }
    }
}

async fn ping_postgres(uri: &str, timeout: Duration) -> Result<Option<String>> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(timeout)
        .connect(uri)
        .await
        .map_err(|e| PeriscopeError::network(format!("postgres connect: {e}")))?;
    let version: String = sqlx::query_scalar("SELECT version()")
        .fetch_one(&pool)
        .await
        .map_err(|e| PeriscopeError::network(format!("postgres version query: {e}")))?;
    pool.close().await;
    Ok(Some(version))
}

async fn ping_mysql(uri: &str, timeout: Duration) -> Result<Option<String>> {
    let pool = sqlx::mysql::MySqlPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(timeout)
        .connect(uri)
        .await
        .map_err(|e| PeriscopeError::network(format!("mysql connect: {e}")))?;
    let version: String = sqlx::query_scalar("SELECT version()")
        .fetch_one(&pool)
        .await
        .map_err(|e| PeriscopeError::network(format!("mysql version query: {e}")))?;
    pool.close().await;
    Ok(Some(version))
}

/// RESP ping: `PING` expects `+PONG`, then `INFO server` is scanned for the
/// redis_version field.
async fn ping_redis(uri: &str, timeout: Duration) -> Result<Option<String>> {
    let authority = uri
        .split("://")
        .nth(1)
        .unwrap_or(uri)
        .split('/')
        .next()
        .unwrap_or_default();
    // Strip optional user:pass@ userinfo.
    let address = authority.rsplit('@').next().unwrap_or(authority);
    let address = if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:6379")
    };

    let connect = TcpStream::connect(&address);
    let mut stream = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| PeriscopeError::timeout(format!("redis connect to {address}")))?
        .map_err(|e| PeriscopeError::network(format!("redis connect: {e}")))?;

    stream
        .write_all(b"PING\r\n")
        .await
        .map_err(|e| PeriscopeError::network(format!("redis ping write: {e}")))?;
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(timeout, stream.read(&mut buf))
        .await
        .map_err(|_| PeriscopeError::timeout("redis ping response"))?
        .map_err(|e| PeriscopeError::network(format!("redis ping read: {e}")))?;
    if !buf[..n].starts_with(b"+PONG") {
        return Err(PeriscopeError::network(format!(
            "unexpected redis ping reply: {:?}",
            String::from_utf8_lossy(&buf[..n])
        )));
    }

    stream
        .write_all(b"INFO server\r\n")
        .await
        .map_err(|e| PeriscopeError::network(format!("redis info write: {e}")))?;
    let mut info = vec![0u8; 4096];
    let n = tokio::time::timeout(timeout, stream.read(&mut info))
        .await
        .map_err(|_| PeriscopeError::timeout("redis info response"))?
        .map_err(|e| PeriscopeError::network(format!("redis info read: {e}")))?;
    let text = String::from_utf8_lossy(&info[..n]);
    let version = text
        .lines()
        .find_map(|line| line.strip_prefix("redis_version:"))
        .map(|v| v.trim().to_string());
    Ok(version)
}

/// Replace the host:port authority of a database URI, preserving userinfo
/// and any path/query suffix.
fn rewrite_authority(uri: &str, new_authority: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let (authority, suffix) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    match authority.rsplit_once('@') {
        Some((userinfo, _)) => format!("{scheme}://{userinfo}@{new_authority}{suffix}"),
        None => format!("{scheme}://{new_authority}{suffix}"),
    }
}

#[async_trait]
impl Collector for DatabasePingCollector {
    fn title(&self) -> String {
        format!("database/{}", self.output_name())
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn requested_timeout(&self) -> Option<Duration> {
        // Give the run loop headroom beyond the connect timeout.
        Some(self.timeout() * 2)
    }

    async fn check_rbac(&self, ctx: &RunContext) -> Result<Vec<RbacDenial>> {
        if self.spec.pod_port_forward.is_some() {
            return crate::collect::check_access(
                ctx,
                &[("create", "", "pods/portforward", None)],
            )
            .await;
        }
        Ok(Vec::new())
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        env.ctx.checkpoint()?;
        let output = self.ping(env).await;
        let mut result = CollectorResult::new();
        result.insert(
            format!("{}.json", self.output_name()),
            Payload::json(&output)?,
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::collect::testutil::collect_env;

    #[test]
    fn authority_rewrite_preserves_userinfo_and_path() {
        assert_eq!(
            rewrite_authority("postgres://app:pw@db.svc:5432/app?sslmode=disable", "127.0.0.1:9999"),
            "postgres://app:pw@127.0.0.1:9999/app?sslmode=disable"
        );
        assert_eq!(
            rewrite_authority("redis://cache:6379", "127.0.0.1:1"),
            "redis://127.0.0.1:1"
        );
    }

    #[tokio::test]
    async fn redis_ping_against_live_listener() {
        // A minimal RESP server on a local socket.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = conn.read(&mut buf).await.unwrap();
            conn.write_all(b"+PONG\r\n").await.unwrap();
            let _ = conn.read(&mut buf).await.unwrap();
            conn.write_all(b"$25\r\nredis_version:7.2.4\r\n\r\n").await.unwrap();
        });

        let version = ping_redis(
            &format!("redis://{addr}"),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(version.as_deref(), Some("7.2.4"));
    }

    #[tokio::test]
    async fn unreachable_database_is_recorded_not_fatal() {
        let harness = collect_env(FakeCluster::new());
        let collector = DatabasePingCollector::new(DatabasePingCollect {
            collector_name: Some("cache".into()),
            uri: "redis://192.0.2.1:1".into(),
            timeout: Some("1s".into()),
            ..DatabasePingCollect::default()
        });
        let result = collector.collect(&harness.env).await.unwrap();
        let Payload::Bytes(bytes) = result.get("cache.json").unwrap() else {
            panic!("expected bytes")
        };
        let output: DatabaseOutput = serde_json::from_slice(bytes).unwrap();
        assert!(!output.is_connected);
        assert!(output.error.is_some());
    }
}
