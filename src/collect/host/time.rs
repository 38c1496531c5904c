//! Host clock, timezone, and NTP sync state.

use async_trait::async_trait;
use chrono::Utc;

use crate::collect::host::{host_excluded, HostCollector, Payload};
use crate::collect::CollectorResult;
use crate::core::context::RunContext;
use crate::core::errors::Result;
use crate::core::spec::types::TimeCollect;

/// Result document shape shared with the time host analyzer.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeInfo {
    /// Host wall clock in RFC 3339
    pub timestamp: String,
    /// IANA timezone name, when resolvable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// NTP sync state: "synchronized", "unsynchronized", or "unknown"
    pub ntp_status: String,
}

/// Writes `host-collectors/time/<name>.json`.
pub struct TimeCollector {
    spec: TimeCollect,
}

impl TimeCollector {
    /// Build from spec.
    pub fn new(spec: TimeCollect) -> Self {
        Self { spec }
    }
}

/// Resolve the host timezone from /etc/timezone or the /etc/localtime link.
async fn read_timezone() -> Option<String> {
    if let Ok(tz) = tokio::fs::read_to_string("/etc/timezone").await {
        let tz = tz.trim();
        if !tz.is_empty() {
            return Some(tz.to_string());
        }
    }
    let link = tokio::fs::read_link("/etc/localtime").await.ok()?;
    let text = link.to_string_lossy();
    text.split("zoneinfo/").nth(1).map(str::to_string)
}

/// Query timedatectl for NTP sync state; "unknown" when unavailable.
async fn read_ntp_status() -> String {
    let output = tokio::process::Command::new("timedatectl")
        .args(["show", "--property=NTPSynchronized", "--value"])
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            match String::from_utf8_lossy(&out.stdout).trim() {
                "yes" => "synchronized".to_string(),
                "no" => "unsynchronized".to_string(),
                _ => "unknown".to_string(),
            }
        }
        _ => "unknown".to_string(),
    }
}

#[async_trait]
impl HostCollector for TimeCollector {
    fn title(&self) -> String {
        "time".to_string()
    }

    fn is_excluded(&self) -> Result<bool> {
        host_excluded(self.spec.exclude.as_ref())
    }

    async fn collect(&self, ctx: &RunContext) -> Result<CollectorResult> {
        ctx.checkpoint()?;
        let info = TimeInfo {
            timestamp: Utc::now().to_rfc3339(),
            timezone: read_timezone().await,
            ntp_status: read_ntp_status().await,
        };

        let name = self.spec.collector_name.as_deref().unwrap_or("time");
        let mut result = CollectorResult::new();
        result.insert(
            format!("host-collectors/time/{name}.json"),
            Payload::json(&info)?,
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
    async fn collects_a_timestamped_document() {
        let ctx = RunContext::new(Arc::new(FakeCluster::new()), RunOptions::default());
        let collector = TimeCollector::new(TimeCollect::default());
        let result = collector.collect(&ctx).await.unwrap();
        let Payload::Bytes(bytes) = result.get("host-collectors/time/time.json").unwrap() else {
            panic!("expected bytes")
        };
        let info: TimeInfo = serde_json::from_slice(bytes).unwrap();
        assert!(!info.timestamp.is_empty());
        assert!(
            ["synchronized", "unsynchronized", "unknown"].contains(&info.ntp_status.as_str())
        );
    }
}
