//! Filesystem usage host collector (statvfs).

use async_trait::async_trait;

use crate::collect::host::{host_excluded, HostCollector, Payload};
use crate::collect::CollectorResult;
use crate::core::context::RunContext;
use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::types::FilesystemUsageCollect;

/// Result document shape shared with the filesystemUsage host analyzer.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemUsage {
    /// Directory that was statted
    pub path: String,
    /// Filesystem size in bytes
    pub total_bytes: u64,
    /// Free bytes (including reserved blocks)
    pub free_bytes: u64,
    /// Bytes available to unprivileged users
    pub available_bytes: u64,
    /// total - free
    pub used_bytes: u64,
    /// used / total * 100
    pub used_percent: f64,
}

/// Writes `host-collectors/filesystemUsage/<name>.json`.
pub struct FilesystemUsageCollector {
    spec: FilesystemUsageCollect,
}

impl FilesystemUsageCollector {
    /// Build from spec.
    pub fn new(spec: FilesystemUsageCollect) -> Self {
        Self { spec }
    }

    fn name(&self) -> String {
        self.spec
            .collector_name
            .clone()
            .unwrap_or_else(|| "filesystemUsage".to_string())
    }
}

#[allow(unsafe_code)]
fn statvfs(path: &str) -> Result<FilesystemUsage> {
    let c_path = std::ffi::CString::new(path)
        .map_err(|_| PeriscopeError::internal(format!("path {path:?} contains NUL")))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(PeriscopeError::io(
            format!("statvfs({path})"),
            std::io::Error::last_os_error(),
        ));
    }

    let block = stat.f_frsize as u64;
    let total = stat.f_blocks as u64 * block;
    let free = stat.f_bfree as u64 * block;
    let available = stat.f_bavail as u64 * block;
    let used = total.saturating_sub(free);
    let used_percent = if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    };

    Ok(FilesystemUsage {
        path: path.to_string(),
        total_bytes: total,
        free_bytes: free,
        available_bytes: available,
        used_bytes: used,
        used_percent,
    })
}

#[async_trait]
impl HostCollector for FilesystemUsageCollector {
    fn title(&self) -> String {
        format!("filesystemUsage/{}", self.spec.path)
    }

    fn slug(&self) -> String {
        format!("filesystemUsage-{}", self.name())
    }

    fn is_excluded(&self) -> Result<bool> {
        host_excluded(self.spec.exclude.as_ref())
    }

    async fn collect(&self, ctx: &RunContext) -> Result<CollectorResult> {
        ctx.checkpoint()?;
        let path = self.spec.path.clone();
        let usage = tokio::task::spawn_blocking(move || statvfs(&path))
            .await
            .map_err(|e| PeriscopeError::internal(format!("statvfs task failed: {e}")))??;

        let mut result = CollectorResult::new();
        result.insert(
            format!("host-collectors/filesystemUsage/{}.json", self.name()),
            Payload::json(&usage)?,
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statvfs_reports_consistent_numbers_for_tmp() {
        let usage = statvfs("/tmp").unwrap();
        assert!(usage.total_bytes > 0);
        assert!(usage.free_bytes <= usage.total_bytes);
        assert!(usage.available_bytes <= usage.total_bytes);
        assert!((0.0..=100.0).contains(&usage.used_percent));
    }

    #[test]
    fn missing_path_is_an_io_error() {
        assert!(statvfs("/definitely/not/a/real/path").is_err());
    }
}
