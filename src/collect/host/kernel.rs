//! Loaded kernel modules host collector (/proc/modules).

use async_trait::async_trait;

use crate::collect::host::{host_excluded, HostCollector, Payload};
use crate::collect::CollectorResult;
use crate::core::context::RunContext;
use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::types::KernelModulesCollect;

/// One loaded module.
#[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelModule {
    /// Module name
    pub name: String,
    /// Memory size in bytes
    pub size: u64,
    /// Reference count
    pub instances: u64,
}

/// Parse the /proc/modules format: `name size refcount deps state addr`.
pub fn parse_proc_modules(text: &str) -> Vec<KernelModule> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?.to_string();
            let size = fields.next()?.parse().ok()?;
            let instances = fields.next()?.parse().ok()?;
            Some(KernelModule {
                name,
                size,
                instances,
            })
        })
        .collect()
}

/// Writes `host-collectors/system/kernel-modules.json`.
pub struct KernelModulesCollector {
    spec: KernelModulesCollect,
}

impl KernelModulesCollector {
    /// Build from spec.
    pub fn new(spec: KernelModulesCollect) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl HostCollector for KernelModulesCollector {
    fn title(&self) -> String {
        "kernelModules".to_string()
    }

    fn is_excluded(&self) -> Result<bool> {
        host_excluded(self.spec.exclude.as_ref())
    }

    async fn collect(&self, ctx: &RunContext) -> Result<CollectorResult> {
        ctx.checkpoint()?;
        let text = tokio::fs::read_to_string("/proc/modules")
            .await
            .map_err(|e| PeriscopeError::io("reading /proc/modules", e))?;
        let modules = parse_proc_modules(&text);

        let name = self
            .spec
            .collector_name
            .as_deref()
            .unwrap_or("kernel-modules");
        let mut result = CollectorResult::new();
        result.insert(
            format!("host-collectors/system/{name}.json"),
            Payload::json(&modules)?,
        );
        Ok(result)
    }
}
