//! Host analyzers: verdicts over host collector output.

use std::collections::BTreeMap;

use crate::analyze::{compare, outcomes, read_json_opt, AnalyzeResult, Analyzer};
use crate::bundle::store::BundleReader;
use crate::collect::evaluate_exclude;
use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::types::{FilesystemUsageAnalyze, PortAnalyze, TimeAnalyze};

/// Filesystem usage verdicts.
///
/// `when` forms: `available < 10Gi`, `usedPercent > 90`, `total >= 100Gi`,
/// or a bare comparison which targets available bytes.
pub struct FilesystemUsageAnalyzer {
    spec: FilesystemUsageAnalyze,
}

impl FilesystemUsageAnalyzer {
    /// Build from spec.
    pub fn new(spec: FilesystemUsageAnalyze) -> Self {
        Self { spec }
    }
}

impl Analyzer for FilesystemUsageAnalyzer {
    fn title(&self) -> String {
        self.spec
            .check_name
            .clone()
            .unwrap_or_else(|| format!("Filesystem Usage: {}", self.spec.collector_name))
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn is_strict(&self) -> Result<bool> {
        evaluate_exclude(self.spec.strict.as_ref())
    }

    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult> {
        let path = format!(
            "host-collectors/filesystemUsage/{}.json",
            self.spec.collector_name
        );
        let Some(doc) = read_json_opt(bundle, &path)? else {
            return Ok(AnalyzeResult::warned(
                self.title(),
                format!("{path} was not collected"),
            ));
        };

        let field = |name: &str| -> f64 {
            doc.get(name)
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0)
        };
        let available = field("availableBytes");
        let total = field("totalBytes");
        let used = field("usedBytes");
        let used_percent = field("usedPercent");

        let mut vars = BTreeMap::new();
        vars.insert("Path".to_string(), doc.get("path").and_then(serde_json::Value::as_str).unwrap_or_default().to_string());
        vars.insert("AvailableBytes".to_string(), format!("{available}"));
        vars.insert("UsedPercent".to_string(), format!("{used_percent:.1}"));

        let (severity, spec) =
            outcomes::evaluate_outcomes(&self.spec.outcomes, &vars, |when| {
                let when = when.trim();
                for (prefix, value) in [
                    ("available", available),
                    ("total", total),
                    ("used_percent", used_percent),
                    ("usedPercent", used_percent),
                    ("used", used),
                ] {
                    if let Some(rest) = when.strip_prefix(prefix) {
                        return compare::compare_quantities(value, rest.trim());
                    }
                }
                compare::compare_quantities(available, when)
            })?;
        Ok(AnalyzeResult::from_outcome(self.title(), severity, spec))
    }
}

/// NTP sync and timezone verdicts.
///
/// `when` forms: `ntp == synchronized|unsynchronized|unknown`,
/// `timezone == UTC`.
pub struct TimeAnalyzer {
    spec: TimeAnalyze,
}

impl TimeAnalyzer {
    /// Build from spec.
    pub fn new(spec: TimeAnalyze) -> Self {
        Self { spec }
    }
}

impl Analyzer for TimeAnalyzer {
    fn title(&self) -> String {
        self.spec
            .check_name
            .clone()
            .unwrap_or_else(|| "Host Time".to_string())
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn is_strict(&self) -> Result<bool> {
        evaluate_exclude(self.spec.strict.as_ref())
    }

    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult> {
        let path = "host-collectors/time/time.json";
        let Some(doc) = read_json_opt(bundle, path)? else {
            return Ok(AnalyzeResult::warned(
                self.title(),
                format!("{path} was not collected"),
            ));
        };

        let ntp = doc
            .get("ntpStatus")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let timezone = doc
            .get("timezone")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut vars = BTreeMap::new();
        vars.insert("NtpStatus".to_string(), ntp.clone());
        vars.insert("Timezone".to_string(), timezone.clone());

        let (severity, spec) =
            outcomes::evaluate_outcomes(&self.spec.outcomes, &vars, |when| {
                let when = when.trim();
                if let Some(rest) = when.strip_prefix("ntp") {
                    return compare::compare_strings(&ntp, rest.trim());
                }
                if let Some(rest) = when.strip_prefix("timezone") {
                    return compare::compare_strings(&timezone, rest.trim());
                }
                Err(PeriscopeError::spec(
                    "",
                    "invalid-when",
                    format!("cannot evaluate {when:?}"),
                ))
            })?;
        Ok(AnalyzeResult::from_outcome(self.title(), severity, spec))
    }
}

/// TCP/UDP port probe verdicts. `when` compares the probe status string:
/// `== available`, `!= in-use`, or a bare status word.
pub struct PortAnalyzer {
    spec: PortAnalyze,
    kind: &'static str,
}

impl PortAnalyzer {
    /// TCP flavor.
    pub fn tcp(spec: PortAnalyze) -> Self {
        Self {
            spec,
            kind: "tcpPort",
        }
    }

    /// UDP flavor.
    pub fn udp(spec: PortAnalyze) -> Self {
        Self {
            spec,
            kind: "udpPort",
        }
    }
}

impl Analyzer for PortAnalyzer {
    fn title(&self) -> String {
        self.spec
            .check_name
            .clone()
            .unwrap_or_else(|| format!("Port Status: {}/{}", self.kind, self.spec.collector_name))
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn is_strict(&self) -> Result<bool> {
        evaluate_exclude(self.spec.strict.as_ref())
    }

    fn analyze(&self, bundle: &dyn BundleReader) -> Result<AnalyzeResult> {
        let path = format!(
            "host-collectors/{}/{}.json",
            self.kind, self.spec.collector_name
        );
        let Some(doc) = read_json_opt(bundle, &path)? else {
            return Ok(AnalyzeResult::warned(
                self.title(),
                format!("{path} was not collected"),
            ));
        };

        let status = doc
            .get("status")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("error")
            .to_string();
        let port = doc
            .get("port")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or_default();

        let mut vars = BTreeMap::new();
        vars.insert("Status".to_string(), status.clone());
        vars.insert("Port".to_string(), port.to_string());

        let (severity, spec) =
            outcomes::evaluate_outcomes(&self.spec.outcomes, &vars, |when| {
                let when = when.trim();
                let expr = when.strip_prefix("status").map(str::trim).unwrap_or(when);
                compare::compare_strings(&status, expr)
            })?;
        Ok(AnalyzeResult::from_outcome(self.title(), severity, spec))
    }
}
