//! Streaming redaction pipeline.
//!
//! Every byte written into the bundle passes through here. Writes are framed
//! into whole-line units for the line-oriented rules; files that parse as
//! YAML or JSON additionally pass through structured-path redaction on a
//! buffered copy (bounded by a configurable limit, falling back to line-only
//! redaction with a recorded warning on overrun). Binary content bypasses
//! line redaction entirely.
//!
//! Order of application per file: file selector gate, structured paths,
//! literal values, gated regexes, multi-line lookback.

pub mod defaults;
pub mod rules;
pub mod structured;

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::types::RedactSpec;
pub use rules::SENTINEL;
use rules::{CompiledRule, LineRedactor};

/// What one file classified as, for rule routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Json,
    Yaml,
    Other,
}

fn classify(path: &str) -> ContentKind {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".json") {
        ContentKind::Json
    } else if lower.ends_with(".yaml") || lower.ends_with(".yml") {
        ContentKind::Yaml
    } else {
        ContentKind::Other
    }
}

/// Accumulated record of applied redactions and degradations.
#[derive(Debug, Default, Serialize)]
pub struct RedactionReport {
    /// rule name -> file -> substitution count
    pub redactions: BTreeMap<String, BTreeMap<String, u64>>,
    /// Pass-through degradations and buffer overruns
    pub warnings: Vec<String>,
}

impl RedactionReport {
    /// Record substitutions for a rule within a file.
    pub fn record(&mut self, rule: &str, file: &str, count: u64) {
        if count == 0 {
            return;
        }
        *self
            .redactions
            .entry(rule.to_string())
            .or_default()
            .entry(file.to_string())
            .or_default() += count;
    }

    /// Record a degradation.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// True when nothing was redacted and nothing degraded.
    pub fn is_empty(&self) -> bool {
        self.redactions.is_empty() && self.warnings.is_empty()
    }
}

/// The compiled redactor chain for one run.
pub struct Redactors {
    rules: Vec<CompiledRule>,
    buffer_limit: usize,
}

impl Redactors {
    /// Compile spec rules, optionally prepending the built-in defaults.
    pub fn compile(
        specs: &[RedactSpec],
        include_defaults: bool,
        buffer_limit: usize,
    ) -> Result<Self> {
        let mut all: Vec<RedactSpec> = Vec::new();
        if include_defaults {
            all.extend(defaults::default_redactors());
        }
        all.extend(specs.iter().cloned());

        let rules = all
            .iter()
            .enumerate()
            .map(|(i, spec)| CompiledRule::compile(spec, i))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            buffer_limit,
        })
    }

    /// A chain with no rules; every write passes through untouched.
    pub fn none() -> Self {
        Self {
            rules: Vec::new(),
            buffer_limit: usize::MAX,
        }
    }

    /// Redact a byte stream into a writer, recording applied rules.
    pub async fn redact_stream<R, W>(
        &self,
        path: &str,
        mut reader: R,
        mut writer: W,
        report: &Mutex<RedactionReport>,
    ) -> Result<()>
    where
        R: AsyncBufRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let applicable: Vec<&CompiledRule> =
            self.rules.iter().filter(|r| r.applies_to(path)).collect();
        if applicable.is_empty() {
            tokio::io::copy(&mut reader, &mut writer)
                .await
                .map_err(|e| PeriscopeError::io("copying unredacted stream", e))?;
            writer
                .flush()
                .await
                .map_err(|e| PeriscopeError::io("flushing bundle write", e))?;
            return Ok(());
        }

        // Binary sniff on the first buffered chunk: NUL bytes bypass line
        // redaction (structured rules cannot apply either, the content will
        // not parse).
        let head = reader
            .fill_buf()
            .await
            .map_err(|e| PeriscopeError::io("reading bundle source", e))?;
        if head.contains(&0) {
            tokio::io::copy(&mut reader, &mut writer)
                .await
                .map_err(|e| PeriscopeError::io("copying binary stream", e))?;
            writer
                .flush()
                .await
                .map_err(|e| PeriscopeError::io("flushing bundle write", e))?;
            return Ok(());
        }

        let kind = classify(path);
        let wants_structured = match kind {
            ContentKind::Json => applicable.iter().any(|r| !r.json_paths.is_empty()),
            ContentKind::Yaml => applicable.iter().any(|r| !r.yaml_paths.is_empty()),
            ContentKind::Other => false,
        };

        if wants_structured {
            let mut buffer = Vec::new();
            let limit = self.buffer_limit as u64;
            let mut limited = reader.take(limit.saturating_add(1));
            limited
                .read_to_end(&mut buffer)
                .await
                .map_err(|e| PeriscopeError::io("buffering structured document", e))?;
            let reader = limited.into_inner();

            if buffer.len() as u64 > limit {
                report.lock().warn(format!(
                    "{path}: document exceeds the {limit} byte structured-redaction buffer; line rules only"
                ));
                let chained =
                    tokio::io::BufReader::new(std::io::Cursor::new(buffer).chain(reader));
                return self
                    .line_mode(path, &applicable, chained, writer, report)
                    .await;
            }

            match self.structured_pass(path, kind, &buffer, &applicable, report) {
                Some(rewritten) => {
                    let cursor = tokio::io::BufReader::new(std::io::Cursor::new(rewritten));
                    return self
                        .line_mode(path, &applicable, cursor, writer, report)
                        .await;
                }
                None => {
                    // Not parseable as its extension suggests; line rules only.
                    let cursor = tokio::io::BufReader::new(std::io::Cursor::new(buffer));
                    return self
                        .line_mode(path, &applicable, cursor, writer, report)
                        .await;
                }
            }
        }

        self.line_mode(path, &applicable, reader, writer, report)
            .await
    }

    /// Convenience for in-memory content.
    pub async fn redact_bytes(
        &self,
        path: &str,
        bytes: &[u8],
        report: &Mutex<RedactionReport>,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(bytes.len());
        self.redact_stream(
            path,
            tokio::io::BufReader::new(std::io::Cursor::new(bytes.to_vec())),
            std::io::Cursor::new(&mut out),
            report,
        )
        .await?;
        Ok(out)
    }

    /// Parse, apply structured paths, reserialize. `None` when the document
    /// does not parse as its extension suggests.
    fn structured_pass(
        &self,
        path: &str,
        kind: ContentKind,
        buffer: &[u8],
        applicable: &[&CompiledRule],
        report: &Mutex<RedactionReport>,
    ) -> Option<Vec<u8>> {
        match kind {
            ContentKind::Json => {
                let mut doc: serde_json::Value = serde_json::from_slice(buffer).ok()?;
                for rule in applicable {
                    let mut count = 0;
                    for segments in &rule.json_paths {
                        count += structured::redact_json_path(&mut doc, segments);
                    }
                    report.lock().record(&rule.name, path, count);
                }
                serde_json::to_vec_pretty(&doc).ok()
            }
            ContentKind::Yaml => {
                let mut doc: serde_yaml::Value = serde_yaml::from_slice(buffer).ok()?;
                for rule in applicable {
                    let mut count = 0;
                    for segments in &rule.yaml_paths {
                        count += structured::redact_yaml_path(&mut doc, segments);
                    }
                    report.lock().record(&rule.name, path, count);
                }
                serde_yaml::to_string(&doc).ok().map(String::into_bytes)
            }
            ContentKind::Other => None,
        }
    }

    async fn line_mode<R, W>(
        &self,
        path: &str,
        applicable: &[&CompiledRule],
        mut reader: R,
        mut writer: W,
        report: &Mutex<RedactionReport>,
    ) -> Result<()>
    where
        R: AsyncBufRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let mut redactor = LineRedactor::new(applicable);
        let mut raw = Vec::new();
        let mut warned_utf8 = false;

        loop {
            raw.clear();
            let n = reader
                .read_until(b'\n', &mut raw)
                .await
                .map_err(|e| PeriscopeError::io("reading bundle source", e))?;
            if n == 0 {
                break;
            }

            let had_newline = raw.last() == Some(&b'\n');
            let body = if had_newline {
                &raw[..raw.len() - 1]
            } else {
                &raw[..]
            };

            match std::str::from_utf8(body) {
                Ok(line) => {
                    let redacted = redactor.process(line);
                    writer
                        .write_all(redacted.as_bytes())
                        .await
                        .map_err(|e| PeriscopeError::io("writing redacted line", e))?;
                }
                Err(_) => {
                    // Invalid UTF-8 degrades to pass-through for this chunk.
                    if !warned_utf8 {
                        warn!(path, "invalid UTF-8; passing chunk through unredacted");
                        report
                            .lock()
                            .warn(format!("{path}: invalid UTF-8 chunk passed through"));
                        warned_utf8 = true;
                    }
                    writer
                        .write_all(body)
                        .await
                        .map_err(|e| PeriscopeError::io("writing raw line", e))?;
                }
            }
            if had_newline {
                writer
                    .write_all(b"\n")
                    .await
                    .map_err(|e| PeriscopeError::io("writing newline", e))?;
            }
        }

        for (rule, count) in redactor.counts {
            report.lock().record(&rule, path, count);
        }
        writer
            .flush()
            .await
            .map_err(|e| PeriscopeError::io("flushing bundle write", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::types::{FileSelector, RegexRedact, Removals};

    fn report() -> Mutex<RedactionReport> {
        Mutex::new(RedactionReport::default())
    }

    fn literal_redactors(values: &[&str]) -> Redactors {
        Redactors::compile(
            &[RedactSpec {
                name: Some("literals".into()),
                file_selector: None,
                removals: Removals {
                    values: values.iter().map(|s| s.to_string()).collect(),
                    ..Removals::default()
                },
            }],
            false,
            1024 * 1024,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn literal_value_is_replaced_in_stream() {
        let redactors = literal_redactors(&["sk-XYZ"]);
        let report = report();
        let out = redactors
            .redact_bytes("files/token.txt", b"token=sk-XYZ\n", &report)
            .await
            .unwrap();
        assert_eq!(out, b"token=***HIDDEN***\n");
        assert_eq!(report.lock().redactions["literals"]["files/token.txt"], 1);
    }

    #[tokio::test]
    async fn no_matching_rules_passes_bytes_through() {
        let redactors = Redactors::compile(
            &[RedactSpec {
                name: None,
                file_selector: Some(FileSelector {
                    file: Some("other/**".into()),
                    files: vec![],
                }),
                removals: Removals {
                    values: vec!["secret".into()],
                    ..Removals::default()
                },
            }],
            false,
            1024,
        )
        .unwrap();
        let report = report();
        let out = redactors
            .redact_bytes("files/a.txt", b"secret stays\n", &report)
            .await
            .unwrap();
        assert_eq!(out, b"secret stays\n");
    }

    #[tokio::test]
    async fn yaml_path_rules_rewrite_structured_documents() {
        let redactors = Redactors::compile(
            &[RedactSpec {
                name: Some("yaml".into()),
                file_selector: None,
                removals: Removals {
                    yaml_path: vec!["data.password".into()],
                    ..Removals::default()
                },
            }],
            false,
            1024 * 1024,
        )
        .unwrap();
        let report = report();
        let out = redactors
            .redact_bytes(
                "secrets/config.yaml",
                b"data:\n  password: hunter2\n  host: db\n",
                &report,
            )
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("hunter2"), "{text}");
        assert!(text.contains("host: db"));
        assert_eq!(report.lock().redactions["yaml"]["secrets/config.yaml"], 1);
    }

    #[tokio::test]
    async fn oversized_structured_documents_fall_back_to_line_rules() {
        let redactors = Redactors::compile(
            &[RedactSpec {
                name: Some("mixed".into()),
                file_selector: None,
                removals: Removals {
                    values: vec!["hunter2".into()],
                    yaml_path: vec!["data.password".into()],
                    ..Removals::default()
                },
            }],
            false,
            16, // force overflow
        )
        .unwrap();
        let report = report();
        let out = redactors
            .redact_bytes(
                "secrets/config.yaml",
                b"data:\n  password: hunter2\n  filler: aaaaaaaaaaaaaaaa\n",
                &report,
            )
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("hunter2"), "{text}");
        assert!(!report.lock().warnings.is_empty());
    }

    #[tokio::test]
    async fn binary_content_bypasses_line_redaction() {
        let redactors = literal_redactors(&["secret"]);
        let report = report();
        let payload = b"\x00\x01secret\x02".to_vec();
        let out = redactors
            .redact_bytes("files/blob.bin", &payload, &report)
            .await
            .unwrap();
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn invalid_utf8_chunks_degrade_to_pass_through_with_warning() {
        let redactors = literal_redactors(&["secret"]);
        let report = report();
        let payload = b"secret\n\xff\xfe broken\nsecret\n".to_vec();
        let out = redactors
            .redact_bytes("files/mixed.txt", &payload, &report)
            .await
            .unwrap();
        let expected: &[u8] = b"***HIDDEN***\n\xff\xfe broken\n***HIDDEN***\n";
        assert_eq!(out, expected);
        assert_eq!(report.lock().warnings.len(), 1);
    }

    #[tokio::test]
    async fn selector_gated_regex_applies_only_on_matching_lines() {
        let redactors = Redactors::compile(
            &[RedactSpec {
                name: Some("gated".into()),
                file_selector: None,
                removals: Removals {
                    regex: vec![RegexRedact {
                        selector: Some("^secret".into()),
                        redactor: r"=(?P<mask>\S+)".into(),
                    }],
                    ..Removals::default()
                },
            }],
            false,
            1024,
        )
        .unwrap();
        let report = report();
        let out = redactors
            .redact_bytes("f.txt", b"secret=abc\nplain=def\n", &report)
            .await
            .unwrap();
        assert_eq!(out, b"secret=***HIDDEN***\nplain=def\n");
    }
}
