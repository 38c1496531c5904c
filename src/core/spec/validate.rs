//! Validation of the merged spec before any collection I/O.
//!
//! Fatal findings return a spec error with a JSON-pointer path and a
//! machine-readable code; advisory findings are returned as warnings.

use regex::Regex;

use crate::core::errors::{PeriscopeError, Result};
use crate::core::spec::types::{
    Analyze, BoolString, Collect, HostCollect, ResolvedSpec,
};

const DATABASE_SCHEMES: &[&str] = &["postgres", "postgresql", "mysql", "redis"];

/// Validate the merged spec. Returns warnings; the first fatal finding
/// aborts with a [`PeriscopeError::Spec`].
pub fn validate(spec: &ResolvedSpec) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    for (i, redactor) in spec.redactors.iter().enumerate() {
        for (j, rule) in redactor.removals.regex.iter().enumerate() {
            compile(
                &rule.redactor,
                &format!("/spec/redactors/{i}/removals/regex/{j}/redactor"),
            )?;
            if let Some(selector) = &rule.selector {
                compile(
                    selector,
                    &format!("/spec/redactors/{i}/removals/regex/{j}/selector"),
                )?;
            }
            if !rule.redactor.contains("(?P<mask>") {
                warnings.push(format!(
                    "redactor {} has no mask group; whole matches will be replaced",
                    redactor.name.as_deref().unwrap_or("unnamed")
                ));
            }
        }
        for (j, rule) in redactor.removals.multi_line.iter().enumerate() {
            compile(
                &rule.selector,
                &format!("/spec/redactors/{i}/removals/multiLine/{j}/selector"),
            )?;
            compile(
                &rule.redactor,
                &format!("/spec/redactors/{i}/removals/multiLine/{j}/redactor"),
            )?;
        }
    }

    for (i, collector) in spec.collectors.iter().enumerate() {
        validate_collector(collector, i, &mut warnings)?;
    }

    for (i, collector) in spec.host_collectors.iter().enumerate() {
        validate_host_exclude(collector, i)?;
    }

    for (i, analyzer) in spec.analyzers.iter().enumerate() {
        if analyzer.outcomes().is_empty() {
            return Err(PeriscopeError::spec(
                format!("/spec/analyzers/{i}/{}/outcomes", analyzer.variant()),
                "empty-outcomes",
                "analyzer declares no outcomes",
            ));
        }
        if let Analyze::TextAnalyze(text) = analyzer {
            if let Some(pattern) = &text.regex_pattern {
                compile(
                    pattern,
                    &format!("/spec/analyzers/{i}/textAnalyze/regexPattern"),
                )?;
            }
            if let Some(pattern) = &text.regex_groups {
                compile(
                    pattern,
                    &format!("/spec/analyzers/{i}/textAnalyze/regexGroups"),
                )?;
            }
            if text.regex_pattern.is_none() && text.regex_groups.is_none() {
                return Err(PeriscopeError::spec(
                    format!("/spec/analyzers/{i}/textAnalyze"),
                    "pattern-required",
                    "textAnalyze needs regexPattern or regexGroups",
                ));
            }
        }
    }

    for (i, analyzer) in spec.host_analyzers.iter().enumerate() {
        if analyzer.outcomes().is_empty() {
            return Err(PeriscopeError::spec(
                format!("/spec/hostAnalyzers/{i}/{}/outcomes", analyzer.variant()),
                "empty-outcomes",
                "analyzer declares no outcomes",
            ));
        }
    }

    warnings.extend(template_warnings(spec));

    Ok(warnings)
}

fn compile(pattern: &str, pointer: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| PeriscopeError::spec(pointer, "invalid-regex", e.to_string()))
}

fn validate_collector(
    collector: &Collect,
    index: usize,
    warnings: &mut Vec<String>,
) -> Result<()> {
    match collector {
        Collect::Http(http) => {
            if http.get.is_some() == http.post.is_some() {
                return Err(PeriscopeError::spec(
                    format!("/spec/collectors/{index}/http"),
                    "http-method-required",
                    "exactly one of get or post must be set",
                ));
            }
        }
        Collect::RunPod(run) => {
            if run.image.is_none() {
                return Err(PeriscopeError::spec(
                    format!("/spec/collectors/{index}/runPod/image"),
                    "image-required",
                    "runPod needs an image",
                ));
            }
        }
        Collect::DatabasePing(db) => {
            let scheme = db.uri.split("://").next().unwrap_or_default();
            if !DATABASE_SCHEMES.contains(&scheme) {
                return Err(PeriscopeError::spec(
                    format!("/spec/collectors/{index}/databasePing/uri"),
                    "unknown-uri-scheme",
                    format!("unsupported database scheme {scheme:?}"),
                ));
            }
        }
        Collect::RegistryImages(reg) => {
            if reg.images.is_empty() {
                warnings.push("registryImages collector lists no images".to_string());
            }
        }
        _ => {}
    }
    Ok(())
}

/// Host collector excludes evaluate against host facts only. A predicate
/// that references cluster facts would behave differently in an air-gapped
/// host-only run, so it is rejected outright.
fn validate_host_exclude(collector: &HostCollect, index: usize) -> Result<()> {
    if let Some(BoolString::String(raw)) = collector.exclude() {
        if raw.contains("cluster.") || raw.contains(".Cluster") {
            return Err(PeriscopeError::spec(
                format!("/spec/hostCollectors/{index}/{}/exclude", collector.variant()),
                "host-exclude-cluster-fact",
                "host collector excludes cannot reference cluster facts",
            ));
        }
    }
    Ok(())
}

/// Unevaluated template syntax surviving into the merged spec means a
/// v1beta3 document was loaded without values; surface it once per area.
fn template_warnings(spec: &ResolvedSpec) -> Vec<String> {
    let mut warnings = Vec::new();
    let rendered = serde_json::to_string(&spec.collectors).unwrap_or_default();
    if rendered.contains("{{") {
        warnings.push(
            "templated-value-unevaluated: collector fields contain template syntax".to_string(),
        );
    }
    let rendered = serde_json::to_string(&spec.analyzers).unwrap_or_default();
    if rendered.contains("{{") {
        warnings.push(
            "templated-value-unevaluated: analyzer fields contain template syntax".to_string(),
        );
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::types::*;

    fn spec_with_redactor(redactor: &str) -> ResolvedSpec {
        ResolvedSpec {
            redactors: vec![RedactSpec {
                name: Some("test".into()),
                file_selector: None,
                removals: Removals {
                    regex: vec![RegexRedact {
                        selector: None,
                        redactor: redactor.to_string(),
                    }],
                    ..Removals::default()
                },
            }],
            ..ResolvedSpec::default()
        }
    }

    #[test]
    fn malformed_regex_fails_validation_with_pointer() {
        let err = validate(&spec_with_redactor("([unclosed")).unwrap_err();
        match err {
            PeriscopeError::Spec { pointer, code, .. } => {
                assert_eq!(code, "invalid-regex");
                assert_eq!(pointer, "/spec/redactors/0/removals/regex/0/redactor");
            }
            other => panic!("expected spec error, got {other:?}"),
        }
    }

    #[test]
    fn missing_mask_group_is_a_warning_not_an_error() {
        let warnings = validate(&spec_with_redactor("token=\\S+")).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("mask"));
    }

    #[test]
    fn empty_outcomes_are_fatal() {
        let spec = ResolvedSpec {
            analyzers: vec![Analyze::ClusterVersion(ClusterVersionAnalyze::default())],
            ..ResolvedSpec::default()
        };
        let err = validate(&spec).unwrap_err();
        assert!(matches!(err, PeriscopeError::Spec { ref code, .. } if code == "empty-outcomes"));
    }

    #[test]
    fn host_exclude_referencing_cluster_facts_is_rejected() {
        let spec = ResolvedSpec {
            host_collectors: vec![HostCollect::Time(TimeCollect {
                exclude: Some(BoolString::String("cluster.version < 1.20".into())),
                ..TimeCollect::default()
            })],
            ..ResolvedSpec::default()
        };
        let err = validate(&spec).unwrap_err();
        assert!(
            matches!(err, PeriscopeError::Spec { ref code, .. } if code == "host-exclude-cluster-fact")
        );
    }

    #[test]
    fn database_scheme_is_checked() {
        let spec = ResolvedSpec {
            collectors: vec![Collect::DatabasePing(DatabasePingCollect {
                uri: "oracle://db:1521/xe".into(),
                ..DatabasePingCollect::default()
            })],
            ..ResolvedSpec::default()
        };
        let err = validate(&spec).unwrap_err();
        assert!(
            matches!(err, PeriscopeError::Spec { ref code, .. } if code == "unknown-uri-scheme")
        );
    }
}
