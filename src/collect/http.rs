//! HTTP request collector.
//!
//! Issues one GET or POST and records status, headers, and body. Transport
//! failures are part of the result document, not collector errors, so
//! analyzers can assert on unreachable endpoints.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::collect::{evaluate_exclude, CollectEnv, Collector, CollectorResult, Payload};
use crate::core::context::RunContext;
use crate::core::errors::{PeriscopeError, RbacDenial, Result};
use crate::core::spec::types::{parse_duration, HttpCollect};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpResponseRecord {
    status: u16,
    headers: BTreeMap<String, String>,
    body: String,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<HttpResponseRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Writes `<collectorName|result>.json`.
pub struct HttpCollector {
    spec: HttpCollect,
}

impl HttpCollector {
    /// Build from spec.
    pub fn new(spec: HttpCollect) -> Self {
        Self { spec }
    }

    fn timeout(&self) -> Result<Duration> {
        self.spec
            .timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map(|t| t.unwrap_or(DEFAULT_TIMEOUT))
    }

    async fn perform(&self) -> Result<HttpResult> {
        let (url, insecure, headers, body) = match (&self.spec.get, &self.spec.post) {
            (Some(get), None) => (
                get.url.clone(),
                get.insecure_skip_verify,
                get.headers.clone(),
                None,
            ),
            (None, Some(post)) => (
                post.url.clone(),
                post.insecure_skip_verify,
                post.headers.clone(),
                Some(post.body.clone()),
            ),
            _ => {
                return Err(PeriscopeError::spec(
                    "",
                    "http-method-required",
                    "exactly one of get or post must be set",
                ))
            }
        };

        let client = reqwest::Client::builder()
            .timeout(self.timeout()?)
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(PeriscopeError::from)?;

        let mut request = match body {
            Some(ref content) => client.post(&url).body(content.clone()),
            None => client.get(&url),
        };
        for (name, value) in &headers {
            request = request.header(name, value);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers = response
                    .headers()
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.as_str().to_string(),
                            v.to_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect();
                let body = response.text().await.unwrap_or_default();
                Ok(HttpResult {
                    response: Some(HttpResponseRecord {
                        status,
                        headers,
                        body,
                    }),
                    error: None,
                })
            }
            Err(e) => Ok(HttpResult {
                response: None,
                error: Some(e.to_string()),
            }),
        }
    }
}

#[async_trait]
impl Collector for HttpCollector {
    fn title(&self) -> String {
        format!(
            "http/{}",
            self.spec.collector_name.as_deref().unwrap_or("result")
        )
    }

    fn is_excluded(&self) -> Result<bool> {
        evaluate_exclude(self.spec.exclude.as_ref())
    }

    fn requested_timeout(&self) -> Option<Duration> {
        self.spec
            .timeout
            .as_deref()
            .and_then(|t| parse_duration(t).ok())
    }

    async fn check_rbac(&self, _ctx: &RunContext) -> Result<Vec<RbacDenial>> {
        // Plain outbound HTTP; no cluster verbs involved.
        Ok(Vec::new())
    }

    async fn collect(&self, env: &CollectEnv) -> Result<CollectorResult> {
        env.ctx.checkpoint()?;
        let record = self.perform().await?;
        let name = self.spec.collector_name.as_deref().unwrap_or("result");
        let mut result = CollectorResult::new();
        result.insert(format!("{name}.json"), Payload::json(&record)?);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::collect::testutil::collect_env;
    use crate::core::spec::types::HttpGet;

    #[tokio::test]
    async fn unreachable_endpoint_is_recorded_not_fatal() {
        let harness = collect_env(FakeCluster::new());
        let collector = HttpCollector::new(HttpCollect {
            collector_name: Some("healthz".into()),
            get: Some(HttpGet {
                // Reserved TEST-NET address: connection fails fast.
                url: "http://192.0.2.1:1/healthz".into(),
                ..HttpGet::default()
            }),
            timeout: Some("1s".into()),
            ..HttpCollect::default()
        });

        let result = collector.collect(&harness.env).await.unwrap();
        let Payload::Bytes(bytes) = result.get("healthz.json").unwrap() else {
            panic!("expected bytes")
        };
        let body: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        assert!(body.get("error").is_some());
        assert!(body.get("response").is_none());
    }

    #[test]
    fn per_collector_timeout_is_surfaced_to_the_scheduler() {
        let collector = HttpCollector::new(HttpCollect {
            get: Some(HttpGet {
                url: "http://example.com".into(),
                ..HttpGet::default()
            }),
            timeout: Some("5s".into()),
            ..HttpCollect::default()
        });
        assert_eq!(collector.requested_timeout(), Some(Duration::from_secs(5)));
    }
}
