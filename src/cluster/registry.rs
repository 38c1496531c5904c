//! Container registry access: manifest existence probes and OCI artifact
//! fetches over the plain Docker/OCI v2 HTTP API.
//!
//! Requests start anonymous (or basic-auth when credentials are supplied);
//! a `WWW-Authenticate: Bearer` challenge triggers the token dance against
//! the advertised realm.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use tracing::debug;

use crate::core::errors::{PeriscopeError, Result};

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry host (with optional port)
    pub registry: String,
    /// Repository path
    pub repository: String,
    /// Tag or digest
    pub reference: String,
}

/// Parse an image reference, applying Docker Hub conventions for bare names.
pub fn parse_image_ref(raw: &str) -> Result<ImageRef> {
    let raw = raw.trim().trim_start_matches("oci://");
    if raw.is_empty() {
        return Err(PeriscopeError::spec("", "invalid-image", "empty image reference"));
    }

    let (name, reference) = match raw.rsplit_once('@') {
        Some((name, digest)) => (name, digest.to_string()),
        None => {
            // A colon after the last slash is a tag; earlier colons belong
            // to the registry host port.
            let slash = raw.rfind('/').map(|i| i + 1).unwrap_or(0);
            match raw[slash..].rsplit_once(':') {
                Some((base, tag)) => (&raw[..slash + base.len()], tag.to_string()),
                None => (raw, "latest".to_string()),
            }
        }
    };

    let mut parts = name.splitn(2, '/');
    let first = parts.next().unwrap_or_default();
    let rest = parts.next();

    let (registry, repository) = match rest {
        Some(rest) if first.contains('.') || first.contains(':') || first == "localhost" => {
            (first.to_string(), rest.to_string())
        }
        Some(rest) => ("registry-1.docker.io".to_string(), format!("{first}/{rest}")),
        None => ("registry-1.docker.io".to_string(), format!("library/{first}")),
    };

    Ok(ImageRef {
        registry,
        repository,
        reference,
    })
}

/// Registry HTTP client.
pub struct RegistryClient {
    http: reqwest::Client,
    auth: Option<(String, String)>,
}

impl RegistryClient {
    /// Anonymous client.
    pub fn anonymous() -> Result<Self> {
        Self::build(None)
    }

    /// Client with basic-auth credentials.
    pub fn with_auth(username: &str, password: &str) -> Result<Self> {
        Self::build(Some((username.to_string(), password.to_string())))
    }

    fn build(auth: Option<(String, String)>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(PeriscopeError::from)?;
        Ok(Self { http, auth })
    }

    /// Whether a manifest exists for the image reference.
    pub async fn manifest_exists(&self, image: &str) -> Result<bool> {
        let image = parse_image_ref(image)?;
        let url = format!(
            "https://{}/v2/{}/manifests/{}",
            image.registry, image.repository, image.reference
        );
        let response = self.request(reqwest::Method::HEAD, &url, &image).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(PeriscopeError::network_endpoint(
                format!("manifest probe returned {status}"),
                url,
            )),
        }
    }

    /// Fetch the first layer of an OCI artifact as text (spec documents).
    pub async fn fetch_artifact(&self, reference: &str) -> Result<String> {
        let image = parse_image_ref(reference)?;
        let manifest_url = format!(
            "https://{}/v2/{}/manifests/{}",
            image.registry, image.repository, image.reference
        );
        let response = self
            .request(reqwest::Method::GET, &manifest_url, &image)
            .await?;
        if !response.status().is_success() {
            return Err(PeriscopeError::network_endpoint(
                format!("artifact manifest returned {}", response.status()),
                manifest_url,
            ));
        }
        let manifest: serde_json::Value = response.json().await?;
        let digest = manifest
            .pointer("/layers/0/digest")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                PeriscopeError::network_endpoint("artifact manifest has no layers", &manifest_url)
            })?;

        let blob_url = format!(
            "https://{}/v2/{}/blobs/{}",
            image.registry, image.repository, digest
        );
        let response = self
            .request(reqwest::Method::GET, &blob_url, &image)
            .await?;
        if !response.status().is_success() {
            return Err(PeriscopeError::network_endpoint(
                format!("artifact blob returned {}", response.status()),
                blob_url,
            ));
        }
        Ok(response.text().await?)
    }

    /// Issue a request, following one bearer-token challenge if returned.
    async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        image: &ImageRef,
    ) -> Result<reqwest::Response> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT));

        let mut builder = self.http.request(method.clone(), url).headers(headers.clone());
        if let Some((user, pass)) = &self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }
        let response = builder.send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();
        let token = self.bearer_token(&challenge, image).await?;

        let mut builder = self.http.request(method, url).headers(headers);
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        Ok(builder.send().await?)
    }

    async fn bearer_token(&self, challenge: &str, image: &ImageRef) -> Result<String> {
        let params = parse_bearer_challenge(challenge).ok_or_else(|| {
            PeriscopeError::network(format!("unsupported auth challenge {challenge:?}"))
        })?;
        let realm = params.realm;
        debug!(realm = %realm, "requesting registry bearer token");

        let scope = params
            .scope
            .unwrap_or_else(|| format!("repository:{}:pull", image.repository));
        let mut request = self.http.get(&realm).query(&[("scope", scope.as_str())]);
        if let Some(service) = &params.service {
            request = request.query(&[("service", service.as_str())]);
        }
        if let Some((user, pass)) = &self.auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PeriscopeError::network_endpoint(
                format!("token endpoint returned {}", response.status()),
                realm,
            ));
        }
        let body: serde_json::Value = response.json().await?;
        body.get("token")
            .or_else(|| body.get("access_token"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PeriscopeError::network("token endpoint returned no token"))
    }
}

struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let rest = header.trim().strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for part in rest.split(',') {
        let (k, v) = part.trim().split_once('=')?;
        let v = v.trim_matches('"').to_string();
        match k {
            "realm" => realm = Some(v),
            "service" => service = Some(v),
            "scope" => scope = Some(v),
            _ => {}
        }
    }
    Some(BearerChallenge {
        realm: realm?,
        service,
        scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_refs_parse_with_docker_hub_conventions() {
        assert_eq!(
            parse_image_ref("nginx").unwrap(),
            ImageRef {
                registry: "registry-1.docker.io".into(),
                repository: "library/nginx".into(),
                reference: "latest".into(),
            }
        );
        assert_eq!(
            parse_image_ref("quay.io/org/app:v1.2").unwrap(),
            ImageRef {
                registry: "quay.io".into(),
                repository: "org/app".into(),
                reference: "v1.2".into(),
            }
        );
        assert_eq!(
            parse_image_ref("localhost:5000/app@sha256:abcd").unwrap(),
            ImageRef {
                registry: "localhost:5000".into(),
                repository: "app".into(),
                reference: "sha256:abcd".into(),
            }
        );
        assert_eq!(
            parse_image_ref("org/app:tag").unwrap().repository,
            "org/app"
        );
    }

    #[test]
    fn bearer_challenges_parse() {
        let challenge = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#;
        let parsed = parse_bearer_challenge(challenge).unwrap();
        assert_eq!(parsed.realm, "https://auth.docker.io/token");
        assert_eq!(parsed.service.as_deref(), Some("registry.docker.io"));
        assert!(parsed.scope.unwrap().contains("library/nginx"));
        assert!(parse_bearer_challenge("Basic realm=x").is_none());
    }
}
