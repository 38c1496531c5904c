//! Error types for the periscope library.
//!
//! Structured error types that preserve context and map onto the process
//! exit codes surfaced by the `support-bundle` and `preflight` binaries.

use std::fmt;
use std::io;

use thiserror::Error;

/// Main result type for periscope operations.
pub type Result<T> = std::result::Result<T, PeriscopeError>;

/// A single RBAC denial recorded by a collector's pre-check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RbacDenial {
    /// Verb that was denied (get, list, watch, create, ...)
    pub verb: String,
    /// Resource the verb applies to (pods, secrets, deployments, ...)
    pub resource: String,
    /// Namespace scope of the denial, if namespaced
    pub namespace: Option<String>,
}

impl fmt::Display for RbacDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {} in namespace {}", self.verb, self.resource, ns),
            None => write!(f, "{} {}", self.verb, self.resource),
        }
    }
}

/// Comprehensive error type for all periscope operations.
#[derive(Error, Debug)]
pub enum PeriscopeError {
    /// I/O errors (bundle writes, archive creation, host collectors)
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Spec parse, conversion, or validation failures
    #[error("Spec error [{code}] at {pointer}: {message}")]
    Spec {
        /// JSON-pointer path into the offending document
        pointer: String,
        /// Machine-readable error code
        code: String,
        /// Error description
        message: String,
    },

    /// Cluster or URL fetch failures
    #[error("Network error: {message}")]
    Network {
        /// Error description
        message: String,
        /// URL or endpoint involved, if known
        endpoint: Option<String>,
        /// Underlying transport error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// RBAC pre-check denials gathered across collectors
    #[error("RBAC denied: {}", denied.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Rbac {
        /// The denied (verb, resource, namespace) triples
        denied: Vec<RbacDenial>,
    },

    /// Deadline expiry, distinct from cancellation
    #[error("Timeout during {operation}")]
    Timeout {
        /// Operation that was in flight when the deadline expired
        operation: String,
    },

    /// The run-level context was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Two collectors claimed the same bundle path with differing content
    #[error("Bundle conflict: differing content for path {path}")]
    BundleConflict {
        /// Bundle-relative path that was claimed twice
        path: String,
    },

    /// Analyzer read or evaluation failures, isolated per analyzer
    #[error("Analysis error in '{analyzer}': {message}")]
    Analysis {
        /// Analyzer title
        analyzer: String,
        /// Error description
        message: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },
}

impl PeriscopeError {
    /// Create a new I/O error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a new spec error with a JSON-pointer path and machine code
    pub fn spec(
        pointer: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Spec {
            pointer: pointer.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            endpoint: None,
            source: None,
        }
    }

    /// Create a new network error naming the endpoint involved
    pub fn network_endpoint(message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            endpoint: Some(endpoint.into()),
            source: None,
        }
    }

    /// Create a new timeout error for a named operation
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a new bundle conflict error
    pub fn bundle_conflict(path: impl Into<String>) -> Self {
        Self::BundleConflict { path: path.into() }
    }

    /// Create a new per-analyzer error
    pub fn analysis(analyzer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Analysis {
            analyzer: analyzer.into(),
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        if let Self::Internal { context: ctx, .. } = &mut self {
            *ctx = Some(context.into());
        }
        self
    }

    /// True when the error is non-fatal for the overall run (recorded,
    /// surfaced through exit code 8).
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Analysis { .. } | Self::BundleConflict { .. })
    }
}

// From impls for common error types
impl From<io::Error> for PeriscopeError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for PeriscopeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for PeriscopeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for PeriscopeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
            endpoint: err.url().map(|u| u.to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<kube::Error> for PeriscopeError {
    fn from(err: kube::Error) -> Self {
        Self::Network {
            message: format!("cluster request failed: {err}"),
            endpoint: None,
            source: Some(Box::new(err)),
        }
    }
}

impl From<regex::Error> for PeriscopeError {
    fn from(err: regex::Error) -> Self {
        Self::spec("", "invalid-regex", err.to_string())
    }
}

/// Result extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add lazily-built context to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error result
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<PeriscopeError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PeriscopeError::spec("/spec/collectors/0", "invalid-regex", "bad pattern");
        assert!(matches!(err, PeriscopeError::Spec { .. }));

        let err = PeriscopeError::timeout("collector logs");
        assert_eq!(err.to_string(), "Timeout during collector logs");
    }

    #[test]
    fn test_rbac_denial_display() {
        let denial = RbacDenial {
            verb: "list".to_string(),
            resource: "secrets".to_string(),
            namespace: Some("demo".to_string()),
        };
        assert_eq!(denial.to_string(), "list secrets in namespace demo");

        let err = PeriscopeError::Rbac {
            denied: vec![denial],
        };
        assert!(err.to_string().contains("list secrets"));
    }

    #[test]
    fn test_partial_classification() {
        assert!(PeriscopeError::bundle_conflict("cluster-info/version.json").is_partial());
        assert!(!PeriscopeError::Cancelled.is_partial());
    }
}
