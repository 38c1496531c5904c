//! # Periscope: Kubernetes Support-Bundle Engine
//!
//! A diagnostics pipeline for Kubernetes clusters: collect, redact, and
//! analyze cluster state into a self-contained archive that can be inspected
//! offline. The same pipeline runs pre-install as `preflight`, returning a
//! go/no-go verdict instead of an archive.
//!
//! - **Collection**: declarative collectors run concurrently against the
//!   cluster with RBAC pre-checks, merging, and partial-failure tolerance
//! - **Redaction**: every byte written into the bundle streams through a
//!   composable redactor chain (literals, regex, multi-line, yaml/json path)
//! - **Consolidation**: pod logs fan in through a single-writer channel that
//!   dedupes requests across collectors
//! - **Analysis**: declarative analyzers evaluate ordered outcome rules
//!   against the finalized bundle and produce pass/warn/fail verdicts
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      CLI / API Layer                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Spec Loader  │  Scheduler   │  Redactors  │  Analyzers      │
//! │               │              │             │                 │
//! │ • parse/merge │ • collectors │ • literal   │ • outcomes      │
//! │ • convert     │ • rbac gate  │ • regex     │ • when exprs    │
//! │ • validate    │ • pod logs   │ • yaml path │ • verdicts      │
//! ├──────────────────────────────────────────────────────────────┤
//! │        Bundle Store (tar.gz)  │  Cluster Access (kube)       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use periscope::api::{PipelineOptions, SupportBundlePipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = PipelineOptions::default().with_output("bundle.tar.gz");
//!     let pipeline =
//!         SupportBundlePipeline::from_locators(&["./spec.yaml".to_string()], options).await?;
//!     let outcome = pipeline.run().await?;
//!     println!("archive: {}", outcome.archive_path.unwrap().display());
//!     Ok(())
//! }
//! ```

#![warn(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::struct_excessive_bools)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

// Core pipeline plumbing
pub mod core {
    //! Errors, run-scoped context, and the spec document model.

    pub mod context;
    pub mod errors;
    pub mod spec;
}

// On-disk bundle store and archive finalization
pub mod bundle {
    //! Streaming bundle store and deterministic tar.gz archiving.

    pub mod archive;
    pub mod store;
}

// Streaming redaction pipeline
pub mod redact;

// Collector registry, scheduler, and pod-log consolidation
pub mod collect;

// Analyzer engine and outcome evaluation
pub mod analyze;

// Cluster access wrapper (kube-backed and in-memory fake)
pub mod cluster;

// High-level pipeline API used by the binaries
pub mod api;

// Shared CLI plumbing for the support-bundle and preflight binaries
pub mod cli;

// Re-export primary types for convenience
pub use crate::api::{PipelineOptions, PreflightPipeline, SupportBundlePipeline};
pub use crate::core::errors::{PeriscopeError, Result, ResultExt};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema version of spec documents produced and consumed by this build.
pub const SCHEMA_VERSION: &str = "troubleshoot.sh/v1beta2";
