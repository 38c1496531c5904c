//! Spec document model, loading, conversion, merging, and validation.
//!
//! The loader accepts multi-document YAML from files, stdin, URLs, cluster
//! secrets/configmaps, and OCI registry artifacts. Older schema versions are
//! converted on load; multiple documents merge into one [`ResolvedSpec`] by
//! stable identity with field-level conflict reporting.

pub mod convert;
pub mod loader;
pub mod merge;
pub mod types;
pub mod validate;

pub use loader::{load_specs, parse_documents, SpecLocator};
pub use merge::merge_docs;
pub use types::*;
pub use validate::validate;
