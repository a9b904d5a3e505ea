//! Error types for scene save and load.
//!
//! Only conditions that abort an operation surface here. Everything
//! recoverable (missing guids, bad override paths, failed hooks,
//! failed deferred actions) is logged at the site and the operation
//! continues with a best-effort substitute.

use thiserror::Error;

/// Errors that abort a save operation.
#[derive(Debug, Error)]
pub enum SaveError {
    /// JSON encoding failed.
    #[error("failed to encode scene document: {0}")]
    Encode(String),

    /// Internal invariant violation in the value model.
    #[error("invalid property state: {0}")]
    InvalidState(String),
}

/// Errors that abort a load operation (or the subtree being loaded).
#[derive(Debug, Error)]
pub enum LoadError {
    /// Top-level scene format version does not match.
    #[error("unsupported scene format version {found} (supported: {supported})")]
    FormatVersion { found: i64, supported: i64 },

    /// A component type declared a format version and the document
    /// carries a different one.
    #[error("format version mismatch for '{type_name}': document has {found}, schema expects {expected}")]
    ComponentVersion {
        type_name: String,
        found: i64,
        expected: i64,
    },

    /// The document does not have the expected structure.
    #[error("malformed scene document: {0}")]
    Malformed(String),

    /// A template instance could not be produced by any factory or
    /// stored document.
    #[error("template '{0}' could not be instantiated")]
    TemplateUnavailable(String),
}
