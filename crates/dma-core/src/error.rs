//! Unified error types for the assembly engine
//!
//! This module provides a common error type [`AssemblyError`] shared by the
//! database loader and the selection algorithms. Only fatal conditions are
//! represented here: recoverable per-device fallbacks (an invalid reactive
//! diagram, a converter id mismatch on one line) are logged and absorbed at
//! the device they affect, and never surface through this type.

use thiserror::Error;

/// Kind of entity a dangling reference pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    MacroConnection,
    SingleAssociation,
    MultipleAssociation,
    Association,
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReferenceKind::MacroConnection => "macro connection",
            ReferenceKind::SingleAssociation => "single association",
            ReferenceKind::MultipleAssociation => "multiple association",
            ReferenceKind::Association => "association",
        };
        f.write_str(name)
    }
}

/// Fatal error type for all assembly operations.
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// I/O errors (file access)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML-level parse failures in the assembling document
    #[error("XML error: {0}")]
    Xml(String),

    /// Structurally invalid assembling document (missing required attribute,
    /// conflicting association targets, schema violation)
    #[error("malformed assembling document: {0}")]
    MalformedConfig(String),

    /// A macro-connect or lookup referenced an id the database does not hold
    #[error("unknown {kind} '{id}'")]
    UnknownReference { kind: ReferenceKind, id: String },

    /// Inconsistent network snapshot input
    #[error("invalid network snapshot: {0}")]
    Snapshot(String),

    /// Global run configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results using AssemblyError.
pub type AssemblyResult<T> = Result<T, AssemblyError>;

impl AssemblyError {
    /// Shorthand for the referential error used across lookups.
    pub fn unknown(kind: ReferenceKind, id: impl Into<String>) -> Self {
        AssemblyError::UnknownReference {
            kind,
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for AssemblyError {
    fn from(err: serde_json::Error) -> Self {
        AssemblyError::Config(err.to_string())
    }
}
