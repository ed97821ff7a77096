//! Error taxonomy for the crate (SPEC_FULL §7).
//!
//! A single `thiserror`-derived [`QuantError`] enum with documented
//! variants, plus the crate-wide [`Result`] alias. Library code
//! propagates with `?`; variants carry the context needed to diagnose a
//! failure without additional logging.

use std::io;
use std::path::PathBuf;

/// The error type returned by the quantity-resolution and caching engine.
#[derive(Debug, thiserror::Error)]
pub enum QuantError {
    /// No producer stage claimed the requested variable name. Non-fatal:
    /// raised without touching the cache or the mmap pool.
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    /// The reserved empty variable name was requested. Short-circuits
    /// before any resolution work.
    #[error("variable name must not be empty")]
    EmptyVariableName,

    /// A backing file could not be opened or mapped. The originating
    /// [`io::Error`] is propagated verbatim alongside the offending path.
    #[error("failed to access '{}': {source}", .path.display())]
    FileAccess {
        /// Path of the file that could not be accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The requested context is inconsistent with the snapshot metadata
    /// (e.g. missing fluid selection, out-of-range snapshot, malformed
    /// roster). Fatal during mandatory init; ring-buffered and
    /// recoverable during exploratory access.
    #[error("context inconsistent ({what}): {why}")]
    ContextInconsistent {
        /// What was being validated when the inconsistency was detected.
        what: String,
        /// Why the context is inconsistent.
        why: String,
    },

    /// A fatal resource limit (e.g. open-file descriptors) was reached.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An internal array-decode shape mismatch.
    #[error("array shape mismatch: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl QuantError {
    /// Construct a [`QuantError::ContextInconsistent`] from any two
    /// string-like descriptions.
    pub fn inconsistent(what: impl Into<String>, why: impl Into<String>) -> Self {
        QuantError::ContextInconsistent {
            what: what.into(),
            why: why.into(),
        }
    }

    /// Whether this error is a recoverable probe failure: during
    /// exploratory producer probing a context inconsistency is
    /// ring-buffered and resolution falls through, rather than being
    /// raised to the caller (SPEC_FULL §7).
    pub fn is_recoverable_probe(&self) -> bool {
        matches!(self, QuantError::ContextInconsistent { .. })
    }
}

/// Crate-wide result alias.
pub type Result<T, E = QuantError> = std::result::Result<T, E>;
