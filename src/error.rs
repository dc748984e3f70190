//! Error types for the hclust library.

use crate::core::node::NodeId;

/// Error types for the hclust library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File open/read/write failure. The current stage aborts; completed
    /// outputs are left on disk for resumption.
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed tree/roi/block/correspondence content.
    #[error("format error in {path}: {reason}")]
    Format { path: String, reason: String },

    /// A tree failed its integrity check after a mutation.
    #[error("tree invariant violated: {0}")]
    Invariant(String),

    /// Out-of-range or inconsistent configuration, rejected before any work.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// ROI/tract/image size inconsistency.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A queried node id does not exist in the tree.
    #[error("node not found: {0}")]
    NotFound(NodeId),
}

/// Convenience Result type for hclust operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps an io error with the offending path.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Error::Io { path: path.as_ref().display().to_string(), source }
    }

    /// Builds a format error for the given path.
    pub fn format(path: impl AsRef<std::path::Path>, reason: impl Into<String>) -> Self {
        Error::Format { path: path.as_ref().display().to_string(), reason: reason.into() }
    }
}
