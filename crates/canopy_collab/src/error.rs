//! Error types for the collaboration layer.

use std::path::PathBuf;

use canopy_core::{CoreError, NodeKey};
use thiserror::Error;

/// Result alias used throughout `canopy_collab`.
pub type Result<T> = std::result::Result<T, CollabError>;

/// Errors raised while syncing a document with its shared counterpart.
#[derive(Debug, Error)]
pub enum CollabError {
    /// A key or shared type is already bound.
    #[error("binding conflict for node {0}")]
    BindingConflict(NodeKey),

    /// A local key the pass needs has no shadow.
    #[error("no shadow node for {0}")]
    MissingShadow(NodeKey),

    /// A bound key is missing from the local version being synced.
    #[error("node {0} is bound but missing from the local state")]
    MissingLocalNode(NodeKey),

    /// Local node and shadow disagree on what kind of node this is.
    #[error("kind mismatch for {key}: local {local}, shadow {shadow}")]
    KindMismatch {
        /// Node key.
        key: NodeKey,
        /// Local node kind.
        local: &'static str,
        /// Shadow node kind.
        shadow: &'static str,
    },

    /// A delta addressed a child offset past the end of a container.
    #[error("child index {index} out of bounds for {key} ({len} children)")]
    ChildIndexOutOfBounds {
        /// Container key.
        key: NodeKey,
        /// Offending index.
        index: usize,
        /// Child count.
        len: usize,
    },

    /// A delta addressed text past the end of a text node.
    #[error("text range {start}..{end} out of bounds for {key} (length {len})")]
    TextRangeOutOfBounds {
        /// Text node key.
        key: NodeKey,
        /// Start byte offset.
        start: usize,
        /// End byte offset.
        end: usize,
        /// Length in bytes.
        len: usize,
    },

    /// Shadow children and local children diverged after a pass.
    #[error("shadow children of {0} do not match the local tree")]
    ShapeMismatch(NodeKey),

    /// Shared content that has no local node equivalent.
    #[error("unsupported shared content: {0}")]
    UnsupportedContent(String),

    /// Bytes from a peer could not be decoded.
    #[error("failed to decode {what}: {message}")]
    Decode {
        /// What was being decoded.
        what: &'static str,
        /// Decoder message.
        message: String,
    },

    /// A decoded update could not be integrated.
    #[error("failed to apply update: {0}")]
    Apply(String),

    /// An observer could not be registered.
    #[error("failed to observe document: {0}")]
    Observe(String),

    /// Error from the document model.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON encoding of presence or references failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be parsed.
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    /// Config file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

impl CollabError {
    /// Whether the error means binding and local tree no longer agree.
    ///
    /// After such an error the session should be dropped and rebuilt from a
    /// fresh [`CollabSession::join`](crate::CollabSession::join).
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            CollabError::BindingConflict(_)
                | CollabError::MissingShadow(_)
                | CollabError::MissingLocalNode(_)
                | CollabError::KindMismatch { .. }
                | CollabError::ChildIndexOutOfBounds { .. }
                | CollabError::TextRangeOutOfBounds { .. }
                | CollabError::ShapeMismatch(_)
                | CollabError::UnsupportedContent(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_classification() {
        assert!(CollabError::MissingShadow(NodeKey::root()).is_invariant_violation());
        assert!(!CollabError::Apply("bad".into()).is_invariant_violation());
        assert!(!CollabError::from(CoreError::NodeNotFound(NodeKey::root())).is_invariant_violation());
    }
}
