//! Error types for the document model.

use thiserror::Error;

use crate::node::NodeKey;

/// Result alias used throughout `canopy_core`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by editor transactions.
///
/// Every variant describes a caller mistake (a stale key, a bad index);
/// a failing update closure leaves the committed state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// No node with this key exists in the working state.
    #[error("node not found: {0}")]
    NodeNotFound(NodeKey),

    /// The node exists but is not of the kind the operation needs.
    #[error("node {key} is a {found} node, expected {expected}")]
    WrongKind {
        /// Offending node.
        key: NodeKey,
        /// Kind the operation required.
        expected: &'static str,
        /// Kind actually found.
        found: &'static str,
    },

    /// A child index past the end of an element's children.
    #[error("child index {index} out of bounds for {key} ({len} children)")]
    IndexOutOfBounds {
        /// Parent element.
        key: NodeKey,
        /// Requested index.
        index: usize,
        /// Number of children.
        len: usize,
    },

    /// A text range outside the text or not on a char boundary.
    #[error("invalid text range {start}..{end} in {key} (length {len})")]
    InvalidTextRange {
        /// Text node.
        key: NodeKey,
        /// Start byte offset.
        start: usize,
        /// End byte offset.
        end: usize,
        /// Text length in bytes.
        len: usize,
    },

    /// Inserting the root, or inserting a node beneath itself.
    #[error("cannot insert {child} under {parent}")]
    InvalidInsert {
        /// Intended parent.
        parent: NodeKey,
        /// Node being inserted.
        child: NodeKey,
    },

    /// The root can not be detached.
    #[error("the root node cannot be removed")]
    RootRemoval,
}
