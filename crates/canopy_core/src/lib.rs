//! # `canopy_core`
//!
//! The document model behind Canopy editors: an immutable tree of keyed
//! nodes, versioned through [`Editor::update`].
//!
//! Every update produces a new [`EditorState`] that shares untouched nodes with
//! the previous one, and an [`EditorUpdate`] listing the keys it wrote. The
//! collaboration layer (`canopy_collab`) diffs consecutive versions through
//! those dirty sets and never walks the whole tree.

#![warn(missing_docs)]

mod editor;
mod error;
mod node;
mod offsets;
mod selection;
mod state;

pub use editor::{COLLABORATION_TAG, Editor, EditorTxn, EditorUpdate};
pub use error::{CoreError, Result};
pub use node::{
    DecoratorNode, ElementNode, ExternalRef, Node, NodeKey, NodeKind, PropValue, TextNode, format,
};
pub use offsets::DocumentIndex;
pub use selection::{Point, PointKind, Selection};
pub use state::{EditorState, NodeLookup, TreeShape};
