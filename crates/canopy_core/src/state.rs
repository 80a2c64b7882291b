//! Immutable document versions.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::node::{Node, NodeKey, NodeKind};
use crate::offsets::DocumentIndex;
use crate::selection::{Point, PointKind, Selection};

/// Read access to a keyed node map.
///
/// Implemented by committed [`EditorState`]s and by in-flight
/// [`EditorTxn`](crate::EditorTxn)s, so validation and offset helpers work on
/// either.
pub trait NodeLookup {
    /// Node for `key`, if present.
    fn lookup(&self, key: &NodeKey) -> Option<&Node>;

    /// Whether `key` exists and its parent chain reaches the root.
    fn is_attached(&self, key: &NodeKey) -> bool {
        let mut current = key.clone();
        loop {
            if current.is_root() {
                return self.lookup(&current).is_some();
            }
            match self.lookup(&current).and_then(|node| node.parent.clone()) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Whether `point` addresses attached content within bounds.
    fn is_point_valid(&self, point: &Point) -> bool {
        let Some(node) = self.lookup(&point.key) else {
            return false;
        };
        if !self.is_attached(&point.key) {
            return false;
        }
        match (point.kind, &node.kind) {
            (PointKind::Text, NodeKind::Text(text)) => {
                point.offset <= text.text.len() && text.text.is_char_boundary(point.offset)
            }
            (PointKind::Element, NodeKind::Element(el)) => point.offset <= el.children.len(),
            _ => false,
        }
    }

    /// Whether both ends of `selection` are valid.
    fn is_selection_valid(&self, selection: &Selection) -> bool {
        self.is_point_valid(&selection.anchor) && self.is_point_valid(&selection.focus)
    }

    /// Plain text of the whole document. Sibling blocks are separated by a
    /// newline and line breaks render as a newline.
    fn text_content(&self) -> String {
        DocumentIndex::build(self).text().to_string()
    }

    /// Key-free structural summary, comparable across peers.
    fn shape(&self) -> TreeShape {
        TreeShape::build(self, &NodeKey::root())
    }
}

/// Structural summary of a subtree: types, text and attributes, no keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeShape {
    /// Node type name.
    pub node_type: String,
    /// Text for text nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Format flags for text nodes.
    #[serde(skip_serializing_if = "is_zero")]
    pub format: u32,
    /// Inline style for text nodes.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub style: String,
    /// External reference for decorator nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<crate::ExternalRef>,
    /// Element properties.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub props: IndexMap<String, crate::PropValue>,
    /// Children in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeShape>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl TreeShape {
    fn build<D: NodeLookup + ?Sized>(doc: &D, key: &NodeKey) -> Self {
        let Some(node) = doc.lookup(key) else {
            return TreeShape {
                node_type: "<missing>".to_string(),
                text: None,
                format: 0,
                style: String::new(),
                reference: None,
                props: IndexMap::new(),
                children: Vec::new(),
            };
        };
        let (text, format, style) = match node.as_text() {
            Some(text) => (Some(text.text.clone()), text.format, text.style.clone()),
            None => (None, 0, String::new()),
        };
        TreeShape {
            node_type: node.node_type().to_string(),
            text,
            format,
            style,
            reference: node.as_decorator().and_then(|d| d.reference.clone()),
            props: node
                .as_element()
                .map(|el| el.props.clone())
                .unwrap_or_default(),
            children: node
                .children()
                .iter()
                .map(|child| TreeShape::build(doc, child))
                .collect(),
        }
    }
}

/// One committed version of the document.
///
/// Cloning is cheap: nodes are shared with the previous version until an
/// update writes them.
#[derive(Debug, Clone)]
pub struct EditorState {
    nodes: HashMap<NodeKey, Arc<Node>>,
    selection: Option<Selection>,
    version: u64,
}

impl EditorState {
    /// Version 0: an empty root element.
    pub fn new() -> Self {
        let root = Node {
            key: NodeKey::root(),
            parent: None,
            kind: NodeKind::element(NodeKey::ROOT),
        };
        let mut nodes = HashMap::new();
        nodes.insert(root.key.clone(), Arc::new(root));
        Self {
            nodes,
            selection: None,
            version: 0,
        }
    }

    pub(crate) fn from_parts(
        nodes: HashMap<NodeKey, Arc<Node>>,
        selection: Option<Selection>,
        version: u64,
    ) -> Self {
        Self {
            nodes,
            selection,
            version,
        }
    }

    pub(crate) fn nodes(&self) -> &HashMap<NodeKey, Arc<Node>> {
        &self.nodes
    }

    /// Node for `key`.
    pub fn get(&self, key: &NodeKey) -> Option<&Node> {
        self.nodes.get(key).map(Arc::as_ref)
    }

    /// Shared handle to a node; equal pointers across versions mean the node
    /// was not rewritten.
    pub fn get_shared(&self, key: &NodeKey) -> Option<&Arc<Node>> {
        self.nodes.get(key)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// The root element.
    pub fn root(&self) -> Option<&Node> {
        self.get(&NodeKey::root())
    }

    /// Child keys of `key`; empty when missing or a leaf.
    pub fn children(&self, key: &NodeKey) -> &[NodeKey] {
        self.get(key).map(Node::children).unwrap_or(&[])
    }

    /// Current selection.
    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Monotonic version number.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Never true: the root always exists.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for EditorState {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeLookup for EditorState {
    fn lookup(&self, key: &NodeKey) -> Option<&Node> {
        self.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_has_root_only() {
        let state = EditorState::new();
        assert_eq!(state.len(), 1);
        assert_eq!(state.version(), 0);
        assert!(state.is_attached(&NodeKey::root()));
        assert_eq!(state.text_content(), "");
        assert!(state.is_point_valid(&Point::element(NodeKey::root(), 0)));
        assert!(!state.is_point_valid(&Point::element(NodeKey::root(), 1)));
        assert!(!state.is_point_valid(&Point::text(NodeKey::root(), 0)));
    }

    #[test]
    fn test_shape_of_empty_root() {
        let state = EditorState::new();
        let shape = state.shape();
        assert_eq!(shape.node_type, "root");
        assert!(shape.children.is_empty());
    }
}
