//! Node records stored in an [`EditorState`](crate::EditorState).
//!
//! Nodes are immutable once committed: each version holds them behind an
//! `Arc`, and an update clones a node only when it writes to it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Text format bit flags stored in [`TextNode::format`].
pub mod format {
    /// Bold.
    pub const BOLD: u32 = 1;
    /// Italic.
    pub const ITALIC: u32 = 1 << 1;
    /// Strikethrough.
    pub const STRIKETHROUGH: u32 = 1 << 2;
    /// Underline.
    pub const UNDERLINE: u32 = 1 << 3;
    /// Inline code.
    pub const CODE: u32 = 1 << 4;
}

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identifier.
///
/// Keys are local to one editor process. Peers never exchange them: the
/// collaboration layer pairs each key with a shared type instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    /// Key of the document root.
    pub const ROOT: &'static str = "root";

    /// The root key.
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Allocate a fresh key, unique for the lifetime of the process.
    pub fn generate() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed).to_string())
    }

    /// Whether this is the root key.
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A non-structural scalar property of an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// String.
    Str(String),
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_string())
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

/// Reference from a decorator node to content that lives outside the tree.
///
/// Only the reference travels between peers; what it points at is the
/// decorator's own business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExternalRef {
    /// A nested document, addressed by id.
    Document {
        /// Document id.
        id: String,
    },
    /// An external resource.
    Url {
        /// Resource location.
        href: String,
    },
}

/// Element payload: a typed container of child keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    /// Element type name (`"root"`, `"paragraph"`, `"heading"`, ...).
    pub node_type: String,
    /// Ordered child keys.
    pub children: Vec<NodeKey>,
    /// Non-structural properties.
    pub props: IndexMap<String, PropValue>,
}

/// Text payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextNode {
    /// The text itself.
    pub text: String,
    /// Bit set of [`format`] flags.
    pub format: u32,
    /// Inline CSS style.
    pub style: String,
}

/// Decorator payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratorNode {
    /// Decorator type name.
    pub node_type: String,
    /// External reference, if any.
    pub reference: Option<ExternalRef>,
}

/// The four node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Container with ordered children.
    Element(ElementNode),
    /// Run of formatted text.
    Text(TextNode),
    /// Hard line break.
    LineBreak,
    /// Opaque embedded object.
    Decorator(DecoratorNode),
}

impl NodeKind {
    /// A fresh element of the given type.
    pub fn element(node_type: &str) -> Self {
        NodeKind::Element(ElementNode {
            node_type: node_type.to_string(),
            children: Vec::new(),
            props: IndexMap::new(),
        })
    }

    /// A fresh unformatted text run.
    pub fn text(text: &str) -> Self {
        NodeKind::Text(TextNode {
            text: text.to_string(),
            ..TextNode::default()
        })
    }

    /// Short name of the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Element(_) => "element",
            NodeKind::Text(_) => "text",
            NodeKind::LineBreak => "linebreak",
            NodeKind::Decorator(_) => "decorator",
        }
    }
}

/// One node of one version.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Identity.
    pub key: NodeKey,
    /// Parent element, `None` for the root and for detached nodes.
    pub parent: Option<NodeKey>,
    /// Payload.
    pub kind: NodeKind,
}

impl Node {
    /// Type name as the document model sees it.
    pub fn node_type(&self) -> &str {
        match &self.kind {
            NodeKind::Element(el) => &el.node_type,
            NodeKind::Text(_) => "text",
            NodeKind::LineBreak => "linebreak",
            NodeKind::Decorator(dec) => &dec.node_type,
        }
    }

    /// Whether the node is an element.
    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element(_))
    }

    /// Element payload, if this is an element.
    pub fn as_element(&self) -> Option<&ElementNode> {
        match &self.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Text payload, if this is a text node.
    pub fn as_text(&self) -> Option<&TextNode> {
        match &self.kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Decorator payload, if this is a decorator.
    pub fn as_decorator(&self) -> Option<&DecoratorNode> {
        match &self.kind {
            NodeKind::Decorator(dec) => Some(dec),
            _ => None,
        }
    }

    /// Child keys; empty for leaves.
    pub fn children(&self) -> &[NodeKey] {
        match &self.kind {
            NodeKind::Element(el) => &el.children,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_are_unique() {
        let a = NodeKey::generate();
        let b = NodeKey::generate();
        assert_ne!(a, b);
        assert!(!a.is_root());
        assert!(NodeKey::root().is_root());
    }

    #[test]
    fn test_external_ref_json_shape() {
        let reference = ExternalRef::Document {
            id: "doc-1".to_string(),
        };
        let json = serde_json::to_string(&reference).unwrap();
        assert_eq!(json, r#"{"kind":"document","id":"doc-1"}"#);

        let unknown = serde_json::from_str::<ExternalRef>(r#"{"kind":"spreadsheet"}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_node_type_names() {
        let node = Node {
            key: NodeKey::generate(),
            parent: None,
            kind: NodeKind::element("heading"),
        };
        assert_eq!(node.node_type(), "heading");
        assert!(node.is_element());
        assert!(node.children().is_empty());

        let text = Node {
            key: NodeKey::generate(),
            parent: None,
            kind: NodeKind::text("hi"),
        };
        assert_eq!(text.node_type(), "text");
        assert_eq!(text.as_text().map(|t| t.text.as_str()), Some("hi"));
    }
}
