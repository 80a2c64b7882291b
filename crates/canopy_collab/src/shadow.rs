//! Shadow nodes: the collaboration layer's mirror of each synced node.

use canopy_core::{NodeKey, NodeKind};

use crate::shared::SharedRef;

/// Mirror of one local node, paired with the shared type that stores it.
///
/// `synced` is the payload both sides last agreed on. Local edits are diffed
/// against it, so a text change turns into a splice instead of a rewrite.
/// For elements its child list stays empty: the ordered child keys live in
/// `children`, where entry *i* is the embed at offset *i* of `shared`.
#[derive(Debug, Clone)]
pub struct ShadowNode {
    /// Local key.
    pub key: NodeKey,
    /// Parent shadow, `None` for the root.
    pub parent: Option<NodeKey>,
    /// The shared type.
    pub shared: SharedRef,
    /// Child keys, for elements.
    pub children: Vec<NodeKey>,
    /// Last synced payload.
    pub synced: NodeKind,
}

impl ShadowNode {
    /// A shadow without children.
    pub fn new(key: NodeKey, parent: Option<NodeKey>, shared: SharedRef, synced: NodeKind) -> Self {
        let synced = match synced {
            NodeKind::Element(mut el) => {
                el.children.clear();
                NodeKind::Element(el)
            }
            other => other,
        };
        Self {
            key,
            parent,
            shared,
            children: Vec::new(),
            synced,
        }
    }

    /// Variant name, matching [`NodeKind::kind_name`].
    pub fn kind_name(&self) -> &'static str {
        self.synced.kind_name()
    }

    /// Whether this mirrors an element.
    pub fn is_element(&self) -> bool {
        matches!(self.synced, NodeKind::Element(_))
    }

    /// Whether this mirrors a text node.
    pub fn is_text(&self) -> bool {
        matches!(self.synced, NodeKind::Text(_))
    }

    /// Position of `child` among this shadow's children.
    pub fn child_index(&self, child: &NodeKey) -> Option<usize> {
        self.children.iter().position(|c| c == child)
    }
}
