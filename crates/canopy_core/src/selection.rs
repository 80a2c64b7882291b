//! Range selection made of two points.

use serde::{Deserialize, Serialize};

use crate::node::NodeKey;

/// What a point's offset counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PointKind {
    /// Byte offset into a text node.
    Text,
    /// Child index within an element.
    Element,
}

/// One end of a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// Node the offset is relative to.
    pub key: NodeKey,
    /// Byte offset (text points) or child index (element points).
    pub offset: usize,
    /// Interpretation of `offset`.
    pub kind: PointKind,
}

impl Point {
    /// A point inside a text node.
    pub fn text(key: NodeKey, offset: usize) -> Self {
        Self {
            key,
            offset,
            kind: PointKind::Text,
        }
    }

    /// A point between children of an element.
    pub fn element(key: NodeKey, offset: usize) -> Self {
        Self {
            key,
            offset,
            kind: PointKind::Element,
        }
    }
}

/// Anchor/focus pair. The anchor is where the selection started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Fixed end.
    pub anchor: Point,
    /// Moving end, where the caret is drawn.
    pub focus: Point,
}

impl Selection {
    /// A selection spanning `anchor` to `focus`.
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self { anchor, focus }
    }

    /// A caret.
    pub fn collapsed(point: Point) -> Self {
        Self {
            anchor: point.clone(),
            focus: point,
        }
    }

    /// Whether anchor and focus coincide.
    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }
}
