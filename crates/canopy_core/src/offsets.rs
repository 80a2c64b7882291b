//! Whole-document character offsets.
//!
//! Flattens a tree into the plain text returned by
//! [`NodeLookup::text_content`] and maps points to byte offsets in that text
//! and back. Offsets survive structural edits that keys do not (splits,
//! merges, re-parenting), which makes them a useful fallback when a selection
//! has to be carried from one version to the next.

use std::collections::HashMap;

use crate::node::{NodeKey, NodeKind};
use crate::selection::{Point, PointKind};
use crate::state::NodeLookup;

#[derive(Debug, Clone)]
enum SegmentKind {
    Text,
    /// Line break or decorator at `index` within `parent`.
    Atom { parent: NodeKey, index: usize },
    /// Element without children.
    Empty,
}

#[derive(Debug, Clone)]
struct Segment {
    key: NodeKey,
    start: usize,
    end: usize,
    kind: SegmentKind,
}

/// Flattened view of one version.
#[derive(Debug, Clone)]
pub struct DocumentIndex {
    text: String,
    spans: HashMap<NodeKey, (usize, usize)>,
    segments: Vec<Segment>,
    root_children: usize,
}

impl DocumentIndex {
    /// Walk the tree under the root.
    pub fn build<D: NodeLookup + ?Sized>(doc: &D) -> Self {
        let mut index = DocumentIndex {
            text: String::new(),
            spans: HashMap::new(),
            segments: Vec::new(),
            root_children: doc
                .lookup(&NodeKey::root())
                .map(|root| root.children().len())
                .unwrap_or(0),
        };
        index.walk(doc, &NodeKey::root(), None);
        index
    }

    fn walk<D: NodeLookup + ?Sized>(
        &mut self,
        doc: &D,
        key: &NodeKey,
        position: Option<(&NodeKey, usize)>,
    ) {
        let Some(node) = doc.lookup(key) else {
            return;
        };
        let start = self.text.len();
        match &node.kind {
            NodeKind::Element(el) => {
                if el.children.is_empty() {
                    self.segments.push(Segment {
                        key: key.clone(),
                        start,
                        end: start,
                        kind: SegmentKind::Empty,
                    });
                }
                let mut previous_is_block = false;
                for (i, child) in el.children.iter().enumerate() {
                    let is_block = doc.lookup(child).is_some_and(|c| c.is_element());
                    if i > 0 && (is_block || previous_is_block) {
                        self.text.push('\n');
                    }
                    self.walk(doc, child, Some((key, i)));
                    previous_is_block = is_block;
                }
            }
            NodeKind::Text(text) => {
                self.text.push_str(&text.text);
                self.segments.push(Segment {
                    key: key.clone(),
                    start,
                    end: self.text.len(),
                    kind: SegmentKind::Text,
                });
            }
            NodeKind::LineBreak | NodeKind::Decorator(_) => {
                if matches!(node.kind, NodeKind::LineBreak) {
                    self.text.push('\n');
                }
                if let Some((parent, index)) = position {
                    self.segments.push(Segment {
                        key: key.clone(),
                        start,
                        end: self.text.len(),
                        kind: SegmentKind::Atom {
                            parent: parent.clone(),
                            index,
                        },
                    });
                }
            }
        }
        self.spans.insert(key.clone(), (start, self.text.len()));
    }

    /// The flattened text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Byte offset of `point` in the flattened text.
    pub fn point_to_offset<D: NodeLookup + ?Sized>(&self, doc: &D, point: &Point) -> Option<usize> {
        let &(start, end) = self.spans.get(&point.key)?;
        match point.kind {
            PointKind::Text => {
                let offset = start + point.offset;
                (offset <= end).then_some(offset)
            }
            PointKind::Element => {
                let children = doc.lookup(&point.key)?.children();
                match children.get(point.offset) {
                    Some(child) => self.spans.get(child).map(|&(child_start, _)| child_start),
                    None if point.offset == children.len() => Some(end),
                    None => None,
                }
            }
        }
    }

    /// Point at byte `offset` of the flattened text, preferring text nodes.
    pub fn offset_to_point(&self, offset: usize) -> Option<Point> {
        let mut offset = offset.min(self.text.len());
        while !self.text.is_char_boundary(offset) {
            offset -= 1;
        }

        let text_hit = self.segments.iter().find(|segment| {
            matches!(segment.kind, SegmentKind::Text)
                && segment.start <= offset
                && offset <= segment.end
        });
        if let Some(segment) = text_hit {
            return Some(Point::text(segment.key.clone(), offset - segment.start));
        }

        self.segments.iter().find_map(|segment| match &segment.kind {
            SegmentKind::Atom { parent, index } if segment.start == offset => {
                Some(Point::element(parent.clone(), *index))
            }
            SegmentKind::Atom { parent, index } if segment.end == offset => {
                Some(Point::element(parent.clone(), index + 1))
            }
            SegmentKind::Empty if segment.start == offset => {
                Some(Point::element(segment.key.clone(), 0))
            }
            _ => None,
        })
    }

    /// Caret position at the very end of the document.
    pub fn end_point(&self) -> Point {
        match self.segments.last() {
            Some(Segment {
                key,
                start,
                end,
                kind: SegmentKind::Text,
            }) => Point::text(key.clone(), end - start),
            Some(Segment {
                kind: SegmentKind::Atom { parent, index },
                ..
            }) => Point::element(parent.clone(), index + 1),
            Some(Segment {
                key,
                kind: SegmentKind::Empty,
                ..
            }) => Point::element(key.clone(), 0),
            None => Point::element(NodeKey::root(), self.root_children),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::Editor;
    use crate::selection::Point;

    fn two_paragraphs() -> (Editor, NodeKey, NodeKey, NodeKey) {
        let mut editor = Editor::new();
        let ((first, second, empty), _) = editor
            .update(|txn| {
                let p1 = txn.create_element("paragraph");
                let t1 = txn.create_text("Hello");
                txn.append_child(&p1, &t1)?;
                let p2 = txn.create_element("paragraph");
                let t2 = txn.create_text("World");
                let br = txn.create_line_break();
                let t3 = txn.create_text("!");
                txn.append_child(&p2, &t2)?;
                txn.append_child(&p2, &br)?;
                txn.append_child(&p2, &t3)?;
                let p3 = txn.create_element("paragraph");
                txn.append_child(&NodeKey::root(), &p1)?;
                txn.append_child(&NodeKey::root(), &p2)?;
                txn.append_child(&NodeKey::root(), &p3)?;
                Ok::<_, crate::CoreError>((t1, t2, p3))
            })
            .unwrap();
        (editor, first, second, empty)
    }

    #[test]
    fn test_text_joins_blocks_with_newlines() {
        let (editor, ..) = two_paragraphs();
        let index = DocumentIndex::build(editor.state().as_ref());
        assert_eq!(index.text(), "Hello\nWorld\n!\n");
    }

    #[test]
    fn test_point_offset_round_trip() {
        let (editor, first, second, empty) = two_paragraphs();
        let state = editor.state();
        let index = DocumentIndex::build(state.as_ref());

        let point = Point::text(second.clone(), 3);
        let offset = index.point_to_offset(state.as_ref(), &point).unwrap();
        assert_eq!(offset, 9);
        assert_eq!(index.offset_to_point(offset), Some(point));

        assert_eq!(
            index.offset_to_point(0),
            Some(Point::text(first.clone(), 0))
        );
        assert_eq!(index.offset_to_point(14), Some(Point::element(empty, 0)));
    }

    #[test]
    fn test_element_point_offsets() {
        let (editor, ..) = two_paragraphs();
        let state = editor.state();
        let index = DocumentIndex::build(state.as_ref());

        let root_end = Point::element(NodeKey::root(), 3);
        assert_eq!(index.point_to_offset(state.as_ref(), &root_end), Some(14));
        let past_end = Point::element(NodeKey::root(), 4);
        assert_eq!(index.point_to_offset(state.as_ref(), &past_end), None);
    }

    #[test]
    fn test_end_point_of_empty_document() {
        let editor = Editor::new();
        let index = DocumentIndex::build(editor.state().as_ref());
        assert_eq!(index.end_point(), Point::element(NodeKey::root(), 0));
    }
}
