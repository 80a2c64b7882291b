//! Update transactions over [`EditorState`].
//!
//! All mutation goes through [`Editor::update`]: the closure receives an
//! [`EditorTxn`] working on a copy-on-write view of the current version. If the
//! closure returns `Ok`, the working view is committed as the next version and
//! an [`EditorUpdate`] describing it is returned; on `Err` nothing changes.
//!
//! ```
//! use canopy_core::{Editor, NodeKey, NodeLookup};
//!
//! let mut editor = Editor::new();
//! let (_, update) = editor
//!     .update(|txn| {
//!         let paragraph = txn.create_element("paragraph");
//!         let text = txn.create_text("Hello");
//!         txn.append_child(&paragraph, &text)?;
//!         txn.append_child(&NodeKey::root(), &paragraph)
//!     })
//!     .unwrap();
//!
//! assert_eq!(update.next_state.text_content(), "Hello");
//! assert!(update.dirty_elements.contains(&NodeKey::root()));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::node::{DecoratorNode, ExternalRef, Node, NodeKey, NodeKind, PropValue, TextNode};
use crate::selection::Selection;
use crate::state::{EditorState, NodeLookup};

/// Tag carried by updates that replay changes received from peers.
pub const COLLABORATION_TAG: &str = "collaboration";

/// What one committed update changed.
#[derive(Debug, Clone)]
pub struct EditorUpdate {
    /// Version before the update.
    pub prev_state: Arc<EditorState>,
    /// Version after the update.
    pub next_state: Arc<EditorState>,
    /// Elements written, plus every ancestor of any written node.
    pub dirty_elements: HashSet<NodeKey>,
    /// Text, line break and decorator nodes written.
    pub dirty_leaves: HashSet<NodeKey>,
    /// Tags attached by the caller.
    pub tags: HashSet<String>,
}

impl EditorUpdate {
    /// Whether the update carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Whether `key` was written in this update.
    pub fn is_dirty(&self, key: &NodeKey) -> bool {
        self.dirty_elements.contains(key) || self.dirty_leaves.contains(key)
    }

    /// Whether anything in the tree changed. Selection-only updates leave the
    /// root clean.
    pub fn is_tree_dirty(&self) -> bool {
        self.dirty_elements.contains(&NodeKey::root())
    }
}

/// Owner of the current version.
#[derive(Debug, Clone, Default)]
pub struct Editor {
    state: Arc<EditorState>,
}

impl Editor {
    /// Editor holding an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Editor starting from an existing version.
    pub fn from_state(state: EditorState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// The current version.
    pub fn state(&self) -> &Arc<EditorState> {
        &self.state
    }

    /// Run `f` against a working copy and commit it if `f` succeeds.
    pub fn update<T, E, F>(&mut self, f: F) -> std::result::Result<(T, EditorUpdate), E>
    where
        F: FnOnce(&mut EditorTxn) -> std::result::Result<T, E>,
    {
        self.update_tagged(&[], f)
    }

    /// [`update`](Self::update) with tags attached to the resulting
    /// [`EditorUpdate`].
    pub fn update_tagged<T, E, F>(
        &mut self,
        tags: &[&str],
        f: F,
    ) -> std::result::Result<(T, EditorUpdate), E>
    where
        F: FnOnce(&mut EditorTxn) -> std::result::Result<T, E>,
    {
        let mut txn = EditorTxn::begin(self.state.clone());
        for tag in tags {
            txn.add_tag(tag);
        }
        let value = f(&mut txn)?;
        let update = txn.commit();
        self.state = update.next_state.clone();
        Ok((value, update))
    }
}

/// Working copy of one version while an update runs.
///
/// Reads see the transaction's own writes. Nodes are cloned out of the
/// previous version on first write only.
#[derive(Debug)]
pub struct EditorTxn {
    prev: Arc<EditorState>,
    nodes: HashMap<NodeKey, Arc<Node>>,
    selection: Option<Selection>,
    dirty_elements: HashSet<NodeKey>,
    dirty_leaves: HashSet<NodeKey>,
    detached: HashSet<NodeKey>,
    tags: HashSet<String>,
}

impl EditorTxn {
    fn begin(prev: Arc<EditorState>) -> Self {
        Self {
            nodes: prev.nodes().clone(),
            selection: prev.selection().cloned(),
            prev,
            dirty_elements: HashSet::new(),
            dirty_leaves: HashSet::new(),
            detached: HashSet::new(),
            tags: HashSet::new(),
        }
    }

    fn commit(mut self) -> EditorUpdate {
        self.collect_detached();
        let version = self.prev.version() + 1;
        log::trace!(
            "[Editor] commit v{version}: {} dirty elements, {} dirty leaves",
            self.dirty_elements.len(),
            self.dirty_leaves.len()
        );
        let next = EditorState::from_parts(self.nodes, self.selection, version);
        EditorUpdate {
            prev_state: self.prev,
            next_state: Arc::new(next),
            dirty_elements: self.dirty_elements,
            dirty_leaves: self.dirty_leaves,
            tags: self.tags,
        }
    }

    /// Drop nodes that were detached during the update and never re-attached,
    /// together with their descendants.
    fn collect_detached(&mut self) {
        let candidates: Vec<NodeKey> = self.detached.drain().collect();
        for key in candidates {
            if self.nodes.contains_key(&key) && !self.is_attached(&key) {
                self.drop_subtree(&key);
            }
        }
    }

    fn drop_subtree(&mut self, key: &NodeKey) {
        if let Some(node) = self.nodes.remove(key) {
            for child in node.children() {
                self.drop_subtree(child);
            }
        }
    }

    /// The version this update started from.
    pub fn prev_state(&self) -> &Arc<EditorState> {
        &self.prev
    }

    /// Node for `key` in the working copy.
    pub fn node(&self, key: &NodeKey) -> Option<&Node> {
        self.nodes.get(key).map(Arc::as_ref)
    }

    /// Child keys of `key` in the working copy.
    pub fn children(&self, key: &NodeKey) -> &[NodeKey] {
        self.node(key).map(Node::children).unwrap_or(&[])
    }

    fn require(&self, key: &NodeKey) -> Result<&Node> {
        self.node(key)
            .ok_or_else(|| CoreError::NodeNotFound(key.clone()))
    }

    /// Mark `key` written, and every ancestor with it.
    pub fn mark_dirty(&mut self, key: &NodeKey) {
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        if node.is_element() {
            self.dirty_elements.insert(key.clone());
        } else {
            self.dirty_leaves.insert(key.clone());
        }
        let mut parent = node.parent.clone();
        while let Some(current) = parent {
            parent = self.nodes.get(&current).and_then(|n| n.parent.clone());
            self.dirty_elements.insert(current);
        }
    }

    fn write(&mut self, key: &NodeKey) -> Result<&mut Node> {
        self.mark_dirty(key);
        self.nodes
            .get_mut(key)
            .map(Arc::make_mut)
            .ok_or_else(|| CoreError::NodeNotFound(key.clone()))
    }

    fn write_text(&mut self, key: &NodeKey) -> Result<&mut TextNode> {
        let found = self.require(key)?.kind.kind_name();
        match &mut self.write(key)?.kind {
            NodeKind::Text(text) => Ok(text),
            _ => Err(CoreError::WrongKind {
                key: key.clone(),
                expected: "text",
                found,
            }),
        }
    }

    /// Add a detached node of the given kind.
    pub fn create(&mut self, kind: NodeKind) -> NodeKey {
        let key = NodeKey::generate();
        let node = Node {
            key: key.clone(),
            parent: None,
            kind,
        };
        self.nodes.insert(key.clone(), Arc::new(node));
        self.detached.insert(key.clone());
        self.mark_dirty(&key);
        key
    }

    /// Add a detached element.
    pub fn create_element(&mut self, node_type: &str) -> NodeKey {
        self.create(NodeKind::element(node_type))
    }

    /// Add a detached unformatted text node.
    pub fn create_text(&mut self, text: &str) -> NodeKey {
        self.create(NodeKind::text(text))
    }

    /// Add a detached line break.
    pub fn create_line_break(&mut self) -> NodeKey {
        self.create(NodeKind::LineBreak)
    }

    /// Add a detached decorator.
    pub fn create_decorator(&mut self, node_type: &str, reference: Option<ExternalRef>) -> NodeKey {
        self.create(NodeKind::Decorator(DecoratorNode {
            node_type: node_type.to_string(),
            reference,
        }))
    }

    /// Insert `child` into `parent` at `index`, moving it if it is attached
    /// elsewhere. `index` counts the children after that removal.
    pub fn insert_child(&mut self, parent: &NodeKey, index: usize, child: &NodeKey) -> Result<()> {
        self.place_child(parent, Some(index), child)
    }

    /// Insert `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: &NodeKey, child: &NodeKey) -> Result<()> {
        self.place_child(parent, None, child)
    }

    fn place_child(
        &mut self,
        parent: &NodeKey,
        index: Option<usize>,
        child: &NodeKey,
    ) -> Result<()> {
        let parent_node = self.require(parent)?;
        if !parent_node.is_element() {
            return Err(CoreError::WrongKind {
                key: parent.clone(),
                expected: "element",
                found: parent_node.kind.kind_name(),
            });
        }
        self.require(child)?;
        if child.is_root() || self.is_ancestor_or_self(child, parent) {
            return Err(CoreError::InvalidInsert {
                parent: parent.clone(),
                child: child.clone(),
            });
        }

        self.detach(child)?;
        let len = self.children(parent).len();
        let index = index.unwrap_or(len);
        if index > len {
            return Err(CoreError::IndexOutOfBounds {
                key: parent.clone(),
                index,
                len,
            });
        }

        if let NodeKind::Element(el) = &mut self.write(parent)?.kind {
            el.children.insert(index, child.clone());
        }
        self.write(child)?.parent = Some(parent.clone());
        // Parent link is set now, so this reaches the new ancestors too.
        self.mark_dirty(child);
        self.detached.remove(child);
        Ok(())
    }

    fn is_ancestor_or_self(&self, candidate: &NodeKey, key: &NodeKey) -> bool {
        let mut current = Some(key.clone());
        while let Some(k) = current {
            if &k == candidate {
                return true;
            }
            current = self.node(&k).and_then(|n| n.parent.clone());
        }
        false
    }

    fn detach(&mut self, key: &NodeKey) -> Result<()> {
        let Some(parent) = self.require(key)?.parent.clone() else {
            return Ok(());
        };
        self.mark_dirty(key);
        if let NodeKind::Element(el) = &mut self.write(&parent)?.kind {
            el.children.retain(|c| c != key);
        }
        self.write(key)?.parent = None;
        self.detached.insert(key.clone());
        Ok(())
    }

    /// Detach `key` from its parent. Unless it is re-inserted before the
    /// update ends, it and its descendants are dropped at commit.
    pub fn remove(&mut self, key: &NodeKey) -> Result<()> {
        if key.is_root() {
            return Err(CoreError::RootRemoval);
        }
        self.detach(key)
    }

    /// Replace the whole text of a text node.
    pub fn set_text(&mut self, key: &NodeKey, text: &str) -> Result<()> {
        self.write_text(key)?.text = text.to_string();
        Ok(())
    }

    /// Replace `delete` bytes at byte `offset` with `insert`.
    pub fn splice_text(
        &mut self,
        key: &NodeKey,
        offset: usize,
        delete: usize,
        insert: &str,
    ) -> Result<()> {
        let current = self
            .require(key)?
            .as_text()
            .map(|t| t.text.as_str())
            .unwrap_or_default();
        let end = offset.checked_add(delete).ok_or_else(|| CoreError::InvalidTextRange {
            key: key.clone(),
            start: offset,
            end: usize::MAX,
            len: current.len(),
        })?;
        if end > current.len() || !current.is_char_boundary(offset) || !current.is_char_boundary(end)
        {
            return Err(CoreError::InvalidTextRange {
                key: key.clone(),
                start: offset,
                end,
                len: current.len(),
            });
        }
        self.write_text(key)?.text.replace_range(offset..end, insert);
        Ok(())
    }

    /// Set the format flags of a text node.
    pub fn set_format(&mut self, key: &NodeKey, format: u32) -> Result<()> {
        self.write_text(key)?.format = format;
        Ok(())
    }

    /// Set the inline style of a text node.
    pub fn set_style(&mut self, key: &NodeKey, style: &str) -> Result<()> {
        self.write_text(key)?.style = style.to_string();
        Ok(())
    }

    /// Set an element property.
    pub fn set_prop(&mut self, key: &NodeKey, name: &str, value: PropValue) -> Result<()> {
        let found = self.require(key)?.kind.kind_name();
        match &mut self.write(key)?.kind {
            NodeKind::Element(el) => {
                el.props.insert(name.to_string(), value);
                Ok(())
            }
            _ => Err(CoreError::WrongKind {
                key: key.clone(),
                expected: "element",
                found,
            }),
        }
    }

    /// Remove an element property, returning the old value.
    pub fn remove_prop(&mut self, key: &NodeKey, name: &str) -> Result<Option<PropValue>> {
        let found = self.require(key)?.kind.kind_name();
        match &mut self.write(key)?.kind {
            NodeKind::Element(el) => Ok(el.props.shift_remove(name)),
            _ => Err(CoreError::WrongKind {
                key: key.clone(),
                expected: "element",
                found,
            }),
        }
    }

    /// Point a decorator at external content.
    pub fn set_decorator_reference(
        &mut self,
        key: &NodeKey,
        reference: Option<ExternalRef>,
    ) -> Result<()> {
        let found = self.require(key)?.kind.kind_name();
        match &mut self.write(key)?.kind {
            NodeKind::Decorator(dec) => {
                dec.reference = reference;
                Ok(())
            }
            _ => Err(CoreError::WrongKind {
                key: key.clone(),
                expected: "decorator",
                found,
            }),
        }
    }

    /// Current selection of the working copy.
    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Replace the selection. Does not dirty any node.
    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
    }

    /// Attach a tag to the resulting update.
    pub fn add_tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_string());
    }
}

impl NodeLookup for EditorTxn {
    fn lookup(&self, key: &NodeKey) -> Option<&Node> {
        self.node(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::Point;

    fn editor_with_paragraph(text: &str) -> (Editor, NodeKey, NodeKey) {
        let mut editor = Editor::new();
        let ((paragraph, text), _) = editor
            .update(|txn| {
                let paragraph = txn.create_element("paragraph");
                let text = txn.create_text(text);
                txn.append_child(&paragraph, &text)?;
                txn.append_child(&NodeKey::root(), &paragraph)?;
                Ok::<_, CoreError>((paragraph, text))
            })
            .unwrap();
        (editor, paragraph, text)
    }

    #[test]
    fn test_update_bumps_version_and_shares_untouched_nodes() {
        let (mut editor, paragraph, text) = editor_with_paragraph("Hello");
        let before = editor.state().clone();
        assert_eq!(before.version(), 1);

        let second = editor
            .update(|txn| {
                let p = txn.create_element("paragraph");
                txn.append_child(&NodeKey::root(), &p)
            })
            .unwrap()
            .1;

        assert_eq!(second.next_state.version(), 2);
        assert!(Arc::ptr_eq(
            before.get_shared(&text).unwrap(),
            second.next_state.get_shared(&text).unwrap()
        ));
        assert!(!second.dirty_elements.contains(&paragraph));
        assert!(second.is_tree_dirty());
    }

    #[test]
    fn test_text_edit_marks_ancestors_dirty() {
        let (mut editor, paragraph, text) = editor_with_paragraph("Hello");
        let (_, update) = editor
            .update(|txn| txn.splice_text(&text, 5, 0, " world"))
            .unwrap();

        assert_eq!(update.next_state.text_content(), "Hello world");
        assert!(update.dirty_leaves.contains(&text));
        assert!(update.dirty_elements.contains(&paragraph));
        assert!(update.dirty_elements.contains(&NodeKey::root()));
        assert_eq!(update.prev_state.text_content(), "Hello");
    }

    #[test]
    fn test_failed_update_leaves_state_untouched() {
        let (mut editor, _, text) = editor_with_paragraph("Héllo");
        let result = editor.update(|txn| {
            txn.set_format(&text, crate::format::BOLD)?;
            // Offset 2 is inside the two-byte 'é'.
            txn.splice_text(&text, 2, 1, "x")
        });

        assert!(matches!(result, Err(CoreError::InvalidTextRange { .. })));
        assert_eq!(editor.state().version(), 1);
        assert_eq!(editor.state().text_content(), "Héllo");
    }

    #[test]
    fn test_splice_rejects_overflowing_range() {
        let (mut editor, _, text) = editor_with_paragraph("Hello");
        let result = editor.update(|txn| txn.splice_text(&text, 1, usize::MAX, ""));

        assert!(matches!(result, Err(CoreError::InvalidTextRange { .. })));
        assert_eq!(editor.state().text_content(), "Hello");
    }

    #[test]
    fn test_removed_nodes_are_collected_at_commit() {
        let (mut editor, paragraph, text) = editor_with_paragraph("Hello");
        let (_, update) = editor.update(|txn| txn.remove(&paragraph)).unwrap();

        assert!(!update.next_state.contains(&paragraph));
        assert!(!update.next_state.contains(&text));
        assert!(update.prev_state.contains(&paragraph));
        assert!(update.next_state.children(&NodeKey::root()).is_empty());
    }

    #[test]
    fn test_move_keeps_node_alive() {
        let mut editor = Editor::new();
        let ((a, b, c), _) = editor
            .update(|txn| {
                let a = txn.create_element("paragraph");
                let b = txn.create_element("heading");
                let c = txn.create_element("quote");
                for key in [&a, &b, &c] {
                    txn.append_child(&NodeKey::root(), key)?;
                }
                Ok::<_, CoreError>((a, b, c))
            })
            .unwrap();

        let (_, update) = editor
            .update(|txn| txn.insert_child(&NodeKey::root(), 2, &a))
            .unwrap();

        assert_eq!(
            update.next_state.children(&NodeKey::root()),
            &[b, c, a.clone()]
        );
        assert!(update.next_state.is_attached(&a));
    }

    #[test]
    fn test_insert_rejects_cycles_and_root() {
        let (mut editor, paragraph, _) = editor_with_paragraph("Hello");
        let cycle = editor.update(|txn| {
            let inner = txn.create_element("quote");
            txn.append_child(&paragraph, &inner)?;
            txn.append_child(&inner, &paragraph)
        });
        assert!(matches!(cycle, Err(CoreError::InvalidInsert { .. })));

        let root = editor.update(|txn| txn.append_child(&paragraph, &NodeKey::root()));
        assert!(matches!(root, Err(CoreError::InvalidInsert { .. })));

        let remove_root = editor.update(|txn| txn.remove(&NodeKey::root()));
        assert_eq!(remove_root.unwrap_err(), CoreError::RootRemoval);
    }

    #[test]
    fn test_wrong_kind_errors() {
        let (mut editor, paragraph, text) = editor_with_paragraph("Hello");
        let err = editor
            .update(|txn| txn.set_text(&paragraph, "nope"))
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::WrongKind {
                key: paragraph.clone(),
                expected: "text",
                found: "element",
            }
        );

        let err = editor
            .update(|txn| txn.set_prop(&text, "align", "center".into()))
            .unwrap_err();
        assert!(matches!(err, CoreError::WrongKind { .. }));
    }

    #[test]
    fn test_tags_and_selection() {
        let (mut editor, _, text) = editor_with_paragraph("Hello");
        let (_, update) = editor
            .update_tagged(&[COLLABORATION_TAG], |txn| {
                txn.set_selection(Some(Selection::collapsed(Point::text(text.clone(), 2))));
                Ok::<_, CoreError>(())
            })
            .unwrap();

        assert!(update.has_tag(COLLABORATION_TAG));
        assert!(!update.is_tree_dirty());
        assert_eq!(
            update.next_state.selection().map(|s| s.focus.offset),
            Some(2)
        );
    }

    #[test]
    fn test_props_and_decorator_reference() {
        let (mut editor, paragraph, _) = editor_with_paragraph("Hello");
        let (decorator, update) = editor
            .update(|txn| {
                txn.set_prop(&paragraph, "align", "center".into())?;
                let dec = txn.create_decorator(
                    "embed",
                    Some(ExternalRef::Url {
                        href: "https://example.com".to_string(),
                    }),
                );
                txn.append_child(&NodeKey::root(), &dec)?;
                Ok::<_, CoreError>(dec)
            })
            .unwrap();

        let state = &update.next_state;
        assert_eq!(
            state.get(&paragraph).and_then(|n| n.as_element()).unwrap().props["align"],
            PropValue::from("center")
        );
        assert!(update.dirty_leaves.contains(&decorator));

        let (old, _) = editor
            .update(|txn| txn.remove_prop(&paragraph, "align"))
            .unwrap();
        assert_eq!(old, Some(PropValue::from("center")));
    }

    #[test]
    fn test_shape_tracks_style_and_reference() {
        let (mut editor, _, text) = editor_with_paragraph("Hello");
        let (decorator, _) = editor
            .update(|txn| {
                let dec = txn.create_decorator("embed", None);
                txn.append_child(&NodeKey::root(), &dec)?;
                Ok::<_, CoreError>(dec)
            })
            .unwrap();
        let before = editor.state().shape();

        editor
            .update(|txn| txn.set_style(&text, "color: red"))
            .unwrap();
        let styled = editor.state().shape();
        assert_ne!(before, styled);
        assert_eq!(styled.children[0].children[0].style, "color: red");

        let reference = ExternalRef::Document {
            id: "doc-1".to_string(),
        };
        editor
            .update(|txn| txn.set_decorator_reference(&decorator, Some(reference.clone())))
            .unwrap();
        let referenced = editor.state().shape();
        assert_ne!(styled, referenced);
        assert_eq!(referenced.children[1].reference, Some(reference));
    }
}
