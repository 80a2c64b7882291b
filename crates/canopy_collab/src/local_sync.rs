//! Local edits to the shared document.

use std::collections::HashSet;

use canopy_core::{
    COLLABORATION_TAG, EditorState, EditorUpdate, NodeKey, NodeKind, PointKind, Selection,
};
use yrs::{Transact, TransactionMut};

use crate::binding::{Binding, to_u32};
use crate::cursor::publish_selection;
use crate::error::{CollabError, Result};
use crate::presence::PresenceChannel;
use crate::shadow::ShadowNode;
use crate::shared::{
    FORMAT_ATTR, REF_ATTR, STYLE_ATTR, node_attributes, prop_to_any, reference_to_any, string_any,
};
use crate::text_diff::TextDiff;

/// Replay one local update onto the shared document, inside a single
/// transaction, then publish the selection.
///
/// Updates tagged [`COLLABORATION_TAG`] came from the shared document in the
/// first place and are ignored.
pub fn sync_local_changes_to_remote(
    binding: &mut Binding,
    presence: &dyn PresenceChannel,
    update: &EditorUpdate,
) -> Result<()> {
    if update.has_tag(COLLABORATION_TAG) {
        log::trace!(
            "[LocalSync] skipping v{}: produced by remote sync",
            update.next_state.version()
        );
        return Ok(());
    }

    let doc = binding.doc().clone();
    let mut txn = doc.transact_mut_with(binding.origin().clone());

    if update.is_tree_dirty() {
        log::trace!(
            "[LocalSync] v{}: {} dirty elements, {} dirty leaves",
            update.next_state.version(),
            update.dirty_elements.len(),
            update.dirty_leaves.len()
        );
        let mut pass = LocalPass {
            binding: &mut *binding,
            txn: &mut txn,
            state: &update.next_state,
            update,
        };
        pass.sync_element(&NodeKey::root())?;
    }

    publish_selection(binding, &mut txn, presence, update.next_state.selection())?;
    Ok(())
}

/// Write the whole local tree into an empty shared root.
pub(crate) fn seed_from_local(
    binding: &mut Binding,
    txn: &mut TransactionMut,
    state: &EditorState,
) -> Result<()> {
    for (index, child) in state.children(&NodeKey::root()).iter().enumerate() {
        create_subtree(binding, txn, state, &NodeKey::root(), index, child)?;
    }
    Ok(())
}

struct LocalPass<'a, 'doc> {
    binding: &'a mut Binding,
    txn: &'a mut TransactionMut<'doc>,
    state: &'a EditorState,
    update: &'a EditorUpdate,
}

impl LocalPass<'_, '_> {
    fn sync_element(&mut self, key: &NodeKey) -> Result<()> {
        let state = self.state;
        let node = state
            .get(key)
            .ok_or_else(|| CollabError::MissingLocalNode(key.clone()))?;
        let element = node.as_element().ok_or_else(|| CollabError::KindMismatch {
            key: key.clone(),
            local: node.kind.kind_name(),
            shadow: "element",
        })?;

        if !key.is_root() {
            sync_attributes(self.binding, self.txn, key, &node.kind)?;
        }

        let next_children = &element.children;
        let next_set: HashSet<&NodeKey> = next_children.iter().collect();
        for (index, next_key) in next_children.iter().enumerate() {
            loop {
                let current = self.binding.children(key).get(index).cloned();
                match current {
                    Some(current) if &current == next_key => {
                        self.sync_child(next_key)?;
                        break;
                    }
                    Some(current) if !next_set.contains(&current) => {
                        log::trace!("[LocalSync] remove {current} from {key}[{index}]");
                        self.binding.remove_child_at(self.txn, key, index)?;
                    }
                    _ => {
                        create_subtree(self.binding, self.txn, state, key, index, next_key)?;
                        break;
                    }
                }
            }
        }

        while self.binding.children(key).len() > next_children.len() {
            let index = next_children.len();
            log::trace!("[LocalSync] trim {key}[{index}]");
            self.binding.remove_child_at(self.txn, key, index)?;
        }

        let shadow_len = self.binding.children(key).len();
        if shadow_len != next_children.len() {
            return Err(CollabError::ShapeMismatch(key.clone()));
        }
        Ok(())
    }

    fn sync_child(&mut self, key: &NodeKey) -> Result<()> {
        let state = self.state;
        let node = state
            .get(key)
            .ok_or_else(|| CollabError::MissingLocalNode(key.clone()))?;
        let shadow_kind = self.binding.require(key)?.kind_name();
        if shadow_kind != node.kind.kind_name() {
            return Err(CollabError::KindMismatch {
                key: key.clone(),
                local: node.kind.kind_name(),
                shadow: shadow_kind,
            });
        }

        match &node.kind {
            NodeKind::Element(_) => {
                if self.update.dirty_elements.contains(key) {
                    self.sync_element(key)?;
                }
            }
            NodeKind::Text(text) => {
                if self.update.dirty_leaves.contains(key) {
                    sync_attributes(self.binding, self.txn, key, &node.kind)?;
                    let cursor = collapsed_text_offset(state.selection(), key);
                    sync_text(self.binding, self.txn, key, &text.text, cursor)?;
                }
            }
            NodeKind::LineBreak | NodeKind::Decorator(_) => {
                if self.update.dirty_leaves.contains(key) {
                    sync_attributes(self.binding, self.txn, key, &node.kind)?;
                }
            }
        }
        Ok(())
    }
}

fn collapsed_text_offset(selection: Option<&Selection>, key: &NodeKey) -> Option<usize> {
    let selection = selection?;
    let anchor = &selection.anchor;
    (selection.is_collapsed() && anchor.kind == PointKind::Text && &anchor.key == key)
        .then_some(anchor.offset)
}

/// Create shadows and shared types for `key` and everything below it, as
/// child `index` of `parent`. A shadow `key` already has elsewhere is a
/// move: it is detached first.
pub(crate) fn create_subtree(
    binding: &mut Binding,
    txn: &mut TransactionMut,
    state: &EditorState,
    parent: &NodeKey,
    index: usize,
    key: &NodeKey,
) -> Result<()> {
    let node = state
        .get(key)
        .ok_or_else(|| CollabError::MissingLocalNode(key.clone()))?;
    if binding.get(key).is_some() {
        log::trace!("[LocalSync] {key} moved, recreating under {parent}");
        binding.detach(txn, key)?;
    }

    let parent_shared = binding.require(parent)?.shared.clone();
    let shared = parent_shared.insert_child(txn, to_u32(index), &node.kind)?;
    for (name, value) in node_attributes(&node.kind) {
        shared.set_attribute(txn, &name, value);
    }
    if let NodeKind::Text(text) = &node.kind
        && !text.text.is_empty()
    {
        shared.insert_text(txn, 0, &text.text)?;
    }

    binding.register(ShadowNode::new(
        key.clone(),
        Some(parent.clone()),
        shared,
        node.kind.clone(),
    ))?;
    binding.attach_child(parent, index, key)?;
    log::trace!(
        "[LocalSync] created {key} ({}) at {parent}[{index}]",
        node.kind.kind_name()
    );

    for (child_index, child) in node.children().iter().enumerate() {
        create_subtree(binding, txn, state, key, child_index, child)?;
    }
    Ok(())
}

/// Write changed payload fields as attributes and remember them as synced.
fn sync_attributes(
    binding: &mut Binding,
    txn: &mut TransactionMut,
    key: &NodeKey,
    next: &NodeKind,
) -> Result<()> {
    let shadow = binding.require_mut(key)?;
    match (&mut shadow.synced, next) {
        (NodeKind::Element(prev), NodeKind::Element(next)) => {
            for (name, value) in &next.props {
                if prev.props.get(name) != Some(value) {
                    shadow.shared.set_attribute(txn, name, prop_to_any(value));
                }
            }
            for name in prev.props.keys() {
                if !next.props.contains_key(name) {
                    shadow.shared.remove_attribute(txn, name);
                }
            }
            prev.props = next.props.clone();
        }
        (NodeKind::Text(prev), NodeKind::Text(next)) => {
            if prev.format != next.format {
                shadow.shared.set_attribute(
                    txn,
                    FORMAT_ATTR,
                    yrs::Any::BigInt(i64::from(next.format)),
                );
                prev.format = next.format;
            }
            if prev.style != next.style {
                shadow
                    .shared
                    .set_attribute(txn, STYLE_ATTR, string_any(&next.style));
                prev.style = next.style.clone();
            }
        }
        (NodeKind::Decorator(prev), NodeKind::Decorator(next)) => {
            if prev.reference != next.reference {
                match reference_to_any(next.reference.as_ref()) {
                    Some(value) => shadow.shared.set_attribute(txn, REF_ATTR, value),
                    None => shadow.shared.remove_attribute(txn, REF_ATTR),
                }
                prev.reference = next.reference.clone();
            }
        }
        (NodeKind::LineBreak, NodeKind::LineBreak) => {}
        (prev, next) => {
            return Err(CollabError::KindMismatch {
                key: key.clone(),
                local: next.kind_name(),
                shadow: prev.kind_name(),
            });
        }
    }
    Ok(())
}

/// Splice the difference between the synced text and `next` into the shared
/// text.
fn sync_text(
    binding: &mut Binding,
    txn: &mut TransactionMut,
    key: &NodeKey,
    next: &str,
    cursor: Option<usize>,
) -> Result<()> {
    let shadow = binding.require_mut(key)?;
    let shadow_kind = shadow.kind_name();
    let NodeKind::Text(synced) = &mut shadow.synced else {
        return Err(CollabError::KindMismatch {
            key: key.clone(),
            local: "text",
            shadow: shadow_kind,
        });
    };
    let diff = TextDiff::compute(&synced.text, next, cursor);
    if diff.is_empty() {
        return Ok(());
    }
    log::trace!(
        "[LocalSync] text {key}: at {} remove {} insert {:?}",
        diff.index,
        diff.remove,
        diff.insert
    );
    if diff.remove > 0 {
        shadow
            .shared
            .remove_range(txn, to_u32(diff.index), to_u32(diff.remove))?;
    }
    if !diff.insert.is_empty() {
        shadow.shared.insert_text(txn, to_u32(diff.index), &diff.insert)?;
    }
    synced.text = next.to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollabConfig;
    use crate::presence::PresenceHub;
    use crate::shared::{SharedRef, SharedSnapshot};
    use canopy_core::{Editor, EditorTxn, Point};
    use yrs::{Doc, Transact};

    struct Peer {
        editor: Editor,
        binding: Binding,
        hub: PresenceHub,
    }

    impl Peer {
        fn new() -> Self {
            Self {
                editor: Editor::new(),
                binding: Binding::new(Doc::new(), &CollabConfig::default()),
                hub: PresenceHub::new(),
            }
        }

        fn edit<T>(&mut self, f: impl FnOnce(&mut EditorTxn) -> canopy_core::Result<T>) -> T {
            let (value, update) = self.editor.update(f).unwrap();
            let channel = self.hub.join_as(1);
            sync_local_changes_to_remote(&mut self.binding, &channel, &update).unwrap();
            value
        }

        fn shared_text(&self) -> String {
            let txn = self.binding.doc().transact();
            let root = SharedSnapshot::read(&txn, SharedRef::Root(self.binding.root().clone()))
                .unwrap();
            flatten(&root)
        }
    }

    fn flatten(snapshot: &SharedSnapshot) -> String {
        match &snapshot.kind {
            NodeKind::Text(t) => t.text.clone(),
            NodeKind::LineBreak => "\n".to_string(),
            _ => snapshot
                .children
                .iter()
                .map(flatten)
                .collect::<Vec<_>>()
                .join("|"),
        }
    }

    fn paragraph(txn: &mut EditorTxn, text: &str) -> canopy_core::Result<NodeKey> {
        let p = txn.create_element("paragraph");
        let t = txn.create_text(text);
        txn.append_child(&p, &t)?;
        txn.append_child(&NodeKey::root(), &p)?;
        Ok(p)
    }

    #[test]
    fn test_new_paragraphs_are_mirrored() {
        let mut peer = Peer::new();
        peer.edit(|txn| {
            paragraph(txn, "one")?;
            paragraph(txn, "two")
        });
        assert_eq!(peer.shared_text(), "one|two");
        assert_eq!(peer.binding.len(), 5);
    }

    #[test]
    fn test_text_edits_splice_shared_text() {
        let mut peer = Peer::new();
        let p = peer.edit(|txn| paragraph(txn, "Hello"));
        let text = peer.editor.state().children(&p)[0].clone();

        peer.edit(|txn| {
            txn.splice_text(&text, 4, 0, "l")?;
            txn.set_selection(Some(Selection::collapsed(Point::text(text.clone(), 5))));
            Ok(())
        });
        assert_eq!(peer.shared_text(), "Helllo");

        peer.edit(|txn| txn.set_text(&text, ""));
        assert_eq!(peer.shared_text(), "");
    }

    #[test]
    fn test_removals_and_moves() {
        let mut peer = Peer::new();
        let (a, b, c) = peer.edit(|txn| {
            Ok((paragraph(txn, "a")?, paragraph(txn, "b")?, paragraph(txn, "c")?))
        });

        peer.edit(|txn| txn.insert_child(&NodeKey::root(), 2, &a));
        assert_eq!(peer.shared_text(), "b|c|a");
        assert_eq!(peer.binding.children(&NodeKey::root()), &[b.clone(), c, a]);

        peer.edit(|txn| txn.remove(&b));
        assert_eq!(peer.shared_text(), "c|a");
        assert!(peer.binding.get(&b).is_none());
        assert_eq!(peer.binding.len(), 5);
    }

    #[test]
    fn test_collaboration_updates_are_skipped() {
        let mut peer = Peer::new();
        let (_, update) = peer
            .editor
            .update_tagged(&[COLLABORATION_TAG], |txn| paragraph(txn, "echo"))
            .unwrap();
        let channel = peer.hub.join_as(1);
        sync_local_changes_to_remote(&mut peer.binding, &channel, &update).unwrap();
        assert_eq!(peer.shared_text(), "");
        assert!(peer.binding.is_fresh());
    }
}
