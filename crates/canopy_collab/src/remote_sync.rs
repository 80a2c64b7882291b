//! Shared-document changes to the local tree.

use canopy_core::{
    COLLABORATION_TAG, DocumentIndex, Editor, EditorTxn, EditorUpdate, NodeKey, NodeKind,
    NodeLookup, Point, PointKind, Selection,
};
use yrs::Transact;

use crate::binding::Binding;
use crate::cursor::decode_position;
use crate::error::{CollabError, Result};
use crate::event::{CollabEvent, DeltaOp, Inserted};
use crate::shadow::ShadowNode;
use crate::shared::{
    FORMAT_ATTR, REF_ATTR, STYLE_ATTR, SharedSnapshot, any_to_prop, any_to_reference, any_to_string,
    any_to_u32,
};
use crate::text_diff::TextDiff;

/// Apply the events of one shared-document transaction as a single local
/// update tagged [`COLLABORATION_TAG`].
///
/// Events whose target is not bound are skipped: they belong to shared types
/// created or destroyed within the same batch. If any event fails, nothing is
/// committed locally and the error is returned.
pub fn sync_remote_changes_to_local(
    binding: &mut Binding,
    editor: &mut Editor,
    mut events: Vec<CollabEvent>,
) -> Result<Option<EditorUpdate>> {
    if events.is_empty() {
        return Ok(None);
    }
    events.sort_by_key(|event| target_depth(binding, event));

    let (_, update) = editor.update_tagged(&[COLLABORATION_TAG], |txn| -> Result<()> {
        for event in &events {
            apply_event(binding, txn, event)?;
        }
        recover_selection(binding, txn);
        Ok(())
    })?;
    log::trace!(
        "[RemoteSync] applied {} events as v{}",
        events.len(),
        update.next_state.version()
    );
    Ok(Some(update))
}

fn target_depth(binding: &Binding, event: &CollabEvent) -> usize {
    let Some(mut key) = binding.reverse_lookup(&event.target.branch_id()) else {
        return 0;
    };
    let mut depth = 0;
    while let Some(parent) = binding.get(key).and_then(|s| s.parent.as_ref()) {
        depth += 1;
        key = parent;
    }
    depth
}

fn apply_event(binding: &mut Binding, txn: &mut EditorTxn, event: &CollabEvent) -> Result<()> {
    let Some(key) = binding.reverse_lookup(&event.target.branch_id()).cloned() else {
        log::debug!(
            "[RemoteSync] skipping event on unbound {}",
            event.target.kind_name()
        );
        return Ok(());
    };
    let shadow_kind = binding.require(&key)?.kind_name();
    let local_kind = txn
        .node(&key)
        .ok_or_else(|| CollabError::MissingLocalNode(key.clone()))?
        .kind
        .kind_name();
    if shadow_kind != local_kind {
        return Err(CollabError::KindMismatch {
            key,
            local: local_kind,
            shadow: shadow_kind,
        });
    }

    apply_attributes(binding, txn, &key, &event.attributes)?;
    match local_kind {
        "element" => apply_children_delta(binding, txn, &key, &event.delta),
        "text" => match &event.text {
            Some(text) => apply_text(binding, txn, &key, text),
            None => Ok(()),
        },
        _ => Ok(()),
    }
}

fn apply_attributes(
    binding: &mut Binding,
    txn: &mut EditorTxn,
    key: &NodeKey,
    attributes: &[(String, Option<yrs::Any>)],
) -> Result<()> {
    if attributes.is_empty() {
        return Ok(());
    }
    let shadow = binding.require_mut(key)?;
    match &mut shadow.synced {
        NodeKind::Element(synced) => {
            for (name, value) in attributes {
                if name.starts_with("__") {
                    continue;
                }
                match value.as_ref() {
                    Some(value) => {
                        if let Some(prop) = any_to_prop(value) {
                            txn.set_prop(key, name, prop.clone())?;
                            synced.props.insert(name.clone(), prop);
                        }
                    }
                    None => {
                        txn.remove_prop(key, name)?;
                        synced.props.shift_remove(name);
                    }
                }
            }
        }
        NodeKind::Text(synced) => {
            for (name, value) in attributes {
                match name.as_str() {
                    FORMAT_ATTR => {
                        let format = value.as_ref().and_then(any_to_u32).unwrap_or(0);
                        txn.set_format(key, format)?;
                        synced.format = format;
                    }
                    STYLE_ATTR => {
                        let style = value.as_ref().and_then(any_to_string).unwrap_or_default();
                        txn.set_style(key, &style)?;
                        synced.style = style;
                    }
                    _ => {}
                }
            }
        }
        NodeKind::Decorator(synced) => {
            for (name, value) in attributes {
                if name == REF_ATTR {
                    let reference = value.as_ref().and_then(any_to_reference);
                    txn.set_decorator_reference(key, reference.clone())?;
                    synced.reference = reference;
                }
            }
        }
        NodeKind::LineBreak => {}
    }
    Ok(())
}

fn apply_children_delta(
    binding: &mut Binding,
    txn: &mut EditorTxn,
    key: &NodeKey,
    delta: &[DeltaOp],
) -> Result<()> {
    let mut index = 0usize;
    for op in delta {
        match op {
            DeltaOp::Retain(len) => index += *len as usize,
            DeltaOp::Delete(len) => {
                for _ in 0..*len {
                    let shadow = binding.require_mut(key)?;
                    if index >= shadow.children.len() {
                        return Err(CollabError::ChildIndexOutOfBounds {
                            key: key.clone(),
                            index,
                            len: shadow.children.len(),
                        });
                    }
                    let child = shadow.children.remove(index);
                    log::trace!("[RemoteSync] remove {child} from {key}[{index}]");
                    binding.destroy_subtree(&child);
                    if txn.node(&child).is_some() {
                        txn.remove(&child)?;
                    }
                }
            }
            DeltaOp::Insert(Inserted::Shared(snapshot)) => {
                insert_snapshot(binding, txn, key, index, snapshot)?;
                index += 1;
            }
            DeltaOp::Insert(Inserted::Chars(chars)) => {
                return Err(CollabError::UnsupportedContent(format!(
                    "characters {chars:?} inserted into element {key}"
                )));
            }
            DeltaOp::Insert(Inserted::Unsupported(what)) => {
                return Err(CollabError::UnsupportedContent(what.clone()));
            }
        }
    }

    let shadow_len = binding.children(key).len();
    if shadow_len != txn.children(key).len() {
        return Err(CollabError::ShapeMismatch(key.clone()));
    }
    Ok(())
}

/// Build local nodes and shadows for a shared subtree, as child `index` of
/// `parent`.
pub(crate) fn insert_snapshot(
    binding: &mut Binding,
    txn: &mut EditorTxn,
    parent: &NodeKey,
    index: usize,
    snapshot: &SharedSnapshot,
) -> Result<NodeKey> {
    let key = txn.create(snapshot.kind.clone());
    if index > txn.children(parent).len() {
        return Err(CollabError::ChildIndexOutOfBounds {
            key: parent.clone(),
            index,
            len: txn.children(parent).len(),
        });
    }
    txn.insert_child(parent, index, &key)?;
    binding.register(ShadowNode::new(
        key.clone(),
        Some(parent.clone()),
        snapshot.shared.clone(),
        snapshot.kind.clone(),
    ))?;
    binding.attach_child(parent, index, &key)?;
    log::trace!(
        "[RemoteSync] created {key} ({}) at {parent}[{index}]",
        snapshot.kind.kind_name()
    );

    for (child_index, child) in snapshot.children.iter().enumerate() {
        insert_snapshot(binding, txn, &key, child_index, child)?;
    }
    Ok(key)
}

/// Bring a text node to `next` with the smallest splice, keeping a local
/// caret in the node where it was.
fn apply_text(binding: &mut Binding, txn: &mut EditorTxn, key: &NodeKey, next: &str) -> Result<()> {
    let current = txn
        .node(key)
        .and_then(|node| node.as_text())
        .map(|text| text.text.clone())
        .ok_or_else(|| CollabError::MissingLocalNode(key.clone()))?;
    let cursor = txn.selection().and_then(|selection| {
        let anchor = &selection.anchor;
        (selection.is_collapsed() && anchor.kind == PointKind::Text && &anchor.key == key)
            .then_some(anchor.offset)
    });

    let diff = TextDiff::compute(&current, next, cursor);
    if !diff.is_empty() {
        if diff.index + diff.remove > current.len() {
            return Err(CollabError::TextRangeOutOfBounds {
                key: key.clone(),
                start: diff.index,
                end: diff.index + diff.remove,
                len: current.len(),
            });
        }
        txn.splice_text(key, diff.index, diff.remove, &diff.insert)?;
        shift_selection(txn, key, &diff);
    }

    if let NodeKind::Text(synced) = &mut binding.require_mut(key)?.synced {
        synced.text = next.to_string();
    }
    Ok(())
}

/// Keep local points inside an edited text node on the same characters.
fn shift_selection(txn: &mut EditorTxn, key: &NodeKey, diff: &TextDiff) {
    let Some(mut selection) = txn.selection().cloned() else {
        return;
    };
    let shift = |point: &mut Point| {
        if point.kind != PointKind::Text || &point.key != key || point.offset <= diff.index {
            return;
        }
        let removed_end = diff.index + diff.remove;
        point.offset = if point.offset >= removed_end {
            point.offset - diff.remove + diff.insert.len()
        } else {
            diff.index + diff.insert.len()
        };
    };
    shift(&mut selection.anchor);
    shift(&mut selection.focus);
    txn.set_selection(Some(selection));
}

/// Repair a selection the remote changes invalidated.
///
/// Tries, in order: the relative positions last published for this peer,
/// the previous selection's whole-document offsets, and the document end.
pub(crate) fn recover_selection(binding: &Binding, txn: &mut EditorTxn) {
    let Some(selection) = txn.selection().cloned() else {
        return;
    };
    if txn.is_selection_valid(&selection) {
        return;
    }

    if let Some(recovered) = published_selection(binding)
        && txn.is_selection_valid(&recovered)
    {
        log::debug!("[RemoteSync] selection restored from relative positions");
        txn.set_selection(Some(recovered));
        return;
    }

    if let Some(recovered) = offset_selection(txn, &selection)
        && txn.is_selection_valid(&recovered)
    {
        log::debug!("[RemoteSync] selection restored from document offsets");
        txn.set_selection(Some(recovered));
        return;
    }

    let end = DocumentIndex::build(&*txn).end_point();
    log::debug!("[RemoteSync] selection moved to document end");
    txn.set_selection(Some(Selection::collapsed(end)));
}

fn published_selection(binding: &Binding) -> Option<Selection> {
    let published = binding.published.as_ref()?;
    let anchor = decode_position(published.anchor_pos.as_deref()?)?;
    let focus = decode_position(published.focus_pos.as_deref()?)?;
    let doc = binding.doc().clone();
    let read = doc.transact();
    Some(Selection::new(
        binding.resolve_position(&read, &anchor)?,
        binding.resolve_position(&read, &focus)?,
    ))
}

fn offset_selection(txn: &EditorTxn, selection: &Selection) -> Option<Selection> {
    let prev = txn.prev_state();
    let prev_index = DocumentIndex::build(prev.as_ref());
    let anchor = prev_index.point_to_offset(prev.as_ref(), &selection.anchor)?;
    let focus = prev_index.point_to_offset(prev.as_ref(), &selection.focus)?;

    let next_index = DocumentIndex::build(txn);
    Some(Selection::new(
        next_index.offset_to_point(anchor)?,
        next_index.offset_to_point(focus)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollabConfig;
    use canopy_core::Editor;
    use yrs::Doc;

    #[test]
    fn test_empty_batch_commits_nothing() {
        let mut binding = Binding::new(Doc::new(), &CollabConfig::default());
        let mut editor = Editor::new();
        let result = sync_remote_changes_to_local(&mut binding, &mut editor, Vec::new()).unwrap();
        assert!(result.is_none());
        assert_eq!(editor.state().version(), 0);
    }

    #[test]
    fn test_selection_falls_back_to_document_end() {
        let binding = Binding::new(Doc::new(), &CollabConfig::default());
        let mut editor = Editor::new();
        let (text, _) = editor
            .update(|txn| {
                let p = txn.create_element("paragraph");
                let t = txn.create_text("Hi");
                txn.append_child(&p, &t)?;
                txn.append_child(&NodeKey::root(), &p)?;
                Ok::<_, canopy_core::CoreError>(t)
            })
            .unwrap();

        let (_, update) = editor
            .update(|txn| -> Result<()> {
                txn.set_selection(Some(Selection::collapsed(Point::text(
                    NodeKey::from("gone"),
                    0,
                ))));
                recover_selection(&binding, txn);
                Ok(())
            })
            .unwrap();
        assert_eq!(
            update.next_state.selection(),
            Some(&Selection::collapsed(Point::text(text, 2)))
        );
    }

    #[test]
    fn test_shift_selection_after_remote_insert() {
        let mut editor = Editor::new();
        let (text, _) = editor
            .update(|txn| {
                let p = txn.create_element("paragraph");
                let t = txn.create_text("Hello");
                txn.append_child(&p, &t)?;
                txn.append_child(&NodeKey::root(), &p)?;
                txn.set_selection(Some(Selection::collapsed(Point::text(t.clone(), 4))));
                Ok::<_, canopy_core::CoreError>(t)
            })
            .unwrap();

        let (_, update) = editor
            .update(|txn| -> Result<()> {
                let diff = TextDiff::compute("Hello", ">> Hello", Some(0));
                txn.splice_text(&text, diff.index, diff.remove, &diff.insert)?;
                shift_selection(txn, &text, &diff);
                Ok(())
            })
            .unwrap();
        assert_eq!(update.next_state.selection().map(|s| s.focus.offset), Some(7));
    }
}
