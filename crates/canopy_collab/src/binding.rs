//! Session-scoped registry pairing local keys with shadow nodes and shared
//! types.

use std::collections::HashMap;

use canopy_core::{NodeKey, NodeKind, Point, PointKind};
use yrs::branch::BranchID;
use yrs::{Doc, Origin, ReadTxn, StickyIndex, TextRef, TransactionMut};

use crate::config::CollabConfig;
use crate::cursor::Cursor;
use crate::error::{CollabError, Result};
use crate::presence::PresenceState;
use crate::shadow::ShadowNode;
use crate::shared::SharedRef;

/// What this peer shows others about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPeer {
    /// Cursor label.
    pub name: String,
    /// Cursor color.
    pub color: String,
    /// Whether the editor has focus.
    pub focusing: bool,
}

/// Everything one collaborative session knows about the pairing between the
/// local tree and the shared document.
///
/// Shadows are owned here and refer to each other by key. The two lookup
/// tables are kept in step by [`register`](Self::register) and
/// [`unregister`](Self::unregister); nothing else writes them.
pub struct Binding {
    doc: Doc,
    root: TextRef,
    origin: Origin,
    shadows: HashMap<NodeKey, ShadowNode>,
    by_branch: HashMap<BranchID, NodeKey>,
    pub(crate) cursors: HashMap<u64, Cursor>,
    pub(crate) local: LocalPeer,
    pub(crate) published: Option<PresenceState>,
    pub(crate) suppress_full_width_rects: bool,
}

impl Binding {
    /// Bind the root named in `config` and register its shadow.
    pub fn new(doc: Doc, config: &CollabConfig) -> Self {
        let root = doc.get_or_insert_text(config.root_name.as_str());
        let shared = SharedRef::Root(root.clone());
        let root_key = NodeKey::root();

        let mut by_branch = HashMap::new();
        by_branch.insert(shared.branch_id(), root_key.clone());
        let mut shadows = HashMap::new();
        shadows.insert(
            root_key.clone(),
            ShadowNode::new(root_key, None, shared, NodeKind::element(NodeKey::ROOT)),
        );

        Self {
            doc,
            root,
            origin: Origin::from(config.origin.as_str()),
            shadows,
            by_branch,
            cursors: HashMap::new(),
            local: LocalPeer {
                name: config.name.clone(),
                color: config.color.clone(),
                focusing: false,
            },
            published: None,
            suppress_full_width_rects: config.suppress_full_width_rects,
        }
    }

    /// The shared document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// The root shared type.
    pub fn root(&self) -> &TextRef {
        &self.root
    }

    /// Origin of transactions written by this binding.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Remote cursors by peer id.
    pub fn cursors(&self) -> &HashMap<u64, Cursor> {
        &self.cursors
    }

    /// This peer's presence settings.
    pub fn local_peer(&self) -> &LocalPeer {
        &self.local
    }

    /// Number of registered shadows, root included.
    pub fn len(&self) -> usize {
        self.shadows.len()
    }

    /// Never true: the root shadow is registered for the binding's lifetime.
    pub fn is_empty(&self) -> bool {
        self.shadows.is_empty()
    }

    /// Whether nothing below the root has been bound yet.
    pub fn is_fresh(&self) -> bool {
        self.children(&NodeKey::root()).is_empty()
    }

    /// Pair `shadow.key` with `shadow.shared`.
    pub fn register(&mut self, shadow: ShadowNode) -> Result<()> {
        let branch = shadow.shared.branch_id();
        if self.shadows.contains_key(&shadow.key) || self.by_branch.contains_key(&branch) {
            return Err(CollabError::BindingConflict(shadow.key));
        }
        log::trace!("[Binding] register {} ({})", shadow.key, shadow.kind_name());
        self.by_branch.insert(branch, shadow.key.clone());
        self.shadows.insert(shadow.key.clone(), shadow);
        Ok(())
    }

    /// Shadow for `key`.
    pub fn get(&self, key: &NodeKey) -> Option<&ShadowNode> {
        self.shadows.get(key)
    }

    pub(crate) fn require(&self, key: &NodeKey) -> Result<&ShadowNode> {
        self.get(key)
            .ok_or_else(|| CollabError::MissingShadow(key.clone()))
    }

    pub(crate) fn require_mut(&mut self, key: &NodeKey) -> Result<&mut ShadowNode> {
        self.shadows
            .get_mut(key)
            .ok_or_else(|| CollabError::MissingShadow(key.clone()))
    }

    /// Key bound to a shared type.
    pub fn reverse_lookup(&self, branch: &BranchID) -> Option<&NodeKey> {
        self.by_branch.get(branch)
    }

    /// Child keys of a shadow; empty when unknown.
    pub fn children(&self, key: &NodeKey) -> &[NodeKey] {
        self.get(key).map(|s| s.children.as_slice()).unwrap_or(&[])
    }

    /// Drop both lookup entries for `key`. Unknown keys are ignored.
    pub fn unregister(&mut self, key: &NodeKey) -> Option<ShadowNode> {
        let shadow = self.shadows.remove(key)?;
        self.by_branch.remove(&shadow.shared.branch_id());
        log::trace!("[Binding] unregister {key}");
        Some(shadow)
    }

    /// Unregister `key` and every shadow below it. The shared types are left
    /// alone.
    pub fn destroy_subtree(&mut self, key: &NodeKey) {
        if let Some(shadow) = self.unregister(key) {
            for child in &shadow.children {
                self.destroy_subtree(child);
            }
        }
    }

    /// Record `child` as entry `index` of `parent`.
    pub(crate) fn attach_child(&mut self, parent: &NodeKey, index: usize, child: &NodeKey) -> Result<()> {
        let shadow = self.require_mut(parent)?;
        if index > shadow.children.len() {
            return Err(CollabError::ChildIndexOutOfBounds {
                key: parent.clone(),
                index,
                len: shadow.children.len(),
            });
        }
        shadow.children.insert(index, child.clone());
        Ok(())
    }

    /// Remove child `index` of `parent` from the shadow list and from the
    /// container, then destroy its shadows.
    pub(crate) fn remove_child_at(
        &mut self,
        txn: &mut TransactionMut,
        parent: &NodeKey,
        index: usize,
    ) -> Result<NodeKey> {
        let shadow = self.require_mut(parent)?;
        if index >= shadow.children.len() {
            return Err(CollabError::ChildIndexOutOfBounds {
                key: parent.clone(),
                index,
                len: shadow.children.len(),
            });
        }
        let child = shadow.children.remove(index);
        shadow.shared.remove_range(txn, to_u32(index), 1)?;
        self.destroy_subtree(&child);
        Ok(child)
    }

    /// Take `key` out of its parent, in the shadow tree and in the shared
    /// document, and destroy its shadow subtree.
    pub fn detach(&mut self, txn: &mut TransactionMut, key: &NodeKey) -> Result<()> {
        let Some(parent) = self.require(key)?.parent.clone() else {
            return Err(CollabError::UnsupportedContent(
                "the root cannot be detached".to_string(),
            ));
        };
        let index = self
            .require(&parent)?
            .child_index(key)
            .ok_or_else(|| CollabError::ShapeMismatch(parent.clone()))?;
        log::trace!("[Binding] detach {key} from {parent}[{index}]");
        self.remove_child_at(txn, &parent, index)?;
        Ok(())
    }

    /// Relative position for a local point, if its node is bound.
    pub fn sticky_position(&self, txn: &mut TransactionMut, point: &Point) -> Option<StickyIndex> {
        let shadow = self.get(&point.key)?;
        let valid = match point.kind {
            PointKind::Text => shadow.is_text(),
            PointKind::Element => shadow.is_element() && point.offset <= shadow.children.len(),
        };
        if !valid {
            return None;
        }
        shadow.shared.sticky_index(txn, u32::try_from(point.offset).ok()?)
    }

    /// Local point a relative position currently resolves to.
    pub fn resolve_position<T: ReadTxn>(&self, txn: &T, sticky: &StickyIndex) -> Option<Point> {
        let offset = sticky.get_offset(txn)?;
        let key = self.reverse_lookup(&offset.branch.id())?;
        let shadow = self.get(key)?;
        let index = offset.index as usize;
        if shadow.is_text() {
            Some(Point::text(key.clone(), index))
        } else if shadow.is_element() {
            Some(Point::element(key.clone(), index.min(shadow.children.len())))
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("origin", &self.origin)
            .field("shadows", &self.shadows.len())
            .field("cursors", &self.cursors.len())
            .finish()
    }
}

pub(crate) fn to_u32(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::Transact;

    fn binding() -> Binding {
        Binding::new(Doc::new(), &CollabConfig::default())
    }

    #[test]
    fn test_root_is_registered() {
        let binding = binding();
        assert_eq!(binding.len(), 1);
        assert!(binding.is_fresh());
        let root_id = SharedRef::Root(binding.root().clone()).branch_id();
        assert_eq!(binding.reverse_lookup(&root_id), Some(&NodeKey::root()));
    }

    #[test]
    fn test_register_conflicts_and_idempotent_unregister() {
        let mut binding = binding();
        let doc = binding.doc().clone();
        let shared = {
            let mut txn = doc.transact_mut();
            SharedRef::Root(binding.root().clone())
                .insert_child(&mut txn, 0, &NodeKind::element("paragraph"))
                .unwrap()
        };
        let key = NodeKey::generate();
        let shadow = ShadowNode::new(
            key.clone(),
            Some(NodeKey::root()),
            shared.clone(),
            NodeKind::element("paragraph"),
        );
        binding.register(shadow.clone()).unwrap();

        // Same key again.
        assert!(matches!(
            binding.register(shadow),
            Err(CollabError::BindingConflict(_))
        ));
        // Same shared type under another key.
        let other = ShadowNode::new(
            NodeKey::generate(),
            Some(NodeKey::root()),
            shared.clone(),
            NodeKind::element("paragraph"),
        );
        assert!(matches!(
            binding.register(other),
            Err(CollabError::BindingConflict(_))
        ));

        assert!(binding.unregister(&key).is_some());
        assert!(binding.unregister(&key).is_none());
        assert_eq!(binding.reverse_lookup(&shared.branch_id()), None);
    }

    #[test]
    fn test_detach_removes_from_container() {
        let mut binding = binding();
        let doc = binding.doc().clone();
        let mut txn = doc.transact_mut();
        let root = SharedRef::Root(binding.root().clone());

        let mut keys = Vec::new();
        for i in 0..3 {
            let kind = NodeKind::element("paragraph");
            let shared = root.insert_child(&mut txn, i, &kind).unwrap();
            let key = NodeKey::generate();
            binding
                .register(ShadowNode::new(key.clone(), Some(NodeKey::root()), shared, kind))
                .unwrap();
            binding
                .attach_child(&NodeKey::root(), i as usize, &key)
                .unwrap();
            keys.push(key);
        }

        binding.detach(&mut txn, &keys[1]).unwrap();
        assert_eq!(
            binding.children(&NodeKey::root()),
            &[keys[0].clone(), keys[2].clone()]
        );
        assert_eq!(root.len(&txn).unwrap(), 2);
        assert!(binding.get(&keys[1]).is_none());
        assert!(matches!(
            binding.detach(&mut txn, &NodeKey::root()),
            Err(CollabError::UnsupportedContent(_))
        ));
    }

    #[test]
    fn test_positions_at_sequence_ends_resolve() {
        let mut binding = binding();
        let doc = binding.doc().clone();
        let mut txn = doc.transact_mut();
        let root = SharedRef::Root(binding.root().clone());

        let kind = NodeKind::element("paragraph");
        let p_shared = root.insert_child(&mut txn, 0, &kind).unwrap();
        let p = NodeKey::generate();
        binding
            .register(ShadowNode::new(p.clone(), Some(NodeKey::root()), p_shared.clone(), kind))
            .unwrap();
        binding.attach_child(&NodeKey::root(), 0, &p).unwrap();

        let mut texts = Vec::new();
        for (i, content) in ["Hi", ""].into_iter().enumerate() {
            let kind = NodeKind::text(content);
            let shared = p_shared.insert_child(&mut txn, i as u32, &kind).unwrap();
            if !content.is_empty() {
                shared.insert_text(&mut txn, 0, content).unwrap();
            }
            let key = NodeKey::generate();
            binding
                .register(ShadowNode::new(key.clone(), Some(p.clone()), shared, kind))
                .unwrap();
            binding.attach_child(&p, i, &key).unwrap();
            texts.push(key);
        }

        let points = [
            Point::text(texts[0].clone(), 0),
            Point::text(texts[0].clone(), 2),
            Point::text(texts[1].clone(), 0),
            Point::element(p.clone(), 2),
            Point::element(NodeKey::root(), 1),
        ];
        for point in points {
            let sticky = binding
                .sticky_position(&mut txn, &point)
                .unwrap_or_else(|| panic!("no relative position for {point:?}"));
            assert_eq!(binding.resolve_position(&txn, &sticky), Some(point));
        }
    }
}
