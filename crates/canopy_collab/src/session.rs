//! One editor's membership in a shared document.
//!
//! A session owns the [`Binding`], the presence channel and the deep observer
//! on the shared root. Remote transactions are captured by the observer into
//! a queue and applied to the editor by [`CollabSession::flush_remote_events`],
//! once the shared-document transaction has committed.

use std::sync::Arc;

use canopy_core::{COLLABORATION_TAG, Editor, EditorState, EditorUpdate, NodeKey};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{DeepObservable, Doc, Origin, ReadTxn, StateVector, Subscription, Transact, Update};

use crate::binding::Binding;
use crate::config::CollabConfig;
use crate::cursor::{CursorSurface, republish, sync_cursor_positions};
use crate::error::{CollabError, Result};
use crate::event::{CollabEvent, EventQueue};
use crate::local_sync::{seed_from_local, sync_local_changes_to_remote};
use crate::presence::PresenceChannel;
use crate::remote_sync::{insert_snapshot, recover_selection, sync_remote_changes_to_local};
use crate::shared::{SharedRef, SharedSnapshot};

/// Receives the v1 update bytes of every transaction this peer writes.
pub type UpdateCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A local editor joined to a shared document.
pub struct CollabSession {
    binding: Binding,
    presence: Box<dyn PresenceChannel>,
    config: CollabConfig,
    queue: EventQueue,
    remote_origin: Origin,
    _events: Subscription,
    update_subscription: Option<Subscription>,
}

impl CollabSession {
    /// Bind `doc` and start observing its root.
    ///
    /// Transactions carrying this session's own origin are not observed: they
    /// were produced from the local tree and are already reflected there.
    pub fn join(doc: Doc, presence: impl PresenceChannel + 'static, config: CollabConfig) -> Self {
        let binding = Binding::new(doc, &config);
        let queue = EventQueue::default();

        let events = {
            let queue = Arc::clone(&queue);
            let origin = binding.origin().clone();
            binding.root().observe_deep(move |txn, events| {
                if txn.origin() == Some(&origin) {
                    return;
                }
                let batch: Vec<CollabEvent> = events
                    .iter()
                    .filter_map(|event| CollabEvent::capture(txn, event))
                    .collect();
                if batch.is_empty() {
                    return;
                }
                match queue.lock() {
                    Ok(mut queue) => queue.push(batch),
                    Err(e) => log::error!("[Session] event queue poisoned, dropping batch: {e}"),
                }
            })
        };

        let remote_origin = Origin::from(format!("{}-remote", config.origin).as_str());
        log::trace!(
            "[Session] peer {} joined root '{}'",
            presence.client_id(),
            config.root_name
        );
        Self {
            binding,
            presence: Box::new(presence),
            config,
            queue,
            remote_origin,
            _events: events,
            update_subscription: None,
        }
    }

    /// Reconcile the editor with the shared document when the session
    /// starts.
    ///
    /// An empty shared root is seeded from the local tree. A shared root that
    /// already has content replaces the local tree, tagged
    /// [`COLLABORATION_TAG`]. Returns the local update, if one was made.
    pub fn bootstrap(&mut self, editor: &mut Editor) -> Result<Option<EditorUpdate>> {
        if !self.binding.is_fresh() {
            return Ok(None);
        }
        let doc = self.binding.doc().clone();
        let root = SharedRef::Root(self.binding.root().clone());
        let shared_len = root.len(&doc.transact())?;

        if shared_len == 0 {
            let state = Arc::clone(editor.state());
            if state.children(&NodeKey::root()).is_empty() {
                return Ok(None);
            }
            let mut txn = doc.transact_mut_with(self.binding.origin().clone());
            seed_from_local(&mut self.binding, &mut txn, &state)?;
            log::debug!(
                "[Session] seeded shared document with {} nodes",
                self.binding.len() - 1
            );
            return Ok(None);
        }

        let snapshot = SharedSnapshot::read(&doc.transact(), root)?;
        // Queued events describe content the snapshot already holds.
        self.take_batches()?;

        let binding = &mut self.binding;
        let (_, update) = editor.update_tagged(&[COLLABORATION_TAG], |txn| -> Result<()> {
            let root = NodeKey::root();
            for child in txn.children(&root).to_vec() {
                txn.remove(&child)?;
            }
            for (index, child) in snapshot.children.iter().enumerate() {
                insert_snapshot(binding, txn, &root, index, child)?;
            }
            recover_selection(binding, txn);
            Ok(())
        })?;
        log::debug!(
            "[Session] loaded {} nodes from the shared document",
            self.binding.len() - 1
        );
        Ok(Some(update))
    }

    /// Push a local update to the shared document and publish the selection.
    pub fn sync_local_changes(&mut self, update: &EditorUpdate) -> Result<()> {
        sync_local_changes_to_remote(&mut self.binding, self.presence.as_ref(), update)
    }

    /// Integrate v1 update bytes from a peer and apply the result locally.
    ///
    /// Re-applying bytes already integrated changes nothing and returns
    /// `None`.
    pub fn apply_remote_update(
        &mut self,
        editor: &mut Editor,
        update: &[u8],
    ) -> Result<Option<EditorUpdate>> {
        let decoded = Update::decode_v1(update).map_err(|e| CollabError::Decode {
            what: "update",
            message: e.to_string(),
        })?;
        {
            let doc = self.binding.doc().clone();
            let mut txn = doc.transact_mut_with(self.remote_origin.clone());
            txn.apply_update(decoded)
                .map_err(|e| CollabError::Apply(e.to_string()))?;
        }
        let mut updates = self.flush_remote_events(editor)?;
        Ok(updates.pop())
    }

    /// Apply every captured remote batch, oldest first, one local update per
    /// batch.
    ///
    /// Hosts that write to the shared document directly, outside
    /// [`apply_remote_update`](Self::apply_remote_update), call this after
    /// their transaction commits.
    pub fn flush_remote_events(&mut self, editor: &mut Editor) -> Result<Vec<EditorUpdate>> {
        let mut updates = Vec::new();
        for batch in self.take_batches()? {
            if let Some(update) = sync_remote_changes_to_local(&mut self.binding, editor, batch)? {
                updates.push(update);
            }
        }
        Ok(updates)
    }

    fn take_batches(&self) -> Result<Vec<Vec<CollabEvent>>> {
        self.queue
            .lock()
            .map(|mut queue| std::mem::take(&mut *queue))
            .map_err(|e| CollabError::Observe(e.to_string()))
    }

    /// v1-encoded state vector of the shared document.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.binding.doc().transact().state_vector().encode_v1()
    }

    /// The whole shared document as one v1 update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        self.binding
            .doc()
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// Everything a peer with the v1 state vector `remote` is missing.
    pub fn encode_diff(&self, remote: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote).map_err(|e| CollabError::Decode {
            what: "state vector",
            message: e.to_string(),
        })?;
        Ok(self.binding.doc().transact().encode_state_as_update_v1(&sv))
    }

    /// Forward the update bytes of every transaction written by this session.
    /// Replaces any earlier callback.
    pub fn set_update_callback(&mut self, callback: UpdateCallback) -> Result<()> {
        let origin = self.binding.origin().clone();
        let subscription = self
            .binding
            .doc()
            .observe_update_v1(move |txn, event| {
                if txn.origin() != Some(&origin) {
                    return;
                }
                log::trace!("[Session] local update: {} bytes", event.update.len());
                callback(&event.update);
            })
            .map_err(|e| CollabError::Observe(format!("{e:?}")))?;
        self.update_subscription = Some(subscription);
        Ok(())
    }

    /// Re-resolve every remote cursor against `state`.
    pub fn sync_cursors(&mut self, state: &EditorState, surface: &dyn CursorSurface) {
        sync_cursor_positions(&mut self.binding, self.presence.as_ref(), state, surface);
    }

    /// Publish whether the local editor has focus.
    pub fn set_focus(&mut self, focusing: bool) -> Result<()> {
        self.binding.local.focusing = focusing;
        republish(&mut self.binding, self.presence.as_ref())
    }

    /// Change the name shown on this peer's cursor.
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.binding.local.name = name.into();
        republish(&mut self.binding, self.presence.as_ref())
    }

    /// Withdraw this peer's presence and drop the session.
    pub fn leave(self) {
        log::trace!("[Session] peer {} leaving", self.presence.client_id());
        self.presence.clear_local_state();
    }

    /// The binding.
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Session configuration.
    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    /// This peer's presence id.
    pub fn client_id(&self) -> u64 {
        self.presence.client_id()
    }
}

impl std::fmt::Debug for CollabSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabSession")
            .field("client_id", &self.presence.client_id())
            .field("binding", &self.binding)
            .finish()
    }
}
