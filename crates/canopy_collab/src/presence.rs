//! Ephemeral per-peer state: who is connected and where their selection is.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a peer publishes about itself.
///
/// Positions are base64 encodings of v1-encoded relative positions, so they
/// stay meaningful while the document changes under them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    /// Selection anchor.
    #[serde(default)]
    pub anchor_pos: Option<String>,
    /// Selection focus.
    #[serde(default)]
    pub focus_pos: Option<String>,
    /// Display name.
    pub name: String,
    /// CSS color.
    pub color: String,
    /// Whether the peer's editor has focus.
    #[serde(default)]
    pub is_focused: bool,
}

/// Transport-agnostic awareness channel.
///
/// Implementations deliver the local state to other peers and report the
/// latest state received from each of them. How that happens is up to the
/// host.
pub trait PresenceChannel: Send + Sync {
    /// This peer's id.
    fn client_id(&self) -> u64;

    /// Replace this peer's published state.
    fn set_local_state(&self, state: Value);

    /// Withdraw this peer's state, as when leaving.
    fn clear_local_state(&self);

    /// Every peer currently present, this one included.
    fn states(&self) -> Vec<(u64, Value)>;
}

/// In-process roster shared by every peer that joins it.
///
/// Useful for hosts that relay awareness over their own transport, and for
/// tests that run several peers side by side.
#[derive(Debug, Clone, Default)]
pub struct PresenceHub {
    states: Arc<RwLock<BTreeMap<u64, Value>>>,
    next_id: Arc<AtomicU64>,
}

impl PresenceHub {
    /// An empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel for a new peer with a fresh id.
    pub fn join(&self) -> HubChannel {
        let client_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.join_as(client_id)
    }

    /// A channel for the peer `client_id`.
    pub fn join_as(&self, client_id: u64) -> HubChannel {
        HubChannel {
            client_id,
            states: Arc::clone(&self.states),
        }
    }

    /// Number of peers with published state.
    pub fn len(&self) -> usize {
        self.states.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether no peer has published state.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One peer's handle on a [`PresenceHub`].
#[derive(Debug, Clone)]
pub struct HubChannel {
    client_id: u64,
    states: Arc<RwLock<BTreeMap<u64, Value>>>,
}

impl PresenceChannel for HubChannel {
    fn client_id(&self) -> u64 {
        self.client_id
    }

    fn set_local_state(&self, state: Value) {
        match self.states.write() {
            Ok(mut states) => {
                states.insert(self.client_id, state);
            }
            Err(e) => log::warn!("[Cursor] presence roster poisoned: {e}"),
        }
    }

    fn clear_local_state(&self) {
        match self.states.write() {
            Ok(mut states) => {
                states.remove(&self.client_id);
            }
            Err(e) => log::warn!("[Cursor] presence roster poisoned: {e}"),
        }
    }

    fn states(&self) -> Vec<(u64, Value)> {
        match self.states.read() {
            Ok(states) => states.iter().map(|(id, v)| (*id, v.clone())).collect(),
            Err(e) => {
                log::warn!("[Cursor] presence roster poisoned: {e}");
                Vec::new()
            }
        }
    }
}
