//! Selection publishing and remote cursor overlays.

use std::collections::HashSet;

use base64::Engine;
use canopy_core::{DocumentIndex, EditorState, NodeLookup, Point, Selection};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{ReadTxn, StickyIndex, Transact, TransactionMut};

use crate::binding::Binding;
use crate::error::Result;
use crate::presence::{PresenceChannel, PresenceState};

/// Axis-aligned rectangle in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

/// Geometry source for drawing remote selections.
pub trait CursorSurface {
    /// Rectangles covering the range `start..end` of `state`.
    fn selection_rects(&self, state: &EditorState, start: &Point, end: &Point) -> Vec<Rect>;

    /// Caret rectangle at `point`.
    fn caret_rect(&self, state: &EditorState, point: &Point) -> Option<Rect>;

    /// Width of the editable area.
    fn editable_width(&self) -> f64;
}

/// A remote peer's selection, resolved against the local tree.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorSelection {
    /// Where the peer's selection started.
    pub anchor: Point,
    /// Where the peer's caret is.
    pub focus: Point,
    /// Highlight rectangles.
    pub rects: Vec<Rect>,
    /// Caret rectangle.
    pub caret: Option<Rect>,
}

/// One remote peer's cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Peer id.
    pub client_id: u64,
    /// Display name.
    pub name: String,
    /// CSS color.
    pub color: String,
    /// Whether the peer's editor has focus.
    pub focusing: bool,
    /// Visible selection, if it resolves this frame.
    pub selection: Option<CursorSelection>,
}

pub(crate) fn encode_position(sticky: &StickyIndex) -> String {
    base64::engine::general_purpose::STANDARD.encode(sticky.encode_v1())
}

pub(crate) fn decode_position(encoded: &str) -> Option<StickyIndex> {
    let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("[Cursor] position is not valid base64: {e}");
            return None;
        }
    };
    match StickyIndex::decode_v1(&bytes) {
        Ok(sticky) => Some(sticky),
        Err(e) => {
            log::warn!("[Cursor] failed to decode relative position: {e}");
            None
        }
    }
}

/// Publish the local selection as relative positions, if it differs from
/// what was last published.
pub(crate) fn publish_selection(
    binding: &mut Binding,
    txn: &mut TransactionMut,
    presence: &dyn PresenceChannel,
    selection: Option<&Selection>,
) -> Result<()> {
    let positions = selection.and_then(|selection| {
        let anchor = binding.sticky_position(txn, &selection.anchor)?;
        let focus = binding.sticky_position(txn, &selection.focus)?;
        Some((encode_position(&anchor), encode_position(&focus)))
    });
    let (anchor_pos, focus_pos) = match positions {
        Some((anchor, focus)) => (Some(anchor), Some(focus)),
        None => (None, None),
    };
    publish_state(binding, presence, anchor_pos, focus_pos)
}

/// Publish with the current positions but refreshed name, color and focus.
pub(crate) fn republish(binding: &mut Binding, presence: &dyn PresenceChannel) -> Result<()> {
    let (anchor_pos, focus_pos) = match &binding.published {
        Some(state) => (state.anchor_pos.clone(), state.focus_pos.clone()),
        None => (None, None),
    };
    publish_state(binding, presence, anchor_pos, focus_pos)
}

fn publish_state(
    binding: &mut Binding,
    presence: &dyn PresenceChannel,
    anchor_pos: Option<String>,
    focus_pos: Option<String>,
) -> Result<()> {
    let state = PresenceState {
        anchor_pos,
        focus_pos,
        name: binding.local.name.clone(),
        color: binding.local.color.clone(),
        is_focused: binding.local.focusing,
    };
    if binding.published.as_ref() == Some(&state) {
        return Ok(());
    }
    log::trace!(
        "[Cursor] publishing presence for {} (selection: {})",
        presence.client_id(),
        state.anchor_pos.is_some()
    );
    presence.set_local_state(serde_json::to_value(&state)?);
    binding.published = Some(state);
    Ok(())
}

/// Refresh every remote cursor from the presence roster.
///
/// Cursors are created the first time a peer shows up and destroyed once it
/// leaves the roster. A peer whose positions do not resolve against the
/// current tree keeps its cursor but has no visible selection.
pub fn sync_cursor_positions(
    binding: &mut Binding,
    presence: &dyn PresenceChannel,
    state: &EditorState,
    surface: &dyn CursorSurface,
) {
    let own = presence.client_id();
    let doc = binding.doc().clone();
    let txn = doc.transact();
    let mut present = HashSet::new();

    for (client_id, value) in presence.states() {
        if client_id == own {
            continue;
        }
        let peer: PresenceState = match serde_json::from_value(value) {
            Ok(peer) => peer,
            Err(e) => {
                log::warn!("[Cursor] ignoring malformed presence from {client_id}: {e}");
                continue;
            }
        };
        present.insert(client_id);

        let selection = resolve_selection(binding, &txn, state, &peer, surface);
        let cursor = binding.cursors.entry(client_id).or_insert_with(|| {
            log::trace!("[Cursor] new cursor for peer {client_id}");
            Cursor {
                client_id,
                name: String::new(),
                color: String::new(),
                focusing: false,
                selection: None,
            }
        });
        cursor.name = peer.name;
        cursor.color = peer.color;
        cursor.focusing = peer.is_focused;
        cursor.selection = selection;
    }

    binding.cursors.retain(|client_id, _| {
        let keep = present.contains(client_id);
        if !keep {
            log::trace!("[Cursor] peer {client_id} left, destroying cursor");
        }
        keep
    });
}

fn resolve_selection<T: ReadTxn>(
    binding: &Binding,
    txn: &T,
    state: &EditorState,
    peer: &PresenceState,
    surface: &dyn CursorSurface,
) -> Option<CursorSelection> {
    let anchor = decode_position(peer.anchor_pos.as_deref()?)?;
    let focus = decode_position(peer.focus_pos.as_deref()?)?;
    let anchor = binding.resolve_position(txn, &anchor)?;
    let focus = binding.resolve_position(txn, &focus)?;
    if !state.is_point_valid(&anchor) || !state.is_point_valid(&focus) {
        log::debug!("[Cursor] peer position does not resolve in v{}", state.version());
        return None;
    }

    let index = DocumentIndex::build(state);
    let anchor_offset = index.point_to_offset(state, &anchor)?;
    let focus_offset = index.point_to_offset(state, &focus)?;
    let (start, end) = if anchor_offset <= focus_offset {
        (&anchor, &focus)
    } else {
        (&focus, &anchor)
    };

    let mut rects = if anchor_offset == focus_offset {
        Vec::new()
    } else {
        surface.selection_rects(state, start, end)
    };
    if binding.suppress_full_width_rects {
        let width = surface.editable_width();
        rects.retain(|rect| rect.width < width);
    }
    let caret = surface.caret_rect(state, &focus);

    Some(CursorSelection {
        anchor,
        focus,
        rects,
        caret,
    })
}
