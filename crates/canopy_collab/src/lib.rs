//! # `canopy_collab`
//!
//! Keeps a `canopy_core` document tree and a yrs shared document in step.
//!
//! Each element and text node of the local tree is mirrored by an embedded
//! shared type; a [`Binding`] pairs the two through shadow nodes. Local
//! updates are diffed against the shadows and written in one shared-document
//! transaction ([`sync_local_changes_to_remote`]). Remote transactions are
//! captured by a deep observer and replayed as one local update tagged
//! `collaboration` ([`sync_remote_changes_to_local`]), which the local pass
//! then ignores.
//!
//! Selections travel between peers as relative positions over a
//! [`PresenceChannel`], and come back as [`Cursor`]s.
//!
//! Most hosts only need [`CollabSession`]:
//!
//! ```
//! use canopy_collab::{CollabConfig, CollabSession, PresenceHub};
//! use canopy_core::{Editor, NodeKey};
//!
//! let hub = PresenceHub::new();
//! let mut editor = Editor::new();
//! let mut session = CollabSession::join(yrs::Doc::new(), hub.join(), CollabConfig::default());
//!
//! let (_, update) = editor
//!     .update(|txn| {
//!         let p = txn.create_element("paragraph");
//!         let t = txn.create_text("Hello");
//!         txn.append_child(&p, &t)?;
//!         txn.append_child(&NodeKey::root(), &p)
//!     })
//!     .unwrap();
//! session.sync_local_changes(&update).unwrap();
//! assert_eq!(session.binding().len(), 3);
//! ```

#![warn(missing_docs)]

mod binding;
mod config;
mod cursor;
mod error;
mod event;
mod local_sync;
mod presence;
mod remote_sync;
mod session;
mod shadow;
mod shared;
mod text_diff;

pub use binding::{Binding, LocalPeer};
pub use config::CollabConfig;
pub use cursor::{Cursor, CursorSelection, CursorSurface, Rect, sync_cursor_positions};
pub use error::{CollabError, Result};
pub use event::{CollabEvent, DeltaOp, Inserted};
pub use local_sync::sync_local_changes_to_remote;
pub use presence::{HubChannel, PresenceChannel, PresenceHub, PresenceState};
pub use remote_sync::sync_remote_changes_to_local;
pub use session::{CollabSession, UpdateCallback};
pub use shadow::ShadowNode;
pub use shared::{SharedRef, SharedSnapshot};
pub use text_diff::TextDiff;
