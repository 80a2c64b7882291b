//! Owned copies of shared-document change events.
//!
//! Deep observers only see events while the transaction that produced them
//! is committing. Everything the remote pass needs is copied out there, so the
//! pass itself can run afterwards, against the local editor, with no
//! transaction open.

use std::sync::{Arc, Mutex};

use yrs::types::{Delta, EntryChange, Event};
use yrs::{Any, Out, TransactionMut};

use crate::shared::{SharedRef, SharedSnapshot, TYPE_ATTR, any_to_string};

/// Content inserted by a delta.
#[derive(Debug, Clone)]
pub enum Inserted {
    /// Characters, inside a text node.
    Chars(String),
    /// An embedded subtree, inside an element container.
    Shared(SharedSnapshot),
    /// Something this schema has no node for.
    Unsupported(String),
}

/// One step of a sequence delta.
#[derive(Debug, Clone)]
pub enum DeltaOp {
    /// Skip this many offsets.
    Retain(u32),
    /// Insert at the current offset.
    Insert(Inserted),
    /// Delete this many offsets.
    Delete(u32),
}

/// Changes to one shared type within one transaction.
#[derive(Debug, Clone)]
pub struct CollabEvent {
    /// The changed shared type.
    pub target: SharedRef,
    /// Changed attributes with their new values; `None` when removed.
    pub attributes: Vec<(String, Option<Any>)>,
    /// Sequence delta, for containers and text nodes.
    pub delta: Vec<DeltaOp>,
    /// Full text after the transaction, for text nodes.
    pub text: Option<String>,
}

/// Event batches, one per observed transaction, waiting to be applied.
pub(crate) type EventQueue = Arc<Mutex<Vec<Vec<CollabEvent>>>>;

impl CollabEvent {
    /// Copy a deep-observer event. Event kinds outside the schema yield
    /// `None`.
    pub fn capture(txn: &TransactionMut, event: &Event) -> Option<Self> {
        match event {
            Event::Text(e) => Some(Self {
                target: SharedRef::Root(e.target().clone()),
                attributes: Vec::new(),
                delta: capture_delta(txn, e.delta(txn)),
                text: None,
            }),
            Event::XmlText(e) => {
                let target = SharedRef::XmlText(e.target().clone());
                let is_text = target
                    .attribute(txn, TYPE_ATTR)
                    .and_then(|value| match value {
                        Out::Any(any) => any_to_string(&any),
                        _ => None,
                    })
                    .is_some_and(|t| t == "text");
                let text = if is_text {
                    target.text(txn).ok()
                } else {
                    None
                };
                Some(Self {
                    attributes: capture_keys(e.keys(txn).iter()),
                    delta: capture_delta(txn, e.delta(txn)),
                    text,
                    target,
                })
            }
            Event::Map(e) => Some(Self {
                target: SharedRef::Map(e.target().clone()),
                attributes: capture_keys(e.keys(txn).iter()),
                delta: Vec::new(),
                text: None,
            }),
            Event::XmlFragment(e) => {
                let target = SharedRef::from_xml_out(e.target().clone())?;
                Some(Self {
                    target,
                    attributes: capture_keys(e.keys(txn).iter()),
                    delta: Vec::new(),
                    text: None,
                })
            }
            _ => None,
        }
    }
}

fn capture_keys<'a, K, I>(keys: I) -> Vec<(String, Option<Any>)>
where
    K: AsRef<str> + 'a,
    I: Iterator<Item = (&'a K, &'a EntryChange)>,
{
    keys.filter_map(|(name, change)| {
        let value = match change {
            EntryChange::Inserted(value) | EntryChange::Updated(_, value) => value,
            EntryChange::Removed(_) => return Some((name.as_ref().to_string(), None)),
        };
        match value {
            Out::Any(any) => Some((name.as_ref().to_string(), Some(any.clone()))),
            other => {
                log::warn!(
                    "[RemoteSync] attribute {} holds a shared type ({other:?}), ignoring",
                    name.as_ref()
                );
                None
            }
        }
    })
    .collect()
}

fn capture_delta(txn: &TransactionMut, delta: &[Delta]) -> Vec<DeltaOp> {
    delta
        .iter()
        .map(|op| match op {
            Delta::Retain(len, _) => DeltaOp::Retain(*len),
            Delta::Deleted(len) => DeltaOp::Delete(*len),
            Delta::Inserted(value, _) => DeltaOp::Insert(capture_insert(txn, value)),
        })
        .collect()
}

fn capture_insert(txn: &TransactionMut, value: &Out) -> Inserted {
    if let Out::Any(any) = value {
        return match any {
            Any::String(s) => Inserted::Chars(s.to_string()),
            other => Inserted::Unsupported(format!("{other:?}")),
        };
    }
    match SharedRef::from_out(value.clone()) {
        Some(shared) => match SharedSnapshot::read(txn, shared) {
            Ok(snapshot) => Inserted::Shared(snapshot),
            Err(e) => Inserted::Unsupported(e.to_string()),
        },
        None => Inserted::Unsupported(format!("{value:?}")),
    }
}
