//! Shared types backing each node, and conversions between node payloads and
//! their CRDT attributes.
//!
//! | Node        | Shared type                   | Attributes                  |
//! |-------------|-------------------------------|-----------------------------|
//! | root        | `TextRef` (document root)     | none                        |
//! | element     | embedded `XmlTextRef`         | `__type`, one per property  |
//! | text        | embedded `XmlTextRef`         | `__type`, `__format`, `__style` |
//! | line break  | embedded `MapRef`             | `__type`                    |
//! | decorator   | embedded `XmlElementRef`      | `__type`, `__ref`           |
//!
//! Every child occupies exactly one offset in its parent container.

use std::sync::Arc;

use canopy_core::{DecoratorNode, ElementNode, ExternalRef, NodeKind, PropValue, TextNode};
use indexmap::IndexMap;
use yrs::branch::{Branch, BranchID};
use yrs::types::text::{Diff, YChange};
use yrs::{
    Any, Assoc, IndexedSequence, Map, MapPrelim, MapRef, Out, ReadTxn, StickyIndex, Text,
    TextRef, TransactionMut, Xml, XmlElementPrelim, XmlElementRef, XmlOut, XmlTextPrelim,
    XmlTextRef,
};

use crate::error::{CollabError, Result};

/// Attribute holding the node type.
pub const TYPE_ATTR: &str = "__type";
/// Attribute holding text format flags.
pub const FORMAT_ATTR: &str = "__format";
/// Attribute holding inline text style.
pub const STYLE_ATTR: &str = "__style";
/// Attribute holding a decorator's JSON-encoded [`ExternalRef`].
pub const REF_ATTR: &str = "__ref";

const TEXT_TYPE: &str = "text";
const LINEBREAK_TYPE: &str = "linebreak";

/// Handle to the shared type paired with one node.
#[derive(Debug, Clone)]
pub enum SharedRef {
    /// The document root.
    Root(TextRef),
    /// An element container or a text node.
    XmlText(XmlTextRef),
    /// A line break.
    Map(MapRef),
    /// A decorator.
    XmlElement(XmlElementRef),
}

macro_rules! with_container {
    ($shared:expr, $container:ident => $body:expr) => {
        match $shared {
            SharedRef::Root($container) => Ok($body),
            SharedRef::XmlText($container) => Ok($body),
            other => Err(CollabError::UnsupportedContent(format!(
                "{} is not a container",
                other.kind_name()
            ))),
        }
    };
}

impl SharedRef {
    /// Identity of the shared type, stable for the lifetime of the document.
    pub fn branch_id(&self) -> BranchID {
        let branch: &Branch = match self {
            SharedRef::Root(r) => r.as_ref(),
            SharedRef::XmlText(r) => r.as_ref(),
            SharedRef::Map(r) => r.as_ref(),
            SharedRef::XmlElement(r) => r.as_ref(),
        };
        branch.id()
    }

    /// Name of the shared type, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SharedRef::Root(_) => "root text",
            SharedRef::XmlText(_) => "xml text",
            SharedRef::Map(_) => "map",
            SharedRef::XmlElement(_) => "xml element",
        }
    }

    /// Wrap an embedded value, if it is a shared type this schema uses.
    pub fn from_out(value: Out) -> Option<Self> {
        match value {
            Out::YXmlText(r) => Some(SharedRef::XmlText(r)),
            Out::YMap(r) => Some(SharedRef::Map(r)),
            Out::YXmlElement(r) => Some(SharedRef::XmlElement(r)),
            Out::YText(r) => Some(SharedRef::Root(r)),
            _ => None,
        }
    }

    /// Wrap the target of an XML event.
    pub fn from_xml_out(value: XmlOut) -> Option<Self> {
        match value {
            XmlOut::Element(r) => Some(SharedRef::XmlElement(r)),
            XmlOut::Text(r) => Some(SharedRef::XmlText(r)),
            XmlOut::Fragment(_) => None,
        }
    }

    /// Number of offsets in a container or characters in a text node.
    pub fn len<T: ReadTxn>(&self, txn: &T) -> Result<u32> {
        with_container!(self, c => c.len(txn))
    }

    /// Embed a fresh, empty shared type for `kind` at `index`.
    pub fn insert_child(&self, txn: &mut TransactionMut, index: u32, kind: &NodeKind) -> Result<SharedRef> {
        match self {
            SharedRef::Root(c) => Ok(embed(c, txn, index, kind)),
            SharedRef::XmlText(c) => Ok(embed(c, txn, index, kind)),
            other => Err(CollabError::UnsupportedContent(format!(
                "{} is not a container",
                other.kind_name()
            ))),
        }
    }

    /// Remove `len` offsets starting at `index`.
    pub fn remove_range(&self, txn: &mut TransactionMut, index: u32, len: u32) -> Result<()> {
        with_container!(self, c => c.remove_range(txn, index, len))
    }

    /// Insert characters at byte `index`.
    pub fn insert_text(&self, txn: &mut TransactionMut, index: u32, chunk: &str) -> Result<()> {
        with_container!(self, c => c.insert(txn, index, chunk))
    }

    /// Relative position at `index`, sticking to the content after it. At the
    /// end of the sequence there is nothing after it, so the position sticks
    /// to the content before it instead.
    pub fn sticky_index(&self, txn: &mut TransactionMut, index: u32) -> Option<StickyIndex> {
        match self {
            SharedRef::Root(c) => sticky_at(c, txn, index),
            SharedRef::XmlText(c) => sticky_at(c, txn, index),
            _ => None,
        }
    }

    /// Write one attribute. The root carries no attributes.
    pub fn set_attribute(&self, txn: &mut TransactionMut, name: &str, value: Any) {
        match self {
            SharedRef::Root(_) => {}
            SharedRef::XmlText(r) => {
                r.insert_attribute(txn, name, value);
            }
            SharedRef::Map(r) => {
                r.insert(txn, name, value);
            }
            SharedRef::XmlElement(r) => {
                r.insert_attribute(txn, name, value);
            }
        }
    }

    /// Remove one attribute.
    pub fn remove_attribute(&self, txn: &mut TransactionMut, name: &str) {
        let name = name.to_string();
        match self {
            SharedRef::Root(_) => {}
            SharedRef::XmlText(r) => r.remove_attribute(txn, &name),
            SharedRef::Map(r) => {
                r.remove(txn, &name);
            }
            SharedRef::XmlElement(r) => r.remove_attribute(txn, &name),
        }
    }

    /// Read one attribute.
    pub fn attribute<T: ReadTxn>(&self, txn: &T, name: &str) -> Option<Out> {
        match self {
            SharedRef::Root(_) => None,
            SharedRef::XmlText(r) => r.get_attribute(txn, name),
            SharedRef::Map(r) => r.get(txn, name),
            SharedRef::XmlElement(r) => r.get_attribute(txn, name),
        }
    }

    /// All attributes that hold plain values.
    pub fn attributes<T: ReadTxn>(&self, txn: &T) -> Vec<(String, Any)> {
        let pairs: Vec<(String, Out)> = match self {
            SharedRef::Root(_) => Vec::new(),
            SharedRef::XmlText(r) => r
                .attributes(txn)
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            SharedRef::Map(r) => r
                .iter(txn)
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            SharedRef::XmlElement(r) => r
                .attributes(txn)
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        };
        pairs
            .into_iter()
            .filter_map(|(name, value)| match value {
                Out::Any(any) => Some((name, any)),
                _ => None,
            })
            .collect()
    }

    /// Contents of a container in order: runs of characters and embeds.
    pub fn contents<T: ReadTxn>(&self, txn: &T) -> Result<Vec<Out>> {
        let diff: Vec<Diff<YChange>> = with_container!(self, c => c.diff(txn, YChange::identity))?;
        Ok(diff.into_iter().map(|chunk| chunk.insert).collect())
    }

    /// Characters of a text node, ignoring embeds.
    pub fn text<T: ReadTxn>(&self, txn: &T) -> Result<String> {
        let mut text = String::new();
        for chunk in self.contents(txn)? {
            if let Out::Any(Any::String(s)) = chunk {
                text.push_str(&s);
            }
        }
        Ok(text)
    }
}

fn sticky_at<C: Text + IndexedSequence>(
    container: &C,
    txn: &mut TransactionMut,
    index: u32,
) -> Option<StickyIndex> {
    let assoc = if index >= Text::len(container, &*txn) {
        Assoc::Before
    } else {
        Assoc::After
    };
    container.sticky_index(txn, index, assoc)
}

fn embed<C: Text>(container: &C, txn: &mut TransactionMut, index: u32, kind: &NodeKind) -> SharedRef {
    match kind {
        NodeKind::Element(_) | NodeKind::Text(_) => {
            SharedRef::XmlText(container.insert_embed(txn, index, XmlTextPrelim::new("")))
        }
        NodeKind::LineBreak => SharedRef::Map(container.insert_embed(txn, index, MapPrelim::default())),
        NodeKind::Decorator(dec) => SharedRef::XmlElement(container.insert_embed(
            txn,
            index,
            XmlElementPrelim::empty(dec.node_type.as_str()),
        )),
    }
}

/// Attribute values describing a node payload. Element children are not
/// included; they live in the container itself.
pub fn node_attributes(kind: &NodeKind) -> Vec<(String, Any)> {
    let mut attrs = Vec::new();
    match kind {
        NodeKind::Element(el) => {
            attrs.push((TYPE_ATTR.to_string(), string_any(&el.node_type)));
            for (name, value) in &el.props {
                attrs.push((name.clone(), prop_to_any(value)));
            }
        }
        NodeKind::Text(text) => {
            attrs.push((TYPE_ATTR.to_string(), string_any(TEXT_TYPE)));
            attrs.push((FORMAT_ATTR.to_string(), Any::BigInt(i64::from(text.format))));
            attrs.push((STYLE_ATTR.to_string(), string_any(&text.style)));
        }
        NodeKind::LineBreak => {
            attrs.push((TYPE_ATTR.to_string(), string_any(LINEBREAK_TYPE)));
        }
        NodeKind::Decorator(dec) => {
            attrs.push((TYPE_ATTR.to_string(), string_any(&dec.node_type)));
            if let Some(value) = reference_to_any(dec.reference.as_ref()) {
                attrs.push((REF_ATTR.to_string(), value));
            }
        }
    }
    attrs
}

pub(crate) fn string_any(value: &str) -> Any {
    Any::String(Arc::from(value))
}

/// Encode a property value.
pub fn prop_to_any(value: &PropValue) -> Any {
    match value {
        PropValue::Bool(b) => Any::Bool(*b),
        PropValue::Int(i) => Any::BigInt(*i),
        PropValue::Float(f) => Any::Number(*f),
        PropValue::Str(s) => string_any(s),
    }
}

/// Decode a property value. Value types with no property equivalent decode
/// to `None`.
pub fn any_to_prop(value: &Any) -> Option<PropValue> {
    match value {
        Any::Bool(b) => Some(PropValue::Bool(*b)),
        Any::BigInt(i) => Some(PropValue::Int(*i)),
        Any::Number(f) => Some(PropValue::Float(*f)),
        Any::String(s) => Some(PropValue::Str(s.to_string())),
        other => {
            log::warn!("[Binding] unsupported attribute value {other:?}, ignoring");
            None
        }
    }
}

pub(crate) fn any_to_u32(value: &Any) -> Option<u32> {
    match value {
        Any::BigInt(i) => u32::try_from(*i).ok(),
        Any::Number(f) if *f >= 0.0 && f.fract() == 0.0 && *f <= f64::from(u32::MAX) => {
            Some(*f as u32)
        }
        _ => None,
    }
}

pub(crate) fn any_to_string(value: &Any) -> Option<String> {
    match value {
        Any::String(s) => Some(s.to_string()),
        _ => None,
    }
}

/// Encode a decorator reference as its JSON string.
pub fn reference_to_any(reference: Option<&ExternalRef>) -> Option<Any> {
    let reference = reference?;
    match serde_json::to_string(reference) {
        Ok(json) => Some(string_any(&json)),
        Err(e) => {
            log::warn!("[Binding] failed to encode decorator reference: {e}");
            None
        }
    }
}

/// Decode a decorator reference. Unknown reference kinds decode to `None`.
pub fn any_to_reference(value: &Any) -> Option<ExternalRef> {
    let Any::String(json) = value else {
        log::warn!("[Binding] decorator reference is not a string: {value:?}");
        return None;
    };
    match serde_json::from_str(json) {
        Ok(reference) => Some(reference),
        Err(e) => {
            log::warn!("[Binding] unrecognized decorator reference {json}: {e}");
            None
        }
    }
}

/// Owned copy of a shared subtree, read at the end of the transaction that
/// created it.
#[derive(Debug, Clone)]
pub struct SharedSnapshot {
    /// The shared type itself.
    pub shared: SharedRef,
    /// Node payload. Element children are left empty and listed in
    /// `children` instead.
    pub kind: NodeKind,
    /// Child subtrees in container order.
    pub children: Vec<SharedSnapshot>,
}

impl SharedSnapshot {
    /// Read the subtree rooted at `shared`.
    pub fn read<T: ReadTxn>(txn: &T, shared: SharedRef) -> Result<Self> {
        let attrs = shared.attributes(txn);
        let get = |name: &str| {
            attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, value)| value)
        };
        let node_type = get(TYPE_ATTR).and_then(any_to_string);

        match &shared {
            SharedRef::XmlText(_) if node_type.as_deref() == Some(TEXT_TYPE) => {
                let kind = NodeKind::Text(TextNode {
                    text: shared.text(txn)?,
                    format: get(FORMAT_ATTR).and_then(any_to_u32).unwrap_or(0),
                    style: get(STYLE_ATTR).and_then(any_to_string).unwrap_or_default(),
                });
                Ok(Self {
                    shared,
                    kind,
                    children: Vec::new(),
                })
            }
            SharedRef::XmlText(_) | SharedRef::Root(_) => {
                let mut props = IndexMap::new();
                for (name, value) in &attrs {
                    if name.starts_with("__") {
                        continue;
                    }
                    if let Some(prop) = any_to_prop(value) {
                        props.insert(name.clone(), prop);
                    }
                }
                let mut children = Vec::new();
                for item in shared.contents(txn)? {
                    match SharedRef::from_out(item) {
                        Some(child) => children.push(Self::read(txn, child)?),
                        None => {
                            return Err(CollabError::UnsupportedContent(
                                "characters inside an element container".to_string(),
                            ));
                        }
                    }
                }
                let kind = NodeKind::Element(ElementNode {
                    node_type: node_type.unwrap_or_else(|| "root".to_string()),
                    children: Vec::new(),
                    props,
                });
                Ok(Self {
                    shared,
                    kind,
                    children,
                })
            }
            SharedRef::Map(_) => match node_type.as_deref() {
                Some(LINEBREAK_TYPE) => Ok(Self {
                    shared,
                    kind: NodeKind::LineBreak,
                    children: Vec::new(),
                }),
                other => Err(CollabError::UnsupportedContent(format!(
                    "map of type {other:?}"
                ))),
            },
            SharedRef::XmlElement(el) => {
                let kind = NodeKind::Decorator(DecoratorNode {
                    node_type: node_type.unwrap_or_else(|| el.tag().to_string()),
                    reference: get(REF_ATTR).and_then(any_to_reference),
                });
                Ok(Self {
                    shared,
                    kind,
                    children: Vec::new(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::format;
    use yrs::{Doc, Transact};

    #[test]
    fn test_prop_values_survive_encoding() {
        for prop in [
            PropValue::Bool(true),
            PropValue::Int(-3),
            PropValue::Float(1.5),
            PropValue::from("center"),
        ] {
            assert_eq!(any_to_prop(&prop_to_any(&prop)), Some(prop));
        }
        assert_eq!(any_to_prop(&Any::Null), None);
    }

    #[test]
    fn test_unknown_reference_degrades_to_none() {
        assert_eq!(
            any_to_reference(&string_any(r#"{"kind":"spreadsheet","id":"x"}"#)),
            None
        );
        assert_eq!(any_to_reference(&Any::Bool(true)), None);
        let known = ExternalRef::Document { id: "d1".into() };
        let encoded = reference_to_any(Some(&known)).unwrap();
        assert_eq!(any_to_reference(&encoded), Some(known));
    }

    #[test]
    fn test_snapshot_reads_embedded_subtree() {
        let doc = Doc::new();
        let root = SharedRef::Root(doc.get_or_insert_text("root"));
        {
            let mut txn = doc.transact_mut();
            let paragraph = root
                .insert_child(&mut txn, 0, &NodeKind::element("paragraph"))
                .unwrap();
            paragraph.set_attribute(&mut txn, TYPE_ATTR, string_any("paragraph"));
            paragraph.set_attribute(&mut txn, "align", string_any("center"));

            let text_kind = NodeKind::Text(TextNode {
                text: "Hi".into(),
                format: format::BOLD,
                style: String::new(),
            });
            let text = paragraph.insert_child(&mut txn, 0, &text_kind).unwrap();
            for (name, value) in node_attributes(&text_kind) {
                text.set_attribute(&mut txn, &name, value);
            }
            text.insert_text(&mut txn, 0, "Hi").unwrap();

            let br = paragraph
                .insert_child(&mut txn, 1, &NodeKind::LineBreak)
                .unwrap();
            for (name, value) in node_attributes(&NodeKind::LineBreak) {
                br.set_attribute(&mut txn, &name, value);
            }
        }

        let txn = doc.transact();
        let snapshot = SharedSnapshot::read(&txn, root).unwrap();
        assert_eq!(snapshot.children.len(), 1);
        let paragraph = &snapshot.children[0];
        match &paragraph.kind {
            NodeKind::Element(el) => {
                assert_eq!(el.node_type, "paragraph");
                assert_eq!(el.props.get("align"), Some(&PropValue::from("center")));
            }
            other => panic!("expected element, got {other:?}"),
        }
        assert_eq!(paragraph.children.len(), 2);
        match &paragraph.children[0].kind {
            NodeKind::Text(text) => {
                assert_eq!(text.text, "Hi");
                assert_eq!(text.format, format::BOLD);
            }
            other => panic!("expected text, got {other:?}"),
        }
        assert_eq!(paragraph.children[1].kind, NodeKind::LineBreak);
    }
}
