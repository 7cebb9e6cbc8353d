use std::{fmt, ops::Range};

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// A node of the generic tree produced from an XML document
///
/// Element nodes become [TreeValue::Element]; text nodes become a bare
/// [TreeValue::Text] string without any wrapper. The serialized form is the
/// JSON transport form stored in caches: text as a JSON string, elements
/// as JSON objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeValue {
    Text(String),
    Element(TreeElement),
}

impl TreeValue {
    /// Returns the element, if this node is one
    pub fn as_element(&self) -> Option<&TreeElement> {
        match self {
            TreeValue::Element(element) => Some(element),
            TreeValue::Text(_) => None,
        }
    }

    /// Returns the text, if this node is a text node
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TreeValue::Text(text) => Some(text),
            TreeValue::Element(_) => None,
        }
    }
}

/// An element node of the converted tree
///
/// The `@attributes` entry is only present when the source element carried
/// at least one attribute. Every other key is a child slot named after the
/// child's node name, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeElement {
    #[serde(
        rename = "@attributes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attributes: Option<IndexMap<String, String>>,

    #[serde(flatten)]
    pub children: IndexMap<String, ChildSlot>,
}

impl TreeElement {
    /// Returns the value of the specified attribute
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .as_ref()
            .and_then(|attributes| attributes.get(name))
            .map(String::as_str)
    }

    /// Returns the slot holding the children with the specified node name
    pub fn child(&self, name: &str) -> Option<&ChildSlot> {
        self.children.get(name)
    }
}

/// The children stored under one node name
///
/// A name that occurs once under its parent is stored as [ChildSlot::Single];
/// a recurring name is stored as [ChildSlot::List] in document order.
/// A list always holds at least two nodes when produced by conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildSlot {
    List(Vec<TreeValue>),
    Single(TreeValue),
}

impl ChildSlot {
    /// Returns the node of a single-occurrence slot
    pub fn as_single(&self) -> Option<&TreeValue> {
        match self {
            ChildSlot::Single(value) => Some(value),
            ChildSlot::List(_) => None,
        }
    }

    /// Views both shapes as an ordered slice
    pub fn as_slice(&self) -> &[TreeValue] {
        match self {
            ChildSlot::Single(value) => std::slice::from_ref(value),
            ChildSlot::List(values) => values,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// A locally-addressable reference to an in-memory byte payload
///
/// Handles are created by a [HandleRegistry](crate::store::HandleRegistry)
/// and stay resolvable until they are revoked there.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalHandle {
    pub(crate) url: String,
}

impl LocalHandle {
    /// The `blob:` URL substituted into markup
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for LocalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// The answer of a resource store for one identifier
///
/// `data` is `None` when the store knows nothing of the requested resource.
#[derive(Debug, Clone, Default)]
pub struct BookResource {
    pub data: Option<Bytes>,
}

impl BookResource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    pub fn empty() -> Self {
        Self { data: None }
    }
}

/// The kind of asset an embedding pass looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// `.jpg`, `.jpeg`, `.png`, `.gif` and `.bmp` files in `src` or `href`
    Image,

    /// `.css` files in `href`
    Stylesheet,
}

/// A relative resource reference found in markup
///
/// References only live for the duration of one embedding pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    pub kind: AssetKind,

    /// The matched text, from the attribute name to the closing quote
    pub raw: String,

    /// Byte range of `raw` in the scanned markup
    pub span: Range<usize>,

    /// The attribute name, `src` or `href`
    pub attribute: String,

    /// The attribute value with quotes removed
    pub relative_path: String,

    /// `relative_path` joined against the document's own location
    pub url: Url,
}
