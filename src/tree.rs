//! XML document to generic tree conversion
//!
//! [TreeConverter] turns an in-memory [XmlNode] document into a [TreeValue]:
//! attributes are gathered under `@attributes`, text nodes become bare strings,
//! and children are stored under their node names. A name seen once under a
//! parent is stored as [ChildSlot::Single]; the second occurrence promotes the
//! slot to [ChildSlot::List], keeping document order.
//!
//! Node kinds other than elements and text (the document node itself,
//! comments, CDATA sections, processing instructions) are converted as generic
//! nodes: they carry neither attributes nor text, so a comment shows up as an
//! empty element under `#comment`. Encryption manifests converted by older
//! readers have this shape, so callers walking the tree must skip such entries
//! rather than expect them to be absent.

use indexmap::{IndexMap, map::Entry};

use crate::{
    error::EpubError,
    types::{ChildSlot, TreeElement, TreeValue},
    utils::{XmlNode, XmlNodeKind, XmlReader},
};

pub struct TreeConverter {}

impl TreeConverter {
    /// Converts a node and all of its descendants
    pub fn convert(node: &XmlNode) -> TreeValue {
        if node.kind == XmlNodeKind::Text {
            return TreeValue::Text(node.value.clone().unwrap_or_default());
        }

        let mut element = TreeElement::default();
        if node.kind == XmlNodeKind::Element && !node.attributes.is_empty() {
            element.attributes = Some(
                node.attributes
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect::<IndexMap<_, _>>(),
            );
        }

        for child in &node.children {
            element.insert_child(child.name.clone(), Self::convert(child));
        }

        TreeValue::Element(element)
    }

    /// Parses an XML string and converts its document node
    ///
    /// The result is an element whose only named child is the document element
    /// (plus top-level comments and processing instructions, if any).
    pub fn parse_str(content: &str) -> Result<TreeValue, EpubError> {
        let document = XmlReader::parse_document(content)?;
        Ok(Self::convert(&document))
    }
}

impl TreeElement {
    /// Stores `value` under `name`, promoting the slot to a list on repetition
    pub(crate) fn insert_child(&mut self, name: String, value: TreeValue) {
        match self.children.entry(name) {
            Entry::Vacant(entry) => {
                entry.insert(ChildSlot::Single(value));
            }
            Entry::Occupied(mut entry) => entry.get_mut().push(value),
        }
    }
}

impl ChildSlot {
    fn push(&mut self, value: TreeValue) {
        match self {
            ChildSlot::List(values) => values.push(value),
            ChildSlot::Single(_) => {
                let previous = std::mem::replace(self, ChildSlot::List(Vec::with_capacity(2)));
                if let (ChildSlot::Single(first), ChildSlot::List(values)) = (previous, self) {
                    values.push(first);
                    values.push(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        tree::TreeConverter,
        types::{ChildSlot, TreeValue},
    };

    fn root(tree: &TreeValue, name: &str) -> TreeValue {
        tree.as_element()
            .and_then(|document| document.child(name))
            .and_then(ChildSlot::as_single)
            .cloned()
            .expect("document element")
    }

    /// A child name that occurs once is stored directly, not as a one-element list
    #[test]
    fn test_single_child_is_stored_directly() {
        let tree = TreeConverter::parse_str("<a><b>text</b></a>").unwrap();
        let a = root(&tree, "a");
        let slot = a.as_element().unwrap().child("b").unwrap();
        assert!(matches!(slot, ChildSlot::Single(_)));

        let b = slot.as_single().unwrap().as_element().unwrap();
        let text = b.child("#text").and_then(ChildSlot::as_single).unwrap();
        assert_eq!(text, &TreeValue::Text("text".to_string()));
    }

    /// Repeated child names are stored as a list in document order
    #[test]
    fn test_repeated_children_become_ordered_list() {
        let tree =
            TreeConverter::parse_str(r#"<a><b id="1"/><c/><b id="2"/><b id="3"/></a>"#).unwrap();
        let a = root(&tree, "a");
        let a = a.as_element().unwrap();

        let slot = a.child("b").unwrap();
        assert!(matches!(slot, ChildSlot::List(_)));
        let ids: Vec<&str> = slot
            .as_slice()
            .iter()
            .map(|b| b.as_element().unwrap().attribute("id").unwrap())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        assert!(matches!(a.child("c"), Some(ChildSlot::Single(_))));
        let keys: Vec<&str> = a.children.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    /// Elements without attributes carry no `@attributes` entry
    #[test]
    fn test_attributes_only_when_present() {
        let tree = TreeConverter::parse_str(r#"<a><b x="1" y="2"/><c/></a>"#).unwrap();
        let a = root(&tree, "a");
        let a = a.as_element().unwrap();
        assert!(a.attributes.is_none());

        let b = a.child("b").unwrap().as_single().unwrap().as_element().unwrap();
        assert_eq!(b.attribute("x"), Some("1"));
        assert_eq!(b.attribute("y"), Some("2"));
        assert!(b.children.is_empty());

        let c = a.child("c").unwrap().as_single().unwrap().as_element().unwrap();
        assert!(c.attributes.is_none());
    }

    /// Comments and processing instructions still appear as empty generic entries
    #[test]
    fn test_non_element_nodes_become_empty_entries() {
        let tree = TreeConverter::parse_str("<a><!-- one --><b/><!-- two --><?pi data?></a>").unwrap();
        let a = root(&tree, "a");
        let a = a.as_element().unwrap();

        let comments = a.child("#comment").unwrap();
        assert_eq!(comments.len(), 2);
        for comment in comments.as_slice() {
            let comment = comment.as_element().unwrap();
            assert!(comment.attributes.is_none());
            assert!(comment.children.is_empty());
        }

        let pi = a.child("pi").unwrap().as_single().unwrap().as_element().unwrap();
        assert!(pi.children.is_empty());
    }

    /// Whitespace between elements is kept as text, like a DOM would
    #[test]
    fn test_whitespace_text_nodes_are_kept() {
        let tree = TreeConverter::parse_str("<a>\n  <b/>\n  <b/>\n</a>").unwrap();
        let a = root(&tree, "a");
        let text = a.as_element().unwrap().child("#text").unwrap();
        assert_eq!(text.len(), 3);
        assert_eq!(text.as_slice()[0].as_text(), Some("\n  "));
    }

    /// The JSON transport form matches the conventional object layout and reads back equal
    #[test]
    fn test_json_transport_form() {
        let tree = TreeConverter::parse_str(r#"<a k="v"><b>1</b><b>2</b></a>"#).unwrap();
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "a": {
                    "@attributes": { "k": "v" },
                    "b": [ { "#text": "1" }, { "#text": "2" } ]
                }
            })
        );

        let text = serde_json::to_string(&tree).unwrap();
        let back: TreeValue = serde_json::from_str(&text).unwrap();
        assert_eq!(back, tree);
    }
}
