#[cfg(feature = "archive")]
use std::io::{Read, Seek};

use quick_xml::{NsReader, escape::resolve_xml_entity, events::Event};
#[cfg(feature = "archive")]
use zip::{CompressionMethod, ZipArchive};

use crate::error::EpubError;

/// Extracts the contents of a specified file from a ZIP archive
///
/// ## Parameters
/// - `zip_file`: A mutable reference to a ZIP archive object
/// - `file_name`: The path to the file to extract (relative to the ZIP archive root directory)
///
/// ## Return
/// - `Ok(Vec<u8>)`: Returns a byte vector containing the file data
/// - `Err(EpubError)`: The file does not exist or an error occurred during the read operation
#[cfg(feature = "archive")]
pub fn get_file_in_zip_archive<R: Read + Seek>(
    zip_file: &mut ZipArchive<R>,
    file_name: &str,
) -> Result<Vec<u8>, EpubError> {
    let mut buffer = Vec::<u8>::new();
    match zip_file.by_name(file_name) {
        Ok(mut file) => {
            let _ = file.read_to_end(&mut buffer).map_err(EpubError::from)?;
            Ok(buffer)
        }
        Err(err) => Err(EpubError::from(err)),
    }
}

/// Checks if the compression method of all entries in the EPUB file
/// conforms to the OCF container requirements.
///
/// OCF containers may only use Stored or Deflated entries. If any other
/// compression method is found, an error will be returned.
#[cfg(feature = "archive")]
pub fn compression_method_check<R: Read + Seek>(
    zip_archive: &mut ZipArchive<R>,
) -> Result<(), EpubError> {
    for index in 0..zip_archive.len() {
        let file = zip_archive.by_index(index)?;

        match file.compression() {
            CompressionMethod::Stored | CompressionMethod::Deflated => continue,
            _ => {
                return Err(EpubError::UnusableCompressionMethod {
                    file: file.name().to_string(),
                    method: file.compression().to_string(),
                });
            }
        };
    }

    Ok(())
}

/// Provides functionality to decode byte data into strings
///
/// This trait is primarily used to decode raw byte data (such as
/// decrypted content documents) into a suitable string representation.
/// It supports automatic detection of multiple encoding formats,
/// including UTF-8 (with or without BOM), UTF-16 BE, and UTF-16 LE.
///
/// ## Notes
/// - When attempting to parse a byte stream lacking a BOM (Byte Order Mark), the parsing
///   results may be unreadable; caution should be exercised when using such streams.
pub trait DecodeBytes {
    fn decode(&self) -> Result<String, EpubError>;
}

impl DecodeBytes for [u8] {
    fn decode(&self) -> Result<String, EpubError> {
        if self.is_empty() || self.len() < 4 {
            return Err(EpubError::EmptyDataError);
        }

        match self[0..3] {
            // Check UTF-8 BOM (0xEF, 0xBB, 0xBF)
            [0xEF, 0xBB, 0xBF, ..] => {
                String::from_utf8(self[3..].to_vec()).map_err(EpubError::from)
            }

            // Check UTF-16 BE BOM (0xFE, 0xFF)
            [0xFE, 0xFF, ..] => {
                let utf16_units: Vec<u16> = self[2..]
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(EpubError::from)
            }

            // Check UTF-16 LE BOM (0xFF, 0xFE)
            [0xFF, 0xFE, ..] => {
                let utf16_units: Vec<u16> = self[2..]
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(EpubError::from)
            }

            // Try without BOM
            _ => {
                if let Ok(utf8_str) = String::from_utf8(self.to_vec()) {
                    return Ok(utf8_str);
                }

                if self.len() % 2 == 0 {
                    let utf16_units: Vec<u16> = self
                        .chunks_exact(2)
                        .map(|b| u16::from_be_bytes([b[0], b[1]]))
                        .collect();

                    if let Ok(utf16_str) = String::from_utf16(&utf16_units) {
                        return Ok(utf16_str);
                    }
                }

                // Final fallback
                Ok(String::from_utf8_lossy(self).to_string())
            }
        }
    }
}

impl DecodeBytes for Vec<u8> {
    fn decode(&self) -> Result<String, EpubError> {
        self.as_slice().decode()
    }
}

/// The kind of a node in an in-memory XML document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlNodeKind {
    Document,
    Element,
    Text,
    CData,
    Comment,
    ProcessingInstruction,
}

/// A node of an in-memory XML document
///
/// Unlike a plain element tree, every node kind the document contains is
/// kept in document order, including whitespace-only text, comments and
/// processing instructions. `name` follows the DOM `nodeName` convention:
/// the qualified tag name for elements, the target for processing
/// instructions, and `#document`, `#text`, `#cdata-section` or `#comment`
/// for the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlNode {
    pub kind: XmlNodeKind,
    pub name: String,

    /// Attributes in document order, namespace declarations included
    pub attributes: Vec<(String, String)>,

    /// Character data of text, CDATA, comment and processing instruction nodes
    pub value: Option<String>,

    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn new(kind: XmlNodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            attributes: Vec::new(),
            value: None,
            children: Vec::new(),
        }
    }

    fn with_value(kind: XmlNodeKind, name: &str, value: String) -> Self {
        let mut node = Self::new(kind, name);
        node.value = Some(value);
        node
    }

    /// Returns the first element child, which for a document node is the document element
    pub fn first_element(&self) -> Option<&XmlNode> {
        self.children
            .iter()
            .find(|child| child.kind == XmlNodeKind::Element)
    }

    /// Returns the value of the specified attribute
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Appends character data, merging with a directly preceding text node
    fn push_text(&mut self, text: &str) {
        if let Some(last) = self.children.last_mut() {
            if last.kind == XmlNodeKind::Text {
                last.value.get_or_insert_with(String::new).push_str(text);
                return;
            }
        }

        self.children.push(Self::with_value(
            XmlNodeKind::Text,
            "#text",
            text.to_string(),
        ));
    }
}

/// XML parser used to build an in-memory document
pub struct XmlReader {}

impl XmlReader {
    /// Parses an XML string into a document node
    ///
    /// The returned node has kind [XmlNodeKind::Document]; its children are the
    /// document element together with any top-level comments and processing
    /// instructions. The XML declaration and DOCTYPE are not represented.
    ///
    /// ## Return
    /// - `Ok(XmlNode)`: The document node
    /// - `Err(EpubError)`: The content is empty, malformed or has no root element
    pub fn parse_document(content: &str) -> Result<XmlNode, EpubError> {
        if content.is_empty() {
            return Err(EpubError::EmptyDataError);
        }

        let mut reader = NsReader::from_str(content);

        let mut buf = Vec::new();
        let mut document = XmlNode::new(XmlNodeKind::Document, "#document");
        let mut stack = Vec::<XmlNode>::new();

        loop {
            let event = reader.read_event_into(&mut buf)?;
            match event {
                Event::Eof => break,

                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    let mut element = XmlNode::new(XmlNodeKind::Element, name);
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                        let value = attr.unescape_value()?.into_owned();
                        element.attributes.push((key, value));
                    }

                    stack.push(element);
                }

                Event::End(_) => {
                    if let Some(element) = stack.pop() {
                        stack.last_mut().unwrap_or(&mut document).children.push(element);
                    }
                }

                Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    let mut element = XmlNode::new(XmlNodeKind::Element, name);
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                        let value = attr.unescape_value()?.into_owned();
                        element.attributes.push((key, value));
                    }

                    stack.last_mut().unwrap_or(&mut document).children.push(element);
                }

                // Character data outside the document element is not part of the document
                Event::Text(e) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.push_text(&String::from_utf8_lossy(e.as_ref()));
                    }
                }

                Event::GeneralRef(e) => {
                    if let Some(parent) = stack.last_mut() {
                        match e.resolve_char_ref()? {
                            Some(ch) => parent.push_text(ch.encode_utf8(&mut [0; 4])),
                            None => {
                                let name = String::from_utf8_lossy(e.as_ref());
                                let resolved = resolve_xml_entity(&name)
                                    .ok_or(EpubError::FailedParsingXml)?;
                                parent.push_text(resolved);
                            }
                        }
                    }
                }

                Event::CData(e) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::with_value(
                            XmlNodeKind::CData,
                            "#cdata-section",
                            String::from_utf8_lossy(e.as_ref()).to_string(),
                        ));
                    }
                }

                Event::Comment(e) => {
                    stack
                        .last_mut()
                        .unwrap_or(&mut document)
                        .children
                        .push(XmlNode::with_value(
                            XmlNodeKind::Comment,
                            "#comment",
                            String::from_utf8_lossy(e.as_ref()).to_string(),
                        ));
                }

                Event::PI(e) => {
                    let content = String::from_utf8_lossy(e.as_ref()).to_string();
                    let (target, data) = content
                        .trim()
                        .split_once(char::is_whitespace)
                        .map(|(target, data)| (target.to_string(), data.trim().to_string()))
                        .unwrap_or_else(|| (content.trim().to_string(), String::new()));
                    stack
                        .last_mut()
                        .unwrap_or(&mut document)
                        .children
                        .push(XmlNode::with_value(
                            XmlNodeKind::ProcessingInstruction,
                            &target,
                            data,
                        ));
                }

                // Decl, DocType
                _ => {}
            }

            buf.clear();
        }

        if document.first_element().is_none() {
            return Err(EpubError::FailedParsingXml);
        }

        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::EpubError,
        utils::{DecodeBytes, XmlNodeKind, XmlReader},
    };

    /// Test with empty data
    #[test]
    fn test_decode_empty_data() {
        let data: Vec<u8> = vec![];
        let result = data.decode();
        assert!(result.is_err());
        assert_eq!(result.unwrap_err(), EpubError::EmptyDataError);
    }

    /// Testing text decoding with UTF-8 BOM
    #[test]
    fn test_decode_utf8_with_bom() {
        let data: Vec<u8> = vec![0xEF, 0xBB, 0xBF, b'H', b'e', b'l', b'l', b'o'];
        let result = data.decode();
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "Hello");
    }

    /// Testing text decoding with UTF-16 LE BOM
    #[test]
    fn test_decode_utf16_le_with_bom() {
        let data = vec![
            0xFF, 0xFE, // BOM
            b'H', 0x00, // H
            b'e', 0x00, // e
            b'l', 0x00, // l
            b'l', 0x00, // l
            b'o', 0x00, // o
        ];
        let result = data.decode();
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "Hello");
    }

    /// Predefined and numeric references resolve in text and attribute values
    #[test]
    fn test_parse_document_resolves_references() {
        let xml = r#"<p title="a &amp; b &#65;">&lt;x&gt; &#65;&#x42; &apos;&quot;</p>"#;
        let document = XmlReader::parse_document(xml).unwrap();
        let root = document.first_element().unwrap();
        assert_eq!(root.get_attr("title"), Some("a & b A"));
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].value.as_deref(), Some("<x> AB '\""));
    }

    /// References XML does not allow are parse errors instead of literal text
    #[test]
    fn test_parse_document_rejects_bad_references() {
        assert!(matches!(
            XmlReader::parse_document("<p>&#0;</p>").unwrap_err(),
            EpubError::QuickXmlError { .. }
        ));
        assert_eq!(
            XmlReader::parse_document("<p>&nbsp;</p>").unwrap_err(),
            EpubError::FailedParsingXml
        );
        assert!(matches!(
            XmlReader::parse_document(r#"<p a="x&#0;y"/>"#).unwrap_err(),
            EpubError::QuickXmlError { .. }
        ));
    }

    /// Every node kind is kept in document order, with DOM node names
    #[test]
    fn test_parse_document_keeps_all_node_kinds() {
        let xml = r#"<?xml version="1.0"?><root a="1"><!-- note --><b>x &amp; y</b><?target data?><![CDATA[raw]]></root>"#;
        let document = XmlReader::parse_document(xml).unwrap();
        assert_eq!(document.kind, XmlNodeKind::Document);
        assert_eq!(document.children.len(), 1);

        let root = document.first_element().unwrap();
        assert_eq!(root.name, "root");
        assert_eq!(root.get_attr("a"), Some("1"));

        let names: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["#comment", "b", "target", "#cdata-section"]);

        let text = &root.children[1].children[0];
        assert_eq!(text.kind, XmlNodeKind::Text);
        assert_eq!(text.value.as_deref(), Some("x & y"));
    }

    /// Prefixed names and namespace declarations are kept verbatim
    #[test]
    fn test_parse_document_qualified_names() {
        let xml = r#"<encryption xmlns:enc="http://www.w3.org/2001/04/xmlenc#"><enc:EncryptedData/></encryption>"#;
        let document = XmlReader::parse_document(xml).unwrap();
        let root = document.first_element().unwrap();
        assert_eq!(
            root.get_attr("xmlns:enc"),
            Some("http://www.w3.org/2001/04/xmlenc#")
        );
        assert_eq!(root.children[0].name, "enc:EncryptedData");
    }

    #[test]
    fn test_parse_document_errors() {
        assert_eq!(
            XmlReader::parse_document("").unwrap_err(),
            EpubError::EmptyDataError
        );
        assert!(matches!(
            XmlReader::parse_document("<a><b></a>").unwrap_err(),
            EpubError::QuickXmlError { .. }
        ));
        assert_eq!(
            XmlReader::parse_document("<!-- only a comment -->").unwrap_err(),
            EpubError::FailedParsingXml
        );
    }
}
