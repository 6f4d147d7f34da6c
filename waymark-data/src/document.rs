//! Minimal element tree over API responses.
//!
//! Responses are small enough to hold in memory, so the streaming reader is
//! folded into a tree once and decoders walk it by element name. Only element
//! names, attributes and text content are retained.

use std::collections::HashMap;

use quick_xml::{Reader, events::Event};
use thiserror::Error;

/// Failure to turn a response body into a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// The body is not well-formed XML.
    #[error("invalid XML at byte {position}: {message}")]
    Syntax {
        /// Byte offset reported by the reader.
        position: usize,
        /// Reader error description.
        message: String,
    },
    /// The body contained no root element.
    #[error("document has no root element")]
    Empty,
    /// The document parsed but lacks content a caller relies on.
    #[error("unexpected document content: {0}")]
    Unexpected(String),
}

/// One XML element with its attributes, children and text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Local element name.
    pub name: String,
    /// Unescaped attribute values by name.
    pub attributes: HashMap<String, String>,
    /// Child elements in document order.
    pub children: Vec<Element>,
    /// Concatenated, trimmed text content.
    pub text: String,
}

impl Element {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// Attribute value by name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute parsed into `T`; `None` when absent or unparsable.
    #[must_use]
    pub fn attr_parsed<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.attr(name).and_then(|value| value.trim().parse().ok())
    }

    /// First child with the given name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Self> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Children with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Self> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Text of the first child with the given name.
    #[must_use]
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|child| child.text.as_str())
    }

    /// All descendants with the given name, depth first.
    #[must_use]
    pub fn descendants(&self, name: &str) -> Vec<&Self> {
        let mut found = Vec::new();
        let mut stack: Vec<&Self> = self.children.iter().rev().collect();
        while let Some(element) = stack.pop() {
            if element.name == name {
                found.push(element);
            }
            stack.extend(element.children.iter().rev());
        }
        found
    }
}

/// A parsed response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Element,
}

impl Document {
    /// Parse a response body.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Syntax`] for malformed XML and
    /// [`DocumentError::Empty`] when no root element is present.
    ///
    /// # Examples
    /// ```
    /// use waymark_data::Document;
    ///
    /// let doc = Document::parse(r#"<osm><node id="1" lat="0" lon="0"/></osm>"#)?;
    /// assert_eq!(doc.root().name, "osm");
    /// assert_eq!(doc.root().children[0].attr("id"), Some("1"));
    /// # Ok::<(), waymark_data::DocumentError>(())
    /// ```
    pub fn parse(body: &str) -> Result<Self, DocumentError> {
        let mut reader = Reader::from_str(body);
        reader.trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        loop {
            let event = reader.read_event().map_err(|err| DocumentError::Syntax {
                position: reader.buffer_position(),
                message: err.to_string(),
            })?;
            match event {
                Event::Start(start) => {
                    let element = open_element(&start).map_err(|message| DocumentError::Syntax {
                        position: reader.buffer_position(),
                        message,
                    })?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = open_element(&start).map_err(|message| DocumentError::Syntax {
                        position: reader.buffer_position(),
                        message,
                    })?;
                    close_element(&mut stack, &mut root, element);
                }
                Event::End(_) => {
                    if let Some(element) = stack.pop() {
                        close_element(&mut stack, &mut root, element);
                    }
                }
                Event::Text(text) => {
                    let value = text.unescape().map_err(|err| DocumentError::Syntax {
                        position: reader.buffer_position(),
                        message: err.to_string(),
                    })?;
                    append_text(&mut stack, &value);
                }
                Event::CData(data) => {
                    let value = String::from_utf8_lossy(&data);
                    append_text(&mut stack, &value);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        root.map(|root| Self { root }).ok_or(DocumentError::Empty)
    }

    /// Root element.
    #[must_use]
    pub const fn root(&self) -> &Element {
        &self.root
    }
}

fn open_element(start: &quick_xml::events::BytesStart<'_>) -> Result<Element, String> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut element = Element::named(name);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|err| err.to_string())?
            .into_owned();
        element.attributes.insert(key, value);
    }
    Ok(element)
}

fn close_element(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn append_text(stack: &mut [Element], value: &str) {
    if let Some(current) = stack.last_mut() {
        current.text.push_str(value);
    }
}
