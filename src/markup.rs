// Generic markup tree read from the upstream XML responses.
//
// The bus API ignores `_type=json` and answers in XML, so every response goes
// through here before the transformer turns it into a JSON-like tree.

use indexmap::IndexMap;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{BusError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum MarkupNode {
    Element(MarkupElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkupElement {
    pub name: String,
    pub attributes: IndexMap<String, String>,
    pub children: Vec<MarkupNode>,
}

impl MarkupElement {
    pub fn new(name: impl Into<String>) -> Self {
        MarkupElement {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: impl Into<MarkupNode>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(MarkupNode::Text(text.into()));
        self
    }

    /// Appends text, merging with a trailing text node the way a DOM
    /// normalises adjacent character data.
    fn push_text(&mut self, text: &str) {
        match self.children.last_mut() {
            Some(MarkupNode::Text(previous)) => previous.push_str(text),
            _ => self.children.push(MarkupNode::Text(text.to_string())),
        }
    }
}

impl From<MarkupElement> for MarkupNode {
    fn from(element: MarkupElement) -> Self {
        MarkupNode::Element(element)
    }
}

/// Reads an XML document into its root element.
///
/// Whitespace between elements is kept as text nodes. Comments, processing
/// instructions, the declaration and any doctype are skipped.
pub fn parse_markup(text: &str) -> Result<MarkupElement> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<MarkupElement> = Vec::new();
    let mut root: Option<MarkupElement> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            BusError::ParseError(format!(
                "Invalid XML at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(start) => stack.push(open_element(&start)?),
            Event::Empty(start) => {
                let element = open_element(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| BusError::ParseError("Unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let content = text
                        .unescape()
                        .map_err(|e| BusError::ParseError(format!("Invalid text content: {}", e)))?;
                    current.push_text(&content);
                }
            }
            Event::CData(cdata) => {
                if let Some(current) = stack.last_mut() {
                    current.push_text(&String::from_utf8_lossy(&cdata));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(BusError::ParseError(format!(
            "Unclosed element <{}>",
            open.name
        )));
    }

    root.ok_or_else(|| BusError::ParseError("Document has no root element".to_string()))
}

fn open_element(start: &BytesStart<'_>) -> Result<MarkupElement> {
    let mut element = MarkupElement::new(String::from_utf8_lossy(start.name().as_ref()));

    for attribute in start.attributes() {
        let attribute = attribute
            .map_err(|e| BusError::ParseError(format!("Invalid attribute: {}", e)))?;
        let name = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| BusError::ParseError(format!("Invalid attribute value: {}", e)))?
            .into_owned();
        element.attributes.insert(name, value);
    }

    Ok(element)
}

fn attach(
    stack: &mut [MarkupElement],
    root: &mut Option<MarkupElement>,
    element: MarkupElement,
) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(MarkupNode::Element(element));
        return Ok(());
    }

    if root.is_some() {
        return Err(BusError::ParseError(format!(
            "Second root element <{}>",
            element.name
        )));
    }

    *root = Some(element);
    Ok(())
}
