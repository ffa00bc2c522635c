//! A small owned element tree on top of quick-xml.
//!
//! The parameter transform works on whole documents, so the event stream is
//! materialized into `Element` nodes before the section writers touch it.

use std::io::Write;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{MqError, Result};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// First direct child with the given tag name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Like [`find`](Self::find) but required.
    pub fn get(&self, name: &str) -> Result<&Element> {
        self.find(name)
            .ok_or_else(|| MqError::XmlShape(format!("missing element '{name}'")))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Serialize this element as a standalone document.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut buffer = Vec::new();
        write_document(self, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Parse a document into its root element.
    pub fn parse(input: &str) -> Result<Element> {
        let mut reader = Reader::from_str(input);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(element_from_start(&start)?),
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    close_element(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let chunk = text
                        .unescape()
                        .map_err(|e| MqError::XmlShape(format!("bad text content: {e}")))?;
                    append_text(&mut stack, &chunk)?;
                }
                Event::CData(data) => {
                    let bytes = data.into_inner();
                    append_text(&mut stack, &String::from_utf8_lossy(&bytes))?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| MqError::XmlShape("unbalanced end tag".to_string()))?;
                    close_element(&mut stack, &mut root, element)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if !stack.is_empty() {
            return Err(MqError::XmlShape("unclosed element".to_string()));
        }
        root.ok_or_else(|| MqError::XmlShape("document has no root element".to_string()))
    }
}

/// Write `root` as a complete document with an XML declaration.
pub fn write_document<W: Write>(root: &Element, sink: W) -> Result<()> {
    let mut writer = Writer::new(sink);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    write_element(&mut writer, root)
}

fn write_element<W: Write>(writer: &mut Writer<W>, element: &Element) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.children.is_empty() && element.text.is_none() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    if let Some(text) = &element.text {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| MqError::XmlShape(format!("bad attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| MqError::XmlShape(format!("bad attribute value: {e}")))?
            .into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn append_text(stack: &mut [Element], chunk: &str) -> Result<()> {
    let current = stack
        .last_mut()
        .ok_or_else(|| MqError::XmlShape("text outside of the root element".to_string()))?;
    current.text.get_or_insert_with(String::new).push_str(chunk);
    Ok(())
}

fn close_element(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_some() {
                return Err(MqError::XmlShape("multiple root elements".to_string()));
            }
            *root = Some(element);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_document() {
        let root = Element::parse(
            r#"<?xml version="1.0"?><params version="2"><a>1</a><b/><c><d>x</d></c></params>"#,
        )
        .unwrap();
        assert_eq!(root.name, "params");
        assert_eq!(root.attr("version"), Some("2"));
        assert_eq!(root.get("a").unwrap().text.as_deref(), Some("1"));
        assert_eq!(root.get("b").unwrap().text, None);
        assert_eq!(
            root.get("c").unwrap().get("d").unwrap().text.as_deref(),
            Some("x")
        );
    }

    #[test]
    fn test_string_round_trip() {
        let mut root = Element::new("root");
        root.attrs.push(("version".to_string(), "1".to_string()));
        root.push(Element::with_text("value", "a < b"));
        root.push(Element::new("empty"));

        let serialized = root.to_xml_string().unwrap();
        let reparsed = Element::parse(&serialized).unwrap();
        assert_eq!(reparsed, root);
    }

    #[test]
    fn test_missing_element_is_an_error() {
        let root = Element::parse("<root><a>1</a></root>").unwrap();
        assert!(root.get("nope").is_err());
        assert!(root.find("nope").is_none());
    }

    #[test]
    fn test_unbalanced_document_is_rejected() {
        assert!(Element::parse("<root><a></root>").is_err());
        assert!(Element::parse("").is_err());
    }
}
