//! Lightweight element tree built from a streaming `quick-xml` reader.
//!
//! The container schema is large and drifts between releases, so the
//! decoder never binds to it with serde. Instead the document is read into
//! a generic tree once and every field extractor walks it independently.

use quick_xml::events::{BytesStart, Event};

use super::FormatError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: Option<String>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The `Value` attribute, or the element text when the attribute is absent.
    pub fn value(&self) -> Option<&str> {
        self.attr("Value").or(self.text.as_deref())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follows a chain of direct children, first match at every step.
    pub fn path(&self, segments: &[&str]) -> Option<&Element> {
        let mut cur = self;
        for seg in segments {
            cur = cur.child(seg)?;
        }
        Some(cur)
    }

    /// Reads `name` as either an attribute or the value of a child element.
    pub fn attr_or_child_value(&self, name: &str) -> Option<&str> {
        self.attr(name)
            .or_else(|| self.child(name).and_then(|c| c.value()))
    }

    /// Pre-order traversal of this element and every descendant.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// First descendant (including self) with the given name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.descendants().find(|e| e.name == name)
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

/// Result of reading a document. `truncated` carries the reason when the
/// reader stopped early but the root element had already opened.
#[derive(Debug)]
pub struct Document {
    pub root: Element,
    pub truncated: Option<String>,
}

pub fn parse(xml: &[u8]) -> Result<Document, FormatError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut truncated = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if root.is_some() && stack.is_empty() {
                    // Trailing content after the root closed.
                    break;
                }
                stack.push(open_element(&e));
            }
            Ok(Event::Empty(e)) => {
                let el = open_element(&e);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(el),
                    None if root.is_none() => root = Some(el),
                    None => break,
                }
            }
            Ok(Event::Text(te)) => {
                if let Some(top) = stack.last_mut() {
                    let text = te.unescape().unwrap_or_default();
                    if !text.is_empty() {
                        top.text
                            .get_or_insert_with(String::new)
                            .push_str(text.as_ref());
                    }
                }
            }
            Ok(Event::End(_)) => {
                if let Some(done) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => root = Some(done),
                    }
                }
            }
            Ok(Event::Eof) => {
                if !stack.is_empty() {
                    truncated = Some("document ended before the root element closed".to_string());
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if stack.is_empty() && root.is_none() {
                    return Err(FormatError::Xml(e.to_string()));
                }
                truncated = Some(e.to_string());
                break;
            }
        }
        buf.clear();
    }

    // Fold any still-open elements into their parents so partial content
    // survives an early stop.
    while let Some(open) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(open),
            None => root = Some(open),
        }
    }

    match root {
        Some(root) => Ok(Document { root, truncated }),
        None => Err(FormatError::Xml("no root element".to_string())),
    }
}

fn open_element(e: &BytesStart<'_>) -> Element {
    let mut el = Element::new(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
    for a in e.attributes().flatten() {
        let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
        let value = a
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned());
        el.attrs.push((key, value));
    }
    el
}
