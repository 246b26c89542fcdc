// Minimal XML element tree over quick-xml.
//
// Huawei replies are small flat documents (`<response>`, `<error>`,
// lists of `<Host>` / `<PortMapping>`), so a tiny owned tree with
// name lookups is all the drivers need.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

/// One XML element: its tag name, concatenated text, and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// First direct child with this tag.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed text of the first direct child with this tag.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim())
    }

    /// First text found under any of `names`, searched depth-first.
    pub fn find_text(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .find_map(|n| self.find(n))
            .map(|n| n.text.trim())
            .filter(|t| !t.is_empty())
    }

    /// Depth-first search for the first element named `name` (self included).
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Every element named `name` in document order.
    pub fn find_all<'a>(&'a self, name: &str) -> Vec<&'a XmlNode> {
        let mut out = Vec::new();
        self.collect(name, &mut out);
        out
    }

    fn collect<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlNode>) {
        if self.name == name {
            out.push(self);
        }
        for c in &self.children {
            c.collect(name, out);
        }
    }
}

/// Parse `body` and return its root element.
pub(crate) fn parse(body: &str) -> Result<XmlNode, String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = vec![XmlNode::named("#document".into())];

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        match event {
            Event::Start(e) => {
                stack.push(XmlNode::named(String::from_utf8_lossy(e.name().as_ref()).into_owned()));
            }
            Event::Empty(e) => {
                let node = XmlNode::named(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err("unbalanced closing tag".into());
                }
                if let Some(node) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err("unexpected end of document".into());
    }
    stack
        .pop()
        .and_then(|doc| doc.children.into_iter().next())
        .ok_or_else(|| "document has no root element".into())
}

/// Escape a value for embedding in element text.
pub(crate) fn text(value: &str) -> String {
    escape(value).into_owned()
}
