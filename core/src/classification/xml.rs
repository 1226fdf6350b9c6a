//! A thin DOM-like adapter over `quick-xml`, isolating event-based parsing
//! from the catalog loader in `mod.rs`.

use crate::error::ClassificationError;

use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// A parsed element: tag name, attributes (in document order), and element children.
/// Comments, processing instructions, and text nodes are dropped — the
/// catalog schema never depends on them.
#[derive(Debug, Clone)]
pub(crate) struct XmlNode {
    pub name: String,
    pub attrs: IndexMap<String, String>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }

    pub fn attr_bool(&self, name: &str) -> bool {
        self.attr(name) == Some("true")
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn xml_err(e: impl std::fmt::Display) -> ClassificationError {
    ClassificationError::Xml(e.to_string())
}

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn read_attrs(e: &BytesStart) -> Result<IndexMap<String, String>, ClassificationError> {
    let mut attrs = IndexMap::new();
    for a in e.attributes() {
        let a = a.map_err(xml_err)?;
        let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
        let val = a.unescape_value().map_err(xml_err)?.into_owned();
        attrs.insert(key, val);
    }
    Ok(attrs)
}

/// Parses `xml` and returns its root element.
pub(crate) fn parse_document(xml: &str) -> Result<XmlNode, ClassificationError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let name = tag_name(&e);
                let attrs = read_attrs(&e)?;
                return read_children(&mut reader, name, attrs);
            }
            Event::Empty(e) => {
                return Ok(XmlNode {
                    name: tag_name(&e),
                    attrs: read_attrs(&e)?,
                    children: Vec::new(),
                });
            }
            Event::Eof => return Err(ClassificationError::Xml("empty document".to_string())),
            _ => {}
        }
        buf.clear();
    }
}

fn read_children(
    reader: &mut Reader<&[u8]>,
    name: String,
    attrs: IndexMap<String, String>,
) -> Result<XmlNode, ClassificationError> {
    let mut children = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let child_name = tag_name(&e);
                let child_attrs = read_attrs(&e)?;
                children.push(read_children(reader, child_name, child_attrs)?);
            }
            Event::Empty(e) => {
                children.push(XmlNode {
                    name: tag_name(&e),
                    attrs: read_attrs(&e)?,
                    children: Vec::new(),
                });
            }
            Event::End(e) => {
                let end_name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if end_name == name {
                    return Ok(XmlNode {
                        name,
                        attrs,
                        children,
                    });
                }
            }
            Event::Eof => {
                return Err(ClassificationError::Xml(format!(
                    "unexpected end of document inside <{name}>"
                )))
            }
            _ => {}
        }
        buf.clear();
    }
}

/// Reconstructs a minimal XML fragment for a node, used to hand opaque
/// signature patterns and `<rule>` elements through to the (external)
/// rule evaluator without the core interpreting them.
pub(crate) fn serialize_node(node: &XmlNode) -> String {
    let mut attrs = String::new();
    for (k, v) in &node.attrs {
        attrs.push(' ');
        attrs.push_str(k);
        attrs.push_str("=\"");
        attrs.push_str(v);
        attrs.push('"');
    }
    if node.children.is_empty() {
        format!("<{}{}/>", node.name, attrs)
    } else {
        let inner: String = node.children.iter().map(serialize_node).collect();
        format!("<{}{}>{}</{}>", node.name, attrs, inner, node.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attrs() {
        let xml = r#"<classification>
            <global>
                <classifier name="a" sigId="1000" final="true"/>
                <facet name="app" required="true"/>
            </global>
            <block name="http">
                <tag name="app" value="http"/>
                <signature id="1"><pattern port="80"/></signature>
            </block>
        </classification>"#;
        let root = parse_document(xml).unwrap();
        assert_eq!(root.name, "classification");
        let global = root.children_named("global").next().unwrap();
        let classifier = global.children_named("classifier").next().unwrap();
        assert_eq!(classifier.attr("name"), Some("a"));
        assert!(classifier.attr_bool("final"));
        let block = root.children_named("block").next().unwrap();
        assert_eq!(block.attr("name"), Some("http"));
        let sig = block.children_named("signature").next().unwrap();
        assert_eq!(sig.attr("id"), Some("1"));
        let pattern = sig.children.first().unwrap();
        assert_eq!(pattern.name, "pattern");
        assert_eq!(serialize_node(pattern), r#"<pattern port="80"/>"#);
    }
}
