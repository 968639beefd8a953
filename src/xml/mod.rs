//! Arena-backed XML tree for structural cleanup.
//!
//! Nodes live in a flat `Vec` and refer to each other by [`NodeId`], so an
//! edit never invalidates a handle held by an in-progress traversal. Edits
//! are done in two phases: collect the ids to touch while walking the tree,
//! then apply the changes. Detached nodes stay in the arena but are no longer
//! reachable from the document node.
//!
//! Text and attribute values are kept exactly as they appear in the source
//! (still escaped), so a parse followed by a write only changes what was
//! explicitly edited, plus the XML declaration, which is always rewritten as
//! [`XML_DECLARATION`].

use std::fs;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

use crate::{Error, Result};

/// Declaration written at the top of every serialized document.
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Handle to one node in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// An attribute with its value still escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// Qualified name, e.g. `w:rsidR`.
    pub name: String,
    /// Escaped value.
    pub value: String,
}

#[derive(Debug, Clone)]
enum Kind {
    Document,
    Element { name: String, attrs: Vec<Attr> },
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: Kind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A parsed XML document.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(Error::malformed_xml)
}

fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

impl Document {
    /// Parses a document from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedXml`] for syntax errors, mismatched or
    /// unclosed tags, non-UTF-8 content, or a missing/duplicate root element.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut doc = Document {
            nodes: vec![Node {
                kind: Kind::Document,
                parent: None,
                children: Vec::new(),
            }],
        };

        let mut reader = Reader::from_reader(bytes);
        reader.check_end_names(true);

        let mut stack = vec![doc.root()];
        let mut buf = Vec::new();
        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| Error::malformed_xml(format!("at byte {}: {}", reader.buffer_position(), e)))?;
            let parent = *stack.last().unwrap_or(&NodeId(0));
            match event {
                Event::Start(start) => {
                    let (name, attrs) = element_parts(&start)?;
                    let id = doc.push_element(parent, name, attrs)?;
                    stack.push(id);
                }
                Event::Empty(start) => {
                    let (name, attrs) = element_parts(&start)?;
                    doc.push_element(parent, name, attrs)?;
                }
                Event::End(end) => {
                    let name = utf8(end.name().as_ref())?;
                    let open = stack.pop().filter(|id| *id != doc.root());
                    match open.and_then(|id| doc.name(id).map(str::to_string)) {
                        Some(open_name) if open_name == name => {}
                        Some(open_name) => {
                            return Err(Error::malformed_xml(format!(
                                "</{}> closes <{}>",
                                name, open_name
                            )));
                        }
                        None => {
                            return Err(Error::malformed_xml(format!(
                                "</{}> without an opening tag",
                                name
                            )));
                        }
                    }
                }
                Event::Text(text) => {
                    let text = utf8(&text.into_inner())?;
                    if parent == doc.root() {
                        if !text.trim().is_empty() {
                            return Err(Error::malformed_xml("text outside the root element"));
                        }
                    } else {
                        doc.push(parent, Kind::Text(text));
                    }
                }
                Event::CData(data) => {
                    let data = utf8(&data.into_inner())?;
                    doc.push(parent, Kind::CData(data));
                }
                Event::Comment(comment) => {
                    let comment = utf8(&comment.into_inner())?;
                    doc.push(parent, Kind::Comment(comment));
                }
                Event::Eof => break,
                // Declaration, processing instructions and DOCTYPE are not kept.
                _ => {}
            }
            buf.clear();
        }

        if stack.len() > 1 {
            let open: Vec<_> = stack[1..]
                .iter()
                .filter_map(|id| doc.name(*id))
                .collect();
            return Err(Error::malformed_xml(format!(
                "unclosed element(s): {}",
                open.join(", ")
            )));
        }
        if doc.root_element().is_none() {
            return Err(Error::malformed_xml("no root element"));
        }
        Ok(doc)
    }

    /// Reads and parses a file.
    pub fn open(path: &Path) -> Result<Self> {
        Self::parse(&fs::read(path)?)
    }

    fn push(&mut self, parent: NodeId, kind: Kind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    fn push_element(&mut self, parent: NodeId, name: String, attrs: Vec<Attr>) -> Result<NodeId> {
        if parent == self.root() && self.root_element().is_some() {
            return Err(Error::malformed_xml(format!(
                "second root element <{}>",
                name
            )));
        }
        Ok(self.push(parent, Kind::Element { name, attrs }))
    }

    /// The document node. Its only element child is the root element.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The root element.
    pub fn root_element(&self) -> Option<NodeId> {
        self.element_children(self.root()).next()
    }

    /// Qualified name of an element, `None` for other nodes.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            Kind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Local part of an element name.
    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.name(id).map(|n| split_qname(n).1)
    }

    /// Namespace prefix of an element name.
    pub fn prefix(&self, id: NodeId) -> Option<&str> {
        self.name(id).and_then(|n| split_qname(n).0)
    }

    /// Returns true if the node is an element.
    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, Kind::Element { .. })
    }

    /// Parent of a node; `None` for the document node and detached roots.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// All children of a node, in order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Element children of a node, in order.
    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
    }

    /// Every node below `id`, in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    /// Every element below `id` with the given qualified name, in document order.
    pub fn find_all(&self, id: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|n| self.name(*n) == Some(name))
            .collect()
    }

    /// Attributes of an element (empty for other nodes).
    pub fn attrs(&self, id: NodeId) -> &[Attr] {
        match &self.nodes[id.0].kind {
            Kind::Element { attrs, .. } => attrs,
            _ => &[],
        }
    }

    /// Escaped value of an attribute.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attrs(id)
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Sets an attribute from an unescaped value, replacing any existing one.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Kind::Element { attrs, .. } = &mut self.nodes[id.0].kind {
            let value = escape(value).into_owned();
            match attrs.iter_mut().find(|a| a.name == name) {
                Some(attr) => attr.value = value,
                None => attrs.push(Attr {
                    name: name.to_string(),
                    value,
                }),
            }
        }
    }

    /// Keeps only the attributes for which `keep` returns true.
    ///
    /// Returns the number of attributes removed.
    pub fn retain_attrs(&mut self, id: NodeId, mut keep: impl FnMut(&Attr) -> bool) -> usize {
        match &mut self.nodes[id.0].kind {
            Kind::Element { attrs, .. } => {
                let before = attrs.len();
                attrs.retain(|a| keep(a));
                before - attrs.len()
            }
            _ => 0,
        }
    }

    /// Concatenated escaped text of the node's direct text children.
    pub fn text(&self, id: NodeId) -> String {
        self.children(id)
            .iter()
            .filter_map(|c| match &self.nodes[c.0].kind {
                Kind::Text(t) | Kind::CData(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Resolves a namespace prefix in the scope of `id`.
    ///
    /// An empty prefix resolves the default namespace.
    pub fn resolve_prefix(&self, id: NodeId, prefix: &str) -> Option<&str> {
        let key = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{}", prefix)
        };
        let mut current = Some(id);
        while let Some(node) = current {
            if let Some(uri) = self.attr(node, &key) {
                return Some(uri);
            }
            current = self.parent(node);
        }
        None
    }

    /// Returns true if any element declares the prefix.
    pub fn declares_prefix(&self, prefix: &str) -> bool {
        let key = format!("xmlns:{}", prefix);
        self.descendants(self.root())
            .into_iter()
            .any(|n| self.attr(n, &key).is_some())
    }

    /// Every namespace declaration in the document as `(prefix, uri)`.
    ///
    /// The default namespace has an empty prefix.
    pub fn namespaces(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        for node in self.descendants(self.root()) {
            for attr in self.attrs(node) {
                if attr.name == "xmlns" {
                    out.push(("", attr.value.as_str()));
                } else if let Some(prefix) = attr.name.strip_prefix("xmlns:") {
                    out.push((prefix, attr.value.as_str()));
                }
            }
        }
        out
    }

    /// Removes a node from its parent.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    /// Replaces a node with its own children, in place.
    pub fn unwrap(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent.take() else {
            return;
        };
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in &children {
            self.nodes[child.0].parent = Some(parent);
        }
        let siblings = &mut self.nodes[parent.0].children;
        if let Some(pos) = siblings.iter().position(|c| *c == id) {
            siblings.splice(pos..=pos, children);
        }
    }

    /// Removes every child of a node.
    pub fn clear_children(&mut self, id: NodeId) {
        for child in std::mem::take(&mut self.nodes[id.0].children) {
            self.nodes[child.0].parent = None;
        }
    }

    /// Appends a new element with unescaped attribute values.
    pub fn append_element(&mut self, parent: NodeId, name: &str, attrs: &[(&str, &str)]) -> NodeId {
        let attrs = attrs
            .iter()
            .map(|(k, v)| Attr {
                name: k.to_string(),
                value: escape(*v).into_owned(),
            })
            .collect();
        self.push(
            parent,
            Kind::Element {
                name: name.to_string(),
                attrs,
            },
        )
    }

    /// Appends a text node from unescaped text.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        self.push(parent, Kind::Text(escape(text).into_owned()))
    }

    /// Stable-sorts the element children of `parent` by a key.
    ///
    /// Non-element nodes following an element (typically indentation) move
    /// with it; nodes before the first element stay in front.
    pub fn sort_children_by_key<K: Ord>(&mut self, parent: NodeId, mut key: impl FnMut(&Self, NodeId) -> K) {
        let children = self.nodes[parent.0].children.clone();
        let mut leading = Vec::new();
        let mut groups: Vec<Vec<NodeId>> = Vec::new();
        for child in children {
            if self.is_element(child) {
                groups.push(vec![child]);
            } else if let Some(group) = groups.last_mut() {
                group.push(child);
            } else {
                leading.push(child);
            }
        }

        let mut keyed: Vec<(K, Vec<NodeId>)> = groups
            .into_iter()
            .map(|g| (key(self, g[0]), g))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        leading.extend(keyed.into_iter().flat_map(|(_, g)| g));
        self.nodes[parent.0].children = leading;
    }

    /// Serializes the document, starting with [`XML_DECLARATION`].
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::with_capacity(self.nodes.len() * 16);
        out.push_str(XML_DECLARATION);
        out.push('\n');
        if let Some(root) = self.root_element() {
            self.write_node(root, &mut out);
        }
        out.into_bytes()
    }

    /// Serializes the document to a file, replacing it.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id.0];
        match &node.kind {
            Kind::Document => {}
            Kind::Text(t) => out.push_str(t),
            Kind::CData(t) => {
                out.push_str("<![CDATA[");
                out.push_str(t);
                out.push_str("]]>");
            }
            Kind::Comment(t) => {
                out.push_str("<!--");
                out.push_str(t);
                out.push_str("-->");
            }
            Kind::Element { name, attrs } => {
                out.push('<');
                out.push_str(name);
                for attr in attrs {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    // Values read from single-quoted attributes may hold a raw '"'.
                    out.push_str(&attr.value.replace('"', "&quot;"));
                    out.push('"');
                }
                if node.children.is_empty() {
                    out.push_str("/>");
                } else {
                    out.push('>');
                    for child in &node.children {
                        self.write_node(*child, out);
                    }
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                }
            }
        }
    }
}

fn element_parts(start: &quick_xml::events::BytesStart<'_>) -> Result<(String, Vec<Attr>)> {
    let name = utf8(start.name().as_ref())?;
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::malformed_xml(format!("in <{}>: {}", name, e)))?;
        attrs.push(Attr {
            name: utf8(attr.key.as_ref())?,
            value: utf8(&attr.value)?,
        });
    }
    Ok((name, attrs))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p w:rsidR="00AB12"><w:r><w:t>Hello &amp; welcome</w:t></w:r></w:p>
    <w:ins w:author="X"><w:r><w:t>new</w:t></w:r></w:ins>
  </w:body>
</w:document>"#;

    fn to_string(doc: &Document) -> String {
        String::from_utf8(doc.to_bytes()).unwrap()
    }

    #[test]
    fn test_parse_and_navigate() {
        let doc = Document::parse(SAMPLE.as_bytes()).unwrap();
        let root = doc.root_element().unwrap();
        assert_eq!(doc.name(root), Some("w:document"));
        assert_eq!(doc.local_name(root), Some("document"));
        assert_eq!(doc.prefix(root), Some("w"));
        assert_eq!(
            doc.resolve_prefix(root, "w"),
            Some("http://schemas.openxmlformats.org/wordprocessingml/2006/main")
        );
        assert!(doc.declares_prefix("w"));
        assert!(!doc.declares_prefix("p"));

        let paragraphs = doc.find_all(root, "w:p");
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(doc.attr(paragraphs[0], "w:rsidR"), Some("00AB12"));
    }

    #[test]
    fn test_round_trip_preserves_escapes() {
        let doc = Document::parse(SAMPLE.as_bytes()).unwrap();
        let out = to_string(&doc);
        assert!(out.starts_with(XML_DECLARATION));
        assert!(out.contains("Hello &amp; welcome"));
        assert!(out.contains(r#"w:rsidR="00AB12""#));
    }

    #[test]
    fn test_unwrap_splices_children_in_place() {
        let mut doc = Document::parse(SAMPLE.as_bytes()).unwrap();
        let root = doc.root_element().unwrap();
        let targets = doc.find_all(root, "w:ins");
        for ins in targets {
            doc.unwrap(ins);
        }
        let out = to_string(&doc);
        assert!(!out.contains("w:ins"));
        assert!(!out.contains("w:author"));
        assert!(out.contains("<w:t>new</w:t>"));
        // Still after the paragraph.
        assert!(out.find("Hello").unwrap() < out.find("new").unwrap());
    }

    #[test]
    fn test_detach_and_retain_attrs() {
        let mut doc = Document::parse(SAMPLE.as_bytes()).unwrap();
        let root = doc.root_element().unwrap();
        let p = doc.find_all(root, "w:p")[0];
        assert_eq!(doc.retain_attrs(p, |a| !a.name.starts_with("w:rsid")), 1);
        for ins in doc.find_all(root, "w:ins") {
            doc.detach(ins);
        }
        let out = to_string(&doc);
        assert!(!out.contains("rsid"));
        assert!(!out.contains("new"));
    }

    #[test]
    fn test_append_escapes() {
        let mut doc = Document::parse(b"<a/>").unwrap();
        let root = doc.root_element().unwrap();
        let child = doc.append_element(root, "b", &[("k", "x<y")]);
        doc.append_text(child, "1 & 2");
        let out = to_string(&doc);
        assert!(out.ends_with(r#"<a><b k="x&lt;y">1 &amp; 2</b></a>"#));
    }

    #[test]
    fn test_sort_children_keeps_tails() {
        let mut doc = Document::parse(b"<r>\n <c/>\n <a/>\n <b/>\n</r>").unwrap();
        let root = doc.root_element().unwrap();
        doc.sort_children_by_key(root, |d, n| d.name(n).map(str::to_string));
        assert!(to_string(&doc).ends_with("<r>\n <a/>\n <b/>\n<c/>\n </r>"));
        let names: Vec<_> = doc
            .element_children(root)
            .filter_map(|n| doc.name(n))
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(doc.children(root).len(), 7);
    }

    #[test]
    fn test_single_quoted_attribute_with_double_quote() {
        let doc = Document::parse(br#"<a t='say "hi"'/>"#).unwrap();
        let out = to_string(&doc);
        assert!(out.contains(r#"t="say &quot;hi&quot;""#));
        assert!(Document::parse(&doc.to_bytes()).is_ok());
    }

    #[test]
    fn test_malformed_inputs() {
        for input in [
            &b"<a><b></a>"[..],
            b"<a>",
            b"</a>",
            b"",
            b"just text",
            b"<a/><b/>",
            b"<a>\xff</a>",
        ] {
            assert!(
                matches!(Document::parse(input), Err(Error::MalformedXml { .. })),
                "{:?} should be rejected",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_doctype_and_comments() {
        let doc = Document::parse(
            b"<?xml version='1.0'?><!DOCTYPE ncx><!-- c --><ncx><head/><!-- inner --></ncx>",
        )
        .unwrap();
        let out = to_string(&doc);
        assert!(!out.contains("DOCTYPE"));
        assert!(out.contains("<!-- inner -->"));
    }
}
