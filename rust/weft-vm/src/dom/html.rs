//! A small HTML fragment parser and serializer.
//!
//! Good enough for trusted-HTML insertion, loading server output for
//! rehydration, and asserting on rendered markup. It understands comments,
//! void elements, raw-text `script`/`style`, the SVG namespace and the
//! implied `<tbody>` inside tables.

use super::{Dom, DomError, NodeId, NodeType, SVG_NAMESPACE};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str())
}

// ----------------------------------------------------------------------
// Parsing
// ----------------------------------------------------------------------

/// Parses `html` into detached top-level nodes (their descendants attached).
pub fn parse_fragment(dom: &mut dyn Dom, html: &str) -> Result<Vec<NodeId>, DomError> {
    let mut parser = Parser {
        src: html,
        pos: 0,
        roots: Vec::new(),
        open: Vec::new(),
    };
    parser.run(dom)?;
    Ok(parser.roots)
}

struct Open {
    node: NodeId,
    tag: String,
    svg: bool,
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    roots: Vec<NodeId>,
    open: Vec<Open>,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn attach(&mut self, dom: &mut dyn Dom, node: NodeId) -> Result<(), DomError> {
        match self.open.last() {
            Some(parent) => dom.insert_before(parent.node, node, None),
            None => {
                self.roots.push(node);
                Ok(())
            }
        }
    }

    fn run(&mut self, dom: &mut dyn Dom) -> Result<(), DomError> {
        while self.pos < self.src.len() {
            let rest = self.rest();
            if rest.starts_with("<!--") {
                let body_start = self.pos + 4;
                let end = self.src[body_start..].find("-->").map(|i| body_start + i).unwrap_or(self.src.len());
                let text = &self.src[body_start..end];
                let node = dom.create_comment(text);
                self.attach(dom, node)?;
                self.pos = (end + 3).min(self.src.len());
            } else if rest.starts_with("</") {
                let end = rest.find('>').map(|i| self.pos + i).unwrap_or(self.src.len());
                let name = self.src[self.pos + 2..end].trim().to_string();
                self.close(&name);
                self.pos = (end + 1).min(self.src.len());
            } else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                self.start_tag(dom)?;
            } else {
                let first = rest.chars().next().map(char::len_utf8).unwrap_or(1);
                let end = rest[first..].find('<').map(|i| self.pos + first + i).unwrap_or(self.src.len());
                let text = decode_entities(&self.src[self.pos..end]);
                let node = dom.create_text(&text);
                self.attach(dom, node)?;
                self.pos = end;
            }
        }
        Ok(())
    }

    fn start_tag(&mut self, dom: &mut dyn Dom) -> Result<(), DomError> {
        self.pos += 1;
        let name_len = self.rest().find(|c: char| c.is_whitespace() || c == '>' || c == '/').unwrap_or(self.rest().len());
        let raw_name = self.rest()[..name_len].to_string();
        self.pos += name_len;

        let parent_svg = self.open.last().map(|o| o.svg && o.tag != "foreignObject").unwrap_or(false);
        let svg = parent_svg || raw_name.eq_ignore_ascii_case("svg");
        let tag = if svg { raw_name.clone() } else { raw_name.to_ascii_lowercase() };

        let attrs = self.attributes();
        let self_closing = self.rest().starts_with("/>");
        self.pos = (self.pos + if self_closing { 2 } else { 1 }).min(self.src.len());

        if tag == "tr" && self.open.last().map(|o| o.tag == "table").unwrap_or(false) {
            let tbody = dom.create_element("tbody", None);
            self.attach(dom, tbody)?;
            self.open.push(Open {
                node: tbody,
                tag: "tbody".into(),
                svg: false,
            });
        }

        let namespace = if svg { Some(SVG_NAMESPACE) } else { None };
        let element = dom.create_element(&tag, namespace);
        for (name, value) in attrs {
            dom.set_attribute(element, &name, &value, None);
        }
        self.attach(dom, element)?;

        if self_closing || (!svg && is_void(&tag)) {
            return Ok(());
        }
        if !svg && (tag == "script" || tag == "style") {
            let close = format!("</{}", tag);
            let end = self.rest().to_ascii_lowercase().find(&close).map(|i| self.pos + i).unwrap_or(self.src.len());
            let body = &self.src[self.pos..end];
            if !body.is_empty() {
                let text = dom.create_text(body);
                dom.insert_before(element, text, None)?;
            }
            self.pos = end;
            if self.pos < self.src.len() {
                let gt = self.rest().find('>').map(|i| self.pos + i + 1).unwrap_or(self.src.len());
                self.pos = gt;
            }
            return Ok(());
        }
        self.open.push(Open { node: element, tag, svg });
        Ok(())
    }

    fn attributes(&mut self) -> Vec<(String, String)> {
        let mut attrs = Vec::new();
        loop {
            let trimmed = self.rest().trim_start();
            self.pos = self.src.len() - trimmed.len();
            if trimmed.is_empty() || trimmed.starts_with('>') || trimmed.starts_with("/>") {
                return attrs;
            }
            let name_len = trimmed
                .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
                .unwrap_or(trimmed.len())
                .max(1);
            let name = trimmed[..name_len].to_string();
            self.pos += name_len;
            let after = self.rest().trim_start();
            if let Some(value_part) = after.strip_prefix('=') {
                let value_part = value_part.trim_start();
                self.pos = self.src.len() - value_part.len();
                let value = if let Some(q) = value_part.chars().next().filter(|c| *c == '"' || *c == '\'') {
                    let inner = &value_part[1..];
                    let end = inner.find(q).unwrap_or(inner.len());
                    self.pos += 1 + end + 1;
                    self.pos = self.pos.min(self.src.len());
                    decode_entities(&inner[..end])
                } else {
                    let end = value_part.find(|c: char| c.is_whitespace() || c == '>').unwrap_or(value_part.len());
                    self.pos += end;
                    decode_entities(&value_part[..end])
                };
                attrs.push((name, value));
            } else {
                attrs.push((name, String::new()));
            }
        }
    }

    fn close(&mut self, name: &str) {
        if let Some(index) = self.open.iter().rposition(|o| o.tag.eq_ignore_ascii_case(name)) {
            self.open.truncate(index);
        }
    }
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

// ----------------------------------------------------------------------
// Serialization
// ----------------------------------------------------------------------

pub fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

/// Markup for the children of `node`.
pub fn inner_html(dom: &dyn Dom, node: NodeId) -> String {
    let mut out = String::new();
    let mut child = dom.first_child(node);
    while let Some(c) = child {
        write_node(dom, c, &mut out);
        child = dom.next_sibling(c);
    }
    out
}

/// Markup for `node` itself.
pub fn outer_html(dom: &dyn Dom, node: NodeId) -> String {
    let mut out = String::new();
    write_node(dom, node, &mut out);
    out
}

fn write_node(dom: &dyn Dom, node: NodeId, out: &mut String) {
    match dom.node_type(node) {
        NodeType::Text => {
            let text = dom.node_value(node).unwrap_or_default();
            let raw = dom
                .parent_node(node)
                .and_then(|p| dom.tag_name(p))
                .map(|t| t == "script" || t == "style")
                .unwrap_or(false);
            if raw {
                out.push_str(&text);
            } else {
                out.push_str(&escape_text(&text));
            }
        }
        NodeType::Comment => {
            out.push_str("<!--");
            out.push_str(&dom.node_value(node).unwrap_or_default());
            out.push_str("-->");
        }
        NodeType::Element => {
            let tag = dom.tag_name(node).unwrap_or_default();
            out.push('<');
            out.push_str(&tag);
            for attr in dom.attributes(node) {
                out.push(' ');
                out.push_str(&attr.name);
                out.push_str("=\"");
                out.push_str(&escape_attr(&attr.value));
                out.push('"');
            }
            out.push('>');
            if is_void(&tag) && dom.namespace(node).is_none() {
                return;
            }
            out.push_str(&inner_html(dom, node));
            out.push_str("</");
            out.push_str(&tag);
            out.push('>');
        }
        NodeType::Document | NodeType::DocumentFragment => out.push_str(&inner_html(dom, node)),
    }
}
