//! In-memory document: a node arena implementing [`Dom`].
//!
//! Nodes are never freed; removal only detaches them. Every mutation is
//! counted in [`MutationStats`] so tests and tooling can check how much work
//! a render pass did.

use super::html;
use super::{Attr, Dom, DomError, NodeId, NodeType};
use serde::Serialize;

#[derive(Debug, Clone)]
enum NodeData {
    Document,
    Fragment,
    Element {
        tag: String,
        namespace: Option<String>,
        attrs: Vec<Attr>,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            data,
            parent: None,
            first_child: None,
            last_child: None,
            prev: None,
            next: None,
        }
    }
}

/// Counts of host mutations performed against a [`Document`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationStats {
    pub elements_created: usize,
    pub texts_created: usize,
    pub comments_created: usize,
    pub inserts: usize,
    pub removals: usize,
    pub attributes_set: usize,
    pub attributes_removed: usize,
    pub text_updates: usize,
    pub html_inserts: usize,
}

impl MutationStats {
    pub fn nodes_created(&self) -> usize {
        self.elements_created + self.texts_created + self.comments_created
    }

    pub fn total(&self) -> usize {
        self.nodes_created()
            + self.inserts
            + self.removals
            + self.attributes_set
            + self.attributes_removed
            + self.text_updates
            + self.html_inserts
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    stats: MutationStats,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeData::Document)],
            root: NodeId(0),
            stats: MutationStats::default(),
        }
    }

    /// The document node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn stats(&self) -> &MutationStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = MutationStats::default();
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.alloc(NodeData::Fragment)
    }

    /// Creates a `<tag>` appended to the document node.
    pub fn create_root(&mut self, tag: &str) -> NodeId {
        let element = self.create_element(tag, None);
        let root = self.root;
        self.link(root, element, None);
        element
    }

    /// Replaces the children of `element` with parsed `html`.
    pub fn set_inner_html(&mut self, element: NodeId, html: &str) -> Result<(), DomError> {
        while let Some(child) = self.first_child(element) {
            self.remove_child(element, child)?;
        }
        for node in html::parse_fragment(self, html)? {
            self.insert_before(element, node, None)?;
        }
        Ok(())
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        html::inner_html(self, node)
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        html::outer_html(self, node)
    }

    /// Concatenated text of every text node below `node`.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        if let NodeData::Text(t) = &self.node(node).data {
            out.push_str(t);
        }
        let mut child = self.node(node).first_child;
        while let Some(c) = child {
            self.collect_text(c, out);
            child = self.node(c).next;
        }
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut child = self.node(node).first_child;
        while let Some(c) = child {
            out.push(c);
            child = self.node(c).next;
        }
        out
    }

    // ------------------------------------------------------------------
    // Arena internals
    // ------------------------------------------------------------------

    fn alloc(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node::new(data));
        NodeId(self.nodes.len() - 1)
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn exists(&self, id: NodeId) -> Result<(), DomError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(DomError::UnknownNode(id))
        }
    }

    fn is_container(&self, id: NodeId) -> bool {
        matches!(
            self.node(id).data,
            NodeData::Document | NodeData::Fragment | NodeData::Element { .. }
        )
    }

    fn is_ancestor(&self, candidate: NodeId, of: NodeId) -> bool {
        let mut cursor = Some(of);
        while let Some(c) = cursor {
            if c == candidate {
                return true;
            }
            cursor = self.node(c).parent;
        }
        false
    }

    fn unlink(&mut self, child: NodeId) {
        let (parent, prev, next) = {
            let n = self.node(child);
            (n.parent, n.prev, n.next)
        };
        let Some(parent) = parent else { return };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.node_mut(parent).first_child = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.node_mut(parent).last_child = prev,
        }
        let n = self.node_mut(child);
        n.parent = None;
        n.prev = None;
        n.next = None;
    }

    fn link(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        let prev = match reference {
            Some(r) => self.node(r).prev,
            None => self.node(parent).last_child,
        };
        {
            let n = self.node_mut(child);
            n.parent = Some(parent);
            n.prev = prev;
            n.next = reference;
        }
        match prev {
            Some(p) => self.node_mut(p).next = Some(child),
            None => self.node_mut(parent).first_child = Some(child),
        }
        match reference {
            Some(r) => self.node_mut(r).prev = Some(child),
            None => self.node_mut(parent).last_child = Some(child),
        }
    }
}

impl Dom for Document {
    fn create_element(&mut self, tag: &str, namespace: Option<&str>) -> NodeId {
        self.stats.elements_created += 1;
        self.alloc(NodeData::Element {
            tag: tag.to_string(),
            namespace: namespace.map(str::to_string),
            attrs: Vec::new(),
        })
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.stats.texts_created += 1;
        self.alloc(NodeData::Text(text.to_string()))
    }

    fn create_comment(&mut self, text: &str) -> NodeId {
        self.stats.comments_created += 1;
        self.alloc(NodeData::Comment(text.to_string()))
    }

    fn insert_before(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>) -> Result<(), DomError> {
        self.exists(parent)?;
        self.exists(node)?;
        if !self.is_container(parent) {
            return Err(DomError::NotAContainer(parent));
        }
        if let Some(r) = reference {
            self.exists(r)?;
            if self.node(r).parent != Some(parent) {
                return Err(DomError::NotAChild { parent, child: r });
            }
            if r == node {
                return Ok(());
            }
        }
        if self.is_ancestor(node, parent) {
            return Err(DomError::Cycle { parent, node });
        }

        if matches!(self.node(node).data, NodeData::Fragment) {
            for child in self.children(node) {
                self.unlink(child);
                self.link(parent, child, reference);
                self.stats.inserts += 1;
            }
            return Ok(());
        }

        self.unlink(node);
        self.link(parent, node, reference);
        self.stats.inserts += 1;
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.exists(parent)?;
        self.exists(child)?;
        if self.node(child).parent != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        self.unlink(child);
        self.stats.removals += 1;
        Ok(())
    }

    fn set_attribute(&mut self, element: NodeId, name: &str, value: &str, namespace: Option<&str>) {
        self.stats.attributes_set += 1;
        if let NodeData::Element { attrs, .. } = &mut self.node_mut(element).data {
            match attrs.iter_mut().find(|a| a.name == name) {
                Some(existing) => {
                    existing.value = value.to_string();
                    existing.namespace = namespace.map(str::to_string);
                }
                None => attrs.push(Attr {
                    name: name.to_string(),
                    value: value.to_string(),
                    namespace: namespace.map(str::to_string),
                }),
            }
        }
    }

    fn remove_attribute(&mut self, element: NodeId, name: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[element.0].data {
            let before = attrs.len();
            attrs.retain(|a| a.name != name);
            if attrs.len() != before {
                self.stats.attributes_removed += 1;
            }
        }
    }

    fn set_text(&mut self, node: NodeId, text: &str) {
        self.stats.text_updates += 1;
        match &mut self.node_mut(node).data {
            NodeData::Text(t) | NodeData::Comment(t) => *t = text.to_string(),
            _ => {}
        }
    }

    fn insert_html_before(&mut self, parent: NodeId, reference: Option<NodeId>, html: &str) -> Result<(NodeId, NodeId), DomError> {
        self.stats.html_inserts += 1;
        if html.is_empty() {
            let comment = self.create_comment("");
            self.insert_before(parent, comment, reference)?;
            return Ok((comment, comment));
        }
        let nodes = html::parse_fragment(self, html)?;
        for node in &nodes {
            self.insert_before(parent, *node, reference)?;
        }
        match (nodes.first(), nodes.last()) {
            (Some(first), Some(last)) => Ok((*first, *last)),
            _ => {
                let comment = self.create_comment("");
                self.insert_before(parent, comment, reference)?;
                Ok((comment, comment))
            }
        }
    }

    fn node_type(&self, node: NodeId) -> NodeType {
        match self.node(node).data {
            NodeData::Document => NodeType::Document,
            NodeData::Fragment => NodeType::DocumentFragment,
            NodeData::Element { .. } => NodeType::Element,
            NodeData::Text(_) => NodeType::Text,
            NodeData::Comment(_) => NodeType::Comment,
        }
    }

    fn parent_node(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).parent
    }

    fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).first_child
    }

    fn last_child(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).last_child
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).next
    }

    fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).prev
    }

    fn node_value(&self, node: NodeId) -> Option<String> {
        match &self.node(node).data {
            NodeData::Text(t) | NodeData::Comment(t) => Some(t.clone()),
            _ => None,
        }
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        match &self.node(node).data {
            NodeData::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    fn namespace(&self, node: NodeId) -> Option<String> {
        match &self.node(node).data {
            NodeData::Element { namespace, .. } => namespace.clone(),
            _ => None,
        }
    }

    fn attributes(&self, node: NodeId) -> Vec<Attr> {
        match &self.node(node).data {
            NodeData::Element { attrs, .. } => attrs.clone(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove_maintain_sibling_links() {
        let mut doc = Document::new();
        let root = doc.create_root("div");
        let a = doc.create_text("a");
        let c = doc.create_text("c");
        doc.insert_before(root, a, None).unwrap();
        doc.insert_before(root, c, None).unwrap();
        let b = doc.create_text("b");
        doc.insert_before(root, b, Some(c)).unwrap();

        assert_eq!(doc.children(root), vec![a, b, c]);
        assert_eq!(doc.previous_sibling(c), Some(b));
        assert_eq!(doc.next_sibling(a), Some(b));

        doc.remove_child(root, b).unwrap();
        assert_eq!(doc.children(root), vec![a, c]);
        assert_eq!(doc.next_sibling(a), Some(c));
        assert_eq!(doc.parent_node(b), None);
    }

    #[test]
    fn reinserting_moves_instead_of_duplicating() {
        let mut doc = Document::new();
        let root = doc.create_root("div");
        let a = doc.create_text("a");
        let b = doc.create_text("b");
        doc.insert_before(root, a, None).unwrap();
        doc.insert_before(root, b, None).unwrap();
        doc.insert_before(root, b, Some(a)).unwrap();
        assert_eq!(doc.children(root), vec![b, a]);
    }

    #[test]
    fn fragments_move_their_children() {
        let mut doc = Document::new();
        let root = doc.create_root("div");
        let frag = doc.create_fragment();
        let x = doc.create_text("x");
        let y = doc.create_text("y");
        doc.insert_before(frag, x, None).unwrap();
        doc.insert_before(frag, y, None).unwrap();
        doc.insert_before(root, frag, None).unwrap();
        assert_eq!(doc.children(root), vec![x, y]);
        assert!(doc.children(frag).is_empty());
    }

    #[test]
    fn structural_errors_are_reported() {
        let mut doc = Document::new();
        let root = doc.create_root("div");
        let inner = doc.create_element("span", None);
        doc.insert_before(root, inner, None).unwrap();
        let text = doc.create_text("t");

        assert_eq!(doc.insert_before(text, inner, None), Err(DomError::NotAContainer(text)));
        assert_eq!(doc.insert_before(inner, root, None), Err(DomError::Cycle { parent: inner, node: root }));
        assert_eq!(doc.remove_child(inner, text), Err(DomError::NotAChild { parent: inner, child: text }));
    }

    #[test]
    fn stats_count_every_mutation() {
        let mut doc = Document::new();
        let root = doc.create_root("div");
        doc.reset_stats();
        let t = doc.create_text("x");
        doc.insert_before(root, t, None).unwrap();
        doc.set_text(t, "y");
        doc.set_attribute(root, "id", "r", None);
        doc.remove_attribute(root, "id");
        doc.remove_attribute(root, "missing");
        let stats = doc.stats();
        assert_eq!(stats.texts_created, 1);
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.text_updates, 1);
        assert_eq!(stats.attributes_set, 1);
        assert_eq!(stats.attributes_removed, 1);
        assert_eq!(stats.total(), 5);
    }

    #[test]
    fn empty_trusted_html_inserts_a_placeholder_comment() {
        let mut doc = Document::new();
        let root = doc.create_root("div");
        let (first, last) = doc.insert_html_before(root, None, "").unwrap();
        assert_eq!(first, last);
        assert_eq!(doc.node_type(first), NodeType::Comment);
        assert_eq!(doc.inner_html(root), "<!---->");
    }

    #[test]
    fn trusted_html_returns_its_range() {
        let mut doc = Document::new();
        let root = doc.create_root("div");
        let tail = doc.create_text("!");
        doc.insert_before(root, tail, None).unwrap();
        let (first, last) = doc.insert_html_before(root, Some(tail), "<b>a</b>c").unwrap();
        assert_eq!(doc.tag_name(first).as_deref(), Some("b"));
        assert_eq!(doc.node_value(last).as_deref(), Some("c"));
        assert_eq!(doc.inner_html(root), "<b>a</b>c!");
    }
}
