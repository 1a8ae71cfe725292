//! The host delegate contract and an in-memory implementation of it.

pub mod document;
pub mod html;

pub use document::{Document, MutationStats};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";
pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
pub const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// Handle to a node owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Element,
    Text,
    Comment,
    Document,
    DocumentFragment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: String,
    pub value: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node {0:?} does not exist")]
    UnknownNode(NodeId),
    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("node {0:?} cannot have children")]
    NotAContainer(NodeId),
    #[error("inserting {node:?} into {parent:?} would create a cycle")]
    Cycle { parent: NodeId, node: NodeId },
}

/// Tree construction and mutation primitives the reconciler needs from its
/// host, plus the read-only traversal used by rehydration and bounds
/// bookkeeping.
pub trait Dom {
    fn create_element(&mut self, tag: &str, namespace: Option<&str>) -> NodeId;
    fn create_text(&mut self, text: &str) -> NodeId;
    fn create_comment(&mut self, text: &str) -> NodeId;

    /// Inserts `node` into `parent` before `reference` (or at the end).
    /// A document fragment moves its children instead of itself.
    fn insert_before(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>) -> Result<(), DomError>;
    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError>;

    fn set_attribute(&mut self, element: NodeId, name: &str, value: &str, namespace: Option<&str>);
    fn remove_attribute(&mut self, element: NodeId, name: &str);

    /// Replaces the value of a text or comment node.
    fn set_text(&mut self, node: NodeId, text: &str);

    /// Parses `html` and inserts the resulting nodes before `reference`.
    /// Returns the first and last inserted node. Empty markup inserts an
    /// empty comment so the range is never empty.
    fn insert_html_before(&mut self, parent: NodeId, reference: Option<NodeId>, html: &str) -> Result<(NodeId, NodeId), DomError>;

    // Traversal
    fn node_type(&self, node: NodeId) -> NodeType;
    fn parent_node(&self, node: NodeId) -> Option<NodeId>;
    fn first_child(&self, node: NodeId) -> Option<NodeId>;
    fn last_child(&self, node: NodeId) -> Option<NodeId>;
    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;
    fn previous_sibling(&self, node: NodeId) -> Option<NodeId>;
    /// Text of a text or comment node.
    fn node_value(&self, node: NodeId) -> Option<String>;
    /// Lower-case tag name of an element as written in its namespace.
    fn tag_name(&self, node: NodeId) -> Option<String>;
    fn namespace(&self, node: NodeId) -> Option<String>;
    fn attributes(&self, node: NodeId) -> Vec<Attr>;
    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.attributes(node).into_iter().find(|a| a.name == name).map(|a| a.value)
    }
}

/// Depth-first search for the first element below `root` matching `pred`.
pub fn find_element(dom: &dyn Dom, root: NodeId, pred: &dyn Fn(&dyn Dom, NodeId) -> bool) -> Option<NodeId> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node != root && dom.node_type(node) == NodeType::Element && pred(dom, node) {
            return Some(node);
        }
        let mut child = dom.last_child(node);
        while let Some(c) = child {
            stack.push(c);
            child = dom.previous_sibling(c);
        }
    }
    None
}
