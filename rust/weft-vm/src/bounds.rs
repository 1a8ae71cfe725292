//! Bounds and live blocks: tracked regions of the output tree.

use crate::dom::{Dom, DomError, NodeId};
use crate::error::EngineError;
use std::cell::RefCell;
use std::rc::Rc;

pub type BlockRef = Rc<RefCell<LiveBlock>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// A component boundary or the root of a render.
    Simple,
    /// A region that can be cleared and re-rendered in place.
    Updatable,
    /// Content inserted into a different element than its logical owner.
    Remote,
    /// A list of item blocks.
    List,
}

/// One endpoint of a block: a node, a run of sibling nodes, or a nested block.
#[derive(Debug, Clone)]
pub enum Bounds {
    Node(NodeId),
    Range(NodeId, NodeId),
    Block(BlockRef),
}

impl Bounds {
    pub fn first_node(&self) -> Result<NodeId, EngineError> {
        match self {
            Bounds::Node(n) | Bounds::Range(n, _) => Ok(*n),
            Bounds::Block(b) => b.borrow().first_node(),
        }
    }

    pub fn last_node(&self) -> Result<NodeId, EngineError> {
        match self {
            Bounds::Node(n) | Bounds::Range(_, n) => Ok(*n),
            Bounds::Block(b) => b.borrow().last_node(),
        }
    }
}

#[derive(Debug)]
pub struct LiveBlock {
    pub kind: BlockKind,
    parent: NodeId,
    first: Option<Bounds>,
    last: Option<Bounds>,
    nesting: usize,
    /// Item blocks, for [`BlockKind::List`].
    pub items: Vec<BlockRef>,
}

impl LiveBlock {
    pub fn new(kind: BlockKind, parent: NodeId) -> Self {
        Self {
            kind,
            parent,
            first: None,
            last: None,
            nesting: 0,
            items: Vec::new(),
        }
    }

    pub fn shared(kind: BlockKind, parent: NodeId) -> BlockRef {
        Rc::new(RefCell::new(Self::new(kind, parent)))
    }

    pub fn parent_element(&self) -> NodeId {
        self.parent
    }

    pub fn is_empty(&self) -> bool {
        match self.kind {
            BlockKind::List => self.items.is_empty(),
            _ => self.first.is_none(),
        }
    }

    pub fn first_node(&self) -> Result<NodeId, EngineError> {
        match self.kind {
            BlockKind::List => match self.items.first() {
                Some(item) => item.borrow().first_node(),
                None => Err(EngineError::Missing("first node of an empty list block")),
            },
            _ => match &self.first {
                Some(b) => b.first_node(),
                None => Err(EngineError::Missing("first node of a block that is still initializing")),
            },
        }
    }

    pub fn last_node(&self) -> Result<NodeId, EngineError> {
        match self.kind {
            BlockKind::List => match self.items.last() {
                Some(item) => item.borrow().last_node(),
                None => Err(EngineError::Missing("last node of an empty list block")),
            },
            _ => match &self.last {
                Some(b) => b.last_node(),
                None => Err(EngineError::Missing("last node of a block that is still initializing")),
            },
        }
    }

    // ------------------------------------------------------------------
    // Builder protocol
    // ------------------------------------------------------------------

    pub fn open_element(&mut self, element: NodeId) {
        self.did_append_node(element);
        self.nesting += 1;
    }

    pub fn close_element(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    pub fn did_append_node(&mut self, node: NodeId) {
        if self.nesting != 0 {
            return;
        }
        if self.first.is_none() {
            self.first = Some(Bounds::Node(node));
        }
        self.last = Some(Bounds::Node(node));
    }

    pub fn did_append_bounds(&mut self, bounds: Bounds) {
        if self.nesting != 0 {
            return;
        }
        if self.kind == BlockKind::List {
            if let Bounds::Block(item) = bounds {
                self.items.push(item);
            }
            return;
        }
        if self.first.is_none() {
            self.first = Some(bounds.clone());
        }
        self.last = Some(bounds);
    }

    /// Clears the nodes this block owns and forgets its endpoints. Returns the
    /// node that followed the block, which is where re-rendered content goes.
    pub fn reset(&mut self, dom: &mut dyn Dom) -> Result<Option<NodeId>, EngineError> {
        let next = if self.is_empty() { None } else { clear(dom, self)? };
        self.forget();
        Ok(next)
    }

    /// Drops the endpoints without touching the tree.
    pub fn forget(&mut self) {
        self.first = None;
        self.last = None;
        self.nesting = 0;
        self.items.clear();
    }
}

/// The siblings just outside a block, taken while its bounds are intact.
/// Clearing through a fence works even after an update left the block's own
/// endpoints half rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fence {
    parent: NodeId,
    before: Option<NodeId>,
    after: Option<NodeId>,
}

impl Fence {
    pub fn around(dom: &dyn Dom, block: &LiveBlock) -> Result<Self, EngineError> {
        let first = block.first_node()?;
        let last = block.last_node()?;
        Ok(Self {
            parent: block.parent_element(),
            before: dom.previous_sibling(first),
            after: dom.next_sibling(last),
        })
    }

    /// Removes every node between the posts and returns the one after them.
    pub fn clear(&self, dom: &mut dyn Dom) -> Result<Option<NodeId>, EngineError> {
        let mut node = match self.before {
            Some(before) => dom.next_sibling(before),
            None => dom.first_child(self.parent),
        };
        while let Some(current) = node {
            if Some(current) == self.after {
                break;
            }
            node = dom.next_sibling(current);
            dom.remove_child(self.parent, current)?;
        }
        Ok(self.after)
    }
}

/// Removes every node between the block's first and last node, inclusive.
/// Returns the sibling that followed the last node.
pub fn clear(dom: &mut dyn Dom, block: &LiveBlock) -> Result<Option<NodeId>, EngineError> {
    let parent = block.parent_element();
    let first = block.first_node()?;
    let last = block.last_node()?;
    remove_range(dom, parent, first, last)
}

pub fn remove_range(dom: &mut dyn Dom, parent: NodeId, first: NodeId, last: NodeId) -> Result<Option<NodeId>, EngineError> {
    let mut node = first;
    loop {
        let next = dom.next_sibling(node);
        dom.remove_child(parent, node)?;
        if node == last {
            return Ok(next);
        }
        node = next.ok_or(EngineError::Dom(DomError::NotAChild { parent, child: last }))?;
    }
}

/// Moves the block's nodes before `reference`, preserving their order.
pub fn move_block(dom: &mut dyn Dom, block: &LiveBlock, reference: Option<NodeId>) -> Result<(), EngineError> {
    let parent = block.parent_element();
    let first = block.first_node()?;
    let last = block.last_node()?;
    let mut node = first;
    loop {
        let next = dom.next_sibling(node);
        dom.insert_before(parent, node, reference)?;
        if node == last {
            return Ok(());
        }
        node = next.ok_or(EngineError::Dom(DomError::NotAChild { parent, child: last }))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    fn doc_with(texts: &[&str]) -> (Document, NodeId, Vec<NodeId>) {
        let mut doc = Document::new();
        let root = doc.create_root("div");
        let nodes = texts
            .iter()
            .map(|t| {
                let n = doc.create_text(t);
                doc.insert_before(root, n, None).unwrap();
                n
            })
            .collect();
        (doc, root, nodes)
    }

    #[test]
    fn appends_inside_nested_elements_do_not_move_bounds() {
        let mut block = LiveBlock::new(BlockKind::Simple, NodeId(1));
        block.did_append_node(NodeId(5));
        block.open_element(NodeId(6));
        block.did_append_node(NodeId(8));
        block.close_element();
        block.did_append_node(NodeId(7));
        assert_eq!(block.first_node().unwrap(), NodeId(5));
        assert_eq!(block.last_node().unwrap(), NodeId(7));
    }

    #[test]
    fn nested_block_bounds_resolve_lazily() {
        let inner = LiveBlock::shared(BlockKind::Updatable, NodeId(1));
        let mut outer = LiveBlock::new(BlockKind::Simple, NodeId(1));
        outer.did_append_bounds(Bounds::Block(inner.clone()));
        assert!(outer.first_node().is_err());
        inner.borrow_mut().did_append_node(NodeId(9));
        assert_eq!(outer.first_node().unwrap(), NodeId(9));
    }

    #[test]
    fn clear_removes_exactly_the_range() {
        let (mut doc, root, n) = doc_with(&["a", "b", "c", "d"]);
        let mut block = LiveBlock::new(BlockKind::Updatable, root);
        block.did_append_node(n[1]);
        block.did_append_node(n[2]);
        let next = clear(&mut doc, &block).unwrap();
        assert_eq!(next, Some(n[3]));
        assert_eq!(doc.inner_html(root), "ad");
    }

    #[test]
    fn reset_returns_the_insertion_point_and_empties_the_block() {
        let (mut doc, root, n) = doc_with(&["a", "b", "c"]);
        let mut block = LiveBlock::new(BlockKind::Updatable, root);
        block.did_append_node(n[0]);
        block.did_append_node(n[1]);
        assert_eq!(block.reset(&mut doc).unwrap(), Some(n[2]));
        assert!(block.is_empty());
        assert_eq!(doc.inner_html(root), "c");
    }

    #[test]
    fn fences_clear_what_lies_between_them_after_the_block_changed() {
        let (mut doc, root, n) = doc_with(&["a", "b", "c", "d"]);
        let mut block = LiveBlock::new(BlockKind::Updatable, root);
        block.did_append_node(n[1]);
        block.did_append_node(n[2]);
        let fence = Fence::around(&doc, &block).unwrap();
        // A partial update swapped the block's nodes and forgot its endpoints.
        doc.remove_child(root, n[2]).unwrap();
        let stray = doc.create_text("x");
        doc.insert_before(root, stray, Some(n[3])).unwrap();
        block.forget();
        assert_eq!(fence.clear(&mut doc).unwrap(), Some(n[3]));
        assert_eq!(doc.inner_html(root), "ad");
    }

    #[test]
    fn fences_at_the_edges_of_the_parent() {
        let (mut doc, root, n) = doc_with(&["a", "b"]);
        let mut block = LiveBlock::new(BlockKind::Updatable, root);
        block.did_append_node(n[0]);
        block.did_append_node(n[1]);
        let fence = Fence::around(&doc, &block).unwrap();
        assert_eq!(fence.clear(&mut doc).unwrap(), None);
        assert_eq!(doc.inner_html(root), "");
    }

    #[test]
    fn move_block_keeps_order() {
        let (mut doc, root, n) = doc_with(&["a", "b", "c", "d"]);
        let mut block = LiveBlock::new(BlockKind::Updatable, root);
        block.did_append_node(n[2]);
        block.did_append_node(n[3]);
        move_block(&mut doc, &block, Some(n[0])).unwrap();
        assert_eq!(doc.inner_html(root), "cdab");
    }

    #[test]
    fn list_bounds_span_their_items() {
        let a = LiveBlock::shared(BlockKind::Updatable, NodeId(1));
        a.borrow_mut().did_append_node(NodeId(3));
        let b = LiveBlock::shared(BlockKind::Updatable, NodeId(1));
        b.borrow_mut().did_append_node(NodeId(4));
        let mut list = LiveBlock::new(BlockKind::List, NodeId(1));
        assert!(list.first_node().is_err());
        list.did_append_bounds(Bounds::Block(a));
        list.did_append_bounds(Bounds::Block(b));
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.first_node().unwrap(), NodeId(3));
        assert_eq!(list.last_node().unwrap(), NodeId(4));
    }
}
