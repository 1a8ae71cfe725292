//! The element builder.
//!
//! Receives construction calls from the append VM and turns them into host
//! tree mutations, maintaining a stack of insertion cursors, a stack of live
//! blocks recording which nodes each region owns, and the modifiers of every
//! open element. The same builder runs in three modes:
//!
//! - [`RenderMode::Client`] creates nodes directly;
//! - [`RenderMode::Serialize`] additionally emits the comment markers that
//!   describe block structure (see [`serialize`]);
//! - [`RenderMode::Rehydrate`] walks a serialized tree and adopts matching
//!   nodes instead of creating new ones (see [`rehydrate`]).

pub mod attributes;
mod rehydrate;
mod serialize;

pub use attributes::DynamicAttribute;

use crate::bounds::{BlockKind, BlockRef, Bounds, LiveBlock};
use crate::dom::{Attr, Dom, NodeId, SVG_NAMESPACE};
use crate::environment::RenderMode;
use crate::error::{EngineError, VmError};
use crate::managers::ElementModifier;
use crate::values::Value;
use std::collections::HashSet;
use tracing::trace;

/// Where remote content goes inside its destination element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertBefore {
    /// Clear the destination, then append.
    Replace,
    /// Append after the existing children.
    Append,
    Before(NodeId),
}

impl InsertBefore {
    fn reference(self) -> Option<NodeId> {
        match self {
            InsertBefore::Before(node) => Some(node),
            _ => None,
        }
    }
}

/// An insertion point. The rehydration fields are unused in other modes.
#[derive(Debug, Clone)]
struct Cursor {
    element: NodeId,
    next_sibling: Option<NodeId>,
    candidate: Option<NodeId>,
    open_block_depth: i64,
    starting_block_depth: i64,
    injected_omitted_node: bool,
    /// Pushed for a remote element rather than an element being built.
    remote: bool,
}

impl Cursor {
    fn new(element: NodeId, next_sibling: Option<NodeId>, starting_block_depth: i64) -> Self {
        Self {
            element,
            next_sibling,
            candidate: None,
            open_block_depth: starting_block_depth - 1,
            starting_block_depth,
            injected_omitted_node: false,
            remote: false,
        }
    }
}

const SVG_INTEGRATION_POINTS: &[&str] = &["foreignObject", "desc", "title"];

pub struct ElementBuilder {
    mode: RenderMode,
    cursors: Vec<Cursor>,
    blocks: Vec<BlockRef>,
    modifiers: Vec<Vec<ElementModifier>>,
    constructing: Option<NodeId>,
    // Rehydration state.
    unmatched_attributes: Option<Vec<Attr>>,
    block_depth: i64,
    starting_block_offset: i64,
    // Serialization state.
    serialize_block_depth: i64,
    extra_close: HashSet<NodeId>,
}

impl ElementBuilder {
    fn bare(mode: RenderMode, element: NodeId, next_sibling: Option<NodeId>) -> Self {
        Self {
            mode,
            cursors: vec![Cursor::new(element, next_sibling, 0)],
            blocks: Vec::new(),
            modifiers: Vec::new(),
            constructing: None,
            unmatched_attributes: None,
            block_depth: 0,
            starting_block_offset: 0,
            serialize_block_depth: 0,
            extra_close: HashSet::new(),
        }
    }

    /// A builder appending into `element` before `next_sibling`, with a root
    /// simple block already open.
    pub fn for_initial_render(
        dom: &mut dyn Dom,
        mode: RenderMode,
        element: NodeId,
        next_sibling: Option<NodeId>,
    ) -> Result<Self, VmError> {
        let mut builder = Self::bare(mode, element, next_sibling);
        if mode == RenderMode::Rehydrate {
            builder.start_rehydration(dom, next_sibling)?;
        }
        builder.push_simple_block(dom)?;
        Ok(builder)
    }

    /// A client builder that clears `block` and appends into its old place,
    /// with `block` reopened on top of a root simple block.
    pub fn resume(dom: &mut dyn Dom, block: &BlockRef) -> Result<Self, VmError> {
        let next_sibling = block.borrow_mut().reset(dom)?;
        Self::resume_before(dom, block, next_sibling)
    }

    /// Reopens `block`, whose nodes are already gone, appending before
    /// `next_sibling`.
    pub fn resume_before(dom: &mut dyn Dom, block: &BlockRef, next_sibling: Option<NodeId>) -> Result<Self, VmError> {
        let parent = block.borrow().parent_element();
        block.borrow_mut().forget();
        let mut builder = Self::bare(RenderMode::Client, parent, next_sibling);
        builder.push_simple_block(dom)?;
        builder.push_live_block(dom, block.clone(), false)?;
        Ok(builder)
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    fn cursor(&self) -> Result<&Cursor, EngineError> {
        self.cursors.last().ok_or(EngineError::Missing("insertion cursor"))
    }

    fn cursor_mut(&mut self) -> Result<&mut Cursor, EngineError> {
        self.cursors.last_mut().ok_or(EngineError::Missing("insertion cursor"))
    }

    pub fn element(&self) -> Result<NodeId, EngineError> {
        Ok(self.cursor()?.element)
    }

    pub fn next_sibling(&self) -> Result<Option<NodeId>, EngineError> {
        Ok(self.cursor()?.next_sibling)
    }

    pub fn constructing(&self) -> Result<NodeId, EngineError> {
        self.constructing.ok_or(EngineError::Missing("element under construction"))
    }

    pub fn cursor_depth(&self) -> usize {
        self.cursors.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The outermost open block.
    pub fn root_block(&self) -> Option<BlockRef> {
        self.blocks.first().cloned()
    }

    fn current_block(&self) -> Result<&BlockRef, EngineError> {
        self.blocks.last().ok_or(EngineError::Missing("live block"))
    }

    fn element_tag(&self, dom: &dyn Dom) -> String {
        self.cursor()
            .ok()
            .and_then(|c| dom.tag_name(c.element))
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    /// Raw-text containers never receive structural markers.
    fn in_raw_text(&self, dom: &dyn Dom) -> bool {
        matches!(self.element_tag(dom).as_str(), "title" | "script" | "style")
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    pub fn push_simple_block(&mut self, dom: &mut dyn Dom) -> Result<BlockRef, VmError> {
        let block = LiveBlock::shared(BlockKind::Simple, self.element()?);
        self.push_live_block(dom, block, false)
    }

    pub fn push_updatable_block(&mut self, dom: &mut dyn Dom) -> Result<BlockRef, VmError> {
        let block = LiveBlock::shared(BlockKind::Updatable, self.element()?);
        self.push_live_block(dom, block, false)
    }

    pub fn push_block_list(&mut self, dom: &mut dyn Dom) -> Result<BlockRef, VmError> {
        let block = LiveBlock::shared(BlockKind::List, self.element()?);
        self.push_live_block(dom, block, false)
    }

    /// Opens `block`. Unless it is remote, the enclosing block records it as
    /// its next piece of content.
    pub fn push_live_block(&mut self, dom: &mut dyn Dom, block: BlockRef, remote: bool) -> Result<BlockRef, VmError> {
        if !remote {
            if let Some(current) = self.blocks.last() {
                current.borrow_mut().did_append_bounds(Bounds::Block(block.clone()));
            }
        }
        self.open_block(dom)?;
        self.blocks.push(block.clone());
        Ok(block)
    }

    /// Closes the current block. A block that rendered nothing gets an empty
    /// comment so that it always has a position in the tree.
    pub fn pop_block(&mut self, dom: &mut dyn Dom) -> Result<BlockRef, VmError> {
        let block = self.current_block()?.clone();
        let needs_placeholder = {
            let b = block.borrow();
            b.kind != BlockKind::List && b.is_empty()
        };
        if needs_placeholder {
            self.append_comment(dom, "")?;
        }
        self.close_block(dom)?;
        self.blocks.pop();
        Ok(block)
    }

    fn open_block(&mut self, dom: &mut dyn Dom) -> Result<(), VmError> {
        match self.mode {
            RenderMode::Client => Ok(()),
            RenderMode::Serialize => self.serialize_open_block(dom),
            RenderMode::Rehydrate => self.rehydrate_open_block(dom),
        }
    }

    fn close_block(&mut self, dom: &mut dyn Dom) -> Result<(), VmError> {
        match self.mode {
            RenderMode::Client => Ok(()),
            RenderMode::Serialize => self.serialize_close_block(dom),
            RenderMode::Rehydrate => self.rehydrate_close_block(dom),
        }
    }

    // ------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------

    pub fn open_element(&mut self, dom: &mut dyn Dom, tag: &str) -> Result<NodeId, VmError> {
        let element = match self.mode {
            RenderMode::Client => self.create_element(dom, tag)?,
            RenderMode::Serialize => self.serialize_open_element(dom, tag)?,
            RenderMode::Rehydrate => self.rehydrate_open_element(dom, tag)?,
        };
        self.constructing = Some(element);
        Ok(element)
    }

    /// Creates an element, choosing the SVG namespace from the tag and the
    /// current parent.
    fn create_element(&self, dom: &mut dyn Dom, tag: &str) -> Result<NodeId, EngineError> {
        let parent = self.element()?;
        let parent_tag = dom.tag_name(parent).unwrap_or_default();
        let in_svg = dom.namespace(parent).as_deref() == Some(SVG_NAMESPACE) || tag == "svg";
        let integration_point = SVG_INTEGRATION_POINTS.contains(&parent_tag.as_str());
        let namespace = (in_svg && !integration_point).then_some(SVG_NAMESPACE);
        Ok(dom.create_element(tag, namespace))
    }

    /// Inserts the element under construction and makes it the insertion
    /// point. `modifiers` are returned again when the element closes.
    pub fn flush_element(&mut self, dom: &mut dyn Dom, modifiers: Vec<ElementModifier>) -> Result<(), VmError> {
        let parent = self.element()?;
        let element = self.constructing()?;
        match self.unmatched_attributes.take() {
            Some(unmatched) => {
                for attr in unmatched {
                    dom.remove_attribute(element, &attr.name);
                }
            }
            None => dom.insert_before(parent, element, self.next_sibling()?)?,
        }
        self.constructing = None;
        self.modifiers.push(modifiers);
        self.push_element(dom, element, None);
        self.current_block()?.borrow_mut().open_element(element);
        Ok(())
    }

    pub fn close_element(&mut self, dom: &mut dyn Dom) -> Result<Vec<ElementModifier>, VmError> {
        if self.mode == RenderMode::Serialize {
            let element = self.element()?;
            if self.extra_close.remove(&element) {
                self.close_one_element(dom)?;
            }
        }
        self.close_one_element(dom)
    }

    fn close_one_element(&mut self, dom: &mut dyn Dom) -> Result<Vec<ElementModifier>, VmError> {
        if self.mode == RenderMode::Rehydrate {
            self.rehydrate_will_close_element(dom)?;
        }
        self.current_block()?.borrow_mut().close_element();
        self.pop_element()?;
        Ok(self.modifiers.pop().unwrap_or_default())
    }

    fn push_element(&mut self, dom: &dyn Dom, element: NodeId, next_sibling: Option<NodeId>) {
        let mut cursor = Cursor::new(element, next_sibling, self.block_depth);
        if let Some(parent) = self.cursors.last_mut() {
            if parent.candidate.is_some() {
                cursor.candidate = dom.first_child(element);
                parent.candidate = dom.next_sibling(element);
            }
        }
        self.cursors.push(cursor);
    }

    fn pop_element(&mut self) -> Result<(), EngineError> {
        if self.cursors.len() <= 1 {
            return Err(EngineError::FrameImbalance("cannot pop past the root insertion cursor"));
        }
        self.cursors.pop();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remote elements
    // ------------------------------------------------------------------

    pub fn push_remote_element(
        &mut self,
        dom: &mut dyn Dom,
        element: NodeId,
        guid: &str,
        insert_before: InsertBefore,
    ) -> Result<BlockRef, VmError> {
        match self.mode {
            RenderMode::Client => self.client_push_remote_element(dom, element, insert_before),
            RenderMode::Serialize => self.serialize_push_remote_element(dom, element, guid, insert_before),
            RenderMode::Rehydrate => self.rehydrate_push_remote_element(dom, element, guid, insert_before),
        }
    }

    fn client_push_remote_element(
        &mut self,
        dom: &mut dyn Dom,
        element: NodeId,
        insert_before: InsertBefore,
    ) -> Result<BlockRef, VmError> {
        self.push_element(dom, element, insert_before.reference());
        self.cursor_mut()?.remote = true;
        if insert_before == InsertBefore::Replace {
            while let Some(child) = dom.last_child(element) {
                dom.remove_child(element, child)?;
            }
        }
        let block = LiveBlock::shared(BlockKind::Remote, element);
        self.push_live_block(dom, block, true)
    }

    pub fn pop_remote_element(&mut self, dom: &mut dyn Dom) -> Result<BlockRef, VmError> {
        let block = self.pop_block(dom)?;
        if block.borrow().kind != BlockKind::Remote {
            return Err(VmError::invariant("popped a non-remote block as a remote element"));
        }
        self.pop_element()?;
        Ok(block)
    }

    /// Closes whatever was opened after a checkpoint taken when the builder
    /// had `cursors` cursors and `blocks` blocks. Blocks are finalized as if
    /// they had closed normally; the nodes already inserted stay in place.
    pub fn unwind_to(&mut self, dom: &mut dyn Dom, cursors: usize, blocks: usize) -> Result<(), VmError> {
        if let Some(element) = self.constructing.take() {
            trace!(?element, "dropping element under construction");
        }
        self.unmatched_attributes = None;
        while self.blocks.len() > blocks || self.cursors.len() > cursors {
            let block_first = self.blocks.len() > blocks
                && (self.cursors.len() <= cursors || self.current_block()?.borrow().parent_element() == self.element()?);
            if block_first {
                self.pop_block(dom)?;
                continue;
            }
            let element = self.element()?;
            self.extra_close.remove(&element);
            if self.cursor()?.remote {
                self.pop_element()?;
            } else {
                self.close_one_element(dom)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    fn did_append_node(&mut self, node: NodeId) -> Result<(), EngineError> {
        self.current_block()?.borrow_mut().did_append_node(node);
        Ok(())
    }

    fn did_append_bounds(&mut self, dom: &dyn Dom, bounds: Bounds) -> Result<(), VmError> {
        self.current_block()?.borrow_mut().did_append_bounds(bounds.clone());
        if self.mode == RenderMode::Rehydrate && self.cursor()?.candidate.is_some() {
            let last = bounds.last_node()?;
            self.cursor_mut()?.candidate = dom.next_sibling(last);
        }
        Ok(())
    }

    fn insert_text(&mut self, dom: &mut dyn Dom, text: &str) -> Result<NodeId, VmError> {
        let (element, next) = (self.element()?, self.next_sibling()?);
        let node = dom.create_text(text);
        dom.insert_before(element, node, next)?;
        Ok(node)
    }

    fn insert_comment(&mut self, dom: &mut dyn Dom, text: &str) -> Result<NodeId, VmError> {
        let (element, next) = (self.element()?, self.next_sibling()?);
        let node = dom.create_comment(text);
        dom.insert_before(element, node, next)?;
        Ok(node)
    }

    fn insert_html(&mut self, dom: &mut dyn Dom, html: &str) -> Result<Bounds, VmError> {
        let (element, next) = (self.element()?, self.next_sibling()?);
        let (first, last) = dom.insert_html_before(element, next, html)?;
        Ok(Bounds::Range(first, last))
    }

    pub fn append_text(&mut self, dom: &mut dyn Dom, text: &str) -> Result<NodeId, VmError> {
        let node = match self.mode {
            RenderMode::Client => self.insert_text(dom, text)?,
            RenderMode::Serialize => self.serialize_append_text(dom, text)?,
            RenderMode::Rehydrate => self.rehydrate_append_text(dom, text)?,
        };
        self.did_append_node(node)?;
        Ok(node)
    }

    pub fn append_comment(&mut self, dom: &mut dyn Dom, text: &str) -> Result<NodeId, VmError> {
        let node = match self.mode {
            RenderMode::Rehydrate => self.rehydrate_append_comment(dom, text)?,
            _ => self.insert_comment(dom, text)?,
        };
        self.did_append_node(node)?;
        Ok(node)
    }

    /// Text whose value may change later. Returns the node to update.
    pub fn append_dynamic_text(&mut self, dom: &mut dyn Dom, text: &str) -> Result<NodeId, VmError> {
        self.append_text(dom, text)
    }

    pub fn append_dynamic_html(&mut self, dom: &mut dyn Dom, html: &str) -> Result<Bounds, VmError> {
        let bounds = match self.mode {
            RenderMode::Client => self.insert_html(dom, html)?,
            RenderMode::Serialize => self.serialize_append_html(dom, html)?,
            RenderMode::Rehydrate => self.rehydrate_append_html(dom, html)?,
        };
        self.did_append_bounds(dom, bounds.clone())?;
        Ok(bounds)
    }

    /// Moves the children of a detached fragment into place.
    pub fn append_dynamic_fragment(&mut self, dom: &mut dyn Dom, fragment: NodeId) -> Result<Bounds, VmError> {
        if self.mode == RenderMode::Rehydrate {
            self.rehydrate_abandon_candidate(dom)?;
        }
        let bounds = match (dom.first_child(fragment), dom.last_child(fragment)) {
            (Some(first), Some(last)) => {
                let (element, next) = (self.element()?, self.next_sibling()?);
                dom.insert_before(element, fragment, next)?;
                Bounds::Range(first, last)
            }
            _ => {
                let comment = self.insert_comment(dom, "")?;
                Bounds::Range(comment, comment)
            }
        };
        self.did_append_bounds(dom, bounds.clone())?;
        Ok(bounds)
    }

    pub fn append_dynamic_node(&mut self, dom: &mut dyn Dom, node: NodeId) -> Result<Bounds, VmError> {
        let adopted = match self.mode {
            RenderMode::Rehydrate => self.cursor()?.candidate,
            _ => None,
        };
        let node = match adopted {
            Some(candidate) => candidate,
            None => {
                let (element, next) = (self.element()?, self.next_sibling()?);
                dom.insert_before(element, node, next)?;
                node
            }
        };
        let bounds = Bounds::Range(node, node);
        self.did_append_bounds(dom, bounds.clone())?;
        Ok(bounds)
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    fn write_attribute(&mut self, dom: &mut dyn Dom, name: &str, value: &str, namespace: Option<&str>) -> Result<(), EngineError> {
        let element = self.constructing()?;
        if let Some(unmatched) = self.unmatched_attributes.as_mut() {
            if let Some(index) = unmatched.iter().position(|a| a.name == name) {
                let existing = unmatched.remove(index);
                if existing.value != value {
                    dom.set_attribute(element, name, value, namespace);
                }
                return Ok(());
            }
        }
        dom.set_attribute(element, name, value, namespace);
        Ok(())
    }

    pub fn set_static_attribute(&mut self, dom: &mut dyn Dom, name: &str, value: &str, namespace: Option<&str>) -> Result<(), EngineError> {
        self.write_attribute(dom, name, value, namespace)
    }

    /// Sets the initial value of a dynamic attribute and returns the handle
    /// used to update it, along with the value that was applied.
    pub fn set_dynamic_attribute(
        &mut self,
        dom: &mut dyn Dom,
        name: &str,
        value: &Value,
        trusting: bool,
        namespace: Option<&str>,
    ) -> Result<(DynamicAttribute, Option<String>), EngineError> {
        let element = self.constructing()?;
        let tag = dom.tag_name(element).unwrap_or_default();
        let attribute = DynamicAttribute::new(element, &tag, name, namespace, trusting);
        let normalized = attribute.normalize(value);
        if let Some(v) = &normalized {
            self.write_attribute(dom, name, v, namespace)?;
        }
        Ok((attribute, normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use pretty_assertions::assert_eq;

    fn client(doc: &mut Document) -> (NodeId, ElementBuilder) {
        let root = doc.create_root("div");
        let builder = ElementBuilder::for_initial_render(doc, RenderMode::Client, root, None).unwrap();
        (root, builder)
    }

    #[test]
    fn builds_nested_elements_in_order() {
        let mut doc = Document::new();
        let (root, mut b) = client(&mut doc);
        b.open_element(&mut doc, "p").unwrap();
        b.set_static_attribute(&mut doc, "class", "x", None).unwrap();
        b.flush_element(&mut doc, Vec::new()).unwrap();
        b.append_text(&mut doc, "hi").unwrap();
        b.close_element(&mut doc).unwrap();
        b.append_comment(&mut doc, "c").unwrap();
        let block = b.pop_block(&mut doc).unwrap();
        assert_eq!(doc.inner_html(root), r#"<p class="x">hi</p><!--c-->"#);
        let block = block.borrow();
        assert_eq!(doc.tag_name(block.first_node().unwrap()).as_deref(), Some("p"));
        assert_eq!(doc.node_type(block.last_node().unwrap()), crate::dom::NodeType::Comment);
    }

    #[test]
    fn empty_blocks_get_a_placeholder_comment() {
        let mut doc = Document::new();
        let (root, mut b) = client(&mut doc);
        b.push_updatable_block(&mut doc).unwrap();
        let inner = b.pop_block(&mut doc).unwrap();
        assert_eq!(doc.inner_html(root), "<!---->");
        assert!(!inner.borrow().is_empty());
    }

    #[test]
    fn svg_children_inherit_the_namespace_except_at_integration_points() {
        let mut doc = Document::new();
        let (_root, mut b) = client(&mut doc);
        let svg = b.open_element(&mut doc, "svg").unwrap();
        b.flush_element(&mut doc, Vec::new()).unwrap();
        let circle = b.open_element(&mut doc, "circle").unwrap();
        b.flush_element(&mut doc, Vec::new()).unwrap();
        b.close_element(&mut doc).unwrap();
        b.open_element(&mut doc, "foreignObject").unwrap();
        b.flush_element(&mut doc, Vec::new()).unwrap();
        let div = b.open_element(&mut doc, "div").unwrap();
        assert_eq!(doc.namespace(svg).as_deref(), Some(SVG_NAMESPACE));
        assert_eq!(doc.namespace(circle).as_deref(), Some(SVG_NAMESPACE));
        assert_eq!(doc.namespace(div), None);
    }

    #[test]
    fn remote_replace_clears_the_destination() {
        let mut doc = Document::new();
        let (_root, mut b) = client(&mut doc);
        let target = doc.create_root("section");
        doc.set_inner_html(target, "<i>old</i>").unwrap();
        b.push_remote_element(&mut doc, target, "r1", InsertBefore::Replace).unwrap();
        b.append_text(&mut doc, "new").unwrap();
        b.pop_remote_element(&mut doc).unwrap();
        assert_eq!(doc.inner_html(target), "new");
    }

    #[test]
    fn resume_reuses_the_position_of_the_cleared_block() {
        let mut doc = Document::new();
        let (root, mut b) = client(&mut doc);
        b.append_text(&mut doc, "a").unwrap();
        let block = b.push_updatable_block(&mut doc).unwrap();
        b.append_text(&mut doc, "old").unwrap();
        b.pop_block(&mut doc).unwrap();
        b.append_text(&mut doc, "z").unwrap();
        b.pop_block(&mut doc).unwrap();

        let mut resumed = ElementBuilder::resume(&mut doc, &block).unwrap();
        resumed.append_text(&mut doc, "new").unwrap();
        resumed.pop_block(&mut doc).unwrap();
        assert_eq!(doc.inner_html(root), "anewz");
        assert_eq!(doc.node_value(block.borrow().first_node().unwrap()).as_deref(), Some("new"));
    }

    #[test]
    fn unwinding_closes_elements_and_blocks_opened_after_the_checkpoint() {
        let mut doc = Document::new();
        let (root, mut b) = client(&mut doc);
        let (cursors, blocks) = (b.cursor_depth(), b.block_count());
        b.open_element(&mut doc, "ul").unwrap();
        b.flush_element(&mut doc, Vec::new()).unwrap();
        let inner = b.push_updatable_block(&mut doc).unwrap();
        b.open_element(&mut doc, "li").unwrap();
        b.flush_element(&mut doc, Vec::new()).unwrap();
        b.open_element(&mut doc, "span").unwrap();
        b.unwind_to(&mut doc, cursors, blocks).unwrap();
        assert_eq!((b.cursor_depth(), b.block_count()), (cursors, blocks));
        assert!(!inner.borrow().is_empty());
        b.append_text(&mut doc, "after").unwrap();
        b.pop_block(&mut doc).unwrap();
        assert_eq!(doc.inner_html(root), "<ul><li></li></ul>after");
    }

    #[test]
    fn unwinding_leaves_remote_destinations_without_closing_them() {
        let mut doc = Document::new();
        let (_root, mut b) = client(&mut doc);
        let (cursors, blocks) = (b.cursor_depth(), b.block_count());
        let target = doc.create_root("aside");
        b.push_remote_element(&mut doc, target, "r", InsertBefore::Append).unwrap();
        b.append_text(&mut doc, "partial").unwrap();
        b.unwind_to(&mut doc, cursors, blocks).unwrap();
        assert_eq!((b.cursor_depth(), b.block_count()), (cursors, blocks));
        assert_eq!(doc.inner_html(target), "partial");
    }

    #[test]
    fn popping_the_root_cursor_is_an_error() {
        let mut doc = Document::new();
        let (_root, mut b) = client(&mut doc);
        assert!(b.close_element(&mut doc).is_err());
    }
}
