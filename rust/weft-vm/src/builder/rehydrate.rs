//! Rehydration: adopting the nodes of a serialized render.
//!
//! Each cursor carries a `candidate`, the next existing node that may be
//! reused. Structural comments (`%+b:N%`, `%-b:N%`, `%glmr%`, `%|%`, `% %`)
//! are consumed as they are matched. On a mismatch everything up to the end
//! of the enclosing block is removed and rehydration is disabled for that
//! cursor until the matching close-block comment comes back into view.

use super::{Cursor, ElementBuilder, InsertBefore};
use crate::bounds::{BlockKind, BlockRef, Bounds, LiveBlock};
use crate::dom::{find_element, Dom, NodeId, NodeType, SVG_NAMESPACE};
use crate::error::{EngineError, VmError};
use tracing::trace;

const OPEN_BLOCK: &str = "%+b:";
const CLOSE_BLOCK: &str = "%-b:";
pub(crate) const HTML_MARKER: &str = "%glmr%";
pub(crate) const SEPARATOR: &str = "%|%";
pub(crate) const EMPTY: &str = "% %";

fn comment_text(dom: &dyn Dom, node: NodeId) -> Option<String> {
    (dom.node_type(node) == NodeType::Comment).then(|| dom.node_value(node)).flatten()
}

fn is_comment_with(dom: &dyn Dom, node: NodeId, text: &str) -> bool {
    comment_text(dom, node).as_deref() == Some(text)
}

fn is_open_block(dom: &dyn Dom, node: NodeId) -> bool {
    comment_text(dom, node).is_some_and(|t| t.starts_with(OPEN_BLOCK))
}

fn is_close_block(dom: &dyn Dom, node: NodeId) -> bool {
    comment_text(dom, node).is_some_and(|t| t.starts_with(CLOSE_BLOCK))
}

/// Depth encoded in a block comment.
fn block_depth(dom: &dyn Dom, node: NodeId) -> i64 {
    let text = comment_text(dom, node).unwrap_or_default();
    let digits: String = text.chars().skip(OPEN_BLOCK.len()).take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

fn is_same_node_type(dom: &dyn Dom, candidate: NodeId, tag: &str) -> bool {
    let Some(name) = dom.tag_name(candidate) else {
        return false;
    };
    if dom.namespace(candidate).as_deref() == Some(SVG_NAMESPACE) {
        name == tag
    } else {
        name.eq_ignore_ascii_case(tag)
    }
}

/// Detaches `node` and returns the sibling that followed it.
fn remove(dom: &mut dyn Dom, node: NodeId) -> Result<Option<NodeId>, EngineError> {
    let parent = dom.parent_node(node).ok_or(EngineError::Missing("parent of a node being removed"))?;
    let next = dom.next_sibling(node);
    dom.remove_child(parent, node)?;
    Ok(next)
}

impl ElementBuilder {
    fn candidate(&self) -> Option<NodeId> {
        self.cursors.last().and_then(|c| c.candidate)
    }

    fn set_candidate(&mut self, node: Option<NodeId>) -> Result<(), EngineError> {
        self.cursor_mut()?.candidate = node;
        Ok(())
    }

    fn disable_rehydration(&mut self, next_sibling: Option<NodeId>) -> Result<(), EngineError> {
        let cursor = self.cursor_mut()?;
        cursor.candidate = None;
        cursor.next_sibling = next_sibling;
        Ok(())
    }

    fn enable_rehydration(&mut self, candidate: Option<NodeId>) -> Result<(), EngineError> {
        let cursor = self.cursor_mut()?;
        cursor.candidate = candidate;
        cursor.next_sibling = None;
        Ok(())
    }

    fn depth_with_offset(&self, dom: &dyn Dom, node: NodeId) -> i64 {
        block_depth(dom, node) - self.starting_block_offset
    }

    /// Locates the first open-block comment under the root element. A
    /// serialized subtree that does not start at depth zero gets a synthetic
    /// enclosing block so that depths line up with a fresh render.
    pub(super) fn start_rehydration(&mut self, dom: &mut dyn Dom, next_sibling: Option<NodeId>) -> Result<(), VmError> {
        if next_sibling.is_some() {
            return Err(VmError::invariant("rehydration into the middle of an element is not supported"));
        }
        let element = self.element()?;
        let mut node = dom.first_child(element);
        while let Some(n) = node {
            if is_open_block(dom, n) {
                break;
            }
            node = dom.next_sibling(n);
        }
        let open = node.ok_or_else(|| VmError::invariant("rehydration requires an opening block comment"))?;

        let offset = block_depth(dom, open);
        if offset == 0 {
            self.starting_block_offset = 0;
            self.set_candidate(Some(open))?;
            return Ok(());
        }

        let depth = offset - 1;
        let synthetic_open = dom.create_comment(&format!("{OPEN_BLOCK}{depth}%"));
        dom.insert_before(element, synthetic_open, Some(open))?;
        let mut closing = dom.next_sibling(open);
        while let Some(c) = closing {
            if is_close_block(dom, c) && block_depth(dom, c) == offset {
                break;
            }
            closing = dom.next_sibling(c);
        }
        let closing = closing.ok_or_else(|| VmError::invariant("rehydration requires a closing block comment"))?;
        let synthetic_close = dom.create_comment(&format!("{CLOSE_BLOCK}{depth}%"));
        let after = dom.next_sibling(closing);
        dom.insert_before(element, synthetic_close, after)?;
        self.set_candidate(Some(synthetic_open))?;
        self.starting_block_offset = depth;
        Ok(())
    }

    /// Removes nodes from `candidate` up to the end of the enclosing block
    /// (or element), then switches the cursor to plain insertion there.
    fn clear_mismatch(&mut self, dom: &mut dyn Dom, candidate: NodeId) -> Result<(), VmError> {
        let (open_depth, starting_depth) = {
            let cursor = self.cursor()?;
            (cursor.open_block_depth, cursor.starting_block_depth)
        };
        trace!(?candidate, open_depth, "clearing rehydration mismatch");
        let mut current = Some(candidate);
        if open_depth >= starting_depth {
            while let Some(node) = current {
                if is_close_block(dom, node) && open_depth >= self.depth_with_offset(dom, node) {
                    break;
                }
                current = remove(dom, node)?;
            }
        } else {
            while let Some(node) = current {
                current = remove(dom, node)?;
            }
        }
        self.disable_rehydration(current)?;
        Ok(())
    }

    pub(super) fn rehydrate_open_block(&mut self, dom: &mut dyn Dom) -> Result<(), VmError> {
        if self.cursors.is_empty() {
            return Ok(());
        }
        let depth = self.block_depth;
        self.block_depth += 1;
        let Some(candidate) = self.candidate() else {
            return Ok(());
        };
        if is_open_block(dom, candidate) && self.depth_with_offset(dom, candidate) == depth {
            let next = remove(dom, candidate)?;
            let cursor = self.cursor_mut()?;
            cursor.candidate = next;
            cursor.open_block_depth = depth;
        } else if !self.in_raw_text(dom) {
            self.clear_mismatch(dom, candidate)?;
        }
        Ok(())
    }

    pub(super) fn rehydrate_close_block(&mut self, dom: &mut dyn Dom) -> Result<(), VmError> {
        if self.cursors.is_empty() {
            return Ok(());
        }
        let open_depth = self.cursor()?.open_block_depth;
        self.block_depth -= 1;

        let mut rehydrating = false;
        if let Some(candidate) = self.candidate() {
            rehydrating = true;
            if is_close_block(dom, candidate) && self.depth_with_offset(dom, candidate) == open_depth {
                let next = remove(dom, candidate)?;
                let cursor = self.cursor_mut()?;
                cursor.candidate = next;
                cursor.open_block_depth -= 1;
            } else {
                self.clear_mismatch(dom, candidate)?;
                rehydrating = false;
            }
        }

        if !rehydrating {
            let next = self.cursor()?.next_sibling;
            if let Some(next) = next {
                if is_close_block(dom, next) && self.depth_with_offset(dom, next) == self.block_depth {
                    let candidate = remove(dom, next)?;
                    self.enable_rehydration(candidate)?;
                    self.cursor_mut()?.open_block_depth -= 1;
                }
            }
        }
        Ok(())
    }

    pub(super) fn rehydrate_open_element(&mut self, dom: &mut dyn Dom, tag: &str) -> Result<NodeId, VmError> {
        loop {
            let Some(candidate) = self.candidate() else {
                break;
            };
            if dom.node_type(candidate) == NodeType::Element {
                if is_same_node_type(dom, candidate, tag) {
                    self.unmatched_attributes = Some(dom.attributes(candidate));
                    return Ok(candidate);
                }
                // The parser implied a tbody that the template does not open.
                let implied_tbody = dom.tag_name(candidate).is_some_and(|t| t.eq_ignore_ascii_case("tbody"));
                if implied_tbody {
                    self.push_element(dom, candidate, None);
                    self.cursor_mut()?.injected_omitted_node = true;
                    continue;
                }
            }
            self.clear_mismatch(dom, candidate)?;
            break;
        }
        Ok(self.create_element(dom, tag)?)
    }

    pub(super) fn rehydrate_will_close_element(&mut self, dom: &mut dyn Dom) -> Result<(), VmError> {
        if let Some(candidate) = self.candidate() {
            self.clear_mismatch(dom, candidate)?;
        }
        if self.cursor()?.injected_omitted_node {
            self.pop_element()?;
        }
        Ok(())
    }

    pub(super) fn rehydrate_append_text(&mut self, dom: &mut dyn Dom, text: &str) -> Result<NodeId, VmError> {
        while let Some(candidate) = self.candidate() {
            if dom.node_type(candidate) == NodeType::Text {
                if dom.node_value(candidate).as_deref() != Some(text) {
                    dom.set_text(candidate, text);
                }
                self.set_candidate(dom.next_sibling(candidate))?;
                return Ok(candidate);
            }
            if is_comment_with(dom, candidate, SEPARATOR) || (text.is_empty() && is_comment_with(dom, candidate, EMPTY)) {
                let next = remove(dom, candidate)?;
                self.set_candidate(next)?;
                continue;
            }
            self.clear_mismatch(dom, candidate)?;
            break;
        }
        self.insert_text(dom, text)
    }

    pub(super) fn rehydrate_append_comment(&mut self, dom: &mut dyn Dom, text: &str) -> Result<NodeId, VmError> {
        if let Some(candidate) = self.candidate() {
            if dom.node_type(candidate) == NodeType::Comment {
                if dom.node_value(candidate).as_deref() != Some(text) {
                    dom.set_text(candidate, text);
                }
                self.set_candidate(dom.next_sibling(candidate))?;
                return Ok(candidate);
            }
            self.clear_mismatch(dom, candidate)?;
        }
        self.insert_comment(dom, text)
    }

    /// Trusted HTML is serialized between a pair of `%glmr%` comments. The
    /// markers are dropped and the content between them adopted. Empty
    /// content was serialized as a `% %` comment, which becomes the
    /// placeholder comment a client render would have produced.
    pub(super) fn rehydrate_append_html(&mut self, dom: &mut dyn Dom, html: &str) -> Result<Bounds, VmError> {
        let Some(first) = self.candidate().filter(|c| is_comment_with(dom, *c, HTML_MARKER)) else {
            if let Some(candidate) = self.candidate() {
                self.clear_mismatch(dom, candidate)?;
            }
            return self.insert_html(dom, html);
        };
        let mut last = dom.next_sibling(first);
        while let Some(node) = last {
            if is_comment_with(dom, node, HTML_MARKER) {
                break;
            }
            last = dom.next_sibling(node);
        }
        let last = last.ok_or_else(|| VmError::invariant("unpaired trusted HTML marker"))?;

        let content_first = dom.next_sibling(first).filter(|n| *n != last);
        let content_last = dom.previous_sibling(last).filter(|n| *n != first);
        remove(dom, first)?;
        let after = remove(dom, last)?;

        match (content_first, content_last) {
            (Some(start), Some(end)) => {
                if start == end && is_comment_with(dom, start, EMPTY) {
                    dom.set_text(start, "");
                }
                Ok(Bounds::Range(start, end))
            }
            _ => {
                let (start, end) = dom.insert_html_before(self.element()?, after, html)?;
                Ok(Bounds::Range(start, end))
            }
        }
    }

    pub(super) fn rehydrate_push_remote_element(
        &mut self,
        dom: &mut dyn Dom,
        element: NodeId,
        guid: &str,
        insert_before: InsertBefore,
    ) -> Result<BlockRef, VmError> {
        let marker = find_element(dom, element, &|d: &dyn Dom, n: NodeId| {
            d.tag_name(n).is_some_and(|t| t.eq_ignore_ascii_case("script")) && d.get_attribute(n, "glmr").as_deref() == Some(guid)
        });
        if let Some(m) = marker {
            if dom.parent_node(m) != Some(element) {
                return Err(VmError::invariant("remote element marker is not a direct child of its element"));
            }
        }

        if insert_before == InsertBefore::Replace {
            while let Some(child) = dom.first_child(element) {
                if Some(child) == marker {
                    break;
                }
                dom.remove_child(element, child)?;
            }
        }

        let mut cursor = Cursor::new(element, None, self.block_depth);
        cursor.remote = true;
        self.cursors.push(cursor);
        match marker {
            Some(m) => {
                let next = remove(dom, m)?;
                self.set_candidate(next)?;
            }
            None => self.disable_rehydration(insert_before.reference())?,
        }

        let block = LiveBlock::shared(BlockKind::Remote, element);
        self.push_live_block(dom, block, true)
    }

    /// Before inserting content that has no serialized form to adopt.
    pub(super) fn rehydrate_abandon_candidate(&mut self, dom: &mut dyn Dom) -> Result<(), VmError> {
        if let Some(candidate) = self.candidate() {
            self.clear_mismatch(dom, candidate)?;
        }
        Ok(())
    }
}
