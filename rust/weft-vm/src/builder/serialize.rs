//! Serialization: a client render that leaves markers behind.
//!
//! Blocks are bracketed by `%+b:N%` / `%-b:N%` comments, trusted HTML by a
//! pair of `%glmr%` comments, adjacent text nodes are split by `%|%`, and
//! empty text becomes `% %`. Remote elements get a `<script glmr="guid">`
//! marker at their insertion point.

use super::rehydrate::{EMPTY, HTML_MARKER, SEPARATOR};
use super::{ElementBuilder, InsertBefore};
use crate::bounds::{BlockRef, Bounds};
use crate::dom::{Dom, NodeId, NodeType};
use crate::error::VmError;

impl ElementBuilder {
    /// The node content would be inserted after.
    fn current_node(&self, dom: &dyn Dom) -> Option<NodeId> {
        let cursor = self.cursors.last()?;
        match cursor.next_sibling {
            None => dom.last_child(cursor.element),
            Some(next) => dom.previous_sibling(next),
        }
    }

    pub(super) fn serialize_open_block(&mut self, dom: &mut dyn Dom) -> Result<(), VmError> {
        if !self.in_raw_text(dom) {
            let depth = self.serialize_block_depth;
            self.serialize_block_depth += 1;
            self.insert_comment(dom, &format!("%+b:{depth}%"))?;
        }
        Ok(())
    }

    pub(super) fn serialize_close_block(&mut self, dom: &mut dyn Dom) -> Result<(), VmError> {
        if !self.in_raw_text(dom) {
            self.serialize_block_depth -= 1;
            let depth = self.serialize_block_depth;
            self.insert_comment(dom, &format!("%-b:{depth}%"))?;
        }
        Ok(())
    }

    /// A `tr` directly inside a `table` is wrapped in the `tbody` an HTML
    /// parser would imply, closed again together with the `tr`'s parent.
    pub(super) fn serialize_open_element(&mut self, dom: &mut dyn Dom, tag: &str) -> Result<NodeId, VmError> {
        if tag.eq_ignore_ascii_case("tr") && self.element_tag(dom) == "table" {
            let tbody = self.create_element(dom, "tbody")?;
            self.constructing = Some(tbody);
            self.flush_element(dom, Vec::new())?;
            self.extra_close.insert(tbody);
        }
        Ok(self.create_element(dom, tag)?)
    }

    pub(super) fn serialize_append_text(&mut self, dom: &mut dyn Dom, text: &str) -> Result<NodeId, VmError> {
        if self.in_raw_text(dom) {
            return self.insert_text(dom, text);
        }
        if text.is_empty() {
            return self.insert_comment(dom, EMPTY);
        }
        if self.current_node(dom).is_some_and(|n| dom.node_type(n) == NodeType::Text) {
            self.insert_comment(dom, SEPARATOR)?;
        }
        self.insert_text(dom, text)
    }

    pub(super) fn serialize_append_html(&mut self, dom: &mut dyn Dom, html: &str) -> Result<Bounds, VmError> {
        if self.in_raw_text(dom) {
            return self.insert_html(dom, html);
        }
        let first = self.insert_comment(dom, HTML_MARKER)?;
        let mut markup = html.to_string();
        if self.element_tag(dom) == "table" {
            if let Some(open) = html.find('<') {
                if html[open + 1..].starts_with("tr") {
                    markup = format!("<tbody>{html}</tbody>");
                }
            }
        }
        if markup.is_empty() {
            self.insert_comment(dom, EMPTY)?;
        } else {
            self.insert_html(dom, &markup)?;
        }
        let last = self.insert_comment(dom, HTML_MARKER)?;
        Ok(Bounds::Range(first, last))
    }

    /// Remote content is never cleared while serializing; `Replace` appends.
    pub(super) fn serialize_push_remote_element(
        &mut self,
        dom: &mut dyn Dom,
        element: NodeId,
        guid: &str,
        insert_before: InsertBefore,
    ) -> Result<BlockRef, VmError> {
        let insert_before = match insert_before {
            InsertBefore::Replace => InsertBefore::Append,
            other => other,
        };
        let script = dom.create_element("script", None);
        dom.set_attribute(script, "glmr", guid, None);
        dom.insert_before(element, script, insert_before.reference())?;
        self.client_push_remote_element(dom, element, insert_before)
    }
}
