//! Updating opcodes and the updating pass.
//!
//! The append pass leaves behind a tree of updating opcodes mirroring the
//! block structure it built. A rerender walks that tree in append order.
//! Leaf opcodes patch the node they own when their reference is stale;
//! assertions report [`Flow::Throw`] when a structural decision (a branch, a
//! content type, a list going empty) no longer holds, and the nearest
//! enclosing block clears itself and re-executes from its resume state.
//! User errors travel up as `Err` until a try region catches them.

use super::content::content_type;
use super::list::{self, KeySpec};
use super::low_level::StackValue;
use super::{PendingKind, ResumeState, Vm};
use crate::bounds::{clear, move_block, BlockRef, Fence};
use crate::builder::{DynamicAttribute, ElementBuilder};
use crate::dom::{Dom, NodeId};
use crate::environment::{DebugEvent, Destructor, Environment, RenderMode};
use crate::error::{EngineError, UserError, VmError};
use crate::managers::ModifierInstance;
use crate::reference::Reference;
use crate::validator::{Revision, Revisions};
use crate::values::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use weft_program::Program;

pub struct UpdateContext<'a> {
    pub program: &'a Program,
    pub env: &'a mut Environment,
    pub dom: &'a mut dyn Dom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// A structural assumption failed; the enclosing block must re-render.
    Throw,
}

pub enum UpdatingOpcode {
    Text(TextOpcode),
    Assert(AssertOpcode),
    Attribute(AttributeOpcode),
    Modifier(ModifierOpcode),
    DynamicModifier(DynamicModifierOpcode),
    Block(BlockOpcode),
    Try(TryOpcode),
    List(ListOpcode),
}

impl UpdatingOpcode {
    pub fn name(&self) -> &'static str {
        match self {
            UpdatingOpcode::Text(_) => "text",
            UpdatingOpcode::Assert(_) => "assert",
            UpdatingOpcode::Attribute(_) => "attribute",
            UpdatingOpcode::Modifier(_) => "modifier",
            UpdatingOpcode::DynamicModifier(_) => "dynamic-modifier",
            UpdatingOpcode::Block(_) => "block",
            UpdatingOpcode::Try(_) => "try",
            UpdatingOpcode::List(_) => "list",
        }
    }

    pub fn evaluate(&mut self, cx: &mut UpdateContext<'_>) -> Result<Flow, VmError> {
        match self {
            UpdatingOpcode::Text(op) => op.evaluate(cx),
            UpdatingOpcode::Assert(op) => Ok(op.evaluate(&cx.env.revisions)),
            UpdatingOpcode::Attribute(op) => op.evaluate(cx),
            UpdatingOpcode::Modifier(op) => op.evaluate(cx),
            UpdatingOpcode::DynamicModifier(op) => op.evaluate(cx),
            UpdatingOpcode::Block(op) => op.evaluate(cx),
            UpdatingOpcode::Try(op) => op.evaluate(cx),
            UpdatingOpcode::List(op) => op.evaluate(cx),
        }
    }

    /// Teardown work owned by this opcode and everything below it.
    pub fn collect_destructors(&self, out: &mut Vec<Destructor>) {
        match self {
            UpdatingOpcode::Block(op) => op.collect_destructors(out),
            UpdatingOpcode::Try(op) => op.block.collect_destructors(out),
            UpdatingOpcode::List(op) => {
                for item in &op.items {
                    item.block.collect_destructors(out);
                }
            }
            UpdatingOpcode::DynamicModifier(op) => {
                if let Some(instance) = &op.instance {
                    out.push(Destructor::Modifier(instance.clone()));
                }
            }
            _ => {}
        }
    }
}

/// Runs `opcodes` in order, stopping at the first throw.
pub fn run_opcodes(opcodes: &mut [UpdatingOpcode], cx: &mut UpdateContext<'_>) -> Result<Flow, VmError> {
    for op in opcodes.iter_mut() {
        if op.evaluate(cx)? == Flow::Throw {
            debug!(opcode = op.name(), "updating opcode threw");
            return Ok(Flow::Throw);
        }
    }
    Ok(Flow::Continue)
}

fn is_stale(reference: &Reference, last_revision: Revision, revs: &Revisions) -> bool {
    !revs.validate_tag(&reference.tag(revs), last_revision)
}

/// The revision `reference` was last computed at.
pub fn snapshot(reference: &Reference, revs: &Revisions) -> Revision {
    revs.value_for_tag(&reference.tag(revs))
}

// ----------------------------------------------------------------------
// Leaves
// ----------------------------------------------------------------------

/// Keeps a text node in sync with a reference. The node is patched in
/// place, never replaced.
pub struct TextOpcode {
    pub node: NodeId,
    pub reference: Reference,
    pub last_value: String,
    pub last_revision: Revision,
}

impl TextOpcode {
    fn evaluate(&mut self, cx: &mut UpdateContext<'_>) -> Result<Flow, VmError> {
        let revs = cx.env.revisions.clone();
        if !is_stale(&self.reference, self.last_revision, &revs) {
            return Ok(Flow::Continue);
        }
        let text = self.reference.value(&revs)?.to_text();
        self.last_revision = snapshot(&self.reference, &revs);
        if text != self.last_value {
            cx.dom.set_text(self.node, &text);
            self.last_value = text;
        }
        Ok(Flow::Continue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertKind {
    Truthy,
    Identity,
    ContentType,
    NonEmpty,
}

/// Throws when the observed property of a reference changes.
pub struct AssertOpcode {
    pub reference: Reference,
    pub kind: AssertKind,
    pub last: Value,
    pub last_revision: Revision,
}

impl AssertOpcode {
    pub fn new(reference: Reference, kind: AssertKind, revs: &Revisions) -> Result<Self, UserError> {
        let last = Self::observe(kind, &reference, revs)?;
        let last_revision = snapshot(&reference, revs);
        Ok(Self {
            reference,
            kind,
            last,
            last_revision,
        })
    }

    fn observe(kind: AssertKind, reference: &Reference, revs: &Revisions) -> Result<Value, UserError> {
        let value = reference.value(revs)?;
        Ok(match kind {
            AssertKind::Truthy => Value::Bool(value.is_truthy()),
            AssertKind::Identity => value,
            AssertKind::ContentType => Value::Number(content_type(&value) as u8 as f64),
            AssertKind::NonEmpty => Value::Bool(!list::is_empty(&value, revs)?),
        })
    }

    fn evaluate(&mut self, revs: &Revisions) -> Flow {
        if !is_stale(&self.reference, self.last_revision, revs) {
            return Flow::Continue;
        }
        match Self::observe(self.kind, &self.reference, revs) {
            Ok(value) if value == self.last => {
                self.last_revision = snapshot(&self.reference, revs);
                Flow::Continue
            }
            _ => Flow::Throw,
        }
    }
}

/// A dynamic attribute. The value written at append time counts as applied.
pub struct AttributeOpcode {
    pub attribute: DynamicAttribute,
    pub reference: Reference,
    pub last: Option<String>,
    pub last_revision: Revision,
}

impl AttributeOpcode {
    fn evaluate(&mut self, cx: &mut UpdateContext<'_>) -> Result<Flow, VmError> {
        let revs = cx.env.revisions.clone();
        if !is_stale(&self.reference, self.last_revision, &revs) {
            return Ok(Flow::Continue);
        }
        let value = self.reference.value(&revs)?;
        self.last_revision = snapshot(&self.reference, &revs);
        let normalized = self.attribute.normalize(&value);
        if normalized != self.last {
            self.attribute.apply(cx.dom, normalized.as_deref());
            self.last = normalized;
        }
        Ok(Flow::Continue)
    }
}

/// Schedules an update when a tracked modifier's consumed tags change.
pub struct ModifierOpcode {
    pub instance: ModifierInstance,
    pub last_revision: Revision,
}

impl ModifierOpcode {
    pub fn new(instance: ModifierInstance, revs: &Revisions) -> Self {
        let last_revision = instance.tag().map(|t| revs.value_for_tag(t)).unwrap_or_default();
        Self { instance, last_revision }
    }

    fn evaluate(&mut self, cx: &mut UpdateContext<'_>) -> Result<Flow, VmError> {
        if let Some(tag) = self.instance.tag() {
            let revs = &cx.env.revisions;
            if !revs.validate_tag(tag, self.last_revision) {
                self.last_revision = revs.value_for_tag(tag);
                cx.env.schedule_update_modifier(self.instance.clone())?;
            }
        }
        Ok(Flow::Continue)
    }
}

/// A modifier chosen by a reference. A new definition destroys the old
/// instance and installs a fresh one.
pub struct DynamicModifierOpcode {
    pub element: NodeId,
    pub reference: Reference,
    pub args: crate::args::CapturedArgs,
    pub instance: Option<ModifierInstance>,
    pub last_value: Value,
    pub last_revision: Revision,
    pub modifier_revision: Revision,
}

impl DynamicModifierOpcode {
    pub fn new(
        element: NodeId,
        reference: Reference,
        args: crate::args::CapturedArgs,
        instance: Option<ModifierInstance>,
        revs: &Revisions,
    ) -> Result<Self, UserError> {
        let last_value = reference.value(revs)?;
        let last_revision = snapshot(&reference, revs);
        let modifier_revision = instance
            .as_ref()
            .and_then(|i| i.tag().map(|t| revs.value_for_tag(t)))
            .unwrap_or_default();
        Ok(Self {
            element,
            reference,
            args,
            instance,
            last_value,
            last_revision,
            modifier_revision,
        })
    }

    fn evaluate(&mut self, cx: &mut UpdateContext<'_>) -> Result<Flow, VmError> {
        let revs = cx.env.revisions.clone();
        if is_stale(&self.reference, self.last_revision, &revs) {
            let value = self.reference.value(&revs)?;
            self.last_revision = snapshot(&self.reference, &revs);
            if value != self.last_value {
                if let Some(old) = self.instance.take() {
                    cx.env.schedule_destroy(Destructor::Modifier(old))?;
                }
                let label = self.reference.debug_label();
                self.instance = ModifierInstance::from_value(&value, &label, self.element, &self.args, &revs)?;
                if let Some(instance) = &self.instance {
                    self.modifier_revision = instance.tag().map(|t| revs.value_for_tag(t)).unwrap_or_default();
                    cx.env.schedule_install_modifier(instance.clone())?;
                }
                self.last_value = value;
                return Ok(Flow::Continue);
            }
        }
        if let Some(instance) = &self.instance {
            if let Some(tag) = instance.tag() {
                if !revs.validate_tag(tag, self.modifier_revision) {
                    self.modifier_revision = revs.value_for_tag(tag);
                    cx.env.schedule_update_modifier(instance.clone())?;
                }
            }
        }
        Ok(Flow::Continue)
    }
}

// ----------------------------------------------------------------------
// Blocks
// ----------------------------------------------------------------------

/// A re-renderable region and the opcodes created inside it.
pub struct BlockOpcode {
    pub bounds: BlockRef,
    pub resume: ResumeState,
    pub children: Vec<UpdatingOpcode>,
    pub destructors: Vec<Destructor>,
}

impl BlockOpcode {
    pub fn evaluate(&mut self, cx: &mut UpdateContext<'_>) -> Result<Flow, VmError> {
        if run_opcodes(&mut self.children, cx)? == Flow::Throw {
            self.rerender(cx)?;
        }
        Ok(Flow::Continue)
    }

    pub fn collect_destructors(&self, out: &mut Vec<Destructor>) {
        out.extend(self.destructors.iter().cloned());
        for child in &self.children {
            child.collect_destructors(out);
        }
    }

    /// Tears down the children, clears the block and executes it again from
    /// its resume state.
    pub fn rerender(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), VmError> {
        cx.env.emit(DebugEvent::Rerender { pc: self.resume.pc });
        debug!(pc = self.resume.pc, "re-rendering block");
        let mut destructors = Vec::new();
        self.collect_destructors(&mut destructors);
        for destructor in destructors {
            cx.env.schedule_destroy(destructor)?;
        }
        let builder = ElementBuilder::resume(cx.dom, &self.bounds)?;
        let mut vm = Vm::new(cx.program, cx.env, cx.dom, builder, self.resume.clone(), PendingKind::Resumed);
        self.children.clear();
        self.destructors.clear();
        if let Err(error) = vm.execute() {
            for destructor in vm.abandon() {
                cx.env.schedule_destroy(destructor)?;
            }
            return Err(error);
        }
        let done = vm.finish()?;
        self.children = done.children;
        self.destructors = done.destructors;
        Ok(())
    }
}

/// A try region. A user error raised while updating or re-rendering its
/// children clears the region and renders the handler in its place.
pub struct TryOpcode {
    pub block: BlockOpcode,
    /// Where the handler starts; it expects the message on the stack.
    pub catch: ResumeState,
}

impl TryOpcode {
    fn evaluate(&mut self, cx: &mut UpdateContext<'_>) -> Result<Flow, VmError> {
        let fence = Fence::around(cx.dom, &self.block.bounds.borrow())?;
        match self.block.evaluate(cx) {
            Err(VmError::User(error)) => {
                self.catch(cx, fence, error)?;
                Ok(Flow::Continue)
            }
            other => other,
        }
    }

    fn catch(&mut self, cx: &mut UpdateContext<'_>, fence: Fence, error: UserError) -> Result<(), VmError> {
        warn!(error = %error, "caught error while updating a try region");
        cx.env.emit(DebugEvent::Rerender { pc: self.catch.pc });
        let mut destructors = Vec::new();
        self.block.collect_destructors(&mut destructors);
        for destructor in destructors {
            cx.env.schedule_destroy(destructor)?;
        }
        let next_sibling = fence.clear(cx.dom)?;
        let builder = ElementBuilder::resume_before(cx.dom, &self.block.bounds, next_sibling)?;
        let mut start = self.catch.clone();
        start.stack.push(StackValue::Ref(Reference::constant(Value::string(&error.to_string()))));
        self.block.children.clear();
        self.block.destructors.clear();
        let mut vm = Vm::new(cx.program, cx.env, cx.dom, builder, start, PendingKind::Resumed);
        vm.execute()?;
        let done = vm.finish()?;
        self.block.children = done.children;
        self.block.destructors = done.destructors;
        Ok(())
    }
}

pub struct ListItem {
    pub key: String,
    pub value: Reference,
    pub memo: Reference,
    pub block: BlockOpcode,
}

/// An `{{#each}}` list, reconciled by key when its reference changes.
pub struct ListOpcode {
    pub bounds: BlockRef,
    pub reference: Reference,
    pub key: KeySpec,
    /// Where item bodies start, with the scope they start in.
    pub body: ResumeState,
    pub items: Vec<ListItem>,
    pub last_revision: Revision,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SyncStats {
    retained: usize,
    moved: usize,
    inserted: usize,
    deleted: usize,
}

impl ListOpcode {
    fn evaluate(&mut self, cx: &mut UpdateContext<'_>) -> Result<Flow, VmError> {
        let revs = cx.env.revisions.clone();
        if is_stale(&self.reference, self.last_revision, &revs) {
            self.sync(cx)?;
        }
        for item in &mut self.items {
            item.block.evaluate(cx)?;
        }
        Ok(Flow::Continue)
    }

    fn sync(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), VmError> {
        let revs = cx.env.revisions.clone();
        let value = self.reference.value(&revs)?;
        self.last_revision = snapshot(&self.reference, &revs);
        let entries = list::entries(&value, &self.key, &revs)?;

        let (parent, after_last) = {
            let bounds = self.bounds.borrow();
            let after = if bounds.is_empty() { None } else { cx.dom.next_sibling(bounds.last_node()?) };
            (bounds.parent_element(), after)
        };
        let marker = cx.dom.create_comment("");
        cx.dom.insert_before(parent, marker, after_last)?;

        let positions: HashMap<String, usize> = self.items.iter().enumerate().map(|(i, item)| (item.key.clone(), i)).collect();
        let wanted: HashSet<String> = entries.iter().map(|e| e.key.clone()).collect();
        let mut old: Vec<Option<ListItem>> = std::mem::take(&mut self.items).into_iter().map(Some).collect();
        let mut next_items = Vec::with_capacity(entries.len());
        let mut stats = SyncStats::default();
        let mut cursor = 0;

        for entry in entries {
            // Skip items already placed and items about to be deleted.
            while cursor < old.len() && old[cursor].as_ref().map_or(true, |item| !wanted.contains(&item.key)) {
                cursor += 1;
            }
            let found = positions.get(&entry.key).copied().and_then(|i| old[i].take().map(|item| (i, item)));
            match found {
                Some((index, item)) => {
                    item.value.set(&revs, entry.value);
                    item.memo.set(&revs, entry.memo);
                    if index == cursor {
                        stats.retained += 1;
                        cursor += 1;
                    } else {
                        let reference = Self::reference_node(&old, cursor, marker)?;
                        move_block(cx.dom, &item.block.bounds.borrow(), Some(reference))?;
                        stats.moved += 1;
                    }
                    next_items.push(item);
                }
                None => {
                    let reference = Self::reference_node(&old, cursor, marker)?;
                    let item = match self.insert(cx, entry, parent, reference) {
                        Ok(item) => item,
                        Err(error) => {
                            // Keep every item reachable for teardown.
                            next_items.extend(old.into_iter().flatten());
                            self.items = next_items;
                            return Err(error);
                        }
                    };
                    stats.inserted += 1;
                    next_items.push(item);
                }
            }
        }

        for item in old.into_iter().flatten() {
            let mut destructors = Vec::new();
            item.block.collect_destructors(&mut destructors);
            for destructor in destructors {
                cx.env.schedule_destroy(destructor)?;
            }
            clear(cx.dom, &item.block.bounds.borrow())?;
            stats.deleted += 1;
        }

        cx.dom.remove_child(parent, marker)?;
        self.bounds.borrow_mut().items = next_items.iter().map(|item| item.block.bounds.clone()).collect();
        self.items = next_items;

        debug!(
            retained = stats.retained,
            moved = stats.moved,
            inserted = stats.inserted,
            deleted = stats.deleted,
            "list synced"
        );
        cx.env.emit(DebugEvent::ListSync {
            retained: stats.retained,
            moved: stats.moved,
            inserted: stats.inserted,
            deleted: stats.deleted,
        });
        Ok(())
    }

    /// The node new or moved content goes before: the first unvisited old
    /// item, or the marker when every old item has been visited.
    fn reference_node(old: &[Option<ListItem>], cursor: usize, marker: NodeId) -> Result<NodeId, EngineError> {
        match old.get(cursor).and_then(Option::as_ref) {
            Some(item) => item.block.bounds.borrow().first_node(),
            None => Ok(marker),
        }
    }

    fn insert(&self, cx: &mut UpdateContext<'_>, entry: list::ListEntry, parent: NodeId, before: NodeId) -> Result<ListItem, VmError> {
        let revs = cx.env.revisions.clone();
        let value = Reference::cell(&revs, entry.value);
        let memo = Reference::cell(&revs, entry.memo);
        let builder = ElementBuilder::for_initial_render(cx.dom, RenderMode::Client, parent, Some(before))?;
        let start = ResumeState {
            pc: self.body.pc,
            scope: self.body.scope.clone(),
            stack: vec![StackValue::Ref(value.clone()), StackValue::Ref(memo.clone())],
        };
        let mut vm = Vm::new(cx.program, cx.env, cx.dom, builder, start, PendingKind::Collector { items: Vec::new() });
        vm.enter_item(entry.key, value, memo, self.body.pc)?;
        if let Err(error) = vm.execute() {
            for destructor in vm.abandon() {
                cx.env.schedule_destroy(destructor)?;
            }
            return Err(error);
        }
        match vm.finish()?.kind {
            PendingKind::Collector { mut items } if items.len() == 1 => items.pop().ok_or_else(|| VmError::invariant("no list item")),
            _ => Err(VmError::invariant("list item body did not produce exactly one item")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use crate::managers::Definitions;

    #[test]
    fn text_opcodes_patch_in_place_only_when_the_text_changes() {
        let mut doc = Document::new();
        let root = doc.create_root("div");
        let node = doc.create_text("a");
        doc.insert_before(root, node, None).unwrap();
        let mut env = Environment::new(Definitions::new());
        let revs = env.revisions.clone();
        let cell = Reference::cell(&revs, Value::string("a"));
        let mut op = TextOpcode {
            node,
            reference: cell.clone(),
            last_value: "a".into(),
            last_revision: snapshot(&cell, &revs),
        };
        let program = Program::new(Vec::new(), Vec::new(), Vec::new());
        doc.reset_stats();
        let mut cx = UpdateContext {
            program: &program,
            env: &mut env,
            dom: &mut doc,
        };
        op.evaluate(&mut cx).unwrap();
        cell.set(&revs, Value::string("b"));
        op.evaluate(&mut cx).unwrap();
        assert_eq!(doc.stats().text_updates, 1);
        assert_eq!(doc.text_content(root), "b");
    }

    #[test]
    fn asserts_throw_only_when_the_observation_changes() {
        let revs = Revisions::new();
        let cell = Reference::cell(&revs, Value::Number(1.0));
        let mut op = AssertOpcode::new(cell.clone(), AssertKind::Truthy, &revs).unwrap();
        cell.set(&revs, Value::Number(2.0));
        assert_eq!(op.evaluate(&revs), Flow::Continue);
        cell.set(&revs, Value::Number(0.0));
        assert_eq!(op.evaluate(&revs), Flow::Throw);
    }

    #[test]
    fn non_empty_asserts_follow_list_emptiness() {
        let revs = Revisions::new();
        let cell = Reference::cell(&revs, Value::array(vec![Value::Null]));
        let mut op = AssertOpcode::new(cell.clone(), AssertKind::NonEmpty, &revs).unwrap();
        cell.set(&revs, Value::array(vec![Value::Null, Value::Null]));
        assert_eq!(op.evaluate(&revs), Flow::Continue);
        cell.set(&revs, Value::array(vec![]));
        assert_eq!(op.evaluate(&revs), Flow::Throw);
    }
}
