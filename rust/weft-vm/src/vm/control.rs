//! Blocks, branches, lists, components and introspection.

use super::inspect::ScopeInspector;
use super::list::{self, KeySpec, ListIterator};
use super::low_level::StackValue;
use super::scope::{CapturedBlock, Scope};
use super::update::{snapshot, AssertKind};
use super::{PendingBlock, PendingKind, ResumeState, Vm};
use crate::environment::Destructor;
use crate::error::{UserError, VmError};
use crate::managers::ComponentInstance;
use crate::reference::Reference;
use crate::values::Value;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};
use weft_program::{CurriedKind, Instruction, OpCode};

/// The component a `CloseComponent` closes. `None` when the definition was
/// nullish and nothing was rendered.
#[derive(Debug)]
pub struct ComponentFrame {
    pub instance: Option<Rc<ComponentInstance>>,
}

impl Vm<'_> {
    pub(super) fn control(&mut self, ins: Instruction, at: i64) -> Result<(), VmError> {
        let target = at + i64::from(ins.op1);
        match ins.op {
            OpCode::Enter => {
                let count = usize::try_from(ins.op1).map_err(|_| VmError::invariant("negative enter count"))?;
                let stack = self.inner.capture(count)?;
                self.enter_block(stack)?;
            }
            OpCode::EnterTry => self.enter_try(target)?,
            OpCode::Exit => self.exit_block()?,
            OpCode::JumpIf | OpCode::JumpUnless => {
                let condition = self.inner.pop_ref()?;
                let truthy = condition.value(&self.revisions())?.is_truthy();
                self.assert(condition, AssertKind::Truthy)?;
                if truthy == (ins.op == OpCode::JumpIf) {
                    self.inner.goto(target);
                }
            }
            OpCode::JumpEq => {
                if self.inner.peek_int()? == i64::from(ins.op2) {
                    self.inner.goto(target);
                }
            }
            OpCode::AssertSame => {
                let reference = self.inner.peek_ref()?;
                self.assert(reference, AssertKind::Identity)?;
            }
            OpCode::EnterList => self.enter_list(ins, at)?,
            OpCode::Iterate => {
                let iterator = self.inner.peek_iterator()?;
                let next = iterator.borrow_mut().next_entry();
                match next {
                    None => self.inner.goto(target),
                    Some(entry) => {
                        let revs = self.revisions();
                        let value = Reference::cell(&revs, entry.value);
                        let memo = Reference::cell(&revs, entry.memo);
                        self.inner.push_ref(value.clone());
                        self.inner.push_ref(memo.clone());
                        let body = self.inner.pc();
                        self.enter_item(entry.key, value, memo, body)?;
                    }
                }
            }
            OpCode::ExitList => {
                self.inner.pop_iterator()?;
                self.exit_list()?;
            }
            OpCode::InvokeComponent => {
                let count = usize::try_from(ins.op1).map_err(|_| VmError::invariant("negative block count"))?;
                let mut blocks = Vec::with_capacity(count);
                for _ in 0..count {
                    blocks.push(self.inner.pop_block()?);
                }
                blocks.reverse();
                self.invoke_component(blocks)?;
            }
            OpCode::PushBlock => {
                let params = self
                    .program
                    .numbers(ins.op3)?
                    .iter()
                    .map(|slot| usize::try_from(*slot).map_err(|_| VmError::invariant("negative block parameter slot")))
                    .collect::<Result<Vec<_>, _>>()?;
                let block = CapturedBlock {
                    name: self.program.string(ins.op2)?.to_string(),
                    address: target,
                    scope: self.scopes.current()?.clone(),
                    params,
                };
                self.inner.push(StackValue::Block(Rc::new(block)));
            }
            OpCode::Yield => self.yield_block(ins)?,
            OpCode::HasBlock | OpCode::HasBlockParams => {
                let name = self.program.string(ins.op1)?;
                let present = match self.scopes.current()?.block(name) {
                    Some(block) => ins.op == OpCode::HasBlock || !block.params.is_empty(),
                    None => false,
                };
                self.inner.push_ref(Reference::constant(Value::Bool(present)));
            }
            OpCode::CloseComponent => {
                let frame = self.inner.pop_component()?;
                if let Some(instance) = &frame.instance {
                    self.scopes.pop()?;
                    self.builder.pop_block(self.dom)?;
                    if instance.has_lifecycle() {
                        self.env.did_create(instance.clone())?;
                    }
                }
            }
            OpCode::Debugger => self.debugger(ins)?,
            OpCode::Log => {
                let args = self.inner.pop_args()?;
                let evaluated = args.evaluate(&self.revisions())?;
                let line = evaluated.positional.iter().map(Value::to_text).collect::<Vec<_>>().join(" ");
                info!(target: "weft::log", "{}", line);
                self.env.output.push(line);
            }
            other => return Err(VmError::invariant(format!("{} is not a control operation", other.name()))),
        }
        Ok(())
    }

    /// Opens a list over the popped reference, or jumps to the else branch
    /// when it has no items.
    fn enter_list(&mut self, ins: Instruction, at: i64) -> Result<(), VmError> {
        let reference = self.inner.pop_ref()?;
        let revs = self.revisions();
        let value = reference.value(&revs)?;
        let key = KeySpec::parse(self.program.string(ins.op3)?);
        let entries = list::entries(&value, &key, &revs).map_err(|e| e.at(reference.debug_label()))?;
        let last_revision = snapshot(&reference, &revs);
        self.assert(reference.clone(), AssertKind::NonEmpty)?;
        if entries.is_empty() {
            self.inner.goto(at + i64::from(ins.op2));
            return Ok(());
        }
        debug!(items = entries.len(), ?key, "entering list");
        let bounds = self.builder.push_block_list(self.dom)?;
        self.inner.push(StackValue::Iterator(Rc::new(RefCell::new(ListIterator::new(entries)))));
        let body = ResumeState {
            pc: at + i64::from(ins.op1),
            scope: self.scopes.current()?.clone(),
            stack: Vec::new(),
        };
        self.pending.push(PendingBlock::new(PendingKind::List {
            bounds,
            reference,
            key,
            body,
            last_revision,
            items: Vec::new(),
        }));
        Ok(())
    }

    /// Pops the yielded values and enters the named block's scope with them
    /// bound, leaving its address for `InvokeVirtual`. A missing block gets
    /// a copy of the current scope and a negative address, so the caller's
    /// `PopScope` balances either way.
    fn yield_block(&mut self, ins: Instruction) -> Result<(), VmError> {
        let count = usize::try_from(ins.op2).map_err(|_| VmError::invariant("negative yield count"))?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.inner.pop_ref()?);
        }
        values.reverse();
        let name = self.program.string(ins.op1)?;
        let block = self.scopes.current()?.block(name).cloned();
        match block {
            Some(block) => {
                let mut scope = block.scope.clone();
                let mut values = values.into_iter();
                for slot in &block.params {
                    scope.bind(*slot, values.next().unwrap_or_else(Reference::undefined));
                }
                debug!(block = name, address = block.address, "yielding");
                self.scopes.push(scope);
                self.inner.push(StackValue::Int(block.address));
            }
            None => {
                self.scopes.push_child()?;
                self.inner.push(StackValue::Int(-1));
            }
        }
        Ok(())
    }

    /// Pops arguments and a definition reference, sets up the component's
    /// layout with `blocks` and pushes the layout address for
    /// `InvokeVirtual`.
    fn invoke_component(&mut self, blocks: Vec<Rc<CapturedBlock>>) -> Result<(), VmError> {
        let args = self.inner.pop_args()?;
        let definition_ref = self.inner.pop_ref()?;
        let revs = self.revisions();
        let value = definition_ref.value(&revs)?;
        self.assert(definition_ref.clone(), AssertKind::Identity)?;

        let (definition, args) = match value {
            Value::Component(definition) => (definition, (*args).clone()),
            Value::Curried(curried) if curried.kind == CurriedKind::Component => {
                let resolved = curried.resolve();
                match resolved.definition {
                    Value::Component(definition) => (definition, args.with_curried(&resolved.positional, &resolved.named)),
                    other => return Err(not_a_component(&other, &definition_ref).into()),
                }
            }
            value if value.is_nullish() => {
                self.inner.push(StackValue::Component(Rc::new(ComponentFrame { instance: None })));
                self.inner.push(StackValue::Int(-1));
                return Ok(());
            }
            other => return Err(not_a_component(&other, &definition_ref).into()),
        };

        let instance = ComponentInstance::create(definition.clone(), &args, &revs)?;
        let layout = self.program.block(&definition.layout)?;
        debug!(component = %definition.name, layout = %layout.name, "invoking component");
        self.builder.push_simple_block(self.dom)?;
        let mut scope = Scope::root(instance.self_ref(), layout.scope_size()).with_blocks(blocks);
        for (name, reference) in &args.named {
            if let Some(slot) = layout.slot_of(&format!("@{}", name)) {
                scope.bind(slot, reference.clone());
            }
        }
        self.scopes.push(scope);
        if instance.has_lifecycle() {
            self.add_destructor(Destructor::Component(instance.clone()))?;
        }
        self.inner.push(StackValue::Component(Rc::new(ComponentFrame { instance: Some(instance) })));
        self.inner.push(StackValue::Int(layout.address as i64));
        Ok(())
    }

    fn debugger(&mut self, ins: Instruction) -> Result<(), VmError> {
        let names = self.program.strings(ins.op1)?;
        let slots = self.program.numbers(ins.op2)?;
        let scope = self.scopes.current()?;
        let mut locals = Vec::with_capacity(names.len());
        for (name, slot) in names.iter().zip(slots) {
            let slot = usize::try_from(*slot).map_err(|_| VmError::invariant("negative debugger slot"))?;
            locals.push((name.clone(), scope.get(slot)?));
        }
        let revs = self.revisions();
        let inspector = ScopeInspector::new(&revs, scope.self_ref(), locals);
        match self.env.debugger.as_mut() {
            Some(callback) => callback(&inspector),
            None => info!(locals = ?names, this = ?inspector.this(), "debugger"),
        }
        Ok(())
    }
}

fn not_a_component(value: &Value, reference: &Reference) -> UserError {
    UserError::new(format!("expected a component definition, but received {}", value.type_name())).at(reference.debug_label())
}
