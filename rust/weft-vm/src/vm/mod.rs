//! The append VM.
//!
//! [`render`] executes a program's `main` block against an element builder,
//! producing the initial tree and a tree of updating opcodes. The returned
//! [`RenderResult`] drives later re-renders and final teardown.

mod content;
mod control;
mod inspect;
pub mod list;
pub mod low_level;
mod ops;
pub mod scope;
pub mod update;

pub use control::ComponentFrame;
pub use inspect::ScopeInspector;

use self::content::ElementOperations;
use self::list::KeySpec;
use self::low_level::{LowLevelVm, StackValue};
use self::scope::{Scope, ScopeStack};
use self::update::{run_opcodes, BlockOpcode, Flow, ListItem, ListOpcode, TryOpcode, UpdateContext, UpdatingOpcode};
use crate::bounds::BlockRef;
use crate::builder::ElementBuilder;
use crate::dom::{Dom, NodeId};
use crate::environment::{DebugEvent, Destructor, Environment, RenderMode};
use crate::error::{EngineError, VmError};
use crate::reference::Reference;
use crate::validator::Revision;
use crate::values::Value;
use tracing::{debug, trace, warn};
use weft_program::{Instruction, OpCode, Program};

/// Where a block resumes: the instruction after its `Enter`, the scope at
/// that point and the stack values it captured.
#[derive(Debug, Clone)]
pub struct ResumeState {
    pub pc: i64,
    pub scope: Scope,
    pub stack: Vec<StackValue>,
}

/// What an open entry of the pending stack will become when it closes.
pub(crate) enum PendingKind {
    /// The outermost entry of an initial render.
    Root,
    /// The outermost entry of a re-render; its block is already owned by an
    /// opcode.
    Resumed,
    Block {
        bounds: BlockRef,
        resume: ResumeState,
    },
    /// A try region; `catch` starts its handler.
    Try {
        bounds: BlockRef,
        resume: ResumeState,
        catch: ResumeState,
    },
    Item {
        key: String,
        value: Reference,
        memo: Reference,
        bounds: BlockRef,
        resume: ResumeState,
    },
    List {
        bounds: BlockRef,
        reference: Reference,
        key: KeySpec,
        body: ResumeState,
        last_revision: Revision,
        items: Vec<ListItem>,
    },
    /// The outermost entry when a list inserts a single item.
    Collector {
        items: Vec<ListItem>,
    },
}

pub(crate) struct PendingBlock {
    pub kind: PendingKind,
    pub children: Vec<UpdatingOpcode>,
    pub destructors: Vec<Destructor>,
}

impl PendingBlock {
    fn new(kind: PendingKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            destructors: Vec::new(),
        }
    }

    /// Moves everything this entry recorded into `parent`, giving up its own
    /// ability to re-render.
    fn flatten_into(self, parent: &mut PendingBlock) {
        parent.children.extend(self.children);
        parent.destructors.extend(self.destructors);
        match self.kind {
            PendingKind::List { items, .. } | PendingKind::Collector { items } => {
                parent.children.extend(items.into_iter().map(|item| UpdatingOpcode::Block(item.block)));
            }
            _ => {}
        }
    }
}

/// Machine state to restore when a try region catches.
struct TryCheckpoint {
    cursors: usize,
    blocks: usize,
    pending: usize,
    scopes: usize,
}

pub struct Vm<'a> {
    program: &'a Program,
    env: &'a mut Environment,
    dom: &'a mut dyn Dom,
    builder: ElementBuilder,
    inner: LowLevelVm,
    scopes: ScopeStack,
    pending: Vec<PendingBlock>,
    checkpoints: Vec<TryCheckpoint>,
    element_ops: Option<ElementOperations>,
    executed: u64,
}

impl<'a> Vm<'a> {
    pub(crate) fn new(
        program: &'a Program,
        env: &'a mut Environment,
        dom: &'a mut dyn Dom,
        builder: ElementBuilder,
        start: ResumeState,
        base: PendingKind,
    ) -> Self {
        Self {
            program,
            env,
            dom,
            builder,
            inner: LowLevelVm::with_stack(start.pc, start.stack),
            scopes: ScopeStack::new(start.scope),
            pending: vec![PendingBlock::new(base)],
            checkpoints: Vec::new(),
            element_ops: None,
            executed: 0,
        }
    }

    /// Runs until `$pc` goes negative.
    pub(crate) fn execute(&mut self) -> Result<(), VmError> {
        loop {
            let pc = self.inner.pc();
            if pc < 0 {
                return Ok(());
            }
            let instruction = self.program.fetch(pc).ok_or(EngineError::InvalidProgramCounter(pc))?;
            self.executed += 1;
            if self.executed > self.env.config.max_instructions {
                return Err(EngineError::InstructionLimitExceeded(self.env.config.max_instructions).into());
            }
            self.env.emit(DebugEvent::Step {
                pc,
                opcode: instruction.op.name(),
            });
            trace!(pc, op = instruction.op.name(), sp = self.inner.registers().sp(), "step");
            let at = self.inner.advance(instruction.size());
            let result = if instruction.op.is_machine() {
                self.machine(instruction, at)
            } else {
                self.syscall(instruction, at)
            };
            match result {
                Ok(()) => {}
                Err(VmError::User(error)) if !self.checkpoints.is_empty() => self.recover(error)?,
                Err(e) => return Err(e),
            }
        }
    }

    fn machine(&mut self, ins: Instruction, at: i64) -> Result<(), VmError> {
        let relative = at + i64::from(ins.op1);
        match ins.op {
            OpCode::PushFrame => self.inner.push_frame(),
            OpCode::PopFrame => self.inner.pop_frame()?,
            OpCode::InvokeVirtual => {
                let address = self.inner.pop_int()?;
                if address >= 0 {
                    self.inner.call(address);
                }
            }
            OpCode::InvokeStatic => self.inner.call(i64::from(ins.op1)),
            OpCode::Jump => self.inner.goto(relative),
            OpCode::Return => self.inner.ret(),
            OpCode::ReturnTo => self.inner.return_to(relative),
            OpCode::PushTryFrame => {
                self.inner.push_try_frame(relative);
                self.checkpoints.push(TryCheckpoint {
                    cursors: self.builder.cursor_depth(),
                    blocks: self.builder.block_count(),
                    pending: self.pending.len(),
                    scopes: self.scopes.depth(),
                });
            }
            OpCode::PopTryFrame => {
                self.inner.finally()?;
                self.checkpoints.pop();
            }
            other => return Err(VmError::invariant(format!("{} is not a machine operation", other.name()))),
        }
        Ok(())
    }

    fn syscall(&mut self, ins: Instruction, at: i64) -> Result<(), VmError> {
        match ins.op {
            OpCode::Primitive
            | OpCode::PushInt
            | OpCode::Pop
            | OpCode::Dup
            | OpCode::RootScope
            | OpCode::ChildScope
            | OpCode::PopScope
            | OpCode::GetVariable
            | OpCode::SetVariable
            | OpCode::GetProperty
            | OpCode::PushArgs
            | OpCode::Helper
            | OpCode::DynamicHelper
            | OpCode::Curry
            | OpCode::Concat
            | OpCode::Not
            | OpCode::IfInline
            | OpCode::ToBoolean
            | OpCode::Resolve => self.expression(ins),

            OpCode::Enter
            | OpCode::Exit
            | OpCode::JumpIf
            | OpCode::JumpUnless
            | OpCode::JumpEq
            | OpCode::AssertSame
            | OpCode::EnterList
            | OpCode::ExitList
            | OpCode::Iterate
            | OpCode::EnterTry
            | OpCode::InvokeComponent
            | OpCode::CloseComponent
            | OpCode::PushBlock
            | OpCode::Yield
            | OpCode::HasBlock
            | OpCode::HasBlockParams
            | OpCode::Debugger
            | OpCode::Log => self.control(ins, at),

            _ => self.content(ins),
        }
    }

    /// Unwinds to the innermost try frame, keeping output produced so far,
    /// and resumes at its handler with the error message on the stack.
    fn recover(&mut self, error: crate::error::UserError) -> Result<(), VmError> {
        let checkpoint = self.checkpoints.pop().ok_or(EngineError::Missing("try checkpoint"))?;
        warn!(error = %error, "caught error inside a try region");
        self.builder.unwind_to(self.dom, checkpoint.cursors, checkpoint.blocks)?;
        while self.pending.len() > checkpoint.pending {
            let entry = self.pending.pop().ok_or(EngineError::Missing("pending block"))?;
            let parent = self.pending.last_mut().ok_or(EngineError::Missing("pending block"))?;
            entry.flatten_into(parent);
        }
        self.scopes.truncate(checkpoint.scopes);
        self.element_ops = None;
        self.inner.catch()?;
        self.inner.push_ref(Reference::constant(Value::string(&error.to_string())));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pending blocks
    // ------------------------------------------------------------------

    fn current(&mut self) -> Result<&mut PendingBlock, EngineError> {
        self.pending.last_mut().ok_or(EngineError::Missing("pending block"))
    }

    pub(crate) fn register(&mut self, opcode: UpdatingOpcode) -> Result<(), EngineError> {
        self.current()?.children.push(opcode);
        Ok(())
    }

    pub(crate) fn add_destructor(&mut self, destructor: Destructor) -> Result<(), EngineError> {
        self.current()?.destructors.push(destructor);
        Ok(())
    }

    fn resume_state(&self, pc: i64, stack: Vec<StackValue>) -> Result<ResumeState, EngineError> {
        Ok(ResumeState {
            pc,
            scope: self.scopes.current()?.clone(),
            stack,
        })
    }

    pub(crate) fn enter_block(&mut self, stack: Vec<StackValue>) -> Result<(), VmError> {
        let resume = self.resume_state(self.inner.pc(), stack)?;
        let bounds = self.builder.push_updatable_block(self.dom)?;
        self.pending.push(PendingBlock::new(PendingKind::Block { bounds, resume }));
        Ok(())
    }

    /// Opens a try region. Its block resumes at the `PushTryFrame` that
    /// follows, so a re-render gets a fresh try frame.
    pub(crate) fn enter_try(&mut self, catch_pc: i64) -> Result<(), VmError> {
        let resume = self.resume_state(self.inner.pc(), Vec::new())?;
        let catch = self.resume_state(catch_pc, Vec::new())?;
        let bounds = self.builder.push_updatable_block(self.dom)?;
        self.pending.push(PendingBlock::new(PendingKind::Try { bounds, resume, catch }));
        Ok(())
    }

    /// Opens the block of one list item. `value` and `memo` must already be
    /// on the stack.
    pub(crate) fn enter_item(&mut self, key: String, value: Reference, memo: Reference, pc: i64) -> Result<(), VmError> {
        let stack = vec![StackValue::Ref(value.clone()), StackValue::Ref(memo.clone())];
        let resume = self.resume_state(pc, stack)?;
        let bounds = self.builder.push_updatable_block(self.dom)?;
        self.pending.push(PendingBlock::new(PendingKind::Item {
            key,
            value,
            memo,
            bounds,
            resume,
        }));
        Ok(())
    }

    pub(crate) fn exit_block(&mut self) -> Result<(), VmError> {
        if self.pending.len() == 1 {
            if matches!(self.pending[0].kind, PendingKind::Resumed) {
                self.builder.pop_block(self.dom)?;
                return Ok(());
            }
            return Err(EngineError::FrameImbalance("exit without a matching enter").into());
        }
        let entry = self.pending.pop().ok_or(EngineError::Missing("pending block"))?;
        self.builder.pop_block(self.dom)?;
        match entry.kind {
            PendingKind::Block { bounds, resume } => {
                let block = BlockOpcode {
                    bounds,
                    resume,
                    children: entry.children,
                    destructors: entry.destructors,
                };
                self.register(UpdatingOpcode::Block(block))?;
            }
            PendingKind::Try { bounds, resume, catch } => {
                let block = BlockOpcode {
                    bounds,
                    resume,
                    children: entry.children,
                    destructors: entry.destructors,
                };
                self.register(UpdatingOpcode::Try(TryOpcode { block, catch }))?;
            }
            PendingKind::Item {
                key,
                value,
                memo,
                bounds,
                resume,
            } => {
                let item = ListItem {
                    key,
                    value,
                    memo,
                    block: BlockOpcode {
                        bounds,
                        resume,
                        children: entry.children,
                        destructors: entry.destructors,
                    },
                };
                match &mut self.current()?.kind {
                    PendingKind::List { items, .. } | PendingKind::Collector { items } => items.push(item),
                    _ => return Err(VmError::invariant("list item closed outside of a list")),
                }
            }
            _ => return Err(EngineError::FrameImbalance("exit closed a list").into()),
        }
        Ok(())
    }

    pub(crate) fn exit_list(&mut self) -> Result<(), VmError> {
        let entry = self.pending.pop().ok_or(EngineError::Missing("pending block"))?;
        let PendingKind::List {
            bounds,
            reference,
            key,
            body,
            last_revision,
            items,
        } = entry.kind
        else {
            return Err(EngineError::FrameImbalance("exit list without an open list").into());
        };
        self.builder.pop_block(self.dom)?;
        let parent = self.current()?;
        parent.children.extend(entry.children);
        parent.destructors.extend(entry.destructors);
        let list = ListOpcode {
            bounds,
            reference,
            key,
            body,
            items,
            last_revision,
        };
        self.register(UpdatingOpcode::List(list))?;
        Ok(())
    }

    /// Ends the run, returning the base entry.
    pub(crate) fn finish(mut self) -> Result<PendingBlock, VmError> {
        if self.pending.len() != 1 {
            return Err(VmError::invariant(format!("{} blocks still open at the end of a run", self.pending.len() - 1)));
        }
        if matches!(self.pending[0].kind, PendingKind::Root) {
            self.builder.pop_block(self.dom)?;
        }
        self.pending.pop().ok_or_else(|| VmError::invariant("no base block"))
    }

    /// Gives up on a failed run, returning the teardown work recorded so far.
    pub(crate) fn abandon(mut self) -> Vec<Destructor> {
        let mut out = Vec::new();
        for entry in self.pending.drain(..) {
            out.extend(entry.destructors);
            for child in &entry.children {
                child.collect_destructors(&mut out);
            }
            if let PendingKind::List { items, .. } | PendingKind::Collector { items } = &entry.kind {
                for item in items {
                    item.block.collect_destructors(&mut out);
                }
            }
        }
        out
    }

    pub(crate) fn revisions(&self) -> std::rc::Rc<crate::validator::Revisions> {
        self.env.revisions.clone()
    }
}

/// The output of an initial render.
pub struct RenderResult {
    bounds: BlockRef,
    opcodes: Vec<UpdatingOpcode>,
    destructors: Vec<Destructor>,
}

impl RenderResult {
    pub fn bounds(&self) -> &BlockRef {
        &self.bounds
    }

    pub fn opcode_count(&self) -> usize {
        self.opcodes.len()
    }

    /// Brings the tree up to date with the current revision.
    pub fn rerender(&mut self, program: &Program, env: &mut Environment, dom: &mut dyn Dom) -> Result<(), VmError> {
        debug!(revision = env.revisions.current(), "rerender");
        let opcodes = &mut self.opcodes;
        env.transaction(dom, |env, dom| {
            let mut cx = UpdateContext { program, env, dom };
            match run_opcodes(opcodes, &mut cx)? {
                Flow::Continue => Ok(()),
                Flow::Throw => Err(VmError::invariant("an assertion failed outside of any block")),
            }
        })
    }

    /// Runs every destructor and removes the rendered content.
    pub fn destroy(self, env: &mut Environment, dom: &mut dyn Dom) -> Result<(), VmError> {
        let mut destructors = self.destructors;
        for opcode in &self.opcodes {
            opcode.collect_destructors(&mut destructors);
        }
        destructors.push(Destructor::Bounds(self.bounds));
        env.transaction(dom, |env, _| {
            for destructor in destructors {
                env.schedule_destroy(destructor)?;
            }
            Ok(())
        })
    }
}

/// Renders the program's `main` block into `root` with `self_ref` as `this`.
pub fn render(
    program: &Program,
    env: &mut Environment,
    dom: &mut dyn Dom,
    root: NodeId,
    self_ref: Reference,
    mode: RenderMode,
) -> Result<RenderResult, VmError> {
    let main = program.block("main")?;
    let start = ResumeState {
        pc: main.address as i64,
        scope: Scope::root(self_ref, main.scope_size()),
        stack: Vec::new(),
    };
    debug!(?mode, instructions = program.len(), "initial render");
    env.transaction(dom, |env, dom| {
        let builder = ElementBuilder::for_initial_render(dom, mode, root, None)?;
        let mut vm = Vm::new(program, env, dom, builder, start, PendingKind::Root);
        vm.execute()?;
        let bounds = vm.builder_root()?;
        let done = vm.finish()?;
        Ok(RenderResult {
            bounds,
            opcodes: done.children,
            destructors: done.destructors,
        })
    })
}

impl Vm<'_> {
    fn builder_root(&self) -> Result<BlockRef, VmError> {
        self.builder.root_block().ok_or_else(|| VmError::invariant("the builder has no root block"))
    }
}
