//! Label-resolving assembler for weft programs.
//!
//! There is no template compiler in this workspace, so programs are either
//! loaded from JSON or assembled here. The builder owns the calling
//! conventions the VM relies on: replayable blocks (`Enter`/`Exit` wrapped in
//! a frame), the shared guarded-append routines, list iteration, component
//! invocation and try regions.
//!
//! Calls clobber `$ra`, so every call site saves it with a frame of its own:
//! `PushFrame; Dup Fp 1; Invoke*; PopFrame; Pop 1` passes the value on top of
//! the stack to the callee and consumes it.

use crate::opcodes::{ContentType, CurriedKind, Instruction, OpCode, Register};
use crate::program::{BlockInfo, Constant, Program, ProgramError};
use std::collections::HashMap;

/// Name of the shared routine that appends an arbitrary value as content.
pub const STD_APPEND: &str = "std:append";
/// Like [`STD_APPEND`] but strings are inserted as trusted HTML.
pub const STD_APPEND_TRUSTING: &str = "std:append-trusting";

/// Expression tree lowered onto the operand stack. Every expression leaves
/// exactly one reference on the stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Constant),
    This,
    Local(usize),
    Get(Box<Expr>, Vec<String>),
    Helper {
        name: String,
        positional: Vec<Expr>,
        named: Vec<(String, Expr)>,
    },
    Call {
        callee: Box<Expr>,
        positional: Vec<Expr>,
        named: Vec<(String, Expr)>,
    },
    Curry {
        kind: CurriedKind,
        definition: Box<Expr>,
        positional: Vec<Expr>,
        named: Vec<(String, Expr)>,
    },
    Resolve(CurriedKind, String),
    Concat(Vec<Expr>),
    Not(Box<Expr>),
    IfInline(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `(has-block "name")` inside a component layout.
    HasBlock(String),
    /// `(has-block-params "name")` inside a component layout.
    HasBlockParams(String),
}

impl Expr {
    pub fn string(s: &str) -> Expr {
        Expr::Literal(Constant::String(s.to_string()))
    }

    pub fn number(n: f64) -> Expr {
        Expr::Literal(Constant::Number(n))
    }

    pub fn bool(b: bool) -> Expr {
        Expr::Literal(Constant::Bool(b))
    }

    pub fn null() -> Expr {
        Expr::Literal(Constant::Null)
    }

    pub fn undefined() -> Expr {
        Expr::Literal(Constant::Undefined)
    }

    /// `this.a.b` for the path `"a.b"`.
    pub fn this_path(path: &str) -> Expr {
        Expr::This.path(path)
    }

    pub fn local(slot: usize) -> Expr {
        Expr::Local(slot)
    }

    /// Appends a dotted path of property reads to this expression.
    pub fn path(self, path: &str) -> Expr {
        let keys: Vec<String> = path.split('.').filter(|k| !k.is_empty()).map(str::to_string).collect();
        if keys.is_empty() {
            return self;
        }
        match self {
            Expr::Get(base, mut existing) => {
                existing.extend(keys);
                Expr::Get(base, existing)
            }
            other => Expr::Get(Box::new(other), keys),
        }
    }

    pub fn helper(name: &str, positional: Vec<Expr>) -> Expr {
        Expr::Helper {
            name: name.to_string(),
            positional,
            named: Vec::new(),
        }
    }

    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn if_inline(cond: Expr, truthy: Expr, falsy: Expr) -> Expr {
        Expr::IfInline(Box::new(cond), Box::new(truthy), Box::new(falsy))
    }

    pub fn has_block(name: &str) -> Expr {
        Expr::HasBlock(block_name(name).to_string())
    }

    pub fn has_block_params(name: &str) -> Expr {
        Expr::HasBlockParams(block_name(name).to_string())
    }
}

/// `else` is another spelling of the inverse block.
fn block_name(name: &str) -> &str {
    match name {
        "else" => "inverse",
        other => other,
    }
}

/// A block passed to a component. Its body runs in the caller's scope, with
/// yielded values bound to `params`, which are slots of the caller's block.
pub struct BlockArg<'a> {
    name: String,
    params: Vec<usize>,
    body: Box<dyn FnOnce(&mut ProgramBuilder) + 'a>,
}

impl<'a> BlockArg<'a> {
    pub fn new(name: &str, params: &[usize], body: impl FnOnce(&mut ProgramBuilder) + 'a) -> Self {
        Self {
            name: block_name(name).to_string(),
            params: params.to_vec(),
            body: Box::new(body),
        }
    }

    pub fn default_block(params: &[usize], body: impl FnOnce(&mut ProgramBuilder) + 'a) -> Self {
        Self::new("default", params, body)
    }

    pub fn inverse(params: &[usize], body: impl FnOnce(&mut ProgramBuilder) + 'a) -> Self {
        Self::new("inverse", params, body)
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Op1,
    Op2,
}

#[derive(Debug)]
struct Fixup {
    at: usize,
    slot: Slot,
    label: String,
}

#[derive(Debug)]
pub struct ProgramBuilder {
    instructions: Vec<Instruction>,
    constants: Vec<Constant>,
    blocks: Vec<BlockInfo>,
    open_block: Option<String>,
    labels: HashMap<String, usize>,
    fixups: Vec<Fixup>,
    next_label: usize,
    append: usize,
    append_trusting: usize,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    /// Creates a builder with the shared append routines already emitted.
    pub fn new() -> Self {
        let mut b = Self {
            instructions: Vec::new(),
            constants: Vec::new(),
            blocks: Vec::new(),
            open_block: None,
            labels: HashMap::new(),
            fixups: Vec::new(),
            next_label: 0,
            append: 0,
            append_trusting: 0,
        };
        b.append = b.emit_append_routine(STD_APPEND, false);
        b.append_trusting = b.emit_append_routine(STD_APPEND_TRUSTING, true);
        b
    }

    pub fn finish(mut self) -> Result<Program, ProgramError> {
        if let Some(name) = self.open_block.take() {
            return Err(ProgramError::UnclosedBlock(name));
        }
        for fixup in &self.fixups {
            let target = *self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| ProgramError::UnresolvedLabel(fixup.label.clone()))?;
            let offset = target as i32 - fixup.at as i32;
            let ins = &mut self.instructions[fixup.at];
            match fixup.slot {
                Slot::Op1 => ins.op1 = offset,
                Slot::Op2 => ins.op2 = offset,
            }
        }
        Ok(Program::new(self.instructions, self.constants, self.blocks))
    }

    // ------------------------------------------------------------------
    // Raw emission
    // ------------------------------------------------------------------

    pub fn address(&self) -> usize {
        self.instructions.len()
    }

    pub fn emit(&mut self, ins: Instruction) -> usize {
        self.instructions.push(ins);
        self.instructions.len() - 1
    }

    pub fn op(&mut self, op: OpCode) -> usize {
        self.emit(Instruction::op0(op))
    }

    pub fn op1(&mut self, op: OpCode, op1: i32) -> usize {
        self.emit(Instruction::op1(op, op1))
    }

    pub fn op2(&mut self, op: OpCode, op1: i32, op2: i32) -> usize {
        self.emit(Instruction::op2(op, op1, op2))
    }

    /// Emits `op` with a relative operand pointing at `label`.
    pub fn jump_to(&mut self, op: OpCode, label: &str) -> usize {
        let at = self.op(op);
        self.fixup(at, Slot::Op1, label);
        at
    }

    pub fn label(&mut self, name: &str) -> Result<(), ProgramError> {
        let here = self.address();
        if self.labels.insert(name.to_string(), here).is_some() {
            return Err(ProgramError::DuplicateLabel(name.to_string()));
        }
        Ok(())
    }

    /// A label name that has not been used yet.
    pub fn fresh_label(&mut self, hint: &str) -> String {
        self.next_label += 1;
        format!("{}#{}", hint, self.next_label)
    }

    fn place(&mut self, name: &str) {
        // Fresh labels are unique, so this cannot collide.
        self.labels.insert(name.to_string(), self.address());
    }

    fn fixup(&mut self, at: usize, slot: Slot, label: &str) {
        self.fixups.push(Fixup {
            at,
            slot,
            label: label.to_string(),
        });
    }

    pub fn constant(&mut self, constant: Constant) -> i32 {
        if let Some(i) = self.constants.iter().position(|c| *c == constant) {
            return i as i32;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as i32
    }

    pub fn string(&mut self, s: &str) -> i32 {
        self.constant(Constant::String(s.to_string()))
    }

    fn optional_string(&mut self, s: Option<&str>) -> i32 {
        match s {
            Some(s) => self.string(s),
            None => -1,
        }
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    pub fn begin_block(&mut self, name: &str, symbols: &[&str]) {
        self.blocks.push(BlockInfo {
            name: name.to_string(),
            address: self.address(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
        });
        self.open_block = Some(name.to_string());
    }

    pub fn end_block(&mut self) {
        self.op(OpCode::Return);
        self.open_block = None;
    }

    /// Emits a complete block: `body` followed by `Return`.
    pub fn block(&mut self, name: &str, symbols: &[&str], body: impl FnOnce(&mut Self)) {
        self.begin_block(name, symbols);
        body(self);
        self.end_block();
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(c) => {
                let k = self.constant(c.clone());
                self.op1(OpCode::Primitive, k);
            }
            Expr::This => {
                self.op1(OpCode::GetVariable, 0);
            }
            Expr::Local(slot) => {
                self.op1(OpCode::GetVariable, *slot as i32);
            }
            Expr::Get(base, path) => {
                self.expr(base);
                for key in path {
                    let k = self.string(key);
                    self.op1(OpCode::GetProperty, k);
                }
            }
            Expr::Helper { name, positional, named } => {
                self.args(positional, named);
                let k = self.string(name);
                self.op1(OpCode::Helper, k);
            }
            Expr::Call { callee, positional, named } => {
                self.expr(callee);
                self.args(positional, named);
                self.op(OpCode::DynamicHelper);
            }
            Expr::Curry {
                kind,
                definition,
                positional,
                named,
            } => {
                self.expr(definition);
                self.args(positional, named);
                self.op1(OpCode::Curry, *kind as i32);
            }
            Expr::Resolve(kind, name) => {
                let k = self.string(name);
                self.op2(OpCode::Resolve, *kind as i32, k);
            }
            Expr::Concat(parts) => {
                for part in parts {
                    self.expr(part);
                }
                self.op1(OpCode::Concat, parts.len() as i32);
            }
            Expr::Not(inner) => {
                self.expr(inner);
                self.op(OpCode::Not);
            }
            Expr::IfInline(cond, truthy, falsy) => {
                self.expr(cond);
                self.expr(truthy);
                self.expr(falsy);
                self.op(OpCode::IfInline);
            }
            Expr::HasBlock(name) => {
                let k = self.string(name);
                self.op1(OpCode::HasBlock, k);
            }
            Expr::HasBlockParams(name) => {
                let k = self.string(name);
                self.op1(OpCode::HasBlockParams, k);
            }
        }
    }

    /// Pushes positional then named values and captures them with `PushArgs`.
    pub fn args(&mut self, positional: &[Expr], named: &[(String, Expr)]) {
        for e in positional {
            self.expr(e);
        }
        for (_, e) in named {
            self.expr(e);
        }
        let names = self.constant(Constant::Strings(named.iter().map(|(n, _)| n.clone()).collect()));
        self.op2(OpCode::PushArgs, names, positional.len() as i32);
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    pub fn text(&mut self, s: &str) {
        let k = self.string(s);
        self.op1(OpCode::Text, k);
    }

    pub fn comment(&mut self, s: &str) {
        let k = self.string(s);
        self.op1(OpCode::Comment, k);
    }

    /// `{{expr}}`: appends a value of any content type.
    pub fn append(&mut self, expr: &Expr) {
        if let Expr::Literal(Constant::String(s)) = expr {
            let s = s.clone();
            self.text(&s);
            return;
        }
        self.expr(expr);
        let routine = self.append;
        self.call_static(routine);
    }

    /// `{{{expr}}}`: like [`append`](Self::append) but strings become markup.
    pub fn append_trusting(&mut self, expr: &Expr) {
        self.expr(expr);
        let routine = self.append_trusting;
        self.call_static(routine);
    }

    /// Calls the routine at `address` with the top of the stack as its
    /// argument, preserving `$ra` and `$fp` across the call.
    pub fn call_static(&mut self, address: usize) {
        self.op(OpCode::PushFrame);
        self.op2(OpCode::Dup, Register::Fp as i32, 1);
        self.op1(OpCode::InvokeStatic, address as i32);
        self.op(OpCode::PopFrame);
        self.op1(OpCode::Pop, 1);
    }

    /// Calls the address on top of the stack, consuming it.
    pub fn call_virtual(&mut self) {
        self.op(OpCode::PushFrame);
        self.op2(OpCode::Dup, Register::Fp as i32, 1);
        self.op(OpCode::InvokeVirtual);
        self.op(OpCode::PopFrame);
        self.op1(OpCode::Pop, 1);
    }

    /// Pops a component definition and its arguments, runs its layout and
    /// closes it.
    fn invoke_component_on_stack(&mut self) {
        self.op(OpCode::InvokeComponent);
        self.call_virtual();
        self.op(OpCode::CloseComponent);
    }

    /// Appends a value known to be textual, without content-type dispatch.
    pub fn append_text(&mut self, expr: &Expr) {
        self.expr(expr);
        self.op(OpCode::AppendText);
    }

    fn emit_append_routine(&mut self, name: &str, trusting: bool) -> usize {
        let start = self.address();
        self.begin_block(name, &[]);
        let end = self.fresh_label("append-end");
        let finally = self.fresh_label("append-finally");
        let cases = [
            (ContentType::String, self.fresh_label("string")),
            (ContentType::SafeString, self.fresh_label("safe")),
            (ContentType::Node, self.fresh_label("node")),
            (ContentType::Fragment, self.fresh_label("fragment")),
            (ContentType::Component, self.fresh_label("component")),
            (ContentType::Helper, self.fresh_label("helper")),
        ];

        self.op(OpCode::PushFrame);
        self.jump_to(OpCode::ReturnTo, &end);
        self.op2(OpCode::Dup, Register::Fp as i32, 1);
        self.op1(OpCode::Enter, 1);
        self.op(OpCode::ContentType);
        for (ty, label) in &cases {
            let at = self.jump_to(OpCode::JumpEq, label);
            self.instructions[at].op2 = *ty as i32;
        }
        // Empty and Other fall through to the string case.
        for (ty, label) in &cases {
            self.place(label);
            self.op1(OpCode::Pop, 1);
            match ty {
                ContentType::String if trusting => {
                    self.op(OpCode::AssertSame);
                    self.op(OpCode::AppendHtml);
                }
                ContentType::String => {
                    self.op(OpCode::AppendText);
                }
                ContentType::SafeString => {
                    self.op(OpCode::AssertSame);
                    self.op(OpCode::AppendSafeHtml);
                }
                ContentType::Node => {
                    self.op(OpCode::AssertSame);
                    self.op(OpCode::AppendNode);
                }
                ContentType::Fragment => {
                    self.op(OpCode::AssertSame);
                    self.op(OpCode::AppendFragment);
                }
                ContentType::Component => {
                    self.args(&[], &[]);
                    self.invoke_component_on_stack();
                }
                ContentType::Helper => {
                    self.args(&[], &[]);
                    self.op(OpCode::DynamicHelper);
                    self.call_static(start);
                }
                _ => {}
            }
            self.jump_to(OpCode::Jump, &finally);
        }
        self.place(&finally);
        self.op(OpCode::Exit);
        self.op(OpCode::Return);
        self.place(&end);
        self.op(OpCode::PopFrame);
        self.end_block();
        start
    }

    // ------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------

    pub fn open_element(&mut self, tag: &str) {
        let k = self.string(tag);
        self.op1(OpCode::OpenElement, k);
    }

    /// Opens an element whose tag name comes from `tag`.
    pub fn open_dynamic_element(&mut self, tag: &Expr) {
        self.expr(tag);
        self.op(OpCode::OpenDynamicElement);
    }

    pub fn static_attr(&mut self, name: &str, value: &str) {
        self.static_attr_ns(name, value, None);
    }

    pub fn static_attr_ns(&mut self, name: &str, value: &str, namespace: Option<&str>) {
        let n = self.string(name);
        let v = self.string(value);
        let ns = self.optional_string(namespace);
        self.emit(Instruction::new(OpCode::StaticAttr, n, v, ns));
    }

    pub fn dynamic_attr(&mut self, name: &str, value: &Expr, trusting: bool) {
        self.dynamic_attr_ns(name, value, trusting, None);
    }

    pub fn dynamic_attr_ns(&mut self, name: &str, value: &Expr, trusting: bool, namespace: Option<&str>) {
        self.expr(value);
        let n = self.string(name);
        let ns = self.optional_string(namespace);
        self.emit(Instruction::new(OpCode::DynamicAttr, n, trusting as i32, ns));
    }

    pub fn modifier(&mut self, name: &str, positional: &[Expr], named: &[(String, Expr)]) {
        self.args(positional, named);
        let k = self.string(name);
        self.op1(OpCode::Modifier, k);
    }

    pub fn dynamic_modifier(&mut self, modifier: &Expr, positional: &[Expr], named: &[(String, Expr)]) {
        self.expr(modifier);
        self.args(positional, named);
        self.op(OpCode::DynamicModifier);
    }

    pub fn flush_element(&mut self) {
        self.op(OpCode::FlushElement);
    }

    pub fn close_element(&mut self) {
        self.op(OpCode::CloseElement);
    }

    /// `<tag>body</tag>` with static attributes.
    pub fn element(&mut self, tag: &str, attrs: &[(&str, &str)], body: impl FnOnce(&mut Self)) {
        self.open_element(tag);
        for (name, value) in attrs {
            self.static_attr(name, value);
        }
        self.flush_element();
        body(self);
        self.close_element();
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    /// Wraps `body` in a frame and an `Enter`/`Exit` pair so the region can be
    /// re-executed on its own during rerender. `args` pushes the values the
    /// region needs and returns how many it pushed.
    pub fn replayable(&mut self, args: impl FnOnce(&mut Self) -> usize, body: impl FnOnce(&mut Self, &str)) {
        let end = self.fresh_label("replay-end");
        let finally = self.fresh_label("replay-finally");
        self.op(OpCode::PushFrame);
        self.jump_to(OpCode::ReturnTo, &end);
        let count = args(self);
        self.op1(OpCode::Enter, count as i32);
        body(self, &finally);
        self.place(&finally);
        self.op(OpCode::Exit);
        self.op(OpCode::Return);
        self.place(&end);
        self.op(OpCode::PopFrame);
    }

    pub fn if_(&mut self, cond: &Expr, then: impl FnOnce(&mut Self)) {
        self.conditional(cond, OpCode::JumpUnless, then, |_| {});
    }

    pub fn if_else(&mut self, cond: &Expr, then: impl FnOnce(&mut Self), otherwise: impl FnOnce(&mut Self)) {
        self.conditional(cond, OpCode::JumpUnless, then, otherwise);
    }

    pub fn unless(&mut self, cond: &Expr, then: impl FnOnce(&mut Self), otherwise: impl FnOnce(&mut Self)) {
        self.conditional(cond, OpCode::JumpIf, then, otherwise);
    }

    fn conditional(&mut self, cond: &Expr, jump: OpCode, then: impl FnOnce(&mut Self), otherwise: impl FnOnce(&mut Self)) {
        self.replayable(
            |b| {
                b.expr(cond);
                b.op(OpCode::ToBoolean);
                1
            },
            |b, finally| {
                let alternate = b.fresh_label("else");
                b.jump_to(jump, &alternate);
                then(b);
                b.jump_to(OpCode::Jump, finally);
                b.place(&alternate);
                otherwise(b);
            },
        );
    }

    /// `{{#each list key=key as |item index|}}`. The item and its index are
    /// bound to `item_slot` and `index_slot` of a child scope.
    pub fn each(
        &mut self,
        list: &Expr,
        key: &str,
        item_slot: usize,
        index_slot: usize,
        body: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) {
        self.replayable(
            |b| {
                b.expr(list);
                1
            },
            |b, finally| {
                let body_label = b.fresh_label("each-body");
                let else_label = b.fresh_label("each-else");
                let iter_label = b.fresh_label("each-iter");
                let break_label = b.fresh_label("each-break");

                let key = b.string(key);
                let at = b.emit(Instruction::new(OpCode::EnterList, 0, 0, key));
                b.fixup(at, Slot::Op1, &body_label);
                b.fixup(at, Slot::Op2, &else_label);
                b.op(OpCode::PushFrame);
                b.op2(OpCode::Dup, Register::Fp as i32, 1);
                b.jump_to(OpCode::ReturnTo, &iter_label);
                b.place(&iter_label);
                b.jump_to(OpCode::Iterate, &break_label);
                // Item blocks resume here with the value and memo on the stack.
                b.place(&body_label);
                b.op(OpCode::ChildScope);
                b.op1(OpCode::SetVariable, index_slot as i32);
                b.op1(OpCode::SetVariable, item_slot as i32);
                body(b);
                b.op(OpCode::PopScope);
                b.op(OpCode::Exit);
                b.op(OpCode::Return);
                b.place(&break_label);
                b.op(OpCode::PopFrame);
                b.op(OpCode::ExitList);
                b.jump_to(OpCode::Jump, finally);
                b.place(&else_label);
                otherwise(b);
            },
        );
    }

    /// `{{#in-element destination insertBefore=...}}`.
    pub fn in_element(&mut self, destination: &Expr, insert_before: Option<&Expr>, guid: &str, body: impl FnOnce(&mut Self)) {
        self.replayable(
            |b| {
                b.expr(&Expr::string(guid));
                match insert_before {
                    Some(e) => b.expr(e),
                    None => b.expr(&Expr::undefined()),
                }
                b.expr(destination);
                3
            },
            |b, _| {
                b.op(OpCode::PushRemoteElement);
                body(b);
                b.op(OpCode::PopRemoteElement);
            },
        );
    }

    /// Invokes the component `component` evaluates to.
    pub fn invoke_component(&mut self, component: &Expr, positional: &[Expr], named: &[(String, Expr)]) {
        self.invoke_component_with_blocks(component, positional, named, Vec::new());
    }

    /// Invokes a component and hands it `blocks`. Block bodies are emitted
    /// in place and jumped over; `PushBlock` closes each one over the scope
    /// current at the invocation.
    pub fn invoke_component_with_blocks(
        &mut self,
        component: &Expr,
        positional: &[Expr],
        named: &[(String, Expr)],
        blocks: Vec<BlockArg<'_>>,
    ) {
        let mut entries = Vec::with_capacity(blocks.len());
        if !blocks.is_empty() {
            let skip = self.fresh_label("blocks-end");
            self.jump_to(OpCode::Jump, &skip);
            for block in blocks {
                let label = self.fresh_label("block");
                self.place(&label);
                (block.body)(self);
                self.op(OpCode::Return);
                entries.push((block.name, block.params, label));
            }
            self.place(&skip);
        }
        self.replayable(
            |b| {
                b.expr(component);
                b.args(positional, named);
                2
            },
            |b, _| {
                for (name, params, label) in &entries {
                    let name = b.string(name);
                    let params = b.constant(Constant::Numbers(params.iter().map(|p| *p as i32).collect()));
                    let at = b.emit(Instruction::new(OpCode::PushBlock, 0, name, params));
                    b.fixup(at, Slot::Op1, label);
                }
                b.op1(OpCode::InvokeComponent, entries.len() as i32);
                b.call_virtual();
                b.op(OpCode::CloseComponent);
            },
        );
    }

    /// `{{yield}}`: renders the component's block `to` with `values` bound
    /// to its parameters. Renders nothing when the block was not passed.
    pub fn yield_(&mut self, to: &str, values: &[Expr]) {
        for value in values {
            self.expr(value);
        }
        let name = self.string(block_name(to));
        self.op2(OpCode::Yield, name, values.len() as i32);
        self.call_virtual();
        self.op(OpCode::PopScope);
    }

    /// Invokes a component resolved by name.
    pub fn component(&mut self, name: &str, named: &[(String, Expr)]) {
        self.invoke_component(&Expr::Resolve(CurriedKind::Component, name.to_string()), &[], named);
    }

    pub fn component_with_blocks(&mut self, name: &str, named: &[(String, Expr)], blocks: Vec<BlockArg<'_>>) {
        self.invoke_component_with_blocks(&Expr::Resolve(CurriedKind::Component, name.to_string()), &[], named, blocks);
    }

    /// Binds `value` to `slot` in a child scope for the duration of `body`.
    pub fn let_(&mut self, slot: usize, value: &Expr, body: impl FnOnce(&mut Self)) {
        self.op(OpCode::ChildScope);
        self.expr(value);
        self.op1(OpCode::SetVariable, slot as i32);
        body(self);
        self.op(OpCode::PopScope);
    }

    /// Renders `handler` in place of `body` when `body` raises a user error,
    /// with the message bound to `error_slot`. The region is replayable, so
    /// an error raised while updating it later swaps in the handler too.
    pub fn try_catch(&mut self, error_slot: usize, body: impl FnOnce(&mut Self), handler: impl FnOnce(&mut Self)) {
        let catch = self.fresh_label("catch");
        let finally = self.fresh_label("try-finally");
        let end = self.fresh_label("try-end");
        self.op(OpCode::PushFrame);
        self.jump_to(OpCode::ReturnTo, &end);
        self.jump_to(OpCode::EnterTry, &catch);
        self.jump_to(OpCode::PushTryFrame, &catch);
        body(self);
        self.op(OpCode::PopTryFrame);
        self.jump_to(OpCode::Jump, &finally);
        self.place(&catch);
        self.op(OpCode::ChildScope);
        self.op1(OpCode::SetVariable, error_slot as i32);
        handler(self);
        self.op(OpCode::PopScope);
        self.place(&finally);
        self.op(OpCode::Exit);
        self.op(OpCode::Return);
        self.place(&end);
        self.op(OpCode::PopFrame);
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn debugger(&mut self, locals: &[(&str, usize)]) {
        let names = self.constant(Constant::Strings(locals.iter().map(|(n, _)| n.to_string()).collect()));
        let slots = self.constant(Constant::Numbers(locals.iter().map(|(_, s)| *s as i32).collect()));
        self.op2(OpCode::Debugger, names, slots);
    }

    pub fn log(&mut self, positional: &[Expr]) {
        self.args(positional, &[]);
        self.op(OpCode::Log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(program: &Program, from: usize) -> Vec<OpCode> {
        program.instructions[from..].iter().map(|i| i.op).collect()
    }

    #[test]
    fn std_routines_are_registered_as_blocks() {
        let program = ProgramBuilder::new().finish().unwrap();
        let append = program.block(STD_APPEND).unwrap();
        let trusting = program.block(STD_APPEND_TRUSTING).unwrap();
        assert_eq!(append.address, 0);
        assert!(trusting.address > append.address);
        assert_eq!(program.instructions[trusting.address - 1].op, OpCode::Return);
    }

    #[test]
    fn jumps_resolve_relative_to_their_own_address() {
        let mut b = ProgramBuilder::new();
        b.begin_block("main", &[]);
        let start = b.address();
        b.jump_to(OpCode::Jump, "target");
        b.text("skipped");
        b.label("target").unwrap();
        b.text("landed");
        b.end_block();
        let program = b.finish().unwrap();
        assert_eq!(program.instructions[start].op1, 2);
    }

    #[test]
    fn unresolved_labels_fail_to_finish() {
        let mut b = ProgramBuilder::new();
        b.begin_block("main", &[]);
        b.jump_to(OpCode::Jump, "nowhere");
        b.end_block();
        assert!(matches!(b.finish(), Err(ProgramError::UnresolvedLabel(l)) if l == "nowhere"));
    }

    #[test]
    fn open_blocks_fail_to_finish() {
        let mut b = ProgramBuilder::new();
        b.begin_block("main", &[]);
        assert!(matches!(b.finish(), Err(ProgramError::UnclosedBlock(_))));
    }

    #[test]
    fn constants_are_interned() {
        let mut b = ProgramBuilder::new();
        let a = b.string("x");
        let c = b.string("x");
        assert_eq!(a, c);
    }

    #[test]
    fn if_else_lowers_to_a_replayable_region() {
        let mut b = ProgramBuilder::new();
        b.begin_block("main", &[]);
        let start = b.address();
        b.if_else(&Expr::this_path("cond"), |b| b.text("A"), |b| b.text("B"));
        b.end_block();
        let program = b.finish().unwrap();
        assert_eq!(
            ops(&program, start),
            vec![
                OpCode::PushFrame,
                OpCode::ReturnTo,
                OpCode::GetVariable,
                OpCode::GetProperty,
                OpCode::ToBoolean,
                OpCode::Enter,
                OpCode::JumpUnless,
                OpCode::Text,
                OpCode::Jump,
                OpCode::Text,
                OpCode::Exit,
                OpCode::Return,
                OpCode::PopFrame,
                OpCode::Return,
            ]
        );
        // JumpUnless lands on the else text, Jump lands on Exit.
        assert_eq!(program.instructions[start + 6].op1, 3);
        assert_eq!(program.instructions[start + 8].op1, 2);
    }

    #[test]
    fn literal_strings_append_as_static_text() {
        let mut b = ProgramBuilder::new();
        b.begin_block("main", &[]);
        let start = b.address();
        b.append(&Expr::string("hi"));
        b.append(&Expr::this_path("name"));
        b.end_block();
        let program = b.finish().unwrap();
        assert_eq!(
            ops(&program, start),
            vec![
                OpCode::Text,
                OpCode::GetVariable,
                OpCode::GetProperty,
                OpCode::PushFrame,
                OpCode::Dup,
                OpCode::InvokeStatic,
                OpCode::PopFrame,
                OpCode::Pop,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn try_regions_are_replayable_blocks_around_a_try_frame() {
        let mut b = ProgramBuilder::new();
        b.begin_block("main", &["error"]);
        let start = b.address();
        b.try_catch(1, |b| b.text("body"), |b| b.append_text(&Expr::local(1)));
        b.end_block();
        let program = b.finish().unwrap();
        assert_eq!(
            ops(&program, start),
            vec![
                OpCode::PushFrame,
                OpCode::ReturnTo,
                OpCode::EnterTry,
                OpCode::PushTryFrame,
                OpCode::Text,
                OpCode::PopTryFrame,
                OpCode::Jump,
                OpCode::ChildScope,
                OpCode::SetVariable,
                OpCode::GetVariable,
                OpCode::AppendText,
                OpCode::PopScope,
                OpCode::Exit,
                OpCode::Return,
                OpCode::PopFrame,
                OpCode::Return
            ]
        );
        // Both the block and the try frame point at the handler.
        assert_eq!(program.instructions[start + 2].op1, 5);
        assert_eq!(program.instructions[start + 3].op1, 4);
        // The body skips the handler and still closes the block.
        assert_eq!(program.instructions[start + 6].op1, 6);
        assert_eq!(program.instructions[start + 1].op1, 13);
    }

    #[test]
    fn passed_blocks_are_skipped_inline_and_captured_before_the_call() {
        let mut b = ProgramBuilder::new();
        b.begin_block("main", &["item"]);
        let start = b.address();
        b.component_with_blocks("Card", &[], vec![BlockArg::new("else", &[1], |b| b.text("body"))]);
        b.end_block();
        let program = b.finish().unwrap();

        let code = &program.instructions;
        assert_eq!(code[start].op, OpCode::Jump);
        assert_eq!(code[start + 1].op, OpCode::Text);
        assert_eq!(code[start + 2].op, OpCode::Return);
        assert_eq!(code[start].op1, 3);

        let push = (start..code.len()).find(|&i| code[i].op == OpCode::PushBlock).unwrap();
        assert_eq!(push as i32 + code[push].op1, (start + 1) as i32);
        assert_eq!(program.string(code[push].op2).unwrap(), "inverse");
        assert_eq!(program.numbers(code[push].op3).unwrap(), &[1]);
        assert_eq!(code[push + 1].op, OpCode::InvokeComponent);
        assert_eq!(code[push + 1].op1, 1);
    }

    #[test]
    fn yields_call_the_block_in_its_own_scope() {
        let mut b = ProgramBuilder::new();
        b.begin_block("layout", &[]);
        let start = b.address();
        b.yield_("default", &[Expr::string("a"), Expr::string("b")]);
        b.end_block();
        let program = b.finish().unwrap();

        let ops = ops(&program, start);
        let at = ops.iter().position(|op| *op == OpCode::Yield).unwrap();
        assert_eq!(program.instructions[start + at].op2, 2);
        assert_eq!(
            ops[at + 1..],
            [
                OpCode::PushFrame,
                OpCode::Dup,
                OpCode::InvokeVirtual,
                OpCode::PopFrame,
                OpCode::Pop,
                OpCode::PopScope,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn guarded_appends_assert_identity_for_non_text_content() {
        let program = ProgramBuilder::new().finish().unwrap();
        let trusting = program.block(STD_APPEND_TRUSTING).unwrap().address;
        let plain = &program.instructions[..trusting];
        let asserts = plain.iter().filter(|i| i.op == OpCode::AssertSame).count();
        assert_eq!(asserts, 3);
        let trusted = program.instructions[trusting..].iter().filter(|i| i.op == OpCode::AssertSame).count();
        assert_eq!(trusted, 4);
    }

    #[test]
    fn paths_extend_existing_gets() {
        let e = Expr::this_path("a").path("b.c");
        assert_eq!(e, Expr::Get(Box::new(Expr::This), vec!["a".into(), "b".into(), "c".into()]));
    }
}
