//! Registers, the operand stack, call frames and try frames.
//!
//! The machine has no native call stack. `$ra`/`$fp` pairs saved on the
//! operand stack form the frame chain, and `$up` points at the innermost
//! unwind frame, which is laid out as `[prev $up, catch pc, $ra, $fp]`.

use crate::args::CapturedArgs;
use crate::error::EngineError;
use crate::reference::Reference;
use crate::vm::list::ListIterator;
use crate::vm::scope::CapturedBlock;
use crate::vm::ComponentFrame;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use weft_program::Register;

/// `$pc`, `$ra`, `$fp`, `$sp` and `$up`, packed in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers([i64; 5]);

impl Default for Registers {
    fn default() -> Self {
        Registers([-1; 5])
    }
}

impl Registers {
    pub fn at(pc: i64) -> Self {
        Registers([pc, -1, -1, -1, -1])
    }

    pub fn pc(&self) -> i64 {
        self.0[Register::Pc as usize]
    }

    pub fn ra(&self) -> i64 {
        self.0[Register::Ra as usize]
    }

    pub fn fp(&self) -> i64 {
        self.0[Register::Fp as usize]
    }

    pub fn sp(&self) -> i64 {
        self.0[Register::Sp as usize]
    }

    pub fn up(&self) -> i64 {
        self.0[Register::Up as usize]
    }

    pub fn get(&self, register: Register) -> i64 {
        self.0[register as usize]
    }

    fn set(&mut self, register: Register, value: i64) {
        self.0[register as usize] = value;
    }
}

/// Anything the operand stack can hold.
#[derive(Clone)]
pub enum StackValue {
    Int(i64),
    Ref(Reference),
    Args(Rc<CapturedArgs>),
    Iterator(Rc<RefCell<ListIterator>>),
    Component(Rc<ComponentFrame>),
    Block(Rc<CapturedBlock>),
}

impl StackValue {
    pub fn kind(&self) -> &'static str {
        match self {
            StackValue::Int(_) => "integer",
            StackValue::Ref(_) => "reference",
            StackValue::Args(_) => "arguments",
            StackValue::Iterator(_) => "iterator",
            StackValue::Component(_) => "component frame",
            StackValue::Block(_) => "block",
        }
    }
}

impl fmt::Debug for StackValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackValue::Int(n) => write!(f, "{}", n),
            StackValue::Ref(r) => write!(f, "{:?}", r),
            other => write!(f, "<{}>", other.kind()),
        }
    }
}

fn unexpected(expected: &'static str, found: &StackValue) -> EngineError {
    EngineError::UnexpectedStackValue {
        expected,
        found: found.kind(),
    }
}

#[derive(Debug, Default)]
pub struct LowLevelVm {
    registers: Registers,
    stack: Vec<StackValue>,
}

impl LowLevelVm {
    pub fn new(pc: i64) -> Self {
        Self {
            registers: Registers::at(pc),
            stack: Vec::new(),
        }
    }

    /// A machine starting at `pc` with `stack` already pushed.
    pub fn with_stack(pc: i64, stack: Vec<StackValue>) -> Self {
        let mut vm = Self::new(pc);
        for value in stack {
            vm.push(value);
        }
        vm
    }

    pub fn registers(&self) -> Registers {
        self.registers
    }

    pub fn pc(&self) -> i64 {
        self.registers.pc()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    // ------------------------------------------------------------------
    // Stack
    // ------------------------------------------------------------------

    pub fn push(&mut self, value: StackValue) {
        self.stack.push(value);
        self.registers.set(Register::Sp, self.stack.len() as i64 - 1);
    }

    pub fn push_ref(&mut self, reference: Reference) {
        self.push(StackValue::Ref(reference));
    }

    pub fn pop(&mut self) -> Result<StackValue, EngineError> {
        let value = self.stack.pop().ok_or(EngineError::StackUnderflow)?;
        self.registers.set(Register::Sp, self.stack.len() as i64 - 1);
        Ok(value)
    }

    pub fn pop_n(&mut self, count: usize) -> Result<(), EngineError> {
        if count > self.stack.len() {
            return Err(EngineError::StackUnderflow);
        }
        self.truncate(self.stack.len() - count);
        Ok(())
    }

    pub fn pop_ref(&mut self) -> Result<Reference, EngineError> {
        match self.pop()? {
            StackValue::Ref(r) => Ok(r),
            other => Err(unexpected("reference", &other)),
        }
    }

    pub fn pop_int(&mut self) -> Result<i64, EngineError> {
        match self.pop()? {
            StackValue::Int(n) => Ok(n),
            other => Err(unexpected("integer", &other)),
        }
    }

    pub fn pop_args(&mut self) -> Result<Rc<CapturedArgs>, EngineError> {
        match self.pop()? {
            StackValue::Args(a) => Ok(a),
            other => Err(unexpected("arguments", &other)),
        }
    }

    pub fn pop_iterator(&mut self) -> Result<Rc<RefCell<ListIterator>>, EngineError> {
        match self.pop()? {
            StackValue::Iterator(i) => Ok(i),
            other => Err(unexpected("iterator", &other)),
        }
    }

    pub fn pop_component(&mut self) -> Result<Rc<ComponentFrame>, EngineError> {
        match self.pop()? {
            StackValue::Component(c) => Ok(c),
            other => Err(unexpected("component frame", &other)),
        }
    }

    pub fn pop_block(&mut self) -> Result<Rc<CapturedBlock>, EngineError> {
        match self.pop()? {
            StackValue::Block(b) => Ok(b),
            other => Err(unexpected("block", &other)),
        }
    }

    pub fn peek(&self) -> Result<&StackValue, EngineError> {
        self.stack.last().ok_or(EngineError::StackUnderflow)
    }

    pub fn peek_ref(&self) -> Result<Reference, EngineError> {
        match self.peek()? {
            StackValue::Ref(r) => Ok(r.clone()),
            other => Err(unexpected("reference", other)),
        }
    }

    pub fn peek_int(&self) -> Result<i64, EngineError> {
        match self.peek()? {
            StackValue::Int(n) => Ok(*n),
            other => Err(unexpected("integer", other)),
        }
    }

    pub fn peek_iterator(&self) -> Result<Rc<RefCell<ListIterator>>, EngineError> {
        match self.peek()? {
            StackValue::Iterator(i) => Ok(i.clone()),
            other => Err(unexpected("iterator", other)),
        }
    }

    /// The value at absolute position `position`.
    pub fn get(&self, position: i64) -> Result<&StackValue, EngineError> {
        usize::try_from(position)
            .ok()
            .and_then(|p| self.stack.get(p))
            .ok_or(EngineError::StackOutOfRange(position))
    }

    fn get_int(&self, position: i64) -> Result<i64, EngineError> {
        match self.get(position)? {
            StackValue::Int(n) => Ok(*n),
            other => Err(unexpected("integer", other)),
        }
    }

    /// Pushes a copy of the value `offset` slots below `register`.
    pub fn dup(&mut self, register: Register, offset: i64) -> Result<(), EngineError> {
        let value = self.get(self.registers.get(register) - offset)?.clone();
        self.push(value);
        Ok(())
    }

    /// The top `count` values, bottom first, without popping them.
    pub fn capture(&self, count: usize) -> Result<Vec<StackValue>, EngineError> {
        if count > self.stack.len() {
            return Err(EngineError::StackUnderflow);
        }
        Ok(self.stack[self.stack.len() - count..].to_vec())
    }

    fn truncate(&mut self, len: usize) {
        self.stack.truncate(len);
        self.registers.set(Register::Sp, self.stack.len() as i64 - 1);
    }

    /// Moves `$sp` down to `sp`. The stack never grows this way.
    fn set_sp(&mut self, sp: i64) -> Result<(), EngineError> {
        let len = usize::try_from(sp + 1).map_err(|_| EngineError::StackOutOfRange(sp))?;
        if len > self.stack.len() {
            return Err(EngineError::StackOutOfRange(sp));
        }
        self.truncate(len);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Moves `$pc` past the instruction at `$pc` and returns its address.
    pub fn advance(&mut self, size: i64) -> i64 {
        let pc = self.registers.pc();
        self.registers.set(Register::Pc, pc + size);
        pc
    }

    pub fn goto(&mut self, pc: i64) {
        self.registers.set(Register::Pc, pc);
    }

    /// Saves `$pc` in `$ra` and jumps to `address`.
    pub fn call(&mut self, address: i64) {
        self.registers.set(Register::Ra, self.registers.pc());
        self.goto(address);
    }

    pub fn return_to(&mut self, address: i64) {
        self.registers.set(Register::Ra, address);
    }

    pub fn ret(&mut self) {
        self.goto(self.registers.ra());
    }

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// Saves `$ra` and `$fp`; `$fp` then points at the saved `$ra`.
    pub fn push_frame(&mut self) {
        self.push(StackValue::Int(self.registers.ra()));
        self.push(StackValue::Int(self.registers.fp()));
        self.registers.set(Register::Fp, self.registers.sp() - 1);
    }

    /// Restores `$ra` and `$fp` and drops everything pushed since the
    /// matching [`push_frame`](Self::push_frame).
    pub fn pop_frame(&mut self) -> Result<(), EngineError> {
        let fp = self.registers.fp();
        if fp < 0 {
            return Err(EngineError::FrameImbalance("pop_frame without a frame"));
        }
        let ra = self.get_int(fp)?;
        let prev_fp = self.get_int(fp + 1)?;
        self.set_sp(fp - 1)?;
        self.registers.set(Register::Ra, ra);
        self.registers.set(Register::Fp, prev_fp);
        Ok(())
    }

    pub fn push_try_frame(&mut self, catch_pc: i64) {
        self.push(StackValue::Int(self.registers.up()));
        let up = self.registers.sp();
        self.push(StackValue::Int(catch_pc));
        self.registers.set(Register::Up, up);
        self.push(StackValue::Int(self.registers.ra()));
        self.push(StackValue::Int(self.registers.fp()));
    }

    pub fn in_try(&self) -> bool {
        self.registers.up() >= 0
    }

    /// Drops the innermost unwind frame and everything above it, restoring
    /// the registers it saved. Returns its catch address.
    fn unwind(&mut self) -> Result<i64, EngineError> {
        let up = self.registers.up();
        if up < 0 {
            return Err(EngineError::FrameImbalance("no try frame to unwind"));
        }
        let prev_up = self.get_int(up)?;
        let catch_pc = self.get_int(up + 1)?;
        let ra = self.get_int(up + 2)?;
        let fp = self.get_int(up + 3)?;
        self.set_sp(up - 1)?;
        self.registers.set(Register::Up, prev_up);
        self.registers.set(Register::Ra, ra);
        self.registers.set(Register::Fp, fp);
        Ok(catch_pc)
    }

    /// Leaves the innermost try region on the normal path.
    pub fn finally(&mut self) -> Result<(), EngineError> {
        self.unwind().map(|_| ())
    }

    /// Unwinds to the innermost try frame and jumps to its handler.
    pub fn catch(&mut self) -> Result<(), EngineError> {
        let catch_pc = self.unwind()?;
        self.goto(catch_pc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::Value;
    use proptest::prelude::*;

    fn int(n: i64) -> StackValue {
        StackValue::Int(n)
    }

    #[test]
    fn fresh_machines_have_no_frames() {
        let vm = LowLevelVm::new(7);
        assert_eq!(vm.pc(), 7);
        assert_eq!((vm.registers().ra(), vm.registers().fp(), vm.registers().sp(), vm.registers().up()), (-1, -1, -1, -1));
    }

    #[test]
    fn frames_restore_return_address_and_stack() {
        let mut vm = LowLevelVm::new(0);
        vm.push(int(1));
        vm.return_to(42);
        let before = vm.registers();
        vm.push_frame();
        assert_eq!(vm.registers().fp(), 1);
        vm.return_to(99);
        vm.push(int(2));
        vm.push(int(3));
        vm.pop_frame().unwrap();
        assert_eq!(vm.registers(), before);
        assert_eq!(vm.depth(), 1);
    }

    #[test]
    fn popping_without_a_frame_is_an_imbalance() {
        let mut vm = LowLevelVm::new(0);
        assert!(matches!(vm.pop_frame(), Err(EngineError::FrameImbalance(_))));
    }

    #[test]
    fn dup_reads_relative_to_the_frame_pointer() {
        let mut vm = LowLevelVm::new(0);
        vm.push_ref(Reference::constant(Value::string("arg")));
        vm.push_frame();
        vm.dup(Register::Fp, 1).unwrap();
        let top = vm.pop_ref().unwrap();
        assert_eq!(top.value(&crate::validator::Revisions::new()).unwrap(), Value::string("arg"));
        assert!(vm.dup(Register::Fp, 5).is_err());
    }

    #[test]
    fn catch_unwinds_to_the_try_frame_and_jumps() {
        let mut vm = LowLevelVm::new(10);
        vm.push(int(0));
        vm.return_to(3);
        vm.push_try_frame(50);
        vm.push_frame();
        vm.return_to(77);
        vm.push(int(1));
        vm.push(int(2));
        vm.catch().unwrap();
        assert_eq!(vm.pc(), 50);
        assert_eq!(vm.registers().ra(), 3);
        assert_eq!(vm.registers().fp(), -1);
        assert_eq!(vm.registers().up(), -1);
        assert_eq!(vm.depth(), 1);
    }

    #[test]
    fn nested_try_frames_unwind_innermost_first() {
        let mut vm = LowLevelVm::new(0);
        vm.push_try_frame(100);
        vm.push(int(9));
        vm.push_try_frame(200);
        vm.catch().unwrap();
        assert_eq!(vm.pc(), 200);
        assert!(vm.in_try());
        vm.pop_n(1).unwrap();
        vm.catch().unwrap();
        assert_eq!(vm.pc(), 100);
        assert!(!vm.in_try());
        assert!(vm.catch().is_err());
    }

    #[test]
    fn finally_keeps_the_program_counter() {
        let mut vm = LowLevelVm::new(5);
        vm.push_try_frame(60);
        vm.finally().unwrap();
        assert_eq!(vm.pc(), 5);
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn wrong_kinds_are_reported() {
        let mut vm = LowLevelVm::new(0);
        vm.push(int(4));
        assert!(matches!(
            vm.pop_ref(),
            Err(EngineError::UnexpectedStackValue { expected: "reference", found: "integer" })
        ));
        assert!(matches!(vm.pop(), Err(EngineError::StackUnderflow)));
    }

    proptest! {
        #[test]
        fn matched_frames_are_stack_neutral(depth in 1usize..12, pushes in proptest::collection::vec(0usize..5, 12), ra in -1i64..1000) {
            let mut vm = LowLevelVm::new(0);
            vm.return_to(ra);
            vm.push(int(0));
            let before = vm.registers();
            for (level, count) in pushes.iter().take(depth).enumerate() {
                vm.push_frame();
                vm.return_to(level as i64 * 10);
                for n in 0..*count {
                    vm.push(int(n as i64));
                }
            }
            for _ in 0..depth.min(pushes.len()) {
                vm.pop_frame().unwrap();
            }
            prop_assert_eq!(vm.registers(), before);
            prop_assert_eq!(vm.depth(), 1);
        }
    }
}
