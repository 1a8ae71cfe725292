//! Opcode table and the fixed-width instruction encoding.

use serde::{Deserialize, Serialize};

/// Opcodes for the weft VM.
///
/// Values below [`OpCode::FIRST_SYSCALL`] are machine ops handled by the
/// low-level VM (frames, calls, jumps, try frames). Everything else is a
/// syscall dispatched to the append VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    // Machine ops
    PushFrame = 0,    // push $ra and $fp, $fp = $sp
    PopFrame = 1,     // restore $ra and $fp, $sp = $fp - 1
    InvokeVirtual = 2, // pop an address off the stack and call it
    InvokeStatic = 3, // op1: absolute address to call
    Jump = 4,         // op1: relative offset
    Return = 5,       // $pc = $ra
    ReturnTo = 6,     // op1: relative offset stored into $ra
    PushTryFrame = 7, // op1: relative offset of the catch target
    PopTryFrame = 8,  // leave the innermost try region (finally)

    // Stack and scope
    Primitive = 16,   // op1: constant, pushes a constant reference
    PushInt = 17,     // op1: raw integer pushed onto the stack
    Pop = 18,         // op1: count
    Dup = 19,         // op1: register ($sp or $fp), op2: offset below it
    RootScope = 20,   // op1: symbol count (self included)
    ChildScope = 21,
    PopScope = 22,
    GetVariable = 23, // op1: slot
    SetVariable = 24, // op1: slot, pops the value
    GetProperty = 25, // op1: property name constant

    // Expressions
    PushArgs = 26,      // op1: named-argument names (strings constant), op2: positional count
    Helper = 27,        // op1: helper name constant, pops args
    DynamicHelper = 28, // pops args then the helper reference
    Curry = 29,         // op1: curried kind, pops args then the definition reference
    Concat = 30,        // op1: count
    Not = 31,
    IfInline = 32, // pops falsy, truthy, condition
    ToBoolean = 33,
    Resolve = 34, // op1: curried kind, op2: definition name constant

    // Control flow
    Enter = 35,      // op1: number of stack values captured for resume
    Exit = 36,
    JumpIf = 37,     // op1: relative offset
    JumpUnless = 38, // op1: relative offset
    JumpEq = 39,     // op1: relative offset, op2: integer to compare with the top of stack
    AssertSame = 40,
    EnterList = 41,  // op1: relative body offset, op2: relative else offset, op3: key constant
    ExitList = 42,
    Iterate = 43,    // op1: relative break offset
    EnterTry = 67,   // op1: relative offset of the catch handler

    // Content
    ContentType = 44,
    DynamicContentType = 45,
    AppendText = 46,
    AppendHtml = 47,
    AppendSafeHtml = 48,
    AppendNode = 49,
    AppendFragment = 50,
    Text = 51,    // op1: string constant
    Comment = 52, // op1: string constant

    // Elements
    OpenElement = 53, // op1: tag name constant
    OpenDynamicElement = 54,
    PushRemoteElement = 55,
    PopRemoteElement = 56,
    FlushElement = 57,
    CloseElement = 58,
    StaticAttr = 59,      // op1: name, op2: value, op3: namespace constant or -1
    DynamicAttr = 60,     // op1: name, op2: trusting flag, op3: namespace constant or -1
    Modifier = 61,        // op1: modifier name constant, pops args
    DynamicModifier = 62, // pops args then the modifier reference

    // Components
    InvokeComponent = 63, // op1: number of blocks on the stack above the args
    CloseComponent = 64,
    PushBlock = 68,       // op1: relative body address, op2: name constant, op3: parameter slots constant
    Yield = 69,           // op1: block name constant, op2: number of yielded values
    HasBlock = 70,        // op1: block name constant
    HasBlockParams = 71,  // op1: block name constant

    // Introspection
    Debugger = 65, // op1: symbol names constant, op2: slot numbers constant
    Log = 66,      // pops args
}

impl OpCode {
    pub const FIRST_SYSCALL: u8 = 16;

    pub fn is_machine(self) -> bool {
        (self as u8) < Self::FIRST_SYSCALL
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::PushFrame => "PushFrame",
            OpCode::PopFrame => "PopFrame",
            OpCode::InvokeVirtual => "InvokeVirtual",
            OpCode::InvokeStatic => "InvokeStatic",
            OpCode::Jump => "Jump",
            OpCode::Return => "Return",
            OpCode::ReturnTo => "ReturnTo",
            OpCode::PushTryFrame => "PushTryFrame",
            OpCode::PopTryFrame => "PopTryFrame",
            OpCode::Primitive => "Primitive",
            OpCode::PushInt => "PushInt",
            OpCode::Pop => "Pop",
            OpCode::Dup => "Dup",
            OpCode::RootScope => "RootScope",
            OpCode::ChildScope => "ChildScope",
            OpCode::PopScope => "PopScope",
            OpCode::GetVariable => "GetVariable",
            OpCode::SetVariable => "SetVariable",
            OpCode::GetProperty => "GetProperty",
            OpCode::PushArgs => "PushArgs",
            OpCode::Helper => "Helper",
            OpCode::DynamicHelper => "DynamicHelper",
            OpCode::Curry => "Curry",
            OpCode::Concat => "Concat",
            OpCode::Not => "Not",
            OpCode::IfInline => "IfInline",
            OpCode::ToBoolean => "ToBoolean",
            OpCode::Resolve => "Resolve",
            OpCode::Enter => "Enter",
            OpCode::Exit => "Exit",
            OpCode::JumpIf => "JumpIf",
            OpCode::JumpUnless => "JumpUnless",
            OpCode::JumpEq => "JumpEq",
            OpCode::AssertSame => "AssertSame",
            OpCode::EnterList => "EnterList",
            OpCode::ExitList => "ExitList",
            OpCode::Iterate => "Iterate",
            OpCode::EnterTry => "EnterTry",
            OpCode::ContentType => "ContentType",
            OpCode::DynamicContentType => "DynamicContentType",
            OpCode::AppendText => "AppendText",
            OpCode::AppendHtml => "AppendHtml",
            OpCode::AppendSafeHtml => "AppendSafeHtml",
            OpCode::AppendNode => "AppendNode",
            OpCode::AppendFragment => "AppendFragment",
            OpCode::Text => "Text",
            OpCode::Comment => "Comment",
            OpCode::OpenElement => "OpenElement",
            OpCode::OpenDynamicElement => "OpenDynamicElement",
            OpCode::PushRemoteElement => "PushRemoteElement",
            OpCode::PopRemoteElement => "PopRemoteElement",
            OpCode::FlushElement => "FlushElement",
            OpCode::CloseElement => "CloseElement",
            OpCode::StaticAttr => "StaticAttr",
            OpCode::DynamicAttr => "DynamicAttr",
            OpCode::Modifier => "Modifier",
            OpCode::DynamicModifier => "DynamicModifier",
            OpCode::InvokeComponent => "InvokeComponent",
            OpCode::CloseComponent => "CloseComponent",
            OpCode::PushBlock => "PushBlock",
            OpCode::Yield => "Yield",
            OpCode::HasBlock => "HasBlock",
            OpCode::HasBlockParams => "HasBlockParams",
            OpCode::Debugger => "Debugger",
            OpCode::Log => "Log",
        }
    }
}

/// The registers addressable by `Dup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Register {
    Pc = 0,
    Ra = 1,
    Fp = 2,
    Sp = 3,
    Up = 4,
}

impl Register {
    pub fn from_operand(operand: i32) -> Option<Self> {
        match operand {
            0 => Some(Register::Pc),
            1 => Some(Register::Ra),
            2 => Some(Register::Fp),
            3 => Some(Register::Sp),
            4 => Some(Register::Up),
            _ => None,
        }
    }
}

/// Classification pushed by `ContentType` and `DynamicContentType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ContentType {
    Component = 0,
    Helper = 1,
    String = 2,
    Empty = 3,
    SafeString = 4,
    Fragment = 5,
    Node = 6,
    Other = 8,
}

/// What a curried value (or a resolved definition) stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CurriedKind {
    Component = 0,
    Helper = 1,
    Modifier = 2,
}

impl CurriedKind {
    pub fn from_operand(operand: i32) -> Option<Self> {
        match operand {
            0 => Some(CurriedKind::Component),
            1 => Some(CurriedKind::Helper),
            2 => Some(CurriedKind::Modifier),
            _ => None,
        }
    }
}

/// One fixed-width instruction: an opcode and up to three operands.
///
/// Unused operands are zero. Jump operands are relative to the address of the
/// instruction that carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,
    #[serde(default)]
    pub op1: i32,
    #[serde(default)]
    pub op2: i32,
    #[serde(default)]
    pub op3: i32,
}

impl Instruction {
    /// Every instruction occupies a single slot in the buffer.
    pub const SIZE: i64 = 1;

    pub fn new(op: OpCode, op1: i32, op2: i32, op3: i32) -> Self {
        Self { op, op1, op2, op3 }
    }

    pub fn op0(op: OpCode) -> Self {
        Self::new(op, 0, 0, 0)
    }

    pub fn op1(op: OpCode, op1: i32) -> Self {
        Self::new(op, op1, 0, 0)
    }

    pub fn op2(op: OpCode, op1: i32, op2: i32) -> Self {
        Self::new(op, op1, op2, 0)
    }

    pub fn size(&self) -> i64 {
        Self::SIZE
    }
}
