//! The loaded program: instruction buffer, constant pool and block table.

use crate::opcodes::{Instruction, OpCode};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

pub const PROGRAM_VERSION: &str = "1";

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("constant {index} is out of range")]
    InvalidConstant { index: i32 },
    #[error("constant {index} is not a {expected}")]
    ConstantKind { index: i32, expected: &'static str },
    #[error("unknown block '{0}'")]
    UnknownBlock(String),
    #[error("label '{0}' was referenced but never placed")]
    UnresolvedLabel(String),
    #[error("label '{0}' placed twice")]
    DuplicateLabel(String),
    #[error("block '{0}' was never closed")]
    UnclosedBlock(String),
    #[error("program version {found} is not supported (expected {expected})")]
    VersionMismatch { found: String, expected: &'static str },
    #[error("malformed program json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Strings(Vec<String>),
    Numbers(Vec<i32>),
}

impl Constant {
    pub fn kind(&self) -> &'static str {
        match self {
            Constant::Undefined => "undefined",
            Constant::Null => "null",
            Constant::Bool(_) => "bool",
            Constant::Number(_) => "number",
            Constant::String(_) => "string",
            Constant::Strings(_) => "string array",
            Constant::Numbers(_) => "number array",
        }
    }
}

/// A named entry point (template, component layout or shared routine).
///
/// `symbols[i]` names lexical slot `i + 1`; slot 0 is always `this`.
/// Symbols starting with `@` receive named arguments on component invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub name: String,
    pub address: usize,
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl BlockInfo {
    /// Scope size needed by this block: `this` plus one slot per symbol.
    pub fn scope_size(&self) -> usize {
        self.symbols.len() + 1
    }

    pub fn slot_of(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol).map(|i| i + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub version: String,
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub blocks: Vec<BlockInfo>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>, constants: Vec<Constant>, blocks: Vec<BlockInfo>) -> Self {
        Self {
            version: PROGRAM_VERSION.to_string(),
            instructions,
            constants,
            blocks,
        }
    }

    pub fn from_json(source: &str) -> Result<Self, ProgramError> {
        let program: Program = serde_json::from_str(source)?;
        if program.version != PROGRAM_VERSION {
            return Err(ProgramError::VersionMismatch {
                found: program.version,
                expected: PROGRAM_VERSION,
            });
        }
        Ok(program)
    }

    pub fn to_json(&self) -> Result<String, ProgramError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Instruction at `pc`, or `None` when `pc` is outside the buffer.
    pub fn fetch(&self, pc: i64) -> Option<Instruction> {
        usize::try_from(pc).ok().and_then(|pc| self.instructions.get(pc).copied())
    }

    pub fn constant(&self, index: i32) -> Result<&Constant, ProgramError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.constants.get(i))
            .ok_or(ProgramError::InvalidConstant { index })
    }

    pub fn string(&self, index: i32) -> Result<&str, ProgramError> {
        match self.constant(index)? {
            Constant::String(s) => Ok(s),
            _ => Err(ProgramError::ConstantKind { index, expected: "string" }),
        }
    }

    /// A string constant, or `None` for the `-1` "absent" operand.
    pub fn optional_string(&self, index: i32) -> Result<Option<&str>, ProgramError> {
        if index < 0 {
            Ok(None)
        } else {
            self.string(index).map(Some)
        }
    }

    pub fn strings(&self, index: i32) -> Result<&[String], ProgramError> {
        match self.constant(index)? {
            Constant::Strings(s) => Ok(s),
            _ => Err(ProgramError::ConstantKind { index, expected: "string array" }),
        }
    }

    pub fn numbers(&self, index: i32) -> Result<&[i32], ProgramError> {
        match self.constant(index)? {
            Constant::Numbers(n) => Ok(n),
            _ => Err(ProgramError::ConstantKind { index, expected: "number array" }),
        }
    }

    pub fn block(&self, name: &str) -> Result<&BlockInfo, ProgramError> {
        self.blocks
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| ProgramError::UnknownBlock(name.to_string()))
    }

    pub fn block_at(&self, address: usize) -> Option<&BlockInfo> {
        self.blocks.iter().find(|b| b.address == address)
    }

    /// Human-readable listing, one instruction per line.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (pc, ins) in self.instructions.iter().enumerate() {
            if let Some(block) = self.block_at(pc) {
                let _ = writeln!(out, "{}:", block.name);
            }
            let _ = write!(out, "  {:>4}  {:<20}", pc, ins.op.name());
            let _ = write!(out, "{}", self.describe_operands(pc, ins));
            out.push('\n');
        }
        out
    }

    fn describe_operands(&self, pc: usize, ins: &Instruction) -> String {
        let pc = pc as i64;
        let abs = |offset: i32| pc + offset as i64;
        let konst = |index: i32| match self.constant(index) {
            Ok(Constant::String(s)) => format!("{:?}", s),
            Ok(c) => format!("{:?}", c),
            Err(_) => format!("#{}", index),
        };
        match ins.op {
            OpCode::Jump | OpCode::ReturnTo | OpCode::PushTryFrame | OpCode::JumpIf | OpCode::JumpUnless | OpCode::Iterate | OpCode::EnterTry => {
                format!("-> {}", abs(ins.op1))
            }
            OpCode::JumpEq => format!("-> {} if == {}", abs(ins.op1), ins.op2),
            OpCode::EnterList => format!("body {} else {} key {}", abs(ins.op1), abs(ins.op2), konst(ins.op3)),
            OpCode::PushBlock => format!("{} at {} params {}", konst(ins.op2), abs(ins.op1), konst(ins.op3)),
            OpCode::Yield => format!("to {} with {}", konst(ins.op1), ins.op2),
            OpCode::HasBlock | OpCode::HasBlockParams => konst(ins.op1),
            OpCode::InvokeComponent => format!("blocks {}", ins.op1),
            OpCode::InvokeStatic => match self.block_at(ins.op1.max(0) as usize) {
                Some(block) => format!("{} ({})", ins.op1, block.name),
                None => ins.op1.to_string(),
            },
            OpCode::Primitive | OpCode::GetProperty | OpCode::Helper | OpCode::Text | OpCode::Comment | OpCode::OpenElement | OpCode::Modifier => {
                konst(ins.op1)
            }
            OpCode::StaticAttr => format!("{} = {}", konst(ins.op1), konst(ins.op2)),
            OpCode::DynamicAttr => format!("{} trusting={}", konst(ins.op1), ins.op2 != 0),
            OpCode::Resolve => format!("kind {} {}", ins.op1, konst(ins.op2)),
            OpCode::PushArgs => format!("{} positional {}", konst(ins.op1), ins.op2),
            OpCode::Debugger => format!("{} {}", konst(ins.op1), konst(ins.op2)),
            OpCode::PushInt | OpCode::Pop | OpCode::RootScope | OpCode::GetVariable | OpCode::SetVariable | OpCode::Concat | OpCode::Enter | OpCode::Curry => {
                ins.op1.to_string()
            }
            OpCode::Dup => format!("r{} - {}", ins.op1, ins.op2),
            _ => String::new(),
        }
    }
}
