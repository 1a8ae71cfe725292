//! Weft Program
//!
//! The compiled program format consumed by the weft VM: fixed-width
//! instructions, a constant pool, block symbol tables, and an assembler.

pub mod assembler;
pub mod opcodes;
pub mod program;

pub use assembler::{BlockArg, Expr, ProgramBuilder};
pub use opcodes::{ContentType, CurriedKind, Instruction, OpCode, Register};
pub use program::{BlockInfo, Constant, Program, ProgramError};
