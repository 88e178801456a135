//! rlox: a stack-based bytecode virtual machine.
//!
//! A [`Chunk`] holds bytecode, its constant pool and per-byte source lines.
//! The [`Vm`] executes a borrowed chunk and reports an [`InterpretResult`].
//! [`compiler::compile`] turns arithmetic expressions into chunks and
//! [`disassembler`] renders them for inspection.

pub mod chunk;
pub mod compiler;
pub mod disassembler;
pub mod lexer;
pub mod repl;
pub mod value;
pub mod vm;

pub use chunk::{Chunk, Instruction, OpCode};
pub use value::Value;
pub use vm::{InterpretResult, Vm};
