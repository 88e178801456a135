//! Human-readable listings of a [`Chunk`].
//!
//! Output is deterministic so listings can be compared byte-for-byte in
//! tests. Nothing here is needed to execute a chunk.

use std::fmt::Write;

use crate::chunk::{Chunk, DecodeError, Instruction, OpCode};

/// Renders every instruction of `chunk` under a `== name ==` header.
pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {name} ==\n");
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset, &mut out);
    }
    out
}

/// Appends one line for the instruction at `offset` and returns the offset
/// of the next instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let _ = write!(out, "{offset:04} ");

    let line = chunk.line_at(offset).unwrap_or(0);
    if offset > 0 && chunk.line_at(offset - 1) == Some(line) {
        out.push_str("   | ");
    } else {
        let _ = write!(out, "{line:4} ");
    }

    match chunk.decode(offset) {
        Ok((Instruction::Constant(index), width)) => {
            let value = match chunk.constant(index as usize) {
                Some(v) => v.to_string(),
                None => "<invalid>".to_string(),
            };
            let _ = writeln!(out, "{:<16} {index:4} '{value}'", OpCode::Constant.mnemonic());
            offset + width
        }
        Ok((inst, width)) => {
            let _ = writeln!(out, "{}", inst.opcode().mnemonic());
            offset + width
        }
        Err(DecodeError::MissingOperand { op, .. }) => {
            let _ = writeln!(out, "{:<16} <truncated>", op.mnemonic());
            offset + 1
        }
        Err(DecodeError::UnknownOpcode { byte, .. }) => {
            let _ = writeln!(out, "Unknown opcode {byte}");
            offset + 1
        }
        Err(DecodeError::OutOfBounds { .. }) => {
            out.push_str("<end>\n");
            offset + 1
        }
    }
}
