use serde::{Deserialize, Serialize};

use crate::value::Value;

// ── Opcodes ──────────────────────────────────────────────────────────
//
// One byte per opcode. `Constant` carries a one-byte constant pool index,
// everything else is a bare opcode.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Constant = 0,
    Add = 1,
    Subtract = 2,
    Multiply = 3,
    Divide = 4,
    Negate = 5,
    Return = 6,
}

impl OpCode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            OpCode::Constant => "OP_CONSTANT",
            OpCode::Add => "OP_ADD",
            OpCode::Subtract => "OP_SUBTRACT",
            OpCode::Multiply => "OP_MULTIPLY",
            OpCode::Divide => "OP_DIVIDE",
            OpCode::Negate => "OP_NEGATE",
            OpCode::Return => "OP_RETURN",
        }
    }

    /// Encoded size in bytes, opcode included.
    pub fn width(self) -> usize {
        match self {
            OpCode::Constant => 2,
            _ => 1,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        Ok(match byte {
            0 => OpCode::Constant,
            1 => OpCode::Add,
            2 => OpCode::Subtract,
            3 => OpCode::Multiply,
            4 => OpCode::Divide,
            5 => OpCode::Negate,
            6 => OpCode::Return,
            other => return Err(other),
        })
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A fully decoded instruction, operands included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Constant(u8),
    Add,
    Subtract,
    Multiply,
    Divide,
    Negate,
    Return,
}

impl Instruction {
    pub fn opcode(self) -> OpCode {
        match self {
            Instruction::Constant(_) => OpCode::Constant,
            Instruction::Add => OpCode::Add,
            Instruction::Subtract => OpCode::Subtract,
            Instruction::Multiply => OpCode::Multiply,
            Instruction::Divide => OpCode::Divide,
            Instruction::Negate => OpCode::Negate,
            Instruction::Return => OpCode::Return,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown opcode {byte} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("{op} at offset {offset} is missing its operand")]
    MissingOperand { op: OpCode, offset: usize },
    #[error("offset {offset} is past the end of the chunk")]
    OutOfBounds { offset: usize },
}

// ── Chunk ────────────────────────────────────────────────────────────

/// Bytecode plus the constant pool it indexes and the source line of every
/// byte. `code` and `lines` always have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawChunk")]
pub struct Chunk {
    code: Vec<u8>,
    lines: Vec<u32>,
    constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk { code: Vec::new(), lines: Vec::new(), constants: Vec::new() }
    }

    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn write_op(&mut self, op: OpCode, line: u32) {
        self.write(op as u8, line);
    }

    /// Appends to the constant pool and returns the new slot's index.
    /// Equal values are not merged.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Releases all backing storage. The chunk is empty afterwards.
    pub fn free(&mut self) {
        self.code = Vec::new();
        self.lines = Vec::new();
        self.constants = Vec::new();
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    pub fn constant(&self, index: usize) -> Option<Value> {
        self.constants.get(index).copied()
    }

    pub fn line_at(&self, offset: usize) -> Option<u32> {
        self.lines.get(offset).copied()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.code.capacity()
    }

    /// Decodes the instruction starting at `offset`, returning it together
    /// with its encoded width.
    pub fn decode(&self, offset: usize) -> Result<(Instruction, usize), DecodeError> {
        let byte = *self.code.get(offset).ok_or(DecodeError::OutOfBounds { offset })?;
        let op = OpCode::try_from(byte).map_err(|byte| DecodeError::UnknownOpcode { byte, offset })?;
        let inst = match op {
            OpCode::Constant => {
                let index = *self
                    .code
                    .get(offset + 1)
                    .ok_or(DecodeError::MissingOperand { op, offset })?;
                Instruction::Constant(index)
            }
            OpCode::Add => Instruction::Add,
            OpCode::Subtract => Instruction::Subtract,
            OpCode::Multiply => Instruction::Multiply,
            OpCode::Divide => Instruction::Divide,
            OpCode::Negate => Instruction::Negate,
            OpCode::Return => Instruction::Return,
        };
        Ok((inst, op.width()))
    }
}

// ── Stored form ──────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("chunk has {code} code bytes but {lines} line entries")]
pub struct ChunkFormatError {
    pub code: usize,
    pub lines: usize,
}

#[derive(Deserialize)]
struct RawChunk {
    code: Vec<u8>,
    lines: Vec<u32>,
    #[serde(default)]
    constants: Vec<Value>,
}

impl TryFrom<RawChunk> for Chunk {
    type Error = ChunkFormatError;

    fn try_from(raw: RawChunk) -> Result<Self, ChunkFormatError> {
        if raw.code.len() != raw.lines.len() {
            return Err(ChunkFormatError { code: raw.code.len(), lines: raw.lines.len() });
        }
        Ok(Chunk { code: raw.code, lines: raw.lines, constants: raw.constants })
    }
}
