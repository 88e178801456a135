use tracing::{debug, trace, warn};

use crate::chunk::{Chunk, DecodeError, Instruction};
use crate::compiler::{self, CompileError};
use crate::disassembler::disassemble_instruction;
use crate::value::Value;

/// Operand stack capacity.
pub const STACK_MAX: usize = 256;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("operand must be a {expected}, got {found}")]
    Type { expected: &'static str, found: &'static str },
    #[error("constant index {index} is not in the constant pool")]
    InvalidConstant { index: u8 },
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("reached end of chunk without OP_RETURN")]
    UnexpectedEnd,
}

type VmResult<T> = Result<T, VmError>;

/// A [`VmError`] pinned to the source line of the instruction that raised it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}\n[line {line}] in script")]
pub struct RuntimeError {
    pub error: VmError,
    pub line: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("{0}")]
    Compile(#[from] CompileError),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}

/// Outcome of one `interpret` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

impl InterpretResult {
    /// Conventional process exit status (sysexits.h).
    pub fn exit_code(self) -> i32 {
        match self {
            InterpretResult::Ok => 0,
            InterpretResult::CompileError => 65,
            InterpretResult::RuntimeError => 70,
        }
    }
}

// ── VM ───────────────────────────────────────────────────────────────

/// Stack machine executing one borrowed [`Chunk`] per `interpret` call.
///
/// The VM keeps no reference to a chunk between calls; every call starts
/// from an empty stack with `ip` at offset 0.
pub struct Vm {
    stack: [Value; STACK_MAX],
    stack_top: usize,
    ip: usize,
    // offset of the instruction currently executing, for error lines
    inst_start: usize,
    last_result: Option<Value>,
    last_error: Option<InterpretError>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            stack: [Value::default(); STACK_MAX],
            stack_top: 0,
            ip: 0,
            inst_start: 0,
            last_result: None,
            last_error: None,
        }
    }

    fn reset(&mut self) {
        self.stack_top = 0;
        self.ip = 0;
        self.inst_start = 0;
        self.last_result = None;
        self.last_error = None;
    }

    /// Executes `chunk` from its first byte until `OP_RETURN` or an error.
    pub fn interpret(&mut self, chunk: &Chunk) -> InterpretResult {
        self.reset();
        debug!(bytes = chunk.len(), constants = chunk.constants().len(), "interpret");

        match self.run(chunk) {
            Ok(value) => {
                debug!(result = %value, "finished");
                self.last_result = Some(value);
                InterpretResult::Ok
            }
            Err(error) => {
                let line = chunk
                    .line_at(self.inst_start)
                    .or_else(|| chunk.lines().last().copied())
                    .unwrap_or(0);
                let err = RuntimeError { error, line };
                warn!(line, error = %err.error, "runtime error");
                self.last_error = Some(err.into());
                InterpretResult::RuntimeError
            }
        }
    }

    /// Compiles `source` and runs the resulting chunk. Nothing executes when
    /// compilation fails.
    pub fn interpret_source(&mut self, source: &str) -> InterpretResult {
        match compiler::compile(source) {
            Ok(chunk) => self.interpret(&chunk),
            Err(err) => {
                self.reset();
                debug!(error = %err, "compile error");
                self.last_error = Some(err.into());
                InterpretResult::CompileError
            }
        }
    }

    /// Value popped by the last successful `OP_RETURN`.
    pub fn last_result(&self) -> Option<Value> {
        self.last_result
    }

    pub fn last_error(&self) -> Option<&InterpretError> {
        self.last_error.as_ref()
    }

    /// Moves the last error out, leaving `last_error` empty.
    pub fn take_error(&mut self) -> Option<InterpretError> {
        self.last_error.take()
    }

    /// Live portion of the operand stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        &self.stack[..self.stack_top]
    }

    pub fn push(&mut self, value: Value) -> VmResult<()> {
        let slot = self.stack.get_mut(self.stack_top).ok_or(VmError::StackOverflow)?;
        *slot = value;
        self.stack_top += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        if self.stack_top == 0 {
            return Err(VmError::StackUnderflow);
        }
        self.stack_top -= 1;
        Ok(self.stack[self.stack_top])
    }

    fn peek(&self, distance: usize) -> VmResult<Value> {
        if distance >= self.stack_top {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.stack[self.stack_top - 1 - distance])
    }

    fn number(value: Value) -> VmResult<f64> {
        value.as_number().ok_or(VmError::Type { expected: "number", found: value.type_name() })
    }

    fn run(&mut self, chunk: &Chunk) -> VmResult<Value> {
        loop {
            if self.ip >= chunk.len() {
                return Err(VmError::UnexpectedEnd);
            }
            self.inst_start = self.ip;
            let (inst, width) = chunk.decode(self.ip)?;

            if tracing::enabled!(tracing::Level::TRACE) {
                self.trace_instruction(chunk);
            }

            self.ip += width;

            match inst {
                Instruction::Constant(index) => {
                    let value = chunk
                        .constant(index as usize)
                        .ok_or(VmError::InvalidConstant { index })?;
                    self.push(value)?;
                }
                Instruction::Negate => {
                    let n = Self::number(self.peek(0)?)?;
                    self.pop()?;
                    self.push(Value::Number(-n))?;
                }
                Instruction::Add => self.binary_op(|a, b| Ok(a + b))?,
                Instruction::Subtract => self.binary_op(|a, b| Ok(a - b))?,
                Instruction::Multiply => self.binary_op(|a, b| Ok(a * b))?,
                Instruction::Divide => self.binary_op(|a, b| {
                    if b == 0.0 {
                        return Err(VmError::DivisionByZero);
                    }
                    Ok(a / b)
                })?,
                Instruction::Return => return self.pop(),
            }
        }
    }

    /// Both operands are checked before either is popped, so a failing
    /// operation leaves the stack as it found it.
    fn binary_op(&mut self, op: fn(f64, f64) -> VmResult<f64>) -> VmResult<()> {
        let b = Self::number(self.peek(0)?)?;
        let a = Self::number(self.peek(1)?)?;
        let result = op(a, b)?;
        self.stack_top -= 2;
        self.push(Value::Number(result))
    }

    fn trace_instruction(&self, chunk: &Chunk) {
        let mut stack = String::from("          ");
        for value in self.stack() {
            stack.push_str(&format!("[ {value} ]"));
        }
        let mut listing = String::new();
        disassemble_instruction(chunk, self.ip, &mut listing);
        trace!("{stack}");
        trace!("{}", listing.trim_end());
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::OpCode;

    fn constant(chunk: &mut Chunk, n: f64, line: u32) {
        let idx = chunk.add_constant(Value::Number(n));
        chunk.write_op(OpCode::Constant, line);
        chunk.write(idx as u8, line);
    }

    fn binary(a: f64, b: f64, op: OpCode) -> Chunk {
        let mut chunk = Chunk::new();
        constant(&mut chunk, a, 1);
        constant(&mut chunk, b, 1);
        chunk.write_op(op, 1);
        chunk.write_op(OpCode::Return, 1);
        chunk
    }

    fn runtime_error(vm: &Vm) -> &RuntimeError {
        match vm.last_error() {
            Some(InterpretError::Runtime(err)) => err,
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn negate_constant() {
        let mut chunk = Chunk::new();
        constant(&mut chunk, 1.2, 123);
        chunk.write_op(OpCode::Negate, 123);
        chunk.write_op(OpCode::Return, 123);

        let mut vm = Vm::new();
        assert_eq!(vm.interpret(&chunk), InterpretResult::Ok);
        assert_eq!(vm.last_result(), Some(Value::Number(-1.2)));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn binary_ops_respect_operand_order() {
        let cases = [
            (1.0, 2.0, OpCode::Add, 3.0),
            (4.0, 1.0, OpCode::Subtract, 3.0),
            (3.0, 5.0, OpCode::Multiply, 15.0),
            (8.0, 2.0, OpCode::Divide, 4.0),
        ];
        let mut vm = Vm::new();
        for (a, b, op, expected) in cases {
            assert_eq!(vm.interpret(&binary(a, b, op)), InterpretResult::Ok, "{op}");
            assert_eq!(vm.last_result(), Some(Value::Number(expected)), "{op}");
        }
    }

    #[test]
    fn divide_by_zero_is_runtime_error() {
        let mut vm = Vm::new();
        assert_eq!(vm.interpret(&binary(1.0, 0.0, OpCode::Divide)), InterpretResult::RuntimeError);
        assert_eq!(runtime_error(&vm).error, VmError::DivisionByZero);
        // operands stay where they were
        assert_eq!(vm.stack(), &[Value::Number(1.0), Value::Number(0.0)]);
    }

    #[test]
    fn negate_on_empty_stack_underflows() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Negate, 7);
        let mut vm = Vm::new();
        assert_eq!(vm.interpret(&chunk), InterpretResult::RuntimeError);
        let err = runtime_error(&vm);
        assert_eq!(err.error, VmError::StackUnderflow);
        assert_eq!(err.line, 7);
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn binary_op_with_one_operand_does_not_pop() {
        let mut chunk = Chunk::new();
        constant(&mut chunk, 2.0, 1);
        chunk.write_op(OpCode::Add, 2);
        chunk.write_op(OpCode::Return, 2);
        let mut vm = Vm::new();
        assert_eq!(vm.interpret(&chunk), InterpretResult::RuntimeError);
        assert_eq!(runtime_error(&vm).error, VmError::StackUnderflow);
        assert_eq!(runtime_error(&vm).line, 2);
        assert_eq!(vm.stack(), &[Value::Number(2.0)]);
    }

    #[test]
    fn pushing_past_capacity_overflows() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Number(1.0));
        for _ in 0..=STACK_MAX {
            chunk.write_op(OpCode::Constant, 1);
            chunk.write(idx as u8, 1);
        }
        chunk.write_op(OpCode::Return, 1);

        let mut vm = Vm::new();
        assert_eq!(vm.interpret(&chunk), InterpretResult::RuntimeError);
        assert_eq!(runtime_error(&vm).error, VmError::StackOverflow);
        assert_eq!(vm.stack().len(), STACK_MAX);
    }

    #[test]
    fn push_and_pop_are_guarded() {
        let mut vm = Vm::new();
        assert_eq!(vm.pop(), Err(VmError::StackUnderflow));
        for i in 0..STACK_MAX {
            vm.push(Value::Number(i as f64)).unwrap();
        }
        assert_eq!(vm.push(Value::Number(0.0)), Err(VmError::StackOverflow));
        assert_eq!(vm.stack().len(), STACK_MAX);
        assert_eq!(vm.pop(), Ok(Value::Number(255.0)));
        assert_eq!(vm.stack().len(), STACK_MAX - 1);
    }

    #[test]
    fn missing_return_is_runtime_error() {
        let mut chunk = Chunk::new();
        constant(&mut chunk, 1.0, 4);
        let mut vm = Vm::new();
        assert_eq!(vm.interpret(&chunk), InterpretResult::RuntimeError);
        assert_eq!(runtime_error(&vm).error, VmError::UnexpectedEnd);
        assert_eq!(runtime_error(&vm).line, 4);
    }

    #[test]
    fn bad_bytes_are_runtime_errors() {
        let mut vm = Vm::new();

        let mut chunk = Chunk::new();
        chunk.write(200, 1);
        assert_eq!(vm.interpret(&chunk), InterpretResult::RuntimeError);
        assert!(matches!(
            runtime_error(&vm).error,
            VmError::Decode(DecodeError::UnknownOpcode { byte: 200, .. })
        ));

        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(3, 1);
        chunk.write_op(OpCode::Return, 1);
        assert_eq!(vm.interpret(&chunk), InterpretResult::RuntimeError);
        assert_eq!(runtime_error(&vm).error, VmError::InvalidConstant { index: 3 });
    }

    #[test]
    fn interpret_resets_between_calls() {
        let mut vm = Vm::new();

        // leaves one value behind on the stack
        let first = binary(1.0, 2.0, OpCode::Return);
        assert_eq!(vm.interpret(&first), InterpretResult::Ok);
        assert_eq!(vm.last_result(), Some(Value::Number(2.0)));
        assert_eq!(vm.stack().len(), 1);

        let mut second = Chunk::new();
        second.write_op(OpCode::Negate, 1);
        second.write_op(OpCode::Return, 1);
        assert_eq!(vm.interpret(&second), InterpretResult::RuntimeError);
        assert_eq!(vm.last_result(), None);

        let mut third = Chunk::new();
        constant(&mut third, 3.0, 1);
        third.write_op(OpCode::Negate, 1);
        third.write_op(OpCode::Return, 1);
        assert_eq!(vm.interpret(&third), InterpretResult::Ok);
        assert_eq!(vm.last_result(), Some(Value::Number(-3.0)));
        assert!(vm.last_error().is_none());
    }

    #[test]
    fn interpret_source_runs_expression() {
        let mut vm = Vm::new();
        assert_eq!(vm.interpret_source("-(1 + 2) * 3"), InterpretResult::Ok);
        assert_eq!(vm.last_result(), Some(Value::Number(-9.0)));
    }

    #[test]
    fn interpret_source_compile_error_runs_nothing() {
        let mut vm = Vm::new();
        vm.push(Value::Number(1.0)).unwrap();
        assert_eq!(vm.interpret_source("1 +"), InterpretResult::CompileError);
        assert!(matches!(vm.last_error(), Some(InterpretError::Compile(_))));
        assert!(vm.stack().is_empty());
        assert_eq!(vm.last_result(), None);
    }

    #[test]
    fn take_error_empties_last_error() {
        let mut vm = Vm::new();
        assert_eq!(vm.interpret(&binary(1.0, 0.0, OpCode::Divide)), InterpretResult::RuntimeError);
        match vm.take_error() {
            Some(InterpretError::Runtime(err)) => assert_eq!(err.error, VmError::DivisionByZero),
            other => panic!("expected runtime error, got {:?}", other),
        }
        assert!(vm.last_error().is_none());
        assert!(vm.take_error().is_none());
    }

    #[test]
    fn runtime_error_display_names_line() {
        let err = RuntimeError { error: VmError::DivisionByZero, line: 3 };
        assert_eq!(err.to_string(), "division by zero\n[line 3] in script");
    }

    #[test]
    fn exit_codes() {
        assert_eq!(InterpretResult::Ok.exit_code(), 0);
        assert_eq!(InterpretResult::CompileError.exit_code(), 65);
        assert_eq!(InterpretResult::RuntimeError.exit_code(), 70);
    }
}
