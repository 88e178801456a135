use std::io::{self, BufRead, Write};

use crate::compiler;
use crate::disassembler::disassemble_chunk;
use crate::vm::{InterpretResult, Vm};

pub const PROMPT: &str = "> ";

#[derive(Debug, Clone, Default)]
pub struct ReplOptions {
    /// Print each line's bytecode before running it.
    pub disassemble: bool,
}

/// Reads one expression per line until EOF, printing each result or error
/// to `output`. Errors never end the session.
pub fn run<R: BufRead, W: Write>(
    mut input: R,
    mut output: W,
    vm: &mut Vm,
    options: &ReplOptions,
) -> io::Result<()> {
    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            return Ok(());
        }
        let source = line.trim_end();
        if source.trim_start().is_empty() {
            continue;
        }

        if options.disassemble {
            if let Ok(chunk) = compiler::compile(source) {
                write!(output, "{}", disassemble_chunk(&chunk, "repl"))?;
            }
        }

        match vm.interpret_source(source) {
            InterpretResult::Ok => {
                if let Some(value) = vm.last_result() {
                    writeln!(output, "{value}")?;
                }
            }
            InterpretResult::CompileError | InterpretResult::RuntimeError => {
                if let Some(err) = vm.last_error() {
                    writeln!(output, "{err}")?;
                }
            }
        }
    }
}
