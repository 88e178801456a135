use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use rlox::compiler::{self, CompileError};
use rlox::disassembler::disassemble_chunk;
use rlox::repl::{self, ReplOptions};
use rlox::vm::{InterpretError, RuntimeError};
use rlox::{Chunk, InterpretResult, Vm};

const EXIT_USAGE: u8 = 64;
const EXIT_DATA: u8 = 65;
const EXIT_SOFTWARE: u8 = 70;
const EXIT_IO: u8 = 74;

#[derive(Parser)]
#[command(name = "rlox", version, about = "Run arithmetic expressions on a small bytecode VM")]
struct Cli {
    /// Script to run. `.json` files are loaded as stored chunks. Omit to start the REPL.
    path: Option<PathBuf>,

    /// Evaluate an expression given on the command line
    #[arg(short, long, conflicts_with = "path", allow_hyphen_values = true)]
    eval: Option<String>,

    /// Print the bytecode listing before running
    #[arg(long)]
    disassemble: bool,

    /// Log every executed instruction with the stack contents
    #[arg(long)]
    trace: bool,

    /// Print the compiled chunk in the given format instead of running it
    #[arg(long, value_enum)]
    emit: Option<Emit>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Emit {
    Json,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Could not read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("Invalid chunk file {}: {source}", .path.display())]
    ChunkFile { path: PathBuf, source: serde_json::Error },
    #[error("{0}")]
    Compile(#[from] CompileError),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
    #[error("{0}")]
    Emit(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<InterpretError> for CliError {
    fn from(e: InterpretError) -> Self {
        match e {
            InterpretError::Compile(e) => CliError::Compile(e),
            InterpretError::Runtime(e) => CliError::Runtime(e),
        }
    }
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::ChunkFile { .. } | CliError::Compile(_) => EXIT_DATA,
            CliError::Runtime(_) => EXIT_SOFTWARE,
            CliError::Read { .. } | CliError::Emit(_) | CliError::Io(_) => EXIT_IO,
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    init_tracing(cli.trace);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(trace: bool) {
    let mut filter = EnvFilter::try_from_env("RLOX_LOG").unwrap_or_else(|_| EnvFilter::new("error"));
    if trace {
        if let Ok(directive) = "rlox::vm=trace".parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .without_time()
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let mut vm = Vm::new();

    let (chunk, name) = match (&cli.eval, &cli.path) {
        (Some(source), _) => (compiler::compile(source)?, "<eval>".to_string()),
        (None, Some(path)) => (load(path)?, path.display().to_string()),
        (None, None) => {
            let options = ReplOptions { disassemble: cli.disassemble };
            repl::run(io::stdin().lock(), io::stdout(), &mut vm, &options)?;
            return Ok(());
        }
    };

    if let Some(Emit::Json) = cli.emit {
        println!("{}", serde_json::to_string_pretty(&chunk)?);
        return Ok(());
    }

    if cli.disassemble {
        print!("{}", disassemble_chunk(&chunk, &name));
    }

    if vm.interpret(&chunk) == InterpretResult::Ok {
        if let Some(value) = vm.last_result() {
            println!("{value}");
        }
    }
    match vm.take_error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Source files are compiled; `.json` files hold an already assembled chunk.
fn load(path: &Path) -> Result<Chunk, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| CliError::Read { path: path.to_path_buf(), source })?;

    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&text)
            .map_err(|source| CliError::ChunkFile { path: path.to_path_buf(), source })
    } else {
        Ok(compiler::compile(&text)?)
    }
}
