//! Single-pass compiler from arithmetic expressions to a [`Chunk`].
//!
//! A Pratt parser walks the token stream and emits bytecode as it goes; there
//! is no syntax tree. The grammar is one expression per source:
//!
//! ```text
//! expression := term
//! term       := factor ( ("+" | "-") factor )*
//! factor     := unary ( ("*" | "/") unary )*
//! unary      := "-" unary | primary
//! primary    := NUMBER | "(" expression ")"
//! ```

use tracing::debug;

use crate::chunk::{Chunk, OpCode};
use crate::lexer::{self, LexError, Lexeme, Token};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[line {line}] Error{}: {message}", location(.lexeme))]
pub struct CompileError {
    pub line: u32,
    /// Offending source text; `None` when the error is at end of input.
    pub lexeme: Option<String>,
    pub message: String,
}

fn location(lexeme: &Option<String>) -> String {
    match lexeme {
        Some(text) => format!(" at '{text}'"),
        None => " at end".to_string(),
    }
}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError {
            line: e.line,
            lexeme: Some(e.snippet),
            message: "Unexpected character.".to_string(),
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

/// Deepest allowed nesting of groupings and unary operators.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Term,
    Factor,
    Unary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor | Precedence::Unary => Precedence::Unary,
        }
    }
}

fn infix_precedence(token: Token) -> Precedence {
    match token {
        Token::Plus | Token::Minus => Precedence::Term,
        Token::Star | Token::Slash => Precedence::Factor,
        _ => Precedence::None,
    }
}

pub fn compile(source: &str) -> Result<Chunk> {
    let tokens = lexer::lex(source)?;
    let mut compiler = Compiler {
        lexemes: tokens.lexemes,
        end_line: tokens.end_line,
        pos: 0,
        depth: 0,
        chunk: Chunk::new(),
    };
    compiler.expression()?;
    if let Some(extra) = compiler.peek() {
        return Err(compiler.error_at(extra, "Expect end of expression."));
    }
    let line = compiler.previous_line();
    compiler.chunk.write_op(OpCode::Return, line);

    debug!(bytes = compiler.chunk.len(), constants = compiler.chunk.constants().len(), "compiled");
    Ok(compiler.chunk)
}

struct Compiler<'src> {
    lexemes: Vec<Lexeme<'src>>,
    end_line: u32,
    pos: usize,
    depth: usize,
    chunk: Chunk,
}

impl<'src> Compiler<'src> {
    fn peek(&self) -> Option<Lexeme<'src>> {
        self.lexemes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Lexeme<'src>> {
        let lexeme = self.peek();
        if lexeme.is_some() {
            self.pos += 1;
        }
        lexeme
    }

    fn previous_line(&self) -> u32 {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.lexemes.get(i))
            .map(|l| l.line)
            .unwrap_or(self.end_line)
    }

    fn error_at(&self, lexeme: Lexeme<'_>, message: &str) -> CompileError {
        CompileError {
            line: lexeme.line,
            lexeme: Some(lexeme.text.to_string()),
            message: message.to_string(),
        }
    }

    fn error_at_end(&self, message: &str) -> CompileError {
        CompileError { line: self.end_line, lexeme: None, message: message.to_string() }
    }

    fn error_at_current(&self, message: &str) -> CompileError {
        match self.peek() {
            Some(lexeme) => self.error_at(lexeme, message),
            None => self.error_at_end(message),
        }
    }

    fn expression(&mut self) -> Result<()> {
        self.parse_precedence(Precedence::Term)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error_at_current("Expression nests too deeply."));
        }
        self.depth += 1;
        let result = self.parse_operand(precedence);
        self.depth -= 1;
        result
    }

    fn parse_operand(&mut self, precedence: Precedence) -> Result<()> {
        let Some(prefix) = self.advance() else {
            return Err(self.error_at_end("Expect expression."));
        };
        match prefix.token {
            Token::Number(n) => self.number(n, prefix)?,
            Token::LParen => self.grouping()?,
            Token::Minus => self.unary(prefix)?,
            _ => return Err(self.error_at(prefix, "Expect expression.")),
        }

        while let Some(next) = self.peek() {
            let next_precedence = infix_precedence(next.token);
            if next_precedence == Precedence::None || next_precedence < precedence {
                break;
            }
            self.advance();
            self.binary(next, next_precedence)?;
        }
        Ok(())
    }

    fn number(&mut self, n: f64, lexeme: Lexeme<'_>) -> Result<()> {
        let index = self.chunk.add_constant(Value::Number(n));
        let Ok(index) = u8::try_from(index) else {
            return Err(self.error_at(lexeme, "Too many constants in one chunk."));
        };
        self.chunk.write_op(OpCode::Constant, lexeme.line);
        self.chunk.write(index, lexeme.line);
        Ok(())
    }

    fn grouping(&mut self) -> Result<()> {
        self.expression()?;
        match self.peek() {
            Some(lexeme) if lexeme.token == Token::RParen => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error_at_current("Expect ')' after expression.")),
        }
    }

    fn unary(&mut self, operator: Lexeme<'_>) -> Result<()> {
        self.parse_precedence(Precedence::Unary)?;
        self.chunk.write_op(OpCode::Negate, operator.line);
        Ok(())
    }

    fn binary(&mut self, operator: Lexeme<'_>, precedence: Precedence) -> Result<()> {
        // left-associative: the right operand binds one level tighter
        self.parse_precedence(precedence.next())?;
        let op = match operator.token {
            Token::Plus => OpCode::Add,
            Token::Minus => OpCode::Subtract,
            Token::Star => OpCode::Multiply,
            Token::Slash => OpCode::Divide,
            _ => return Err(self.error_at(operator, "Expect operator.")),
        };
        self.chunk.write_op(op, operator.line);
        Ok(())
    }
}
