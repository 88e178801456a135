use logos::{Lexer, Logos, Skip};

/// Tokens of the arithmetic expression language. The lexer's `extras`
/// counts newlines seen so far.
#[derive(Logos, Debug, PartialEq, Clone, Copy)]
#[logos(extras = u32)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    #[regex(r"[0-9]+(\.[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[token("\n", newline)]
    Newline,
}

fn newline(lex: &mut Lexer<Token>) -> Skip {
    lex.extras += 1;
    Skip
}

/// A token with the source text it was read from and its 1-based line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lexeme<'src> {
    pub token: Token,
    pub text: &'src str,
    pub line: u32,
}

#[derive(Debug)]
pub struct Tokens<'src> {
    pub lexemes: Vec<Lexeme<'src>>,
    /// Line the input ends on.
    pub end_line: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[line {line}] Error at '{snippet}': Unexpected character.")]
pub struct LexError {
    pub line: u32,
    pub position: usize,
    pub snippet: String,
}

pub fn lex(source: &str) -> Result<Tokens<'_>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut lexemes = Vec::new();

    while let Some(result) = lexer.next() {
        let line = lexer.extras + 1;
        match result {
            Ok(token) => lexemes.push(Lexeme { token, text: lexer.slice(), line }),
            Err(()) => {
                let span = lexer.span();
                return Err(LexError {
                    line,
                    position: span.start,
                    snippet: source[span].to_string(),
                });
            }
        }
    }

    Ok(Tokens { lexemes, end_line: lexer.extras + 1 })
}
