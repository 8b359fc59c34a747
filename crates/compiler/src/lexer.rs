//! Lexer for Tack source text.
//!
//! Produces tokens on demand with one-token lookahead. Whitespace and
//! `#`-to-end-of-line comments are skipped between tokens. Positions are
//! 1-indexed and attached to every token for error reporting.

use std::fmt;
use std::path::{Path, PathBuf};

/// Source position of a token (1-indexed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// Token kinds. Keywords carry a `Kw` prefix; operators are named after the
/// operator they spell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Arrow,
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitOr,
    Shl,
    Shr,
    KwDo,
    KwEnd,
    KwFunc,
    KwConst,
    KwIf,
    KwElse,
    KwExtern,
    KwInclude,
    KwNot,
    KwNeg,
    KwDup,
    KwDrop,
    KwSwap,
    KwRot,
    KwOver,
    KwInt,
    KwBool,
    KwPtr,
    KwLong,
    KwStr,
}

/// A token with its raw text and source position.
///
/// For identifiers the lexeme is the name, for numbers the digit run, and
/// for strings the bytes between the quotes (verbatim, no escapes).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub pos: Position,
}

fn keyword_kind(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "do" => TokenKind::KwDo,
        "end" => TokenKind::KwEnd,
        "func" => TokenKind::KwFunc,
        "const" => TokenKind::KwConst,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "extern" => TokenKind::KwExtern,
        "include" => TokenKind::KwInclude,
        "not" => TokenKind::KwNot,
        "neg" => TokenKind::KwNeg,
        "dup" => TokenKind::KwDup,
        "drop" => TokenKind::KwDrop,
        "swap" => TokenKind::KwSwap,
        "rot" => TokenKind::KwRot,
        "over" => TokenKind::KwOver,
        "int" => TokenKind::KwInt,
        "bool" => TokenKind::KwBool,
        "ptr" => TokenKind::KwPtr,
        "long" => TokenKind::KwLong,
        "str" => TokenKind::KwStr,
        _ => return None,
    };
    Some(kind)
}

pub struct Lexer {
    bytes: Vec<u8>,
    offset: usize,
    line: usize,
    column: usize,
    file: PathBuf,
    lookahead: Option<Token>,
}

impl Lexer {
    pub fn new(source: &str, file: impl Into<PathBuf>) -> Self {
        Lexer {
            bytes: source.as_bytes().to_vec(),
            offset: 0,
            line: 1,
            column: 1,
            file: file.into(),
            lookahead: None,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Result<Option<Token>, String> {
        if let Some(tok) = self.lookahead.take() {
            return Ok(Some(tok));
        }
        self.scan()
    }

    /// One-token lookahead without consuming.
    pub fn peek(&mut self) -> Result<Option<&Token>, String> {
        if self.lookahead.is_none() {
            self.lookahead = self.scan()?;
        }
        Ok(self.lookahead.as_ref())
    }

    /// Position of the next token (or of the end of input). Used for
    /// errors about tokens that are not there.
    pub fn here(&mut self) -> Position {
        match &self.lookahead {
            Some(tok) => tok.pos.clone(),
            None => self.position(),
        }
    }

    fn position(&self) -> Position {
        Position {
            file: self.file.clone(),
            line: self.line,
            column: self.column,
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.offset)?;
        self.offset += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    /// Consume the next byte if it equals `expected`.
    fn eat(&mut self, expected: u8) -> bool {
        if self.peek_byte() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(b) = self.peek_byte() {
            if b == b'#' {
                while let Some(b) = self.bump() {
                    if b == b'\n' {
                        break;
                    }
                }
            } else if b.is_ascii_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn scan(&mut self) -> Result<Option<Token>, String> {
        self.skip_trivia();
        let pos = self.position();
        let Some(b) = self.peek_byte() else {
            return Ok(None);
        };
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => Ok(Some(self.scan_ident(pos))),
            b'0'..=b'9' => Ok(Some(self.scan_number(pos))),
            b'"' => self.scan_string(pos).map(Some),
            _ => self.scan_operator(b, pos).map(Some),
        }
    }

    fn scan_ident(&mut self, pos: Position) -> Token {
        let mut lexeme = String::new();
        while let Some(b) = self.peek_byte() {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' {
                lexeme.push(b as char);
                self.bump();
            } else {
                break;
            }
        }
        let kind = keyword_kind(&lexeme).unwrap_or(TokenKind::Ident);
        Token { kind, lexeme, pos }
    }

    fn scan_number(&mut self, pos: Position) -> Token {
        let mut lexeme = String::new();
        while let Some(b) = self.peek_byte() {
            if b.is_ascii_digit() {
                lexeme.push(b as char);
                self.bump();
            } else {
                break;
            }
        }
        Token {
            kind: TokenKind::Number,
            lexeme,
            pos,
        }
    }

    fn scan_string(&mut self, pos: Position) -> Result<Token, String> {
        self.bump(); // opening quote
        let mut bytes = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => break,
                Some(b) => bytes.push(b),
                None => {
                    return Err(format!(
                        "{}: unterminated string literal (missing closing quote)",
                        pos
                    ));
                }
            }
        }
        // The source is valid UTF-8 and '"' is ASCII, so the slice between
        // the quotes is valid UTF-8 as well.
        let lexeme = String::from_utf8(bytes)
            .map_err(|_| format!("{}: invalid UTF-8 in string literal", pos))?;
        Ok(Token {
            kind: TokenKind::Str,
            lexeme,
            pos,
        })
    }

    fn scan_operator(&mut self, b: u8, pos: Position) -> Result<Token, String> {
        self.bump();
        let (kind, lexeme) = match b {
            b'+' => (TokenKind::Plus, "+"),
            b'*' => (TokenKind::Star, "*"),
            b'/' => (TokenKind::Slash, "/"),
            b'=' => (TokenKind::Eq, "="),
            b'&' => (TokenKind::BitAnd, "&"),
            b'|' => (TokenKind::BitOr, "|"),
            b'-' => {
                if self.eat(b'>') {
                    (TokenKind::Arrow, "->")
                } else {
                    (TokenKind::Minus, "-")
                }
            }
            b'<' => {
                if self.eat(b'=') {
                    (TokenKind::Le, "<=")
                } else if self.eat(b'<') {
                    (TokenKind::Shl, "<<")
                } else {
                    (TokenKind::Lt, "<")
                }
            }
            b'>' => {
                if self.eat(b'=') {
                    (TokenKind::Ge, ">=")
                } else if self.eat(b'>') {
                    (TokenKind::Shr, ">>")
                } else {
                    (TokenKind::Gt, ">")
                }
            }
            b'!' => {
                if self.eat(b'=') {
                    (TokenKind::Ne, "!=")
                } else {
                    return Err(format!("{}: unexpected character '!'", pos));
                }
            }
            _ => {
                return Err(format!("{}: unexpected character '{}'", pos, b as char));
            }
        };
        Ok(Token {
            kind,
            lexeme: lexeme.to_string(),
            pos,
        })
    }
}
