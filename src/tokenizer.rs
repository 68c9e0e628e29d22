//! Lexical analysis: turns equation text into a flat vector of tokens.
//!
//! The tokenizer knows nothing about semantics beyond recognising numeric
//! literals, identifiers and the single-character operators of the equation
//! language. Tokens do not own text; they record a byte range into the source
//! they were produced from, so that source must stay unchanged for as long as
//! the tokens (and anything compiled from them) are alive.
//!
//! A leading sign is never part of a literal: `-5` is `Minus, Literal` and the
//! parser treats the sign as a unary operator.

use crate::error::{CompileError, CompileResult};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Literal,
  Ident,
  Plus,
  Minus,
  Star,
  Slash,
  Caret,
  ParenOpen,
  ParenClose,
  Comma,
  Equals,
  Eof,
}

impl TokenKind {
  /// Spelling used in diagnostics.
  pub fn describe(self) -> &'static str {
    match self {
      TokenKind::Literal => "number",
      TokenKind::Ident => "identifier",
      TokenKind::Plus => "+",
      TokenKind::Minus => "-",
      TokenKind::Star => "*",
      TokenKind::Slash => "/",
      TokenKind::Caret => "^",
      TokenKind::ParenOpen => "(",
      TokenKind::ParenClose => ")",
      TokenKind::Comma => ",",
      TokenKind::Equals => "=",
      TokenKind::Eof => "EOF",
    }
  }

  fn from_byte(c: u8) -> Option<Self> {
    let kind = match c {
      b'+' => TokenKind::Plus,
      b'-' => TokenKind::Minus,
      b'*' => TokenKind::Star,
      b'/' => TokenKind::Slash,
      b'^' => TokenKind::Caret,
      b'(' => TokenKind::ParenOpen,
      b')' => TokenKind::ParenClose,
      b',' => TokenKind::Comma,
      b'=' => TokenKind::Equals,
      _ => return None,
    };
    Some(kind)
  }
}

/// Byte range into the source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
  pub loc: usize,
  pub len: usize,
}

impl Span {
  pub fn new(loc: usize, len: usize) -> Self {
    Self { loc, len }
  }

  pub fn end(&self) -> usize {
    self.loc + self.len
  }

  /// Smallest span covering both `self` and `other`.
  pub fn merge(&self, other: &Span) -> Span {
    let loc = self.loc.min(other.loc);
    let end = self.end().max(other.end());
    Span::new(loc, end - loc)
  }

  /// Return the slice of `source` covered by this span.
  ///
  /// Out-of-range spans yield an empty string instead of panicking.
  pub fn text<'a>(&self, source: &'a str) -> &'a str {
    source.get(self.loc..self.end()).unwrap_or("")
  }
}

/// Lexical information needed by later stages.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub kind: TokenKind,
  /// Only set for [`TokenKind::Literal`].
  pub value: Option<f64>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  pub fn new(kind: TokenKind, loc: usize, len: usize, value: Option<f64>) -> Self {
    Self {
      kind,
      value,
      loc,
      len,
    }
  }

  pub fn span(&self) -> Span {
    Span::new(self.loc, self.len)
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      i = scan_float(bytes, i);
      let text = &input[start..i];
      let value = text.parse::<f64>().map_err(|err| {
        CompileError::tokenize(
          input,
          start,
          format!("invalid number ({err}): \"{}\"", &input[start..]),
        )
      })?;
      tokens.push(Token::new(TokenKind::Literal, start, i - start, Some(value)));
      continue;
    }

    if is_ident_start(c) {
      let start = i;
      while i < bytes.len() && is_ident_continue(bytes[i]) {
        i += 1;
      }
      tokens.push(Token::new(TokenKind::Ident, start, i - start, None));
      continue;
    }

    if let Some(kind) = TokenKind::from_byte(c) {
      tokens.push(Token::new(kind, i, 1, None));
      i += 1;
      continue;
    }

    return Err(CompileError::tokenize(
      input,
      i,
      format!("unknown token: \"{}\"", &input[i..]),
    ));
  }

  tokens.push(Token::new(TokenKind::Eof, input.len(), 0, None));
  Ok(tokens)
}

/// Find the end of a float literal starting at `start`.
///
/// Accepts `digits [. digits] [(e|E) [+|-] digits]`. The exponent is only
/// consumed when at least one digit follows it, so `2e` lexes as the literal
/// `2` followed by the identifier `e`.
fn scan_float(bytes: &[u8], start: usize) -> usize {
  let digits = |mut i: usize| {
    while i < bytes.len() && bytes[i].is_ascii_digit() {
      i += 1;
    }
    i
  };

  let mut i = digits(start);
  if i < bytes.len() && bytes[i] == b'.' {
    i = digits(i + 1);
  }
  if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
    let mut j = i + 1;
    if j < bytes.len() && matches!(bytes[j], b'+' | b'-') {
      j += 1;
    }
    if j < bytes.len() && bytes[j].is_ascii_digit() {
      i = digits(j);
    }
  }
  i
}

fn is_ident_start(c: u8) -> bool {
  c == b'_' || c.is_ascii_alphabetic()
}

fn is_ident_continue(c: u8) -> bool {
  c == b'_' || c.is_ascii_alphanumeric()
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  token.span().text(source)
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>, source: &str) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => token_text(t, source).to_string(),
    },
    None => "EOF".to_string(),
  }
}
