//! Shared error types used across the equation pipeline.
//!
//! Compile diagnostics echo the offending source in quotes with a caret
//! marker under the byte that stopped tokenizing or parsing. Runtime errors
//! name the failing operation together with the source text it came from.

use snafu::Snafu;

use crate::builtins::Arity;

pub type CompileResult<T> = Result<T, CompileError>;

/// Coarse classification of [`CompileError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
  Tokenize,
  Syntax,
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum CompileError {
  #[snafu(display("{expr_line}\n{marker} tokenize: {message}"))]
  Tokenize {
    loc: usize,
    expr_line: String,
    marker: String,
    message: String,
  },
  #[snafu(display("{expr_line}\n{marker} syntax error, {message}"))]
  Syntax {
    loc: usize,
    expr_line: String,
    marker: String,
    message: String,
  },
}

impl CompileError {
  /// Lexical error anchored at a byte offset in the source.
  pub fn tokenize(expr: &str, loc: usize, message: impl Into<String>) -> Self {
    let (loc, expr_line, marker) = locate(expr, loc);
    Self::Tokenize {
      loc,
      expr_line,
      marker,
      message: message.into(),
    }
  }

  /// Grammar error anchored at a byte offset in the source.
  pub fn syntax(expr: &str, loc: usize, message: impl Into<String>) -> Self {
    let (loc, expr_line, marker) = locate(expr, loc);
    Self::Syntax {
      loc,
      expr_line,
      marker,
      message: message.into(),
    }
  }

  pub fn kind(&self) -> CompileErrorKind {
    match self {
      Self::Tokenize { .. } => CompileErrorKind::Tokenize,
      Self::Syntax { .. } => CompileErrorKind::Syntax,
    }
  }

  /// Byte offset of the offending token.
  pub fn loc(&self) -> usize {
    match self {
      Self::Tokenize { loc, .. } | Self::Syntax { loc, .. } => *loc,
    }
  }

  /// The bare message without the source echo.
  pub fn message(&self) -> &str {
    match self {
      Self::Tokenize { message, .. } | Self::Syntax { message, .. } => message,
    }
  }
}

fn locate(expr: &str, loc: usize) -> (usize, String, String) {
  let expr_line = format!("'{expr}'");
  let mut safe_loc = loc.min(expr.len());
  while !expr.is_char_boundary(safe_loc) {
    safe_loc -= 1;
  }
  let char_offset = expr[..safe_loc].chars().count() + 1; // account for opening quote
  let marker = format!("{}^", " ".repeat(char_offset));
  (safe_loc, expr_line, marker)
}

/// What went wrong while executing a program.
#[derive(Debug, Clone, PartialEq, Snafu)]
pub enum EvalErrorKind {
  #[snafu(display("unknown variable \"{name}\""))]
  UnknownVariable { name: String },
  #[snafu(display("unknown function \"{name}\""))]
  UnknownFunction { name: String },
  #[snafu(display("function \"{name}\" takes {expected} argument(s) but was called with {got}"))]
  ArgumentCount {
    name: String,
    expected: usize,
    got: usize,
  },
  #[snafu(display("equation takes {expected} input(s) but {got} were supplied"))]
  InputCount { expected: usize, got: usize },
  #[snafu(display("{name}() takes {arity}, got {got}"))]
  Arity {
    name: &'static str,
    arity: Arity,
    got: usize,
  },
  #[snafu(display("stack underflow"))]
  StackUnderflow,
  #[snafu(display("stack overflow (capacity {capacity})"))]
  StackOverflow { capacity: usize },
  #[snafu(display("program left {depth} values on the stack"))]
  UnbalancedStack { depth: usize },
  #[snafu(display("recursion too deep (limit {limit} nested calls)"))]
  RecursionTooDeep { limit: usize },
}

/// Runtime error raised by the stack machine.
///
/// `op` and `text` identify the operation that failed; they are empty for
/// failures detected after the last operation ran.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(display("{kind}{}", op_suffix(*op, text)))]
pub struct EvalError {
  pub kind: EvalErrorKind,
  pub op: Option<&'static str>,
  pub text: String,
}

impl EvalError {
  pub fn new(kind: EvalErrorKind) -> Self {
    Self {
      kind,
      op: None,
      text: String::new(),
    }
  }

  pub fn at(kind: EvalErrorKind, op: &'static str, text: impl Into<String>) -> Self {
    Self {
      kind,
      op: Some(op),
      text: text.into(),
    }
  }
}

fn op_suffix(op: Option<&str>, text: &str) -> String {
  match op {
    Some(op) => format!("\nop: {op} text: \"{text}\""),
    None => String::new(),
  }
}

/// Registry-level errors found while ordering equations.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum ResolveError {
  #[snafu(display("\"{name}\" is defined by more than one equation"))]
  AmbiguousName { name: String },
  #[snafu(display("ambiguous reference to \"{name}\""))]
  AmbiguousReference { name: String },
  #[snafu(display("circular reference through \"{name}\""))]
  CircularReference { name: String },
}

/// The last error recorded on an equation, whichever stage produced it.
#[derive(Debug, Clone, PartialEq, Snafu)]
pub enum EquationError {
  #[snafu(context(false), display("{source}"))]
  Compile { source: CompileError },
  #[snafu(context(false), display("{source}"))]
  Resolve { source: ResolveError },
  #[snafu(context(false), display("{source}"))]
  Eval { source: EvalError },
}
