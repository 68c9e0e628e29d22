//! Crate root: wires together the equation pipeline.
//!
//! The stages are small and composable:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns a definition head plus
//!   an expression AST.
//! - `codegen` folds constant subtrees and lowers the AST into a [`Program`].
//! - `eval` runs programs on a bounded stack machine.
//! - `equations` keeps a list of user equations, orders them by dependency
//!   and binds their names for evaluation.
//! - `error` centralises the error types shared by the other modules.

pub mod builtins;
pub mod codegen;
pub mod equations;
pub mod error;
pub mod eval;
pub mod parser;
pub mod program;
pub mod tokenizer;

use std::rc::Rc;

use tracing::debug;

pub use equations::{Equation, Equations, Style};
pub use error::{
  CompileError, CompileErrorKind, CompileResult, EquationError, EvalError, EvalErrorKind,
  ResolveError,
};
pub use eval::{Context, DegreeMode, EvalConfig, Machine};
pub use parser::EquationDef;
pub use program::{OpCode, Operation, Program};

/// Front-end settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
  /// Fold subtrees without free variables into single values.
  pub optimize: bool,
}

impl Default for CompileOptions {
  fn default() -> Self {
    Self { optimize: true }
  }
}

/// Output of compiling one equation's text.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledEquation {
  pub def: EquationDef,
  pub program: Program,
}

/// Tokenize, parse and generate code for a single equation.
///
/// The returned program keeps its own copy of `text`.
pub fn compile(text: &str, options: CompileOptions) -> CompileResult<CompiledEquation> {
  let source: Rc<str> = Rc::from(text);
  let tokens = tokenizer::tokenize(&source)?;
  let parsed = parser::parse(tokens, &source)?;
  let ops = codegen::generate(parsed.ast, &source, options.optimize);
  debug!(text, ops = ops.len(), "compiled equation");
  Ok(CompiledEquation {
    def: parsed.def,
    program: Program::new(source, ops),
  })
}

/// Compile `text` and evaluate it once with a default context.
pub fn evaluate(text: &str, inputs: &[f64]) -> Result<f64, EquationError> {
  let compiled = compile(text, CompileOptions::default())?;
  let ctx = Context::default();
  Ok(ctx.eval(&compiled.program, &compiled.def, inputs)?)
}
