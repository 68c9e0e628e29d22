//! Linear bytecode shared by the parser, code generator and evaluator.
//!
//! A [`Program`] is the post-order (reverse Polish) encoding of an expression
//! tree: running its operations left to right against a value stack leaves
//! exactly the tree's value on top. Operations refer to their source text by
//! [`Span`], so the program keeps its own immutable copy of the source.

use std::fmt;
use std::rc::Rc;

use crate::tokenizer::Span;

/// Instruction opcode plus its payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
  /// Push a literal.
  Value(f64),
  /// Push a parameter, bound variable or unresolved name.
  Variable,
  /// Pop `argc` arguments, push the call result.
  FuncCall { argc: usize },
  Add,
  Sub,
  Mul,
  Div,
  Pow,
  /// Pop one value, push its negation.
  Negate,
}

impl OpCode {
  /// Opcode mnemonic used in runtime diagnostics and dumps.
  pub fn name(&self) -> &'static str {
    match self {
      OpCode::Value(_) => "VALUE",
      OpCode::Variable => "VARIABLE",
      OpCode::FuncCall { .. } => "FUNCCALL",
      OpCode::Add => "ADD",
      OpCode::Sub => "SUB",
      OpCode::Mul => "MUL",
      OpCode::Div => "DIV",
      OpCode::Pow => "POW",
      OpCode::Negate => "NEGATE",
    }
  }

  /// Number of values the operation pops.
  pub fn pops(&self) -> usize {
    match self {
      OpCode::Value(_) | OpCode::Variable => 0,
      OpCode::FuncCall { argc } => *argc,
      OpCode::Negate => 1,
      OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => 2,
    }
  }

  fn infix_symbol(&self) -> Option<&'static str> {
    match self {
      OpCode::Add => Some("+"),
      OpCode::Sub => Some("-"),
      OpCode::Mul => Some("*"),
      OpCode::Div => Some("/"),
      OpCode::Pow => Some("^"),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Operation {
  pub code: OpCode,
  /// Source text of the token the operation came from.
  pub span: Span,
}

impl Operation {
  pub fn new(code: OpCode, span: Span) -> Self {
    Self { code, span }
  }
}

/// An emitted operation list together with the source it points into.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
  source: Rc<str>,
  ops: Vec<Operation>,
}

impl Program {
  pub fn new(source: Rc<str>, ops: Vec<Operation>) -> Self {
    Self { source, ops }
  }

  /// A program with no operations. Never valid to execute.
  pub fn empty(source: Rc<str>) -> Self {
    Self {
      source,
      ops: Vec::new(),
    }
  }

  pub fn ops(&self) -> &[Operation] {
    &self.ops
  }

  pub fn is_empty(&self) -> bool {
    self.ops.is_empty()
  }

  pub fn len(&self) -> usize {
    self.ops.len()
  }

  pub fn source(&self) -> &str {
    &self.source
  }

  /// Source text of an operation of this program.
  pub fn text(&self, op: &Operation) -> &str {
    op.span.text(&self.source)
  }

  /// Names referenced by `VARIABLE` and `FUNCCALL` operations, in program order.
  pub fn references(&self) -> impl Iterator<Item = (&Operation, &str)> + '_ {
    self
      .ops
      .iter()
      .filter(|op| matches!(op.code, OpCode::Variable | OpCode::FuncCall { .. }))
      .map(|op| (op, self.text(op)))
  }

  /// Walk the program and check it leaves exactly one value on the stack
  /// without ever popping more than is available.
  pub fn is_balanced(&self) -> bool {
    let mut depth = 0usize;
    for op in &self.ops {
      let pops = op.code.pops();
      if depth < pops {
        return false;
      }
      depth = depth - pops + 1;
    }
    depth == 1
  }

  /// One operation per line, for debugging.
  pub fn dump(&self) -> String {
    let mut out = String::new();
    for (i, op) in self.ops.iter().enumerate() {
      let line = match op.code {
        OpCode::Value(value) => format!("{i:3}  {:<9}{value}", op.code.name()),
        OpCode::FuncCall { argc } => {
          format!("{i:3}  {:<9}{} argc={argc}", op.code.name(), self.text(op))
        }
        _ => format!("{i:3}  {:<9}{}", op.code.name(), self.text(op)),
      };
      out.push_str(line.trim_end());
      out.push('\n');
    }
    out
  }

  /// Rebuild a fully parenthesised infix expression by running the program
  /// over a stack of strings. Returns `None` for malformed programs.
  pub fn to_infix(&self) -> Option<String> {
    let mut stack: Vec<String> = Vec::new();
    for op in &self.ops {
      let value = match op.code {
        OpCode::Value(value) => format!("{value}"),
        OpCode::Variable => self.text(op).to_string(),
        OpCode::FuncCall { argc } => {
          let base = stack.len().checked_sub(argc)?;
          let args = stack.split_off(base).join(",");
          format!("{}({args})", self.text(op))
        }
        OpCode::Negate => {
          let a = stack.pop()?;
          format!("-({a})")
        }
        code => {
          let b = stack.pop()?;
          let a = stack.pop()?;
          format!("({a} {} {b})", code.infix_symbol()?)
        }
      };
      stack.push(value);
    }
    match (stack.pop(), stack.is_empty()) {
      (Some(result), true) => Some(result),
      _ => None,
    }
  }
}

impl fmt::Display for Program {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.to_infix() {
      Some(infix) => f.write_str(&infix),
      None => f.write_str("<malformed program>"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn op(code: OpCode, loc: usize, len: usize) -> Operation {
    Operation::new(code, Span::new(loc, len))
  }

  fn sample() -> Program {
    // x^2 + max(x, 1)
    let source: Rc<str> = Rc::from("x^2 + max(x, 1)");
    Program::new(
      source,
      vec![
        op(OpCode::Variable, 0, 1),
        op(OpCode::Value(2.0), 2, 1),
        op(OpCode::Pow, 1, 1),
        op(OpCode::Variable, 10, 1),
        op(OpCode::Value(1.0), 13, 1),
        op(OpCode::FuncCall { argc: 2 }, 6, 3),
        op(OpCode::Add, 4, 1),
      ],
    )
  }

  #[test]
  fn renders_infix() {
    assert_eq!(sample().to_string(), "((x ^ 2) + max(x,1))");
  }

  #[test]
  fn lists_references_in_order() {
    let program = sample();
    let names: Vec<&str> = program.references().map(|(_, name)| name).collect();
    assert_eq!(names, vec!["x", "x", "max"]);
  }

  #[test]
  fn balance_check() {
    assert!(sample().is_balanced());
    let source: Rc<str> = Rc::from("1 +");
    let truncated = Program::new(
      source.clone(),
      vec![op(OpCode::Value(1.0), 0, 1), op(OpCode::Add, 2, 1)],
    );
    assert!(!truncated.is_balanced());
    assert_eq!(truncated.to_string(), "<malformed program>");
    assert!(!Program::empty(source).is_balanced());
  }

  #[test]
  fn dump_lists_one_op_per_line() {
    let dump = sample().dump();
    assert_eq!(dump.lines().count(), 7);
    assert!(dump.contains("FUNCCALL max argc=2"));
    assert!(dump.lines().next().unwrap_or_default().ends_with("VARIABLE x"));
  }
}
