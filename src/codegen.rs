//! Code generation: fold constant subtrees and lower the AST to bytecode.
//!
//! The emitter targets the evaluator's stack machine: every node's operation
//! is appended after all of its children's operations, so each subtree leaves
//! exactly one value on the stack.

use tracing::trace;

use crate::builtins;
use crate::eval::DegreeMode;
use crate::parser::AstNode;
use crate::program::{OpCode, Operation};

/// Emit the linear program for an AST, folding constants first if requested.
///
/// `source` is the text the AST's spans point into.
pub fn generate(mut ast: AstNode, source: &str, optimize: bool) -> Vec<Operation> {
  if optimize {
    fold_constants(&mut ast, source);
  }
  let mut ops = Vec::new();
  emit(&ast, &mut ops);
  ops
}

/// Collapse every subtree without free variables into a single value node.
///
/// Returns whether `node` itself is now a constant. Calls are only folded for
/// pure built-ins; angle functions depend on the evaluation-time degree mode
/// and user functions are not known until the equations are resolved.
pub fn fold_constants(node: &mut AstNode, source: &str) -> bool {
  match node.op.code {
    OpCode::Value(_) => return true,
    OpCode::Variable => return false,
    _ => {}
  }

  // fold every child, even after a non-constant one
  let mut all_constant = true;
  for child in &mut node.children {
    all_constant &= fold_constants(child, source);
  }
  if !all_constant {
    return false;
  }

  let args: Vec<f64> = node
    .children
    .iter()
    .filter_map(|child| match child.op.code {
      OpCode::Value(value) => Some(value),
      _ => None,
    })
    .collect();

  let Some(value) = constant_value(node, &args, source) else {
    return false;
  };

  trace!(value, op = node.op.code.name(), "folded constant subtree");
  let span = node.extent();
  *node = AstNode::value(value, span);
  true
}

fn constant_value(node: &AstNode, args: &[f64], source: &str) -> Option<f64> {
  let value = match (node.op.code, args) {
    (OpCode::Negate, [a]) => -a,
    (OpCode::Add, [a, b]) => a + b,
    (OpCode::Sub, [a, b]) => a - b,
    (OpCode::Mul, [a, b]) => a * b,
    (OpCode::Div, [a, b]) => a / b,
    (OpCode::Pow, [a, b]) => a.powf(*b),
    (OpCode::FuncCall { .. }, args) => {
      let builtin = builtins::lookup(node.op.span.text(source))?;
      if !builtin.is_pure() {
        return None;
      }
      // an arity error is left for the evaluator to report
      builtin.call(args, &DegreeMode::radians()).ok()?
    }
    _ => return None,
  };
  Some(value)
}

fn emit(node: &AstNode, ops: &mut Vec<Operation>) {
  for child in &node.children {
    emit(child, ops);
  }
  ops.push(node.op);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::{AstNode, parse};
  use crate::tokenizer::tokenize;
  use pretty_assertions::assert_eq;

  fn ast(source: &str) -> AstNode {
    parse(tokenize(source).unwrap(), source).unwrap().ast
  }

  fn codes(source: &str, optimize: bool) -> Vec<OpCode> {
    generate(ast(source), source, optimize)
      .into_iter()
      .map(|op| op.code)
      .collect()
  }

  #[test]
  fn emits_post_order() {
    assert_eq!(
      codes("1 + 2 * x", false),
      vec![
        OpCode::Value(1.0),
        OpCode::Value(2.0),
        OpCode::Variable,
        OpCode::Mul,
        OpCode::Add
      ]
    );
    assert_eq!(
      codes("-max(x, 3)", false),
      vec![
        OpCode::Variable,
        OpCode::Value(3.0),
        OpCode::FuncCall { argc: 2 },
        OpCode::Negate
      ]
    );
  }

  #[test]
  fn folds_closed_expressions_to_one_value() {
    assert_eq!(codes("2^3^2", true), vec![OpCode::Value(512.0)]);
    assert_eq!(codes("-(1 + 2) * sqrt(16)", true), vec![OpCode::Value(-12.0)]);
    assert_eq!(codes("clamp(5, 0, 1) * 2 + 1", true), vec![OpCode::Value(3.0)]);
  }

  #[test]
  fn folds_constant_subtrees_next_to_variables() {
    assert_eq!(
      codes("x * (2 + 3) + 4 / 2", true),
      vec![
        OpCode::Variable,
        OpCode::Value(5.0),
        OpCode::Mul,
        OpCode::Value(2.0),
        OpCode::Add
      ]
    );
  }

  #[test]
  fn angle_and_user_functions_are_not_folded() {
    assert_eq!(
      codes("sin(0)", true),
      vec![OpCode::Value(0.0), OpCode::FuncCall { argc: 1 }]
    );
    assert_eq!(
      codes("f(1 + 1)", true),
      vec![OpCode::Value(2.0), OpCode::FuncCall { argc: 1 }]
    );
  }

  #[test]
  fn bad_arity_is_left_for_runtime() {
    assert_eq!(
      codes("sqrt(1, 2)", true),
      vec![
        OpCode::Value(1.0),
        OpCode::Value(2.0),
        OpCode::FuncCall { argc: 2 }
      ]
    );
  }

  #[test]
  fn folded_value_spans_the_subtree() {
    let source = "x + (2 * 3)";
    let ops = generate(ast(source), source, true);
    assert_eq!(ops[1].code, OpCode::Value(6.0));
    assert_eq!(ops[1].span.text(source), "2 * 3");
  }

  #[test]
  fn folding_is_idempotent() {
    let source = "x^2 + 3*4 - max(1, 2)";
    let mut tree = ast(source);
    assert!(!fold_constants(&mut tree, source));
    let once = tree.clone();
    assert!(!fold_constants(&mut tree, source));
    assert_eq!(tree, once);
    let mut ops = Vec::new();
    emit(&tree, &mut ops);
    assert_eq!(ops, generate(once, source, true));
  }
}
