//! Recursive-descent parser producing an equation definition and expression AST.
//!
//! An equation is an optional definition head followed by an expression:
//!
//! ```text
//! equation        := [definition-head] expression
//! definition-head := IDENT '=' | IDENT '(' [IDENT (',' IDENT)*] ')' '='
//! expression      := unary (binary-op expression)*
//! unary           := '-' atom ['^' expression] | ['+'] atom
//! atom            := NUMBER | IDENT | IDENT '(' [expression (',' expression)*] ')'
//!                  | '(' expression ')'
//! ```
//!
//! Binary operators are handled by precedence climbing: `+ -` bind loosest,
//! then `* /`, then `^`, which is the only right-associative operator. The
//! definition head is parsed speculatively; without a trailing `=` the cursor
//! is rewound and the whole input is treated as a plot of `x`.

use std::collections::HashMap;

use crate::builtins;
use crate::error::{CompileError, CompileResult};
use crate::program::{OpCode, Operation};
use crate::tokenizer::{Span, Token, TokenKind, describe_token, token_text};

/// Implicit parameter of a bare expression.
pub const IMPLICIT_PARAM: &str = "x";

/// Binding power of a unary minus, between `* /` and `^`.
const UNARY_PRECEDENCE: u8 = 1;

/// Expression tree produced by the parser. Each node owns its children.
#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
  pub op: Operation,
  pub children: Vec<AstNode>,
}

impl AstNode {
  pub fn leaf(op: Operation) -> Self {
    Self {
      op,
      children: Vec::new(),
    }
  }

  pub fn value(value: f64, span: Span) -> Self {
    Self::leaf(Operation::new(OpCode::Value(value), span))
  }

  pub fn unary_neg(span: Span, operand: AstNode) -> Self {
    Self {
      op: Operation::new(OpCode::Negate, span),
      children: vec![operand],
    }
  }

  pub fn binary(op: Operation, lhs: AstNode, rhs: AstNode) -> Self {
    Self {
      op,
      children: vec![lhs, rhs],
    }
  }

  /// Span covering this node and all of its descendants.
  pub fn extent(&self) -> Span {
    self
      .children
      .iter()
      .fold(self.op.span, |span, child| span.merge(&child.extent()))
  }

  pub fn is_value(&self) -> bool {
    matches!(self.op.code, OpCode::Value(_))
  }
}

/// What the left-hand side of an equation declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquationDef {
  /// `name = ...` declares a scalar; `name(args) = ...` and bare expressions
  /// declare callable functions.
  pub is_variable: bool,
  /// `None` for bare expressions.
  pub name: Option<String>,
  pub params: Vec<String>,
  param_index: HashMap<String, usize>,
}

impl EquationDef {
  pub fn variable(name: impl Into<String>) -> Self {
    Self {
      is_variable: true,
      name: Some(name.into()),
      ..Self::default()
    }
  }

  pub fn function(name: Option<String>, params: Vec<String>) -> Self {
    let param_index = params
      .iter()
      .enumerate()
      .map(|(i, param)| (param.clone(), i))
      .collect();
    Self {
      is_variable: false,
      name,
      params,
      param_index,
    }
  }

  /// The implicit `f(x) = ...` head of a bare expression.
  pub fn implicit() -> Self {
    Self::function(None, vec![IMPLICIT_PARAM.to_string()])
  }

  /// Position of a parameter in the argument list.
  pub fn param_position(&self, name: &str) -> Option<usize> {
    self.param_index.get(name).copied()
  }

  pub fn arity(&self) -> usize {
    self.params.len()
  }
}

/// Result of parsing one equation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEquation {
  pub def: EquationDef,
  pub ast: AstNode,
}

/// Parse a full equation from the token stream.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<ParsedEquation> {
  let mut stream = TokenStream::new(tokens, source);

  let def = match parse_definition(&mut stream)? {
    Some(def) => def,
    None => EquationDef::implicit(),
  };
  let ast = parse_formula(&mut stream)?;

  Ok(ParsedEquation { def, ast })
}

/// Try to consume `IDENT [ '(' params ')' ] '='`.
///
/// `f(x, y)` on its own is also a valid expression, so only the `=` decides
/// that the tokens were a definition. Anything else rewinds the cursor and
/// returns `None`.
fn parse_definition(stream: &mut TokenStream) -> CompileResult<Option<EquationDef>> {
  let start = stream.pos;
  match try_definition(stream)? {
    Some(def) => Ok(Some(def)),
    None => {
      stream.pos = start;
      Ok(None)
    }
  }
}

fn try_definition(stream: &mut TokenStream) -> CompileResult<Option<EquationDef>> {
  let Some(name_token) = stream.eat(TokenKind::Ident) else {
    return Ok(None);
  };
  let name = token_text(&name_token, stream.source).to_string();

  if !stream.equal(TokenKind::ParenOpen) {
    if !stream.equal(TokenKind::Equals) {
      return Ok(None);
    }
    return Ok(Some(EquationDef::variable(name)));
  }

  let mut params: Vec<Token> = Vec::new();
  if !stream.equal(TokenKind::ParenClose) {
    loop {
      let Some(param) = stream.eat(TokenKind::Ident) else {
        return Ok(None);
      };
      params.push(param);
      if stream.equal(TokenKind::Comma) {
        continue;
      }
      if stream.equal(TokenKind::ParenClose) {
        break;
      }
      return Ok(None);
    }
  }

  if !stream.equal(TokenKind::Equals) {
    return Ok(None);
  }

  // Committed to a definition from here on.
  let mut names: Vec<String> = Vec::with_capacity(params.len());
  for param in &params {
    let text = token_text(param, stream.source);
    if names.iter().any(|seen| seen == text) {
      return Err(CompileError::syntax(
        stream.source,
        param.loc,
        format!("duplicate parameter \"{text}\""),
      ));
    }
    names.push(text.to_string());
  }
  Ok(Some(EquationDef::function(Some(name), names)))
}

/// Parse the right-hand side and require that it consumes all input.
fn parse_formula(stream: &mut TokenStream) -> CompileResult<AstNode> {
  let node = parse_expr(stream, 0)?;

  if stream.is_eof() {
    return Ok(node);
  }

  let token = stream.current();
  if token.kind == TokenKind::ParenClose {
    return Err(CompileError::syntax(
      stream.source,
      token.loc,
      "\")\" without matching \"(\"",
    ));
  }
  let got = describe_token(Some(token), stream.source);
  Err(CompileError::syntax(
    stream.source,
    token.loc,
    format!("expected end of input, but got \"{got}\""),
  ))
}

/// Binding power of a binary operator and whether it is right-associative.
fn binary_op(kind: TokenKind) -> Option<(OpCode, u8, bool)> {
  let op = match kind {
    TokenKind::Plus => (OpCode::Add, 0, false),
    TokenKind::Minus => (OpCode::Sub, 0, false),
    TokenKind::Star => (OpCode::Mul, 1, false),
    TokenKind::Slash => (OpCode::Div, 1, false),
    TokenKind::Caret => (OpCode::Pow, 2, true),
    _ => return None,
  };
  Some(op)
}

/// A run of operands separated by binary operators binding at least `min_prec`.
fn parse_expr(stream: &mut TokenStream, min_prec: u8) -> CompileResult<AstNode> {
  let lhs = parse_unary(stream)?;
  parse_binary(stream, lhs, min_prec)
}

/// An atom with an optional sign. The negated operand takes only the
/// operators binding tighter than the minus, so `-x^2` is `-(x^2)` and
/// `1/-2/2` divides twice.
fn parse_unary(stream: &mut TokenStream) -> CompileResult<AstNode> {
  if let Some(token) = stream.eat(TokenKind::Minus) {
    let atom = parse_atom(stream)?;
    let operand = parse_binary(stream, atom, UNARY_PRECEDENCE + 1)?;
    return Ok(AstNode::unary_neg(token.span(), operand));
  }
  // unary plus is a no-op
  stream.equal(TokenKind::Plus);
  parse_atom(stream)
}

/// Precedence climbing over the operators following `lhs`.
fn parse_binary(stream: &mut TokenStream, mut lhs: AstNode, min_prec: u8) -> CompileResult<AstNode> {
  loop {
    let kind = stream.current().kind;
    let Some((code, prec, right_assoc)) = binary_op(kind) else {
      break;
    };
    if prec < min_prec {
      break;
    }
    let op_token = stream.advance();
    let next_prec = if right_assoc { prec } else { prec + 1 };
    let rhs = parse_expr(stream, next_prec)?;
    lhs = AstNode::binary(Operation::new(code, op_token.span()), lhs, rhs);
  }
  Ok(lhs)
}

/// A literal, a name, a call or a parenthesised expression.
fn parse_atom(stream: &mut TokenStream) -> CompileResult<AstNode> {
  if stream.equal(TokenKind::ParenOpen) {
    let node = parse_expr(stream, 0)?;
    stream.skip(TokenKind::ParenClose)?;
    return Ok(node);
  }

  if stream.current().kind == TokenKind::Ident && stream.peek_kind(1) == TokenKind::ParenOpen {
    return parse_call(stream);
  }

  let token = stream.current().clone();
  match token.kind {
    TokenKind::Literal => {
      stream.advance();
      let value = token.value.ok_or_else(|| {
        CompileError::syntax(
          stream.source,
          token.loc,
          "internal error: numeric token missing value",
        )
      })?;
      Ok(AstNode::value(value, token.span()))
    }
    TokenKind::Ident => {
      stream.advance();
      let name = token_text(&token, stream.source);
      match builtins::constant(name) {
        Some(value) => Ok(AstNode::value(value, token.span())),
        None => Ok(AstNode::leaf(Operation::new(OpCode::Variable, token.span()))),
      }
    }
    _ => {
      let got = describe_token(Some(&token), stream.source);
      Err(CompileError::syntax(
        stream.source,
        token.loc,
        format!("expected a number or variable, but got \"{got}\""),
      ))
    }
  }
}

/// `IDENT '(' [expression (',' expression)*] ')'`
fn parse_call(stream: &mut TokenStream) -> CompileResult<AstNode> {
  let name = stream.advance();
  stream.skip(TokenKind::ParenOpen)?;

  let mut args = Vec::new();
  if !stream.equal(TokenKind::ParenClose) {
    loop {
      args.push(parse_expr(stream, 0)?);

      if stream.equal(TokenKind::Comma) {
        let next = stream.current();
        if matches!(next.kind, TokenKind::ParenClose | TokenKind::Comma) {
          let got = describe_token(Some(next), stream.source);
          return Err(CompileError::syntax(
            stream.source,
            next.loc,
            format!("expected an argument after \",\", but got \"{got}\""),
          ));
        }
        continue;
      }
      if stream.equal(TokenKind::ParenClose) {
        break;
      }
      let token = stream.current();
      let got = describe_token(Some(token), stream.source);
      return Err(CompileError::syntax(
        stream.source,
        token.loc,
        format!("expected \",\" or \")\", but got \"{got}\""),
      ));
    }
  }

  let argc = args.len();
  Ok(AstNode {
    op: Operation::new(OpCode::FuncCall { argc }, name.span()),
    children: args,
  })
}

/// Lightweight cursor over the token vector.
///
/// The vector always ends with an `Eof` token and the cursor never moves past
/// it, so `current()` is always valid.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  fn new(mut tokens: Vec<Token>, source: &'a str) -> Self {
    if tokens.last().map(|token| token.kind) != Some(TokenKind::Eof) {
      tokens.push(Token::new(TokenKind::Eof, source.len(), 0, None));
    }
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn current(&self) -> &Token {
    &self.tokens[self.pos]
  }

  fn peek_kind(&self, lookahead: usize) -> TokenKind {
    self
      .tokens
      .get(self.pos + lookahead)
      .map_or(TokenKind::Eof, |token| token.kind)
  }

  /// Return the current token and move past it (never past `Eof`).
  fn advance(&mut self) -> Token {
    let token = self.tokens[self.pos].clone();
    if token.kind != TokenKind::Eof {
      self.pos += 1;
    }
    token
  }

  /// Consume the current token if it has the given kind.
  fn equal(&mut self, kind: TokenKind) -> bool {
    self.eat(kind).is_some()
  }

  fn eat(&mut self, kind: TokenKind) -> Option<Token> {
    if self.current().kind == kind && kind != TokenKind::Eof {
      return Some(self.advance());
    }
    None
  }

  fn skip(&mut self, kind: TokenKind) -> CompileResult<()> {
    if self.equal(kind) {
      return Ok(());
    }
    let token = self.current();
    let got = describe_token(Some(token), self.source);
    Err(CompileError::syntax(
      self.source,
      token.loc,
      format!("expected \"{}\", but got \"{got}\"", kind.describe()),
    ))
  }

  fn is_eof(&self) -> bool {
    self.current().kind == TokenKind::Eof
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CompileErrorKind;
  use crate::tokenizer::tokenize;
  use pretty_assertions::assert_eq;

  fn parse_str(source: &str) -> CompileResult<ParsedEquation> {
    parse(tokenize(source)?, source)
  }

  /// Render the tree as an s-expression so shapes are easy to compare.
  fn shape(node: &AstNode, source: &str) -> String {
    let head = match node.op.code {
      OpCode::Value(value) => return format!("{value}"),
      OpCode::Variable => return node.op.span.text(source).to_string(),
      OpCode::FuncCall { .. } => node.op.span.text(source).to_string(),
      OpCode::Negate => "neg".to_string(),
      _ => node.op.span.text(source).to_string(),
    };
    let children: Vec<String> = node.children.iter().map(|c| shape(c, source)).collect();
    format!("({head} {})", children.join(" "))
  }

  fn shape_of(source: &str) -> String {
    let parsed = parse_str(source).unwrap();
    shape(&parsed.ast, source)
  }

  #[test]
  fn precedence_and_associativity() {
    assert_eq!(shape_of("2+3*4"), "(+ 2 (* 3 4))");
    assert_eq!(shape_of("4-3-2"), "(- (- 4 3) 2)");
    assert_eq!(shape_of("8/4/2"), "(/ (/ 8 4) 2)");
    assert_eq!(shape_of("2^3^2"), "(^ 2 (^ 3 2))");
    assert_eq!(shape_of("1+2^3*4"), "(+ 1 (* (^ 2 3) 4))");
  }

  #[test]
  fn unary_minus_binding() {
    assert_eq!(shape_of("-2^2"), "(neg (^ 2 2))");
    assert_eq!(shape_of("(-2)^2"), "(^ (neg 2) 2)");
    assert_eq!(shape_of("-x+1"), "(+ (neg x) 1)");
    assert_eq!(shape_of("-x*3"), "(* (neg x) 3)");
    assert_eq!(shape_of("-x^2+1"), "(+ (neg (^ x 2)) 1)");
    assert_eq!(shape_of("2^-3+1"), "(+ (^ 2 (neg 3)) 1)");
    assert_eq!(shape_of("x * -0.5"), "(* x (neg 0.5))");
    assert_eq!(shape_of("1/-2/2"), "(/ (/ 1 (neg 2)) 2)");
    assert_eq!(shape_of("2^-1*4"), "(* (^ 2 (neg 1)) 4)");
    assert_eq!(shape_of("3*-x^2"), "(* 3 (neg (^ x 2)))");
  }

  #[test]
  fn unary_plus_is_dropped() {
    assert_eq!(shape_of("+x"), "x");
    assert_eq!(shape_of("3*+x"), "(* 3 x)");
  }

  #[test]
  fn constants_fold_into_values() {
    let parsed = parse_str("pi").unwrap();
    assert_eq!(parsed.ast.op.code, OpCode::Value(std::f64::consts::PI));
    assert_eq!(shape_of("Pi"), "Pi");
  }

  #[test]
  fn calls_record_argument_count() {
    let source = "max(1, x, min(2, 3)) + f()";
    assert_eq!(shape_of(source), "(+ (max 1 x (min 2 3)) (f ))");
    let parsed = parse_str(source).unwrap();
    assert_eq!(parsed.ast.children[0].op.code, OpCode::FuncCall { argc: 3 });
    assert_eq!(parsed.ast.children[1].op.code, OpCode::FuncCall { argc: 0 });
  }

  #[test]
  fn bare_expression_gets_implicit_x() {
    let parsed = parse_str("x^2 + 1").unwrap();
    assert!(!parsed.def.is_variable);
    assert_eq!(parsed.def.name, None);
    assert_eq!(parsed.def.params, vec!["x".to_string()]);
    assert_eq!(parsed.def.param_position("x"), Some(0));
  }

  #[test]
  fn variable_definition() {
    let parsed = parse_str("a = 2*b").unwrap();
    assert!(parsed.def.is_variable);
    assert_eq!(parsed.def.name.as_deref(), Some("a"));
    assert!(parsed.def.params.is_empty());
    assert_eq!(shape(&parsed.ast, "a = 2*b"), "(* 2 b)");
  }

  #[test]
  fn function_definition() {
    let source = "g(x, m, b) = m*x + b";
    let parsed = parse_str(source).unwrap();
    assert!(!parsed.def.is_variable);
    assert_eq!(parsed.def.name.as_deref(), Some("g"));
    assert_eq!(parsed.def.params, vec!["x", "m", "b"]);
    assert_eq!(parsed.def.param_position("b"), Some(2));
    assert_eq!(parsed.def.arity(), 3);
    assert_eq!(shape(&parsed.ast, source), "(+ (* m x) b)");

    let parsed = parse_str("k() = 4").unwrap();
    assert_eq!(parsed.def.arity(), 0);
  }

  #[test]
  fn call_without_equals_is_an_expression() {
    let source = "f(x, y)";
    let parsed = parse_str(source).unwrap();
    assert_eq!(parsed.def, EquationDef::implicit());
    assert_eq!(shape(&parsed.ast, source), "(f x y)");
  }

  #[test]
  fn duplicate_parameters_are_rejected() {
    let err = parse_str("f(x, x) = x").unwrap_err();
    assert_eq!(err.kind(), CompileErrorKind::Syntax);
    assert_eq!(err.loc(), 5);
    assert!(err.message().contains("duplicate parameter"));
  }

  #[test]
  fn trailing_comma_in_call() {
    let err = parse_str("f(x,)").unwrap_err();
    assert_eq!(err.kind(), CompileErrorKind::Syntax);
    assert!(err.message().contains("\",\""), "{}", err.message());
    assert!(err.message().contains("\")\""), "{}", err.message());
    assert_eq!(err.loc(), 4);
  }

  #[test]
  fn missing_separator_in_call() {
    let err = parse_str("max(1 2)").unwrap_err();
    assert_eq!(err.message(), "expected \",\" or \")\", but got \"2\"");
  }

  #[test]
  fn unmatched_parentheses() {
    let err = parse_str("(x + 1").unwrap_err();
    assert_eq!(err.message(), "expected \")\", but got \"EOF\"");
    let err = parse_str("x + 1)").unwrap_err();
    assert_eq!(err.message(), "\")\" without matching \"(\"");
    assert_eq!(err.loc(), 5);
  }

  #[test]
  fn trailing_tokens() {
    let err = parse_str("x y").unwrap_err();
    assert_eq!(err.message(), "expected end of input, but got \"y\"");
    let err = parse_str("a = b = c").unwrap_err();
    assert_eq!(err.loc(), 6);
  }

  #[test]
  fn missing_operands() {
    assert!(parse_str("").is_err());
    assert!(parse_str("a =").is_err());
    assert!(parse_str("1 +").is_err());
    let err = parse_str("--x").unwrap_err();
    assert_eq!(err.message(), "expected a number or variable, but got \"-\"");
  }

  #[test]
  fn extent_covers_subtree() {
    let source = "1 + sqrt(x)";
    let parsed = parse_str(source).unwrap();
    assert_eq!(parsed.ast.extent().text(source), "1 + sqrt(x");
  }
}
