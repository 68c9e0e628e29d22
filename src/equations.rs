//! The user's list of equations and the pass that ties them together.
//!
//! Each [`Equation`] compiles itself whenever its text changes. Before
//! evaluating, [`Equations::bind`] rebuilds the name index, orders the valid
//! equations so every named reference comes before its users, evaluates the
//! named variables in that order and records every failure on the equation
//! that caused it.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::{EquationError, EvalError, ResolveError};
use crate::eval::{Context, EvalConfig, Machine};
use crate::parser::EquationDef;
use crate::program::{OpCode, Program};
use crate::{CompileOptions, CompiledEquation};

/// Curve colours handed out to new equations in turn (RGBA).
pub const PALETTE: [[f32; 4]; 7] = [
  [1.0, 0.0, 0.0, 1.0],
  [0.0, 1.0, 0.0, 1.0],
  [0.0, 0.0, 1.0, 1.0],
  [1.0, 1.0, 0.0, 1.0],
  [1.0, 0.0, 1.0, 1.0],
  [0.0, 1.0, 1.0, 1.0],
  [0.5, 0.5, 0.5, 1.0],
];

/// How an equation's curve is drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Style {
  pub color: [f32; 4],
  pub line_width: f32,
  pub enabled: bool,
}

impl Style {
  /// The `n`th palette colour, wrapping around.
  pub fn from_palette(n: usize) -> Self {
    Self {
      color: PALETTE[n % PALETTE.len()],
      line_width: 2.0,
      enabled: true,
    }
  }
}

impl Default for Style {
  fn default() -> Self {
    Self::from_palette(0)
  }
}

/// One user-authored equation.
#[derive(Debug, Clone)]
pub struct Equation {
  text: String,
  def: EquationDef,
  program: Program,
  is_syntax_valid: bool,
  is_eval_valid: bool,
  error: Option<EquationError>,
  /// Result of the last binding pass, for named variables.
  value: Option<f64>,
  pub style: Style,
}

impl Equation {
  pub fn new(text: impl Into<String>, style: Style, options: CompileOptions) -> Self {
    let text = text.into();
    let program = Program::empty(Rc::from(text.as_str()));
    let mut equation = Self {
      text,
      def: EquationDef::default(),
      program,
      is_syntax_valid: false,
      is_eval_valid: false,
      error: None,
      value: None,
      style,
    };
    equation.compile(options);
    equation
  }

  /// Replace the text and recompile.
  pub fn set_text(&mut self, text: impl Into<String>, options: CompileOptions) {
    self.text = text.into();
    self.compile(options);
  }

  fn compile(&mut self, options: CompileOptions) {
    self.value = None;
    match crate::compile(&self.text, options) {
      Ok(CompiledEquation { def, program }) => {
        self.def = def;
        self.program = program;
        self.is_syntax_valid = true;
        self.is_eval_valid = true;
        self.error = None;
      }
      Err(err) => {
        debug!(text = %self.text, kind = ?err.kind(), "equation does not compile");
        self.def = EquationDef::default();
        self.program = Program::empty(Rc::from(self.text.as_str()));
        self.is_syntax_valid = false;
        self.is_eval_valid = false;
        self.error = Some(err.into());
      }
    }
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn def(&self) -> &EquationDef {
    &self.def
  }

  pub fn program(&self) -> &Program {
    &self.program
  }

  /// Defined name, if the equation has a definition head.
  pub fn name(&self) -> Option<&str> {
    self.def.name.as_deref()
  }

  pub fn is_syntax_valid(&self) -> bool {
    self.is_syntax_valid
  }

  pub fn is_eval_valid(&self) -> bool {
    self.is_eval_valid
  }

  pub fn error(&self) -> Option<&EquationError> {
    self.error.as_ref()
  }

  /// The last error as display text, empty if there is none.
  pub fn last_error(&self) -> String {
    self
      .error
      .as_ref()
      .map(ToString::to_string)
      .unwrap_or_default()
  }

  /// Value bound by the last [`Equations::bind`], for named variables.
  pub fn value(&self) -> Option<f64> {
    self.value
  }

  /// Whether the equation can be drawn as a curve `y = f(x)`.
  pub fn is_plottable(&self) -> bool {
    self.is_syntax_valid
      && self.is_eval_valid
      && self.style.enabled
      && !self.def.is_variable
      && self.def.arity() == 1
  }

  fn reset_evaluation(&mut self) {
    self.value = None;
    if self.is_syntax_valid {
      self.is_eval_valid = true;
      self.error = None;
    }
  }

  fn fail(&mut self, err: impl Into<EquationError>) {
    self.is_eval_valid = false;
    self.error = Some(err.into());
  }
}

/// Entry of the name index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSlot {
  Index(usize),
  /// Defined by more than one equation.
  Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
  Unvisited,
  Visiting,
  Done,
}

/// Ordered collection of equations.
#[derive(Debug, Clone, Default)]
pub struct Equations {
  equations: Vec<Equation>,
  name_index: HashMap<String, NameSlot>,
  order: Vec<usize>,
  options: CompileOptions,
  added: usize,
  /// Set by every edit of the list; the cached order and name index no
  /// longer describe it until the next [`Equations::bind`].
  stale: bool,
}

impl Equations {
  pub fn new(options: CompileOptions) -> Self {
    Self {
      options,
      ..Self::default()
    }
  }

  /// Append a new equation and return its index.
  pub fn push(&mut self, text: impl Into<String>) -> usize {
    let style = Style::from_palette(self.added);
    self.added += 1;
    self.equations.push(Equation::new(text, style, self.options));
    self.invalidate();
    self.equations.len() - 1
  }

  pub fn remove(&mut self, index: usize) -> Option<Equation> {
    if index >= self.equations.len() {
      return None;
    }
    self.invalidate();
    Some(self.equations.remove(index))
  }

  /// Move the equation at `src` to `dst`, shifting the ones in between.
  /// Out-of-range indices leave the list unchanged.
  pub fn move_equation(&mut self, src: usize, dst: usize) {
    let len = self.equations.len();
    if src >= len || dst >= len || src == dst {
      return;
    }
    let equation = self.equations.remove(src);
    self.equations.insert(dst, equation);
    self.invalidate();
  }

  /// Replace the text of an equation and recompile it.
  pub fn set_text(&mut self, index: usize, text: impl Into<String>) -> bool {
    let options = self.options;
    match self.equations.get_mut(index) {
      Some(equation) => {
        equation.set_text(text, options);
        self.invalidate();
        true
      }
      None => false,
    }
  }

  /// Drop the order and name index computed for the previous contents.
  fn invalidate(&mut self) {
    self.stale = true;
    self.order.clear();
    self.name_index.clear();
  }

  /// Whether the list changed since the last [`Equations::bind`].
  pub fn is_stale(&self) -> bool {
    self.stale
  }

  pub fn get(&self, index: usize) -> Option<&Equation> {
    self.equations.get(index)
  }

  pub fn style_mut(&mut self, index: usize) -> Option<&mut Style> {
    self.equations.get_mut(index).map(|equation| &mut equation.style)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Equation> {
    self.equations.iter()
  }

  pub fn len(&self) -> usize {
    self.equations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.equations.is_empty()
  }

  pub fn options(&self) -> CompileOptions {
    self.options
  }

  /// Look up a defined name in the index built by the last pass.
  pub fn lookup(&self, name: &str) -> Option<NameSlot> {
    self.name_index.get(name).copied()
  }

  /// Evaluation order computed by the last [`Equations::resolve`]. Empty
  /// after any edit until the list is resolved again.
  pub fn order(&self) -> &[usize] {
    &self.order
  }

  /// Map every defined name of a syntactically valid equation to its index,
  /// or to [`NameSlot::Ambiguous`] when more than one equation defines it.
  pub fn build_name_index(&mut self) {
    self.name_index.clear();
    for (index, equation) in self.equations.iter().enumerate() {
      if !equation.is_syntax_valid {
        continue;
      }
      let Some(name) = equation.name() else {
        continue;
      };
      self
        .name_index
        .entry(name.to_string())
        .and_modify(|slot| *slot = NameSlot::Ambiguous)
        .or_insert(NameSlot::Index(index));
    }
    debug!(names = self.name_index.len(), "rebuilt name index");
  }

  /// Indices of the equations `index` refers to by name.
  ///
  /// Names not in the index are left for the evaluator, they may be built-ins
  /// or missing. A reference to one of the equation's own parameters is not
  /// a dependency.
  fn dependencies(&self, index: usize) -> Result<Vec<usize>, ResolveError> {
    let equation = &self.equations[index];
    let mut deps = Vec::new();
    for (op, name) in equation.program.references() {
      if op.code == OpCode::Variable && equation.def.param_position(name).is_some() {
        continue;
      }
      match self.name_index.get(name) {
        Some(NameSlot::Index(dep)) => {
          if !deps.contains(dep) {
            deps.push(*dep);
          }
        }
        Some(NameSlot::Ambiguous) => {
          return Err(ResolveError::AmbiguousReference {
            name: name.to_string(),
          });
        }
        None => {}
      }
    }
    Ok(deps)
  }

  /// Order the valid equations by dependency and record resolution errors.
  ///
  /// Every equation in the returned order comes after the equations it
  /// references. Syntactically invalid equations, equations with an
  /// ambiguous name or reference, and every equation on a reference cycle
  /// are left out.
  #[tracing::instrument(skip(self))]
  pub fn resolve(&mut self) -> &[usize] {
    for equation in &mut self.equations {
      equation.reset_evaluation();
    }
    self.build_name_index();

    let count = self.equations.len();
    let mut errors: Vec<Option<ResolveError>> = vec![None; count];
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (index, equation) in self.equations.iter().enumerate() {
      if !equation.is_syntax_valid {
        continue;
      }
      if let Some(name) = equation.name()
        && self.lookup(name) == Some(NameSlot::Ambiguous)
      {
        errors[index] = Some(ResolveError::AmbiguousName {
          name: name.to_string(),
        });
        continue;
      }
      match self.dependencies(index) {
        Ok(found) => deps[index] = found,
        Err(err) => errors[index] = Some(err),
      }
    }

    let eligible: Vec<bool> = self
      .equations
      .iter()
      .zip(&errors)
      .map(|(equation, error)| equation.is_syntax_valid && error.is_none())
      .collect();

    let mut marks = vec![Mark::Unvisited; count];
    let mut cyclic = vec![false; count];
    let mut order = Vec::with_capacity(count);

    for start in 0..count {
      if !eligible[start] || marks[start] != Mark::Unvisited {
        continue;
      }
      // (equation, position of the next dependency to visit)
      let mut path: Vec<(usize, usize)> = vec![(start, 0)];
      marks[start] = Mark::Visiting;

      while let Some(top) = path.last_mut() {
        let (current, next) = *top;
        if let Some(&dep) = deps[current].get(next) {
          top.1 += 1;
          match marks[dep] {
            Mark::Unvisited if eligible[dep] => {
              marks[dep] = Mark::Visiting;
              path.push((dep, 0));
            }
            Mark::Visiting => {
              let from = path.iter().position(|&(i, _)| i == dep).unwrap_or(0);
              for &(i, _) in &path[from..] {
                cyclic[i] = true;
              }
            }
            _ => {}
          }
        } else {
          path.pop();
          marks[current] = Mark::Done;
          if !cyclic[current] {
            order.push(current);
          }
        }
      }
    }

    for (index, is_cyclic) in cyclic.into_iter().enumerate() {
      if is_cyclic {
        let name = self.equations[index].name().unwrap_or_default().to_string();
        errors[index] = Some(ResolveError::CircularReference { name });
      }
    }
    for (index, error) in errors.into_iter().enumerate() {
      if let Some(error) = error {
        warn!(index, %error, "equation failed to resolve");
        self.equations[index].fail(error);
      }
    }

    debug!(?order, "resolved evaluation order");
    self.order = order;
    &self.order
  }

  /// Resolve, then evaluate every named variable in dependency order and
  /// cache its value on the equation.
  #[tracing::instrument(skip(self, config))]
  pub fn bind(&mut self, config: &EvalConfig) {
    self.resolve();
    self.stale = false;

    let mut values: Vec<(usize, f64)> = Vec::new();
    let mut failures: Vec<(usize, EvalError)> = Vec::new();
    {
      let mut ctx = Context::new(config.clone());
      let mut machine = Machine::new(config.stack_capacity);
      for &index in &self.order {
        let equation = &self.equations[index];
        let Some(name) = equation.name() else {
          continue;
        };
        if !equation.def.is_variable {
          ctx.register_function(name, &equation.def, &equation.program);
          continue;
        }
        match machine.execute(&ctx, &equation.program, &equation.def, &[]) {
          Ok(value) => {
            ctx.set_variable(name, value);
            values.push((index, value));
          }
          Err(err) => failures.push((index, err)),
        }
      }
    }

    for (index, value) in values {
      self.equations[index].value = Some(value);
    }
    for (index, err) in failures {
      warn!(index, %err, "variable failed to evaluate");
      self.equations[index].fail(err);
    }
  }

  /// Context holding the variables bound by the last [`Equations::bind`] and
  /// every named function that resolved. Empty if the list was edited since.
  pub fn context(&self, config: &EvalConfig) -> Context<'_> {
    let mut ctx = Context::new(config.clone());
    for &index in &self.order {
      let Some(equation) = self.equations.get(index) else {
        continue;
      };
      let Some(name) = equation.name() else {
        continue;
      };
      if equation.def.is_variable {
        if let Some(value) = equation.value {
          ctx.set_variable(name, value);
        }
      } else {
        ctx.register_function(name, &equation.def, &equation.program);
      }
    }
    ctx
  }

  /// Evaluate one equation against a context from [`Equations::context`].
  ///
  /// Nothing is recorded on the equation; the caller owns the error. Use
  /// [`Equations::evaluate_recorded`] to attach it instead.
  pub fn evaluate(&self, ctx: &Context<'_>, index: usize, inputs: &[f64]) -> Option<Result<f64, EvalError>> {
    let equation = self.equations.get(index)?;
    Some(ctx.eval(&equation.program, &equation.def, inputs))
  }

  /// Evaluate one equation once, rebinding first if the list was edited.
  /// A runtime error is recorded on the equation as well as returned.
  pub fn evaluate_recorded(
    &mut self,
    index: usize,
    config: &EvalConfig,
    inputs: &[f64],
  ) -> Option<Result<f64, EvalError>> {
    if self.stale {
      self.bind(config);
    }
    let result = {
      let ctx = self.context(config);
      self.evaluate(&ctx, index, inputs)?
    };
    if let Err(err) = &result {
      self.equations[index].fail(err.clone());
    }
    Some(result)
  }

  /// Evaluate a plottable equation at every `x`, rebinding first if the list
  /// was edited since the last [`Equations::bind`].
  ///
  /// Stops at the first runtime error, records it on the equation and returns
  /// the points computed before it. Non-plottable equations yield no points.
  pub fn sample(
    &mut self,
    index: usize,
    config: &EvalConfig,
    xs: impl IntoIterator<Item = f64>,
  ) -> Vec<(f64, f64)> {
    if self.stale {
      self.bind(config);
    }
    let Some(equation) = self.equations.get(index) else {
      return Vec::new();
    };
    if !equation.is_plottable() {
      return Vec::new();
    }

    let mut points = Vec::new();
    let mut failure = None;
    {
      let ctx = self.context(config);
      let mut machine = Machine::new(config.stack_capacity);
      for x in xs {
        match machine.execute(&ctx, &equation.program, &equation.def, &[x]) {
          Ok(y) => points.push((x, y)),
          Err(err) => {
            failure = Some(err);
            break;
          }
        }
      }
    }

    if let Some(err) = failure {
      debug!(index, %err, "sampling stopped");
      self.equations[index].fail(err);
    }
    points
  }
}
