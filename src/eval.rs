//! Stack-machine evaluator for compiled programs.
//!
//! A [`Machine`] owns a bounded value stack and a frame pointer. Calls to
//! user-defined functions run the callee's program on the same stack: the
//! callee's arguments stay in place and its frame pointer points at the first
//! of them, so parameter lookups are plain indexed reads.

use std::collections::HashMap;
use std::f64::consts::PI;

use crate::builtins;
use crate::error::{EvalError, EvalErrorKind};
use crate::parser::EquationDef;
use crate::program::{OpCode, Operation, Program};

/// Scale factors applied by the angle built-ins.
///
/// `from_deg_x` converts an angle read on the x axis into radians before it
/// is passed to `sin`/`cos`/`tan`; `to_deg_y` converts the radians returned by
/// `asin`/`acos`/`atan` into the unit of the y axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegreeMode {
  pub from_deg_x: f64,
  pub to_deg_y: f64,
}

impl DegreeMode {
  pub const fn radians() -> Self {
    Self::per_axis(false, false)
  }

  pub const fn degrees() -> Self {
    Self::per_axis(true, true)
  }

  pub const fn per_axis(x_degrees: bool, y_degrees: bool) -> Self {
    Self {
      from_deg_x: if x_degrees { PI / 180.0 } else { 1.0 },
      to_deg_y: if y_degrees { 180.0 / PI } else { 1.0 },
    }
  }
}

impl Default for DegreeMode {
  fn default() -> Self {
    Self::radians()
  }
}

/// Settings for one evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
  pub degree_mode: DegreeMode,
  /// Maximum number of values on the stack, including call arguments.
  pub stack_capacity: usize,
  /// Maximum nesting of user function calls.
  pub max_call_depth: usize,
}

impl Default for EvalConfig {
  fn default() -> Self {
    Self {
      degree_mode: DegreeMode::radians(),
      stack_capacity: 64,
      max_call_depth: 64,
    }
  }
}

/// A callable equation as seen by `FUNCCALL`.
#[derive(Debug, Clone, Copy)]
pub struct UserFunction<'a> {
  pub def: &'a EquationDef,
  pub program: &'a Program,
}

/// Names visible to a program: bound variables and callable user functions.
#[derive(Debug, Clone, Default)]
pub struct Context<'a> {
  config: EvalConfig,
  variables: HashMap<String, f64>,
  functions: HashMap<&'a str, UserFunction<'a>>,
}

impl<'a> Context<'a> {
  pub fn new(config: EvalConfig) -> Self {
    Self {
      config,
      variables: HashMap::new(),
      functions: HashMap::new(),
    }
  }

  pub fn config(&self) -> &EvalConfig {
    &self.config
  }

  pub fn with_variable(mut self, name: impl Into<String>, value: f64) -> Self {
    self.set_variable(name, value);
    self
  }

  pub fn set_variable(&mut self, name: impl Into<String>, value: f64) {
    self.variables.insert(name.into(), value);
  }

  pub fn variable(&self, name: &str) -> Option<f64> {
    self.variables.get(name).copied()
  }

  pub fn variables(&self) -> &HashMap<String, f64> {
    &self.variables
  }

  pub fn register_function(&mut self, name: &'a str, def: &'a EquationDef, program: &'a Program) {
    self.functions.insert(name, UserFunction { def, program });
  }

  pub fn function(&self, name: &str) -> Option<&UserFunction<'a>> {
    self.functions.get(name)
  }

  /// Run `program` once on a fresh machine.
  pub fn eval(&self, program: &Program, def: &EquationDef, inputs: &[f64]) -> Result<f64, EvalError> {
    Machine::new(self.config.stack_capacity).execute(self, program, def, inputs)
  }
}

/// The value stack and call state. Reuse one machine to avoid reallocating
/// the stack when sampling an equation many times.
#[derive(Debug, Clone)]
pub struct Machine {
  stack: Vec<f64>,
  capacity: usize,
  /// Index of the first argument of the running call.
  frame: usize,
  /// Lowest slot the running program may pop.
  floor: usize,
  depth: usize,
}

impl Machine {
  pub fn new(capacity: usize) -> Self {
    Self {
      stack: Vec::with_capacity(capacity),
      capacity,
      frame: 0,
      floor: 0,
      depth: 0,
    }
  }

  pub fn stack_len(&self) -> usize {
    self.stack.len()
  }

  pub fn frame(&self) -> usize {
    self.frame
  }

  /// Evaluate `program` with `inputs` bound to the parameters of `def`.
  ///
  /// The stack and frame pointer are reset first and are back at zero after
  /// a successful run. After an error their contents are unspecified.
  pub fn execute(
    &mut self,
    ctx: &Context<'_>,
    program: &Program,
    def: &EquationDef,
    inputs: &[f64],
  ) -> Result<f64, EvalError> {
    self.stack.clear();
    self.frame = 0;
    self.floor = 0;
    self.depth = 0;

    if inputs.len() != def.arity() {
      return Err(EvalError::new(EvalErrorKind::InputCount {
        expected: def.arity(),
        got: inputs.len(),
      }));
    }
    if inputs.len() > self.capacity {
      return Err(EvalError::new(EvalErrorKind::StackOverflow {
        capacity: self.capacity,
      }));
    }
    self.stack.extend_from_slice(inputs);
    self.floor = inputs.len();

    let result = self.run(ctx, program, def)?;
    self.stack.truncate(self.frame);
    Ok(result)
  }

  /// Execute every operation, then pop the single value the program left.
  fn run(&mut self, ctx: &Context<'_>, program: &Program, def: &EquationDef) -> Result<f64, EvalError> {
    for op in program.ops() {
      self.step(ctx, program, def, op)?;
    }
    match self.stack.len() - self.floor {
      1 => self.pop().map_err(EvalError::new),
      0 => Err(EvalError::new(EvalErrorKind::StackUnderflow)),
      depth => Err(EvalError::new(EvalErrorKind::UnbalancedStack { depth })),
    }
  }

  fn step(
    &mut self,
    ctx: &Context<'_>,
    program: &Program,
    def: &EquationDef,
    op: &Operation,
  ) -> Result<(), EvalError> {
    let at = |kind| EvalError::at(kind, op.code.name(), program.text(op));

    match op.code {
      OpCode::Value(value) => self.push(value).map_err(at),
      OpCode::Variable => {
        let name = program.text(op);
        let value = match def.param_position(name) {
          Some(index) => self.stack[self.frame + index],
          None => ctx.variable(name).ok_or_else(|| {
            at(EvalErrorKind::UnknownVariable {
              name: name.to_string(),
            })
          })?,
        };
        self.push(value).map_err(at)
      }
      OpCode::FuncCall { argc } => self.call(ctx, program.text(op), argc).map_err(|err| match err {
        Call::Here(kind) => at(kind),
        Call::Callee(err) => err,
      }),
      OpCode::Negate => {
        let a = self.pop().map_err(at)?;
        self.push(-a).map_err(at)
      }
      code => {
        let b = self.pop().map_err(at)?;
        let a = self.pop().map_err(at)?;
        let value = match code {
          OpCode::Add => a + b,
          OpCode::Sub => a - b,
          OpCode::Mul => a * b,
          OpCode::Div => a / b,
          _ => a.powf(b),
        };
        self.push(value).map_err(at)
      }
    }
  }

  fn call(&mut self, ctx: &Context<'_>, name: &str, argc: usize) -> Result<(), Call> {
    if self.stack.len() - self.floor < argc {
      return Err(Call::Here(EvalErrorKind::StackUnderflow));
    }
    let base = self.stack.len() - argc;

    if let Some(builtin) = builtins::lookup(name) {
      let value = builtin
        .call(&self.stack[base..], &ctx.config.degree_mode)
        .map_err(Call::Here)?;
      self.stack.truncate(base);
      return self.push(value).map_err(Call::Here);
    }

    let Some(function) = ctx.function(name) else {
      return Err(Call::Here(EvalErrorKind::UnknownFunction {
        name: name.to_string(),
      }));
    };
    if function.def.arity() != argc {
      return Err(Call::Here(EvalErrorKind::ArgumentCount {
        name: name.to_string(),
        expected: function.def.arity(),
        got: argc,
      }));
    }
    if self.depth >= ctx.config.max_call_depth {
      return Err(Call::Here(EvalErrorKind::RecursionTooDeep {
        limit: ctx.config.max_call_depth,
      }));
    }

    let (frame, floor) = (self.frame, self.floor);
    self.frame = base;
    self.floor = self.stack.len();
    self.depth += 1;
    let result = self.run(ctx, function.program, function.def);
    self.depth -= 1;
    self.frame = frame;
    self.floor = floor;

    let value = result.map_err(Call::Callee)?;
    self.stack.truncate(base);
    self.push(value).map_err(Call::Here)
  }

  fn push(&mut self, value: f64) -> Result<(), EvalErrorKind> {
    if self.stack.len() >= self.capacity {
      return Err(EvalErrorKind::StackOverflow {
        capacity: self.capacity,
      });
    }
    self.stack.push(value);
    Ok(())
  }

  fn pop(&mut self) -> Result<f64, EvalErrorKind> {
    if self.stack.len() <= self.floor {
      return Err(EvalErrorKind::StackUnderflow);
    }
    self.stack.pop().ok_or(EvalErrorKind::StackUnderflow)
  }
}

/// Where a failed call went wrong: at the call site, or inside the callee
/// (whose error already names its own operation).
enum Call {
  Here(EvalErrorKind),
  Callee(EvalError),
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{CompileOptions, CompiledEquation, compile};
  use pretty_assertions::assert_eq;

  fn compiled(text: &str) -> CompiledEquation {
    compile(text, CompileOptions::default()).unwrap()
  }

  fn unfolded(text: &str) -> CompiledEquation {
    compile(text, CompileOptions { optimize: false }).unwrap()
  }

  fn eval(text: &str, inputs: &[f64]) -> Result<f64, EvalError> {
    let eq = compiled(text);
    Context::default().eval(&eq.program, &eq.def, inputs)
  }

  #[test]
  fn arithmetic_and_precedence() {
    assert_eq!(eval("2^3^2", &[0.0]), Ok(512.0));
    assert_eq!(eval("4-3-2", &[0.0]), Ok(-1.0));
    assert_eq!(eval("2+3*4", &[0.0]), Ok(14.0));
    assert_eq!(eval("-x^2", &[2.0]), Ok(-4.0));
    assert_eq!(eval("(-x)^2", &[2.0]), Ok(4.0));
    assert_eq!(eval("8/x+5", &[2.0]), Ok(9.0));
  }

  #[test]
  fn division_by_zero_follows_ieee() {
    assert_eq!(eval("1/x", &[0.0]), Ok(f64::INFINITY));
    assert!(eval("x/x", &[0.0]).unwrap().is_nan());
  }

  #[test]
  fn trig_uses_configured_degree_mode() {
    let eq = unfolded("sin(x)");
    let radians = Context::default();
    assert_eq!(radians.eval(&eq.program, &eq.def, &[0.0]), Ok(0.0));

    let degrees = Context::new(EvalConfig {
      degree_mode: DegreeMode::degrees(),
      ..EvalConfig::default()
    });
    let value = degrees.eval(&eq.program, &eq.def, &[90.0]).unwrap();
    assert!((value - 1.0).abs() < 1e-12);

    let eq = compiled("atan(1)");
    let y_only = Context::new(EvalConfig {
      degree_mode: DegreeMode::per_axis(false, true),
      ..EvalConfig::default()
    });
    let value = y_only.eval(&eq.program, &eq.def, &[0.0]).unwrap();
    assert!((value - 45.0).abs() < 1e-9);
  }

  #[test]
  fn parameters_shadow_bound_variables() {
    let eq = compiled("f(a) = a + b");
    let ctx = Context::default().with_variable("a", 100.0).with_variable("b", 10.0);
    assert_eq!(ctx.eval(&eq.program, &eq.def, &[1.0]), Ok(11.0));
  }

  #[test]
  fn unknown_names_report_the_operation() {
    let err = eval("x + y", &[1.0]).unwrap_err();
    assert_eq!(
      err.kind,
      EvalErrorKind::UnknownVariable {
        name: "y".to_string()
      }
    );
    assert_eq!(err.op, Some("VARIABLE"));
    assert_eq!(err.text, "y");

    let err = eval("nope(x)", &[1.0]).unwrap_err();
    assert_eq!(err.op, Some("FUNCCALL"));
    assert_eq!(err.to_string(), "unknown function \"nope\"\nop: FUNCCALL text: \"nope\"");
  }

  #[test]
  fn builtin_arity_is_checked_at_run_time() {
    let err = eval("sqrt(x, 2)", &[4.0]).unwrap_err();
    assert!(matches!(err.kind, EvalErrorKind::Arity { name: "sqrt", got: 2, .. }));
  }

  #[test]
  fn input_count_must_match_parameters() {
    let err = eval("g(a, b) = a * b", &[1.0]).unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::InputCount { expected: 2, got: 1 });
  }

  #[test]
  fn nested_calls_restore_the_frame() {
    let g = compiled("g(a, b) = a - b");
    let h = compiled("h(a) = g(a, 1) * 2");
    let main = compiled("g(5, 2) * x + h(x)");

    let mut ctx = Context::default();
    ctx.register_function("g", &g.def, &g.program);
    ctx.register_function("h", &h.def, &h.program);

    let mut machine = Machine::new(ctx.config().stack_capacity);
    assert_eq!(machine.execute(&ctx, &main.program, &main.def, &[3.0]), Ok(13.0));
    assert_eq!(machine.stack_len(), 0);
    assert_eq!(machine.frame(), 0);

    // the same machine is reusable after a failure
    let err = machine.execute(&ctx, &main.program, &main.def, &[]).unwrap_err();
    assert!(matches!(err.kind, EvalErrorKind::InputCount { .. }));
    assert_eq!(machine.execute(&ctx, &main.program, &main.def, &[1.0]), Ok(3.0));
    assert_eq!(machine.stack_len(), 0);
  }

  #[test]
  fn user_function_argument_count() {
    let g = compiled("g(x, m, b) = m * x + b");
    let mut ctx = Context::default();
    ctx.register_function("g", &g.def, &g.program);

    let call = compiled("g(x, 2)");
    let err = ctx.eval(&call.program, &call.def, &[1.0]).unwrap_err();
    assert_eq!(
      err.kind,
      EvalErrorKind::ArgumentCount {
        name: "g".to_string(),
        expected: 3,
        got: 2
      }
    );

    let call = compiled("g(x, 2, 1)");
    assert_eq!(ctx.eval(&call.program, &call.def, &[4.0]), Ok(9.0));
  }

  #[test]
  fn callee_errors_name_the_callee_operation() {
    let g = compiled("g(a) = a + missing");
    let mut ctx = Context::default();
    ctx.register_function("g", &g.def, &g.program);
    let call = compiled("1 + g(x)");
    let err = ctx.eval(&call.program, &call.def, &[1.0]).unwrap_err();
    assert_eq!(err.op, Some("VARIABLE"));
    assert_eq!(err.text, "missing");
  }

  #[test]
  fn unbounded_recursion_is_cut_off() {
    let f = compiled("f(x) = f(x)");
    let mut ctx = Context::new(EvalConfig {
      max_call_depth: 8,
      ..EvalConfig::default()
    });
    ctx.register_function("f", &f.def, &f.program);
    let err = ctx.eval(&f.program, &f.def, &[1.0]).unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::RecursionTooDeep { limit: 8 });
  }

  #[test]
  fn pushing_past_capacity_overflows() {
    let eq = unfolded("1 + (2 + (3 + (4 + 5)))");
    let ctx = Context::new(EvalConfig {
      stack_capacity: 4,
      ..EvalConfig::default()
    });
    let err = ctx.eval(&eq.program, &eq.def, &[0.0]).unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::StackOverflow { capacity: 4 });
    assert_eq!(err.op, Some("VALUE"));
  }

  #[test]
  fn malformed_programs_fail_cleanly() {
    let sources = ["x^2 + max(x, 3) * -x", "clamp(x, 0, 1) - 4 / x", "-(x + 1)"];
    let ctx = Context::default();
    let mut machine = Machine::new(16);

    for source in sources {
      let eq = unfolded(source);
      let ops = eq.program.ops();
      let mut variants = Vec::new();
      for k in 0..ops.len() {
        variants.push(ops[..k].to_vec());
        variants.push(ops[k + 1..].to_vec());
        let mut dropped = ops.to_vec();
        dropped.remove(k);
        variants.push(dropped);
      }

      for variant in variants {
        let program = Program::new(eq.program.source().into(), variant);
        match machine.execute(&ctx, &program, &eq.def, &[2.0]) {
          Ok(_) => {
            assert!(program.is_balanced(), "{}", program.dump());
            assert_eq!(machine.stack_len(), 0);
          }
          Err(err) => {
            assert!(!program.is_balanced(), "{}", program.dump());
            assert!(
              matches!(
                err.kind,
                EvalErrorKind::StackUnderflow | EvalErrorKind::UnbalancedStack { .. }
              ),
              "{err}"
            );
          }
        }
      }
    }
  }

  #[test]
  fn empty_program_underflows() {
    let eq = compiled("x");
    let empty = Program::empty(eq.program.source().into());
    let err = Context::default().eval(&empty, &eq.def, &[1.0]).unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::StackUnderflow);
  }
}
