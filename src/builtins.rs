//! Built-in constants and functions of the equation language.
//!
//! The function table is immutable and shared by the constant folder and the
//! evaluator. Functions are tagged as either pure (safe to evaluate at compile
//! time) or angle functions, whose result depends on the degree/radian mode
//! supplied at evaluation time.

use std::f64::consts::{E, PI, TAU};
use std::fmt;

use crate::error::EvalErrorKind;
use crate::eval::DegreeMode;

const PHI: f64 = 1.618_033_988_749_895; // golden ratio

/// Look up a built-in constant by name.
pub fn constant(name: &str) -> Option<f64> {
  match name {
    "pi" => Some(PI),
    "tau" => Some(TAU),
    "e" => Some(E),
    "phi" => Some(PHI),
    _ => None,
  }
}

/// Number of arguments a built-in accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
  Exactly(usize),
  AtLeast(usize),
}

impl Arity {
  pub fn accepts(self, argc: usize) -> bool {
    match self {
      Arity::Exactly(n) => argc == n,
      Arity::AtLeast(n) => argc >= n,
    }
  }
}

impl fmt::Display for Arity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (prefix, n) = match self {
      Arity::Exactly(n) => ("", *n),
      Arity::AtLeast(n) => ("at least ", *n),
    };
    let noun = if n == 1 { "argument" } else { "arguments" };
    write!(f, "{prefix}{n} {noun}")
  }
}

#[derive(Clone, Copy)]
pub enum BuiltinFn {
  /// Result depends only on the arguments.
  Pure(fn(&[f64]) -> f64),
  /// Angle-domain input and/or output, scaled by the active [`DegreeMode`].
  Angle(fn(f64, &DegreeMode) -> f64),
}

impl fmt::Debug for BuiltinFn {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuiltinFn::Pure(_) => f.write_str("Pure"),
      BuiltinFn::Angle(_) => f.write_str("Angle"),
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Builtin {
  pub name: &'static str,
  pub arity: Arity,
  pub func: BuiltinFn,
}

impl Builtin {
  /// Whether calls with constant arguments may be folded at compile time.
  pub fn is_pure(&self) -> bool {
    matches!(self.func, BuiltinFn::Pure(_))
  }

  /// Validate the argument count and apply the function.
  pub fn call(&self, args: &[f64], deg: &DegreeMode) -> Result<f64, EvalErrorKind> {
    if !self.arity.accepts(args.len()) {
      return Err(EvalErrorKind::Arity {
        name: self.name,
        arity: self.arity,
        got: args.len(),
      });
    }
    Ok(match self.func {
      BuiltinFn::Pure(func) => func(args),
      BuiltinFn::Angle(func) => func(args[0], deg),
    })
  }
}

const fn pure(name: &'static str, arity: Arity, func: fn(&[f64]) -> f64) -> Builtin {
  Builtin {
    name,
    arity,
    func: BuiltinFn::Pure(func),
  }
}

const fn angle(name: &'static str, func: fn(f64, &DegreeMode) -> f64) -> Builtin {
  Builtin {
    name,
    arity: Arity::Exactly(1),
    func: BuiltinFn::Angle(func),
  }
}

static BUILTINS: [Builtin; 15] = [
  pure("sqrt", Arity::Exactly(1), |a| a[0].sqrt()),
  pure("abs", Arity::Exactly(1), |a| a[0].abs()),
  pure("min", Arity::AtLeast(2), |a| a[1..].iter().fold(a[0], |m, &v| m.min(v))),
  pure("max", Arity::AtLeast(2), |a| a[1..].iter().fold(a[0], |m, &v| m.max(v))),
  pure("clamp", Arity::Exactly(3), |a| a[0].max(a[1]).min(a[2])),
  pure("mod", Arity::Exactly(2), |a| floored_mod(a[0], a[1])),
  pure("floor", Arity::Exactly(1), |a| a[0].floor()),
  pure("ceil", Arity::Exactly(1), |a| a[0].ceil()),
  pure("round", Arity::Exactly(1), |a| a[0].round()),
  // argument is an angle on the x axis
  angle("sin", |x, deg| (x * deg.from_deg_x).sin()),
  angle("cos", |x, deg| (x * deg.from_deg_x).cos()),
  angle("tan", |x, deg| (x * deg.from_deg_x).tan()),
  // result is an angle on the y axis
  angle("asin", |x, deg| x.asin() * deg.to_deg_y),
  angle("acos", |x, deg| x.acos() * deg.to_deg_y),
  angle("atan", |x, deg| x.atan() * deg.to_deg_y),
];

/// Look up a built-in function by name.
pub fn lookup(name: &str) -> Option<&'static Builtin> {
  BUILTINS.iter().find(|builtin| builtin.name == name)
}

/// Every built-in function, in table order.
pub fn all() -> &'static [Builtin] {
  &BUILTINS
}

/// Modulo whose result takes the sign of the divisor.
fn floored_mod(a: f64, b: f64) -> f64 {
  let rem = a % b;
  if rem != 0.0 && (rem < 0.0) != (b < 0.0) {
    rem + b
  } else {
    rem
  }
}
