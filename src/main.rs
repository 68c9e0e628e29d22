use anyhow::{bail, ensure};
use clap::Parser;
use rgrapher::{CompileOptions, DegreeMode, Equation, Equations, EvalConfig};

/// Upper bound on the number of points `--sample` may produce.
const MAX_SAMPLES: usize = 100_000;

#[derive(Parser, Debug)]
#[command(name = "rgrapher", version, about = "Compile and evaluate a set of equations")]
struct Cli {
  /// Equations, resolved together. A bare expression is a curve in `x`.
  #[arg(required = true, value_name = "EQUATION")]
  equations: Vec<String>,

  /// Measure angles in degrees instead of radians.
  #[arg(long)]
  degrees: bool,

  /// Disable constant folding.
  #[arg(long)]
  no_optimize: bool,

  /// Evaluate every curve at X (repeatable).
  #[arg(long = "at", value_name = "X", allow_negative_numbers = true)]
  at: Vec<f64>,

  /// Sample every curve from FROM to TO (inclusive) in steps of STEP.
  #[arg(
    long,
    num_args = 3,
    value_names = ["FROM", "TO", "STEP"],
    allow_negative_numbers = true
  )]
  sample: Option<Vec<f64>>,

  /// Print the bytecode of every valid equation.
  #[arg(long)]
  dump: bool,
}

fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  use tracing_subscriber::{EnvFilter, fmt};
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
  fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .init();

  let options = CompileOptions {
    optimize: !cli.no_optimize,
  };
  let config = EvalConfig {
    degree_mode: if cli.degrees {
      DegreeMode::degrees()
    } else {
      DegreeMode::radians()
    },
    ..EvalConfig::default()
  };

  let mut xs = cli.at.clone();
  if let Some(range) = &cli.sample {
    xs.extend(sample_range(range)?);
  }

  let mut equations = Equations::new(options);
  for text in &cli.equations {
    equations.push(text.as_str());
  }
  equations.bind(&config);

  let mut failed = 0;
  for index in 0..equations.len() {
    if !report(&mut equations, index, &config, &xs, cli.dump) {
      failed += 1;
    }
  }

  if failed > 0 {
    bail!("{failed} of {} equation(s) failed", equations.len());
  }
  Ok(())
}

/// Print one equation and its samples. Returns false if it has an error.
fn report(equations: &mut Equations, index: usize, config: &EvalConfig, xs: &[f64], dump: bool) -> bool {
  let Some(equation) = equations.get(index) else {
    return true;
  };
  println!("[{index}] {}", equation.text());

  if equation.is_syntax_valid() {
    if dump {
      for line in equation.program().dump().lines() {
        println!("    {line}");
      }
    }
    println!("    {}", describe(equation));
  }

  if equation.is_plottable() && !xs.is_empty() {
    let name = equation.name().unwrap_or("f").to_string();
    for (x, y) in equations.sample(index, config, xs.iter().copied()) {
      println!("    {name}({x}) = {y}");
    }
  }

  let Some(equation) = equations.get(index) else {
    return true;
  };
  match equation.error() {
    Some(err) => {
      for line in err.to_string().lines() {
        println!("    error: {line}");
      }
      false
    }
    None => true,
  }
}

fn describe(equation: &Equation) -> String {
  let def = equation.def();
  let name = equation.name().unwrap_or("f");
  if def.is_variable {
    return match equation.value() {
      Some(value) => format!("{name} = {value}"),
      None => format!("{name} = {}", equation.program()),
    };
  }
  format!("{name}({}) = {}", def.params.join(", "), equation.program())
}

fn sample_range(range: &[f64]) -> anyhow::Result<Vec<f64>> {
  let &[from, to, step] = range else {
    bail!("--sample takes exactly three values");
  };
  ensure!(
    from.is_finite() && to.is_finite(),
    "sample range must be finite"
  );
  ensure!(step > 0.0 && step.is_finite(), "sample step must be positive");
  ensure!(from <= to, "sample range is empty: {from} > {to}");

  // the span of two finite values can still overflow to infinity
  let steps = ((to - from) / step).floor();
  ensure!(
    steps.is_finite() && steps < MAX_SAMPLES as f64,
    "sample range produces more than {MAX_SAMPLES} points"
  );
  let count = steps as usize + 1;
  Ok((0..count).map(|i| from + i as f64 * step).collect())
}
