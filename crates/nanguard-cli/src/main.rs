//! nanguard command-line interface.
//!
//! Provides the `nanguard` binary for running JSON-serialized programs under
//! the error-checking transformation. Programs are `ClosedProgram` JSON;
//! argument files are a JSON list of arrays.

mod demo;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use nanguard_check::{checkify_with, run_fuzz, CheckifyConfig, Checkified, FuzzConfig, RuleTable};
use nanguard_core::{Array, ClosedProgram, EvalConfig};

/// Error-checking runner for array programs.
#[derive(Parser)]
#[command(name = "nanguard", about = "Run array programs with functional error checks")]
struct Cli {
    /// Upper bound on iterations of any single while loop.
    #[arg(
        long,
        global = true,
        env = "NANGUARD_MAX_WHILE_ITERATIONS",
        default_value_t = 1_000_000
    )]
    max_while_iterations: usize,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run a program with checks and print the error summary and outputs.
    Run {
        /// Path to the program JSON file.
        program: PathBuf,

        /// Path to a JSON list of argument arrays.
        #[arg(short, long)]
        args: PathBuf,

        /// Stage the checked program first and evaluate the staged form.
        #[arg(long)]
        staged: bool,
    },
    /// Print a program in textual form.
    Show {
        /// Path to the program JSON file.
        program: PathBuf,

        /// Print the staged checked program instead.
        #[arg(long)]
        checked: bool,
    },
    /// List the default check rules.
    Rules,
    /// Run a program on random inputs and report those that trigger checks.
    Fuzz {
        /// Path to the program JSON file.
        program: PathBuf,

        /// Number of random inputs.
        #[arg(short, long, default_value_t = 100)]
        iterations: u32,

        /// Seed for input generation.
        #[arg(short, long, env = "NANGUARD_SEED", default_value_t = 42)]
        seed: u64,
    },
    /// Print a built-in example program as JSON.
    Demo {
        /// Demo name; omit to list the available demos.
        name: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let eval = EvalConfig {
        max_while_iterations: cli.max_while_iterations,
        ..EvalConfig::default()
    };

    let exit_code = match cli.command {
        Commands::Run {
            program,
            args,
            staged,
        } => run_program(&program, &args, staged, eval),
        Commands::Show { program, checked } => show_program(&program, checked, eval),
        Commands::Rules => list_rules(),
        Commands::Fuzz {
            program,
            iterations,
            seed,
        } => fuzz_program(&program, iterations, seed, eval),
        Commands::Demo { name } => print_demo(name.as_deref()),
    };
    process::exit(exit_code);
}

/// Load a program and prepare it for checked execution.
///
/// Errors are reported to stderr and mapped to exit code 2 (invalid input)
/// or 3 (I/O error).
fn load_checked(path: &Path, eval: EvalConfig) -> Result<Checkified, i32> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error: failed to read '{}': {}", path.display(), e);
        3
    })?;
    let program = ClosedProgram::from_json(&json).map_err(|e| {
        eprintln!("Error: invalid program '{}': {}", path.display(), e);
        2
    })?;
    tracing::debug!(
        path = %path.display(),
        equations = program.program.equations.len(),
        "loaded program"
    );
    let config = CheckifyConfig::default().with_eval(eval);
    Ok(checkify_with(&program, config))
}

fn load_args(path: &Path) -> Result<Vec<Array>, i32> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error: failed to read '{}': {}", path.display(), e);
        3
    })?;
    serde_json::from_str(&json).map_err(|e| {
        eprintln!("Error: invalid arguments '{}': {}", path.display(), e);
        2
    })
}

/// Execute the run subcommand.
///
/// Returns exit code: 0 = no check triggered, 1 = a check triggered,
/// 2 = invalid program or arguments, 3 = I/O error.
fn run_program(program: &Path, args: &Path, staged: bool, eval: EvalConfig) -> i32 {
    let checked = match load_checked(program, eval.clone()) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let args = match load_args(args) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let result = if staged {
        checked
            .stage()
            .and_then(|staged| staged.call_with(&args, &eval))
    } else {
        checked.call(&args)
    };
    let (error, outputs) = match result {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };

    let summary = error.get();
    let report = serde_json::json!({
        "error": summary,
        "outputs": outputs,
    });
    let json = serde_json::to_string_pretty(&report)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize result: {}\"}}", e));
    println!("{}", json);
    if summary.is_some() {
        1
    } else {
        0
    }
}

fn show_program(program: &Path, checked: bool, eval: EvalConfig) -> i32 {
    let prepared = match load_checked(program, eval) {
        Ok(c) => c,
        Err(code) => return code,
    };
    if !checked {
        println!("{}", prepared.program());
        return 0;
    }
    match prepared.stage() {
        Ok(staged) => {
            println!("{}", staged.program);
            for (code, message) in &staged.messages {
                println!("  {}: {}", code, message);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            2
        }
    }
}

fn list_rules() -> i32 {
    let rules = RuleTable::global();
    for (kind, rule) in rules.iter() {
        println!("{:<24} {}", kind.name(), rule);
    }
    0
}

/// Execute the fuzz subcommand. Exits with 1 when any input triggered a check.
fn fuzz_program(program: &Path, iterations: u32, seed: u64, eval: EvalConfig) -> i32 {
    let checked = match load_checked(program, eval) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let config = FuzzConfig {
        iterations,
        random_seed: seed,
        ..FuzzConfig::default()
    };
    let result = match run_fuzz(&checked, config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };

    for failure in &result.failures {
        let inputs = serde_json::to_string(&failure.inputs).unwrap_or_default();
        println!("{}", inputs);
        for line in failure.summary.lines() {
            println!("  {}", line);
        }
    }
    println!(
        "{} run, {} passed, {} failed (seed {})",
        result.total_run,
        result.passed,
        result.failures.len(),
        result.random_seed
    );
    if result.failures.is_empty() {
        0
    } else {
        1
    }
}

fn print_demo(name: Option<&str>) -> i32 {
    let Some(name) = name else {
        for (name, about) in demo::DEMOS {
            println!("{:<12} {}", name, about);
        }
        return 0;
    };
    let program = match demo::build(name) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return 2;
        }
    };
    match program.to_json() {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            2
        }
    }
}
