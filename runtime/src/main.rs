// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The executable driver.
//!
//! Runs the compiled-in entry program (`fib`) on the arguments given on the
//! command line: converts each argument to the entry point's declared
//! parameter type, evaluates on the worker pool, prints the result to
//! stdout and the wall-clock time to stderr.

use anyhow::{Context as _, bail};
use clap::Parser;
use filament_runtime::{
    ClosureTable, Config, Context, Engine, FnGen, FnId, FnInst, Lazy, ParamKind, Program, Shape,
    SizeClass, Suspend, cache, ops,
};
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "filament", about = "Parallel demand-driven evaluation runtime")]
struct Cli {
    /// Worker count override; defaults to the hardware concurrency.
    #[arg(long)]
    threads: Option<usize>,

    /// Log per-thread CPU placement to stderr.
    #[arg(long, short)]
    verbose: bool,

    /// Arguments for the program entry point.
    #[arg(allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let start = Instant::now();
    let program = fib_program();

    if cli.args.len() != program.params.len() {
        eprintln!(
            "Invalid number of arguments expected {} got {}.",
            program.params.len(),
            cli.args.len(),
        );
        return ExitCode::FAILURE;
    }

    let args = match program
        .params
        .iter()
        .zip(&cli.args)
        .map(|(kind, raw)| convert_arg(*kind, raw))
        .collect::<anyhow::Result<Vec<Lazy>>>()
    {
        Ok(args) => args,
        Err(error) => {
            eprintln!("{error:#}");
            return ExitCode::FAILURE;
        }
    };

    let engine = Engine::with_config(Config {
        num_cpus: cli.threads,
        verbose: cli.verbose,
    });
    let result = engine.run(&program, args);

    println!("{result}");
    eprintln!("Execution time: {}ns", start.elapsed().as_nanos());

    ExitCode::SUCCESS
}

/// Converts one command-line argument to its declared parameter type.
fn convert_arg(kind: ParamKind, raw: &str) -> anyhow::Result<Lazy> {
    match kind {
        ParamKind::Int => {
            let value = raw
                .parse()
                .with_context(|| format!("invalid Int literal {raw:?}"))?;
            Ok(cache::lazy_int(value))
        }
        ParamKind::Bool => match raw {
            "true" => Ok(cache::lazy_bool(true)),
            "false" => Ok(cache::lazy_bool(false)),
            _ => bail!("invalid Bool literal {raw:?}"),
        },
    }
}

/// The demo entry point, the way a compiler front-end would emit it:
/// `fib n = if n < 0 then 0 else if n <= 1 then 1 else fib(n-1) + fib(n-2)`.
fn fib_program() -> Program {
    struct FibInst {
        n: Lazy,
        fib: FnId,
        plus: FnId,
        /// Scratch: the pending sum, so re-entry after a stack inversion
        /// does not spawn the recursion twice.
        sum: Option<Lazy>,
    }

    impl FnInst for FibInst {
        fn body(&mut self, cx: &mut Context) -> Result<Lazy, Suspend> {
            cx.demand(&self.n);
            cx.wait(&[&self.n])?;
            let n = self.n.as_int();
            if n < 0 {
                return Ok(cache::lazy_int(0));
            }
            if n <= 1 {
                return Ok(cache::lazy_int(1));
            }
            if self.sum.is_none() {
                let (left_work, left) = cx.call(self.fib, &[cache::lazy_int(n - 1)]);
                let (right_work, right) = cx.call(self.fib, &[cache::lazy_int(n - 2)]);
                let (sum_work, sum) = cx.call(self.plus, &[left, right]);
                cx.spawn(&left_work);
                cx.spawn(&right_work);
                cx.spawn(&sum_work);
                self.sum = Some(sum);
            }
            Ok(self.sum.clone().expect("spawned above"))
        }

        fn bounds(&self) -> SizeClass {
            SizeClass::range(10, 40)
        }
    }

    let table = ClosureTable::new();
    let ops = ops::install(&table);

    let fib = table.reserve();
    let plus = ops.plus;
    table.fill(
        fib,
        FnGen::new(Shape::Leaf, cache::lazy_unit(), move |mut args, _env| {
            let n = args.pop().expect("fib takes one argument");
            Box::new(FibInst {
                n,
                fib,
                plus,
                sum: None,
            })
        }),
    );

    Program {
        table,
        entry: fib,
        params: vec![ParamKind::Int],
    }
}
