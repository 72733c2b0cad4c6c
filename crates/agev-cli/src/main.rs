use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use std::{
    io::{self, BufRead as _},
    path::PathBuf,
};
use tracing_subscriber::EnvFilter;

mod demos;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The strategy used to determine the local execution orders.
    #[arg(long, value_enum, default_value_t = Schedule::Grouped)]
    schedule: Schedule,

    /// Also print the attribute group partition of every symbol.
    #[arg(long)]
    groups: bool,

    /// Also print a TikZ rendering of the dependence graphs.
    #[arg(long)]
    tikz: bool,

    /// Read the grammar from a file instead of standard input.
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Names of bundled demo grammars; with none, the grammar is read from
    /// standard input until a blank line.
    demo: Vec<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, ValueEnum)]
enum Schedule {
    Grouped,
    PerAttribute,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::debug!("parsed CLI args = {:?}", args);

    if let Some(path) = &args.file {
        let grammar = agev::syntax::parse_file(path)?;
        return run_grammar(&args, grammar);
    }

    if args.demo.is_empty() {
        let source = read_stdin()?;
        return run_source(&args, &source);
    }

    for name in &args.demo {
        match demos::find(name) {
            Some(source) => {
                tracing::info!("running demo {}", name);
                run_source(&args, source)?;
            }
            None => {
                tracing::warn!(
                    "unknown demo {:?} (available: {}); reading from standard input",
                    name,
                    demos::NAMES.join(", "),
                );
                let source = read_stdin()?;
                run_source(&args, &source)?;
                break;
            }
        }
    }

    Ok(())
}

fn read_stdin() -> anyhow::Result<String> {
    let mut source = String::new();
    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read standard input")?;
        if line.trim().is_empty() {
            break;
        }
        source.push_str(&line);
        source.push('\n');
    }
    Ok(source)
}

fn run_source(args: &Args, source: &str) -> anyhow::Result<()> {
    run_grammar(args, agev::syntax::parse(source)?)
}

fn run_grammar(args: &Args, mut grammar: agev::grammar::Grammar) -> anyhow::Result<()> {
    match args.schedule {
        Schedule::Grouped => grammar.analyze(),
        Schedule::PerAttribute => {
            grammar.compute_transitive_closure();
            grammar.determine_local_execution_orders();
        }
    }

    println!("{}", agev::render::dependencies(&grammar));
    if args.groups {
        println!("{}", agev::render::groups(&grammar));
    }
    print!("{}", agev::render::execution_orders(&grammar));
    if args.tikz {
        print!("{}", agev::render::tikz(&grammar));
    }
    Ok(())
}
