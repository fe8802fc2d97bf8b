//! liftql — compile query pipelines to T-SQL
//!
//! # Usage
//!
//! ```bash
//! # Compile a pipeline against ./liftql.toml
//! liftql compile "Owners | order FirstName desc, Id | skip 5 | where Id % 2 = 0"
//!
//! # Show the tree before and after rewriting
//! liftql explain "Configs | order Arch desc, Id | skip 5 | oftype ArubaMachineConfig"
//!
//! # Validate a model file
//! liftql check --config demos/liftql.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use liftql::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "liftql")]
#[command(version)]
#[command(about = "Sort-lifting query compiler", long_about = None)]
#[command(after_help = "EXAMPLES:
    liftql compile 'Owners | order FirstName desc, Id | take 10'
    liftql compile 'Owners | where Alias <> null' --null-semantics native
    liftql explain 'Configs | order Id | skip 5 | oftype ArubaMachineConfig'")]
struct Cli {
    /// Model and compiler options (defaults to ./liftql.toml, then the user config dir)
    #[arg(short, long, global = true, env = "LIFTQL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured null comparison mode
    #[arg(long, global = true, value_enum)]
    null_semantics: Option<NullMode>,

    /// Override the configured conditional shaping
    #[arg(long, global = true, value_enum)]
    shaping: Option<Shaping>,

    /// Log every rewrite rule that fires
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum NullMode {
    Clr,
    Native,
}

impl From<NullMode> for NullComparisonMode {
    fn from(mode: NullMode) -> Self {
        match mode {
            NullMode::Clr => NullComparisonMode::ClrSemantics,
            NullMode::Native => NullComparisonMode::NativeSemantics,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Shaping {
    Uniform,
    SubtypeOnly,
}

impl From<Shaping> for ConditionalShaping {
    fn from(shaping: Shaping) -> Self {
        match shaping {
            Shaping::Uniform => ConditionalShaping::Uniform,
            Shaping::SubtypeOnly => ConditionalShaping::SubtypeOnly,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a pipeline to SQL
    Compile {
        /// The pipeline, e.g. "Owners | order Id | take 10"
        pipeline: String,
    },
    /// Show the parsed tree, the rewritten tree and the SQL
    Explain {
        pipeline: String,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Validate the model and list its entity sets
    Check,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "liftql=debug" } else { "liftql=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let mut options = config.compiler;
    if let Some(mode) = cli.null_semantics {
        options.null_semantics = mode.into();
    }
    if let Some(shaping) = cli.shaping {
        options.shaping = shaping.into();
    }

    let metadata = config.metadata.freeze().context("invalid model")?;
    let compiler = Compiler::new(Arc::new(metadata), options);

    match &cli.command {
        Commands::Compile { pipeline } => {
            let tree = liftql::parse(pipeline)?;
            println!("{}", compiler.compile(tree)?);
        }
        Commands::Explain { pipeline, format } => {
            let tree = liftql::parse(pipeline)?;
            let explain = compiler.explain(tree)?;
            match format {
                OutputFormat::Text => print_explain(&explain),
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "input": explain.input,
                        "rewritten": explain.rewritten,
                        "sql": explain.sql,
                    });
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
            }
        }
        Commands::Check => print_model(&compiler),
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::discover().ok_or_else(|| {
            anyhow!("no liftql.toml found; pass --config or set LIFTQL_CONFIG")
        })?,
    };
    tracing::debug!(path = %path.display(), "loading config");
    Config::load(&path).with_context(|| format!("loading {}", path.display()))
}

fn print_explain(explain: &Explain) {
    println!("{}", "Input:".green().bold());
    print!("{}", explain.input.to_string().white());
    println!();
    println!("{}", "Rewritten:".green().bold());
    print!("{}", explain.rewritten.to_string().white());
    println!();
    println!("{}", "SQL:".green().bold());
    println!("{}", explain.sql.cyan());
}

fn print_model(compiler: &Compiler) {
    let metadata = compiler.metadata();
    println!("{} model is valid", "✓".green());
    println!();
    println!(
        "{:16} {:24} {:24} {}",
        "Set".white().bold(),
        "Table".white().bold(),
        "Root type".white().bold(),
        "Discriminator".white().bold()
    );
    println!("{}", "─".repeat(80).dimmed());
    for set in metadata.relations() {
        println!(
            "{:16} {:24} {:24} {}",
            set.name.cyan(),
            set.table,
            set.root_type.yellow(),
            set.discriminator.as_deref().unwrap_or("-").dimmed()
        );
        for ty in metadata.subtree(&set.root_type) {
            let conditions: Vec<String> = ty.conditions.iter().map(|c| c.predicate().to_string()).collect();
            println!(
                "    {} {}",
                ty.name.white(),
                conditions.join(" AND ").dimmed()
            );
        }
    }
}
