//! Tether command-line host
//!
//! Runs scripts, evaluates expressions and calls script functions on a
//! tether executor.

mod commands;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Run scripts on an embedded, thread-affine engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Executor configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: off, error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Color output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file
    Run {
        /// Script file
        file: PathBuf,
        /// Keep the loop alive this long for timers, in milliseconds
        #[arg(long, default_value_t = 0)]
        wait_ms: u64,
    },

    /// Evaluate inline code and print the result
    Eval {
        /// Code to evaluate
        code: String,
    },

    /// Load a script file, then call one of its global functions
    Call {
        /// Script file defining the function
        file: PathBuf,
        /// Function name
        function: String,
        /// Arguments, parsed as JSON when possible, otherwise passed as strings
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level: LevelFilter = cli
        .log_level
        .parse()
        .with_context(|| format!("invalid log level '{}'", cli.log_level))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let color = output::resolve_color_choice(cli.color.as_deref());
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { file, wait_ms } => commands::run::execute(config, color, &file, wait_ms),
        Commands::Eval { code } => commands::eval::execute(config, color, &code),
        Commands::Call {
            file,
            function,
            args,
        } => commands::call::execute(config, color, &file, &function, &args),
    }
}
