//! kwasm CLI - run and inspect WebAssembly guests on the kwasm host bridge.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kwasm_host::observability::{TracingConfig, init_tracing};
use std::path::PathBuf;

/// kwasm - host bridge for WebAssembly guests.
#[derive(Parser)]
#[command(name = "kwasm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a guest module's entry point and wait for its workers
    Run {
        /// Path to the .wasm module
        module: PathBuf,

        /// Maximum number of concurrently running workers
        #[arg(long)]
        max_workers: Option<u32>,

        /// Disable worker threads
        #[arg(long)]
        no_threads: bool,

        /// TLS block size reported to the guest
        #[arg(long)]
        tls_size: Option<u32>,

        /// Global property as NAME=JSON (repeatable)
        #[arg(short, long = "global", value_name = "NAME=JSON")]
        globals: Vec<String>,
    },

    /// Show a module's imports, exports and bridge capabilities
    Inspect {
        /// Path to the .wasm module
        module: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = init_tracing(TracingConfig::for_verbosity(cli.verbose).apply_env())?;

    match cli.command {
        Commands::Run {
            module,
            max_workers,
            no_threads,
            tls_size,
            globals,
        } => {
            let options = commands::run::RunOptions {
                max_workers,
                no_threads,
                tls_size,
                globals,
            };
            commands::run::run(&module, options).await
        }
        Commands::Inspect { module, json } => commands::inspect::run(&module, json).await,
        Commands::Version => commands::version::run(),
    }
}
