use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod backend;
mod config;
mod evaluation;
mod events;
mod job;
mod judge;
mod models;
mod output;
mod parser;
mod prompts;
mod provider;
mod rubric;
mod runner;
mod scheduler;
mod server;
mod storage;
#[cfg(test)]
mod testing;

use crate::config::Config;
use crate::output::OutputFormat;
use crate::runner::Runner;

/// LLM benchmarking harness - generate answers from several models and have two judges grade them
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output - log every backend request
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single job file (TOML or JSON) and print its events
    Run {
        job_file: PathBuf,

        /// Output format: plain or json
        #[arg(short, long, default_value = "plain")]
        output: OutputFormat,
    },
    /// Serve the HTTP job API
    Serve {
        /// Listen address, overrides `bind` from the config
        #[arg(long)]
        bind: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = Config::load(args.config.as_deref())?;
    let runner = Arc::new(Runner::from_config(&config));

    match args.command {
        Command::Run { job_file, output } => {
            let job = job::load_job_file(&job_file);
            let events = runner.spawn_job(job);

            let stdout = std::io::stdout();
            let failed = output::write_events(&mut stdout.lock(), events, output).await?;
            // The error event was already printed
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Serve { bind } => {
            let addr = bind.unwrap_or_else(|| config.bind.clone());
            server::serve(runner, &addr).await
        }
    }
}
