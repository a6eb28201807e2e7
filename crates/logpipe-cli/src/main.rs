// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{RunOptions, check_config, run_events, schema_json, stats_json};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "logpipe", version, about = "logpipe event processing engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a configuration file and print its warnings.
    Check {
        /// Path to the TOML configuration.
        config: PathBuf,
    },

    /// Print the JSON schema of the configuration file.
    Schema,

    /// Run JSON-lines events through the configured pipelines.
    Run {
        /// Path to the TOML configuration.
        #[arg(long)]
        config: PathBuf,

        /// Pipeline every event enters.
        #[arg(long, default_value = "main")]
        pipeline: String,

        /// Read events from this file instead of stdin.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Mark events as test events; they are printed from the test sink
        /// instead of the output queues.
        #[arg(long)]
        test: bool,

        /// Print a metrics snapshot to stderr after the run.
        #[arg(long)]
        stats: bool,

        /// Seconds to wait for in-flight events before shutting down.
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },
}

fn init_logging(debug: bool, level: Option<&str>) {
    let filter = if debug {
        EnvFilter::new("logpipe=debug")
    } else {
        EnvFilter::new(format!("logpipe={}", level.unwrap_or("info")))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            init_logging(cli.debug, None);
            let report = check_config(&config)?;
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
            println!(
                "ok: {} pipeline(s), {} output(s)",
                report.pipelines, report.outputs
            );
            Ok(())
        }
        Commands::Schema => {
            init_logging(cli.debug, None);
            println!("{}", schema_json()?);
            Ok(())
        }
        Commands::Run {
            config,
            pipeline,
            input,
            test,
            stats,
            wait_secs,
        } => {
            let config = logpipe::load_config(Some(&config))
                .with_context(|| format!("load config '{}'", config.display()))?;
            init_logging(cli.debug, config.log_level.as_deref());

            let options = RunOptions {
                pipeline,
                test,
                idle_timeout: Duration::from_secs(wait_secs),
            };
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let summary = match input {
                Some(path) => {
                    let file = File::open(&path)
                        .with_context(|| format!("open input '{}'", path.display()))?;
                    run_events(&config, &options, BufReader::new(file), &mut out)?
                }
                None => run_events(&config, &options, io::stdin().lock(), &mut out)?,
            };
            out.flush()?;

            if stats {
                eprintln!("{}", stats_json(&summary.snapshot)?);
            }
            if !summary.idle {
                anyhow::bail!("timed out waiting for in-flight events");
            }
            Ok(())
        }
    }
}
