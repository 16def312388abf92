//! treeindex - parallel filesystem indexer and query tool
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{self, Write};
use std::process::ExitCode;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use treeindex::config::{CliArgs, RunConfig};
use treeindex::progress::{
    print_header, print_summary, print_trace_summary, write_gen_header, write_op_table,
    ProgressReporter,
};
use treeindex::tasks::{find, gendir, index, query, remove, rollup, trace};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging(args.verbose)?;

    let quiet = args.quiet;
    let config = RunConfig::from_args(args).context("Invalid configuration")?;

    match config {
        RunConfig::Index(config) => {
            if !quiet {
                print_header("index", &config.source.display().to_string(), config.threads);
            }
            let progress = (config.show_progress && !quiet).then(ProgressReporter::new);
            let result = match &progress {
                Some(p) => index::run_with_progress(config, |snapshot| p.update(&snapshot)),
                None => index::run(config),
            }
            .context("Index failed")?;

            if let Some(p) = progress {
                p.finish("Index complete");
            }
            if !quiet {
                print_summary("Index Complete", &result);
            }
        }

        RunConfig::Query(config) => {
            let result = query::run(config).context("Query failed")?;
            if !quiet {
                print_summary("Query Complete", &result);
            }
        }

        RunConfig::Trace(config) => {
            if !quiet {
                print_header("trace2index", &config.trace.display().to_string(), config.threads);
            }
            let report = trace::run(config).context("Trace replay failed")?;
            if !quiet {
                print_trace_summary(&report);
            }
            if let Err(e) = report.scout {
                bail!("Trace unusable: {}", e);
            }
        }

        RunConfig::Find(config) => {
            let result = find::run(config).context("Find failed")?;
            if !quiet {
                print_summary("Find Complete", &result);
            }
        }

        RunConfig::Gendir(config) => {
            let mut out = io::stdout().lock();
            write_gen_header(&mut out, &config)?;
            out.flush()?;

            let report = gendir::run(config).context("Tree generation failed")?;
            write_op_table(&mut out, &report)?;
            if report.failed > 0 {
                warn!("{} operations failed", report.failed);
            }
        }

        RunConfig::Rmtree(config) => {
            if !quiet {
                print_header("rmtree", &config.root.display().to_string(), config.threads);
            }
            let result = remove::run(config).context("Removal failed")?;
            if !quiet {
                print_summary("Removal Complete", &result);
            }
        }

        RunConfig::Rollup(config) => {
            let result = rollup::run(config).context("Rollup failed")?;
            if !quiet {
                print_summary("Rollup Complete", &result);
            }
        }
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("treeindex=debug,warn")
    } else {
        EnvFilter::new("treeindex=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set up logging: {}", e))?;

    Ok(())
}
