//! Application entry point.
//!
//! Parses command-line arguments and delegates execution to [`runner::run`].

use clap::Parser;
use gen_ir::cache_repair::{CacheRepair, DanglingSymlinkRepair, NoopRepair};
use gen_ir::{cli::Cli, runner};
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::fmt;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let max_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fmt()
        .with_max_level(max_level)
        .with_writer(std::io::stderr)
        .init();

    let config = runner::PipelineConfig::from(&cli);
    let repair: Box<dyn CacheRepair> = match &cli.build_cache {
        Some(path) => Box::new(DanglingSymlinkRepair::new(path)),
        None => Box::new(NoopRepair),
    };
    match runner::run(&config, repair.as_ref()) {
        Ok(report) => {
            tracing::info!(
                builds = report.build_count,
                nodes = report.graph_nodes,
                commands = report.stats.commands,
                failed = report.stats.failed,
                modules = report.stats.modules,
                "finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("gen-ir failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
