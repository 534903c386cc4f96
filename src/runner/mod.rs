//! The IR generation pipeline.
//!
//! This module keeps `main` minimal by providing a single entry point that
//! sequences the run: parse the transcript, load the PIF cache, build the
//! dependency graph, replay the compiler commands and reconcile the output
//! tree. Every phase completes before the next starts; only command replay
//! runs in parallel.

mod compile;
mod error;
mod process;
mod rewrite;

pub use compile::{CommandRunner, OutputTree, RunStats, TargetJob};
pub use error::RunnerError;
pub use process::{ProcessOutput, run_process};
pub use rewrite::{RewrittenCommand, bitcode_paths_from_output_file_map, rewrite};

use crate::cache_repair::CacheRepair;
use crate::cli::Cli;
use crate::graph::DependencyGraph;
use crate::pif::{PifCache, Target};
use crate::reconcile::{ReconcileStats, embedded_frameworks, reconcile};
use crate::resolver::DependencyResolver;
use crate::transcript::{ParsedTranscript, TranscriptParser};
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Name of the output directory created inside the archive by default.
pub const DEFAULT_OUTPUT_DIR: &str = "IR";
/// File the dependency graph is dumped to, inside the archive.
pub const GRAPH_DUMP_FILE: &str = "graph.dot";

/// How deep below `Products` the archive is searched for product bundles.
const PRODUCTS_SEARCH_DEPTH: usize = 5;

/// Inputs of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Build transcript, or `-` for standard input.
    pub log: PathBuf,
    /// The `.xcarchive` the build produced.
    pub archive: PathBuf,
    /// Root of the PIF cache written by the build.
    pub pif_cache: PathBuf,
    /// Where the IR tree is written; `<archive>/IR` when unset.
    pub output: Option<PathBuf>,
    /// Maximum number of targets replayed at once.
    pub jobs: usize,
    /// Stop after building the graph.
    pub dry_run: bool,
    /// Write the dependency graph to `<archive>/graph.dot`.
    pub dump_dependency_graph: bool,
}

impl From<&Cli> for PipelineConfig {
    fn from(cli: &Cli) -> Self {
        let jobs = cli.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        });
        Self {
            log: cli.log.clone(),
            archive: cli.archive.clone(),
            pif_cache: cli.pif_cache.clone(),
            output: cli.output_path.clone(),
            jobs,
            dry_run: cli.dry_run,
            dump_dependency_graph: cli.dump_dependency_graph,
        }
    }
}

impl PipelineConfig {
    /// Directory receiving the IR tree.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.archive.join(DEFAULT_OUTPUT_DIR))
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Number of build cycles found in the transcript.
    pub build_count: usize,
    /// Targets announced in the transcript.
    pub transcript_targets: usize,
    /// Nodes in the dependency graph.
    pub graph_nodes: usize,
    /// Path the dependency graph was dumped to, when requested.
    pub graph_dump: Option<PathBuf>,
    /// Command replay totals; zero on a dry run.
    pub stats: RunStats,
    /// Reconciliation totals; absent on a dry run.
    pub reconcile: Option<ReconcileStats>,
    /// Final product directory names.
    pub products: Vec<String>,
}

/// Run the pipeline described by `config`.
///
/// `repair` is applied before any command runs; its failure is logged and
/// the run continues.
///
/// # Errors
///
/// Returns an error when the transcript or the PIF cache cannot be read, when
/// the output or scratch directories cannot be created, or when
/// reconciliation cannot write to the output tree.
pub fn run(config: &PipelineConfig, repair: &dyn CacheRepair) -> Result<RunReport> {
    let transcript = TranscriptParser::parse_path(&config.log)
        .with_context(|| format!("reading build log {}", config.log.display()))?;
    info!(
        targets = transcript.commands.len(),
        commands = transcript.total_commands(),
        builds = transcript.build_count,
        "parsed build log"
    );

    let cache = PifCache::load(&config.pif_cache)
        .with_context(|| format!("loading PIF cache {}", config.pif_cache.display()))?;
    info!(
        workspace = cache.workspace().name.as_str(),
        projects = cache.projects().len(),
        "using PIF workspace"
    );
    let resolver = DependencyResolver::new(&cache);
    let roots = transcript_roots(&transcript, &cache);
    let graph = DependencyGraph::build(roots.values().flatten().copied(), &resolver);
    info!(nodes = graph.len(), "built dependency graph");

    let mut report = RunReport {
        build_count: transcript.build_count,
        transcript_targets: transcript.commands.len(),
        graph_nodes: graph.len(),
        ..RunReport::default()
    };

    if config.dump_dependency_graph {
        let path = config.archive.join(GRAPH_DUMP_FILE);
        fs::write(&path, graph.to_dot())
            .with_context(|| format!("writing dependency graph to {}", path.display()))?;
        info!(path = %path.display(), "wrote dependency graph");
        report.graph_dump = Some(path);
    }

    if config.dry_run {
        info!("dry run; skipping command replay");
        return Ok(report);
    }

    if let Err(err) = repair.repair() {
        warn!(error = %err, "build cache repair failed; continuing");
    }

    let output_dir = config.output_dir();
    let output_root =
        Utf8PathBuf::from_path_buf(output_dir).map_err(|path| RunnerError::NonUtf8Path { path })?;
    let scratch = tempfile::Builder::new()
        .prefix("gen-ir-")
        .tempdir()
        .context("creating scratch directory")?;
    debug!(path = %scratch.path().display(), "created scratch directory");

    let archived = archived_products(&config.archive);
    let jobs = plan_jobs(&transcript, &roots, &archived);
    let mut tree = OutputTree::new(output_root);
    report.stats = CommandRunner::new(scratch.path(), config.jobs)
        .run_all(&jobs, &mut tree)
        .context("replaying compiler commands")?;

    let embedded = embedded_frameworks(&config.archive);
    report.reconcile = Some(
        reconcile(&mut tree, &graph, &embedded).context("reconciling the IR output tree")?,
    );
    report.products = tree.products().keys().cloned().collect();
    info!(
        products = report.products.len(),
        path = %tree.root(),
        "IR generation complete"
    );
    Ok(report)
}

/// Pair every transcript target with its PIF target, when the cache has one.
fn transcript_roots<'a>(
    transcript: &ParsedTranscript,
    cache: &'a PifCache,
) -> IndexMap<String, Option<&'a Target>> {
    transcript
        .targets()
        .map(|name| {
            let target = cache.target_named(name);
            if target.is_none() {
                debug!(target_name = name, "transcript target not found in the PIF cache");
            }
            (name.to_owned(), target)
        })
        .collect()
}

/// Product names found in the archive's `Products` tree, keyed by stem.
fn archived_products(archive: &Path) -> HashMap<String, String> {
    let mut products = HashMap::new();
    for entry in WalkDir::new(archive.join("Products"))
        .min_depth(1)
        .max_depth(PRODUCTS_SEARCH_DEPTH)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if let (Some(stem), Some(name)) = (
            path.file_stem().and_then(|stem| stem.to_str()),
            path.file_name().and_then(|name| name.to_str()),
        ) && stem != name
        {
            products
                .entry(stem.to_owned())
                .or_insert_with(|| name.to_owned());
        }
    }
    products
}

/// Directory a target's IR is written to.
///
/// The product as found in the archive wins, then the product reference
/// name, then the target name.
fn output_directory_name(target: &Target, archived: &HashMap<String, String>) -> String {
    let product = target.product_name();
    if product.is_empty() {
        return target.name().to_owned();
    }
    let stem = Path::new(product)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(product);
    archived
        .get(stem)
        .cloned()
        .unwrap_or_else(|| product.to_owned())
}

fn plan_jobs<'t>(
    transcript: &'t ParsedTranscript,
    roots: &IndexMap<String, Option<&Target>>,
    archived: &HashMap<String, String>,
) -> Vec<TargetJob<'t>> {
    let mut jobs: IndexMap<String, TargetJob<'t>> = IndexMap::new();
    for (name, target) in roots {
        let commands = transcript.commands_for(name);
        if commands.is_empty() {
            continue;
        }
        let directory = target.map_or_else(
            || name.clone(),
            |found| output_directory_name(found, archived),
        );
        let job = jobs.entry(directory.clone()).or_insert_with(|| TargetJob {
            directory,
            guid: target.map(|found| found.guid().clone()),
            commands: Vec::new(),
        });
        job.commands.extend(commands);
    }
    jobs.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Compiler, CompilerCommand};
    use crate::pif::{Guid, ProductType, TargetCommon};

    fn target(name: &str, product: &str) -> Target {
        Target::Standard(TargetCommon {
            guid: Guid::from(name),
            name: name.to_owned(),
            dependencies: Vec::new(),
            build_phases: Vec::new(),
            build_configurations: Vec::new(),
            product_type: ProductType::Framework,
            product_name: product.to_owned(),
        })
    }

    #[test]
    fn archived_product_name_wins() {
        let archived = HashMap::from([("Core".to_owned(), "Core.framework".to_owned())]);
        assert_eq!(
            output_directory_name(&target("CoreTarget", "Core"), &archived),
            "Core.framework"
        );
    }

    #[test]
    fn product_name_then_target_name() {
        let archived = HashMap::new();
        assert_eq!(
            output_directory_name(&target("Core", "Core.framework"), &archived),
            "Core.framework"
        );
        assert_eq!(output_directory_name(&target("Script", ""), &archived), "Script");
    }

    #[test]
    fn targets_sharing_a_directory_share_a_job() {
        let ios = target("CoreiOS", "Core.framework");
        let mac = target("CoreMac", "Core.framework");
        let mut transcript = ParsedTranscript::default();
        for (name, command) in [
            ("CoreiOS", "/usr/bin/clang -c /src/ios.m"),
            ("CoreMac", "/usr/bin/clang -c /src/mac.m"),
            ("Script", "/usr/bin/clang -c /src/tool.c"),
        ] {
            transcript
                .commands
                .insert(name.to_owned(), vec![CompilerCommand::new(command, Compiler::Clang)]);
        }
        let roots = IndexMap::from([
            ("CoreiOS".to_owned(), Some(&ios)),
            ("CoreMac".to_owned(), Some(&mac)),
            ("Script".to_owned(), None),
        ]);

        let jobs = plan_jobs(&transcript, &roots, &HashMap::new());

        let shape: Vec<(&str, usize)> = jobs
            .iter()
            .map(|job| (job.directory.as_str(), job.commands.len()))
            .collect();
        assert_eq!(shape, [("Core.framework", 2), ("Script", 1)]);
        assert_eq!(
            jobs.first().and_then(|job| job.guid.clone()),
            Some(Guid::from("CoreiOS"))
        );
    }

    #[test]
    fn output_defaults_inside_the_archive() {
        let config = PipelineConfig {
            log: PathBuf::from("build.log"),
            archive: PathBuf::from("/tmp/App.xcarchive"),
            pif_cache: PathBuf::from("/tmp/PIFCache"),
            output: None,
            jobs: 1,
            dry_run: false,
            dump_dependency_graph: false,
        };
        assert_eq!(config.output_dir(), PathBuf::from("/tmp/App.xcarchive/IR"));
    }
}
