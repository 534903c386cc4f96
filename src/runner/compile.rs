//! Replaying rewritten compiler commands and harvesting their bitcode.

use super::RunnerError;
use super::process::run_process;
use super::rewrite::{RewrittenCommand, bitcode_paths_from_output_file_map, rewrite};
use crate::compiler::{Compiler, CompilerCommand};
use crate::pif::Guid;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use rayon::prelude::*;
use std::fs;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Architecture suffixes clang appends to `-save-temps` outputs.
const ARCH_SUFFIXES: [&str; 6] = ["arm64e", "arm64", "x86_64", "armv7s", "armv7", "i386"];

const BITCODE_EXTENSION: &str = "bc";

/// Per-product IR directories under a common root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTree {
    root: Utf8PathBuf,
    products: IndexMap<String, Option<Guid>>,
}

impl OutputTree {
    /// An empty tree rooted at `root`. Nothing is created on disk.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            products: IndexMap::new(),
        }
    }

    /// Root directory holding every product directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Product directory names with the GUID of the target that produced
    /// them, when known.
    #[must_use]
    pub const fn products(&self) -> &IndexMap<String, Option<Guid>> {
        &self.products
    }

    /// Path of the directory for `product`.
    #[must_use]
    pub fn product_dir(&self, product: &str) -> Utf8PathBuf {
        self.root.join(product)
    }

    /// Create the directory for `product` if needed and record it.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::OutputIo`] when the directory cannot be created.
    pub fn ensure_product(
        &mut self,
        product: &str,
        guid: Option<Guid>,
    ) -> Result<Utf8PathBuf, RunnerError> {
        let dir = self.product_dir(product);
        fs::create_dir_all(&dir).map_err(|source| RunnerError::OutputIo {
            path: dir.clone().into_std_path_buf(),
            source,
        })?;
        let entry = self.products.entry(product.to_owned()).or_insert(None);
        if entry.is_none() {
            *entry = guid;
        }
        Ok(dir)
    }

    /// Record that the product directory `from` was renamed to `to`.
    pub(crate) fn rename_product(&mut self, from: &str, to: &str) {
        if let Some(index) = self.products.get_index_of(from) {
            let guid = self.products.shift_remove(from).flatten();
            self.products.shift_insert(index, to.to_owned(), guid);
        }
    }
}

/// Totals accumulated while replaying commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Commands that were executed.
    pub commands: usize,
    /// Commands that could not be rewritten or started, or exited non-zero.
    pub failed: usize,
    /// Bitcode modules moved into the output tree.
    pub modules: usize,
}

impl AddAssign for RunStats {
    fn add_assign(&mut self, other: Self) {
        self.commands += other.commands;
        self.failed += other.failed;
        self.modules += other.modules;
    }
}

/// The commands to replay for one product directory.
#[derive(Debug, Clone)]
pub struct TargetJob<'a> {
    /// Name of the product directory receiving the bitcode.
    pub directory: String,
    /// Target that owns the commands, when it is known to the PIF cache.
    pub guid: Option<Guid>,
    /// Commands in transcript order.
    pub commands: Vec<&'a CompilerCommand>,
}

/// Replays jobs on a bounded worker pool.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    scratch: PathBuf,
    jobs: usize,
}

impl CommandRunner {
    /// Create a runner staging compiler temporaries under `scratch` and
    /// running up to `jobs` targets at once.
    #[must_use]
    pub fn new(scratch: impl Into<PathBuf>, jobs: usize) -> Self {
        Self {
            scratch: scratch.into(),
            jobs: jobs.max(1),
        }
    }

    /// Run every job, writing bitcode into `tree`.
    ///
    /// Commands of one target run in order; targets run concurrently. A
    /// failing command is logged and counted, never fatal.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::OutputIo`] when a product or scratch directory
    /// cannot be created and [`RunnerError::ThreadPool`] when the pool cannot
    /// start.
    pub fn run_all(
        &self,
        jobs: &[TargetJob<'_>],
        tree: &mut OutputTree,
    ) -> Result<RunStats, RunnerError> {
        let mut prepared = Vec::with_capacity(jobs.len());
        for (index, job) in jobs.iter().enumerate() {
            let output = tree.ensure_product(&job.directory, job.guid.clone())?;
            let workdir = self.scratch.join(format!("{index}-{}", job.directory));
            fs::create_dir_all(&workdir).map_err(|source| RunnerError::OutputIo {
                path: workdir.clone(),
                source,
            })?;
            prepared.push((job, workdir, output));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|source| RunnerError::ThreadPool { source })?;
        let results: Vec<RunStats> = pool.install(|| {
            prepared
                .par_iter()
                .map(|(job, workdir, output)| run_target(job, workdir, output.as_std_path()))
                .collect()
        });

        let mut total = RunStats::default();
        for stats in results {
            total += stats;
        }
        info!(
            commands = total.commands,
            failed = total.failed,
            modules = total.modules,
            "finished replaying compiler commands"
        );
        Ok(total)
    }
}

fn run_target(job: &TargetJob<'_>, workdir: &Path, output: &Path) -> RunStats {
    let mut stats = RunStats::default();
    debug!(
        directory = job.directory.as_str(),
        commands = job.commands.len(),
        "replaying target"
    );
    for command in &job.commands {
        stats.commands += 1;
        match run_command(command, workdir, output) {
            Ok((succeeded, modules)) => {
                stats.modules += modules;
                if !succeeded {
                    stats.failed += 1;
                }
            }
            Err(err) => {
                stats.failed += 1;
                warn!(directory = job.directory.as_str(), error = %err, "compiler command failed");
            }
        }
    }
    if stats.modules == 0 {
        error!(
            directory = job.directory.as_str(),
            commands = stats.commands,
            "no bitcode produced for target"
        );
    }
    stats
}

/// Rewrite and execute one command, then move its bitcode into `output`.
///
/// Returns whether the compiler exited successfully and how many modules
/// were harvested. A non-zero exit is logged and whatever bitcode was written
/// is still harvested.
fn run_command(
    command: &CompilerCommand,
    workdir: &Path,
    output: &Path,
) -> Result<(bool, usize), RunnerError> {
    let rewritten = rewrite(command)?;
    let result =
        run_process(&rewritten.program, &rewritten.arguments, workdir).map_err(|source| {
            RunnerError::Spawn {
                program: rewritten.program.clone(),
                source,
            }
        })?;
    if !result.status.success() {
        warn!(
            program = %rewritten.program.display(),
            status = %result.status,
            stderr = %result.stderr_text(),
            "compiler exited unsuccessfully"
        );
    }
    let modules = harvest(&rewritten, workdir, output)?;
    Ok((result.status.success(), modules))
}

fn harvest(
    command: &RewrittenCommand,
    workdir: &Path,
    output: &Path,
) -> Result<usize, RunnerError> {
    let produced = if command.compiler.uses_output_file_map() {
        match &command.output_file_map {
            Some(map) => bitcode_paths_from_output_file_map(map)?,
            None => {
                debug!("swiftc command has no output file map; nothing to harvest");
                Vec::new()
            }
        }
    } else {
        clang_temporaries(workdir)?
    };

    let mut moved = 0;
    for source in produced {
        if !source.is_file() {
            debug!(path = %source.display(), "expected bitcode file is missing");
            continue;
        }
        let Some(name) = harvested_name(&source, command.compiler) else {
            continue;
        };
        let destination = unique_destination(output, &name);
        move_file(&source, &destination)?;
        moved += 1;
    }
    Ok(moved)
}

/// `output/<name>`, or `output/<stem>-<n>.bc` for the first free `n` when a
/// module of that name was already harvested.
fn unique_destination(output: &Path, name: &str) -> PathBuf {
    let preferred = output.join(name);
    if !preferred.exists() {
        return preferred;
    }
    let stem = Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(name);
    let mut counter = 1_usize;
    loop {
        let candidate = output.join(format!("{stem}-{counter}.{BITCODE_EXTENSION}"));
        if !candidate.exists() {
            warn!(
                module = name,
                renamed = %candidate.display(),
                "bitcode module name already taken; keeping both"
            );
            return candidate;
        }
        counter += 1;
    }
}

fn clang_temporaries(workdir: &Path) -> Result<Vec<PathBuf>, RunnerError> {
    let entries = fs::read_dir(workdir).map_err(|source| RunnerError::OutputIo {
        path: workdir.to_path_buf(),
        source,
    })?;
    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == BITCODE_EXTENSION))
        .collect();
    found.sort();
    Ok(found)
}

/// File name a harvested module gets in the output directory.
fn harvested_name(source: &Path, compiler: Compiler) -> Option<String> {
    let name = source.file_name()?.to_str()?;
    if compiler.uses_output_file_map() {
        return Some(name.to_owned());
    }
    let stem = source.file_stem()?.to_str()?;
    Some(format!("{}.{BITCODE_EXTENSION}", strip_arch_suffix(stem)))
}

/// Remove a trailing `-<arch>` that clang adds to per-architecture
/// temporaries.
fn strip_arch_suffix(stem: &str) -> &str {
    ARCH_SUFFIXES
        .iter()
        .find_map(|arch| {
            stem.strip_suffix(arch)
                .and_then(|rest| rest.strip_suffix('-'))
                .filter(|rest| !rest.is_empty())
        })
        .unwrap_or(stem)
}

/// Move `from` to `to`, replacing `to`. Falls back to copy and delete when
/// the two paths are on different filesystems.
fn move_file(from: &Path, to: &Path) -> Result<(), RunnerError> {
    let io_error = |source: std::io::Error| RunnerError::OutputIo {
        path: to.to_path_buf(),
        source,
    };
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(io_error)?;
    if let Err(err) = fs::remove_file(from) {
        debug!(path = %from.display(), error = %err, "failed to remove harvested bitcode");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("main-arm64", "main")]
    #[case("main-arm64e", "main")]
    #[case("main-x86_64", "main")]
    #[case("data-model", "data-model")]
    #[case("-arm64", "-arm64")]
    #[case("plain", "plain")]
    fn arch_suffix_is_stripped(#[case] stem: &str, #[case] expected: &str) {
        assert_eq!(strip_arch_suffix(stem), expected);
    }

    #[test]
    fn clang_harvest_collects_only_bitcode() {
        let temp = TempDir::new().expect("temp dir");
        let workdir = temp.path().join("work");
        let output = temp.path().join("out");
        fs::create_dir_all(&workdir).expect("workdir");
        fs::create_dir_all(&output).expect("output");
        for name in ["a-arm64.bc", "a-arm64.i", "a-arm64.o", "b.bc"] {
            fs::write(workdir.join(name), name).expect("write temp");
        }
        let command = rewrite(&CompilerCommand::new("/usr/bin/clang -c a.m", Compiler::Clang))
            .expect("rewrite");

        let moved = harvest(&command, &workdir, &output).expect("harvest");

        assert_eq!(moved, 2);
        assert!(output.join("a.bc").is_file());
        assert!(output.join("b.bc").is_file());
        assert!(!workdir.join("a-arm64.bc").exists());
        assert!(workdir.join("a-arm64.o").exists());
    }

    #[test]
    fn same_named_clang_modules_are_all_kept() {
        let temp = TempDir::new().expect("temp dir");
        let workdir = temp.path().join("work");
        let output = temp.path().join("out");
        fs::create_dir_all(&workdir).expect("workdir");
        fs::create_dir_all(&output).expect("output");
        let clang = |line: &str| {
            rewrite(&CompilerCommand::new(line, Compiler::Clang)).expect("rewrite")
        };
        let first = clang("/usr/bin/clang -c /src/a/Utils.m");
        let second = clang("/usr/bin/clang -c /src/b/Utils.m");

        fs::write(workdir.join("Utils-arm64.bc"), "first").expect("write temp");
        let moved_first = harvest(&first, &workdir, &output).expect("harvest first");
        fs::write(workdir.join("Utils-arm64.bc"), "second").expect("write temp");
        let moved_second = harvest(&second, &workdir, &output).expect("harvest second");

        assert_eq!(moved_first + moved_second, 2);
        let read = |name: &str| fs::read_to_string(output.join(name)).expect("harvested module");
        assert_eq!(read("Utils.bc"), "first");
        assert_eq!(read("Utils-1.bc"), "second");
    }

    #[test]
    fn ensure_product_is_idempotent() {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().join("IR")).expect("utf8");
        let mut tree = OutputTree::new(root);
        let first = tree
            .ensure_product("Core.framework", Some(Guid::from("CORE")))
            .expect("create");
        let second = tree.ensure_product("Core.framework", None).expect("again");

        assert_eq!(first, second);
        assert!(first.is_dir());
        assert_eq!(tree.products().len(), 1);
        assert_eq!(
            tree.products().get("Core.framework"),
            Some(&Some(Guid::from("CORE")))
        );
    }

    #[test]
    fn rename_product_keeps_position_and_guid() {
        let mut tree = OutputTree::new("/ir");
        tree.products.insert("App.app".to_owned(), Some(Guid::from("APP")));
        tree.products.insert("Core.framework".to_owned(), None);
        tree.rename_product("App.app", "App");

        let names: Vec<&str> = tree.products().keys().map(String::as_str).collect();
        assert_eq!(names, ["App", "Core.framework"]);
        assert_eq!(tree.products().get("App"), Some(&Some(Guid::from("APP"))));
    }
}
