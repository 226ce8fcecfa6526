//! # gibs CLI Entry Point
//!
//! `gibs [OPTIONS] [INPUT] [-- FEATURES...]`
//!
//! Builds the project whose entry file is INPUT (default `main.cpp`).
//! Trailing `--name` / `--no-name` arguments toggle features declared in the
//! sources.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use gibs::build::{BuildContext, BuildGraph, SystemLauncher};
use gibs::config::{ChecksumPolicy, Flags, PathConfig, detected_parallelism, resolve_jobs};
use gibs::feature::{self, FeatureSet};
use gibs::ui;

#[derive(Parser)]
#[command(name = "gibs")]
#[command(about = "In-source C++ build tool", version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
struct Cli {
    /// Entry source file
    #[arg(default_value = "main.cpp")]
    input: PathBuf,

    /// Build with debug flags
    #[arg(short, long)]
    debug: bool,

    /// Run the application after a successful build
    #[arg(short, long)]
    run: bool,

    /// Remove every build artifact and the cache
    #[arg(long)]
    clean: bool,

    /// Only scan the head of each file and never compare checksums
    #[arg(short, long)]
    quick: bool,

    /// Add every sub-directory of the project to the include paths
    #[arg(short, long)]
    auto_include: bool,

    /// Parallel jobs: a count, or a fraction of the available cores (0 = all)
    #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
    jobs: f64,

    /// Directives applied to every unit, e.g. "qt core gui; define DEMO"
    #[arg(short, long, default_value = "")]
    commands: String,

    /// Scan whole files for directives
    #[arg(short = 'w', long)]
    parse_whole_files: bool,

    /// Feed sources to the compiler through stdin
    #[arg(long)]
    pipe: bool,

    /// Qt installation directory (e.g. ~/Qt/5.15.2/gcc_64)
    #[arg(long)]
    qt_dir: Option<PathBuf>,

    /// Compiler profile name
    #[arg(long, default_value = "gcc")]
    compiler: String,

    /// Deployer profile name (e.g. linuxdeployqt)
    #[arg(long)]
    deployer: Option<String>,

    /// Path to the deployer executable
    #[arg(long)]
    deployer_path: Option<PathBuf>,

    /// Sysroot passed to the compiler and linker
    #[arg(long)]
    sysroot: Option<PathBuf>,

    /// Cross toolchain prefix (e.g. arm-linux-gnueabihf-)
    #[arg(long)]
    toolchain: Option<String>,

    /// Directory the targets are written to
    #[arg(long, default_value = ".")]
    prefix: PathBuf,

    /// Also compare content checksums of unchanged-looking files
    #[arg(long)]
    verify_checksums: bool,

    /// Kill any tool that runs longer than this many seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Print a table of the build units
    #[arg(long)]
    summary: bool,

    /// Remember the toolchain paths for later runs
    #[arg(long)]
    save_paths: bool,

    /// Show detailed build decisions
    #[arg(short, long)]
    verbose: bool,

    /// Feature toggles (--name / --no-name)
    #[arg(last = true)]
    features: Vec<String>,
}

impl Cli {
    fn path_config(&self) -> Result<PathConfig> {
        let mut paths = PathConfig {
            qt_dir: self.qt_dir.clone(),
            deployer_path: self.deployer_path.clone(),
            sysroot: self.sysroot.clone(),
            toolchain: self.toolchain.clone(),
        };
        paths.merge_missing(PathConfig::load()?);
        Ok(paths)
    }

    fn flags(&self, paths: PathConfig) -> Flags {
        let mut flags = Flags {
            input_file: self.input.clone(),
            run: self.run,
            clean: self.clean,
            quick_mode: self.quick,
            auto_includes: self.auto_include,
            parse_whole_files: self.parse_whole_files,
            debug_build: self.debug,
            checksums: if self.verify_checksums {
                ChecksumPolicy::Content
            } else {
                ChecksumPolicy::Timestamps
            },
            prefix: self.prefix.clone(),
            jobs: resolve_jobs(self.jobs, detected_parallelism()),
            timeout: self
                .timeout
                .filter(|secs| *secs > 0.0)
                .map(Duration::from_secs_f64),
            commands: self.commands.clone(),
            compiler_name: self.compiler.clone(),
            deployer_name: self.deployer.clone(),
            paths,
            ..Default::default()
        };
        flags.set_pipe(self.pipe);
        flags
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "gibs=debug" } else { "gibs=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let features = feature::parse_toggles(&cli.features)?;
    let paths = cli.path_config()?;
    if cli.save_paths {
        let saved = paths.save()?;
        println!("{} Saved toolchain paths to {}", "✓".green(), saved.display());
    }
    let flags = cli.flags(paths);

    if !build(flags, features, cli.summary).await? {
        std::process::exit(1);
    }
    Ok(())
}

/// Returns whether every task succeeded.
async fn build(flags: Flags, features: FeatureSet, summary: bool) -> Result<bool> {
    let launcher = SystemLauncher::new(flags.work_dir.clone(), flags.timeout);
    let (clean, run) = (flags.clean, flags.run);
    let input = flags.input_file.clone();

    let ctx = BuildContext::new(flags).context("Failed to set up the toolchain")?;
    let mut graph = BuildGraph::new(ctx, features)?;
    graph.load_cache();

    if clean {
        let removed = graph.clean().context("Failed to clean")?;
        println!("{} Removed {} file(s)", "✓".green(), removed);
        return Ok(true);
    }

    println!("{} Building {}", "→".blue(), input.display().to_string().bold());
    graph
        .start()
        .with_context(|| format!("Cannot build {}", input.display()))?;
    if summary {
        ui::unit_summary(&graph).print();
    }

    graph.set_progress(ui::progress_bar());
    let report = graph.build(&launcher).await?;
    let ok = ui::print_report(&report, &graph.parse_errors());

    if ok && run {
        match graph.root_target() {
            Some(target) => {
                println!("{} Running {}", "→".blue(), target.display());
                let status = tokio::process::Command::new(&target)
                    .status()
                    .await
                    .with_context(|| format!("Failed to run {}", target.display()))?;
                if !status.success() {
                    warn!(code = ?status.code(), "application exited with an error");
                }
            }
            None => warn!("--run needs an application target"),
        }
    }

    Ok(ok)
}
