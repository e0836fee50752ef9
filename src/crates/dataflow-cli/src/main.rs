//! # dataflow-cli
//!
//! CLI for compiling, running, packaging, and deploying dataflow pipelines.
//!
//! Rust has no equivalent of `exec`-ing an arbitrary Python module and
//! calling its decorated `app` function, so `<file>` here does not name a
//! path on disk: it names a pipeline registered at link time with
//! `inventory::submit! { dataflow_core::AppFn { name: "...", build: ... } }`,
//! the same way `dataflow-core` resolves a task name to a runnable body.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use uuid::Uuid;

// Pulled in only for its `inventory::submit!` side effects: registers the
// sample pipelines `run`/`package` resolve by name. A real deployment would
// depend on its own pipeline crate here instead.
use dataflow_demos as _;

use dataflow_core::backend::{BackendConfig, BackendType};
use dataflow_core::{lookup_app_fn, AppRunner};

#[derive(Parser)]
#[command(name = "dataflow")]
#[command(about = "Compile, run, package, and deploy dataflow pipelines", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a registered pipeline and run it in-process.
    Run {
        /// Name a pipeline was registered under via `AppFn`.
        file: String,
    },

    /// Compile a registered pipeline and package it for out-of-process
    /// execution under the chosen backend.
    Package {
        /// Target backend: `serial`, `local`, or `slurm`.
        #[arg(short = 'b', long = "backend")]
        backend: BackendType,

        /// Override the archive's app name (defaults to the registered name).
        #[arg(short = 'a', long = "app-name")]
        app_name: Option<String>,

        /// Directory the `.tar.gz` archive is written into.
        #[arg(short = 'o', long = "out-dir", default_value = ".")]
        out_dir: PathBuf,

        /// Name a pipeline was registered under via `AppFn`.
        file: String,
    },

    /// Ship a previously packaged archive to a remote Slurm front-end.
    Deploy {
        /// Target host the archive is uploaded to and submitted on.
        #[arg(short = 'u', long = "url")]
        url: String,

        /// Path to a `.tar.gz` produced by `package -b slurm`.
        archive: PathBuf,
    },

    /// Hidden re-entry point: runs exactly one task out of a packaged
    /// snapshot. Invoked by the multiprocess backend's spawned children and
    /// by the job scripts a `slurm` archive's `run.sh` submits; not meant
    /// to be typed by a pipeline author.
    #[command(name = "run-task", hide = true)]
    RunTask {
        #[arg(long)]
        graph: PathBuf,
        #[arg(long)]
        task: Uuid,
        #[arg(long = "run-dir")]
        run_dir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run { file } => run_pipeline(&file),
        Commands::Package {
            backend,
            app_name,
            out_dir,
            file,
        } => package_pipeline(&file, backend, app_name, &out_dir),
        Commands::Deploy { url, archive } => deploy_archive(&archive, &url),
        Commands::RunTask {
            graph,
            task,
            run_dir,
        } => dataflow_core::snapshot::run_task_entrypoint(&run_dir, &graph, task, &BackendConfig::default())
            .map_err(anyhow::Error::from),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_pipeline(name: &str) -> anyhow::Result<()> {
    let app = lookup_app_fn(name)?;
    println!("Running: {name}");
    let mut runner = AppRunner::new(app.name, BackendType::Serial, BackendConfig::default(), app.build);
    runner.compile()?;
    let (before, after) = runner.write_dot_files(std::path::Path::new("."))?;
    println!("Dot -> {} (before), {} (after)", before.display(), after.display());
    let outputs = runner.run()?;
    for (sink, values) in &outputs {
        println!("{sink}: {values:?}");
    }
    Ok(())
}

fn package_pipeline(
    name: &str,
    backend: BackendType,
    app_name: Option<String>,
    out_dir: &std::path::Path,
) -> anyhow::Result<()> {
    let app = lookup_app_fn(name)?;
    let display_name = app_name.unwrap_or_else(|| app.name.to_string());
    println!("Packaging: {name} (backend: {backend:?})");
    let mut runner = AppRunner::new(display_name, backend, BackendConfig::default(), app.build);
    runner.compile()?;
    let (before, after) = runner.write_dot_files(out_dir)?;
    println!("Dot -> {} (before), {} (after)", before.display(), after.display());
    let archive = runner.package(out_dir)?;
    println!("Packaged -> {}", archive.display());
    Ok(())
}

fn deploy_archive(archive: &std::path::Path, url: &str) -> anyhow::Result<()> {
    println!("Deploying: {}", archive.display());
    let runner = AppRunner::new("deploy", BackendType::Slurm, BackendConfig::default(), |_| Ok(()));
    runner.deploy(archive, url)?;
    println!("Deployed -> {url}");
    Ok(())
}
