//! Runs a compiled graph as one OS process per non-fused task, spawned from
//! a long-lived parent that keeps all scheduling authority.
//!
//! The original runtime's local backend (`examples/original_source/local.py`)
//! leans on Python's `multiprocessing` module, which forks the interpreter
//! and shares a latch/counter pair through `multiprocessing.Value`; a freshly
//! spawned task process then pushes its own output into its successor by
//! calling that successor's `receive()` directly, recursively spawning the
//! next hop itself. Rust has no fork-with-shared-memory analogue and no
//! serializable closures to hand a child process, so this backend keeps
//! scheduling in the parent instead: it groups the graph into
//! [`crate::backend::layered_topo_order`] layers, and for each layer spawns
//! every task in it as a `std::process::Command` re-invoking the `dataflow`
//! binary's hidden `run-task` subcommand, waiting for the whole layer to
//! finish before moving to the next. Tasks within a layer have no
//! dependency on each other, so this still gets real OS-level concurrency
//! where the graph allows it, while keeping the parent's bookkeeping a
//! simple sequential loop over layers instead of a recursive spawn chain.
//!
//! Every child writes its own outputs to disk via [`super::fileport`]
//! before exiting (directly to its declared downstream ports, and to its
//! own `result<slot>` ports so a sink's value can be recovered even though
//! sinks have no downstream edge to write through); the parent never reads
//! or writes a data value itself, only exit statuses.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::RUN_TASK_SUBCOMMAND;
use crate::backend::{fileport, Backend, BackendConfig, BackendType, RunOutputs};
use crate::error::{DataflowError, Result};
use crate::graph::TaskGraph;
use crate::snapshot::{result_port_name, GraphSnapshot};
use crate::task::PortRef;

pub struct MultiprocessBackend;

impl Backend for MultiprocessBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }

    fn run(&self, graph: Arc<TaskGraph>, config: &BackendConfig) -> Result<RunOutputs> {
        std::fs::create_dir_all(&config.run_dir)?;
        let snapshot = GraphSnapshot::build(&graph)?;
        let graph_path = config.run_dir.join("graph");
        snapshot.write_to(&graph_path)?;

        let exe = std::env::current_exe()?;
        let layers = crate::backend::layered_topo_order(&graph)?;

        for layer in layers {
            let mut children: Vec<_> = layer
                .into_iter()
                .map(|task_id| {
                    let child = spawn_task(&exe, &graph_path, &config.run_dir, task_id);
                    (task_id, child)
                })
                .collect();

            for (task_id, child) in children.drain(..) {
                let task = graph.task(task_id)?;
                match child.and_then(|mut c| c.wait().map_err(DataflowError::Io)) {
                    Ok(status) if status.success() => {}
                    Ok(status) => {
                        tracing::warn!(task = %task.name, ?status, "task process exited with failure");
                    }
                    Err(err) => {
                        tracing::warn!(task = %task.name, %err, "failed to spawn or wait on task process");
                    }
                }
                graph.mark_task_completed();
            }
        }

        let mut results = RunOutputs::new();
        for task in graph.tasks() {
            if task.is_fusee.load(std::sync::atomic::Ordering::SeqCst) {
                continue;
            }
            if !task.is_sink.load(std::sync::atomic::Ordering::SeqCst) {
                continue;
            }
            let mut outputs = Vec::new();
            let mut slot = 0;
            while let Some(value) =
                fileport::try_read_value(&config.run_dir, &PortRef::new(task.id, result_port_name(slot)))?
            {
                outputs.push(value);
                slot += 1;
            }
            if !outputs.is_empty() {
                results.insert(task.name.clone(), outputs);
            }
        }
        Ok(results)
    }

    fn package(
        &self,
        graph: &TaskGraph,
        app_name: &str,
        out_dir: &Path,
        _config: &BackendConfig,
    ) -> Result<PathBuf> {
        crate::archive::package_snapshot(graph, app_name, out_dir, "local")
    }
}

fn spawn_task(
    exe: &Path,
    graph_path: &Path,
    run_dir: &Path,
    task_id: crate::task::TaskId,
) -> Result<std::process::Child> {
    std::process::Command::new(exe)
        .arg(RUN_TASK_SUBCOMMAND)
        .arg("--graph")
        .arg(graph_path)
        .arg("--task")
        .arg(task_id.to_string())
        .arg("--run-dir")
        .arg(run_dir)
        .spawn()
        .map_err(DataflowError::Io)
}
