//! Runs every task in the same process, on the calling thread, in
//! topological order. This is the cheapest backend to reason about and the
//! one every unit test in this crate exercises: no IPC, no polling, no
//! process spawning, just a direct `Task::run` call per node followed by a
//! synchronous "send" of its outputs to whatever is downstream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{Backend, BackendConfig, BackendType, RunOutputs};
use crate::error::{DataflowError, Result};
use crate::graph::TaskGraph;
use crate::task::{TaskId, TaskKind};
use crate::value::Value;

pub struct SequentialBackend;

impl Backend for SequentialBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Serial
    }

    fn run(&self, graph: Arc<TaskGraph>, _config: &BackendConfig) -> Result<RunOutputs> {
        let order = topo_order(&graph)?;
        let mut last_outputs: HashMap<TaskId, Vec<Value>> = HashMap::new();

        for task_id in order {
            let task = graph.task(task_id)?;
            let outputs = match &task.kind {
                TaskKind::Plain => task.run(&graph.handlers)?,
                TaskKind::Fused { members, .. } => run_fused(&graph, members)?,
            };

            for edge in graph.out_edges(task_id) {
                let dest_id = graph.resolve(edge.dest.task);
                let dest = graph.task(dest_id)?;
                let slot: usize = edge.source.port.parse().unwrap_or(0);
                let value = outputs
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| DataflowError::TaskFailed {
                        task: task.name.clone(),
                        reason: format!("no output at slot {slot}"),
                    })?;
                dest.record_arg(&edge.dest.port, value);
                dest.notify();
            }

            last_outputs.insert(task_id, outputs);
            graph.mark_task_completed();
        }

        let mut results = RunOutputs::new();
        for task in graph.tasks() {
            if task.is_sink.load(std::sync::atomic::Ordering::SeqCst) {
                if let Some(outputs) = last_outputs.get(&task.id) {
                    results.insert(task.name.clone(), outputs.clone());
                }
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
        crate::archive::package_snapshot(graph, app_name, out_dir, "serial")
    }
}

/// Runs every member of a fused chain in order, threading each member's
/// output into the next member's in-port along the actual internal edge
/// the compiler wired between them (not always output slot 0 — an
/// intermediate member with more than one output routes through whichever
/// slot that edge names).
fn run_fused(graph: &TaskGraph, members: &[TaskId]) -> Result<Vec<Value>> {
    let mut last = Vec::new();
    for (i, member_id) in members.iter().enumerate() {
        let member = graph.task(*member_id)?;
        if i > 0 {
            let prev_id = members[i - 1];
            let edge = graph
                .out_edges(prev_id)
                .into_iter()
                .find(|e| e.dest.task == *member_id)
                .ok_or_else(|| {
                    DataflowError::InvalidState(format!(
                        "fused chain missing internal edge {prev_id} -> {member_id}"
                    ))
                })?;
            let slot: usize = edge.source.port.parse().unwrap_or(0);
            let value = last
                .get(slot)
                .cloned()
                .ok_or_else(|| DataflowError::TaskFailed {
                    task: member.name.clone(),
                    reason: format!("no output at slot {slot} from fused predecessor"),
                })?;
            member.record_arg(&edge.dest.port, value);
        }
        last = member.run(&graph.handlers)?;
    }
    Ok(last)
}

/// Flattens [`crate::backend::layered_topo_order`] into a single sequence;
/// the sequential backend has no use for layer boundaries since it never
/// runs two tasks at once.
fn topo_order(graph: &TaskGraph) -> Result<Vec<TaskId>> {
    Ok(crate::backend::layered_topo_order(graph)?
        .into_iter()
        .flatten()
        .collect())
}
