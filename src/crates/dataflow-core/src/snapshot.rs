//! A serializable projection of a compiled [`crate::graph::TaskGraph`],
//! used by every backend that has to cross a process boundary: the
//! multiprocess backend's spawned children and the batch backend's job
//! scripts both need to know a task's registered function name, its
//! already-bound literal arguments, which in-ports to read from transfer
//! files, and which downstream `(slot, PortRef)` pairs to write its
//! outputs to — all without holding a live reference to the in-memory
//! graph, which does not exist in a freshly spawned process.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DataflowError, Result};
use crate::graph::TaskGraph;
use crate::task::{PortRef, TaskId};
use crate::value::Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub fn_name: String,
    /// Values already known at compile time (bound literals), keyed by
    /// in-port name.
    pub literal_args: HashMap<String, Value>,
    /// In-ports that must be read from a transfer file before this task
    /// can run.
    pub pending_inputs: Vec<String>,
    /// `(source out-port slot, destination port ref)` pairs this task
    /// must write its outputs to once it completes.
    pub out_edges: Vec<(String, PortRef)>,
    pub is_fused: bool,
    /// `(member task id, registered fn name, name of the member's non-
    /// literal in-port, output slot of the previous member that feeds it)`
    /// tuples in chain order, head first, present only when `is_fused`. The
    /// slot is meaningless for the head (index 0, where there is no
    /// previous member) and otherwise names exactly the out-port index the
    /// internal edge between consecutive members declares, so an
    /// intermediate member with more than one output still routes through
    /// the right one. Out-of-process executors run each member's body in
    /// turn, threading that slot's value into the next member's named
    /// in-port, the same way [`crate::backend::sequential`] does in-process.
    pub fused_members: Vec<(TaskId, String, String, usize)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub name: String,
    pub tasks: HashMap<TaskId, TaskSnapshot>,
}

impl GraphSnapshot {
    /// Builds a snapshot of every non-fusee task in `graph`. Called once by
    /// the parent process before spawning any child.
    pub fn build(graph: &TaskGraph) -> Result<Self> {
        let mut tasks = HashMap::new();
        for task in graph.tasks() {
            if task.is_fusee.load(std::sync::atomic::Ordering::SeqCst) {
                continue;
            }
            let literal_args = task.args.lock().unwrap().clone();
            let pending_inputs: Vec<String> = task
                .inputs
                .iter()
                .filter(|(_, p)| !p.is_immediate)
                .map(|(name, _)| name.clone())
                .collect();
            let out_edges: Vec<(String, PortRef)> = graph
                .out_edges(task.id)
                .into_iter()
                .map(|e| (e.source.port.clone(), e.dest.clone()))
                .collect();
            let (is_fused, fused_members) = match &task.kind {
                crate::task::TaskKind::Fused { members, .. } => {
                    let named = members
                        .iter()
                        .enumerate()
                        .filter_map(|(i, id)| {
                            let t = graph.task(*id).ok()?;
                            let sole_port = t
                                .inputs
                                .values()
                                .find(|p| !p.is_immediate)
                                .map(|p| p.name.clone())
                                .unwrap_or_default();
                            let slot = if i == 0 {
                                0
                            } else {
                                let prev_id = members[i - 1];
                                graph
                                    .out_edges(prev_id)
                                    .into_iter()
                                    .find(|e| e.dest.task == *id)
                                    .and_then(|e| e.source.port.parse::<usize>().ok())
                                    .unwrap_or(0)
                            };
                            Some((*id, t.fn_name.to_string(), sole_port, slot))
                        })
                        .collect();
                    (true, named)
                }
                crate::task::TaskKind::Plain => (false, Vec::new()),
            };
            tasks.insert(
                task.id,
                TaskSnapshot {
                    id: task.id,
                    name: task.name.clone(),
                    fn_name: task.fn_name.to_string(),
                    literal_args,
                    pending_inputs,
                    out_edges,
                    is_fused,
                    fused_members,
                },
            );
        }
        Ok(GraphSnapshot {
            name: graph.name.clone(),
            tasks,
        })
    }

    pub fn write_to(&self, path: &std::path::Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn read_from(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Runs one task's body out of process, given its already-collected
/// inputs (literal args merged with whatever [`super::backend::fileport`]
/// read off disk). Used identically by the multiprocess child entrypoint
/// and the batch backend's generated job scripts.
///
/// Fires the same tracing pre/post pair around each registered body that
/// [`crate::task::Task::run`] fires in-process: a freshly spawned child has
/// no access to the parent's [`crate::graph::TaskGraph::handlers`], but the
/// default tracing handlers carry no graph-specific state, so a fresh
/// [`crate::handler::HandlerRegistry::with_tracing_defaults`] reproduces
/// the same entry/exit logging.
pub fn execute(snapshot: &TaskSnapshot, mut inputs: HashMap<String, Value>) -> anyhow::Result<Vec<Value>> {
    for (name, value) in &snapshot.literal_args {
        inputs.entry(name.clone()).or_insert_with(|| value.clone());
    }

    let handlers = crate::handler::HandlerRegistry::with_tracing_defaults();

    if !snapshot.is_fused {
        let task_fn = crate::task::lookup_task_fn(&snapshot.fn_name)?;
        return run_with_handlers(&handlers, &snapshot.name, || (task_fn.run)(&inputs));
    }

    let mut last = Vec::new();
    for (i, (_, fn_name, in_port, slot)) in snapshot.fused_members.iter().enumerate() {
        let task_fn = crate::task::lookup_task_fn(fn_name)?;
        let mut member_inputs = if i == 0 { inputs.clone() } else { HashMap::new() };
        if i > 0 {
            let value = last.get(*slot).cloned().ok_or_else(|| {
                anyhow::anyhow!(
                    "fused member `{fn_name}` expected an output at slot {slot} from its predecessor, found none"
                )
            })?;
            member_inputs.insert(in_port.clone(), value);
        }
        last = run_with_handlers(&handlers, fn_name, || (task_fn.run)(&member_inputs))?;
    }
    Ok(last)
}

/// Fires `handlers`' pre-handlers, invokes `body`, fires its post-handlers
/// with the outcome, and returns that outcome — the out-of-process analogue
/// of [`crate::task::Task::run`] for a call site that only has a bare
/// `fn(&HashMap<..>) -> anyhow::Result<..>` rather than a live [`crate::task::Task`].
fn run_with_handlers(
    handlers: &crate::handler::HandlerRegistry,
    task_name: &str,
    body: impl FnOnce() -> anyhow::Result<Vec<Value>>,
) -> anyhow::Result<Vec<Value>> {
    let mut ctx = crate::handler::HandlerContext::new(task_name);
    handlers.run_pre(&mut ctx);
    let outcome = body();
    match &outcome {
        Ok(values) => ctx.result = Some(Ok(values.clone())),
        Err(err) => {
            ctx.result = Some(Err(DataflowError::TaskError {
                task: task_name.to_string(),
                source: anyhow::anyhow!(err.to_string()),
            }))
        }
    }
    handlers.run_post(&mut ctx);
    outcome
}

/// Port name a task's `slot`th output is written under by
/// [`run_task_entrypoint`], distinct from any edge-carried out-port name so
/// a sink's final value can always be recovered by the parent even though
/// sinks have no downstream [`PortRef`] of their own.
pub fn result_port_name(slot: usize) -> String {
    format!("result{slot}")
}

/// The out-of-process re-entry point shared by the multiprocess backend's
/// spawned children and the batch backend's generated job scripts: loads
/// the one task named by `task_id` out of `graph_path`'s snapshot, reads
/// its pending inputs off disk, runs it, and writes every output both to
/// its declared downstream edges and to its own `result<slot>` ports so
/// the orchestrating parent (or a polling consumer, for batch) can recover
/// a sink's value without needing a live edge to read it from.
///
/// A run failure (the body itself erroring, or a pending input never
/// having arrived) is reported by writing a failure marker to every
/// location this task would otherwise have written a value to, then
/// returned as an error; the caller is expected to log it and let sibling
/// tasks keep making progress, per this crate's best-effort completion
/// policy.
pub fn run_task_entrypoint(
    run_dir: &Path,
    graph_path: &Path,
    task_id: TaskId,
    config: &crate::backend::BackendConfig,
) -> Result<()> {
    let snapshot = GraphSnapshot::read_from(graph_path)?;
    let task_snapshot = snapshot
        .tasks
        .get(&task_id)
        .ok_or_else(|| DataflowError::UnknownTask(task_id.to_string()))?;

    let mut inputs = task_snapshot.literal_args.clone();
    for name in &task_snapshot.pending_inputs {
        let port_ref = PortRef::new(task_id, name.clone());
        match crate::backend::fileport::poll_for_value(
            run_dir,
            &port_ref,
            config.initial_backoff,
            config.max_backoff,
            config.max_attempts,
        ) {
            Ok(value) => {
                inputs.insert(name.clone(), value);
            }
            Err(err) => {
                return fail_task(run_dir, task_snapshot, &err.to_string());
            }
        }
    }

    match execute(task_snapshot, inputs) {
        Ok(outputs) => {
            for (slot, value) in outputs.iter().enumerate() {
                let result_ref = PortRef::new(task_id, result_port_name(slot));
                crate::backend::fileport::write_value(run_dir, &result_ref, value)?;
            }
            for (slot, dest) in &task_snapshot.out_edges {
                let slot_idx: usize = slot.parse().unwrap_or(0);
                if let Some(value) = outputs.get(slot_idx) {
                    crate::backend::fileport::write_value(run_dir, dest, value)?;
                }
            }
            Ok(())
        }
        Err(err) => {
            tracing::error!(task = %task_snapshot.name, error = %err, "task body failed");
            fail_task(run_dir, task_snapshot, &err.to_string())
        }
    }
}

fn fail_task(run_dir: &Path, task_snapshot: &TaskSnapshot, reason: &str) -> Result<()> {
    let max_slots = task_snapshot
        .out_edges
        .iter()
        .filter_map(|(slot, _)| slot.parse::<usize>().ok())
        .max()
        .map(|m| m + 1)
        .unwrap_or(1);
    for slot in 0..max_slots {
        crate::backend::fileport::write_failure_marker(run_dir, &PortRef::new(task_snapshot.id, result_port_name(slot)))?;
    }
    for (_, dest) in &task_snapshot.out_edges {
        crate::backend::fileport::write_failure_marker(run_dir, dest)?;
    }
    Err(DataflowError::TaskFailed {
        task: task_snapshot.name.clone(),
        reason: reason.to_string(),
    })
}
