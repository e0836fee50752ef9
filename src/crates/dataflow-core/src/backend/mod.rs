//! The three execution backends a compiled pipeline can run under: an
//! [`sequential`] in-process backend, a [`multiprocess`] local backend that
//! runs one OS process per task, and a [`batch`] backend that packages the
//! graph into a Slurm job array.
//!
//! All three share the same compiled [`crate::graph::TaskGraph`] and the
//! same on-disk port transfer contract (`<dest_task_id>_<dest_port_name>`
//! files written with a write-then-rename to keep a half-written file from
//! ever being observed); they differ only in where a task's body actually
//! executes and how its completion is observed.

pub mod batch;
pub mod fileport;
pub mod multiprocess;
pub mod sequential;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::graph::TaskGraph;
use crate::task::TaskId;
use crate::value::Value;

/// Selects which backend a run, package, or deploy operation targets.
/// Named to match the CLI's `-b` flag rather than the internal module
/// names, since `serial`/`local`/`slurm` is the vocabulary a pipeline
/// author actually types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendType {
    Serial,
    Local,
    Slurm,
}

impl std::str::FromStr for BackendType {
    type Err = crate::error::DataflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "serial" => Ok(BackendType::Serial),
            "local" => Ok(BackendType::Local),
            "slurm" => Ok(BackendType::Slurm),
            other => Err(crate::error::DataflowError::InvalidState(format!(
                "unknown backend `{other}`, expected one of: serial, local, slurm"
            ))),
        }
    }
}

/// Tunables shared by every backend, with the defaults this crate settled
/// on for the two knobs the original runtime left as open questions: a
/// one-second poll interval for backends whose port transfer is not
/// one-sided (the batch backend), and a bounded, exponentially backed off
/// retry budget so a missing input fails loudly instead of polling
/// forever.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Directory transfer files, job scripts, and archives are written
    /// under.
    pub run_dir: PathBuf,
    /// How long a polling receive waits between checks.
    pub poll_interval: Duration,
    /// Initial backoff applied after the first failed poll attempt.
    pub initial_backoff: Duration,
    /// Ceiling the exponential backoff is capped at.
    pub max_backoff: Duration,
    /// Number of attempts before a polling receive gives up and fails the
    /// task with [`crate::error::DataflowError::PollTimeout`].
    pub max_attempts: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            run_dir: std::env::temp_dir().join("dataflow-run"),
            poll_interval: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

/// The result of running a compiled pipeline to completion: every sink
/// task's final output values, keyed by task name (not id, since that's
/// what a caller printing results actually wants to read).
pub type RunOutputs = HashMap<String, Vec<Value>>;

/// Common surface every backend implements.
pub trait Backend {
    fn backend_type(&self) -> BackendType;

    /// Runs the compiled graph to completion and returns every sink's
    /// final outputs.
    fn run(&self, graph: Arc<TaskGraph>, config: &BackendConfig) -> Result<RunOutputs>;

    /// Packages the compiled graph into a self-contained archive directory
    /// under `out_dir`, named `app_name`. For the batch backend this
    /// includes one job script per task plus a submit script wiring
    /// `afterany` dependencies between them; for the serial and local
    /// backends it is a lighter bundle (graph snapshot plus a single
    /// driver script) since there is no job scheduler to hand work to.
    fn package(
        &self,
        graph: &TaskGraph,
        app_name: &str,
        out_dir: &Path,
        config: &BackendConfig,
    ) -> Result<PathBuf>;

    /// Ships a previously built archive to a remote endpoint. Only the
    /// batch backend has anywhere meaningful to send one (a Slurm login
    /// node reachable over SSH/HTTP); the other two backends return
    /// [`crate::error::DataflowError::InvalidState`].
    fn deploy(&self, _archive: &Path, _target_url: &str) -> Result<()> {
        Err(crate::error::DataflowError::InvalidState(format!(
            "the {:?} backend has nothing to deploy to; only `slurm` archives can be deployed",
            self.backend_type()
        )))
    }
}

/// Resolves the task id a completion notification should credit: a fusee's
/// completion is folded into its fused head.
pub fn credited_task(graph: &TaskGraph, id: TaskId) -> TaskId {
    graph.resolve(id)
}

pub fn make_backend(kind: BackendType) -> Box<dyn Backend> {
    match kind {
        BackendType::Serial => Box::new(sequential::SequentialBackend),
        BackendType::Local => Box::new(multiprocess::MultiprocessBackend),
        BackendType::Slurm => Box::new(batch::BatchBackend),
    }
}

/// Groups the fusion-resolved graph into topological layers: layer 0 is
/// every task with no predecessor, layer `n` is every task whose
/// predecessors all finished in layers `< n`. Tasks within a layer have no
/// dependency on each other, so a backend may run or spawn them
/// concurrently; layers themselves must still run in order.
///
/// Shared by every backend that schedules work task-by-task rather than
/// handing the whole DAG to an external scheduler (the batch backend uses
/// it only to derive `afterany` job dependencies, not to run anything
/// itself).
pub fn layered_topo_order(graph: &TaskGraph) -> Result<Vec<Vec<TaskId>>> {
    let mut indegree: HashMap<TaskId, usize> = HashMap::new();
    let mut adj: HashMap<TaskId, Vec<TaskId>> = HashMap::new();

    for task in graph.tasks() {
        if task.is_fusee.load(std::sync::atomic::Ordering::SeqCst) {
            continue;
        }
        indegree.entry(task.id).or_insert(0);
        adj.entry(task.id).or_default();
    }
    for edge in graph.edges() {
        let src = graph.resolve(edge.source.task);
        let dst = graph.resolve(edge.dest.task);
        if src == dst {
            continue;
        }
        adj.entry(src).or_default().push(dst);
        *indegree.entry(dst).or_insert(0) += 1;
    }

    let mut layers = Vec::new();
    let mut remaining = indegree.clone();
    let mut scheduled = 0usize;
    loop {
        let layer: Vec<TaskId> = remaining
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| *id)
            .collect();
        if layer.is_empty() {
            break;
        }
        for id in &layer {
            remaining.remove(id);
            scheduled += 1;
            if let Some(next) = adj.get(id) {
                for n in next {
                    if let Some(d) = remaining.get_mut(n) {
                        *d -= 1;
                    }
                }
            }
        }
        layers.push(layer);
    }

    if scheduled != indegree.len() {
        return Err(crate::error::DataflowError::InvalidState(
            "graph is not a DAG after compilation".to_string(),
        ));
    }
    Ok(layers)
}
