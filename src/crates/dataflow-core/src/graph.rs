//! [`TaskGraph`]: the arena that owns every task and edge by id.
//!
//! A `TaskGraph` has two lives. During recording and compilation it is
//! mutated directly (`add_task`, `add_edge`, passes rewriting ports and
//! edges). Once [`crate::runner::AppRunner::compile`] finishes, it is
//! wrapped in an `Arc` and handed to a backend, which only reads task
//! topology and writes through each task's own interior-mutable fields
//! (`latch`, `args`) — so no further `&mut TaskGraph` access is needed at
//! run time, and the same struct can be shared across the threads or
//! processes a backend spins up.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use crate::error::{DataflowError, Result};
use crate::task::{Edge, PortRef, Task, TaskId};

/// The compiled task graph: every task, every edge, and the bookkeeping a
/// backend needs to know when a run has finished.
pub struct TaskGraph {
    pub name: String,
    tasks: HashMap<TaskId, Task>,
    edges: HashMap<Uuid, Edge>,
    sources: HashSet<TaskId>,
    /// Maps a fusee's task id to the [`crate::task::TaskKind::Fused`] task
    /// that absorbed it, so lookups by original id still resolve during
    /// and after fusion.
    fusee_map: HashMap<TaskId, TaskId>,
    /// Total non-fusee task count, used by backends to know when a run is
    /// complete.
    num_tasks: std::sync::atomic::AtomicUsize,
    completed_tasks: std::sync::atomic::AtomicUsize,
    /// Signaled once `completed_tasks == num_tasks`.
    pub done: (Mutex<bool>, Condvar),
    /// Pre/post hooks every backend fires around each in-process
    /// [`Task::run`]; defaults to [`crate::handler::HandlerRegistry::with_tracing_defaults`].
    pub handlers: crate::handler::HandlerRegistry,
}

impl TaskGraph {
    pub fn new(name: impl Into<String>) -> Self {
        TaskGraph {
            name: name.into(),
            tasks: HashMap::new(),
            edges: HashMap::new(),
            sources: HashSet::new(),
            fusee_map: HashMap::new(),
            num_tasks: std::sync::atomic::AtomicUsize::new(0),
            completed_tasks: std::sync::atomic::AtomicUsize::new(0),
            done: (Mutex::new(false), Condvar::new()),
            handlers: crate::handler::HandlerRegistry::with_tracing_defaults(),
        }
    }

    pub fn add_task(&mut self, task: Task) -> TaskId {
        let id = task.id;
        task.recompute_latch();
        self.tasks.insert(id, task);
        self.num_tasks
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        id
    }

    pub fn task(&self, id: TaskId) -> Result<&Task> {
        self.tasks
            .get(&id)
            .ok_or_else(|| DataflowError::UnknownTask(id.to_string()))
    }

    pub fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| DataflowError::UnknownTask(id.to_string()))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.values_mut()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn remove_task(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id)
    }

    pub fn set_source(&mut self, id: TaskId) {
        self.sources.insert(id);
    }

    pub fn unset_source(&mut self, id: TaskId) {
        self.sources.remove(&id);
    }

    pub fn is_source(&self, id: TaskId) -> bool {
        self.sources.contains(&id)
    }

    pub fn sources(&self) -> impl Iterator<Item = &TaskId> {
        self.sources.iter()
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<Uuid> {
        let id = edge.id;
        {
            let src_task = self.task_mut(edge.source.task)?;
            src_task.out_edges.lock().unwrap().push(id);
        }
        self.edges.insert(id, edge);
        Ok(id)
    }

    pub fn edge(&self, id: Uuid) -> Result<&Edge> {
        self.edges
            .get(&id)
            .ok_or_else(|| DataflowError::UnknownTask(id.to_string()))
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn edges_mut(&mut self) -> impl Iterator<Item = &mut Edge> {
        self.edges.values_mut()
    }

    /// Edges whose destination is an in-port of `task_id`.
    pub fn in_edges(&self, task_id: TaskId) -> Vec<&Edge> {
        self.edges
            .values()
            .filter(|e| e.dest.task == task_id)
            .collect()
    }

    /// Edges whose source is an out-port of `task_id`.
    pub fn out_edges(&self, task_id: TaskId) -> Vec<&Edge> {
        self.edges
            .values()
            .filter(|e| e.source.task == task_id)
            .collect()
    }

    pub fn record_fusion(&mut self, fusee: TaskId, fused_into: TaskId) {
        self.fusee_map.insert(fusee, fused_into);
    }

    /// Resolves a task id through the fusee map, returning the id of the
    /// fused task that now represents it if it was absorbed by fusion.
    pub fn resolve(&self, id: TaskId) -> TaskId {
        self.fusee_map.get(&id).copied().unwrap_or(id)
    }

    pub fn num_tasks(&self) -> usize {
        self.num_tasks.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn set_num_tasks(&self, n: usize) {
        self.num_tasks.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    /// Marks one task complete; wakes any thread waiting on [`Self::wait_until_done`]
    /// once every task has reported in.
    pub fn mark_task_completed(&self) {
        let completed = self
            .completed_tasks
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        if completed >= self.num_tasks() {
            let (lock, cvar) = &self.done;
            let mut done = lock.lock();
            *done = true;
            cvar.notify_all();
        }
    }

    pub fn wait_until_done(&self) {
        let (lock, cvar) = &self.done;
        let mut done = lock.lock();
        while !*done {
            cvar.wait(&mut done);
        }
    }

    /// A stable-ordered, human-readable dump of the graph's tasks and
    /// edges, used by tests and by [`crate::pass::dot::DotGraphGenerator`]
    /// as a fallback textual form.
    pub fn dump(&self) -> String {
        let mut out = format!("graph {} ({} tasks)\n", self.name, self.tasks.len());
        let mut names: Vec<_> = self.tasks.values().map(|t| (t.name.clone(), t.id)).collect();
        names.sort();
        for (name, id) in names {
            out.push_str(&format!("  task {name} ({id})\n"));
        }
        let mut edges: Vec<_> = self
            .edges
            .values()
            .map(|e| format!("  {} -> {}", e.source, e.dest))
            .collect();
        edges.sort();
        for e in edges {
            out.push_str(&e);
            out.push('\n');
        }
        out
    }
}

/// Endpoint-resolving helper shared by passes and backends: looks up the
/// [`crate::task::Port`] a [`PortRef`] names.
pub fn resolve_port<'a>(graph: &'a TaskGraph, port_ref: &PortRef) -> Result<&'a crate::task::Port> {
    let task = graph.task(port_ref.task)?;
    let port = if task.inputs.contains_key(&port_ref.port) {
        &task.inputs[&port_ref.port]
    } else {
        task.outputs
            .get(&port_ref.port)
            .ok_or_else(|| DataflowError::UnknownPort {
                task: task.name.clone(),
                port: port_ref.port.clone(),
            })?
    };
    Ok(port)
}

/// Overwrites the type of the port a [`PortRef`] names, used by
/// [`crate::pass::typecheck::TypeCheck`] to unify a dynamic (`any`/
/// `anyfile`) endpoint onto the concrete type its edge partner carries.
pub fn set_port_type(graph: &mut TaskGraph, port_ref: &PortRef, ty: crate::typesys::Type) -> Result<()> {
    let task = graph.task_mut(port_ref.task)?;
    if let Some(port) = task.inputs.get_mut(&port_ref.port) {
        port.type_ = ty;
        return Ok(());
    }
    task.outputs
        .get_mut(&port_ref.port)
        .map(|port| port.type_ = ty)
        .ok_or_else(|| DataflowError::UnknownPort {
            task: task.name.clone(),
            port: port_ref.port.clone(),
        })
}

pub type SharedTaskGraph = Arc<TaskGraph>;
