//! The task graph's node- and edge-level building blocks: ports, edges, and
//! the [`Task`] itself. [`crate::graph::TaskGraph`] is the arena that owns
//! these by id; nothing here holds a reference to another task or port
//! directly, which is what lets the graph be built, compiled, and shared
//! across threads without `Rc`/`RefCell` cycles.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DataflowError, Result};
use crate::typesys::Type;
use crate::value::Value;

/// Identifies a task within a [`crate::graph::TaskGraph`]. Stable across
/// passes and across the process boundary the multiprocess and batch
/// backends introduce (it is what gets written into transfer file names).
pub type TaskId = Uuid;

/// Names one endpoint of an [`Edge`]: a task id plus the name of one of its
/// ports (an input keyed by parameter name, or an output keyed by its
/// stringified positional index, e.g. `"0"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub task: TaskId,
    pub port: String,
}

impl PortRef {
    pub fn new(task: TaskId, port: impl Into<String>) -> Self {
        PortRef {
            task,
            port: port.into(),
        }
    }

    /// The file name a multiprocess or batch transfer uses for this port:
    /// `<task_id>_<port_name>`.
    pub fn transfer_file_name(&self) -> String {
        format!("{}_{}", self.task, self.port)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.task, self.port)
    }
}

/// One typed connection point on a task.
///
/// An in-port accumulates a single value (written once, by the one edge
/// feeding it, or by the caller for a bound literal) and participates in
/// its task's latch; an out-port has no storage of its own, it is only a
/// named, typed source that edges can point at.
#[derive(Clone, Debug)]
pub struct Port {
    pub type_: Type,
    pub name: String,
    /// `-1` for in-ports (matching the convention used when the original
    /// runtime constructs a named, non-positional port); the zero-based
    /// tuple-output slot for out-ports.
    pub index: i64,
    pub task: TaskId,
    pub is_inport: bool,
    /// Only meaningful for in-ports. A non-immediate in-port holds its
    /// owning task's latch up until a value arrives; an immediate in-port
    /// never does (it is either pre-bound to a literal or fed by a
    /// staging/transform task inserted ahead of it).
    pub is_immediate: bool,
    /// Whether the edge feeding this in-port transfers its value with a
    /// single push-and-notify step (in-process, multiprocess) or requires
    /// the receiving side to poll for it (batch). Irrelevant for out-ports.
    pub is_one_sided_receive: bool,
}

impl Port {
    pub fn in_port(type_: Type, name: impl Into<String>, task: TaskId) -> Self {
        Port {
            type_,
            name: name.into(),
            index: -1,
            task,
            is_inport: true,
            is_immediate: false,
            is_one_sided_receive: true,
        }
    }

    pub fn out_port(type_: Type, index: usize, task: TaskId) -> Self {
        Port {
            type_,
            name: index.to_string(),
            index: index as i64,
            task,
            is_inport: false,
            is_immediate: true,
            is_one_sided_receive: true,
        }
    }
}

/// A directed connection between one task's out-port and another's in-port.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    pub id: Uuid,
    pub source: PortRef,
    pub dest: PortRef,
    /// Set by [`crate::pass::transform::Transform`] when the source and
    /// destination types require an inserted conversion task rather than a
    /// direct connection.
    pub needs_transform: bool,
}

impl Edge {
    pub fn new(source: PortRef, dest: PortRef) -> Self {
        Edge {
            id: Uuid::new_v4(),
            source,
            dest,
            needs_transform: false,
        }
    }
}

/// A handle identifying a single output of a (possibly multi-output) task.
///
/// Returned by [`crate::recorder::GraphRecorder::call`] for every element
/// of a task's return tuple, so that each output can be wired to a
/// different downstream task independently. It does not own a node in the
/// graph: it simply names `(parent, out_slot_in_parent)`, which resolves to
/// the out-port `PortRef::new(parent, out_slot_in_parent.to_string())`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tasklet {
    pub parent: TaskId,
    pub out_slot_in_parent: usize,
}

impl Tasklet {
    pub fn port_ref(&self) -> PortRef {
        PortRef::new(self.parent, self.out_slot_in_parent.to_string())
    }
}

/// The fixed cap on how many elements a task's return tuple may unpack
/// into. A task returning more than this many values is a construction
/// error rather than a silently truncated one.
pub const MAX_TASK_OUTPUTS: usize = 10;

/// The function signature every registered task body implements: it
/// receives its bound arguments by name and returns one or more output
/// values in tuple-output order.
pub type TaskBody = dyn Fn(&HashMap<String, Value>) -> anyhow::Result<Vec<Value>> + Send + Sync;

/// Link-time registration record for a task function, so that the
/// multiprocess and batch backends can look a task up by name after
/// crossing a process boundary (a closure captured by the in-process
/// recorder cannot be serialized or re-created in a child process).
///
/// ```ignore
/// inventory::submit! {
///     dataflow_core::task::TaskFn {
///         name: "add",
///         run: |args| {
///             let a = args["a"].as_int().unwrap();
///             let b = args["b"].as_int().unwrap();
///             Ok(vec![dataflow_core::value::Value::Int(a + b)])
///         },
///     }
/// }
/// ```
pub struct TaskFn {
    pub name: &'static str,
    pub run: fn(&HashMap<String, Value>) -> anyhow::Result<Vec<Value>>,
}

inventory::collect!(TaskFn);

/// Looks up a registered [`TaskFn`] by name. Used by any backend that
/// re-invokes a task body outside of the process that recorded the graph.
pub fn lookup_task_fn(name: &str) -> Result<&'static TaskFn> {
    inventory::iter::<TaskFn>()
        .into_iter()
        .find(|f| f.name == name)
        .ok_or_else(|| DataflowError::UnregisteredTaskFn(name.to_string()))
}

/// Distinguishes an ordinary task from the synthetic node
/// [`crate::pass::fusion::Fusion`] produces by collapsing a linear chain of
/// single-parent/single-child tasks into one in-process unit.
#[derive(Clone, Debug)]
pub enum TaskKind {
    Plain,
    Fused {
        members: Vec<TaskId>,
        head: TaskId,
        tail: TaskId,
    },
}

/// A node in the task graph.
///
/// Holds its own ports, its latch, and the arguments collected so far; it
/// does not hold references to other tasks or edges by pointer, only by
/// id, so the owning [`crate::graph::TaskGraph`] can be freely shared
/// across the threads a backend spins up without any unsafe aliasing.
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    /// Name under which this task's body is registered in the [`TaskFn`]
    /// inventory, used by the multiprocess/batch backends.
    pub fn_name: &'static str,
    /// The in-process closure, available whenever this task runs inside
    /// the process that built the graph (always true for the sequential
    /// backend; true for the parent's own bookkeeping in the multiprocess
    /// backend, though the parent never calls it directly).
    pub body: std::sync::Arc<TaskBody>,
    pub inputs: HashMap<String, Port>,
    pub outputs: HashMap<String, Port>,
    /// Ids of edges whose `source` is this task.
    pub out_edges: Mutex<Vec<Uuid>>,
    /// Arguments collected from in-ports as they arrive, keyed by in-port
    /// name. Drained and passed to `body` once the latch reaches zero.
    pub args: Mutex<HashMap<String, Value>>,
    /// Count of in-ports that are not `is_immediate` and have not yet
    /// received a value. The task becomes runnable when this hits zero.
    pub latch: AtomicUsize,
    pub is_source: bool,
    pub is_sink: std::sync::atomic::AtomicBool,
    /// Set on tasks inserted by the Stage pass.
    pub is_staging: bool,
    /// Set on tasks inserted by the Transform pass.
    pub is_transform: bool,
    /// Set once this task is absorbed into a [`TaskKind::Fused`] task by
    /// the Fusion pass; such tasks are skipped by backends, which run the
    /// fused task in their place.
    pub is_fusee: std::sync::atomic::AtomicBool,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("latch", &self.latch.load(Ordering::SeqCst))
            .finish()
    }
}

impl Task {
    /// Resets the latch to the count of non-immediate in-ports. Called once
    /// at construction and again by [`crate::pass::stage::Stage`]/
    /// [`crate::pass::transform::Transform`] whenever a port's immediacy
    /// changes after the task was first built.
    pub fn recompute_latch(&self) {
        let n = self.inputs.values().filter(|p| !p.is_immediate).count();
        self.latch.store(n, Ordering::SeqCst);
    }

    /// Toggles an in-port's immediacy and keeps the latch consistent.
    /// Inserting a staging or transform task ahead of a port makes the
    /// original port immediate (its value now arrives pre-resolved through
    /// the inserted task rather than through the latch-gated edge).
    pub fn flip_is_immediate(&mut self, port_name: &str) -> Result<()> {
        let port = self
            .inputs
            .get_mut(port_name)
            .ok_or_else(|| DataflowError::UnknownPort {
                task: self.name.clone(),
                port: port_name.to_string(),
            })?;
        let was_immediate = port.is_immediate;
        port.is_immediate = !was_immediate;
        self.recompute_latch();
        Ok(())
    }

    /// Decrements the latch by one, returning `true` if this was the call
    /// that brought it to zero (the task is now runnable).
    pub fn notify(&self) -> bool {
        self.latch.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub fn is_ready(&self) -> bool {
        self.latch.load(Ordering::SeqCst) == 0
    }

    pub fn record_arg(&self, port_name: &str, value: Value) {
        self.args.lock().unwrap().insert(port_name.to_string(), value);
    }

    /// Runs the task's body against the arguments collected so far, using
    /// the in-process closure. Multiprocess/batch backends instead dispatch
    /// through [`lookup_task_fn`] in a child process or job script (see
    /// [`crate::snapshot::execute`], which fires the same handler pair
    /// around that out-of-process call).
    ///
    /// `handlers` runs its pre-handlers before the body and its
    /// post-handlers after, win or lose, matching spec's "pre-handlers
    /// fire, the user callable runs, post-handlers fire" execution phase;
    /// a task is never called directly, only through this wrapper.
    ///
    /// A panicking body is caught rather than unwinding into the backend
    /// driving this task, so one broken task degrades to a
    /// [`DataflowError::TaskError`] (the same "task runtime error"
    /// disposition a returned `Err` gets) instead of taking down whichever
    /// thread or process happened to be running it.
    pub fn run(&self, handlers: &crate::handler::HandlerRegistry) -> Result<Vec<Value>> {
        let args = self.args.lock().unwrap().clone();
        let body = &self.body;

        let mut ctx = crate::handler::HandlerContext::new(self.name.clone());
        handlers.run_pre(&mut ctx);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(&args)))
            .unwrap_or_else(|panic| Err(anyhow::anyhow!("task panicked: {}", panic_message(&panic))));

        match &outcome {
            Ok(values) => ctx.result = Some(Ok(values.clone())),
            Err(err) => {
                ctx.result = Some(Err(DataflowError::TaskError {
                    task: self.name.clone(),
                    source: anyhow::anyhow!(err.to_string()),
                }))
            }
        }
        handlers.run_post(&mut ctx);

        outcome.map_err(|source| DataflowError::TaskError {
            task: self.name.clone(),
            source,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
