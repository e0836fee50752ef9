//! Builds a [`TaskGraph`] by recording task calls as a pipeline function
//! runs once, eagerly, at call time.
//!
//! The original runtime used decorators and call-time reflection so a
//! plain Python function, written as if it were eagerly computing values,
//! actually records a graph instead. Rust has no call-time reflection, so
//! [`GraphRecorder`] makes the graph-building step explicit: a pipeline is
//! a function that takes `&mut GraphRecorder` and calls
//! [`GraphRecorder::call`] in place of invoking a task directly, threading
//! the [`Tasklet`] handles [`GraphRecorder::call`] returns as inputs to
//! later calls. There is no hidden global recorder instance to thread
//! through implicitly; a pipeline function cannot observe or mutate a
//! graph it wasn't explicitly handed.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{DataflowError, Result};
use crate::graph::TaskGraph;
use crate::task::{Edge, Port, PortRef, Task, TaskBody, TaskKind, Tasklet, MAX_TASK_OUTPUTS};
use crate::typesys::{get_type, Type, TypeAnnotation};
use crate::value::Value;

/// One parameter of a task signature.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub type_ann: TypeAnnotation,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, type_ann: TypeAnnotation) -> Self {
        ParamSpec {
            name: name.into(),
            type_ann,
        }
    }
}

/// One element of a task's (possibly tuple) return value.
#[derive(Clone, Debug)]
pub struct ReturnSpec {
    pub type_ann: TypeAnnotation,
}

impl ReturnSpec {
    pub fn new(type_ann: TypeAnnotation) -> Self {
        ReturnSpec { type_ann }
    }
}

/// The full parameter/return shape of a task, independent of any
/// particular call site.
#[derive(Clone, Debug)]
pub struct Signature {
    pub params: Vec<ParamSpec>,
    pub returns: Vec<ReturnSpec>,
}

impl Signature {
    pub fn new(params: Vec<ParamSpec>, returns: Vec<ReturnSpec>) -> Self {
        Signature { params, returns }
    }
}

/// One argument at a task call site: either a literal value bound directly
/// (the in-port becomes immediate and never touches the latch) or the
/// output of a previously recorded task (wires an edge).
#[derive(Clone, Debug)]
pub enum Arg {
    Value(Value),
    Output(Tasklet),
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl From<Tasklet> for Arg {
    fn from(t: Tasklet) -> Self {
        Arg::Output(t)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Value(Value::Int(v))
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Value(Value::Str(v.to_string()))
    }
}

/// Records tasks into a [`TaskGraph`] as a pipeline function calls
/// [`GraphRecorder::call`].
pub struct GraphRecorder {
    graph: TaskGraph,
}

impl GraphRecorder {
    pub fn new(name: impl Into<String>) -> Self {
        GraphRecorder {
            graph: TaskGraph::new(name),
        }
    }

    /// Records one task call: validates arity, resolves each parameter and
    /// return type (including dependent `@argsN.field` returns, read off
    /// whichever argument is a bound literal), wires an edge for every
    /// [`Arg::Output`], and binds every [`Arg::Value`] directly as an
    /// immediate in-port. Returns one [`Tasklet`] per declared return slot,
    /// addressable as an `Arg` for later calls.
    pub fn call(
        &mut self,
        task_name: impl Into<String>,
        fn_name: &'static str,
        body: Arc<TaskBody>,
        sig: Signature,
        args: Vec<Arg>,
    ) -> Result<Vec<Tasklet>> {
        let task_name = task_name.into();
        if args.len() != sig.params.len() {
            return Err(DataflowError::PassFailed {
                pass: "record",
                message: format!(
                    "task `{task_name}` declares {} parameters but was called with {}",
                    sig.params.len(),
                    args.len()
                ),
            });
        }
        if sig.returns.len() > MAX_TASK_OUTPUTS {
            return Err(DataflowError::TooManyOutputs(
                task_name,
                sig.returns.len(),
                MAX_TASK_OUTPUTS,
            ));
        }

        let id = Uuid::new_v4();
        let mut inputs = HashMap::new();
        let mut immediate_values = Vec::new();
        let mut incoming_edges = Vec::new();

        for (param, arg) in sig.params.iter().zip(args.iter()) {
            let ty = get_type(&param.type_ann);
            let mut port = Port::in_port(ty, param.name.clone(), id);
            match arg {
                Arg::Value(v) => {
                    port.is_immediate = true;
                    immediate_values.push((param.name.clone(), v.clone()));
                }
                Arg::Output(tasklet) => {
                    incoming_edges.push(Edge::new(tasklet.port_ref(), PortRef::new(id, param.name.clone())));
                }
            }
            inputs.insert(param.name.clone(), port);
        }

        let mut outputs = HashMap::new();
        for (slot, ret) in sig.returns.iter().enumerate() {
            let ty = resolve_return_type(ret, &sig.params, &args, slot);
            outputs.insert(slot.to_string(), Port::out_port(ty, slot, id));
        }
        // A task declared with no returns still exposes a single sink-style
        // slot 0 so backends have somewhere to record "it ran".
        if outputs.is_empty() {
            outputs.insert("0".to_string(), Port::out_port(Type::dynamic("any"), 0, id));
        }

        let task = Task {
            id,
            name: task_name,
            kind: TaskKind::Plain,
            fn_name,
            body,
            inputs,
            outputs,
            out_edges: std::sync::Mutex::new(Vec::new()),
            args: std::sync::Mutex::new(HashMap::new()),
            latch: std::sync::atomic::AtomicUsize::new(0),
            is_source: incoming_edges.is_empty(),
            is_sink: std::sync::atomic::AtomicBool::new(true),
            is_staging: false,
            is_transform: false,
            is_fusee: std::sync::atomic::AtomicBool::new(false),
        };

        for (name, value) in immediate_values {
            task.record_arg(&name, value);
        }

        let is_source = task.is_source;
        self.graph.add_task(task);
        if is_source {
            self.graph.set_source(id);
        }
        for edge in incoming_edges {
            // The producing task is no longer a pure sink once something
            // consumes one of its outputs.
            let producer = edge.source.task;
            if let Ok(t) = self.graph.task(producer) {
                t.is_sink.store(false, std::sync::atomic::Ordering::SeqCst);
            }
            self.graph.add_edge(edge)?;
        }

        let n = self
            .graph
            .task(id)?
            .outputs
            .len();
        Ok((0..n)
            .map(|slot| Tasklet {
                parent: id,
                out_slot_in_parent: slot,
            })
            .collect())
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut TaskGraph {
        &mut self.graph
    }

    pub fn finish(self) -> TaskGraph {
        self.graph
    }
}

/// Resolves a return annotation into a concrete type, handling the
/// dependent `@argsN.field` form by reading `field` off the `arg_index`th
/// call argument if it was bound as a literal dict; anything else
/// (including an unresolvable dependent annotation) falls back to
/// [`get_type`]'s dynamic-`any` default.
fn resolve_return_type(ret: &ReturnSpec, _params: &[ParamSpec], args: &[Arg], _slot: usize) -> Type {
    if let TypeAnnotation::Dependent { arg_index, field } = &ret.type_ann {
        if let Some(Arg::Value(value)) = args.get(*arg_index) {
            if let Some(resolved) = value.get_field(field) {
                if let Some(s) = resolved.as_str() {
                    return Type::file(s.to_string());
                }
            }
        }
    }
    get_type(&ret.type_ann)
}

/// Entry point mirroring the original `app(**configs)` decorator: runs
/// `build` once against a fresh recorder, named `name`, and hands back the
/// recorded graph ready for [`crate::pass::PassManager`].
pub fn app(
    name: impl Into<String>,
    build: impl FnOnce(&mut GraphRecorder) -> Result<()>,
) -> Result<TaskGraph> {
    let mut recorder = GraphRecorder::new(name);
    build(&mut recorder)?;
    Ok(recorder.finish())
}

/// A pipeline builder registered at link time under its app name, so the
/// `dataflow` binary can resolve a `<file>` CLI argument to a build
/// function the same way [`crate::task::lookup_task_fn`] resolves a task
/// name to a runnable body. Rust has no module-`exec` equivalent of the
/// original CLI's "load the file, call the decorated app function"; this
/// registry is the load-bearing stand-in, following the same
/// `inventory::submit!`/`collect!` pattern as [`crate::task::TaskFn`].
pub struct AppFn {
    pub name: &'static str,
    pub build: fn(&mut GraphRecorder) -> Result<()>,
}

inventory::collect!(AppFn);

/// Looks up a registered app by name, erroring the same way an unknown
/// task function does if nothing was submitted under that name.
pub fn lookup_app_fn(name: &str) -> Result<&'static AppFn> {
    inventory::iter::<AppFn>()
        .find(|a| a.name == name)
        .ok_or_else(|| DataflowError::UnknownTask(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_body() -> Arc<TaskBody> {
        Arc::new(|args: &HashMap<String, Value>| {
            let a = args["a"].as_int().unwrap();
            let b = args["b"].as_int().unwrap();
            Ok(vec![Value::Int(a + b)])
        })
    }

    #[test]
    fn records_a_single_source_task() {
        let graph = app("arith", |rec| {
            rec.call(
                "add",
                "test_add",
                add_body(),
                Signature::new(
                    vec![
                        ParamSpec::new("a", TypeAnnotation::Int),
                        ParamSpec::new("b", TypeAnnotation::Int),
                    ],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(1), Arg::from(2)],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(graph.task_count(), 1);
        assert_eq!(graph.sources().count(), 1);
    }

    #[test]
    fn wires_an_edge_between_two_tasks() {
        let graph = app("chain", |rec| {
            let outs = rec.call(
                "add",
                "test_add",
                add_body(),
                Signature::new(
                    vec![
                        ParamSpec::new("a", TypeAnnotation::Int),
                        ParamSpec::new("b", TypeAnnotation::Int),
                    ],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(1), Arg::from(2)],
            )?;
            rec.call(
                "succ",
                "test_succ",
                Arc::new(|args: &HashMap<String, Value>| {
                    Ok(vec![Value::Int(args["x"].as_int().unwrap() + 1)])
                }),
                Signature::new(
                    vec![ParamSpec::new("x", TypeAnnotation::Int)],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(outs[0])],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(graph.task_count(), 2);
        assert_eq!(graph.edges().count(), 1);
    }

    #[test]
    fn rejects_too_many_outputs() {
        let returns = (0..=MAX_TASK_OUTPUTS)
            .map(|_| ReturnSpec::new(TypeAnnotation::Int))
            .collect();
        let result = app("overflow", |rec| {
            rec.call(
                "explode",
                "test_explode",
                Arc::new(|_| Ok(vec![])),
                Signature::new(vec![], returns),
                vec![],
            )?;
            Ok(())
        });
        assert!(matches!(result, Err(DataflowError::TooManyOutputs(_, _, _))));
    }
}
