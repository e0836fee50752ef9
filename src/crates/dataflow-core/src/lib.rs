//! Builds and executes dataflow task graphs: a recorder turns a plain Rust
//! function into a graph of typed tasks and ports, a multi-pass compiler
//! validates and rewrites that graph, and one of three backends runs the
//! result — in-process, as one OS process per task, or packaged as a Slurm
//! job array.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dataflow_core::recorder::{Arg, GraphRecorder, Signature, ParamSpec, ReturnSpec};
//! use dataflow_core::runner::AppRunner;
//! use dataflow_core::typesys::TypeAnnotation;
//! use dataflow_core::backend::{BackendConfig, BackendType};
//! use dataflow_core::value::Value;
//!
//! fn build(rec: &mut GraphRecorder) -> dataflow_core::error::Result<()> {
//!     let sig = Signature {
//!         params: vec![ParamSpec { name: "n".into(), type_ann: TypeAnnotation::Int }],
//!         returns: vec![ReturnSpec { type_ann: TypeAnnotation::Int }],
//!     };
//!     let out = rec.call(
//!         "inc",
//!         "inc_fn",
//!         Arc::new(|args| Ok(vec![Value::Int(args["n"].as_int().unwrap() + 1)])),
//!         sig,
//!         vec![Arg::Value(Value::Int(41))],
//!     )?;
//!     let _ = out;
//!     Ok(())
//! }
//!
//! let mut runner = AppRunner::new("demo", BackendType::Serial, BackendConfig::default(), Box::new(build));
//! runner.compile().unwrap();
//! let outputs = runner.run().unwrap();
//! assert_eq!(outputs["inc"], vec![Value::Int(42)]);
//! ```
//!
//! # Module organization
//!
//! - [`typesys`] — the canonical [`typesys::Type`] registry and the
//!   castability relation the type-check pass enforces.
//! - [`value`] — the runtime [`value::Value`] a port actually carries.
//! - [`task`] — [`task::Port`], [`task::Edge`], [`task::Task`] and the
//!   [`task::Tasklet`] handle a [`recorder::GraphRecorder::call`] returns.
//! - [`graph`] — [`graph::TaskGraph`], the mutable graph every pass and
//!   backend operates on.
//! - [`recorder`] — [`recorder::GraphRecorder`], which turns ordinary
//!   function calls into a recorded graph.
//! - [`handler`] — the init/pre/post hook registry tasks run through.
//! - [`pass`] — the compiler: [`pass::PassManager::standard`] and its
//!   eight passes.
//! - [`backend`] — [`backend::sequential`], [`backend::multiprocess`],
//!   [`backend::batch`] and the shared [`backend::fileport`] transfer
//!   contract.
//! - [`snapshot`] — the serializable [`snapshot::GraphSnapshot`] projection
//!   out-of-process backends re-load to execute a single task.
//! - [`archive`] — packages a compiled graph into a `tar.gz` runnable by
//!   `dataflow run` or `sbatch`.
//! - [`runner`] — [`runner::AppRunner`], the `compile` → `run`/`package`/
//!   `deploy` lifecycle the CLI drives.
//! - [`error`] — [`error::DataflowError`] and the crate's [`error::Result`]
//!   alias.
//!
//! # Comparison to hand-rolled pipelines
//!
//! | Hand-rolled script | This crate |
//! |---|---|
//! | Shell out between steps, pass paths on argv | Typed ports, checked by [`pass::typecheck`] |
//! | `if backend == "slurm": ...` scattered around | One [`backend::Backend`] trait, three impls |
//! | Manual file-exists polling | [`backend::fileport::poll_for_value`] with backoff |
//! | Print statements | [`handler::HandlerRegistry`] wired to `tracing` |
//!
//! # Practices
//!
//! - Do register task functions with `inventory::submit!` so out-of-process
//!   backends can look them up by name; don't rely on closures capturing
//!   non-`'static` state for anything that might run in a child process.
//! - Do run [`pass::PassManager::standard`] through [`runner::AppRunner::compile`]
//!   rather than hand-assembling a subset of passes; the pass order encodes
//!   real dependencies (e.g. [`pass::stage::Stage`] must run before
//!   [`pass::fusion::Fusion`] so staging boundaries are in place to refuse).
//! - Don't mutate a [`graph::TaskGraph`] after [`runner::AppRunner::compile`]
//!   has returned; every backend assumes the topology it was handed is final.

pub mod archive;
pub mod backend;
pub mod error;
pub mod graph;
pub mod handler;
pub mod pass;
pub mod recorder;
pub mod runner;
pub mod snapshot;
pub mod task;
pub mod typesys;
pub mod value;

pub use error::{DataflowError, Result};
pub use graph::{SharedTaskGraph, TaskGraph};
pub use recorder::{app, lookup_app_fn, AppFn, Arg, GraphRecorder, ParamSpec, ReturnSpec, Signature};
pub use runner::AppRunner;
pub use task::{Task, TaskId, Tasklet};
pub use typesys::{Type, TypeAnnotation};
pub use value::Value;
