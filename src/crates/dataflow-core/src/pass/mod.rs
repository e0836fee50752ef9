//! The multi-pass compiler that turns a recorded [`crate::graph::TaskGraph`]
//! into one ready to execute: [`preprocess`], [`dot`] (before), [`typecheck`],
//! [`transform`], [`stage`], [`fusion`], [`dot`] (after), [`postprocess`],
//! run in that order by [`PassManager`].

pub mod dot;
pub mod fusion;
pub mod postprocess;
pub mod preprocess;
pub mod stage;
pub mod transform;
pub mod typecheck;

use std::collections::HashMap;

use crate::error::{DataflowError, Result};
use crate::graph::TaskGraph;
use crate::value::Value;

/// The outcome of running one pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassResult {
    /// The pass found nothing worth stopping for; proceed to the next pass.
    Continue,
    /// The pass found something questionable but survivable; the message
    /// is recorded in [`PassContext::warnings`] and compilation continues.
    Warn(String),
    /// The pass found a condition compilation cannot proceed past; the
    /// message surfaces as a [`DataflowError::PassFailed`] and the pipeline
    /// is not compiled.
    Error(String),
}

/// State threaded through every pass: accumulated diagnostics plus a
/// free-form property bag passes use to hand data to later passes (e.g.
/// [`stage::Stage`] records which tasks it inserted so [`fusion::Fusion`]
/// can refuse to fuse across a staging boundary).
#[derive(Default)]
pub struct PassContext {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub properties: HashMap<String, Value>,
}

impl PassContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.properties.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A single compiler pass.
///
/// `run` does the pass's work against the graph; `post_run` is a second
/// hook invoked after every pass in the pipeline has run once, used by
/// passes (currently only [`dot::DotGraphGenerator`]) that need to observe
/// the graph's final shape rather than its shape at the point they ran.
pub trait Pass {
    /// A short, stable name used in diagnostics and in
    /// [`DataflowError::PassFailed`].
    fn name(&self) -> &'static str;

    fn run(&self, graph: &mut TaskGraph, ctx: &mut PassContext) -> PassResult;

    fn post_run(&self, _graph: &mut TaskGraph, _ctx: &mut PassContext) -> PassResult {
        PassResult::Continue
    }
}

/// Runs a fixed, ordered list of passes over a graph, stopping at the
/// first [`PassResult::Error`].
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        PassManager { passes: Vec::new() }
    }

    /// The pass pipeline every compiled graph runs: structural
    /// normalization, a pre-transform visualization snapshot, type
    /// checking, type-driven transform insertion, remote-input staging,
    /// linear-chain fusion, a post-transform visualization snapshot, and a
    /// final consistency check.
    pub fn standard() -> Self {
        let mut pm = PassManager::new();
        pm.register(preprocess::PreProcess);
        pm.register(dot::DotGraphGenerator::before());
        pm.register(typecheck::TypeCheck);
        pm.register(transform::Transform);
        pm.register(stage::Stage);
        pm.register(fusion::Fusion);
        pm.register(dot::DotGraphGenerator::after());
        pm.register(postprocess::PostProcess);
        pm
    }

    pub fn register(&mut self, pass: impl Pass + 'static) {
        self.passes.push(Box::new(pass));
    }

    pub fn run(&self, graph: &mut TaskGraph) -> Result<PassContext> {
        let mut ctx = PassContext::new();
        for pass in &self.passes {
            match pass.run(graph, &mut ctx) {
                PassResult::Continue => {}
                PassResult::Warn(msg) => {
                    tracing::warn!(pass = pass.name(), "{msg}");
                    ctx.warnings.push(msg);
                }
                PassResult::Error(msg) => {
                    return Err(DataflowError::PassFailed {
                        pass: pass.name(),
                        message: msg,
                    });
                }
            }
        }
        for pass in &self.passes {
            match pass.post_run(graph, &mut ctx) {
                PassResult::Continue => {}
                PassResult::Warn(msg) => {
                    tracing::warn!(pass = pass.name(), "{msg}");
                    ctx.warnings.push(msg);
                }
                PassResult::Error(msg) => {
                    return Err(DataflowError::PassFailed {
                        pass: pass.name(),
                        message: msg,
                    });
                }
            }
        }
        Ok(ctx)
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}
