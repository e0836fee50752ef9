//! The pre/post/init handler chain that wraps every task invocation.
//!
//! A task is never called directly by the backend; it always runs with a
//! [`HandlerContext`] threaded through the registered init, pre, and post
//! handlers, whether that's [`crate::task::Task::run`] in-process or
//! `snapshot::run_with_handlers` across a process boundary. The default
//! registry installed
//! by [`HandlerRegistry::with_tracing_defaults`] logs entry/exit and timing
//! through `tracing`, mirroring the profiler/tracer pair the original
//! runtime wired up unconditionally.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::value::Value;

/// Mutable state visible to every handler invoked around one task call.
pub struct HandlerContext {
    /// Name of the task being invoked.
    pub task_name: String,
    /// Arbitrary key/value bag handlers use to pass data to each other
    /// (e.g. the pre handler stashes a start `Instant`-derived millis value
    /// that the post handler reads back out to log a duration).
    properties: HashMap<String, Value>,
    /// Set by `post` handlers once the task has returned; `None` while
    /// handlers are still running pre-invocation.
    pub result: Option<Result<Vec<Value>>>,
}

impl HandlerContext {
    pub fn new(task_name: impl Into<String>) -> Self {
        HandlerContext {
            task_name: task_name.into(),
            properties: HashMap::new(),
            result: None,
        }
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.properties.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A handler observes (and may annotate) a task invocation; it never
/// changes control flow, only logs or records metadata.
pub trait Handler: Send + Sync {
    fn call(&self, ctx: &mut HandlerContext);
}

/// Ordered collections of handlers run before and after every task call,
/// plus a one-time init list run when the pipeline first compiles.
#[derive(Default)]
pub struct HandlerRegistry {
    init_handlers: Vec<Box<dyn Handler>>,
    pre_handlers: Vec<Box<dyn Handler>>,
    post_handlers: Vec<Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handler set every compiled pipeline installs unless the caller
    /// overrides it: a pre handler that records the start time and emits a
    /// `tracing::debug!` entry line, and a post handler that computes the
    /// elapsed duration and emits a `tracing::info!`/`tracing::warn!` exit
    /// line depending on whether the task errored.
    pub fn with_tracing_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_pre(TraceEntry);
        registry.register_post(TraceExit);
        registry
    }

    pub fn register_init(&mut self, handler: impl Handler + 'static) {
        self.init_handlers.push(Box::new(handler));
    }

    pub fn register_pre(&mut self, handler: impl Handler + 'static) {
        self.pre_handlers.push(Box::new(handler));
    }

    pub fn register_post(&mut self, handler: impl Handler + 'static) {
        self.post_handlers.push(Box::new(handler));
    }

    pub fn run_init(&self, ctx: &mut HandlerContext) {
        for h in &self.init_handlers {
            h.call(ctx);
        }
    }

    pub fn run_pre(&self, ctx: &mut HandlerContext) {
        for h in &self.pre_handlers {
            h.call(ctx);
        }
    }

    pub fn run_post(&self, ctx: &mut HandlerContext) {
        for h in &self.post_handlers {
            h.call(ctx);
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Logs task entry and stashes a start timestamp (milliseconds since the
/// Unix epoch) for [`TraceExit`] to diff against.
struct TraceEntry;

impl Handler for TraceEntry {
    fn call(&self, ctx: &mut HandlerContext) {
        tracing::debug!(task = %ctx.task_name, "entering task");
        ctx.set("__start_millis", Value::Int(now_millis()));
    }
}

/// Logs task exit, including whether it failed and how long it ran for.
struct TraceExit;

impl Handler for TraceExit {
    fn call(&self, ctx: &mut HandlerContext) {
        let elapsed_ms = ctx.get("__start_millis").and_then(Value::as_int).map(|start| now_millis() - start);
        match &ctx.result {
            Some(Ok(outputs)) => {
                tracing::info!(task = %ctx.task_name, outputs = outputs.len(), elapsed_ms, "task completed");
            }
            Some(Err(err)) => {
                tracing::warn!(task = %ctx.task_name, error = %err, elapsed_ms, "task failed");
            }
            None => {
                tracing::warn!(task = %ctx.task_name, "post handler ran before task completed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_runs_without_panicking() {
        let registry = HandlerRegistry::with_tracing_defaults();
        let mut ctx = HandlerContext::new("add");
        registry.run_pre(&mut ctx);
        ctx.result = Some(Ok(vec![Value::Int(3)]));
        registry.run_post(&mut ctx);
    }

    #[test]
    fn pre_handler_stashes_a_start_time_the_post_handler_can_diff_against() {
        let registry = HandlerRegistry::with_tracing_defaults();
        let mut ctx = HandlerContext::new("add");
        registry.run_pre(&mut ctx);
        assert!(ctx.get("__start_millis").and_then(Value::as_int).is_some());
        ctx.result = Some(Ok(vec![]));
        registry.run_post(&mut ctx);
    }
}
