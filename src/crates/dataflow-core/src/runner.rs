//! [`AppRunner`]: the single entry point gluing recording, compilation, and
//! execution together, the way a pipeline author (or the `dataflow-cli`
//! binary) actually drives this crate rather than calling
//! [`crate::recorder::app`] and [`crate::pass::PassManager`] by hand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{make_backend, BackendConfig, BackendType, RunOutputs};
use crate::error::{DataflowError, Result};
use crate::graph::TaskGraph;
use crate::recorder::GraphRecorder;

type BuildFn = dyn FnOnce(&mut GraphRecorder) -> Result<()>;

/// Orchestrates one pipeline's lifecycle: build once, compile once, then
/// run or package as many times as the caller likes against the compiled
/// graph. Compiling twice, or running/packaging before a first compile, is
/// a [`DataflowError::InvalidState`] rather than a silent no-op, matching
/// this crate's "abort loudly at a misuse boundary" error philosophy.
pub struct AppRunner {
    app_name: String,
    backend_type: BackendType,
    config: BackendConfig,
    build: Option<Box<BuildFn>>,
    graph: Option<Arc<TaskGraph>>,
    /// Rendered pre-/post-fusion dot text, captured from the pass
    /// manager's [`crate::pass::PassContext`] once [`Self::compile`]
    /// returns; `None` until then.
    dot: Option<(String, String)>,
}

impl AppRunner {
    pub fn new(
        app_name: impl Into<String>,
        backend_type: BackendType,
        config: BackendConfig,
        build: impl FnOnce(&mut GraphRecorder) -> Result<()> + 'static,
    ) -> Self {
        AppRunner {
            app_name: app_name.into(),
            backend_type,
            config,
            build: Some(Box::new(build)),
            graph: None,
            dot: None,
        }
    }

    /// Records the pipeline by calling the build function once, then runs
    /// the standard pass pipeline over the resulting graph. Returns a
    /// shared handle to the compiled graph, the same one `run`/`package`
    /// use afterward.
    pub fn compile(&mut self) -> Result<Arc<TaskGraph>> {
        if self.graph.is_some() {
            return Err(DataflowError::InvalidState(
                "pipeline was already compiled".to_string(),
            ));
        }
        let build = self.build.take().ok_or_else(|| {
            DataflowError::InvalidState("pipeline was already compiled".to_string())
        })?;

        let mut graph = crate::recorder::app(self.app_name.clone(), build)?;
        let pm = crate::pass::PassManager::standard();
        let ctx = pm.run(&mut graph)?;

        let dot_before = ctx.get("dot_before").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let dot_after = ctx.get("dot_after").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        self.dot = Some((dot_before, dot_after));

        let graph = Arc::new(graph);
        self.graph = Some(graph.clone());
        Ok(graph)
    }

    /// The pre-fusion dot document captured during [`Self::compile`], or
    /// `None` if compilation hasn't run yet.
    pub fn dot_before(&self) -> Option<&str> {
        self.dot.as_ref().map(|(before, _)| before.as_str())
    }

    /// The post-fusion dot document captured during [`Self::compile`], or
    /// `None` if compilation hasn't run yet.
    pub fn dot_after(&self) -> Option<&str> {
        self.dot.as_ref().map(|(_, after)| after.as_str())
    }

    /// Writes `<graph_name>-before.dot` and `<graph_name>-after.dot` into
    /// `dir`, per the archive's dot-output contract, and returns their
    /// paths.
    pub fn write_dot_files(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        let (before, after) = self.dot.as_ref().ok_or_else(|| {
            DataflowError::InvalidState("pipeline must be compiled before dot files can be written".to_string())
        })?;
        std::fs::create_dir_all(dir)?;
        let before_path = dir.join(format!("{}-before.dot", self.app_name));
        let after_path = dir.join(format!("{}-after.dot", self.app_name));
        std::fs::write(&before_path, before)?;
        std::fs::write(&after_path, after)?;
        Ok((before_path, after_path))
    }

    /// Runs the compiled graph to completion on the configured backend and
    /// returns every sink's final output.
    pub fn run(&self) -> Result<RunOutputs> {
        let graph = self.compiled_graph()?;
        let backend = make_backend(self.backend_type);
        backend.run(graph, &self.config)
    }

    /// Packages the compiled graph into a deployable archive under
    /// `out_dir`, named `app_name`.
    pub fn package(&self, out_dir: &Path) -> Result<PathBuf> {
        let graph = self.compiled_graph()?;
        let backend = make_backend(self.backend_type);
        backend.package(&graph, &self.app_name, out_dir, &self.config)
    }

    /// Ships a previously packaged archive to a remote endpoint (batch
    /// backend only).
    pub fn deploy(&self, archive: &Path, target_url: &str) -> Result<()> {
        let backend = make_backend(self.backend_type);
        backend.deploy(archive, target_url)
    }

    fn compiled_graph(&self) -> Result<Arc<TaskGraph>> {
        self.graph.clone().ok_or_else(|| {
            DataflowError::InvalidState(
                "pipeline must be compiled before it can run, be packaged, or be deployed"
                    .to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{Arg, ParamSpec, ReturnSpec, Signature};
    use crate::typesys::TypeAnnotation;
    use crate::value::Value;
    use std::collections::HashMap as Map;

    fn build_add_succ(rec: &mut GraphRecorder) -> Result<()> {
        let outs = rec.call(
            "add",
            "runner_test_add",
            Arc::new(|args: &Map<String, Value>| {
                Ok(vec![Value::Int(args["a"].as_int().unwrap() + args["b"].as_int().unwrap())])
            }),
            Signature::new(
                vec![
                    ParamSpec::new("a", TypeAnnotation::Int),
                    ParamSpec::new("b", TypeAnnotation::Int),
                ],
                vec![ReturnSpec::new(TypeAnnotation::Int)],
            ),
            vec![Arg::from(2), Arg::from(3)],
        )?;
        rec.call(
            "succ",
            "runner_test_succ",
            Arc::new(|args: &Map<String, Value>| Ok(vec![Value::Int(args["x"].as_int().unwrap() + 1)])),
            Signature::new(
                vec![ParamSpec::new("x", TypeAnnotation::Int)],
                vec![ReturnSpec::new(TypeAnnotation::Int)],
            ),
            vec![Arg::from(outs[0])],
        )?;
        Ok(())
    }

    #[test]
    fn runs_a_compiled_pipeline_end_to_end() {
        let mut runner = AppRunner::new("arith", BackendType::Serial, BackendConfig::default(), build_add_succ);
        runner.compile().unwrap();
        let outputs = runner.run().unwrap();
        let result = outputs.get("add").expect("add is the fused sink");
        assert_eq!(result[0], Value::Int(6));
    }

    #[test]
    fn refuses_to_compile_twice() {
        let mut runner = AppRunner::new("arith", BackendType::Serial, BackendConfig::default(), build_add_succ);
        runner.compile().unwrap();
        let result = runner.compile();
        assert!(matches!(result, Err(DataflowError::InvalidState(_))));
    }

    #[test]
    fn refuses_to_run_before_compiling() {
        let runner = AppRunner::new("arith", BackendType::Serial, BackendConfig::default(), build_add_succ);
        let result = runner.run();
        assert!(matches!(result, Err(DataflowError::InvalidState(_))));
    }

    #[test]
    fn compile_captures_dot_documents() {
        let mut runner = AppRunner::new("arith", BackendType::Serial, BackendConfig::default(), build_add_succ);
        assert!(runner.dot_before().is_none());
        runner.compile().unwrap();
        assert!(runner.dot_before().unwrap().starts_with("digraph"));
        assert!(runner.dot_after().unwrap().starts_with("digraph"));
    }

    #[test]
    fn write_dot_files_writes_both_documents_to_disk() {
        let mut runner = AppRunner::new("arith", BackendType::Serial, BackendConfig::default(), build_add_succ);
        runner.compile().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (before_path, after_path) = runner.write_dot_files(dir.path()).unwrap();
        assert_eq!(before_path, dir.path().join("arith-before.dot"));
        assert_eq!(after_path, dir.path().join("arith-after.dot"));
        assert!(std::fs::read_to_string(&before_path).unwrap().starts_with("digraph"));
        assert!(std::fs::read_to_string(&after_path).unwrap().starts_with("digraph"));
    }

    #[test]
    fn write_dot_files_refuses_before_compiling() {
        let runner = AppRunner::new("arith", BackendType::Serial, BackendConfig::default(), build_add_succ);
        let dir = tempfile::tempdir().unwrap();
        let result = runner.write_dot_files(dir.path());
        assert!(matches!(result, Err(DataflowError::InvalidState(_))));
    }
}
