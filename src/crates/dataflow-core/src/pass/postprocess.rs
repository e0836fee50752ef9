//! Final consistency pass: re-derives every task's sink/source flags and
//! latch counts now that Transform, Stage, and Fusion have all had a
//! chance to add tasks and rewrite edges, and confirms the result is still
//! a graph a backend can actually run.

use crate::graph::TaskGraph;
use crate::pass::{Pass, PassContext, PassResult};

pub struct PostProcess;

impl Pass for PostProcess {
    fn name(&self) -> &'static str {
        "postprocess"
    }

    fn run(&self, graph: &mut TaskGraph, _ctx: &mut PassContext) -> PassResult {
        let non_fusee_with_edges: std::collections::HashSet<_> = graph
            .edges()
            .map(|e| graph.resolve(e.dest.task))
            .collect();

        for task in graph.tasks() {
            if task.is_fusee.load(std::sync::atomic::Ordering::SeqCst) {
                continue;
            }
            task.recompute_latch();
            let has_consumer = graph
                .out_edges(task.id)
                .into_iter()
                .any(|e| graph.resolve(e.dest.task) != task.id);
            task.is_sink
                .store(!has_consumer, std::sync::atomic::Ordering::SeqCst);
        }

        let runnable_count = graph
            .tasks()
            .filter(|t| !t.is_fusee.load(std::sync::atomic::Ordering::SeqCst))
            .count();
        graph.set_num_tasks(runnable_count);

        if runnable_count == 0 {
            return PassResult::Error("graph has no runnable tasks after compilation".to_string());
        }

        // Every destination referenced by a surviving edge must resolve to
        // a task that is actually still in the graph.
        for dest in non_fusee_with_edges {
            if graph.task(dest).is_err() {
                return PassResult::Error(format!(
                    "edge destination `{dest}` does not resolve to a task in the compiled graph"
                ));
            }
        }

        PassResult::Continue
    }
}
