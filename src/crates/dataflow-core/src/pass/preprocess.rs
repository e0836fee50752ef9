//! Structural normalization: runs first, before any type or scheduling
//! reasoning, and rejects a graph that could never execute regardless of
//! types.

use std::collections::{HashMap, HashSet};

use crate::graph::TaskGraph;
use crate::pass::{Pass, PassContext, PassResult};
use crate::task::TaskId;

/// Verifies every in-port is either immediate (bound to a literal) or fed
/// by exactly one edge, and that the graph contains no cycle.
pub struct PreProcess;

impl Pass for PreProcess {
    fn name(&self) -> &'static str {
        "preprocess"
    }

    fn run(&self, graph: &mut TaskGraph, _ctx: &mut PassContext) -> PassResult {
        let mut fed_ports: HashMap<TaskId, HashSet<String>> = HashMap::new();
        for edge in graph.edges() {
            fed_ports
                .entry(edge.dest.task)
                .or_default()
                .insert(edge.dest.port.clone());
        }

        for task in graph.tasks() {
            for (name, port) in &task.inputs {
                let fed = fed_ports
                    .get(&task.id)
                    .map(|ports| ports.contains(name))
                    .unwrap_or(false);
                if !fed && !port.is_immediate {
                    return PassResult::Error(format!(
                        "task `{}` in-port `{name}` is neither bound to a literal nor fed by an edge",
                        task.name
                    ));
                }
                if fed && port.is_immediate {
                    return PassResult::Error(format!(
                        "task `{}` in-port `{name}` is both bound to a literal and fed by an edge",
                        task.name
                    ));
                }
            }
        }

        if let Some(cycle_task) = find_cycle(graph) {
            return PassResult::Error(format!(
                "graph `{}` contains a cycle reachable from task `{cycle_task}`",
                graph.name
            ));
        }

        PassResult::Continue
    }
}

fn find_cycle(graph: &TaskGraph) -> Option<TaskId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<TaskId, Mark> = HashMap::new();

    fn visit(graph: &TaskGraph, id: TaskId, marks: &mut HashMap<TaskId, Mark>) -> bool {
        match marks.get(&id) {
            Some(Mark::Done) => return false,
            Some(Mark::Visiting) => return true,
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        for edge in graph.out_edges(id) {
            if visit(graph, edge.dest.task, marks) {
                return true;
            }
        }
        marks.insert(id, Mark::Done);
        false
    }

    for task in graph.tasks() {
        if visit(graph, task.id, &mut marks) {
            return Some(task.id);
        }
    }
    None
}
