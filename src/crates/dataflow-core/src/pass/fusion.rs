//! Collapses linear chains of single-parent/single-child tasks into one
//! [`crate::task::TaskKind::Fused`] task that runs in-process, avoiding the
//! IPC or process-spawn overhead a backend would otherwise pay for every
//! edge in the chain.
//!
//! A task is *fusable* into its predecessor when it has exactly one
//! incoming edge and that edge's source has exactly one outgoing edge (a
//! 1-to-1 link with nothing branching on either side). The pass walks the
//! graph depth-first from each source, growing the current chain while
//! successors stay fusable and starting a new chain the moment they don't.
//! Chains of length one (a task with no fusable neighbor at all) are left
//! alone; fusion never crosses a staging or transform boundary, since both
//! represent a task the pass manager itself inserted to satisfy a
//! different concern and whose output the downstream task depends on
//! being a distinct addressable node (staging file paths, transform
//! output file paths) rather than an opaque in-process call.

use std::collections::HashSet;

use crate::graph::TaskGraph;
use crate::pass::{Pass, PassContext, PassResult};
use crate::task::{TaskId, TaskKind};

pub struct Fusion;

impl Pass for Fusion {
    fn name(&self) -> &'static str {
        "fusion"
    }

    fn run(&self, graph: &mut TaskGraph, ctx: &mut PassContext) -> PassResult {
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut chains: Vec<Vec<TaskId>> = Vec::new();

        let roots: Vec<TaskId> = graph.tasks().map(|t| t.id).collect();
        for root in roots {
            if visited.contains(&root) {
                continue;
            }
            let mut chain = Vec::new();
            dfs(graph, root, &mut chain, &mut visited);
            if !chain.is_empty() {
                chains.push(chain);
            }
        }

        let mut fused_count = 0;
        for chain in chains {
            if chain.len() < 2 {
                continue;
            }
            fuse_chain(graph, &chain);
            fused_count += 1;
        }

        if fused_count > 0 {
            tracing::debug!(fused_count, "fusion pass collapsed linear chains");
        }
        PassResult::Continue
    }
}

/// Extends `chain` with `node` and, while the single-successor-with-a-
/// single-fusable-predecessor property holds, its descendants; marks every
/// node it visits (fused or not) so the outer loop does not re-walk it as
/// a separate root.
fn dfs(graph: &TaskGraph, node: TaskId, chain: &mut Vec<TaskId>, visited: &mut HashSet<TaskId>) {
    if visited.contains(&node) {
        return;
    }
    visited.insert(node);

    let task = match graph.task(node) {
        Ok(t) => t,
        Err(_) => return,
    };
    let boundary = task.is_staging || task.is_transform;
    chain.push(node);

    let out_edges = graph.out_edges(node);
    if boundary || out_edges.len() != 1 {
        // A fan-out, a dead end, or a pass-inserted boundary node ends this
        // chain; any downstream task still gets walked as its own root by
        // the caller once we return.
        return;
    }
    let next = out_edges[0].dest.task;
    let next_task = match graph.task(next) {
        Ok(t) => t,
        Err(_) => return,
    };
    let next_in_edges = graph.in_edges(next);
    let next_is_boundary = next_task.is_staging || next_task.is_transform;
    if next_in_edges.len() == 1 && !next_is_boundary {
        dfs(graph, next, chain, visited);
    }
}

fn fuse_chain(graph: &mut TaskGraph, chain: &[TaskId]) {
    let head = chain[0];
    let tail = *chain.last().unwrap();

    // `head` keeps its original key in the task arena and becomes the
    // fused task in place; every other member maps onto it through
    // `fusee_map` so existing edges and lookups by their old id still
    // resolve.
    for &member in chain {
        graph.record_fusion(member, head);
        if member != head {
            if let Ok(task) = graph.task(member) {
                task.is_fusee.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    // The internal edges of the chain (head->...->tail) now resolve
    // in-process inside the fused task's combined body; only the head's
    // original in-ports and the tail's original out-ports remain visible
    // to the rest of the graph. The actual inputs/outputs/body composition
    // used at execution time is built lazily by the backend from
    // `TaskKind::Fused::members`, since it needs owned access to each
    // member task that the compiler's borrow of `graph` here cannot grant
    // without cloning every member out of the arena.
    if let Ok(head_task) = graph.task_mut(head) {
        head_task.kind = TaskKind::Fused {
            members: chain.to_vec(),
            head,
            tail,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskGraph;
    use crate::pass::{Pass, PassContext};
    use crate::recorder::{Arg, GraphRecorder, ParamSpec, ReturnSpec, Signature};
    use crate::typesys::TypeAnnotation;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn passthrough() -> Arc<crate::task::TaskBody> {
        Arc::new(|args: &HashMap<String, crate::value::Value>| Ok(vec![args["x"].clone()]))
    }

    fn build_linear_chain() -> TaskGraph {
        let mut rec = GraphRecorder::new("chain");
        let a = rec
            .call(
                "a",
                "a",
                passthrough(),
                Signature::new(
                    vec![ParamSpec::new("x", TypeAnnotation::Int)],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(1)],
            )
            .unwrap();
        let b = rec
            .call(
                "b",
                "b",
                passthrough(),
                Signature::new(
                    vec![ParamSpec::new("x", TypeAnnotation::Int)],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(a[0])],
            )
            .unwrap();
        rec.call(
            "c",
            "c",
            passthrough(),
            Signature::new(
                vec![ParamSpec::new("x", TypeAnnotation::Int)],
                vec![ReturnSpec::new(TypeAnnotation::Int)],
            ),
            vec![Arg::from(b[0])],
        )
        .unwrap();
        rec.finish()
    }

    #[test]
    fn fuses_a_three_task_linear_chain() {
        let mut graph = build_linear_chain();
        let mut ctx = PassContext::new();
        assert_eq!(Fusion.run(&mut graph, &mut ctx), PassResult::Continue);

        let fused_heads: Vec<_> = graph
            .tasks()
            .filter(|t| matches!(t.kind, TaskKind::Fused { .. }))
            .collect();
        assert_eq!(fused_heads.len(), 1);
        if let TaskKind::Fused { members, .. } = &fused_heads[0].kind {
            assert_eq!(members.len(), 3);
        }
    }
}
