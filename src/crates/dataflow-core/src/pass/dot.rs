//! Renders the graph to Graphviz DOT, once before [`super::transform::Transform`]/
//! [`super::stage::Stage`]/[`super::fusion::Fusion`] run and once after, so a
//! developer can diff what the compiler changed.

use std::fmt::Write as _;

use crate::graph::TaskGraph;
use crate::pass::{Pass, PassContext, PassResult};
use crate::task::TaskKind;

/// Which of the two fixed points in the pipeline this instance renders.
#[derive(Clone, Copy, PartialEq, Eq)]
enum When {
    Before,
    After,
}

pub struct DotGraphGenerator {
    when: When,
}

impl DotGraphGenerator {
    pub fn before() -> Self {
        DotGraphGenerator { when: When::Before }
    }

    pub fn after() -> Self {
        DotGraphGenerator { when: When::After }
    }
}

impl Pass for DotGraphGenerator {
    fn name(&self) -> &'static str {
        match self.when {
            When::Before => "dot_before",
            When::After => "dot_after",
        }
    }

    fn run(&self, graph: &mut TaskGraph, ctx: &mut PassContext) -> PassResult {
        let tag = match self.when {
            When::Before => "before",
            When::After => "after",
        };
        let dot = render_dot(graph);
        let key = format!("dot_{tag}");
        ctx.properties.insert(
            key,
            crate::value::Value::Str(dot),
        );
        PassResult::Continue
    }
}

/// Builds a `digraph { ... }` document. Node style mirrors the original
/// renderer: a double border marks a source, an orange fill marks a sink,
/// and a dashed red box marks a node the compiler itself inserted
/// (staging or transform). A [`TaskKind::Fused`] task is drawn as a
/// `subgraph cluster<N>` containing one node per chain member plus the
/// edges between them, per `original_source/dot.py`'s cluster-writing pass:
/// fusion collapses execution, not the picture a developer diffs.
pub fn render_dot(graph: &TaskGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", graph.name);
    let _ = writeln!(out, "  node [style=filled, fillcolor=lightcyan];");

    let mut tasks: Vec<_> = graph.tasks().collect();
    tasks.sort_by(|a, b| a.name.cmp(&b.name));

    let mut cluster_idx = 0;
    for task in &tasks {
        if task.is_fusee.load(std::sync::atomic::Ordering::SeqCst) {
            // Rendered inside its FusedTask's cluster below, not as a
            // top-level node.
            continue;
        }
        match &task.kind {
            TaskKind::Fused { members, .. } => {
                let _ = writeln!(out, "  subgraph cluster{cluster_idx} {{");
                let _ = writeln!(out, "    label=\"{}\";", task.name);
                let _ = writeln!(out, "    style=dashed;");
                for member_id in members {
                    if let Ok(member) = graph.task(*member_id) {
                        write_node(&mut out, graph, member, "    ");
                    }
                }
                for edge in graph.edges() {
                    if members.contains(&edge.source.task) && members.contains(&edge.dest.task) {
                        let label = if edge.needs_transform { " [style=dashed]" } else { "" };
                        let _ = writeln!(
                            out,
                            "    \"{}\" -> \"{}\"{label};",
                            edge.source.task, edge.dest.task
                        );
                    }
                }
                let _ = writeln!(out, "  }}");
                cluster_idx += 1;
            }
            TaskKind::Plain => write_node(&mut out, graph, task, "  "),
        }
    }

    let mut edges: Vec<_> = graph.edges().collect();
    edges.sort_by(|a, b| (a.source.task, a.dest.task).cmp(&(b.source.task, b.dest.task)));
    for edge in edges {
        let source_fused = graph.resolve(edge.source.task);
        let dest_fused = graph.resolve(edge.dest.task);
        if source_fused == dest_fused {
            // Internal to a fused task's cluster; already drawn above using
            // the member's own (unresolved) id as the cluster node id.
            continue;
        }
        let label = if edge.needs_transform { " [style=dashed]" } else { "" };
        let _ = writeln!(out, "  \"{}\" -> \"{}\"{label};", edge.source.task, edge.dest.task);
    }

    let _ = writeln!(out, "}}");
    out
}

/// Emits one node line for `task`, styled by its source/sink/staging/
/// transform flags. Used both for ordinary top-level nodes and for the
/// individual members inside a fused task's cluster.
fn write_node(out: &mut String, graph: &TaskGraph, task: &crate::task::Task, indent: &str) {
    let is_source = graph.is_source(task.id);
    let is_sink = task.is_sink.load(std::sync::atomic::Ordering::SeqCst);
    let mut attrs = Vec::new();
    if is_source {
        attrs.push("peripheries=2".to_string());
    }
    if is_sink {
        attrs.push("fillcolor=orange".to_string());
    }
    if task.is_staging || task.is_transform {
        attrs.push("shape=box".to_string());
        attrs.push("fillcolor=red".to_string());
        attrs.push("style=\"filled,dashed\"".to_string());
    }
    attrs.push(format!("label=\"{}\"", task.name));
    let attr_str = format!(" [{}]", attrs.join(", "));
    let _ = writeln!(out, "{indent}\"{}\"{attr_str};", task.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{app, Arg, ParamSpec, ReturnSpec, Signature};
    use crate::typesys::TypeAnnotation;
    use std::sync::Arc;

    #[test]
    fn renders_a_single_task_graph() {
        let graph = app("dot_demo", |rec| {
            rec.call(
                "add",
                "add",
                Arc::new(|args: &std::collections::HashMap<String, crate::value::Value>| {
                    Ok(vec![crate::value::Value::Int(
                        args["a"].as_int().unwrap() + args["b"].as_int().unwrap(),
                    )])
                }),
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

        let dot = render_dot(&graph);
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("peripheries=2"));
    }

    #[test]
    fn renders_a_fused_chain_as_a_subgraph_cluster() {
        use crate::pass::fusion::Fusion;
        use crate::pass::{Pass, PassContext};
        use std::collections::HashMap as Map;

        fn passthrough() -> Arc<crate::task::TaskBody> {
            Arc::new(|args: &Map<String, crate::value::Value>| Ok(vec![args["x"].clone()]))
        }

        let mut graph = app("fused_demo", |rec| {
            let a = rec.call(
                "a",
                "a",
                passthrough(),
                Signature::new(
                    vec![ParamSpec::new("x", TypeAnnotation::Int)],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(1)],
            )?;
            let b = rec.call(
                "b",
                "b",
                passthrough(),
                Signature::new(
                    vec![ParamSpec::new("x", TypeAnnotation::Int)],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(a[0])],
            )?;
            rec.call(
                "c",
                "c",
                passthrough(),
                Signature::new(
                    vec![ParamSpec::new("x", TypeAnnotation::Int)],
                    vec![ReturnSpec::new(TypeAnnotation::Int)],
                ),
                vec![Arg::from(b[0])],
            )?;
            Ok(())
        })
        .unwrap();

        let mut ctx = PassContext::new();
        assert_eq!(Fusion.run(&mut graph, &mut ctx), PassResult::Continue);

        let dot = render_dot(&graph);
        assert!(dot.contains("subgraph cluster0"));
        // All three original task ids still appear as nodes inside the
        // cluster, and the internal chain edges are drawn between them.
        let a_id = graph.tasks().find(|t| t.name == "a").unwrap().id;
        let b_id = graph.tasks().find(|t| t.name == "b").unwrap().id;
        let c_id = graph.tasks().find(|t| t.name == "c").unwrap().id;
        assert!(dot.contains(&format!("\"{a_id}\" -> \"{b_id}\"")));
        assert!(dot.contains(&format!("\"{b_id}\" -> \"{c_id}\"")));
    }
}
