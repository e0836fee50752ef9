//! Checks every edge's source type is castable into its destination type,
//! unifying dynamic (`any`/`anyfile`) endpoints onto their concrete partner
//! and flagging file-to-file edges that need a conversion inserted.

use crate::error::DataflowError;
use crate::graph::{resolve_port, set_port_type, TaskGraph};
use crate::pass::{Pass, PassContext, PassResult};
use crate::typesys::{is_castable, MetaType, Type};

pub struct TypeCheck;

impl Pass for TypeCheck {
    fn name(&self) -> &'static str {
        "type_check"
    }

    fn run(&self, graph: &mut TaskGraph, ctx: &mut PassContext) -> PassResult {
        let edge_ids: Vec<_> = graph.edges().map(|e| e.id).collect();
        let mut errors = Vec::new();

        for id in edge_ids {
            let edge = match graph.edge(id) {
                Ok(e) => e.clone(),
                Err(err) => return PassResult::Error(err.to_string()),
            };
            let source = match resolve_port(graph, &edge.source) {
                Ok(p) => p.clone(),
                Err(err) => return PassResult::Error(err.to_string()),
            };
            let dest = match resolve_port(graph, &edge.dest) {
                Ok(p) => p.clone(),
                Err(err) => return PassResult::Error(err.to_string()),
            };

            if !is_castable(&source.type_, &dest.type_) {
                errors.push(
                    DataflowError::TypeMismatch {
                        source_task: edge.source.task.to_string(),
                        source_port: edge.source.port.clone(),
                        source_type: source.type_.to_string(),
                        dest_task: edge.dest.task.to_string(),
                        dest_port: edge.dest.port.clone(),
                        dest_type: dest.type_.to_string(),
                    }
                    .to_string(),
                );
                continue;
            }

            // "Both endpoints are file types" (spec §4.4) includes the
            // dynamic `anyfile` tag, which is file-shaped but carries no
            // concrete format yet; a bare `any` endpoint never triggers
            // unification or a transform since it isn't in the file domain.
            if is_file_like(&source.type_) && is_file_like(&dest.type_) {
                let source_dynamic = is_anyfile(&source.type_);
                let dest_dynamic = is_anyfile(&dest.type_);
                if source_dynamic == dest_dynamic {
                    // Both concrete or both still `anyfile`: a differing
                    // concrete id needs a conversion task; two dynamic
                    // endpoints, or two equal concrete ids, stay as a
                    // direct, unconverted edge.
                    if !source_dynamic && source.type_.id != dest.type_.id {
                        if let Err(err) = mark_needs_transform(graph, edge.id) {
                            return PassResult::Error(err.to_string());
                        }
                    }
                } else {
                    // Exactly one endpoint is `anyfile`: unify both to the
                    // concrete id, mutating in place so later passes (and
                    // the dot renderer) see the resolved type.
                    let concrete = if source_dynamic { dest.type_.clone() } else { source.type_.clone() };
                    if let Err(err) = set_port_type(graph, &edge.source, concrete.clone()) {
                        return PassResult::Error(err.to_string());
                    }
                    if let Err(err) = set_port_type(graph, &edge.dest, concrete) {
                        return PassResult::Error(err.to_string());
                    }
                }
            }
        }

        if !errors.is_empty() {
            return PassResult::Error(errors.join("; "));
        }
        ctx.set("type_check_ran", crate::value::Value::Bool(true));
        PassResult::Continue
    }
}

fn mark_needs_transform(graph: &mut TaskGraph, edge_id: uuid::Uuid) -> crate::error::Result<()> {
    for edge in graph.edges_mut() {
        if edge.id == edge_id {
            edge.needs_transform = true;
        }
    }
    Ok(())
}

/// A concrete file type or the dynamic `anyfile` tag; excludes the
/// builtin-scalar dynamic `any`, which never takes part in file unification.
fn is_file_like(ty: &Type) -> bool {
    ty.is_file() || is_anyfile(ty)
}

fn is_anyfile(ty: &Type) -> bool {
    matches!(ty.meta, MetaType::Dynamic) && ty.id == "anyfile"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskGraph;
    use crate::recorder::{app, Arg, ParamSpec, ReturnSpec, Signature};
    use crate::typesys::TypeAnnotation;
    use crate::value::Value;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn noop_body() -> Arc<crate::task::TaskBody> {
        Arc::new(|_: &HashMap<String, Value>| Ok(vec![Value::Bool(true)]))
    }

    /// Wires one source task returning `source_ty` into one destination
    /// task taking a single `dest_ty` parameter, and returns the compiled
    /// graph plus the id of the edge between them.
    fn wire(source_ty: TypeAnnotation, dest_ty: TypeAnnotation) -> (TaskGraph, uuid::Uuid) {
        let graph = app("wiring", |rec| {
            let outs = rec.call(
                "source",
                "tc_source",
                noop_body(),
                Signature::new(vec![], vec![ReturnSpec::new(source_ty.clone())]),
                vec![],
            )?;
            rec.call(
                "dest",
                "tc_dest",
                noop_body(),
                Signature::new(vec![ParamSpec::new("in", dest_ty.clone())], vec![]),
                vec![Arg::from(outs[0])],
            )?;
            Ok(())
        })
        .unwrap();
        let edge_id = graph.edges().next().unwrap().id;
        (graph, edge_id)
    }

    #[test]
    fn unifies_anyfile_destination_onto_the_concrete_source() {
        let (mut graph, edge_id) = wire(TypeAnnotation::File("csv".into()), TypeAnnotation::AnyFile);
        let result = TypeCheck.run(&mut graph, &mut PassContext::default());
        assert!(matches!(result, PassResult::Continue));
        let edge = graph.edge(edge_id).unwrap().clone();
        let dest = resolve_port(&graph, &edge.dest).unwrap();
        assert_eq!(dest.type_.id, "csv");
    }

    #[test]
    fn flags_needs_transform_between_differing_concrete_file_types() {
        let (mut graph, edge_id) = wire(TypeAnnotation::File("csv".into()), TypeAnnotation::File("xls".into()));
        let result = TypeCheck.run(&mut graph, &mut PassContext::default());
        assert!(matches!(result, PassResult::Continue));
        assert!(graph.edge(edge_id).unwrap().needs_transform);
    }

    #[test]
    fn leaves_matching_concrete_file_types_alone() {
        let (mut graph, edge_id) = wire(TypeAnnotation::File("csv".into()), TypeAnnotation::File("csv".into()));
        let result = TypeCheck.run(&mut graph, &mut PassContext::default());
        assert!(matches!(result, PassResult::Continue));
        assert!(!graph.edge(edge_id).unwrap().needs_transform);
    }

    #[test]
    fn does_not_unify_a_builtin_any_endpoint() {
        // `csv -> any` is not castable: `any` only widens from builtins.
        let (mut graph, _) = wire(TypeAnnotation::File("csv".into()), TypeAnnotation::Any);
        let result = TypeCheck.run(&mut graph, &mut PassContext::default());
        assert!(matches!(result, PassResult::Error(_)));
    }

    #[test]
    fn collects_every_mismatch_before_reporting() {
        let mut graph = app("double_mismatch", |rec| {
            let outs1 = rec.call(
                "str_source",
                "tc_str_source",
                noop_body(),
                Signature::new(vec![], vec![ReturnSpec::new(TypeAnnotation::Str)]),
                vec![],
            )?;
            rec.call(
                "csv_sink",
                "tc_csv_sink",
                noop_body(),
                Signature::new(vec![ParamSpec::new("in", TypeAnnotation::File("csv".into()))], vec![]),
                vec![Arg::from(outs1[0])],
            )?;
            let outs2 = rec.call(
                "bool_source",
                "tc_bool_source",
                noop_body(),
                Signature::new(vec![], vec![ReturnSpec::new(TypeAnnotation::Bool)]),
                vec![],
            )?;
            rec.call(
                "dict_sink",
                "tc_dict_sink",
                noop_body(),
                Signature::new(vec![ParamSpec::new("in", TypeAnnotation::Dict)], vec![]),
                vec![Arg::from(outs2[0])],
            )?;
            Ok(())
        })
        .unwrap();

        let result = TypeCheck.run(&mut graph, &mut PassContext::default());
        match result {
            PassResult::Error(message) => {
                assert!(message.contains(';'), "expected multiple joined errors, got: {message}");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }
}
