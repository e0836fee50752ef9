//! Black-box end-to-end tests, styled after `langgraph-core/tests/integration_tests.rs`:
//! each test only touches `dataflow_core`'s public API (no `pub(crate)` or
//! internal module paths), building and running a whole pipeline through
//! [`AppRunner`] the way a pipeline author actually would.
//!
//! These cover the two spec scenarios with no prior coverage elsewhere in
//! the crate: a fan-in (two independent producers feeding one consumer) and
//! a fan-out with a tuple return (one producer's two outputs feeding two
//! independent consumers, joined by a third).

use std::collections::HashMap;
use std::sync::Arc;

use dataflow_core::backend::{BackendConfig, BackendType};
use dataflow_core::recorder::{Arg, GraphRecorder, ParamSpec, ReturnSpec, Signature};
use dataflow_core::typesys::TypeAnnotation;
use dataflow_core::value::Value;
use dataflow_core::{AppRunner, Result};

/// Scenario 2: `sum2(inc(1), inc(2))` — two `inc` tasks run independently,
/// each feeding one parameter of a fan-in `sum2`. Three tasks, two edges,
/// one sink; `sum2(inc(1), inc(2)) == 5`.
fn build_fan_in(rec: &mut GraphRecorder) -> Result<()> {
    fn inc_body(args: &HashMap<String, Value>) -> anyhow::Result<Vec<Value>> {
        Ok(vec![Value::Int(args["n"].as_int().unwrap() + 1)])
    }

    let x = rec.call(
        "inc_x",
        "inc_x",
        Arc::new(inc_body),
        Signature::new(vec![ParamSpec::new("n", TypeAnnotation::Int)], vec![ReturnSpec::new(TypeAnnotation::Int)]),
        vec![Arg::from(1)],
    )?;
    let y = rec.call(
        "inc_y",
        "inc_y",
        Arc::new(inc_body),
        Signature::new(vec![ParamSpec::new("n", TypeAnnotation::Int)], vec![ReturnSpec::new(TypeAnnotation::Int)]),
        vec![Arg::from(2)],
    )?;
    rec.call(
        "sum2",
        "sum2",
        Arc::new(|args: &HashMap<String, Value>| {
            Ok(vec![Value::Int(args["x"].as_int().unwrap() + args["y"].as_int().unwrap())])
        }),
        Signature::new(
            vec![ParamSpec::new("x", TypeAnnotation::Int), ParamSpec::new("y", TypeAnnotation::Int)],
            vec![ReturnSpec::new(TypeAnnotation::Int)],
        ),
        vec![Arg::from(x[0]), Arg::from(y[0])],
    )?;
    Ok(())
}

#[test]
fn fan_in_joins_two_independent_producers_into_one_sink() {
    let mut runner = AppRunner::new("fan_in", BackendType::Serial, BackendConfig::default(), build_fan_in);
    let graph = runner.compile().unwrap();
    assert_eq!(graph.task_count(), 3);

    let outputs = runner.run().unwrap();
    let result = outputs.get("sum2").expect("sum2 is the only sink");
    assert_eq!(result[0], Value::Int(5));
}

/// Scenario 3: `split(s) -> (csv, csv)` feeding `join(a, b) -> csv`. Two
/// out-ports of one task wire into the two in-ports of a single downstream
/// task; the result is a file-typed value whose path ends in `.csv`.
fn build_fan_out_tuple_return(rec: &mut GraphRecorder) -> Result<()> {
    let parts = rec.call(
        "split",
        "split",
        Arc::new(|args: &HashMap<String, Value>| {
            let base = args["s"].as_str().unwrap().to_string();
            Ok(vec![
                Value::File { path: format!("{base}.a.csv"), format: "csv".to_string() },
                Value::File { path: format!("{base}.b.csv"), format: "csv".to_string() },
            ])
        }),
        Signature::new(
            vec![ParamSpec::new("s", TypeAnnotation::Str)],
            vec![
                ReturnSpec::new(TypeAnnotation::File("csv".to_string())),
                ReturnSpec::new(TypeAnnotation::File("csv".to_string())),
            ],
        ),
        vec![Arg::from("dataset")],
    )?;

    rec.call(
        "join",
        "join",
        Arc::new(|args: &HashMap<String, Value>| {
            let a = args["a"].file_path().unwrap();
            let b = args["b"].file_path().unwrap();
            Ok(vec![Value::File { path: format!("joined({a},{b}).csv"), format: "csv".to_string() }])
        }),
        Signature::new(
            vec![
                ParamSpec::new("a", TypeAnnotation::File("csv".to_string())),
                ParamSpec::new("b", TypeAnnotation::File("csv".to_string())),
            ],
            vec![ReturnSpec::new(TypeAnnotation::File("csv".to_string()))],
        ),
        vec![Arg::from(parts[0]), Arg::from(parts[1])],
    )?;
    Ok(())
}

#[test]
fn fan_out_tuple_return_wires_each_out_port_to_its_own_consumer() {
    let mut runner =
        AppRunner::new("fan_out_tuple", BackendType::Serial, BackendConfig::default(), build_fan_out_tuple_return);
    let graph = runner.compile().unwrap();
    // `split` and `join` have a 1-to-1 parent/child relationship on neither
    // side (split has two children via two distinct out-ports, so fusion
    // does not collapse this into one unit).
    assert_eq!(graph.task_count(), 2);

    let outputs = runner.run().unwrap();
    let result = outputs.get("join").expect("join is the sink");
    let path = result[0].file_path().expect("join returns a file value");
    assert!(path.ends_with(".csv"), "expected a .csv path, got {path}");
}
