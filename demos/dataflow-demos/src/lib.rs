//! Sample pipelines linked into the `dataflow` binary so `dataflow run` and
//! `dataflow package` have something to resolve by name. Each pipeline is
//! an ordinary build function registered with
//! `inventory::submit! { dataflow_core::AppFn { ... } }`, the CLI-facing
//! analogue of registering a task function with `TaskFn`.

use std::collections::HashMap;
use std::sync::Arc;

use dataflow_core::recorder::{Arg, GraphRecorder, ParamSpec, ReturnSpec, Signature};
use dataflow_core::typesys::TypeAnnotation;
use dataflow_core::value::Value;
use dataflow_core::{AppFn, Result};

/// `add(2, 3)` feeding into `double(x)`: a two-task linear chain the
/// fusion pass collapses into one in-process unit.
fn build_add_then_double(rec: &mut GraphRecorder) -> Result<()> {
    let sum = rec.call(
        "add",
        "demo_add",
        Arc::new(|args: &HashMap<String, Value>| {
            Ok(vec![Value::Int(args["a"].as_int().unwrap() + args["b"].as_int().unwrap())])
        }),
        Signature::new(
            vec![ParamSpec::new("a", TypeAnnotation::Int), ParamSpec::new("b", TypeAnnotation::Int)],
            vec![ReturnSpec::new(TypeAnnotation::Int)],
        ),
        vec![Arg::from(2), Arg::from(3)],
    )?;

    rec.call(
        "double",
        "demo_double",
        Arc::new(|args: &HashMap<String, Value>| Ok(vec![Value::Int(args["x"].as_int().unwrap() * 2)])),
        Signature::new(vec![ParamSpec::new("x", TypeAnnotation::Int)], vec![ReturnSpec::new(TypeAnnotation::Int)]),
        vec![Arg::from(sum[0])],
    )?;
    Ok(())
}

inventory::submit! {
    AppFn { name: "add_then_double", build: build_add_then_double }
}

// Registered under the same names `build_add_then_double`/
// `build_fan_out_squares` pass as `fn_name`, so the multiprocess and batch
// backends can look the body up by name after crossing a process boundary;
// the sequential backend never needs these, since it runs the in-process
// closure captured at recording time directly.
inventory::submit! {
    dataflow_core::task::TaskFn {
        name: "demo_add",
        run: |args| Ok(vec![Value::Int(args["a"].as_int().unwrap() + args["b"].as_int().unwrap())]),
    }
}

inventory::submit! {
    dataflow_core::task::TaskFn {
        name: "demo_double",
        run: |args| Ok(vec![Value::Int(args["x"].as_int().unwrap() * 2)]),
    }
}

/// `split(n)` fanning its two outputs into independent `square` tasks: a
/// multi-output source feeding two sinks, the shape the staging and
/// fusion passes have to treat separately from the linear case above.
fn build_fan_out_squares(rec: &mut GraphRecorder) -> Result<()> {
    let halves = rec.call(
        "split",
        "demo_split",
        Arc::new(|args: &HashMap<String, Value>| {
            let n = args["n"].as_int().unwrap();
            Ok(vec![Value::Int(n), Value::Int(n + 1)])
        }),
        Signature::new(
            vec![ParamSpec::new("n", TypeAnnotation::Int)],
            vec![ReturnSpec::new(TypeAnnotation::Int), ReturnSpec::new(TypeAnnotation::Int)],
        ),
        vec![Arg::from(4)],
    )?;

    rec.call(
        "square_left",
        "demo_square",
        Arc::new(|args: &HashMap<String, Value>| Ok(vec![Value::Int(args["x"].as_int().unwrap().pow(2))])),
        Signature::new(vec![ParamSpec::new("x", TypeAnnotation::Int)], vec![ReturnSpec::new(TypeAnnotation::Int)]),
        vec![Arg::from(halves[0])],
    )?;
    rec.call(
        "square_right",
        "demo_square",
        Arc::new(|args: &HashMap<String, Value>| Ok(vec![Value::Int(args["x"].as_int().unwrap().pow(2))])),
        Signature::new(vec![ParamSpec::new("x", TypeAnnotation::Int)], vec![ReturnSpec::new(TypeAnnotation::Int)]),
        vec![Arg::from(halves[1])],
    )?;
    Ok(())
}

inventory::submit! {
    AppFn { name: "fan_out_squares", build: build_fan_out_squares }
}

inventory::submit! {
    dataflow_core::task::TaskFn {
        name: "demo_split",
        run: |args| {
            let n = args["n"].as_int().unwrap();
            Ok(vec![Value::Int(n), Value::Int(n + 1)])
        },
    }
}

inventory::submit! {
    dataflow_core::task::TaskFn {
        name: "demo_square",
        run: |args| Ok(vec![Value::Int(args["x"].as_int().unwrap().pow(2))]),
    }
}
