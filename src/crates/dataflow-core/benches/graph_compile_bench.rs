use std::collections::HashMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use dataflow_core::pass::PassManager;
use dataflow_core::recorder::{app, Arg, ParamSpec, ReturnSpec, Signature};
use dataflow_core::typesys::TypeAnnotation;
use dataflow_core::value::Value;

fn record_chain(len: usize) -> dataflow_core::TaskGraph {
    app("bench_chain", |rec| {
        let incr = Arc::new(|args: &HashMap<String, Value>| {
            Ok(vec![Value::Int(args["x"].as_int().unwrap() + 1)])
        });
        let sig = Signature::new(
            vec![ParamSpec::new("x", TypeAnnotation::Int)],
            vec![ReturnSpec::new(TypeAnnotation::Int)],
        );

        let mut out = rec.call("step0", "bench_incr", incr.clone(), sig.clone(), vec![Arg::from(0)])?[0];
        for i in 1..len {
            let name = format!("step{i}");
            out = rec.call(&name, "bench_incr", incr.clone(), sig.clone(), vec![Arg::from(out)])?[0];
        }
        Ok(())
    })
    .unwrap()
}

fn record_chain_benchmark(c: &mut Criterion) {
    c.bench_function("record 50-task chain", |b| {
        b.iter(|| black_box(record_chain(50)));
    });
}

fn compile_chain_benchmark(c: &mut Criterion) {
    c.bench_function("compile 50-task chain", |b| {
        b.iter_batched(
            || record_chain(50),
            |mut graph| {
                PassManager::standard().run(&mut graph).unwrap();
                black_box(graph);
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, record_chain_benchmark, compile_chain_benchmark);
criterion_main!(benches);
