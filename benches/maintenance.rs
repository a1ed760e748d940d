//! Benchmarks for incremental maintenance

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use cwm_incremental::{CwmConfig, IncrementalEngine, Strategy, Triple};

fn engine(strategy: Strategy, rules: &[(usize, String)], facts: &[String]) -> IncrementalEngine {
    let mut config = CwmConfig::default();
    config.maintenance.strategy = strategy;
    let mut engine = IncrementalEngine::new(config);
    for (level, rule) in rules {
        engine.add_rule_str(rule, *level).unwrap();
    }
    for fact in facts {
        let triple = engine.parse_triple(fact).unwrap();
        engine.add_fact(triple);
    }
    engine.materialize().unwrap();
    engine
}

/// `P0 -> P1 -> ... -> Pn` over `width` individuals, one level per class
fn chain(length: usize, width: usize) -> (Vec<(usize, String)>, Vec<String>) {
    let rules = (1..=length)
        .map(|i| (i, format!("?x a P{} :- ?x a P{}", i, i - 1)))
        .collect();
    let facts = (0..width).map(|x| format!("i{} a P0", x)).collect();
    (rules, facts)
}

/// Transitive closure of a path `n0 -> n1 -> ... -> n(length)`
fn path(length: usize) -> (Vec<(usize, String)>, Vec<String>) {
    let rules = vec![
        (1, "?x reach ?y :- ?x edge ?y".to_string()),
        (1, "?x reach ?z :- ?x reach ?y , ?y edge ?z".to_string()),
    ];
    let facts = (0..length).map(|i| format!("n{} edge n{}", i, i + 1)).collect();
    (rules, facts)
}

fn bench_deletion(
    c: &mut Criterion,
    group_name: &str,
    program: (Vec<(usize, String)>, Vec<String>),
    retract: &str,
) {
    let (rules, facts) = program;
    let mut group = c.benchmark_group(group_name);
    group.sample_size(20);

    for strategy in [Strategy::Dred, Strategy::Fbf] {
        group.bench_with_input(BenchmarkId::new(strategy.as_str(), facts.len()), &strategy, |b, &strategy| {
            b.iter_batched(
                || {
                    let mut engine = engine(strategy, &rules, &facts);
                    let retraction: Triple = engine.parse_triple(retract).unwrap();
                    (engine, retraction)
                },
                |(mut engine, retraction)| black_box(engine.apply_changes(&[retraction], &[], None).unwrap()),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn chain_deletion_benchmark(c: &mut Criterion) {
    bench_deletion(c, "chain_deletion", chain(8, 200), "i0 a P0");
}

fn closure_deletion_benchmark(c: &mut Criterion) {
    bench_deletion(c, "closure_deletion", path(40), "n20 edge n21");
}

fn insertion_benchmark(c: &mut Criterion) {
    let (rules, facts) = path(40);
    c.bench_function("closure_insertion", |b| {
        b.iter_batched(
            || {
                let mut engine = engine(Strategy::Fbf, &rules, &facts);
                let assertion = engine.parse_triple("n40 edge n0").unwrap();
                (engine, assertion)
            },
            |(mut engine, assertion)| black_box(engine.apply_changes(&[], &[assertion], None).unwrap()),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    chain_deletion_benchmark,
    closure_deletion_benchmark,
    insertion_benchmark,
);

criterion_main!(benches);
