use criterion::{black_box, criterion_group, criterion_main, Criterion};

use quicken::ast::{self, Lambda, Var};
use quicken::runtime::nexus::ExecMode;
use quicken::runtime::registry::{self, UserFunction};
use quicken::runtime::value::Value;

use std::sync::Arc;

fn define_fib(name: &str) -> Arc<UserFunction> {
    registry::define_recursive(name, |fib_id| {
        let n = Var::named("n");
        let a = Var::named("a");
        let b = Var::named("b");
        Lambda::new(
            vec![n.clone()],
            ast::if_(
                ast::lt(ast::var(&n), ast::const_int(2)),
                ast::atom(ast::const_int(1)),
                ast::let_(
                    &a,
                    ast::direct_call(fib_id, vec![ast::sub(ast::var(&n), ast::const_int(1))]),
                    ast::let_(
                        &b,
                        ast::direct_call(fib_id, vec![ast::sub(ast::var(&n), ast::const_int(2))]),
                        ast::atom(ast::add(ast::var(&a), ast::var(&b))),
                    ),
                ),
            ),
        )
    })
    .expect("fib lowers")
}

fn bench_fib(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib");

    let interpreted = define_fib("bench-fib-interp");
    interpreted.nexus().set_execution_mode(ExecMode::Simple);
    group.bench_function("interpreted", |b| {
        b.iter(|| {
            let result = interpreted
                .invoke(&[Value::Int(black_box(15))])
                .expect("fib evaluates");
            black_box(result)
        })
    });

    let compiled = define_fib("bench-fib-compiled");
    for _ in 0..8 {
        compiled.invoke(&[Value::Int(15)]).expect("warm-up");
    }
    compiled.nexus().force_compile().expect("fib compiles");
    group.bench_function("compiled", |b| {
        b.iter(|| {
            let result = compiled
                .invoke(&[Value::Int(black_box(15))])
                .expect("fib evaluates");
            black_box(result)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_fib);
criterion_main!(benches);
