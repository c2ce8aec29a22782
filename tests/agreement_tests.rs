//! Cross-tier agreement: the simple interpreter, the profiling
//! interpreter, the compiled generic routine, and the compiled specialized
//! routine must produce the same values, and raise the same kinds of
//! runtime errors, for the same programs and inputs.

use quicken::ast::{self, Lambda, Var};
use quicken::error::{Error, RuntimeError};
use quicken::runtime::nexus::ExecMode;
use quicken::runtime::registry;
use quicken::runtime::value::Value;

use std::mem::discriminant;
use std::sync::Arc;

/// Normalized outcome for comparison across tiers: values compare by
/// content, runtime errors by kind.
#[derive(Debug)]
enum Outcome {
    Value(Value),
    ErrorKind(&'static str, RuntimeError),
}

impl PartialEq for Outcome {
    fn eq(&self, other: &Outcome) -> bool {
        match (self, other) {
            (Outcome::Value(a), Outcome::Value(b)) => a == b,
            (Outcome::ErrorKind(_, a), Outcome::ErrorKind(_, b)) => {
                discriminant(a) == discriminant(b)
            }
            _ => false,
        }
    }
}

fn outcome(result: Result<Value, Error>) -> Outcome {
    match result {
        Ok(value) => Outcome::Value(value),
        Err(Error::Runtime(e)) => Outcome::ErrorKind("runtime", e),
        Err(Error::Compiler(e)) => panic!("compiler fault during agreement run: {}", e),
    }
}

/// Runs the same program through all four tiers and checks agreement on
/// every input. Training inputs warm the profile before compilation.
fn assert_agreement(
    name: &str,
    make: impl Fn() -> Arc<Lambda>,
    train: &[Vec<Value>],
    inputs: &[Vec<Value>],
) {
    let simple = registry::define_function(&format!("{}-simple", name), &make()).unwrap();
    simple.nexus().set_execution_mode(ExecMode::Simple);

    let profiled = registry::define_function(&format!("{}-profiled", name), &make()).unwrap();

    let compiled = registry::define_function(&format!("{}-compiled", name), &make()).unwrap();
    for args in train {
        let _ = compiled.invoke(args);
    }
    compiled.nexus().force_compile().unwrap();
    let specialized = compiled
        .nexus()
        .compiled_code()
        .unwrap()
        .specialized
        .is_some();

    for args in inputs {
        let oracle = outcome(simple.invoke(args));
        let from_profiled = outcome(profiled.invoke(args));
        assert_eq!(
            oracle, from_profiled,
            "{}: profiling interpreter disagrees on {:?}",
            name, args
        );
        let from_generic = outcome(compiled.nexus().invoke_generic(args));
        assert_eq!(
            oracle, from_generic,
            "{}: generic routine disagrees on {:?}",
            name, args
        );
        if specialized {
            // Tier selection takes the specialized routine when the
            // argument categories fit and falls back to generic otherwise;
            // either way the answer must match.
            let from_best = outcome(compiled.invoke(args));
            assert_eq!(
                oracle, from_best,
                "{}: specialized dispatch disagrees on {:?}",
                name, args
            );
        }
    }
}

fn ints(values: &[i64]) -> Vec<Vec<Value>> {
    values.iter().map(|n| vec![Value::Int(*n)]).collect()
}

#[test]
fn arithmetic_and_lets_agree() {
    // f(x) = let y = x + 1 in let z = y * y in z - x
    let make = || {
        let x = Var::named("x");
        let y = Var::named("y");
        let z = Var::named("z");
        Lambda::new(
            vec![x.clone()],
            ast::let_(
                &y,
                ast::atom(ast::add(ast::var(&x), ast::const_int(1))),
                ast::let_(
                    &z,
                    ast::atom(ast::mul(ast::var(&y), ast::var(&y))),
                    ast::atom(ast::sub(ast::var(&z), ast::var(&x))),
                ),
            ),
        )
    };
    let train = ints(&[0, 1, 2, 3, 4, 5, 6, 7]);
    let inputs = ints(&[-3, 0, 1, 10, 1000]);
    assert_agreement("arith", make, &train, &inputs);
}

#[test]
fn branches_and_comparisons_agree() {
    // f(x) = if x < 0 then negate(x) else if x > 100 then 100 else x
    let make = || {
        let x = Var::named("x");
        Lambda::new(
            vec![x.clone()],
            ast::if_(
                ast::lt(ast::var(&x), ast::const_int(0)),
                ast::atom(ast::negate(ast::var(&x))),
                ast::if_(
                    ast::gt(ast::var(&x), ast::const_int(100)),
                    ast::atom(ast::const_int(100)),
                    ast::atom(ast::var(&x)),
                ),
            ),
        )
    };
    let train = ints(&[-5, -1, 0, 50, 99, 150]);
    let inputs = ints(&[-10, -1, 0, 100, 101, 7]);
    assert_agreement("clamp", make, &train, &inputs);
}

#[test]
fn closure_capture_agrees() {
    // f(n, x) = let add = λy. y + n in add(x)
    let make = || {
        let n = Var::named("n");
        let x = Var::named("x");
        let add = Var::named("add");
        let y = Var::named("y");
        Lambda::new(
            vec![n.clone(), x.clone()],
            ast::let_(
                &add,
                ast::atom(ast::lambda(
                    vec![y.clone()],
                    ast::atom(ast::add(ast::var(&y), ast::var(&n))),
                )),
                ast::call(ast::var(&add), vec![ast::var(&x)]),
            ),
        )
    };
    let train: Vec<Vec<Value>> = (0..8).map(|i| vec![Value::Int(i), Value::Int(i)]).collect();
    let inputs: Vec<Vec<Value>> = [(1, 2), (0, 0), (40, 2), (-7, 7)]
        .iter()
        .map(|(a, b)| vec![Value::Int(*a), Value::Int(*b)])
        .collect();
    assert_agreement("capture", make, &train, &inputs);
}

#[test]
fn mutation_and_blocks_agree() {
    // f(x) = let y = x in { set!(y, y + 1); set!(y, y + 1); y }
    let make = || {
        let x = Var::named("x");
        let y = Var::named("y");
        Lambda::new(
            vec![x.clone()],
            ast::let_(
                &y,
                ast::atom(ast::var(&x)),
                ast::block(vec![
                    ast::set(&y, ast::add(ast::var(&y), ast::const_int(1))),
                    ast::set(&y, ast::add(ast::var(&y), ast::const_int(1))),
                    ast::atom(ast::var(&y)),
                ]),
            ),
        )
    };
    let train = ints(&[1, 2, 3, 4]);
    let inputs = ints(&[0, 5, -2]);
    assert_agreement("mutate", make, &train, &inputs);
}

#[test]
fn early_returns_agree() {
    // f(x) = { if x < 0 then return 0 else null; x * 2 }
    let make = || {
        let x = Var::named("x");
        Lambda::new(
            vec![x.clone()],
            ast::block(vec![
                ast::if_(
                    ast::lt(ast::var(&x), ast::const_int(0)),
                    ast::ret(ast::const_int(0)),
                    ast::atom(ast::null()),
                ),
                ast::atom(ast::mul(ast::var(&x), ast::const_int(2))),
            ]),
        )
    };
    let train = ints(&[-2, -1, 1, 2, 3]);
    let inputs = ints(&[-100, -1, 0, 21]);
    assert_agreement("early-return", make, &train, &inputs);
}

#[test]
fn runtime_error_kinds_agree() {
    // f(x) = x + 1, fed a string: every tier reports integer-expected.
    let make = || {
        let x = Var::named("x");
        Lambda::new(
            vec![x.clone()],
            ast::atom(ast::add(ast::var(&x), ast::const_int(1))),
        )
    };
    let train = ints(&[1, 2, 3]);
    let inputs = vec![vec![Value::Str("three".into())]];
    assert_agreement("add-error", make, &train, &inputs);

    // f(c) = if c then 1 else 2, fed an int: condition-not-boolean.
    let make = || {
        let c = Var::named("c");
        Lambda::new(
            vec![c.clone()],
            ast::if_(
                ast::var(&c),
                ast::atom(ast::const_int(1)),
                ast::atom(ast::const_int(2)),
            ),
        )
    };
    let train = vec![vec![Value::Bool(true)], vec![Value::Bool(false)]];
    let inputs = vec![vec![Value::Int(3)]];
    assert_agreement("cond-error", make, &train, &inputs);
}

#[test]
fn deopt_completeness_matches_generic() {
    // Same shape as the set! deopt scenario; the specialized result after
    // a square peg equals what the generic form computes.
    let make = || {
        let x = Var::named("x");
        let flag = Var::named("flag");
        let y = Var::named("y");
        Lambda::new(
            vec![x.clone(), flag.clone()],
            ast::let_(
                &y,
                ast::atom(ast::add(ast::var(&x), ast::const_int(1))),
                ast::block(vec![
                    ast::if_(
                        ast::var(&flag),
                        ast::set(&y, ast::const_str("oops")),
                        ast::atom(ast::null()),
                    ),
                    ast::atom(ast::var(&y)),
                ]),
            ),
        )
    };
    let f = registry::define_function("deopt-complete", &make()).unwrap();
    for i in 0..150 {
        f.invoke(&[Value::Int(i), Value::Bool(false)]).unwrap();
    }
    let nexus = f.nexus();
    assert!(nexus.compiled_code().unwrap().specialized.is_some());

    let deopt_args = [Value::Int(5), Value::Bool(true)];
    let specialized = nexus.invoke_specialized(&deopt_args).unwrap();
    let generic = nexus.invoke_generic(&deopt_args).unwrap();
    assert_eq!(specialized, generic);
    assert_eq!(specialized, Value::Str("oops".into()));
}

#[test]
fn recompilation_is_idempotent() {
    let make = || {
        let x = Var::named("x");
        Lambda::new(
            vec![x.clone()],
            ast::atom(ast::mul(ast::var(&x), ast::var(&x))),
        )
    };
    let f = registry::define_function("recompile", &make()).unwrap();
    for i in 0..10 {
        f.invoke(&[Value::Int(i)]).unwrap();
    }
    f.nexus().force_compile().unwrap();
    let first: Vec<Value> = (0..5)
        .map(|i| f.invoke(&[Value::Int(i)]).unwrap())
        .collect();

    let generation_before = f.nexus().generation();
    f.nexus().force_compile().unwrap();
    assert!(f.nexus().generation() > generation_before);
    let second: Vec<Value> = (0..5)
        .map(|i| f.invoke(&[Value::Int(i)]).unwrap())
        .collect();
    assert_eq!(first, second);
}

#[test]
fn function_references_are_first_class() {
    use quicken::ast::Atomic;

    let x = Var::named("x");
    let double = registry::define_function(
        "double",
        &Lambda::new(
            vec![x.clone()],
            ast::atom(ast::mul(ast::var(&x), ast::const_int(2))),
        ),
    )
    .unwrap();

    // g(y) = let f = <double> in f(y)
    let y = Var::named("y");
    let f = Var::named("f");
    let g = registry::define_function(
        "apply-double",
        &Lambda::new(
            vec![y.clone()],
            ast::let_(
                &f,
                ast::atom(Atomic::FunctionRef(double.id())),
                ast::call(ast::var(&f), vec![ast::var(&y)]),
            ),
        ),
    )
    .unwrap();

    assert_eq!(g.invoke(&[Value::Int(21)]).unwrap(), Value::Int(42));
    g.nexus().force_compile().unwrap();
    assert_eq!(g.invoke(&[Value::Int(21)]).unwrap(), Value::Int(42));
}

#[test]
fn field_access_works_across_tiers() {
    use quicken::runtime::object::FixedObject;

    // f(o) = { field-set("x", o, field-get("x", o) + 1); field-get("x", o) }
    let make = || {
        let o = Var::named("o");
        Lambda::new(
            vec![o.clone()],
            ast::block(vec![
                ast::atom(ast::field_set(
                    "x",
                    ast::var(&o),
                    ast::add(ast::field_get("x", ast::var(&o)), ast::const_int(1)),
                )),
                ast::atom(ast::field_get("x", ast::var(&o))),
            ]),
        )
    };
    let f = registry::define_function("bump-field", &make()).unwrap();

    let object = FixedObject::with_fields(&[("x", Value::Int(10))]);
    let value = Value::Object(object);
    assert_eq!(f.invoke(&[value.clone()]).unwrap(), Value::Int(11));

    f.nexus().force_compile().unwrap();
    assert_eq!(f.invoke(&[value.clone()]).unwrap(), Value::Int(12));
    assert_eq!(f.invoke(&[value]).unwrap(), Value::Int(13));

    assert!(matches!(
        f.invoke(&[Value::Int(3)]),
        Err(Error::Runtime(RuntimeError::NotAnObject(_)))
    ));
}
