use std::sync::Arc;

use crate::ast::{self, Lambda, Var};
use crate::error::{Error, RuntimeError};
use crate::graph::lower::lower_function;
use crate::interp::execute;
use crate::runtime::nexus::Nexus;
use crate::runtime::value::Value;

fn run(lambda: &Lambda, args: &[Value]) -> Result<Value, Error> {
    let nexus = lower_function("test", lambda, None).unwrap();
    execute(&nexus, &[], args, false)
}

fn run_ok(lambda: &Lambda, args: &[Value]) -> Value {
    run(lambda, args).unwrap()
}

#[test]
fn constants_and_arithmetic() {
    let lambda = Lambda::new(
        vec![],
        ast::atom(ast::add(ast::const_int(40), ast::const_int(2))),
    );
    assert_eq!(run_ok(&lambda, &[]), Value::Int(42));
}

#[test]
fn let_binds_and_set_returns_the_stored_value() {
    let x = Var::named("x");
    let lambda = Lambda::new(
        vec![],
        ast::let_(
            &x,
            ast::atom(ast::const_int(1)),
            ast::block(vec![
                ast::set(&x, ast::const_int(7)),
                ast::atom(ast::var(&x)),
            ]),
        ),
    );
    assert_eq!(run_ok(&lambda, &[]), Value::Int(7));
}

#[test]
fn empty_block_is_null() {
    let lambda = Lambda::new(vec![], ast::block(vec![]));
    assert_eq!(run_ok(&lambda, &[]), Value::Null);
}

#[test]
fn early_return_skips_the_tail() {
    let lambda = Lambda::new(
        vec![],
        ast::block(vec![
            ast::ret(ast::const_int(42)),
            ast::atom(ast::const_str("hello")),
        ]),
    );
    assert_eq!(run_ok(&lambda, &[]), Value::Int(42));
}

#[test]
fn closures_capture_and_call() {
    let n = Var::named("n");
    let y = Var::named("y");
    let add = Var::named("add");
    let lambda = Lambda::new(
        vec![n.clone()],
        ast::let_(
            &add,
            ast::atom(ast::lambda(
                vec![y.clone()],
                ast::atom(ast::add(ast::var(&y), ast::var(&n))),
            )),
            ast::call(ast::var(&add), vec![ast::const_int(2)]),
        ),
    );
    assert_eq!(run_ok(&lambda, &[Value::Int(40)]), Value::Int(42));
}

#[test]
fn letrec_sees_itself_through_the_shared_cell() {
    let f = Var::named("f");
    let x = Var::named("x");
    let lambda = Lambda::new(
        vec![],
        ast::letrec(
            &f,
            ast::atom(ast::lambda(
                vec![x.clone()],
                ast::if_(
                    ast::eq(ast::var(&x), ast::const_int(0)),
                    ast::atom(ast::const_int(0)),
                    ast::call(ast::var(&f), vec![ast::sub(ast::var(&x), ast::const_int(1))]),
                ),
            )),
            ast::call(ast::var(&f), vec![ast::const_int(3)]),
        ),
    );
    assert_eq!(run_ok(&lambda, &[]), Value::Int(0));
}

#[test]
fn non_boolean_condition_is_a_runtime_error() {
    let c = Var::named("c");
    let lambda = Lambda::new(
        vec![c.clone()],
        ast::if_(
            ast::var(&c),
            ast::atom(ast::const_int(1)),
            ast::atom(ast::const_int(2)),
        ),
    );
    assert!(matches!(
        run(&lambda, &[Value::Int(3)]),
        Err(Error::Runtime(RuntimeError::ConditionNotBoolean(_)))
    ));
}

#[test]
fn calling_a_non_function_is_a_runtime_error() {
    let f = Var::named("f");
    let lambda = Lambda::new(
        vec![f.clone()],
        ast::call(ast::var(&f), vec![]),
    );
    assert!(matches!(
        run(&lambda, &[Value::Int(3)]),
        Err(Error::Runtime(RuntimeError::NotAFunction(_)))
    ));
}

#[test]
fn profiling_mode_records_arguments_and_results() {
    let x = Var::named("x");
    let lambda = Lambda::new(vec![x.clone()], ast::atom(ast::var(&x)));
    let nexus: Arc<Nexus> = lower_function("profiled", &lambda, None).unwrap();
    execute(&nexus, &[], &[Value::Int(1)], true).unwrap();
    execute(&nexus, &[], &[Value::Int(2)], true).unwrap();

    assert_eq!(nexus.profile.invocation_count(), 2);
    assert_eq!(nexus.graph().declared_params[0].profile().int_cases(), 4);
    assert_eq!(nexus.profile.result_profile().int_cases(), 2);
}
