//! The surface expression layer: the A-normal-form input the runtime core
//! accepts.
//!
//! Expressions are split into atomic and complex forms so the positional
//! rules are enforced by construction: call and primitive arguments, `if`
//! conditions, `set!` values, and `return` values must be atomic, while
//! complex expressions appear only as let initializers, branch bodies,
//! block elements, and function bodies. Atomicity is structural, not
//! syntactic depth: a primitive call is atomic even though it nests.

use std::fmt;
use std::sync::Arc;

use crate::primitive::{self, FieldGet, FieldSet, Primitive1, Primitive2};
use crate::runtime::registry::FunctionId;

/// A named variable. Identity, not the name, is what binds references to
/// definitions: two `Var`s created separately never resolve to each other.
#[derive(Debug, Clone)]
pub struct Var(Arc<str>);

impl Var {
    pub fn named(name: &str) -> Var {
        Var(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Var) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Var {}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Bool(bool),
    Str(Arc<str>),
    Null,
}

/// An expression whose evaluation cannot push a nested evaluation frame.
#[derive(Debug, Clone)]
pub enum Atomic {
    Const(Constant),
    Var(Var),
    Prim1 {
        op: Arc<dyn Primitive1>,
        arg: Box<Atomic>,
    },
    Prim2 {
        op: Arc<dyn Primitive2>,
        arg1: Box<Atomic>,
        arg2: Box<Atomic>,
    },
    Lambda(Arc<Lambda>),
    /// A reference to a registered top-level function.
    FunctionRef(FunctionId),
}

/// The target of a call: a closure-producing atom, or a registered function
/// dispatched directly by id.
#[derive(Debug, Clone)]
pub enum CallTarget {
    Expr(Atomic),
    Direct(FunctionId),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Atomic(Atomic),
    Let {
        var: Var,
        init: Box<Expr>,
        body: Box<Expr>,
        recursive: bool,
    },
    If {
        condition: Atomic,
        consequent: Box<Expr>,
        alternative: Box<Expr>,
    },
    Block(Vec<Expr>),
    Return(Atomic),
    Set { var: Var, value: Atomic },
    Call { target: CallTarget, args: Vec<Atomic> },
}

/// A function definition: parameters and a body.
#[derive(Debug, Clone)]
pub struct Lambda {
    pub params: Vec<Var>,
    pub body: Expr,
}

impl Lambda {
    pub fn new(params: Vec<Var>, body: Expr) -> Arc<Lambda> {
        Arc::new(Lambda { params, body })
    }
}

pub fn const_int(value: i64) -> Atomic {
    Atomic::Const(Constant::Int(value))
}

pub fn const_bool(value: bool) -> Atomic {
    Atomic::Const(Constant::Bool(value))
}

pub fn const_str(value: &str) -> Atomic {
    Atomic::Const(Constant::Str(value.into()))
}

pub fn null() -> Atomic {
    Atomic::Const(Constant::Null)
}

pub fn var(v: &Var) -> Atomic {
    Atomic::Var(v.clone())
}

pub fn lambda(params: Vec<Var>, body: Expr) -> Atomic {
    Atomic::Lambda(Lambda::new(params, body))
}

pub fn atom(a: Atomic) -> Expr {
    Expr::Atomic(a)
}

pub fn let_(var: &Var, init: Expr, body: Expr) -> Expr {
    Expr::Let {
        var: var.clone(),
        init: Box::new(init),
        body: Box::new(body),
        recursive: false,
    }
}

pub fn letrec(var: &Var, init: Expr, body: Expr) -> Expr {
    Expr::Let {
        var: var.clone(),
        init: Box::new(init),
        body: Box::new(body),
        recursive: true,
    }
}

pub fn if_(condition: Atomic, consequent: Expr, alternative: Expr) -> Expr {
    Expr::If {
        condition,
        consequent: Box::new(consequent),
        alternative: Box::new(alternative),
    }
}

pub fn block(exprs: Vec<Expr>) -> Expr {
    Expr::Block(exprs)
}

pub fn ret(value: Atomic) -> Expr {
    Expr::Return(value)
}

pub fn set(var: &Var, value: Atomic) -> Expr {
    Expr::Set {
        var: var.clone(),
        value,
    }
}

pub fn call(target: Atomic, args: Vec<Atomic>) -> Expr {
    Expr::Call {
        target: CallTarget::Expr(target),
        args,
    }
}

pub fn direct_call(id: FunctionId, args: Vec<Atomic>) -> Expr {
    Expr::Call {
        target: CallTarget::Direct(id),
        args,
    }
}

fn binary(name: &str, arg1: Atomic, arg2: Atomic) -> Atomic {
    let op = primitive::lookup_binary(name)
        .unwrap_or_else(|| panic!("primitive {} is not registered", name));
    Atomic::Prim2 {
        op,
        arg1: Box::new(arg1),
        arg2: Box::new(arg2),
    }
}

pub fn add(arg1: Atomic, arg2: Atomic) -> Atomic {
    binary("+", arg1, arg2)
}

pub fn sub(arg1: Atomic, arg2: Atomic) -> Atomic {
    binary("-", arg1, arg2)
}

pub fn mul(arg1: Atomic, arg2: Atomic) -> Atomic {
    binary("*", arg1, arg2)
}

pub fn lt(arg1: Atomic, arg2: Atomic) -> Atomic {
    binary("<", arg1, arg2)
}

pub fn gt(arg1: Atomic, arg2: Atomic) -> Atomic {
    binary(">", arg1, arg2)
}

pub fn eq(arg1: Atomic, arg2: Atomic) -> Atomic {
    binary("=", arg1, arg2)
}

pub fn negate(arg: Atomic) -> Atomic {
    let op = primitive::lookup_unary("negate").expect("negate is always registered");
    Atomic::Prim1 {
        op,
        arg: Box::new(arg),
    }
}

pub fn field_get(field: &str, object: Atomic) -> Atomic {
    Atomic::Prim1 {
        op: FieldGet::of(field),
        arg: Box::new(object),
    }
}

pub fn field_set(field: &str, object: Atomic, value: Atomic) -> Atomic {
    Atomic::Prim2 {
        op: FieldSet::of(field),
        arg1: Box::new(object),
        arg2: Box::new(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_identity_is_not_name_equality() {
        let a = Var::named("x");
        let b = Var::named("x");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
