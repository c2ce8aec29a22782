//! The primitive operation contract and the built-in primitive set.
//!
//! Every primitive provides three facets: `apply` for the interpreters,
//! `inferred_return` for type inference, and `generate` for code
//! generation. `generate` owns the category dispatch over its operands and
//! must fail compilation, not execution, for combinations that have no
//! semantics. Binary primitives may additionally advertise a fused
//! conditional-branch form used when they sit in `if` condition position.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::bytecode::instr::IntCmp;
use crate::bytecode::writer::RoutineWriter;
use crate::error::{CompilerError, RuntimeError};
use crate::runtime::value::Value;
use crate::types::{Cat, ExprType};

pub mod arith;
pub mod compare;
pub mod fields;

pub use arith::{Add, Mul, Negate, Sub};
pub use compare::{Eq, Gt, Lt};
pub use fields::{FieldGet, FieldSet};

/// A unary primitive operation.
pub trait Primitive1: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, argument: &Value) -> Result<Value, RuntimeError>;
    fn inferred_return(&self, argument: ExprType) -> ExprType;
    fn generate(&self, writer: &mut RoutineWriter, argument: Cat) -> Result<Cat, CompilerError>;
}

/// A binary primitive operation.
pub trait Primitive2: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, argument1: &Value, argument2: &Value) -> Result<Value, RuntimeError>;
    fn inferred_return(&self, argument1: ExprType, argument2: ExprType) -> ExprType;
    fn generate(
        &self,
        writer: &mut RoutineWriter,
        argument1: Cat,
        argument2: Cat,
    ) -> Result<Cat, CompilerError>;

    /// The fused compare-and-branch this primitive can supply when it is the
    /// condition of an `if` with the given operand categories.
    fn fused_branch(&self, _argument1: Cat, _argument2: Cat) -> Option<IntCmp> {
        None
    }
}

#[derive(Default)]
struct Registry {
    unary: FxHashMap<&'static str, Arc<dyn Primitive1>>,
    binary: FxHashMap<&'static str, Arc<dyn Primitive2>>,
}

static REGISTRY: RwLock<Option<Registry>> = RwLock::new(None);

fn with_registry<T>(f: impl FnOnce(&mut Registry) -> T) -> T {
    let mut guard = REGISTRY.write();
    let registry = guard.get_or_insert_with(|| {
        let mut registry = Registry::default();
        registry.unary.insert("negate", Arc::new(Negate));
        registry.binary.insert("+", Arc::new(Add));
        registry.binary.insert("-", Arc::new(Sub));
        registry.binary.insert("*", Arc::new(Mul));
        registry.binary.insert("<", Arc::new(Lt));
        registry.binary.insert(">", Arc::new(Gt));
        registry.binary.insert("=", Arc::new(Eq));
        registry
    });
    f(registry)
}

/// Looks up a unary primitive by name. `field-get` is constructed through
/// [`FieldGet::of`] instead: its identity includes the field name.
pub fn lookup_unary(name: &str) -> Option<Arc<dyn Primitive1>> {
    with_registry(|registry| registry.unary.get(name).cloned())
}

pub fn lookup_binary(name: &str) -> Option<Arc<dyn Primitive2>> {
    with_registry(|registry| registry.binary.get(name).cloned())
}

pub fn register_unary(name: &'static str, primitive: Arc<dyn Primitive1>) {
    with_registry(|registry| {
        registry.unary.insert(name, primitive);
    })
}

pub fn register_binary(name: &'static str, primitive: Arc<dyn Primitive2>) {
    with_registry(|registry| {
        registry.binary.insert(name, primitive);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_ins_are_registered() {
        for name in ["+", "-", "*", "<", ">", "="] {
            assert!(lookup_binary(name).is_some(), "missing {}", name);
        }
        assert!(lookup_unary("negate").is_some());
        assert!(lookup_binary("negate").is_none());
    }
}
