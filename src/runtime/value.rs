use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::RuntimeError;
use crate::runtime::closure::Closure;
use crate::runtime::object::FixedObject;
use crate::types::Cat;

/// Runtime value used by the interpreters, frames, closures, and emitted
/// code.
///
/// Values are shared with `Arc` so closures, boxed-variable cells, and
/// inline caches can hold them across threads. Heap variants are cheap to
/// clone; primitives stay unboxed until a reference-typed slot needs them.
#[derive(Debug, Clone)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),
    /// Boolean value.
    Bool(bool),
    /// UTF-8 string value.
    Str(Arc<str>),
    /// Absence of value.
    Null,
    /// Function value: an implementation plus its copied environment.
    Closure(Arc<Closure>),
    /// Named-field object.
    Object(Arc<FixedObject>),
    /// One-slot mutable cell backing a boxed variable.
    Cell(Arc<ValueCell>),
}

impl Value {
    /// The category the profiling machinery files this value under.
    pub fn category(&self) -> Cat {
        match self {
            Value::Int(_) => Cat::Int,
            Value::Bool(_) => Cat::Bool,
            _ => Cat::Ref,
        }
    }

    /// Returns the canonical runtime type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::Str(_) => "String",
            Value::Null => "Null",
            Value::Closure(_) => "Closure",
            Value::Object(_) => "Object",
            Value::Cell(_) => "Cell",
        }
    }

    pub fn as_int(&self) -> Result<i64, RuntimeError> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(RuntimeError::IntegerExpected(other.to_string())),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The default a letrec-bound slot holds before its initializer runs:
    /// zero for int slots, false for bool slots, null for references.
    pub fn default_for(cat: Cat) -> Value {
        match cat {
            Cat::Int => Value::Int(0),
            Cat::Bool => Value::Bool(false),
            _ => Value::Null,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Cell(a), Value::Cell(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::Null => write!(f, "null"),
            Value::Closure(_) => write!(f, "<closure>"),
            Value::Object(_) => write!(f, "<object>"),
            Value::Cell(cell) => write!(f, "<cell {}>", cell.get()),
        }
    }
}

/// The mutable cell behind a boxed variable. Shared by the owner frame and
/// every inner closure that copied the variable.
#[derive(Debug)]
pub struct ValueCell {
    value: RwLock<Value>,
}

impl ValueCell {
    pub fn new(value: Value) -> Arc<ValueCell> {
        Arc::new(ValueCell {
            value: RwLock::new(value),
        })
    }

    pub fn get(&self) -> Value {
        self.value.read().clone()
    }

    pub fn set(&self, value: Value) {
        *self.value.write() = value;
    }
}
