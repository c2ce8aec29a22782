use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::profile::ValueProfile;
use crate::runtime::value::{Value, ValueCell};
use crate::types::{Cat, ExprType};

/// How a variable relates to the function that hosts it.
#[derive(Debug)]
enum VarKind {
    /// A parameter or let-bound local declared by the host function.
    Declared { profile: ValueProfile },
    /// A synthetic parameter holding an outer variable's value copied in at
    /// closure materialization. Shares the original's profile, boxedness,
    /// and type annotations; only the frame index is its own.
    Copied { original: Arc<VariableDefinition> },
}

/// A variable definition: its host frame slot, boxing flag, profile, and
/// the type annotations the analysis phases fill in.
///
/// The frame index is only meaningful in the host function's frame. A boxed
/// variable's slot holds a one-cell mutable container shared with every
/// closure that copied the variable.
pub struct VariableDefinition {
    name: Arc<str>,
    kind: VarKind,
    index: AtomicUsize,
    boxed: AtomicBool,
    inferred: AtomicU8,
    specialized: AtomicU8,
}

impl VariableDefinition {
    pub fn declared(name: &str) -> Arc<VariableDefinition> {
        Arc::new(VariableDefinition {
            name: name.into(),
            kind: VarKind::Declared {
                profile: ValueProfile::new(),
            },
            index: AtomicUsize::new(usize::MAX),
            boxed: AtomicBool::new(false),
            inferred: AtomicU8::new(ExprType::Unknown.to_bits()),
            specialized: AtomicU8::new(Cat::Ref.to_bits()),
        })
    }

    pub fn copied(original: &Arc<VariableDefinition>) -> Arc<VariableDefinition> {
        Arc::new(VariableDefinition {
            name: original.name.clone(),
            kind: VarKind::Copied {
                original: original.clone(),
            },
            index: AtomicUsize::new(usize::MAX),
            boxed: AtomicBool::new(false),
            inferred: AtomicU8::new(ExprType::Unknown.to_bits()),
            specialized: AtomicU8::new(Cat::Ref.to_bits()),
        })
    }

    fn original(&self) -> &VariableDefinition {
        match &self.kind {
            VarKind::Declared { .. } => self,
            VarKind::Copied { original } => original.original(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_copied(&self) -> bool {
        matches!(self.kind, VarKind::Copied { .. })
    }

    pub fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }

    /// Whether the variable's slot holds a shared mutable cell. True for
    /// mutable variables captured by an inner closure, in every function
    /// that shares the definition.
    pub fn is_boxed(&self) -> bool {
        self.original().boxed.load(Ordering::Relaxed)
    }

    pub(crate) fn set_boxed(&self) {
        self.original().boxed.store(true, Ordering::Relaxed);
    }

    /// The type profile; a copied variable reports the original's.
    pub fn profile(&self) -> &ValueProfile {
        match &self.original().kind {
            VarKind::Declared { profile } => profile,
            VarKind::Copied { .. } => unreachable!("original() resolves to a declared variable"),
        }
    }

    pub fn observed_type(&self) -> ExprType {
        self.profile().observed_type()
    }

    pub fn inferred_type(&self) -> ExprType {
        ExprType::from_bits(self.original().inferred.load(Ordering::Relaxed))
    }

    pub(crate) fn set_inferred_type(&self, t: ExprType) {
        self.original().inferred.store(t.to_bits(), Ordering::Relaxed);
    }

    /// Widens the inferred type with `t`; reports whether it changed.
    pub(crate) fn unify_inferred_type_with(&self, t: ExprType) -> bool {
        let current = self.inferred_type();
        let unified = current.union(t);
        self.set_inferred_type(unified);
        unified != current
    }

    /// The category specialized code assumes for this variable's slot.
    pub fn specialized_type(&self) -> Cat {
        Cat::from_bits(self.original().specialized.load(Ordering::Relaxed))
    }

    pub(crate) fn set_specialized_type(&self, cat: Cat) {
        self.original().specialized.store(cat.to_bits(), Ordering::Relaxed);
    }

    /// Stores a value into a fresh slot, wrapping it in a cell when boxed.
    pub fn init_value_in(&self, frame: &mut [Value], value: Value) {
        let index = self.index();
        if self.is_boxed() {
            frame[index] = Value::Cell(ValueCell::new(value));
        } else {
            frame[index] = value;
        }
    }

    pub fn get_value_in(&self, frame: &[Value]) -> Value {
        match &frame[self.index()] {
            Value::Cell(cell) if self.is_boxed() => cell.get(),
            other => other.clone(),
        }
    }

    pub fn set_value_in(&self, frame: &mut [Value], value: Value) {
        let index = self.index();
        match &frame[index] {
            Value::Cell(cell) if self.is_boxed() => cell.set(value),
            _ => frame[index] = value,
        }
    }

    /// Binds an incoming argument. A declared boxed parameter is wrapped in
    /// a fresh cell; a copied value arrives already boxed by the closure
    /// that materialized it and is stored as-is.
    pub fn setup_argument_in(&self, frame: &mut [Value], value: Value) {
        let index = self.index();
        if self.is_boxed() && !self.is_copied() {
            frame[index] = Value::Cell(ValueCell::new(value));
        } else {
            frame[index] = value;
        }
    }

    /// The value a materializing closure copies for this variable: the
    /// shared cell itself when boxed, the current value otherwise.
    pub fn copied_value_in(&self, frame: &[Value]) -> Value {
        if self.is_boxed() {
            frame[self.index()].clone()
        } else {
            self.get_value_in(frame)
        }
    }
}

impl fmt::Debug for VariableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableDefinition")
            .field("name", &self.name)
            .field("index", &self.index())
            .field("boxed", &self.is_boxed())
            .field("copied", &self.is_copied())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copied_variable_shares_profile_and_boxing() {
        let original = VariableDefinition::declared("x");
        let copy = VariableDefinition::copied(&original);
        original.profile().record(&Value::Int(1));
        assert_eq!(copy.observed_type(), ExprType::Known(Cat::Int));

        original.set_boxed();
        assert!(copy.is_boxed());
    }

    #[test]
    fn boxed_slot_round_trips_through_a_cell() {
        let v = VariableDefinition::declared("x");
        v.set_boxed();
        v.set_index(0);
        let mut frame = vec![Value::Null];
        v.init_value_in(&mut frame, Value::Int(3));
        assert!(matches!(frame[0], Value::Cell(_)));
        assert_eq!(v.get_value_in(&frame), Value::Int(3));
        v.set_value_in(&mut frame, Value::Int(4));
        assert_eq!(v.get_value_in(&frame), Value::Int(4));
    }

    #[test]
    fn unify_reports_changes() {
        let v = VariableDefinition::declared("x");
        assert!(v.unify_inferred_type_with(ExprType::Known(Cat::Int)));
        assert!(!v.unify_inferred_type_with(ExprType::Known(Cat::Int)));
        assert!(v.unify_inferred_type_with(ExprType::Known(Cat::Bool)));
        assert_eq!(v.inferred_type(), ExprType::Known(Cat::Ref));
    }
}
