//! Observed-type profiles collected by the profiling interpreter.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::runtime::value::Value;
use crate::types::{Cat, ExprType};

/// Tallies of the value categories observed at one variable or expression.
///
/// Counters are incremented with relaxed atomics; a slight over- or
/// undercount under contention is acceptable.
#[derive(Debug, Default)]
pub struct ValueProfile {
    reference_cases: AtomicU64,
    int_cases: AtomicU64,
    bool_cases: AtomicU64,
}

impl ValueProfile {
    pub fn new() -> ValueProfile {
        ValueProfile::default()
    }

    pub fn record(&self, value: &Value) {
        let counter = match value.category() {
            Cat::Int => &self.int_cases,
            Cat::Bool => &self.bool_cases,
            _ => &self.reference_cases,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reference_cases(&self) -> u64 {
        self.reference_cases.load(Ordering::Relaxed)
    }

    pub fn int_cases(&self) -> u64 {
        self.int_cases.load(Ordering::Relaxed)
    }

    pub fn bool_cases(&self) -> u64 {
        self.bool_cases.load(Ordering::Relaxed)
    }

    pub fn has_data(&self) -> bool {
        self.reference_cases() > 0 || self.int_cases() > 0 || self.bool_cases() > 0
    }

    /// The observed type of this position. With no observations, unknown.
    /// A single primitive category observed exclusively stays primitive;
    /// any mix requires a boxed slot, so the union is a reference.
    pub fn observed_type(&self) -> ExprType {
        if !self.has_data() {
            return ExprType::Unknown;
        }
        if self.reference_cases() == 0 {
            if self.bool_cases() == 0 {
                return ExprType::Known(Cat::Int);
            }
            if self.int_cases() == 0 {
                return ExprType::Known(Cat::Bool);
            }
        }
        ExprType::Known(Cat::Ref)
    }

    pub fn is_pure_int(&self) -> bool {
        self.has_data() && self.reference_cases() == 0 && self.bool_cases() == 0
    }

    pub fn is_pure_bool(&self) -> bool {
        self.has_data() && self.reference_cases() == 0 && self.int_cases() == 0
    }
}

/// Per-function profile: the invocation counter that drives the compilation
/// threshold, plus the observed categories of the function's results.
#[derive(Debug, Default)]
pub struct FunctionProfile {
    invocations: AtomicU64,
    result: ValueProfile,
}

impl FunctionProfile {
    pub fn new() -> FunctionProfile {
        FunctionProfile::default()
    }

    pub fn record_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn record_result(&self, value: &Value) {
        self.result.record(value);
    }

    pub fn result_profile(&self) -> &ValueProfile {
        &self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_profile_is_unknown() {
        let profile = ValueProfile::new();
        assert!(!profile.has_data());
        assert_eq!(profile.observed_type(), ExprType::Unknown);
        assert!(!profile.is_pure_int());
        assert!(!profile.is_pure_bool());
    }

    #[test]
    fn single_category_stays_primitive() {
        let profile = ValueProfile::new();
        profile.record(&Value::Int(1));
        profile.record(&Value::Int(2));
        assert_eq!(profile.observed_type(), ExprType::Known(Cat::Int));
        assert!(profile.is_pure_int());

        let profile = ValueProfile::new();
        profile.record(&Value::Bool(true));
        assert_eq!(profile.observed_type(), ExprType::Known(Cat::Bool));
        assert!(profile.is_pure_bool());
    }

    #[test]
    fn mixed_primitives_widen_to_ref() {
        let profile = ValueProfile::new();
        profile.record(&Value::Int(1));
        profile.record(&Value::Bool(false));
        assert_eq!(profile.observed_type(), ExprType::Known(Cat::Ref));
        assert!(!profile.is_pure_int());
        assert!(!profile.is_pure_bool());
    }

    #[test]
    fn any_reference_widens_to_ref() {
        let profile = ValueProfile::new();
        profile.record(&Value::Int(1));
        profile.record(&Value::Str("hi".into()));
        assert_eq!(profile.observed_type(), ExprType::Known(Cat::Ref));
    }

    #[test]
    fn invocation_counter_accumulates() {
        let profile = FunctionProfile::new();
        for _ in 0..5 {
            profile.record_invocation();
        }
        assert_eq!(profile.invocation_count(), 5);
    }
}
