//! Integer arithmetic primitives.
//!
//! Pure-int operand categories compile to the dedicated integer
//! instructions; any reference operand routes through a checked helper
//! that unboxes at run time and raises a runtime error on a non-integer.
//! A statically boolean operand has no semantics and fails compilation.

use crate::bytecode::instr::Instr;
use crate::bytecode::writer::RoutineWriter;
use crate::error::{CompilerError, RuntimeError};
use crate::primitive::{Primitive1, Primitive2};
use crate::runtime::machine::Slot;
use crate::runtime::value::Value;
use crate::types::{Cat, ExprType};

fn add_slots(args: &[Slot]) -> Result<Slot, RuntimeError> {
    Ok(Slot::Int(args[0].as_int()?.wrapping_add(args[1].as_int()?)))
}

fn sub_slots(args: &[Slot]) -> Result<Slot, RuntimeError> {
    Ok(Slot::Int(args[0].as_int()?.wrapping_sub(args[1].as_int()?)))
}

fn mul_slots(args: &[Slot]) -> Result<Slot, RuntimeError> {
    Ok(Slot::Int(args[0].as_int()?.wrapping_mul(args[1].as_int()?)))
}

fn negate_slot(args: &[Slot]) -> Result<Slot, RuntimeError> {
    Ok(Slot::Int(args[0].as_int()?.wrapping_neg()))
}

macro_rules! arith_primitive {
    ($name:ident, $label:literal, $fast:expr, $slow:ident) => {
        #[derive(Debug)]
        pub struct $name;

        impl Primitive2 for $name {
            fn name(&self) -> &'static str {
                $label
            }

            fn apply(&self, argument1: &Value, argument2: &Value) -> Result<Value, RuntimeError> {
                let result = $slow(&[
                    Slot::Ref(argument1.clone()),
                    Slot::Ref(argument2.clone()),
                ])?;
                Ok(result.into_value())
            }

            fn inferred_return(&self, _argument1: ExprType, _argument2: ExprType) -> ExprType {
                ExprType::Known(Cat::Int)
            }

            fn generate(
                &self,
                writer: &mut RoutineWriter,
                argument1: Cat,
                argument2: Cat,
            ) -> Result<Cat, CompilerError> {
                match (argument1, argument2) {
                    (Cat::Bool, _) | (_, Cat::Bool) => {
                        Err(CompilerError::NotApplicableToBoolean($label))
                    }
                    (Cat::Int, Cat::Int) => {
                        writer.emit($fast);
                        Ok(Cat::Int)
                    }
                    (Cat::Ref, Cat::Int) | (Cat::Int, Cat::Ref) | (Cat::Ref, Cat::Ref) => {
                        writer.emit(Instr::InvokeStatic {
                            name: $label,
                            arity: 2,
                            function: $slow,
                        });
                        Ok(Cat::Int)
                    }
                    (a, b) => Err(CompilerError::BadCategoryCombination {
                        op: $label,
                        arg1: a,
                        arg2: b,
                    }),
                }
            }
        }
    };
}

arith_primitive!(Add, "+", Instr::IntAdd, add_slots);
arith_primitive!(Sub, "-", Instr::IntSub, sub_slots);
arith_primitive!(Mul, "*", Instr::IntMul, mul_slots);

#[derive(Debug)]
pub struct Negate;

impl Primitive1 for Negate {
    fn name(&self) -> &'static str {
        "negate"
    }

    fn apply(&self, argument: &Value) -> Result<Value, RuntimeError> {
        Ok(Value::Int(argument.as_int()?.wrapping_neg()))
    }

    fn inferred_return(&self, _argument: ExprType) -> ExprType {
        ExprType::Known(Cat::Int)
    }

    fn generate(&self, writer: &mut RoutineWriter, argument: Cat) -> Result<Cat, CompilerError> {
        match argument {
            Cat::Int => {
                writer.emit(Instr::IntNeg);
                Ok(Cat::Int)
            }
            Cat::Ref => {
                writer.emit(Instr::InvokeStatic {
                    name: "negate",
                    arity: 1,
                    function: negate_slot,
                });
                Ok(Cat::Int)
            }
            Cat::Bool => Err(CompilerError::NotApplicableToBoolean("negate")),
            Cat::Void => Err(CompilerError::BadCategoryCombination {
                op: "negate",
                arg1: Cat::Void,
                arg2: Cat::Void,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_checks_operand_types() {
        assert_eq!(
            Add.apply(&Value::Int(40), &Value::Int(2)),
            Ok(Value::Int(42))
        );
        assert!(matches!(
            Add.apply(&Value::Int(1), &Value::Str("x".into())),
            Err(RuntimeError::IntegerExpected(_))
        ));
        assert_eq!(Negate.apply(&Value::Int(5)), Ok(Value::Int(-5)));
    }

    #[test]
    fn boolean_operands_fail_compilation() {
        let mut writer = RoutineWriter::new(
            "t",
            crate::bytecode::instr::Signature::generic(0),
            0,
            0,
        );
        assert!(matches!(
            Sub.generate(&mut writer, Cat::Bool, Cat::Int),
            Err(CompilerError::NotApplicableToBoolean("-"))
        ));
        assert!(matches!(
            Negate.generate(&mut writer, Cat::Bool),
            Err(CompilerError::NotApplicableToBoolean("negate"))
        ));
    }
}
