//! Integer comparison primitives.
//!
//! Each one is if-aware: with both operands specialized to int, an `if`
//! whose condition is the comparison fuses into a single integer
//! compare-and-branch instead of producing a boolean.

use crate::bytecode::instr::{Instr, IntCmp};
use crate::bytecode::writer::RoutineWriter;
use crate::error::{CompilerError, RuntimeError};
use crate::primitive::Primitive2;
use crate::runtime::machine::Slot;
use crate::runtime::value::Value;
use crate::types::{Cat, ExprType};

fn lt_slots(args: &[Slot]) -> Result<Slot, RuntimeError> {
    Ok(Slot::Bool(args[0].as_int()? < args[1].as_int()?))
}

fn gt_slots(args: &[Slot]) -> Result<Slot, RuntimeError> {
    Ok(Slot::Bool(args[0].as_int()? > args[1].as_int()?))
}

fn eq_slots(args: &[Slot]) -> Result<Slot, RuntimeError> {
    Ok(Slot::Bool(args[0].as_int()? == args[1].as_int()?))
}

macro_rules! compare_primitive {
    ($name:ident, $label:literal, $cmp:expr, $slow:ident) => {
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
                ExprType::Known(Cat::Bool)
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
                        writer.emit(Instr::IntCompare($cmp));
                        Ok(Cat::Bool)
                    }
                    (Cat::Ref, Cat::Int) | (Cat::Int, Cat::Ref) | (Cat::Ref, Cat::Ref) => {
                        writer.emit(Instr::InvokeStatic {
                            name: $label,
                            arity: 2,
                            function: $slow,
                        });
                        Ok(Cat::Bool)
                    }
                    (a, b) => Err(CompilerError::BadCategoryCombination {
                        op: $label,
                        arg1: a,
                        arg2: b,
                    }),
                }
            }

            fn fused_branch(&self, argument1: Cat, argument2: Cat) -> Option<IntCmp> {
                if argument1 == Cat::Int && argument2 == Cat::Int {
                    Some($cmp)
                } else {
                    None
                }
            }
        }
    };
}

compare_primitive!(Lt, "<", IntCmp::Lt, lt_slots);
compare_primitive!(Gt, ">", IntCmp::Gt, gt_slots);
compare_primitive!(Eq, "=", IntCmp::Eq, eq_slots);
