//! Field access primitives over fixed-layout objects.
//!
//! Unlike the arithmetic set, a field accessor's identity includes the
//! field name, so instances are constructed per field rather than looked up
//! in the registry. Compiled access dispatches through the same
//! inline-caching call-site machinery as closure calls, keyed on the field
//! name and guarded on the receiver's layout identity.

use std::sync::Arc;

use crate::bytecode::instr::Signature;
use crate::bytecode::writer::{BootstrapArg, RoutineWriter};
use crate::error::{CompilerError, RuntimeError};
use crate::primitive::{Primitive1, Primitive2};
use crate::runtime::call_site;
use crate::runtime::value::Value;
use crate::types::{Cat, ExprType};

#[derive(Debug)]
pub struct FieldGet {
    field: Arc<str>,
}

impl FieldGet {
    pub fn of(field: &str) -> Arc<FieldGet> {
        Arc::new(FieldGet {
            field: field.into(),
        })
    }
}

impl Primitive1 for FieldGet {
    fn name(&self) -> &'static str {
        "field-get"
    }

    fn apply(&self, argument: &Value) -> Result<Value, RuntimeError> {
        match argument {
            Value::Object(object) => object
                .get(&self.field)
                .ok_or_else(|| RuntimeError::NoSuchField(self.field.to_string())),
            other => Err(RuntimeError::NotAnObject(other.to_string())),
        }
    }

    fn inferred_return(&self, _argument: ExprType) -> ExprType {
        ExprType::Known(Cat::Ref)
    }

    fn generate(&self, writer: &mut RoutineWriter, argument: Cat) -> Result<Cat, CompilerError> {
        writer.invoke_dynamic(
            call_site::field_get_bootstrap,
            &format!("field-get:{}", self.field),
            Signature::new(vec![argument], Cat::Ref),
            &[BootstrapArg::Field(self.field.clone())],
        )?;
        Ok(Cat::Ref)
    }
}

#[derive(Debug)]
pub struct FieldSet {
    field: Arc<str>,
}

impl FieldSet {
    pub fn of(field: &str) -> Arc<FieldSet> {
        Arc::new(FieldSet {
            field: field.into(),
        })
    }
}

impl Primitive2 for FieldSet {
    fn name(&self) -> &'static str {
        "field-set"
    }

    fn apply(&self, argument1: &Value, argument2: &Value) -> Result<Value, RuntimeError> {
        match argument1 {
            Value::Object(object) => {
                object.set(&self.field, argument2.clone());
                Ok(argument2.clone())
            }
            other => Err(RuntimeError::NotAnObject(other.to_string())),
        }
    }

    fn inferred_return(&self, _argument1: ExprType, argument2: ExprType) -> ExprType {
        argument2
    }

    fn generate(
        &self,
        writer: &mut RoutineWriter,
        argument1: Cat,
        argument2: Cat,
    ) -> Result<Cat, CompilerError> {
        writer.invoke_dynamic(
            call_site::field_set_bootstrap,
            &format!("field-set:{}", self.field),
            Signature::new(vec![argument1, argument2], argument2),
            &[BootstrapArg::Field(self.field.clone())],
        )?;
        Ok(argument2)
    }
}
