use std::sync::Arc;

use crate::error::{Error, RuntimeError};
use crate::runtime::nexus::Nexus;
use crate::runtime::value::Value;

/// A function value: an implementation plus the outer-variable values
/// copied in when it was materialized. Copied values for boxed variables
/// are the shared cells themselves.
#[derive(Debug)]
pub struct Closure {
    pub nexus: Arc<Nexus>,
    pub copied_values: Vec<Value>,
}

impl Closure {
    pub fn new(nexus: Arc<Nexus>, copied_values: Vec<Value>) -> Arc<Closure> {
        Arc::new(Closure {
            nexus,
            copied_values,
        })
    }

    /// Invokes this closure from the outside, picking the best available
    /// execution: the specialized routine when the argument categories
    /// match, else the generic routine, else the profiling interpreter.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, Error> {
        if args.len() != self.nexus.arity() {
            return Err(RuntimeError::WrongArity {
                expected: self.nexus.arity(),
                actual: args.len(),
            }
            .into());
        }
        self.nexus.call(&self.copied_values, args)
    }
}
