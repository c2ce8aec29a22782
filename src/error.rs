//! Error kinds surfaced by interpretation, compilation, and emitted code.

use thiserror::Error;

/// A user-visible evaluation failure. Propagates to the caller through every
/// execution mode; the deoptimization path never swallows one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("integer expected, got {0}")]
    IntegerExpected(String),
    #[error("not a function: {0}")]
    NotAFunction(String),
    #[error("wrong number of arguments: expected {expected}, got {actual}")]
    WrongArity { expected: usize, actual: usize },
    #[error("condition is not a boolean: {0}")]
    ConditionNotBoolean(String),
    #[error("not an object with fields: {0}")]
    NotAnObject(String),
    #[error("no field named {0}")]
    NoSuchField(String),
    #[error("unknown function id {0}")]
    UnknownFunction(u32),
}

/// A fault in the compiler itself: an impossible category combination or a
/// malformed routine. Fatal; propagated and never caught.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompilerError {
    #[error("{0} is not applicable to a boolean")]
    NotApplicableToBoolean(&'static str),
    #[error("invalid category combination in {op}: ({arg1}, {arg2})")]
    BadCategoryCombination {
        op: &'static str,
        arg1: crate::types::Cat,
        arg2: crate::types::Cat,
    },
    #[error("unexpected constant value: {0}")]
    UnexpectedConstant(String),
    #[error("type inference failed to converge")]
    InferenceLoop,
    #[error("lambda has unresolvable free variables: {0}")]
    UnresolvedVariable(String),
    #[error("call-site bootstrap is missing a static argument")]
    MissingBootstrapArgument,
    #[error("malformed routine: {0}")]
    MalformedRoutine(&'static str),
}

/// Top-level error type of function invocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Compiler(#[from] CompilerError),
}

impl Error {
    /// The runtime error inside, if this is one.
    pub fn as_runtime(&self) -> Option<&RuntimeError> {
        match self {
            Error::Runtime(e) => Some(e),
            Error::Compiler(_) => None,
        }
    }
}
