//! The process-wide function table.
//!
//! Append-only after initialization: additions take the write lock, lookups
//! are read-locked index fetches. Ids are dense and never reused within a
//! process run. An id can be reserved ahead of lowering so a function body
//! can call itself directly.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::ast::Lambda;
use crate::error::{CompilerError, Error};
use crate::graph::lower;
use crate::runtime::closure::Closure;
use crate::runtime::nexus::Nexus;
use crate::runtime::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

static FUNCTIONS: RwLock<Vec<Option<Arc<Nexus>>>> = RwLock::new(Vec::new());

/// Reserves the next id without a function behind it yet.
pub(crate) fn reserve() -> FunctionId {
    let mut table = FUNCTIONS.write();
    let id = FunctionId(table.len() as u32);
    table.push(None);
    id
}

/// Binds a reserved id to its lowered function.
pub(crate) fn fulfill(id: FunctionId, nexus: &Arc<Nexus>) {
    nexus.assign_id(id);
    FUNCTIONS.write()[id.0 as usize] = Some(nexus.clone());
}

pub(crate) fn register(nexus: &Arc<Nexus>) -> FunctionId {
    let id = reserve();
    fulfill(id, nexus);
    id
}

pub fn lookup_function(id: FunctionId) -> Option<Arc<Nexus>> {
    FUNCTIONS.read().get(id.0 as usize).cloned().flatten()
}

/// Lowers and registers a closed top-level function under a name.
pub fn define_function(name: &str, lambda: &Lambda) -> Result<Arc<UserFunction>, CompilerError> {
    let nexus = lower::lower_function(name, lambda, None)?;
    Ok(Arc::new(UserFunction {
        name: name.into(),
        nexus,
    }))
}

/// Defines a function whose body may call itself directly: the builder
/// receives the function's id before the body exists.
pub fn define_recursive(
    name: &str,
    build: impl FnOnce(FunctionId) -> Arc<Lambda>,
) -> Result<Arc<UserFunction>, CompilerError> {
    let id = reserve();
    let lambda = build(id);
    let nexus = lower::lower_function(name, &lambda, Some(id))?;
    Ok(Arc::new(UserFunction {
        name: name.into(),
        nexus,
    }))
}

/// Clears the table. A test-harness hook: callers own the ordering; ids
/// handed out earlier dangle afterwards.
pub fn reset() {
    FUNCTIONS.write().clear();
}

/// A registered top-level function.
#[derive(Debug)]
pub struct UserFunction {
    name: Arc<str>,
    nexus: Arc<Nexus>,
}

impl UserFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nexus(&self) -> &Arc<Nexus> {
        &self.nexus
    }

    pub fn id(&self) -> FunctionId {
        self.nexus.id().expect("registered at definition")
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, Error> {
        Closure::new(self.nexus.clone(), Vec::new()).invoke(args)
    }
}
