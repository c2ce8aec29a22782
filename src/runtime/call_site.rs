//! Mutable call sites with inline-cache management.
//!
//! A site is created by a bootstrap at code-emission time and lives inside
//! the emitted instruction. Its target is conceptually a chain of
//! guard-tested entries ending in the slow dispatch; here the chain is an
//! explicit entry list walked by a small loop, which is functionally
//! equivalent to composed guard handles. Once the entry count exceeds
//! [`CACHE_LIMIT`], the site turns megamorphic: the chain is collapsed and
//! further installs are ignored until [`InlineCachingCallSite::reset`].
//!
//! All mutations are serialized by the per-site lock. `is_megamorphic` is
//! deliberately check-then-act on the dispatch path; the race is benign and
//! costs at most one ignored install attempt.

use std::fmt;
use std::sync::Arc;

use log::trace;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::bytecode::instr::Signature;
use crate::bytecode::writer::BootstrapArg;
use crate::error::{CompilerError, Error, RuntimeError};
use crate::runtime::closure::Closure;
use crate::runtime::machine::Slot;
use crate::runtime::nexus::Nexus;
use crate::runtime::object::{FixedObject, ObjectLayout};
use crate::runtime::registry::{self, FunctionId};
use crate::runtime::value::Value;
use crate::types::Cat;

/// Polymorphic entries a site holds before turning megamorphic.
pub const CACHE_LIMIT: usize = 3;

/// Argument count served without spilling to the heap on dispatch paths.
pub const MAX_INLINED_ARGS: usize = 4;

pub type ArgBuffer = SmallVec<[Slot; MAX_INLINED_ARGS]>;

/// The slow path a site falls back to when no cache entry admits the call.
#[derive(Debug, Clone)]
pub enum DispatchKind {
    /// General closure call: the receiver operand is the closure.
    ClosureCall,
    /// Constant-function call dispatched by registry id, no receiver.
    DirectCall(FunctionId),
    /// Field read keyed on the field name.
    FieldGet(Arc<str>),
    /// Field write keyed on the field name.
    FieldSet(Arc<str>),
}

#[derive(Clone)]
pub(crate) enum CacheGuard {
    /// The receiver is a closure over this exact function, compiled in this
    /// exact generation. Holds the function identity, never the closure.
    SameFunction { function: Arc<Nexus>, generation: u64 },
    /// The receiver is an object with this exact layout.
    SameLayout(Arc<ObjectLayout>),
}

impl CacheGuard {
    fn admits(&self, receiver: &Slot) -> bool {
        match self {
            CacheGuard::SameFunction {
                function,
                generation,
            } => match receiver {
                Slot::Ref(Value::Closure(closure)) => {
                    Arc::ptr_eq(&closure.nexus, function)
                        && function.generation() == *generation
                }
                _ => false,
            },
            CacheGuard::SameLayout(layout) => match receiver {
                Slot::Ref(Value::Object(object)) => Arc::ptr_eq(&object.layout(), layout),
                _ => false,
            },
        }
    }
}

#[derive(Clone)]
pub(crate) enum CacheTarget {
    Specialized(Arc<Nexus>),
    Generic(Arc<Nexus>),
    FieldLoad(usize),
    FieldStore(usize),
}

#[derive(Clone)]
struct CacheEntry {
    guard: CacheGuard,
    target: CacheTarget,
}

#[derive(Default)]
struct CacheState {
    entries: Vec<CacheEntry>,
    size: usize,
    megamorphic: bool,
}

pub struct InlineCachingCallSite {
    name: Arc<str>,
    signature: Signature,
    dispatch: DispatchKind,
    /// Permanent replacement dispatch once the cache limit is hit; the
    /// original dispatch serves when absent.
    megamorphic_dispatch: Option<DispatchKind>,
    state: RwLock<CacheState>,
}

impl InlineCachingCallSite {
    pub fn new(
        name: impl Into<Arc<str>>,
        signature: Signature,
        dispatch: DispatchKind,
        megamorphic_dispatch: Option<DispatchKind>,
    ) -> InlineCachingCallSite {
        InlineCachingCallSite {
            name: name.into(),
            signature,
            dispatch,
            megamorphic_dispatch,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn is_megamorphic(&self) -> bool {
        self.state.read().megamorphic
    }

    /// The number of installs this site has accepted, capped one past the
    /// cache limit by the megamorphic transition.
    pub fn cache_size(&self) -> usize {
        self.state.read().size
    }

    /// The guarded entries currently in the chain.
    pub fn entry_count(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Installs a cache entry ahead of the current target. At the cache
    /// limit the whole chain is collapsed and the site becomes megamorphic;
    /// after that, installs are ignored.
    pub(crate) fn add_cache_entry(&self, guard: CacheGuard, target: CacheTarget) {
        let mut state = self.state.write();
        if state.megamorphic {
            return;
        }
        if state.size < CACHE_LIMIT {
            state.size += 1;
            state.entries.push(CacheEntry { guard, target });
        } else {
            state.size += 1;
            state.megamorphic = true;
            state.entries.clear();
            trace!("call site {} went megamorphic", self.name);
        }
    }

    /// Drops every entry and returns to the original dispatch. Used after
    /// deoptimization invalidates what the entries were linked to.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.size = 0;
        state.megamorphic = false;
    }

    pub(crate) fn invoke(&self, args: ArgBuffer) -> Result<Slot, Error> {
        // Snapshot the matching target under the read lock, invoke outside
        // it: targets may re-enter this same site.
        let cached = {
            let state = self.state.read();
            args.first().and_then(|receiver| {
                state
                    .entries
                    .iter()
                    .find(|entry| entry.guard.admits(receiver))
                    .map(|entry| entry.target.clone())
            })
        };
        if let Some(target) = cached {
            return self.run_target(&target, args);
        }
        let megamorphic = self.is_megamorphic();
        let kind = if megamorphic {
            self.megamorphic_dispatch.as_ref().unwrap_or(&self.dispatch)
        } else {
            &self.dispatch
        };
        self.dispatch_slow(kind.clone(), args, !megamorphic)
    }

    fn run_target(&self, target: &CacheTarget, args: ArgBuffer) -> Result<Slot, Error> {
        match target {
            CacheTarget::Specialized(nexus) => {
                let closure = closure_of(&args[0])?;
                nexus.invoke_compiled(true, &closure.copied_values, &args[1..])
            }
            CacheTarget::Generic(nexus) => {
                let closure = closure_of(&args[0])?;
                nexus.invoke_compiled(false, &closure.copied_values, &args[1..])
            }
            CacheTarget::FieldLoad(index) => {
                let object = object_of(&args[0])?;
                let value = object
                    .get_slot(*index)
                    .ok_or(CompilerError::MalformedRoutine("cached field index vanished"))?;
                Ok(Slot::Ref(value))
            }
            CacheTarget::FieldStore(index) => {
                let object = object_of(&args[0])?;
                let value = args[1].clone();
                object.set_slot(*index, value.clone().into_value());
                Ok(value)
            }
        }
    }

    fn dispatch_slow(
        &self,
        kind: DispatchKind,
        args: ArgBuffer,
        may_install: bool,
    ) -> Result<Slot, Error> {
        match kind {
            DispatchKind::ClosureCall => self.dispatch_closure_call(args, may_install),
            DispatchKind::DirectCall(id) => dispatch_direct_call(id, &self.signature, args),
            DispatchKind::FieldGet(field) => self.dispatch_field_get(&field, args, may_install),
            DispatchKind::FieldSet(field) => self.dispatch_field_set(&field, args, may_install),
        }
    }

    fn dispatch_closure_call(&self, args: ArgBuffer, may_install: bool) -> Result<Slot, Error> {
        let closure = closure_of(&args[0])?;
        if args.len() - 1 != closure.nexus.arity() {
            return Err(RuntimeError::WrongArity {
                expected: closure.nexus.arity(),
                actual: args.len() - 1,
            }
            .into());
        }
        match closure.nexus.compiled_code() {
            Some(code) => {
                let target = optimal_target(&closure, &code, &self.signature);
                // Function identity is only a sufficient guard when the
                // closure carries no copied values.
                if may_install && !self.is_megamorphic() && closure.copied_values.is_empty() {
                    self.add_cache_entry(
                        CacheGuard::SameFunction {
                            function: closure.nexus.clone(),
                            generation: closure.nexus.generation(),
                        },
                        target.clone(),
                    );
                }
                self.run_target(&target, args)
            }
            None => {
                // Not compiled yet: an inline cache would lock in the slow
                // form, and we can do better once compilation happens.
                let values: SmallVec<[Value; MAX_INLINED_ARGS]> = args[1..]
                    .iter()
                    .map(|slot| slot.clone().into_value())
                    .collect();
                closure
                    .nexus
                    .call(&closure.copied_values, &values)
                    .map(Slot::Ref)
            }
        }
    }

    fn dispatch_field_get(
        &self,
        field: &str,
        args: ArgBuffer,
        may_install: bool,
    ) -> Result<Slot, Error> {
        let object = object_of(&args[0])?;
        let layout = object.layout();
        match layout.index_of(field) {
            Some(index) => {
                if may_install && !self.is_megamorphic() {
                    self.add_cache_entry(
                        CacheGuard::SameLayout(layout),
                        CacheTarget::FieldLoad(index),
                    );
                }
                let value = object
                    .get_slot(index)
                    .ok_or(CompilerError::MalformedRoutine("field index out of range"))?;
                Ok(Slot::Ref(value))
            }
            None => Err(RuntimeError::NoSuchField(field.to_string()).into()),
        }
    }

    fn dispatch_field_set(
        &self,
        field: &str,
        args: ArgBuffer,
        may_install: bool,
    ) -> Result<Slot, Error> {
        let object = object_of(&args[0])?;
        let value = args[1].clone();
        let layout = object.layout();
        match layout.index_of(field) {
            Some(index) => {
                if may_install && !self.is_megamorphic() {
                    self.add_cache_entry(
                        CacheGuard::SameLayout(layout),
                        CacheTarget::FieldStore(index),
                    );
                }
                object.set_slot(index, value.clone().into_value());
            }
            None => {
                // First store of a fresh field grows the layout; nothing is
                // cached against the layout being replaced.
                object.set(field, value.clone().into_value());
            }
        }
        Ok(value)
    }
}

impl fmt::Debug for InlineCachingCallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineCachingCallSite")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("dispatch", &self.dispatch)
            .field("cache_size", &self.cache_size())
            .field("megamorphic", &self.is_megamorphic())
            .finish()
    }
}

fn closure_of(receiver: &Slot) -> Result<Arc<Closure>, RuntimeError> {
    match receiver {
        Slot::Ref(Value::Closure(closure)) => Ok(closure.clone()),
        other => Err(RuntimeError::NotAFunction(
            other.clone().into_value().to_string(),
        )),
    }
}

fn object_of(receiver: &Slot) -> Result<Arc<FixedObject>, RuntimeError> {
    match receiver {
        Slot::Ref(Value::Object(object)) => Ok(object.clone()),
        other => Err(RuntimeError::NotAnObject(
            other.clone().into_value().to_string(),
        )),
    }
}

/// The best invoker of a compiled closure for a call site of this type:
/// the specialized routine when every parameter category matches, else the
/// generic routine.
fn optimal_target(
    closure: &Closure,
    code: &crate::runtime::nexus::CompiledCode,
    site: &Signature,
) -> CacheTarget {
    if let Some(specialized) = &code.specialized {
        let graph = closure.nexus.graph();
        let synth_count = graph.synthetic_params.len();
        let params = &specialized.signature.params;
        let declared_cats = &params[synth_count..];
        let site_args = &site.params[1..];
        let declared_match = declared_cats == site_args;
        let copied_match = closure.copied_values.len() == synth_count
            && closure
                .copied_values
                .iter()
                .zip(params[..synth_count].iter())
                .all(|(value, cat)| *cat == Cat::Ref || value.category() == *cat);
        if declared_match && copied_match {
            return CacheTarget::Specialized(closure.nexus.clone());
        }
    }
    CacheTarget::Generic(closure.nexus.clone())
}

fn dispatch_direct_call(
    id: FunctionId,
    site: &Signature,
    args: ArgBuffer,
) -> Result<Slot, Error> {
    let nexus = registry::lookup_function(id).ok_or(RuntimeError::UnknownFunction(id.0))?;
    if args.len() != nexus.arity() {
        return Err(RuntimeError::WrongArity {
            expected: nexus.arity(),
            actual: args.len(),
        }
        .into());
    }
    match nexus.compiled_code() {
        Some(code) => {
            let specialized = code
                .specialized
                .as_ref()
                .map(|s| s.signature.params == site.params)
                .unwrap_or(false);
            nexus.invoke_compiled(specialized, &[], &args)
        }
        None => {
            let values: SmallVec<[Value; MAX_INLINED_ARGS]> =
                args.iter().map(|slot| slot.clone().into_value()).collect();
            nexus.call(&[], &values).map(Slot::Ref)
        }
    }
}

pub fn closure_call_bootstrap(
    name: &str,
    signature: &Signature,
    _static_args: &[BootstrapArg],
) -> Result<Arc<InlineCachingCallSite>, CompilerError> {
    Ok(Arc::new(InlineCachingCallSite::new(
        name,
        signature.clone(),
        DispatchKind::ClosureCall,
        None,
    )))
}

pub fn direct_call_bootstrap(
    name: &str,
    signature: &Signature,
    static_args: &[BootstrapArg],
) -> Result<Arc<InlineCachingCallSite>, CompilerError> {
    match static_args {
        [BootstrapArg::Function(id)] => Ok(Arc::new(InlineCachingCallSite::new(
            name,
            signature.clone(),
            DispatchKind::DirectCall(*id),
            None,
        ))),
        _ => Err(CompilerError::MissingBootstrapArgument),
    }
}

pub fn field_get_bootstrap(
    name: &str,
    signature: &Signature,
    static_args: &[BootstrapArg],
) -> Result<Arc<InlineCachingCallSite>, CompilerError> {
    match static_args {
        [BootstrapArg::Field(field)] => Ok(Arc::new(InlineCachingCallSite::new(
            name,
            signature.clone(),
            DispatchKind::FieldGet(field.clone()),
            None,
        ))),
        _ => Err(CompilerError::MissingBootstrapArgument),
    }
}

pub fn field_set_bootstrap(
    name: &str,
    signature: &Signature,
    static_args: &[BootstrapArg],
) -> Result<Arc<InlineCachingCallSite>, CompilerError> {
    match static_args {
        [BootstrapArg::Field(field)] => Ok(Arc::new(InlineCachingCallSite::new(
            name,
            signature.clone(),
            DispatchKind::FieldSet(field.clone()),
            None,
        ))),
        _ => Err(CompilerError::MissingBootstrapArgument),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> InlineCachingCallSite {
        InlineCachingCallSite::new(
            "test",
            Signature::generic(1),
            DispatchKind::ClosureCall,
            None,
        )
    }

    fn dummy_entry() -> (CacheGuard, CacheTarget) {
        let layout = ObjectLayout::empty();
        (CacheGuard::SameLayout(layout), CacheTarget::FieldLoad(0))
    }

    #[test]
    fn cache_count_is_bounded() {
        let site = site();
        for _ in 0..10 {
            let (guard, target) = dummy_entry();
            site.add_cache_entry(guard, target);
        }
        assert!(site.cache_size() <= CACHE_LIMIT + 1);
        assert_eq!(site.cache_size(), CACHE_LIMIT + 1);
    }

    #[test]
    fn megamorphic_transition_collapses_the_chain_and_sticks() {
        let site = site();
        for i in 0..CACHE_LIMIT {
            let (guard, target) = dummy_entry();
            site.add_cache_entry(guard, target);
            assert_eq!(site.entry_count(), i + 1);
            assert!(!site.is_megamorphic());
        }
        let (guard, target) = dummy_entry();
        site.add_cache_entry(guard, target);
        assert!(site.is_megamorphic());
        assert_eq!(site.entry_count(), 0);

        let (guard, target) = dummy_entry();
        site.add_cache_entry(guard, target);
        assert!(site.is_megamorphic());
        assert_eq!(site.cache_size(), CACHE_LIMIT + 1);
    }

    #[test]
    fn reset_returns_to_the_original_dispatch() {
        let site = site();
        for _ in 0..5 {
            let (guard, target) = dummy_entry();
            site.add_cache_entry(guard, target);
        }
        assert!(site.is_megamorphic());
        site.reset();
        assert!(!site.is_megamorphic());
        assert_eq!(site.cache_size(), 0);
        assert_eq!(site.entry_count(), 0);
    }
}
