//! The per-function nexus of representation and execution.
//!
//! A nexus owns a function's evaluator graph, its profile, and whatever
//! compiled forms exist, and routes every invocation to the best of them.
//! Interpreted invocations count toward the profiling threshold; crossing
//! it triggers compilation, synchronous with the triggering call.
//! Installing a replacement compiled form bumps the generation counter,
//! which invalidates every inline-cache entry guarded on the old
//! generation without enumerating the sites that hold them.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use log::debug;
use parking_lot::RwLock;

use crate::bytecode::instr::Routine;
use crate::compiler;
use crate::error::{CompilerError, Error, RuntimeError};
use crate::graph::FunctionGraph;
use crate::interp;
use crate::profile::FunctionProfile;
use crate::runtime::machine::{self, Slot};
use crate::runtime::registry::FunctionId;
use crate::runtime::value::Value;
use crate::types::Cat;

/// Interpreted invocations a function absorbs before it is compiled.
pub const PROFILING_THRESHOLD: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompileState {
    Interpreted = 0,
    Compiling = 1,
    Compiled = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecMode {
    /// Record observations while interpreting; the default.
    Profiling = 0,
    /// Plain tree-walk; the oracle mode used by tests.
    Simple = 1,
}

/// The compiled forms of one function. Installed whole and never mutated;
/// replacement installs a fresh set under a new generation.
#[derive(Debug)]
pub struct CompiledCode {
    pub generic: Arc<Routine>,
    pub specialized: Option<Arc<Routine>>,
    pub recovery: Option<Arc<Routine>>,
}

#[derive(Debug)]
pub struct Nexus {
    graph: FunctionGraph,
    pub profile: FunctionProfile,
    id: OnceLock<FunctionId>,
    state: AtomicU8,
    mode: AtomicU8,
    generation: AtomicU64,
    compiled: RwLock<Option<Arc<CompiledCode>>>,
}

impl Nexus {
    pub(crate) fn new(graph: FunctionGraph) -> Arc<Nexus> {
        Arc::new(Nexus {
            graph,
            profile: FunctionProfile::new(),
            id: OnceLock::new(),
            state: AtomicU8::new(CompileState::Interpreted as u8),
            mode: AtomicU8::new(ExecMode::Profiling as u8),
            generation: AtomicU64::new(0),
            compiled: RwLock::new(None),
        })
    }

    pub fn graph(&self) -> &FunctionGraph {
        &self.graph
    }

    pub fn name(&self) -> &str {
        &self.graph.name
    }

    pub fn id(&self) -> Option<FunctionId> {
        self.id.get().copied()
    }

    pub(crate) fn assign_id(&self, id: FunctionId) {
        let _ = self.id.set(id);
    }

    pub fn arity(&self) -> usize {
        self.graph.arity()
    }

    pub fn state(&self) -> CompileState {
        match self.state.load(Ordering::Acquire) {
            0 => CompileState::Interpreted,
            1 => CompileState::Compiling,
            _ => CompileState::Compiled,
        }
    }

    pub(crate) fn set_state(&self, state: CompileState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn execution_mode(&self) -> ExecMode {
        if self.mode.load(Ordering::Relaxed) == ExecMode::Simple as u8 {
            ExecMode::Simple
        } else {
            ExecMode::Profiling
        }
    }

    /// Switches between the profiling interpreter and the simple oracle for
    /// not-yet-compiled execution.
    pub fn set_execution_mode(&self, mode: ExecMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    /// The compiled-form generation. Inline-cache guards compare against
    /// the generation they saw at install time.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn compiled_code(&self) -> Option<Arc<CompiledCode>> {
        self.compiled.read().clone()
    }

    pub(crate) fn install_compiled(&self, code: CompiledCode) {
        let mut slot = self.compiled.write();
        if slot.is_some() {
            // Replacement: invalidate every direct link to the old forms.
            self.generation.fetch_add(1, Ordering::AcqRel);
            debug!(
                "replacing compiled forms of {} (generation {})",
                self.name(),
                self.generation()
            );
        }
        *slot = Some(Arc::new(code));
        self.set_state(CompileState::Compiled);
    }

    /// Invokes this function with copied values and boxed arguments,
    /// through the best available form. The caller has checked arity.
    pub fn call(self: &Arc<Self>, copied: &[Value], args: &[Value]) -> Result<Value, Error> {
        if let Some(code) = self.compiled_code() {
            if let Some(specialized) = &code.specialized {
                if let Some(frame) = self.specialized_frame(specialized, copied, args) {
                    return machine::run(specialized, frame).map(Slot::into_value);
                }
            }
            let frame = self.generic_frame(copied, args);
            return machine::run(&code.generic, frame).map(Slot::into_value);
        }

        let profiling = self.execution_mode() == ExecMode::Profiling;
        let result = interp::execute(self, copied, args, profiling)?;
        if profiling
            && self.profile.invocation_count() > PROFILING_THRESHOLD
            && self.state() == CompileState::Interpreted
        {
            debug!(
                "{} crossed the profiling threshold after {} invocations",
                self.name(),
                self.profile.invocation_count()
            );
            compiler::compile(self)?;
        }
        Ok(result)
    }

    /// Forces compilation now, regardless of the invocation count.
    /// Recompiling an already-compiled function installs a new generation.
    pub fn force_compile(self: &Arc<Self>) -> Result<(), Error> {
        compiler::compile(self)?;
        Ok(())
    }

    /// Runs the generic routine, bypassing tier selection.
    pub fn invoke_generic(self: &Arc<Self>, args: &[Value]) -> Result<Value, Error> {
        let code = self
            .compiled_code()
            .ok_or(CompilerError::MalformedRoutine("function is not compiled"))?;
        self.check_arity(args.len())?;
        let frame = self.generic_frame(&[], args);
        machine::run(&code.generic, frame).map(Slot::into_value)
    }

    /// Runs the specialized routine, bypassing tier selection. Fails when
    /// no specialized form exists or the arguments do not fit its
    /// categories.
    pub fn invoke_specialized(self: &Arc<Self>, args: &[Value]) -> Result<Value, Error> {
        let code = self
            .compiled_code()
            .ok_or(CompilerError::MalformedRoutine("function is not compiled"))?;
        let routine = code
            .specialized
            .as_ref()
            .ok_or(CompilerError::MalformedRoutine("no specialized form"))?;
        self.check_arity(args.len())?;
        let frame = self
            .specialized_frame(routine, &[], args)
            .ok_or(CompilerError::MalformedRoutine("argument categories do not match"))?;
        machine::run(routine, frame).map(Slot::into_value)
    }

    fn check_arity(&self, actual: usize) -> Result<(), Error> {
        if actual != self.arity() {
            return Err(RuntimeError::WrongArity {
                expected: self.arity(),
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Invokes a compiled form with slot arguments from a call site.
    pub(crate) fn invoke_compiled(
        self: &Arc<Self>,
        specialized: bool,
        copied: &[Value],
        args: &[Slot],
    ) -> Result<Slot, Error> {
        let code = match self.compiled_code() {
            Some(code) => code,
            None => {
                // Compiled forms are never uninstalled; reaching here means
                // the caller raced a reset that does not exist. Fall back.
                let values: Vec<Value> =
                    args.iter().map(|slot| slot.clone().into_value()).collect();
                return self.call(copied, &values).map(Slot::Ref);
            }
        };
        if specialized {
            if let Some(routine) = &code.specialized {
                if let Some(frame) = self.specialized_slot_frame(routine, copied, args) {
                    return machine::run(routine, frame);
                }
            }
        }
        let values: Vec<Value> = args.iter().map(|slot| slot.clone().into_value()).collect();
        let frame = self.generic_frame(copied, &values);
        machine::run(&code.generic, frame)
    }

    fn generic_frame(&self, copied: &[Value], args: &[Value]) -> Vec<Slot> {
        let mut frame = Vec::with_capacity(self.graph.frame_size);
        frame.extend(copied.iter().cloned().map(Slot::Ref));
        frame.extend(args.iter().cloned().map(Slot::Ref));
        frame.resize(self.graph.frame_size, Slot::Ref(Value::Null));
        frame
    }

    /// Builds a specialized frame from boxed values, or reports a category
    /// mismatch by returning nothing.
    fn specialized_frame(
        &self,
        routine: &Routine,
        copied: &[Value],
        args: &[Value],
    ) -> Option<Vec<Slot>> {
        let params = &routine.signature.params;
        if copied.len() + args.len() != params.len() {
            return None;
        }
        let mut frame = Vec::with_capacity(self.graph.frame_size);
        for (value, cat) in copied.iter().chain(args.iter()).zip(params.iter()) {
            frame.push(Slot::from_value(*cat, value.clone())?);
        }
        frame.resize(self.graph.frame_size, Slot::Ref(Value::Null));
        Some(frame)
    }

    /// Builds a specialized frame from slot arguments already categorized
    /// by the call site.
    fn specialized_slot_frame(
        &self,
        routine: &Routine,
        copied: &[Value],
        args: &[Slot],
    ) -> Option<Vec<Slot>> {
        let params = &routine.signature.params;
        if copied.len() + args.len() != params.len() {
            return None;
        }
        let mut frame = Vec::with_capacity(self.graph.frame_size);
        for (value, cat) in copied.iter().zip(params.iter()) {
            frame.push(Slot::from_value(*cat, value.clone())?);
        }
        for (slot, cat) in args.iter().zip(params[copied.len()..].iter()) {
            frame.push(coerce_slot(*cat, slot.clone())?);
        }
        frame.resize(self.graph.frame_size, Slot::Ref(Value::Null));
        Some(frame)
    }
}

fn coerce_slot(cat: Cat, slot: Slot) -> Option<Slot> {
    if slot.category() == cat {
        return Some(slot);
    }
    match (cat, slot) {
        (Cat::Int, Slot::Ref(Value::Int(n))) => Some(Slot::Int(n)),
        (Cat::Bool, Slot::Ref(Value::Bool(b))) => Some(Slot::Bool(b)),
        (Cat::Ref, slot) => Some(Slot::Ref(slot.into_value())),
        _ => None,
    }
}
