//! The compilation driver.
//!
//! Compiling a function covers it and every function lowered from lambdas
//! nested inside it. Types are inferred to a fixpoint across the whole
//! group, the planner runs its pre-generic phase, generic routines are
//! generated, the planner folds in profile observations, and functions the
//! planner finds worth it additionally get a recovery routine and a
//! specialized routine whose square-peg handlers enter it. Everything is
//! installed per function under its nexus; installing over an existing form
//! bumps that function's generation.

mod generic;
mod specialized;

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::CompilerError;
use crate::graph::{infer, specialize};
use crate::runtime::nexus::{CompileState, CompiledCode, Nexus};

/// Compilation is rare and never on the fast path; one process-wide lock
/// serializes it, which also keeps shared annotations of copied variables
/// coherent across concurrently triggered compiles.
static COMPILE_LOCK: Mutex<()> = Mutex::new(());

/// Upper bound on cross-function inference rounds; the lattice height
/// bounds real convergence far below this.
const MAX_INFERENCE_ROUNDS: usize = 8;

/// Compiles a function and every function nested inside it.
pub fn compile(nexus: &Arc<Nexus>) -> Result<(), CompilerError> {
    let _guard = COMPILE_LOCK.lock();

    let mut targets = Vec::new();
    collect(nexus, &mut targets);
    debug!(
        "compiling {} ({} function{})",
        nexus.name(),
        targets.len(),
        if targets.len() == 1 { "" } else { "s" }
    );
    for target in &targets {
        target.set_state(CompileState::Compiling);
    }

    let mut rounds = 0;
    loop {
        let mut changed = false;
        for target in &targets {
            changed |= infer::infer_types(target.graph())?;
        }
        if !changed {
            break;
        }
        rounds += 1;
        if rounds > MAX_INFERENCE_ROUNDS {
            return Err(CompilerError::InferenceLoop);
        }
    }

    for target in &targets {
        specialize::plan_pre_generic(target.graph());
    }
    let mut generics = Vec::with_capacity(targets.len());
    for target in &targets {
        generics.push(Arc::new(generic::generate_generic(target)?));
    }

    for target in &targets {
        specialize::plan_pre_specialized(target.graph(), &target.profile);
    }
    for (target, generic_routine) in targets.iter().zip(generics) {
        let (specialized, recovery) = if specialize::can_be_specialized(target.graph()) {
            let recovery = if target.graph().recovery_site_count > 0 {
                Some(Arc::new(generic::generate_recovery(target)?))
            } else {
                None
            };
            let routine = specialized::generate_specialized(target, recovery.clone())?;
            (Some(Arc::new(routine)), recovery)
        } else {
            debug!("{} stays generic-only", target.name());
            (None, None)
        };
        target.install_compiled(CompiledCode {
            generic: generic_routine,
            specialized,
            recovery,
        });
    }
    Ok(())
}

fn collect(nexus: &Arc<Nexus>, out: &mut Vec<Arc<Nexus>>) {
    out.push(nexus.clone());
    for inner in &nexus.graph().inner_functions {
        collect(inner, out);
    }
}
