use std::sync::Arc;

use crate::bytecode::instr::{Instr, IntCmp, PegRegion, Routine, Signature};
use crate::error::CompilerError;
use crate::runtime::call_site::InlineCachingCallSite;
use crate::runtime::registry::FunctionId;
use crate::types::Cat;

/// A forward-patchable code label.
pub type Label = usize;

/// Static arguments a call-site bootstrap receives alongside the site name
/// and signature.
#[derive(Debug, Clone)]
pub enum BootstrapArg {
    Function(FunctionId),
    Field(Arc<str>),
}

/// A call-site bootstrap: invoked once per invoke-dynamic emission, it
/// returns the mutable call site the instruction will dispatch through.
pub type Bootstrap =
    fn(&str, &Signature, &[BootstrapArg]) -> Result<Arc<InlineCachingCallSite>, CompilerError>;

/// Assembles one routine: instruction emission, label patching, square-peg
/// try regions, and recovery-site entry points.
pub struct RoutineWriter {
    name: Arc<str>,
    signature: Signature,
    frame_size: usize,
    code: Vec<Instr>,
    labels: Vec<Option<usize>>,
    peg_regions: Vec<(usize, usize, Label)>,
    recovery_entries: Vec<usize>,
}

impl RoutineWriter {
    pub fn new(
        name: impl Into<Arc<str>>,
        signature: Signature,
        frame_size: usize,
        recovery_site_count: usize,
    ) -> RoutineWriter {
        RoutineWriter {
            name: name.into(),
            signature,
            frame_size,
            code: Vec::new(),
            labels: Vec::new(),
            peg_regions: Vec::new(),
            recovery_entries: vec![usize::MAX; recovery_site_count],
        }
    }

    pub fn emit(&mut self, instr: Instr) -> &mut Self {
        self.code.push(instr);
        self
    }

    /// The offset the next emitted instruction will occupy.
    pub fn mark(&self) -> usize {
        self.code.len()
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        self.labels.len() - 1
    }

    pub fn bind(&mut self, label: Label) {
        self.labels[label] = Some(self.code.len());
    }

    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.emit(Instr::Jump(label))
    }

    pub fn jump_if_false(&mut self, label: Label) -> &mut Self {
        self.emit(Instr::JumpIfFalse(label))
    }

    pub fn int_compare_branch(&mut self, cmp: IntCmp, jump_if_false: Label) -> &mut Self {
        self.emit(Instr::IntCompareBranch { cmp, jump_if_false })
    }

    pub fn load_local(&mut self, cat: Cat, index: usize) -> &mut Self {
        self.emit(Instr::LoadLocal { cat, index })
    }

    pub fn store_local(&mut self, cat: Cat, index: usize) -> &mut Self {
        self.emit(Instr::StoreLocal { cat, index })
    }

    /// Emits a two-armed conditional over the bool slot on the stack.
    pub fn if_then_else(
        &mut self,
        then_arm: impl FnOnce(&mut RoutineWriter) -> Result<(), CompilerError>,
        else_arm: impl FnOnce(&mut RoutineWriter) -> Result<(), CompilerError>,
    ) -> Result<(), CompilerError> {
        let else_start = self.new_label();
        let end = self.new_label();
        self.jump_if_false(else_start);
        then_arm(self)?;
        self.jump(end);
        self.bind(else_start);
        else_arm(self)?;
        self.bind(end);
        Ok(())
    }

    /// Registers a square-peg try region; the handler label may be bound
    /// later, after the routine's main body.
    pub fn add_peg_region(&mut self, start: usize, end: usize, handler: Label) {
        self.peg_regions.push((start, end, handler));
    }

    /// Records the recovery continuation for a site at the current offset.
    pub fn set_recovery_entry(&mut self, site: usize) {
        self.recovery_entries[site] = self.code.len();
    }

    /// Emits an invoke-dynamic: the bootstrap receives the name, the site
    /// signature, and the static arguments, and returns the call site the
    /// emitted instruction will forever dispatch through.
    pub fn invoke_dynamic(
        &mut self,
        bootstrap: Bootstrap,
        name: &str,
        signature: Signature,
        static_args: &[BootstrapArg],
    ) -> Result<(), CompilerError> {
        let argc = signature.params.len();
        let site = bootstrap(name, &signature, static_args)?;
        self.emit(Instr::InvokeDynamic { site, argc });
        Ok(())
    }

    /// Patches labels and produces the finished routine.
    pub fn finish(self) -> Result<Routine, CompilerError> {
        let RoutineWriter {
            name,
            signature,
            frame_size,
            mut code,
            labels,
            peg_regions,
            recovery_entries,
        } = self;
        let resolve = |label: usize| -> Result<usize, CompilerError> {
            labels
                .get(label)
                .copied()
                .flatten()
                .ok_or(CompilerError::MalformedRoutine("unbound label"))
        };
        for instr in &mut code {
            match instr {
                Instr::Jump(target) | Instr::JumpIfFalse(target) => *target = resolve(*target)?,
                Instr::IntCompareBranch { jump_if_false, .. } => {
                    *jump_if_false = resolve(*jump_if_false)?
                }
                _ => {}
            }
        }
        let peg_regions = peg_regions
            .into_iter()
            .map(|(start, end, handler)| {
                Ok(PegRegion {
                    start,
                    end,
                    handler: resolve(handler)?,
                })
            })
            .collect::<Result<Vec<_>, CompilerError>>()?;
        Ok(Routine {
            name,
            signature,
            code,
            peg_regions,
            recovery_entries,
            frame_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_patched_to_offsets() {
        let mut writer = RoutineWriter::new("t", Signature::generic(0), 0, 0);
        let end = writer.new_label();
        writer.emit(Instr::LoadBool(true));
        writer.jump_if_false(end);
        writer.emit(Instr::LoadInt(1));
        writer.bind(end);
        writer.emit(Instr::Return(Cat::Int));
        let routine = writer.finish().unwrap();
        match routine.code[1] {
            Instr::JumpIfFalse(target) => assert_eq!(target, 3),
            ref other => panic!("expected a conditional jump, got {:?}", other),
        }
    }

    #[test]
    fn unbound_label_is_a_compiler_error() {
        let mut writer = RoutineWriter::new("t", Signature::generic(0), 0, 0);
        let dangling = writer.new_label();
        writer.jump(dangling);
        assert!(matches!(
            writer.finish(),
            Err(CompilerError::MalformedRoutine(_))
        ));
    }

    #[test]
    fn if_then_else_shapes_the_branches() {
        let mut writer = RoutineWriter::new("t", Signature::generic(0), 0, 0);
        writer.emit(Instr::LoadBool(true));
        writer
            .if_then_else(
                |w| {
                    w.emit(Instr::LoadInt(1));
                    Ok(())
                },
                |w| {
                    w.emit(Instr::LoadInt(2));
                    Ok(())
                },
            )
            .unwrap();
        writer.emit(Instr::Return(Cat::Int));
        let routine = writer.finish().unwrap();
        // load, branch, then, jump-over, else, return
        assert_eq!(routine.code.len(), 6);
    }
}
