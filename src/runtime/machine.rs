//! Executes emitted routines.
//!
//! The operand stack and frame hold tagged slots, so specialized code works
//! on unboxed primitives while generic code stays all-reference. A square
//! peg is an internal signal raised by a narrowing bridge; it transfers to
//! the innermost covering try region, whose handler finishes the activation
//! in the recovery routine. A peg no region covers has already reached the
//! return tail, so the carried value *is* the routine's deoptimized result.

use log::trace;
use smallvec::SmallVec;

use crate::bytecode::instr::{Instr, Routine};
use crate::error::{CompilerError, Error, RuntimeError};
use crate::runtime::closure::Closure;
use crate::runtime::registry;
use crate::runtime::value::{Value, ValueCell};
use crate::types::Cat;

/// One stack or frame slot: a boxed reference or an unboxed primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Ref(Value),
    Int(i64),
    Bool(bool),
}

impl Slot {
    pub fn category(&self) -> Cat {
        match self {
            Slot::Ref(_) => Cat::Ref,
            Slot::Int(_) => Cat::Int,
            Slot::Bool(_) => Cat::Bool,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Slot::Ref(value) => value,
            Slot::Int(n) => Value::Int(n),
            Slot::Bool(b) => Value::Bool(b),
        }
    }

    /// Converts a value into a slot of the requested category, or reports
    /// the mismatch.
    pub fn from_value(cat: Cat, value: Value) -> Option<Slot> {
        match (cat, value) {
            (Cat::Int, Value::Int(n)) => Some(Slot::Int(n)),
            (Cat::Bool, Value::Bool(b)) => Some(Slot::Bool(b)),
            (Cat::Int, _) | (Cat::Bool, _) => None,
            (_, value) => Some(Slot::Ref(value)),
        }
    }

    /// The integer inside this slot, unboxing a reference if needed.
    pub fn as_int(&self) -> Result<i64, RuntimeError> {
        match self {
            Slot::Int(n) => Ok(*n),
            Slot::Ref(Value::Int(n)) => Ok(*n),
            other => Err(RuntimeError::IntegerExpected(
                other.clone().into_value().to_string(),
            )),
        }
    }
}

enum Signal {
    Peg(Value),
    Error(Error),
}

impl From<RuntimeError> for Signal {
    fn from(e: RuntimeError) -> Signal {
        Signal::Error(Error::Runtime(e))
    }
}

impl From<CompilerError> for Signal {
    fn from(e: CompilerError) -> Signal {
        Signal::Error(Error::Compiler(e))
    }
}

impl From<Error> for Signal {
    fn from(e: Error) -> Signal {
        Signal::Error(e)
    }
}

/// Runs a routine from its entry point.
pub(crate) fn run(routine: &Routine, frame: Vec<Slot>) -> Result<Slot, Error> {
    execute(routine, frame, 0, Vec::new())
}

/// Enters a recovery routine at a site's continuation: the frame is the
/// spilled activation, the stack holds only the in-flight value.
pub(crate) fn run_recovery(
    routine: &Routine,
    frame: Vec<Slot>,
    value: Value,
    site: usize,
) -> Result<Slot, Error> {
    let entry = routine
        .recovery_entries
        .get(site)
        .copied()
        .filter(|ip| *ip < routine.code.len())
        .ok_or(CompilerError::MalformedRoutine("bad recovery site"))?;
    execute(routine, frame, entry, vec![Slot::Ref(value)])
}

fn execute(
    routine: &Routine,
    mut frame: Vec<Slot>,
    mut ip: usize,
    mut stack: Vec<Slot>,
) -> Result<Slot, Error> {
    loop {
        let instr = routine
            .code
            .get(ip)
            .ok_or(CompilerError::MalformedRoutine("fell off routine end"))?;
        match step(instr, &mut frame, &mut stack) {
            Ok(Flow::Next) => ip += 1,
            Ok(Flow::Jump(target)) => ip = target,
            Ok(Flow::Return(slot)) => return Ok(slot),
            Err(Signal::Error(e)) => return Err(e),
            Err(Signal::Peg(value)) => match routine.covering_region(ip) {
                Some(region) => {
                    trace!("square peg in {} at {}, deoptimizing", routine.name, ip);
                    stack.clear();
                    stack.push(Slot::Ref(value));
                    ip = region.handler;
                }
                None => {
                    // The value has reached the return tail in generic form.
                    trace!("square peg escaped {} at {}", routine.name, ip);
                    return Ok(Slot::Ref(value));
                }
            },
        }
    }
}

enum Flow {
    Next,
    Jump(usize),
    Return(Slot),
}

fn pop(stack: &mut Vec<Slot>) -> Result<Slot, Signal> {
    stack
        .pop()
        .ok_or_else(|| CompilerError::MalformedRoutine("operand stack underflow").into())
}

fn pop_int(stack: &mut Vec<Slot>) -> Result<i64, Signal> {
    match pop(stack)? {
        Slot::Int(n) => Ok(n),
        _ => Err(CompilerError::MalformedRoutine("expected an int slot").into()),
    }
}

fn step(instr: &Instr, frame: &mut [Slot], stack: &mut Vec<Slot>) -> Result<Flow, Signal> {
    match instr {
        Instr::LoadInt(n) => stack.push(Slot::Int(*n)),
        Instr::LoadBool(b) => stack.push(Slot::Bool(*b)),
        Instr::LoadConst(value) => stack.push(Slot::Ref(value.clone())),
        Instr::LoadDefault(cat) => stack.push(match cat {
            Cat::Int => Slot::Int(0),
            Cat::Bool => Slot::Bool(false),
            _ => Slot::Ref(Value::Null),
        }),
        Instr::LoadLocal { index, .. } => stack.push(frame[*index].clone()),
        Instr::StoreLocal { index, .. } => frame[*index] = pop(stack)?,
        Instr::NewCell { index } => {
            let value = pop(stack)?.into_value();
            frame[*index] = Slot::Ref(Value::Cell(ValueCell::new(value)));
        }
        Instr::StoreCell { index } => {
            let value = pop(stack)?.into_value();
            match &frame[*index] {
                Slot::Ref(Value::Cell(cell)) => cell.set(value),
                _ => {
                    return Err(
                        CompilerError::MalformedRoutine("store to a non-cell slot").into()
                    )
                }
            }
        }
        Instr::LoadCellValue { index } => match &frame[*index] {
            Slot::Ref(Value::Cell(cell)) => stack.push(Slot::Ref(cell.get())),
            _ => return Err(CompilerError::MalformedRoutine("load from a non-cell slot").into()),
        },
        Instr::Box(_) => {
            let value = pop(stack)?.into_value();
            stack.push(Slot::Ref(value));
        }
        Instr::BridgeInt => match pop(stack)? {
            Slot::Int(n) => stack.push(Slot::Int(n)),
            Slot::Ref(Value::Int(n)) => stack.push(Slot::Int(n)),
            other => return Err(Signal::Peg(other.into_value())),
        },
        Instr::BridgeBool => match pop(stack)? {
            Slot::Bool(b) => stack.push(Slot::Bool(b)),
            Slot::Ref(Value::Bool(b)) => stack.push(Slot::Bool(b)),
            other => return Err(Signal::Peg(other.into_value())),
        },
        Instr::AssertBool => match pop(stack)? {
            Slot::Bool(b) => stack.push(Slot::Bool(b)),
            Slot::Ref(Value::Bool(b)) => stack.push(Slot::Bool(b)),
            other => {
                return Err(RuntimeError::ConditionNotBoolean(
                    other.into_value().to_string(),
                )
                .into())
            }
        },
        Instr::Pop => {
            pop(stack)?;
        }
        Instr::Dup => {
            let top = stack
                .last()
                .cloned()
                .ok_or(CompilerError::MalformedRoutine("dup on empty stack"))?;
            stack.push(top);
        }
        Instr::Jump(target) => return Ok(Flow::Jump(*target)),
        Instr::JumpIfFalse(target) => {
            let test = match pop(stack)? {
                Slot::Bool(b) => b,
                _ => return Err(CompilerError::MalformedRoutine("branch on non-bool").into()),
            };
            if !test {
                return Ok(Flow::Jump(*target));
            }
        }
        Instr::IntCompareBranch { cmp, jump_if_false } => {
            let b = pop_int(stack)?;
            let a = pop_int(stack)?;
            if !cmp.holds(a, b) {
                return Ok(Flow::Jump(*jump_if_false));
            }
        }
        Instr::IntAdd => {
            let b = pop_int(stack)?;
            let a = pop_int(stack)?;
            stack.push(Slot::Int(a.wrapping_add(b)));
        }
        Instr::IntSub => {
            let b = pop_int(stack)?;
            let a = pop_int(stack)?;
            stack.push(Slot::Int(a.wrapping_sub(b)));
        }
        Instr::IntMul => {
            let b = pop_int(stack)?;
            let a = pop_int(stack)?;
            stack.push(Slot::Int(a.wrapping_mul(b)));
        }
        Instr::IntNeg => {
            let a = pop_int(stack)?;
            stack.push(Slot::Int(a.wrapping_neg()));
        }
        Instr::IntCompare(cmp) => {
            let b = pop_int(stack)?;
            let a = pop_int(stack)?;
            stack.push(Slot::Bool(cmp.holds(a, b)));
        }
        Instr::InvokeStatic {
            arity, function, ..
        } => {
            let mut args: SmallVec<[Slot; 4]> = SmallVec::new();
            for _ in 0..*arity {
                args.push(pop(stack)?);
            }
            args.reverse();
            stack.push(function(&args)?);
        }
        Instr::InvokeDynamic { site, argc } => {
            let mut args: SmallVec<[Slot; 4]> = SmallVec::new();
            for _ in 0..*argc {
                args.push(pop(stack)?);
            }
            args.reverse();
            stack.push(site.invoke(args)?);
        }
        Instr::MakeClosure { function, count } => {
            let mut values = Vec::with_capacity(*count);
            for _ in 0..*count {
                values.push(pop(stack)?.into_value());
            }
            values.reverse();
            let nexus = registry::lookup_function(*function)
                .ok_or(RuntimeError::UnknownFunction(function.0))?;
            stack.push(Slot::Ref(Value::Closure(Closure::new(nexus, values))));
        }
        Instr::LoadFunction(function) => {
            let nexus = registry::lookup_function(*function)
                .ok_or(RuntimeError::UnknownFunction(function.0))?;
            stack.push(Slot::Ref(Value::Closure(Closure::new(nexus, Vec::new()))));
        }
        Instr::EnterRecovery { site, routine } => {
            let value = pop(stack)?.into_value();
            let spill = frame
                .iter()
                .map(|slot| Slot::Ref(slot.clone().into_value()))
                .collect();
            trace!("entering recovery of {} at site {}", routine.name, site);
            let result = run_recovery(routine, spill, value, *site)?;
            return Ok(Flow::Return(result));
        }
        Instr::Return(_) => return Ok(Flow::Return(pop(stack)?)),
    }
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instr::{IntCmp, PegRegion, Signature};

    fn routine(code: Vec<Instr>) -> Routine {
        Routine {
            name: "test".into(),
            signature: Signature::generic(0),
            code,
            peg_regions: Vec::new(),
            recovery_entries: Vec::new(),
            frame_size: 0,
        }
    }

    #[test]
    fn arithmetic_runs_on_unboxed_slots() {
        let r = routine(vec![
            Instr::LoadInt(40),
            Instr::LoadInt(2),
            Instr::IntAdd,
            Instr::Return(Cat::Int),
        ]);
        assert_eq!(run(&r, Vec::new()).unwrap(), Slot::Int(42));
    }

    #[test]
    fn bridge_unboxes_or_pegs() {
        let r = routine(vec![
            Instr::LoadConst(Value::Int(7)),
            Instr::BridgeInt,
            Instr::Return(Cat::Int),
        ]);
        assert_eq!(run(&r, Vec::new()).unwrap(), Slot::Int(7));

        // With no covering region, the peg value is the routine's result.
        let r = routine(vec![
            Instr::LoadConst(Value::Str("oops".into())),
            Instr::BridgeInt,
            Instr::Return(Cat::Int),
        ]);
        assert_eq!(
            run(&r, Vec::new()).unwrap(),
            Slot::Ref(Value::Str("oops".into()))
        );
    }

    #[test]
    fn peg_transfers_to_the_covering_region() {
        let mut r = routine(vec![
            Instr::LoadConst(Value::Str("oops".into())),
            Instr::BridgeInt,
            Instr::Return(Cat::Int),
            // handler: return the peg value boxed
            Instr::Return(Cat::Ref),
        ]);
        r.peg_regions.push(PegRegion {
            start: 0,
            end: 3,
            handler: 3,
        });
        assert_eq!(
            run(&r, Vec::new()).unwrap(),
            Slot::Ref(Value::Str("oops".into()))
        );
    }

    #[test]
    fn fused_compare_branches() {
        let compare = |a: i64, b: i64| {
            let r = routine(vec![
                Instr::LoadInt(a),
                Instr::LoadInt(b),
                Instr::IntCompareBranch {
                    cmp: IntCmp::Lt,
                    jump_if_false: 5,
                },
                Instr::LoadInt(7),
                Instr::Return(Cat::Int),
                Instr::LoadInt(9),
                Instr::Return(Cat::Int),
            ]);
            run(&r, Vec::new()).unwrap()
        };
        assert_eq!(compare(1, 2), Slot::Int(7));
        assert_eq!(compare(5, 2), Slot::Int(9));
    }

    #[test]
    fn condition_type_errors_are_runtime_errors_not_pegs() {
        let r = routine(vec![
            Instr::LoadConst(Value::Int(3)),
            Instr::AssertBool,
            Instr::Return(Cat::Bool),
        ]);
        match run(&r, Vec::new()) {
            Err(Error::Runtime(RuntimeError::ConditionNotBoolean(_))) => {}
            other => panic!("expected a condition error, got {:?}", other),
        }
    }
}
