use std::fmt;
use std::sync::Arc;

use crate::error::RuntimeError;
use crate::runtime::call_site::InlineCachingCallSite;
use crate::runtime::machine::Slot;
use crate::runtime::registry::FunctionId;
use crate::runtime::value::Value;
use crate::types::Cat;

/// Integer comparison selector shared by the plain compare instructions and
/// the fused compare-and-branch form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntCmp {
    Lt,
    Gt,
    Eq,
}

impl IntCmp {
    pub fn holds(self, a: i64, b: i64) -> bool {
        match self {
            IntCmp::Lt => a < b,
            IntCmp::Gt => a > b,
            IntCmp::Eq => a == b,
        }
    }
}

/// A statically-linked helper called by emitted code; the slow paths of
/// primitives whose operand categories include references.
pub type StaticFn = fn(&[Slot]) -> Result<Slot, RuntimeError>;

/// One instruction of an emitted routine.
///
/// Jump operands hold a writer label id until `RoutineWriter::finish`
/// patches them to instruction offsets.
#[derive(Debug, Clone)]
pub enum Instr {
    LoadInt(i64),
    LoadBool(bool),
    LoadConst(Value),
    /// Pushes the default value of a category: 0, false, or null.
    LoadDefault(Cat),
    LoadLocal { cat: Cat, index: usize },
    StoreLocal { cat: Cat, index: usize },
    /// Pops a value and stores a fresh one-slot cell holding it.
    NewCell { index: usize },
    /// Pops a value into the cell already stored at the slot.
    StoreCell { index: usize },
    /// Pushes the value contained in the cell stored at the slot.
    LoadCellValue { index: usize },
    /// Adapts a primitive slot to a reference slot. No-op on references.
    Box(Cat),
    /// Narrows to an int slot or raises a square peg carrying the value.
    BridgeInt,
    /// Narrows to a bool slot or raises a square peg carrying the value.
    BridgeBool,
    /// Narrows to a bool slot or raises a runtime error: a non-boolean
    /// condition is a user error, not a specialization miss.
    AssertBool,
    Pop,
    Dup,
    Jump(usize),
    /// Pops a bool slot; jumps when it is false.
    JumpIfFalse(usize),
    /// Fused integer compare-and-branch: pops two int slots, jumps when the
    /// comparison does not hold.
    IntCompareBranch { cmp: IntCmp, jump_if_false: usize },
    IntAdd,
    IntSub,
    IntMul,
    IntNeg,
    /// Pops two int slots, pushes the comparison result as a bool slot.
    IntCompare(IntCmp),
    InvokeStatic {
        name: &'static str,
        arity: usize,
        function: StaticFn,
    },
    /// Calls through the mutable call site baked into this instruction.
    /// `argc` counts every popped operand, the receiver included.
    InvokeDynamic {
        site: Arc<InlineCachingCallSite>,
        argc: usize,
    },
    /// Pops `count` copied values and materializes a closure over the
    /// registered function.
    MakeClosure { function: FunctionId, count: usize },
    /// Pushes a closure over a registered function with no copied values.
    LoadFunction(FunctionId),
    /// Square-peg handler tail: pops the peg value, spills the frame, and
    /// finishes this activation in the recovery routine at the given site.
    EnterRecovery {
        site: usize,
        routine: Arc<Routine>,
    },
    Return(Cat),
}

/// A square-peg try region: pegs raised in `[start, end)` transfer to
/// `handler` with the peg value as the only stack entry.
#[derive(Debug, Clone)]
pub struct PegRegion {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
}

/// Parameter and return categories of a routine or call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Cat>,
    pub ret: Cat,
}

impl Signature {
    pub fn new(params: Vec<Cat>, ret: Cat) -> Signature {
        Signature { params, ret }
    }

    pub fn generic(arity: usize) -> Signature {
        Signature::new(vec![Cat::Ref; arity], Cat::Ref)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, cat) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", cat)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// A finished emitted routine.
#[derive(Debug)]
pub struct Routine {
    pub name: Arc<str>,
    pub signature: Signature,
    pub code: Vec<Instr>,
    pub peg_regions: Vec<PegRegion>,
    /// Recovery-site index to entry offset; only populated on recovery
    /// routines.
    pub recovery_entries: Vec<usize>,
    pub frame_size: usize,
}

impl Routine {
    /// The innermost try region covering an instruction offset, if any.
    pub fn covering_region(&self, ip: usize) -> Option<&PegRegion> {
        self.peg_regions
            .iter()
            .filter(|region| region.start <= ip && ip < region.end)
            .min_by_key(|region| region.end - region.start)
    }
}
