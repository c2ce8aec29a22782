//! The portable instruction model emitted routines are built from.
//!
//! This is the crate's realization of the abstract emitted-code backend: a
//! structured instruction set, a writer that assembles routines with label
//! patching and square-peg try regions, and (in `runtime::machine`) the
//! executor that runs finished routines.

pub mod instr;
pub mod writer;
