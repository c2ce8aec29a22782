//! Runtime core: values, closures, per-function dispatch state, inline
//! caches, and the executor for emitted routines.

pub mod call_site;
pub mod closure;
pub mod machine;
pub mod nexus;
pub mod object;
pub mod registry;
pub mod value;
