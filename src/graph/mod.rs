//! The evaluator graph: the in-memory tree a function executes from, its
//! variable definitions, and the analysis passes that annotate both.

pub mod infer;
pub mod lower;
pub mod node;
pub mod specialize;
pub mod variable;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::graph::node::ExprNode;
use crate::graph::variable::VariableDefinition;
use crate::runtime::nexus::Nexus;
use crate::types::{Cat, ExprType};

/// One function's lowered body and frame layout.
///
/// Slot indices are dense: copied-outer synthetic parameters first, then
/// declared parameters, then locals in declaration order. The shape is
/// frozen after lowering; only the type annotations move, during analysis.
#[derive(Debug)]
pub struct FunctionGraph {
    pub name: Arc<str>,
    pub synthetic_params: Vec<Arc<VariableDefinition>>,
    pub declared_params: Vec<Arc<VariableDefinition>>,
    pub locals: Vec<Arc<VariableDefinition>>,
    pub body: ExprNode,
    pub frame_size: usize,
    pub recovery_site_count: usize,
    /// Functions lowered from lambdas nested directly in this body.
    pub inner_functions: Vec<Arc<Nexus>>,
    inferred_return: AtomicU8,
    specialized_return: AtomicU8,
}

impl FunctionGraph {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: Arc<str>,
        synthetic_params: Vec<Arc<VariableDefinition>>,
        declared_params: Vec<Arc<VariableDefinition>>,
        locals: Vec<Arc<VariableDefinition>>,
        body: ExprNode,
        recovery_site_count: usize,
        inner_functions: Vec<Arc<Nexus>>,
    ) -> FunctionGraph {
        let frame_size = synthetic_params.len() + declared_params.len() + locals.len();
        FunctionGraph {
            name,
            synthetic_params,
            declared_params,
            locals,
            body,
            frame_size,
            recovery_site_count,
            inner_functions,
            inferred_return: AtomicU8::new(ExprType::Unknown.to_bits()),
            specialized_return: AtomicU8::new(Cat::Ref.to_bits()),
        }
    }

    /// The number of arguments a caller passes.
    pub fn arity(&self) -> usize {
        self.declared_params.len()
    }

    /// The frame-level arity: copied values plus declared arguments.
    pub fn implementation_arity(&self) -> usize {
        self.synthetic_params.len() + self.declared_params.len()
    }

    pub fn all_params(&self) -> impl Iterator<Item = &Arc<VariableDefinition>> {
        self.synthetic_params.iter().chain(self.declared_params.iter())
    }

    pub fn all_variables(&self) -> impl Iterator<Item = &Arc<VariableDefinition>> {
        self.all_params().chain(self.locals.iter())
    }

    pub fn inferred_return(&self) -> ExprType {
        ExprType::from_bits(self.inferred_return.load(Ordering::Relaxed))
    }

    pub(crate) fn set_inferred_return(&self, t: ExprType) {
        self.inferred_return.store(t.to_bits(), Ordering::Relaxed);
    }

    pub fn specialized_return(&self) -> Cat {
        Cat::from_bits(self.specialized_return.load(Ordering::Relaxed))
    }

    pub(crate) fn set_specialized_return(&self, cat: Cat) {
        self.specialized_return.store(cat.to_bits(), Ordering::Relaxed);
    }
}
