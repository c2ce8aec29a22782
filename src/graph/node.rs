use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::graph::variable::VariableDefinition;
use crate::primitive::{Primitive1, Primitive2};
use crate::profile::ValueProfile;
use crate::runtime::nexus::Nexus;
use crate::runtime::registry::FunctionId;
use crate::runtime::value::Value;
use crate::types::{Cat, ExprType};

/// A node of the evaluator tree. The structure is immutable after lowering;
/// the type annotations and the profile are the only mutable state, written
/// during the analysis phases and by the profiling interpreter.
#[derive(Debug)]
pub struct ExprNode {
    pub kind: ExprKind,
    inferred: AtomicU8,
    specialized: AtomicU8,
    profile: ValueProfile,
}

#[derive(Debug)]
pub enum ExprKind {
    Const(Value),
    GetVar(Arc<VariableDefinition>),
    SetVar {
        variable: Arc<VariableDefinition>,
        value: Box<ExprNode>,
        site: usize,
    },
    Let {
        variable: Arc<VariableDefinition>,
        init: Box<ExprNode>,
        body: Box<ExprNode>,
        recursive: bool,
        site: usize,
    },
    If {
        condition: Box<ExprNode>,
        consequent: Box<ExprNode>,
        alternative: Box<ExprNode>,
    },
    Block(Vec<ExprNode>),
    Return {
        value: Box<ExprNode>,
        site: usize,
    },
    Prim1 {
        op: Arc<dyn Primitive1>,
        arg: Box<ExprNode>,
    },
    Prim2 {
        op: Arc<dyn Primitive2>,
        arg1: Box<ExprNode>,
        arg2: Box<ExprNode>,
    },
    Call {
        target: CallTargetNode,
        args: Vec<ExprNode>,
    },
    /// Materializes a closure over an inner function, copying the listed
    /// variables out of the host frame in frame order.
    MakeClosure {
        function: Arc<Nexus>,
        copied: Vec<Arc<VariableDefinition>>,
    },
    /// A reference to a registered function used as a value.
    FunctionConst(FunctionId),
}

#[derive(Debug)]
pub enum CallTargetNode {
    Expr(Box<ExprNode>),
    Direct(FunctionId),
}

impl ExprNode {
    pub fn new(kind: ExprKind) -> ExprNode {
        ExprNode {
            kind,
            inferred: AtomicU8::new(ExprType::Unknown.to_bits()),
            specialized: AtomicU8::new(Cat::Ref.to_bits()),
            profile: ValueProfile::new(),
        }
    }

    pub fn profile(&self) -> &ValueProfile {
        &self.profile
    }

    pub fn inferred_type(&self) -> ExprType {
        ExprType::from_bits(self.inferred.load(Ordering::Relaxed))
    }

    pub(crate) fn set_inferred_type(&self, t: ExprType) {
        self.inferred.store(t.to_bits(), Ordering::Relaxed);
    }

    /// The category code generation assumes this expression produces.
    pub fn specialized_type(&self) -> Cat {
        Cat::from_bits(self.specialized.load(Ordering::Relaxed))
    }

    pub(crate) fn set_specialized_type(&self, cat: Cat) {
        self.specialized.store(cat.to_bits(), Ordering::Relaxed);
    }
}
