//! Forward type inference over an evaluator graph.
//!
//! A monotone pass: every node and variable annotation only widens. Letrec
//! initializers are iterated to a fixpoint, which the four-point lattice
//! bounds to a handful of rounds; failure to converge is a compiler bug
//! surfaced as `CompilerError::InferenceLoop`.

use crate::error::CompilerError;
use crate::graph::node::{CallTargetNode, ExprKind, ExprNode};
use crate::graph::FunctionGraph;
use crate::runtime::registry;
use crate::types::{Cat, ExprType};

/// The lattice has two levels above unknown, so any monotone climb
/// stabilizes well within this many rounds.
const MAX_ROUNDS: usize = 4;

/// Runs one inference pass over the graph. Returns whether any variable or
/// function-return annotation widened, so callers can iterate groups of
/// mutually recursive functions to a fixpoint.
pub fn infer_types(graph: &FunctionGraph) -> Result<bool, CompilerError> {
    let mut inferencer = Inferencer {
        return_type: ExprType::Unknown,
        changed: false,
    };
    let body_type = inferencer.visit(&graph.body)?;
    let result = body_type.union(inferencer.return_type);
    let widened = graph.inferred_return().union(result);
    if widened != graph.inferred_return() {
        graph.set_inferred_return(widened);
        inferencer.changed = true;
    }
    Ok(inferencer.changed)
}

struct Inferencer {
    return_type: ExprType,
    changed: bool,
}

impl Inferencer {
    fn visit(&mut self, node: &ExprNode) -> Result<ExprType, CompilerError> {
        let t = match &node.kind {
            ExprKind::Const(value) => ExprType::Known(value.category()),
            ExprKind::GetVar(variable) => variable.inferred_type(),
            ExprKind::SetVar {
                variable, value, ..
            } => {
                let t = self.visit(value)?;
                self.changed |= variable.unify_inferred_type_with(t);
                t
            }
            ExprKind::Let {
                variable,
                init,
                body,
                recursive,
                ..
            } => {
                if *recursive {
                    let mut rounds = 0;
                    loop {
                        let t = self.visit(init)?;
                        let widened = variable.unify_inferred_type_with(t);
                        self.changed |= widened;
                        if !widened {
                            break;
                        }
                        rounds += 1;
                        if rounds > MAX_ROUNDS {
                            return Err(CompilerError::InferenceLoop);
                        }
                    }
                } else {
                    let t = self.visit(init)?;
                    self.changed |= variable.unify_inferred_type_with(t);
                }
                self.visit(body)?
            }
            ExprKind::If {
                condition,
                consequent,
                alternative,
            } => {
                self.visit(condition)?;
                let a = self.visit(consequent)?;
                let b = self.visit(alternative)?;
                a.union(b)
            }
            ExprKind::Block(exprs) => {
                let mut t = ExprType::Known(Cat::Ref);
                for expr in exprs {
                    t = self.visit(expr)?;
                }
                t
            }
            ExprKind::Return { value, .. } => {
                let t = self.visit(value)?;
                self.return_type = self.return_type.union(t);
                ExprType::Known(Cat::Void)
            }
            ExprKind::Prim1 { op, arg } => {
                let t = self.visit(arg)?;
                op.inferred_return(t)
            }
            ExprKind::Prim2 { op, arg1, arg2 } => {
                let t1 = self.visit(arg1)?;
                let t2 = self.visit(arg2)?;
                op.inferred_return(t1, t2)
            }
            ExprKind::Call { target, args } => {
                for arg in args {
                    self.visit(arg)?;
                }
                match target {
                    CallTargetNode::Expr(f) => {
                        self.visit(f)?;
                        ExprType::Known(Cat::Ref)
                    }
                    // A direct call is a reference unless the callee's
                    // specialized return is already proven by compilation.
                    CallTargetNode::Direct(id) => registry::lookup_function(*id)
                        .and_then(|callee| callee.compiled_code())
                        .and_then(|code| code.specialized.as_ref().map(|s| s.signature.ret))
                        .map(ExprType::Known)
                        .unwrap_or(ExprType::Known(Cat::Ref)),
                }
            }
            ExprKind::MakeClosure { .. } | ExprKind::FunctionConst(_) => {
                ExprType::Known(Cat::Ref)
            }
        };
        node.set_inferred_type(t);
        Ok(t)
    }
}
