//! Profile-driven specialization planning.
//!
//! Runs in two phases around code generation. The pre-generic phase derives
//! specialized categories from inference alone. The pre-specialized phase
//! folds in observations: a variable's observed type trumps its inferred
//! type because it is potentially more specific, even if incorrect for the
//! general case; runtime guards verify it. Expression categories are
//! computed structurally, falling back to observations only where every
//! evaluation was recorded (call results carry their own profile).
//!
//! Boxed variables always specialize to a reference: the cell is shared
//! with inner closures that may store any category into it.

use crate::graph::node::{CallTargetNode, ExprKind, ExprNode};
use crate::graph::variable::VariableDefinition;
use crate::graph::FunctionGraph;
use crate::profile::FunctionProfile;
use crate::types::{Cat, ExprType};

/// Sets every specialized annotation from inferred types only. Generic
/// code generation runs under these annotations.
pub fn plan_pre_generic(graph: &FunctionGraph) {
    for variable in graph.all_variables() {
        variable.set_specialized_type(variable_cat_from(variable, variable.inferred_type()));
    }
    plan_node_pre_generic(&graph.body);
    graph.set_specialized_return(cat_or_ref(graph.inferred_return()));
}

fn plan_node_pre_generic(node: &ExprNode) {
    node.set_specialized_type(cat_or_ref(node.inferred_type()));
    match &node.kind {
        ExprKind::Const(_)
        | ExprKind::GetVar(_)
        | ExprKind::FunctionConst(_)
        | ExprKind::MakeClosure { .. } => {}
        ExprKind::SetVar { value, .. } => plan_node_pre_generic(value),
        ExprKind::Let { init, body, .. } => {
            plan_node_pre_generic(init);
            plan_node_pre_generic(body);
        }
        ExprKind::If {
            condition,
            consequent,
            alternative,
        } => {
            plan_node_pre_generic(condition);
            plan_node_pre_generic(consequent);
            plan_node_pre_generic(alternative);
        }
        ExprKind::Block(exprs) => exprs.iter().for_each(plan_node_pre_generic),
        ExprKind::Return { value, .. } => plan_node_pre_generic(value),
        ExprKind::Prim1 { arg, .. } => plan_node_pre_generic(arg),
        ExprKind::Prim2 { arg1, arg2, .. } => {
            plan_node_pre_generic(arg1);
            plan_node_pre_generic(arg2);
        }
        ExprKind::Call { target, args } => {
            if let CallTargetNode::Expr(f) = target {
                plan_node_pre_generic(f);
            }
            args.iter().for_each(plan_node_pre_generic);
        }
    }
}

/// Folds observed types into the specialized annotations. Specialized code
/// generation runs under these.
pub fn plan_pre_specialized(graph: &FunctionGraph, profile: &FunctionProfile) {
    for variable in graph.all_variables() {
        variable.set_specialized_type(observed_variable_cat(variable));
    }
    let body_cat = plan_node_pre_specialized(&graph.body);

    let result_profile = profile.result_profile();
    let ret = if result_profile.has_data() {
        cat_or_ref(result_profile.observed_type())
    } else if body_cat == Cat::Void {
        Cat::Ref
    } else {
        body_cat
    };
    graph.set_specialized_return(ret);
}

fn observed_variable_cat(variable: &VariableDefinition) -> Cat {
    if variable.is_boxed() {
        return Cat::Ref;
    }
    let profile = variable.profile();
    if profile.has_data() {
        cat_or_ref(profile.observed_type())
    } else {
        variable_cat_from(variable, variable.inferred_type())
    }
}

fn variable_cat_from(variable: &VariableDefinition, inferred: ExprType) -> Cat {
    if variable.is_boxed() {
        Cat::Ref
    } else {
        cat_or_ref(inferred)
    }
}

fn cat_or_ref(t: ExprType) -> Cat {
    match t {
        ExprType::Known(cat) if cat != Cat::Void => cat,
        _ => Cat::Ref,
    }
}

fn plan_node_pre_specialized(node: &ExprNode) -> Cat {
    let cat = match &node.kind {
        ExprKind::Const(value) => value.category(),
        ExprKind::GetVar(variable) => variable.specialized_type(),
        ExprKind::SetVar {
            variable, value, ..
        } => {
            plan_node_pre_specialized(value);
            variable.specialized_type()
        }
        ExprKind::Let { init, body, .. } => {
            plan_node_pre_specialized(init);
            plan_node_pre_specialized(body)
        }
        ExprKind::If {
            condition,
            consequent,
            alternative,
        } => {
            plan_node_pre_specialized(condition);
            let a = plan_node_pre_specialized(consequent);
            let b = plan_node_pre_specialized(alternative);
            join_cats(a, b)
        }
        ExprKind::Block(exprs) => {
            let mut cat = Cat::Ref;
            for expr in exprs {
                cat = plan_node_pre_specialized(expr);
            }
            cat
        }
        ExprKind::Return { value, .. } => {
            plan_node_pre_specialized(value);
            Cat::Void
        }
        ExprKind::Prim1 { op, arg } => {
            let a = plan_node_pre_specialized(arg);
            cat_or_ref(op.inferred_return(ExprType::Known(a)))
        }
        ExprKind::Prim2 { op, arg1, arg2 } => {
            let a = plan_node_pre_specialized(arg1);
            let b = plan_node_pre_specialized(arg2);
            cat_or_ref(op.inferred_return(ExprType::Known(a), ExprType::Known(b)))
        }
        ExprKind::Call { target, args } => {
            if let CallTargetNode::Expr(f) = target {
                plan_node_pre_specialized(f);
            }
            for arg in args {
                plan_node_pre_specialized(arg);
            }
            // The call's own profile saw every evaluation, so observed data
            // is valid here; without data the result is any reference.
            if node.profile().has_data() {
                cat_or_ref(node.profile().observed_type())
            } else {
                Cat::Ref
            }
        }
        ExprKind::MakeClosure { .. } | ExprKind::FunctionConst(_) => Cat::Ref,
    };
    node.set_specialized_type(cat);
    cat
}

fn join_cats(a: Cat, b: Cat) -> Cat {
    if a == b {
        a
    } else if a == Cat::Void {
        b
    } else if b == Cat::Void {
        a
    } else {
        Cat::Ref
    }
}

/// Whether generating a specialized routine is worth it: at least one
/// parameter, local, or the return has a primitive specialized category.
pub fn can_be_specialized(graph: &FunctionGraph) -> bool {
    graph
        .all_variables()
        .any(|v| v.specialized_type().is_primitive())
        || graph.specialized_return().is_primitive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{self, Lambda, Var};
    use crate::graph::infer::infer_types;
    use crate::graph::lower::lower_function;
    use crate::runtime::value::Value;

    fn plan(nexus: &crate::runtime::nexus::Nexus, profile: &FunctionProfile) {
        infer_types(nexus.graph()).unwrap();
        plan_pre_generic(nexus.graph());
        plan_pre_specialized(nexus.graph(), profile);
    }

    #[test]
    fn observed_int_parameter_specializes_to_int() {
        let x = Var::named("x");
        let lambda = Lambda::new(vec![x.clone()], ast::atom(ast::var(&x)));
        let nexus = lower_function("t", &lambda, None).unwrap();
        let graph = nexus.graph();
        graph.declared_params[0].profile().record(&Value::Int(1));
        let profile = FunctionProfile::new();
        profile.record_result(&Value::Int(1));
        plan(&nexus, &profile);
        assert_eq!(graph.declared_params[0].specialized_type(), Cat::Int);
        assert_eq!(graph.specialized_return(), Cat::Int);
        assert!(can_be_specialized(graph));
    }

    #[test]
    fn polymorphic_observations_disable_specialization() {
        let x = Var::named("x");
        let lambda = Lambda::new(vec![x.clone()], ast::atom(ast::var(&x)));
        let nexus = lower_function("t", &lambda, None).unwrap();
        let graph = nexus.graph();
        let param = &graph.declared_params[0];
        param.profile().record(&Value::Int(1));
        param.profile().record(&Value::Bool(true));
        param.profile().record(&Value::Str("hi".into()));
        let profile = FunctionProfile::new();
        profile.record_result(&Value::Str("hi".into()));
        plan(&nexus, &profile);
        assert_eq!(param.specialized_type(), Cat::Ref);
        assert_eq!(graph.specialized_return(), Cat::Ref);
        assert!(!can_be_specialized(graph));
    }

    #[test]
    fn observed_trumps_inferred() {
        // Inference alone cannot type the parameter, but a pure-int profile
        // narrows it.
        let x = Var::named("x");
        let lambda = Lambda::new(
            vec![x.clone()],
            ast::if_(
                ast::lt(ast::var(&x), ast::const_int(0)),
                ast::atom(ast::var(&x)),
                ast::atom(ast::var(&x)),
            ),
        );
        let nexus = lower_function("t", &lambda, None).unwrap();
        let graph = nexus.graph();
        assert_eq!(graph.declared_params[0].inferred_type(), ExprType::Unknown);
        graph.declared_params[0].profile().record(&Value::Int(5));
        plan(&nexus, &FunctionProfile::new());
        assert_eq!(graph.declared_params[0].specialized_type(), Cat::Int);
    }

    #[test]
    fn boxed_variables_stay_references() {
        let x = Var::named("x");
        let lambda = Lambda::new(
            vec![x.clone()],
            ast::block(vec![
                ast::atom(ast::lambda(vec![], ast::set(&x, ast::const_int(2)))),
                ast::atom(ast::var(&x)),
            ]),
        );
        let nexus = lower_function("t", &lambda, None).unwrap();
        let graph = nexus.graph();
        graph.declared_params[0].profile().record(&Value::Int(1));
        plan(&nexus, &FunctionProfile::new());
        assert_eq!(graph.declared_params[0].specialized_type(), Cat::Ref);
    }
}
