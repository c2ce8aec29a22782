//! Lowering from the surface expression layer into evaluator graphs.
//!
//! One pass over the lambda tree collects variable facts (where each
//! variable is defined, whether it is mutated, whether an inner lambda
//! captures it); the build pass then creates variable definitions, resolves
//! references by identity, materializes copied-outer synthetic parameters,
//! assigns dense frame indices, and numbers recovery sites in traversal
//! order. A variable is boxed when it is both mutated and captured; a
//! letrec binding counts as a mutation because it stores into the
//! pre-initialized slot.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ast::{Atomic, CallTarget, Constant, Expr, Lambda, Var};
use crate::error::CompilerError;
use crate::graph::node::{CallTargetNode, ExprKind, ExprNode};
use crate::graph::variable::VariableDefinition;
use crate::graph::FunctionGraph;
use crate::runtime::nexus::Nexus;
use crate::runtime::registry;
use crate::runtime::value::Value;

/// Lowers a closed top-level lambda, registering it and every nested lambda
/// in the function registry. A reserved id, if given, becomes the top
/// function's id so its body can have called itself directly.
pub fn lower_function(
    name: &str,
    lambda: &Lambda,
    reserved: Option<crate::runtime::registry::FunctionId>,
) -> Result<Arc<Nexus>, CompilerError> {
    let mut facts = FxHashMap::default();
    collect_lambda_facts(lambda, 0, &mut facts);
    let mut lowerer = Lowerer {
        facts,
        levels: Vec::new(),
        top_id: reserved,
    };
    let (nexus, _) = lowerer.lower_lambda(name.into(), lambda)?;
    Ok(nexus)
}

#[derive(Default)]
struct VarFacts {
    depth: usize,
    mutated: bool,
    captured: bool,
}

fn collect_lambda_facts(lambda: &Lambda, depth: usize, facts: &mut FxHashMap<usize, VarFacts>) {
    for param in &lambda.params {
        facts.entry(param.key()).or_default().depth = depth;
    }
    collect_expr_facts(&lambda.body, depth, facts);
}

fn collect_expr_facts(expr: &Expr, depth: usize, facts: &mut FxHashMap<usize, VarFacts>) {
    match expr {
        Expr::Atomic(atom) => collect_atom_facts(atom, depth, facts),
        Expr::Let {
            var,
            init,
            body,
            recursive,
        } => {
            let entry = facts.entry(var.key()).or_default();
            entry.depth = depth;
            if *recursive {
                entry.mutated = true;
            }
            collect_expr_facts(init, depth, facts);
            collect_expr_facts(body, depth, facts);
        }
        Expr::If {
            condition,
            consequent,
            alternative,
        } => {
            collect_atom_facts(condition, depth, facts);
            collect_expr_facts(consequent, depth, facts);
            collect_expr_facts(alternative, depth, facts);
        }
        Expr::Block(exprs) => {
            for e in exprs {
                collect_expr_facts(e, depth, facts);
            }
        }
        Expr::Return(value) => collect_atom_facts(value, depth, facts),
        Expr::Set { var, value } => {
            let entry = facts.entry(var.key()).or_default();
            entry.mutated = true;
            if depth > entry.depth {
                entry.captured = true;
            }
            collect_atom_facts(value, depth, facts);
        }
        Expr::Call { target, args } => {
            if let CallTarget::Expr(atom) = target {
                collect_atom_facts(atom, depth, facts);
            }
            for arg in args {
                collect_atom_facts(arg, depth, facts);
            }
        }
    }
}

fn collect_atom_facts(atom: &Atomic, depth: usize, facts: &mut FxHashMap<usize, VarFacts>) {
    match atom {
        Atomic::Const(_) | Atomic::FunctionRef(_) => {}
        Atomic::Var(var) => {
            let entry = facts.entry(var.key()).or_default();
            if depth > entry.depth {
                entry.captured = true;
            }
        }
        Atomic::Prim1 { arg, .. } => collect_atom_facts(arg, depth, facts),
        Atomic::Prim2 { arg1, arg2, .. } => {
            collect_atom_facts(arg1, depth, facts);
            collect_atom_facts(arg2, depth, facts);
        }
        Atomic::Lambda(lambda) => collect_lambda_facts(lambda, depth + 1, facts),
    }
}

/// Per-function build state. The vector of levels forms the lexical chain;
/// resolving a variable that belongs to an enclosing level materializes a
/// copied synthetic parameter at every level in between.
struct Level {
    name: Arc<str>,
    defs: FxHashMap<usize, Arc<VariableDefinition>>,
    synthetics: Vec<Arc<VariableDefinition>>,
    /// Definitions in the enclosing level the synthetics copy, in the same
    /// order.
    copied_sources: Vec<Arc<VariableDefinition>>,
    params: Vec<Arc<VariableDefinition>>,
    locals: Vec<Arc<VariableDefinition>>,
    sites: usize,
    inners: Vec<Arc<Nexus>>,
}

struct Lowerer {
    facts: FxHashMap<usize, VarFacts>,
    levels: Vec<Level>,
    top_id: Option<crate::runtime::registry::FunctionId>,
}

impl Lowerer {
    /// Lowers one lambda into a registered nexus. Returns the definitions
    /// in the *enclosing* frame that the new function's synthetic
    /// parameters copy, in synthetic order.
    fn lower_lambda(
        &mut self,
        name: Arc<str>,
        lambda: &Lambda,
    ) -> Result<(Arc<Nexus>, Vec<Arc<VariableDefinition>>), CompilerError> {
        let mut level = Level {
            name,
            defs: FxHashMap::default(),
            synthetics: Vec::new(),
            copied_sources: Vec::new(),
            params: Vec::new(),
            locals: Vec::new(),
            sites: 0,
            inners: Vec::new(),
        };
        for param in &lambda.params {
            let def = self.declare(param);
            level.defs.insert(param.key(), def.clone());
            level.params.push(def);
        }
        self.levels.push(level);
        let body = self.lower_expr(&lambda.body);
        let level = self.levels.pop().expect("level pushed above");
        let body = body?;

        // Dense frame layout: synthetics, declared parameters, locals.
        for (index, var) in level
            .synthetics
            .iter()
            .chain(level.params.iter())
            .chain(level.locals.iter())
            .enumerate()
        {
            var.set_index(index);
        }

        let graph = FunctionGraph::new(
            level.name,
            level.synthetics,
            level.params,
            level.locals,
            body,
            level.sites,
            level.inners,
        );
        let nexus = Nexus::new(graph);
        let reserved = if self.levels.is_empty() {
            self.top_id.take()
        } else {
            None
        };
        match reserved {
            Some(id) => registry::fulfill(id, &nexus),
            None => {
                registry::register(&nexus);
            }
        }
        Ok((nexus, level.copied_sources))
    }

    fn declare(&self, var: &Var) -> Arc<VariableDefinition> {
        let def = VariableDefinition::declared(var.name());
        if let Some(facts) = self.facts.get(&var.key()) {
            if facts.mutated && facts.captured {
                def.set_boxed();
            }
        }
        def
    }

    /// Resolves a variable reference at the innermost level, copying it
    /// inward through every enclosing function it crosses.
    fn resolve(&mut self, var: &Var) -> Result<Arc<VariableDefinition>, CompilerError> {
        self.resolve_at(self.levels.len() - 1, var)
    }

    fn resolve_at(
        &mut self,
        level: usize,
        var: &Var,
    ) -> Result<Arc<VariableDefinition>, CompilerError> {
        if let Some(def) = self.levels[level].defs.get(&var.key()) {
            return Ok(def.clone());
        }
        if level == 0 {
            return Err(CompilerError::UnresolvedVariable(var.name().to_string()));
        }
        let outer = self.resolve_at(level - 1, var)?;
        let copy = VariableDefinition::copied(&outer);
        let current = &mut self.levels[level];
        current.defs.insert(var.key(), copy.clone());
        current.synthetics.push(copy.clone());
        current.copied_sources.push(outer);
        Ok(copy)
    }

    fn level_mut(&mut self) -> &mut Level {
        self.levels.last_mut().expect("inside a function")
    }

    fn next_site(&mut self) -> usize {
        let level = self.level_mut();
        let site = level.sites;
        level.sites += 1;
        site
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<ExprNode, CompilerError> {
        let kind = match expr {
            Expr::Atomic(atom) => return self.lower_atom(atom),
            Expr::Let {
                var,
                init,
                body,
                recursive,
            } => {
                let site = self.next_site();
                let def = self.declare(var);
                self.level_mut().locals.push(def.clone());
                let init_node;
                let shadowed;
                if *recursive {
                    shadowed = self.bind(var, &def);
                    init_node = self.lower_expr(init)?;
                } else {
                    init_node = self.lower_expr(init)?;
                    shadowed = self.bind(var, &def);
                }
                let body_node = self.lower_expr(body);
                self.unbind(var, shadowed);
                ExprKind::Let {
                    variable: def,
                    init: Box::new(init_node),
                    body: Box::new(body_node?),
                    recursive: *recursive,
                    site,
                }
            }
            Expr::If {
                condition,
                consequent,
                alternative,
            } => ExprKind::If {
                condition: Box::new(self.lower_atom(condition)?),
                consequent: Box::new(self.lower_expr(consequent)?),
                alternative: Box::new(self.lower_expr(alternative)?),
            },
            Expr::Block(exprs) => ExprKind::Block(
                exprs
                    .iter()
                    .map(|e| self.lower_expr(e))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Expr::Return(value) => {
                let site = self.next_site();
                ExprKind::Return {
                    value: Box::new(self.lower_atom(value)?),
                    site,
                }
            }
            Expr::Set { var, value } => {
                let site = self.next_site();
                ExprKind::SetVar {
                    variable: self.resolve(var)?,
                    value: Box::new(self.lower_atom(value)?),
                    site,
                }
            }
            Expr::Call { target, args } => {
                let target = match target {
                    CallTarget::Expr(atom) => {
                        CallTargetNode::Expr(Box::new(self.lower_atom(atom)?))
                    }
                    CallTarget::Direct(id) => CallTargetNode::Direct(*id),
                };
                let args = args
                    .iter()
                    .map(|a| self.lower_atom(a))
                    .collect::<Result<Vec<_>, _>>()?;
                ExprKind::Call { target, args }
            }
        };
        Ok(ExprNode::new(kind))
    }

    fn bind(&mut self, var: &Var, def: &Arc<VariableDefinition>) -> Option<Arc<VariableDefinition>> {
        self.level_mut().defs.insert(var.key(), def.clone())
    }

    fn unbind(&mut self, var: &Var, shadowed: Option<Arc<VariableDefinition>>) {
        let defs = &mut self.level_mut().defs;
        match shadowed {
            Some(def) => {
                defs.insert(var.key(), def);
            }
            None => {
                defs.remove(&var.key());
            }
        }
    }

    fn lower_atom(&mut self, atom: &Atomic) -> Result<ExprNode, CompilerError> {
        let kind = match atom {
            Atomic::Const(constant) => ExprKind::Const(match constant {
                Constant::Int(n) => Value::Int(*n),
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Str(s) => Value::Str(s.clone()),
                Constant::Null => Value::Null,
            }),
            Atomic::Var(var) => ExprKind::GetVar(self.resolve(var)?),
            Atomic::Prim1 { op, arg } => ExprKind::Prim1 {
                op: op.clone(),
                arg: Box::new(self.lower_atom(arg)?),
            },
            Atomic::Prim2 { op, arg1, arg2 } => ExprKind::Prim2 {
                op: op.clone(),
                arg1: Box::new(self.lower_atom(arg1)?),
                arg2: Box::new(self.lower_atom(arg2)?),
            },
            Atomic::Lambda(lambda) => {
                let level = self.level_mut();
                let name: Arc<str> =
                    format!("{}$closure{}", level.name, level.inners.len()).into();
                let (nexus, copied) = self.lower_lambda(name, lambda)?;
                self.level_mut().inners.push(nexus.clone());
                ExprKind::MakeClosure {
                    function: nexus,
                    copied,
                }
            }
            Atomic::FunctionRef(id) => ExprKind::FunctionConst(*id),
        };
        Ok(ExprNode::new(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;

    #[test]
    fn parameters_and_locals_get_dense_indices() {
        let x = Var::named("x");
        let y = Var::named("y");
        let lambda = Lambda::new(
            vec![x.clone()],
            ast::let_(
                &y,
                ast::atom(ast::add(ast::var(&x), ast::const_int(1))),
                ast::atom(ast::var(&y)),
            ),
        );
        let nexus = lower_function("t", &lambda, None).unwrap();
        let graph = nexus.graph();
        assert_eq!(graph.declared_params.len(), 1);
        assert_eq!(graph.locals.len(), 1);
        assert_eq!(graph.declared_params[0].index(), 0);
        assert_eq!(graph.locals[0].index(), 1);
        assert_eq!(graph.frame_size, 2);
        assert_eq!(graph.recovery_site_count, 1);
    }

    #[test]
    fn captured_immutable_variable_is_copied_not_boxed() {
        let x = Var::named("x");
        let lambda = Lambda::new(
            vec![x.clone()],
            ast::atom(ast::lambda(vec![], ast::atom(ast::var(&x)))),
        );
        let nexus = lower_function("t", &lambda, None).unwrap();
        let graph = nexus.graph();
        assert!(!graph.declared_params[0].is_boxed());
        let inner = &graph.inner_functions[0];
        assert_eq!(inner.graph().synthetic_params.len(), 1);
        assert!(inner.graph().synthetic_params[0].is_copied());
        assert_eq!(inner.graph().synthetic_params[0].index(), 0);
        match &graph.body.kind {
            ExprKind::MakeClosure { copied, .. } => {
                assert_eq!(copied.len(), 1);
                assert_eq!(copied[0].index(), 0);
            }
            other => panic!("expected a closure node, got {:?}", other),
        }
    }

    #[test]
    fn mutated_captured_variable_is_boxed_everywhere() {
        let x = Var::named("x");
        let lambda = Lambda::new(
            vec![x.clone()],
            ast::block(vec![
                ast::atom(ast::lambda(
                    vec![],
                    ast::set(&x, ast::const_int(2)),
                )),
                ast::atom(ast::var(&x)),
            ]),
        );
        let nexus = lower_function("t", &lambda, None).unwrap();
        let graph = nexus.graph();
        assert!(graph.declared_params[0].is_boxed());
        let inner = &graph.inner_functions[0];
        assert!(inner.graph().synthetic_params[0].is_boxed());
    }

    #[test]
    fn free_variables_at_top_level_are_rejected() {
        let ghost = Var::named("ghost");
        let lambda = Lambda::new(vec![], ast::atom(ast::var(&ghost)));
        assert!(matches!(
            lower_function("t", &lambda, None),
            Err(CompilerError::UnresolvedVariable(_))
        ));
    }

    #[test]
    fn letrec_capture_is_boxed() {
        let f = Var::named("f");
        let x = Var::named("x");
        let lambda = Lambda::new(
            vec![],
            ast::letrec(
                &f,
                ast::atom(ast::lambda(
                    vec![x.clone()],
                    ast::atom(ast::var(&f)),
                )),
                ast::atom(ast::var(&f)),
            ),
        );
        let nexus = lower_function("t", &lambda, None).unwrap();
        assert!(nexus.graph().locals[0].is_boxed());
    }
}
