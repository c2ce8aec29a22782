//! The specialized code generator.
//!
//! Parameters, locals, and intermediates take the categories the planner
//! assigned from the profile. Three rules govern the emitted code: a
//! visitor reports the category it left on the stack; the consumer bridges
//! to the category it needs; and a bridge whose value the same visitor uses
//! afterwards runs inside a square-peg try region whose handler finishes
//! the activation in the recovery routine. Bridges to a primitive category
//! are emitted even when the static categories agree, because a call's
//! runtime result may be a deoptimized reference.

use std::sync::Arc;

use log::debug;

use crate::bytecode::instr::{Instr, Routine, Signature};
use crate::bytecode::writer::{BootstrapArg, Label, RoutineWriter};
use crate::error::CompilerError;
use crate::graph::node::{CallTargetNode, ExprKind, ExprNode};
use crate::graph::variable::VariableDefinition;
use crate::graph::FunctionGraph;
use crate::runtime::call_site;
use crate::runtime::nexus::Nexus;
use crate::runtime::value::Value;
use crate::types::Cat;

pub(crate) fn generate_specialized(
    nexus: &Nexus,
    recovery: Option<Arc<Routine>>,
) -> Result<Routine, CompilerError> {
    let graph = nexus.graph();
    let params = graph
        .all_params()
        .map(|v| v.specialized_type())
        .collect::<Vec<_>>();
    let signature = Signature::new(params, graph.specialized_return());
    debug!("specializing {} as {}", graph.name, signature);
    let writer = RoutineWriter::new(
        format!("{}$specialized", graph.name),
        signature,
        graph.frame_size,
        0,
    );
    SpecializedGenerator {
        graph,
        w: writer,
        live_locals: Vec::new(),
        handlers: Vec::new(),
        recovery,
    }
    .generate()
}

/// A pending square-peg handler: generated after the routine body, it
/// unspecializes the frame and enters recovery at its site.
struct Handler {
    label: Label,
    live: Vec<Arc<VariableDefinition>>,
    site: usize,
}

struct SpecializedGenerator<'a> {
    graph: &'a FunctionGraph,
    w: RoutineWriter,
    live_locals: Vec<Arc<VariableDefinition>>,
    handlers: Vec<Handler>,
    recovery: Option<Arc<Routine>>,
}

impl<'a> SpecializedGenerator<'a> {
    fn generate(mut self) -> Result<Routine, CompilerError> {
        self.prologue();
        let ret = self.graph.specialized_return();
        let cat = self.visit(&self.graph.body)?;
        self.bridge(cat, ret);
        self.w.emit(Instr::Return(ret));
        let handlers = std::mem::take(&mut self.handlers);
        for handler in handlers {
            self.generate_handler(handler)?;
        }
        self.w.finish()
    }

    /// Boxed declared parameters get their cell; their specialized
    /// category is a reference, so the incoming value is already boxed.
    fn prologue(&mut self) {
        for variable in &self.graph.declared_params {
            if variable.is_boxed() {
                let index = variable.index();
                self.w.load_local(Cat::Ref, index);
                self.w.emit(Instr::NewCell { index });
            }
        }
    }

    /// The handler receives the peg value as the only stack entry. It
    /// reloads every live primitive slot, boxes it into reference form,
    /// and hands the activation to the recovery routine.
    fn generate_handler(&mut self, handler: Handler) -> Result<(), CompilerError> {
        self.w.bind(handler.label);
        for variable in self.graph.all_params().cloned().chain(handler.live) {
            let cat = variable.specialized_type();
            if !variable.is_boxed() && cat.is_primitive() {
                let index = variable.index();
                self.w.load_local(cat, index);
                self.w.emit(Instr::Box(cat));
                self.w.store_local(Cat::Ref, index);
            }
        }
        let routine = self
            .recovery
            .clone()
            .ok_or(CompilerError::MalformedRoutine("missing recovery routine"))?;
        self.w.emit(Instr::EnterRecovery {
            site: handler.site,
            routine,
        });
        Ok(())
    }

    /// Wraps the generated range in a try region whose handler will carry
    /// the live-variable snapshot taken here.
    fn with_peg_recovery(
        &mut self,
        site: usize,
        generate: impl FnOnce(&mut Self) -> Result<(), CompilerError>,
    ) -> Result<(), CompilerError> {
        let start = self.w.mark();
        generate(self)?;
        let end = self.w.mark();
        let label = self.w.new_label();
        self.handlers.push(Handler {
            label,
            live: self.live_locals.clone(),
            site,
        });
        self.w.add_peg_region(start, end, label);
        Ok(())
    }

    fn visit(&mut self, node: &ExprNode) -> Result<Cat, CompilerError> {
        match &node.kind {
            ExprKind::Const(value) => self.visit_const(value),
            ExprKind::GetVar(variable) => {
                if variable.is_boxed() {
                    self.w.emit(Instr::LoadCellValue {
                        index: variable.index(),
                    });
                    Ok(Cat::Ref)
                } else {
                    let cat = variable.specialized_type();
                    self.w.load_local(cat, variable.index());
                    Ok(cat)
                }
            }
            ExprKind::SetVar {
                variable,
                value,
                site,
            } => {
                let var_cat = variable.specialized_type();
                self.with_peg_recovery(*site, |g| {
                    let cat = g.visit(value)?;
                    g.bridge(cat, var_cat);
                    Ok(())
                })?;
                // The duplicate is the set expression's value.
                self.w.emit(Instr::Dup);
                self.store(variable, var_cat);
                Ok(var_cat)
            }
            ExprKind::Let {
                variable,
                init,
                body,
                recursive,
                site,
            } => {
                let var_cat = variable.specialized_type();
                let index = variable.index();
                if *recursive {
                    self.w.emit(Instr::LoadDefault(var_cat));
                    if variable.is_boxed() {
                        self.w.emit(Instr::NewCell { index });
                    } else {
                        self.w.store_local(var_cat, index);
                    }
                    self.live_locals.push(variable.clone());
                    self.with_peg_recovery(*site, |g| {
                        let cat = g.visit(init)?;
                        g.bridge(cat, var_cat);
                        Ok(())
                    })?;
                    self.store(variable, var_cat);
                } else {
                    self.with_peg_recovery(*site, |g| {
                        let cat = g.visit(init)?;
                        g.bridge(cat, var_cat);
                        Ok(())
                    })?;
                    if variable.is_boxed() {
                        self.w.emit(Instr::NewCell { index });
                    } else {
                        self.w.store_local(var_cat, index);
                    }
                    self.live_locals.push(variable.clone());
                }
                let body_cat = self.visit(body)?;
                self.drop_live(variable);
                Ok(body_cat)
            }
            ExprKind::If {
                condition,
                consequent,
                alternative,
            } => {
                let result = node.specialized_type();
                if let ExprKind::Prim2 { op, arg1, arg2 } = &condition.kind {
                    if let Some(cmp) =
                        op.fused_branch(arg1.specialized_type(), arg2.specialized_type())
                    {
                        let else_start = self.w.new_label();
                        let end = self.w.new_label();
                        self.visit(arg1)?;
                        self.visit(arg2)?;
                        self.w.int_compare_branch(cmp, else_start);
                        let cat = self.visit(consequent)?;
                        self.bridge(cat, result);
                        self.w.jump(end);
                        self.w.bind(else_start);
                        let cat = self.visit(alternative)?;
                        self.bridge(cat, result);
                        self.w.bind(end);
                        return Ok(result);
                    }
                }
                let cat = self.visit(condition)?;
                self.ensure_bool(cat)?;
                let else_start = self.w.new_label();
                let end = self.w.new_label();
                self.w.jump_if_false(else_start);
                let cat = self.visit(consequent)?;
                self.bridge(cat, result);
                self.w.jump(end);
                self.w.bind(else_start);
                let cat = self.visit(alternative)?;
                self.bridge(cat, result);
                self.w.bind(end);
                Ok(result)
            }
            ExprKind::Block(exprs) => {
                let Some((tail, rest)) = exprs.split_last() else {
                    self.w.emit(Instr::LoadConst(Value::Null));
                    return Ok(Cat::Ref);
                };
                for expr in rest {
                    let cat = self.visit(expr)?;
                    if cat != Cat::Void {
                        self.w.emit(Instr::Pop);
                    }
                }
                self.visit(tail)
            }
            ExprKind::Return { value, site } => {
                let ret = self.graph.specialized_return();
                self.with_peg_recovery(*site, |g| {
                    let cat = g.visit(value)?;
                    g.bridge(cat, ret);
                    Ok(())
                })?;
                self.w.emit(Instr::Return(ret));
                Ok(Cat::Void)
            }
            ExprKind::Prim1 { op, arg } => {
                let cat = self.visit(arg)?;
                op.generate(&mut self.w, cat)
            }
            ExprKind::Prim2 { op, arg1, arg2 } => {
                let cat1 = self.visit(arg1)?;
                let cat2 = self.visit(arg2)?;
                op.generate(&mut self.w, cat1, cat2)
            }
            ExprKind::Call { target, args } => {
                let ret = node.specialized_type();
                match target {
                    CallTargetNode::Expr(function) => {
                        let cat = self.visit(function)?;
                        if cat.is_primitive() {
                            self.w.emit(Instr::Box(cat));
                        }
                        let mut params = vec![Cat::Ref];
                        for arg in args {
                            params.push(self.visit(arg)?);
                        }
                        self.w.invoke_dynamic(
                            call_site::closure_call_bootstrap,
                            "call",
                            Signature::new(params, ret),
                            &[],
                        )?;
                    }
                    CallTargetNode::Direct(id) => {
                        let mut params = Vec::with_capacity(args.len());
                        for arg in args {
                            params.push(self.visit(arg)?);
                        }
                        self.w.invoke_dynamic(
                            call_site::direct_call_bootstrap,
                            "direct",
                            Signature::new(params, ret),
                            &[BootstrapArg::Function(*id)],
                        )?;
                    }
                }
                Ok(ret)
            }
            ExprKind::MakeClosure { function, copied } => {
                for variable in copied {
                    if variable.is_boxed() {
                        self.w.load_local(Cat::Ref, variable.index());
                    } else {
                        let cat = variable.specialized_type();
                        self.w.load_local(cat, variable.index());
                        if cat.is_primitive() {
                            self.w.emit(Instr::Box(cat));
                        }
                    }
                }
                let id = function
                    .id()
                    .ok_or(CompilerError::MalformedRoutine("unregistered function"))?;
                self.w.emit(Instr::MakeClosure {
                    function: id,
                    count: copied.len(),
                });
                Ok(Cat::Ref)
            }
            ExprKind::FunctionConst(id) => {
                self.w.emit(Instr::LoadFunction(*id));
                Ok(Cat::Ref)
            }
        }
    }

    fn visit_const(&mut self, value: &Value) -> Result<Cat, CompilerError> {
        match value {
            Value::Int(n) => {
                self.w.emit(Instr::LoadInt(*n));
                Ok(Cat::Int)
            }
            Value::Bool(b) => {
                self.w.emit(Instr::LoadBool(*b));
                Ok(Cat::Bool)
            }
            Value::Str(_) | Value::Null => {
                self.w.emit(Instr::LoadConst(value.clone()));
                Ok(Cat::Ref)
            }
            other => Err(CompilerError::UnexpectedConstant(other.to_string())),
        }
    }

    /// The nine-case bridge. Narrowing to a primitive may fail at run time
    /// and raises a square peg carrying the value; the two primitive
    /// categories have no direct conversion and route through a reference,
    /// which pegs unconditionally.
    fn bridge(&mut self, from: Cat, to: Cat) {
        if from == Cat::Void {
            return;
        }
        match to {
            Cat::Void => {}
            Cat::Ref => {
                if from.is_primitive() {
                    self.w.emit(Instr::Box(from));
                }
            }
            Cat::Int => {
                if from == Cat::Bool {
                    self.w.emit(Instr::Box(Cat::Bool));
                }
                self.w.emit(Instr::BridgeInt);
            }
            Cat::Bool => {
                if from == Cat::Int {
                    self.w.emit(Instr::Box(Cat::Int));
                }
                self.w.emit(Instr::BridgeBool);
            }
        }
    }

    fn ensure_bool(&mut self, cat: Cat) -> Result<(), CompilerError> {
        match cat {
            Cat::Bool => {}
            Cat::Ref => {
                self.w.emit(Instr::AssertBool);
            }
            Cat::Int => {
                self.w.emit(Instr::Box(Cat::Int));
                self.w.emit(Instr::AssertBool);
            }
            Cat::Void => return Err(CompilerError::MalformedRoutine("void condition")),
        }
        Ok(())
    }

    fn store(&mut self, variable: &VariableDefinition, cat: Cat) {
        if variable.is_boxed() {
            self.w.emit(Instr::StoreCell {
                index: variable.index(),
            });
        } else {
            self.w.store_local(cat, variable.index());
        }
    }

    fn drop_live(&mut self, variable: &Arc<VariableDefinition>) {
        self.live_locals
            .retain(|live| !Arc::ptr_eq(live, variable));
    }
}
