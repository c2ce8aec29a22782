//! The generic code generator, and the recovery generator built on it.
//!
//! Generic code keeps every local and intermediate as a reference: visitor
//! methods report the category their code left on the stack, and callers
//! adapt it to a reference before use. Nothing here can raise a square peg,
//! so no try regions are emitted.
//!
//! The recovery routine is the same all-reference code with one addition:
//! each recovery site's continuation offset is recorded, so a specialized
//! activation that failed a type guard can resume here, mid-function, with
//! its spilled frame and in-flight value.


use crate::bytecode::instr::{Instr, Routine, Signature};
use crate::bytecode::writer::{BootstrapArg, RoutineWriter};
use crate::error::CompilerError;
use crate::graph::node::{CallTargetNode, ExprKind, ExprNode};
use crate::graph::variable::VariableDefinition;
use crate::graph::FunctionGraph;
use crate::runtime::call_site;
use crate::runtime::nexus::Nexus;
use crate::runtime::value::Value;
use crate::types::Cat;

pub(crate) fn generate_generic(nexus: &Nexus) -> Result<Routine, CompilerError> {
    let graph = nexus.graph();
    let writer = RoutineWriter::new(
        format!("{}$generic", graph.name),
        Signature::generic(graph.implementation_arity()),
        graph.frame_size,
        0,
    );
    GenericGenerator {
        graph,
        w: writer,
        record_recovery: false,
    }
    .generate()
}

pub(crate) fn generate_recovery(nexus: &Nexus) -> Result<Routine, CompilerError> {
    let graph = nexus.graph();
    let writer = RoutineWriter::new(
        format!("{}$recovery", graph.name),
        Signature::generic(graph.implementation_arity()),
        graph.frame_size,
        graph.recovery_site_count,
    );
    GenericGenerator {
        graph,
        w: writer,
        record_recovery: true,
    }
    .generate()
}

struct GenericGenerator<'a> {
    graph: &'a FunctionGraph,
    w: RoutineWriter,
    record_recovery: bool,
}

impl<'a> GenericGenerator<'a> {
    fn generate(mut self) -> Result<Routine, CompilerError> {
        // Recovery entries sit past the prologue; a recovering activation
        // arrives with its boxed parameters already in cells.
        if !self.record_recovery {
            self.prologue();
        }
        let cat = self.visit(&self.graph.body)?;
        self.adapt_to_ref(cat);
        self.w.emit(Instr::Return(Cat::Ref));
        self.w.finish()
    }

    /// Boxed declared parameters arrive as plain values and get their cell
    /// here. Copied values were boxed by whoever materialized the closure.
    fn prologue(&mut self) {
        for variable in &self.graph.declared_params {
            if variable.is_boxed() {
                let index = variable.index();
                self.w.load_local(Cat::Ref, index);
                self.w.emit(Instr::NewCell { index });
            }
        }
    }

    fn visit(&mut self, node: &ExprNode) -> Result<Cat, CompilerError> {
        match &node.kind {
            ExprKind::Const(value) => self.visit_const(value),
            ExprKind::GetVar(variable) => {
                if variable.is_boxed() {
                    self.w.emit(Instr::LoadCellValue {
                        index: variable.index(),
                    });
                } else {
                    self.w.load_local(Cat::Ref, variable.index());
                }
                Ok(Cat::Ref)
            }
            ExprKind::SetVar {
                variable,
                value,
                site,
            } => {
                let cat = self.visit(value)?;
                self.adapt_to_ref(cat);
                self.entry(*site);
                self.w.emit(Instr::Dup);
                self.store_ref(variable);
                Ok(Cat::Ref)
            }
            ExprKind::Let {
                variable,
                init,
                body,
                recursive,
                site,
            } => {
                let index = variable.index();
                if variable.is_boxed() && *recursive {
                    self.w.emit(Instr::LoadConst(Value::Null));
                    self.w.emit(Instr::NewCell { index });
                }
                let cat = self.visit(init)?;
                self.adapt_to_ref(cat);
                self.entry(*site);
                if variable.is_boxed() {
                    if *recursive {
                        self.w.emit(Instr::StoreCell { index });
                    } else {
                        self.w.emit(Instr::NewCell { index });
                    }
                } else {
                    self.w.store_local(Cat::Ref, index);
                }
                self.visit(body)
            }
            ExprKind::If {
                condition,
                consequent,
                alternative,
            } => {
                let cat = self.visit(condition)?;
                self.ensure_bool(cat)?;
                let else_start = self.w.new_label();
                let end = self.w.new_label();
                self.w.jump_if_false(else_start);
                let cat = self.visit(consequent)?;
                self.adapt_to_ref(cat);
                self.w.jump(end);
                self.w.bind(else_start);
                let cat = self.visit(alternative)?;
                self.adapt_to_ref(cat);
                self.w.bind(end);
                Ok(Cat::Ref)
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
                let cat = self.visit(value)?;
                self.adapt_to_ref(cat);
                self.entry(*site);
                self.w.emit(Instr::Return(Cat::Ref));
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
                match target {
                    CallTargetNode::Expr(function) => {
                        let cat = self.visit(function)?;
                        self.adapt_to_ref(cat);
                        for arg in args {
                            let cat = self.visit(arg)?;
                            self.adapt_to_ref(cat);
                        }
                        self.w.invoke_dynamic(
                            call_site::closure_call_bootstrap,
                            "call",
                            Signature::generic(1 + args.len()),
                            &[],
                        )?;
                    }
                    CallTargetNode::Direct(id) => {
                        for arg in args {
                            let cat = self.visit(arg)?;
                            self.adapt_to_ref(cat);
                        }
                        self.w.invoke_dynamic(
                            call_site::direct_call_bootstrap,
                            "direct",
                            Signature::generic(args.len()),
                            &[BootstrapArg::Function(*id)],
                        )?;
                    }
                }
                Ok(Cat::Ref)
            }
            ExprKind::MakeClosure { function, copied } => {
                // A boxed variable contributes its cell, an unboxed one its
                // current value; both live in reference slots here.
                for variable in copied {
                    self.w.load_local(Cat::Ref, variable.index());
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

    fn adapt_to_ref(&mut self, cat: Cat) {
        if cat.is_primitive() {
            self.w.emit(Instr::Box(cat));
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

    fn store_ref(&mut self, variable: &VariableDefinition) {
        if variable.is_boxed() {
            self.w.emit(Instr::StoreCell {
                index: variable.index(),
            });
        } else {
            self.w.store_local(Cat::Ref, variable.index());
        }
    }

    fn entry(&mut self, site: usize) {
        if self.record_recovery {
            self.w.set_recovery_entry(site);
        }
    }
}
