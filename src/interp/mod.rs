//! Tree-walking evaluation of function graphs.
//!
//! Two modes share one walker. Simple mode is the correctness oracle: it
//! evaluates and nothing else. Profiling mode additionally records the
//! observed category of every variable read and expression result and bumps
//! the function's invocation counter, feeding the specialization planner.
//! Call dispatch always goes through the callee's nexus, so callees may
//! already run compiled.

use smallvec::SmallVec;

use crate::error::{Error, RuntimeError};
use crate::graph::node::{CallTargetNode, ExprKind, ExprNode};
use crate::runtime::closure::Closure;
use crate::runtime::nexus::Nexus;
use crate::runtime::registry;
use crate::runtime::value::Value;

/// A non-local transfer during evaluation: an early function return, or an
/// error unwinding out of the activation.
enum Thrown {
    Return(Value),
    Error(Error),
}

impl From<RuntimeError> for Thrown {
    fn from(e: RuntimeError) -> Thrown {
        Thrown::Error(Error::Runtime(e))
    }
}

impl From<Error> for Thrown {
    fn from(e: Error) -> Thrown {
        Thrown::Error(e)
    }
}

/// Executes a function graph over an interpreter frame.
pub(crate) fn execute(
    nexus: &Nexus,
    copied: &[Value],
    args: &[Value],
    profiling: bool,
) -> Result<Value, Error> {
    let graph = nexus.graph();
    let mut frame = vec![Value::Null; graph.frame_size];
    for (variable, value) in graph.synthetic_params.iter().zip(copied.iter()) {
        variable.setup_argument_in(&mut frame, value.clone());
    }
    for (variable, value) in graph.declared_params.iter().zip(args.iter()) {
        variable.setup_argument_in(&mut frame, value.clone());
        if profiling {
            variable.profile().record(value);
        }
    }
    if profiling {
        nexus.profile.record_invocation();
    }

    let mut evaluator = Evaluator { frame, profiling };
    let result = match evaluator.eval(&graph.body) {
        Ok(value) => value,
        Err(Thrown::Return(value)) => value,
        Err(Thrown::Error(e)) => return Err(e),
    };
    if profiling {
        nexus.profile.record_result(&result);
    }
    Ok(result)
}

struct Evaluator {
    frame: Vec<Value>,
    profiling: bool,
}

impl Evaluator {
    fn eval(&mut self, node: &ExprNode) -> Result<Value, Thrown> {
        let value = self.eval_kind(node)?;
        if self.profiling {
            node.profile().record(&value);
        }
        Ok(value)
    }

    fn eval_kind(&mut self, node: &ExprNode) -> Result<Value, Thrown> {
        match &node.kind {
            ExprKind::Const(value) => Ok(value.clone()),
            ExprKind::GetVar(variable) => {
                let value = variable.get_value_in(&self.frame);
                if self.profiling {
                    variable.profile().record(&value);
                }
                Ok(value)
            }
            ExprKind::SetVar {
                variable, value, ..
            } => {
                let value = self.eval(value)?;
                variable.set_value_in(&mut self.frame, value.clone());
                Ok(value)
            }
            ExprKind::Let {
                variable,
                init,
                body,
                recursive,
                ..
            } => {
                if *recursive {
                    variable.init_value_in(&mut self.frame, Value::Null);
                    let value = self.eval(init)?;
                    variable.set_value_in(&mut self.frame, value);
                } else {
                    let value = self.eval(init)?;
                    variable.init_value_in(&mut self.frame, value);
                }
                self.eval(body)
            }
            ExprKind::If {
                condition,
                consequent,
                alternative,
            } => {
                let test = self.eval(condition)?;
                let test = test
                    .as_bool()
                    .ok_or_else(|| RuntimeError::ConditionNotBoolean(test.to_string()))?;
                if test {
                    self.eval(consequent)
                } else {
                    self.eval(alternative)
                }
            }
            ExprKind::Block(exprs) => {
                let mut result = Value::Null;
                for expr in exprs {
                    result = self.eval(expr)?;
                }
                Ok(result)
            }
            ExprKind::Return { value, .. } => {
                let value = self.eval(value)?;
                Err(Thrown::Return(value))
            }
            ExprKind::Prim1 { op, arg } => {
                let arg = self.eval(arg)?;
                Ok(op.apply(&arg)?)
            }
            ExprKind::Prim2 { op, arg1, arg2 } => {
                let arg1 = self.eval(arg1)?;
                let arg2 = self.eval(arg2)?;
                Ok(op.apply(&arg1, &arg2)?)
            }
            ExprKind::Call { target, args } => {
                let mut argv: SmallVec<[Value; 4]> = SmallVec::new();
                for arg in args {
                    argv.push(self.eval(arg)?);
                }
                match target {
                    CallTargetNode::Direct(id) => {
                        let callee = registry::lookup_function(*id)
                            .ok_or(RuntimeError::UnknownFunction(id.0))?;
                        if argv.len() != callee.arity() {
                            return Err(RuntimeError::WrongArity {
                                expected: callee.arity(),
                                actual: argv.len(),
                            }
                            .into());
                        }
                        Ok(callee.call(&[], &argv)?)
                    }
                    CallTargetNode::Expr(f) => {
                        let callee = self.eval(f)?;
                        match callee {
                            Value::Closure(closure) => Ok(closure.invoke(&argv)?),
                            other => {
                                Err(RuntimeError::NotAFunction(other.to_string()).into())
                            }
                        }
                    }
                }
            }
            ExprKind::MakeClosure { function, copied } => {
                let values = copied
                    .iter()
                    .map(|variable| variable.copied_value_in(&self.frame))
                    .collect();
                Ok(Value::Closure(Closure::new(function.clone(), values)))
            }
            ExprKind::FunctionConst(id) => {
                let callee = registry::lookup_function(*id)
                    .ok_or(RuntimeError::UnknownFunction(id.0))?;
                Ok(Value::Closure(Closure::new(callee, Vec::new())))
            }
        }
    }
}

#[cfg(test)]
mod interp_test;
