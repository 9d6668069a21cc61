//! Numeric evaluation and forward-mode derivatives.

use std::collections::{BTreeMap, HashMap};

use crate::ast::{BinOp, Expr, Func};
use crate::error::{ExprError, ExprResult};

/// Source of variable values during evaluation.
pub trait Scope {
    fn value(&self, path: &str) -> Option<f64>;
}

impl Scope for BTreeMap<String, f64> {
    fn value(&self, path: &str) -> Option<f64> {
        self.get(path).copied()
    }
}

impl Scope for HashMap<String, f64> {
    fn value(&self, path: &str) -> Option<f64> {
        self.get(path).copied()
    }
}

impl<F: Fn(&str) -> Option<f64>> Scope for F {
    fn value(&self, path: &str) -> Option<f64> {
        self(path)
    }
}

fn lookup(scope: &dyn Scope, path: &str) -> ExprResult<f64> {
    scope.value(path).ok_or_else(|| ExprError::UnknownVariable {
        name: path.to_string(),
    })
}

fn apply_func(func: Func, x: f64) -> f64 {
    match func {
        Func::Sqrt => x.sqrt(),
        Func::Exp => x.exp(),
        Func::Log => x.ln(),
        Func::Log10 => x.log10(),
        Func::Sin => x.sin(),
        Func::Cos => x.cos(),
        Func::Tan => x.tan(),
        Func::Abs => x.abs(),
    }
}

/// d func(x) / dx
fn func_slope(func: Func, x: f64) -> f64 {
    match func {
        Func::Sqrt => 0.5 / x.sqrt(),
        Func::Exp => x.exp(),
        Func::Log => 1.0 / x,
        Func::Log10 => 1.0 / (x * std::f64::consts::LN_10),
        Func::Sin => x.cos(),
        Func::Cos => -x.sin(),
        Func::Tan => 1.0 / (x.cos() * x.cos()),
        Func::Abs => {
            if x < 0.0 {
                -1.0
            } else {
                1.0
            }
        }
    }
}

pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> ExprResult<f64> {
    Ok(match expr {
        Expr::Number(v) => *v,
        Expr::Var(path) => lookup(scope, path)?,
        Expr::Neg(inner) => -evaluate(inner, scope)?,
        Expr::Call { func, arg } => apply_func(*func, evaluate(arg, scope)?),
        Expr::Binary { op, lhs, rhs } => {
            let a = evaluate(lhs, scope)?;
            let b = evaluate(rhs, scope)?;
            match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Pow => a.powf(b),
            }
        }
    })
}

/// Value plus gradient with respect to an ordered list of variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Dual {
    pub value: f64,
    pub grad: Vec<f64>,
}

impl Dual {
    fn constant(value: f64, n: usize) -> Self {
        Self {
            value,
            grad: vec![0.0; n],
        }
    }

    fn combine(a: Dual, b: &Dual, value: f64, da: f64, db: f64) -> Dual {
        let grad = a
            .grad
            .iter()
            .zip(&b.grad)
            .map(|(ga, gb)| da * ga + db * gb)
            .collect();
        Dual { value, grad }
    }

    fn scale(mut self, value: f64, slope: f64) -> Dual {
        self.value = value;
        self.grad.iter_mut().for_each(|g| *g *= slope);
        self
    }
}

/// Forward-mode evaluation; `wrt[i]` names the variable of `grad[i]`.
pub fn evaluate_dual(expr: &Expr, scope: &dyn Scope, wrt: &[String]) -> ExprResult<Dual> {
    let n = wrt.len();
    Ok(match expr {
        Expr::Number(v) => Dual::constant(*v, n),
        Expr::Var(path) => {
            let mut d = Dual::constant(lookup(scope, path)?, n);
            if let Some(i) = wrt.iter().position(|w| w == path) {
                d.grad[i] = 1.0;
            }
            d
        }
        Expr::Neg(inner) => {
            let a = evaluate_dual(inner, scope, wrt)?;
            let v = -a.value;
            a.scale(v, -1.0)
        }
        Expr::Call { func, arg } => {
            let a = evaluate_dual(arg, scope, wrt)?;
            let (v, s) = (apply_func(*func, a.value), func_slope(*func, a.value));
            a.scale(v, s)
        }
        Expr::Binary { op, lhs, rhs } => {
            let a = evaluate_dual(lhs, scope, wrt)?;
            let b = evaluate_dual(rhs, scope, wrt)?;
            let (x, y) = (a.value, b.value);
            match op {
                BinOp::Add => Dual::combine(a, &b, x + y, 1.0, 1.0),
                BinOp::Sub => Dual::combine(a, &b, x - y, 1.0, -1.0),
                BinOp::Mul => Dual::combine(a, &b, x * y, y, x),
                BinOp::Div => Dual::combine(a, &b, x / y, 1.0 / y, -x / (y * y)),
                BinOp::Pow => {
                    let v = x.powf(y);
                    let da = if y == 0.0 { 0.0 } else { y * x.powf(y - 1.0) };
                    // Constant exponents skip the log term, which is undefined for x <= 0.
                    let db = if b.grad.iter().all(|g| *g == 0.0) {
                        0.0
                    } else {
                        v * x.ln()
                    };
                    Dual::combine(a, &b, v, da, db)
                }
            }
        }
    })
}
