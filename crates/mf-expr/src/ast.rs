//! Expression syntax tree.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "**",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinOp::Add | BinOp::Sub => 1,
            BinOp::Mul | BinOp::Div => 2,
            BinOp::Pow => 4,
        }
    }
}

/// Intrinsic functions of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sqrt,
    Exp,
    Log,
    Log10,
    Sin,
    Cos,
    Tan,
    Abs,
}

impl Func {
    /// Resolve a function name, accepting an optional `math.` prefix.
    pub fn from_name(name: &str) -> Option<Func> {
        let bare = name.strip_prefix("math.").unwrap_or(name);
        Some(match bare {
            "sqrt" => Func::Sqrt,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "abs" => Func::Abs,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Sqrt => "sqrt",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Log10 => "log10",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Abs => "abs",
        }
    }
}

/// Comparison joining the two sides of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Lt,
    Gt,
}

impl RelOp {
    pub fn symbol(self) -> &'static str {
        match self {
            RelOp::Eq => "=",
            RelOp::Lt => "<",
            RelOp::Gt => ">",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Variable path, index groups included (`A.c[2]`).
    Var(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Func,
        arg: Box<Expr>,
    },
}

impl Expr {
    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Neg(_) => 3,
            _ => 5,
        }
    }

    /// Visit every variable path in left-to-right order.
    pub fn visit_vars<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Expr::Number(_) => {}
            Expr::Var(path) => f(path),
            Expr::Neg(inner) | Expr::Call { arg: inner, .. } => inner.visit_vars(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.visit_vars(f);
                rhs.visit_vars(f);
            }
        }
    }

    /// Copy of this tree with variable paths replaced through `rename`.
    pub fn map_vars(&self, rename: &impl Fn(&str) -> Option<String>) -> Expr {
        match self {
            Expr::Number(v) => Expr::Number(*v),
            Expr::Var(path) => Expr::Var(rename(path).unwrap_or_else(|| path.clone())),
            Expr::Neg(inner) => Expr::Neg(Box::new(inner.map_vars(rename))),
            Expr::Call { func, arg } => Expr::Call {
                func: *func,
                arg: Box::new(arg.map_vars(rename)),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(lhs.map_vars(rename)),
                rhs: Box::new(rhs.map_vars(rename)),
            },
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(v) => write!(f, "{v}"),
            Expr::Var(path) => f.write_str(path),
            Expr::Neg(inner) => {
                if inner.precedence() < 3 {
                    write!(f, "-({inner})")
                } else {
                    write!(f, "-{inner}")
                }
            }
            Expr::Call { func, arg } => write!(f, "{}({arg})", func.name()),
            Expr::Binary { op, lhs, rhs } => {
                let p = op.precedence();
                // `**` is right-associative, everything else left-associative.
                let (wrap_l, wrap_r) = if *op == BinOp::Pow {
                    (lhs.precedence() <= p, rhs.precedence() < p)
                } else {
                    (lhs.precedence() < p, rhs.precedence() <= p)
                };
                if wrap_l {
                    write!(f, "({lhs})")?;
                } else {
                    write!(f, "{lhs}")?;
                }
                write!(f, " {} ", op.symbol())?;
                if wrap_r {
                    write!(f, "({rhs})")
                } else {
                    write!(f, "{rhs}")
                }
            }
        }
    }
}
