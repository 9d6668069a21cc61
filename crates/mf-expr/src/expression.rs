//! Parsed expressions with variable-reference queries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::ast::{Expr, RelOp};
use crate::error::{ExprError, ExprResult};
use crate::eval::{self, Dual, Scope};
use crate::parser::Parser;

/// Component name of a dotted path, if any (`A.c[2]` -> `A`, `b[1]` -> none).
fn compname(path: &str) -> Option<&str> {
    let head_end = path.find('[').unwrap_or(path.len());
    let head = &path[..head_end];
    head.split_once('.').map(|(comp, _)| comp)
}

/// True when `path` is `name` or a sub-path of it (`name.x`, `name[3]`).
pub fn path_refers_to(path: &str, name: &str) -> bool {
    match path.strip_prefix(name) {
        Some("") => true,
        Some(rest) => rest.starts_with('.') || rest.starts_with('['),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    text: String,
    ast: Expr,
}

impl Expression {
    pub fn parse(text: &str) -> ExprResult<Self> {
        let ast = Parser::new(text)?.parse_expr()?;
        Ok(Self {
            text: text.trim().to_string(),
            ast,
        })
    }

    pub fn from_ast(ast: Expr) -> Self {
        Self {
            text: ast.to_string(),
            ast,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// The path when the expression is a single variable reference.
    pub fn as_var(&self) -> Option<&str> {
        match &self.ast {
            Expr::Var(path) => Some(path),
            _ => None,
        }
    }

    /// Distinct variable paths in order of first appearance.
    pub fn referenced_varpaths(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        self.ast.visit_vars(&mut |p| {
            if seen.insert(p) {
                out.push(p.to_string());
            }
        });
        out
    }

    pub fn referenced_compnames(&self) -> BTreeSet<String> {
        self.referenced_varpaths()
            .iter()
            .filter_map(|p| compname(p).map(str::to_string))
            .collect()
    }

    /// True if any referenced path is `name` or lies below it.
    pub fn refers_to(&self, name: &str) -> bool {
        let mut hit = false;
        self.ast.visit_vars(&mut |p| {
            hit |= path_refers_to(p, name) || compname(p) == Some(name);
        });
        hit
    }

    /// Copy with variable paths substituted through `mapping`.
    pub fn renamed(&self, mapping: &BTreeMap<String, String>) -> Expression {
        Expression::from_ast(self.ast.map_vars(&|p| mapping.get(p).cloned()))
    }

    pub fn evaluate(&self, scope: &dyn Scope) -> ExprResult<f64> {
        eval::evaluate(&self.ast, scope)
    }

    /// Value and gradient with respect to every referenced path, in
    /// `referenced_varpaths` order.
    pub fn gradient(&self, scope: &dyn Scope) -> ExprResult<(Vec<String>, Dual)> {
        let wrt = self.referenced_varpaths();
        let dual = eval::evaluate_dual(&self.ast, scope, &wrt)?;
        Ok((wrt, dual))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// `lhs <op> rhs`, as written in driver constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub lhs: Expression,
    pub op: RelOp,
    pub rhs: Expression,
}

impl Relation {
    pub fn parse(text: &str) -> ExprResult<Self> {
        let (lhs, rest) = Parser::new(text)?.parse_relation()?;
        let (op, rhs) = rest.ok_or_else(|| ExprError::NotARelation {
            text: text.to_string(),
        })?;
        Ok(Self {
            lhs: Expression::from_ast(lhs),
            op,
            rhs: Expression::from_ast(rhs),
        })
    }

    pub fn referenced_varpaths(&self) -> Vec<String> {
        let mut out = self.lhs.referenced_varpaths();
        for p in self.rhs.referenced_varpaths() {
            if !out.contains(&p) {
                out.push(p);
            }
        }
        out
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op.symbol(), self.rhs)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn leaf() -> impl Strategy<Value = Expr> {
        prop_oneof![
            (0u32..100).prop_map(|v| Expr::Number(v as f64)),
            prop::sample::select(vec!["a", "B.x", "c[2]"]).prop_map(|s| Expr::Var(s.to_string())),
        ]
    }

    fn tree() -> impl Strategy<Value = Expr> {
        use crate::ast::BinOp;
        leaf().prop_recursive(4, 32, 2, |inner| {
            prop_oneof![
                inner.clone().prop_map(|e| Expr::Neg(Box::new(e))),
                (
                    prop::sample::select(vec![
                        BinOp::Add,
                        BinOp::Sub,
                        BinOp::Mul,
                        BinOp::Div,
                        BinOp::Pow
                    ]),
                    inner.clone(),
                    inner
                )
                    .prop_map(|(op, l, r)| Expr::Binary {
                        op,
                        lhs: Box::new(l),
                        rhs: Box::new(r),
                    }),
            ]
        })
    }

    proptest! {
        #[test]
        fn display_reparses_to_same_tree(e in tree()) {
            let text = e.to_string();
            let back = Expression::parse(&text).unwrap();
            prop_assert_eq!(back.ast(), &e);
        }
    }
}
