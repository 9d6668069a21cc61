//! Recursive-descent parser for expressions and relations.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! relation := sum (('=' | '<' | '>') sum)?
//! sum      := product (('+' | '-') product)*
//! product  := unary (('*' | '/') unary)*
//! unary    := ('-' | '+') unary | power
//! power    := atom ('**' unary)?
//! atom     := number | path | path '(' sum ')' | '(' sum ')'
//! path     := ident ('.' ident | '[' index ']')*
//! ```

use crate::ast::{BinOp, Expr, Func, RelOp};
use crate::error::{ExprError, ExprResult};
use crate::lexer::{Lexer, Token, TokenKind};

pub struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(text: &'a str) -> ExprResult<Self> {
        let tokens = Lexer::new(text).tokenize()?;
        Ok(Self {
            text,
            tokens,
            pos: 0,
        })
    }

    /// Parse a complete arithmetic expression.
    pub fn parse_expr(mut self) -> ExprResult<Expr> {
        let expr = self.sum()?;
        self.expect_eof()?;
        Ok(expr)
    }

    /// Parse `lhs <op> rhs`; a bare expression yields `None` for the operator.
    pub fn parse_relation(mut self) -> ExprResult<(Expr, Option<(RelOp, Expr)>)> {
        let lhs = self.sum()?;
        let op = match self.peek() {
            TokenKind::Equals => Some(RelOp::Eq),
            TokenKind::Less => Some(RelOp::Lt),
            TokenKind::Greater => Some(RelOp::Gt),
            _ => None,
        };
        let rest = match op {
            Some(op) => {
                self.pos += 1;
                Some((op, self.sum()?))
            }
            None => None,
        };
        self.expect_eof()?;
        Ok((lhs, rest))
    }

    fn peek(&self) -> &TokenKind {
        // The token stream always ends with Eof and `pos` never passes it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn column(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].column
    }

    fn bump(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if kind != TokenKind::Eof {
            self.pos += 1;
        }
        kind
    }

    fn error(&self, what: impl Into<String>) -> ExprError {
        ExprError::Parse {
            text: self.text.to_string(),
            column: self.column(),
            what: what.into(),
        }
    }

    fn expect_eof(&self) -> ExprResult<()> {
        match self.peek() {
            TokenKind::Eof => Ok(()),
            other => Err(self.error(format!("unexpected trailing {other:?}"))),
        }
    }

    fn sum(&mut self) -> ExprResult<Expr> {
        let mut lhs = self.product()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.product()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn product(&mut self) -> ExprResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> ExprResult<Expr> {
        match self.peek() {
            TokenKind::Minus => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            TokenKind::Plus => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> ExprResult<Expr> {
        let base = self.atom()?;
        if *self.peek() == TokenKind::StarStar {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn atom(&mut self) -> ExprResult<Expr> {
        match self.bump() {
            TokenKind::Number(v) => Ok(Expr::Number(v)),
            TokenKind::LParen => {
                let inner = self.sum()?;
                match self.bump() {
                    TokenKind::RParen => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            TokenKind::Ident(first) => {
                let path = self.path_tail(first)?;
                if *self.peek() == TokenKind::LParen {
                    let func =
                        Func::from_name(&path).ok_or(ExprError::UnknownFunction { name: path })?;
                    self.pos += 1;
                    let arg = self.sum()?;
                    match self.bump() {
                        TokenKind::RParen => Ok(Expr::Call {
                            func,
                            arg: Box::new(arg),
                        }),
                        _ => Err(self.error("expected ')' after function argument")),
                    }
                } else {
                    Ok(Expr::Var(path))
                }
            }
            other => {
                if other != TokenKind::Eof {
                    self.pos -= 1;
                }
                Err(self.error(format!("unexpected {other:?}")))
            }
        }
    }

    fn path_tail(&mut self, first: String) -> ExprResult<String> {
        let mut path = first;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.pos += 1;
                    match self.bump() {
                        TokenKind::Ident(seg) => {
                            path.push('.');
                            path.push_str(&seg);
                        }
                        _ => return Err(self.error("expected name after '.'")),
                    }
                }
                TokenKind::Index(raw) => {
                    if raw.is_empty() {
                        return Err(self.error("empty index"));
                    }
                    path.push('[');
                    path.push_str(raw);
                    path.push(']');
                    self.pos += 1;
                }
                _ => return Ok(path),
            }
        }
    }
}
