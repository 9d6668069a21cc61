//! Tokenizer for expression text.

use crate::error::{ExprError, ExprResult};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    /// One path segment or function name.
    Ident(String),
    /// Raw, whitespace-free contents of a `[...]` group.
    Index(String),
    Dot,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Equals,
    Less,
    Greater,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-indexed column of the first character.
    pub column: usize,
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    /// Tokenize the whole input, ending with `Eof`.
    pub fn tokenize(mut self) -> ExprResult<Vec<Token>> {
        let mut out = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = tok.kind == TokenKind::Eof;
            out.push(tok);
            if done {
                return Ok(out);
            }
        }
    }

    fn error(&self, column: usize, what: impl Into<String>) -> ExprError {
        ExprError::Lex {
            text: self.input.to_string(),
            column,
            what: what.into(),
        }
    }

    fn next_token(&mut self) -> ExprResult<Token> {
        while self.chars.peek().is_some_and(|(_, c)| c.is_whitespace()) {
            self.chars.next();
        }
        let Some(&(pos, ch)) = self.chars.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                column: self.input.len() + 1,
            });
        };
        let column = pos + 1;

        let kind = match ch {
            '0'..='9' => self.read_number(pos)?,
            c if c.is_ascii_alphabetic() || c == '_' => TokenKind::Ident(self.read_ident(pos)),
            '[' => {
                self.chars.next();
                let mut raw = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, ']')) => break,
                        Some((_, c)) if c.is_whitespace() => {}
                        Some((_, '[')) => return Err(self.error(column, "nested '['")),
                        Some((_, c)) => raw.push(c),
                        None => return Err(self.error(column, "unterminated '['")),
                    }
                }
                TokenKind::Index(raw)
            }
            '*' => {
                self.chars.next();
                if self.chars.next_if(|(_, c)| *c == '*').is_some() {
                    TokenKind::StarStar
                } else {
                    TokenKind::Star
                }
            }
            '=' => {
                self.chars.next();
                self.chars.next_if(|(_, c)| *c == '=');
                TokenKind::Equals
            }
            '<' | '>' => {
                self.chars.next();
                // `<=`/`>=` are treated like their strict forms.
                self.chars.next_if(|(_, c)| *c == '=');
                if ch == '<' {
                    TokenKind::Less
                } else {
                    TokenKind::Greater
                }
            }
            _ => {
                self.chars.next();
                match ch {
                    '.' => TokenKind::Dot,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '/' => TokenKind::Slash,
                    '^' => TokenKind::StarStar,
                    other => return Err(self.error(column, format!("unexpected character '{other}'"))),
                }
            }
        };
        Ok(Token { kind, column })
    }

    fn read_ident(&mut self, start: usize) -> String {
        let mut end = start;
        while let Some(&(pos, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                end = pos + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        self.input[start..end].to_string()
    }

    fn read_number(&mut self, start: usize) -> ExprResult<TokenKind> {
        let mut end = start;
        let mut seen_exp = false;
        let mut prev = ' ';
        while let Some(&(pos, c)) = self.chars.peek() {
            let accept = c.is_ascii_digit()
                || c == '.'
                || (!seen_exp && (c == 'e' || c == 'E'))
                || ((c == '+' || c == '-') && (prev == 'e' || prev == 'E'));
            if !accept {
                break;
            }
            if c == 'e' || c == 'E' {
                seen_exp = true;
            }
            prev = c;
            end = pos + 1;
            self.chars.next();
        }
        let text = &self.input[start..end];
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(start + 1, format!("invalid number '{text}'")))
    }
}
