//! Precedence-climbing parser for custom expression formulas.
//!
//! Consumes the token sequence from the scanner and produces exactly one
//! [`Expr`] root. Precedence, lowest to highest:
//!
//! ```text
//! OR < AND < NOT < comparison < + - < * / < unary - < call, [ref], ( )
//! ```
//!
//! Binary operators associate left, except comparisons which do not chain:
//! `a < b < c` is rejected. Function arity and argument kinds are left to
//! the resolver.

use rust_decimal::Decimal;
use thiserror::Error;

use super::ast::{prec, BinaryOp, Expr, ExprKind, FieldRef, Literal, UnaryOp};
use super::lexer::Token;
use super::span::{join, Span};

/// Default limit on nested sub-expressions.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// A grammar violation with the expected and found tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected}, found {found} at {span:?}")]
pub struct ParseError {
    pub span: Span,
    pub expected: String,
    pub found: String,
}

/// Parser state over a scanned token slice.
pub struct Parser<'t, 'src> {
    tokens: &'t [(Token<'src>, Span)],
    pos: usize,
    source_len: usize,
    depth: usize,
    max_depth: usize,
}

impl<'t, 'src> Parser<'t, 'src> {
    pub fn new(tokens: &'t [(Token<'src>, Span)], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            source_len,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Limit how deeply sub-expressions may nest.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Parse the whole token sequence into a single expression.
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expr(0)?;
        if self.peek().is_some() {
            return Err(self.error("an operator or end of input"));
        }
        Ok(expr)
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token<'src>> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn current_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, span)) => span.clone(),
            None => self.source_len..self.source_len,
        }
    }

    fn bump(&mut self) -> Option<(Token<'src>, Span)> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, expected: impl Into<String>) -> ParseError {
        let found = match self.peek() {
            Some(tok) => format!("'{}'", tok),
            None => "end of input".to_string(),
        };
        ParseError {
            span: self.current_span(),
            expected: expected.into(),
            found,
        }
    }

    fn expect(&mut self, token: Token<'src>) -> Result<Span, ParseError> {
        if self.peek() == Some(&token) {
            let (_, span) = self.bump().ok_or_else(|| self.error(format!("'{}'", token)))?;
            Ok(span)
        } else {
            Err(self.error(format!("'{}'", token)))
        }
    }

    fn infix_op(&self) -> Option<BinaryOp> {
        Some(match self.peek()? {
            Token::Or => BinaryOp::Or,
            Token::And => BinaryOp::And,
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Gt => BinaryOp::Gt,
            Token::Le => BinaryOp::Le,
            Token::Ge => BinaryOp::Ge,
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            _ => return None,
        })
    }

    // ========================================================================
    // Grammar
    // ========================================================================

    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.error(format!(
                "an expression nested at most {} levels deep",
                self.max_depth
            )));
        }

        let mut left = self.parse_prefix()?;
        let mut after_comparison = false;

        while let Some(op) = self.infix_op() {
            let op_prec = op.precedence();
            if op_prec < min_prec {
                break;
            }
            if op.is_comparison() && after_comparison {
                return Err(self.error("AND, OR, or end of input (comparisons cannot be chained)"));
            }
            self.bump();
            let right = self.parse_expr(op_prec + 1)?;
            let span = join(&left.span, &right.span);
            left = Expr::new(
                ExprKind::BinaryOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
            after_comparison = op.is_comparison();
        }

        self.depth -= 1;
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("an expression"));
        };
        let start = self.current_span();

        match token {
            Token::Number(text) => {
                let value = Decimal::from_str_exact(text)
                    .map_err(|_| self.error("a number that fits in 28 significant digits"))?;
                self.bump();
                Ok(Expr::new(ExprKind::Literal(Literal::Number(value)), start))
            }
            Token::Str(s) => {
                self.bump();
                Ok(Expr::new(ExprKind::Literal(Literal::String(s)), start))
            }
            Token::Field(name) => {
                self.bump();
                Ok(Expr::new(
                    ExprKind::FieldRef(FieldRef {
                        name: name.to_string(),
                        target: None,
                    }),
                    start,
                ))
            }
            Token::Ident(name) => {
                if self.peek_nth(1) == Some(&Token::LParen) {
                    self.parse_call(name, start)
                } else {
                    self.bump();
                    Ok(Expr::new(
                        ExprKind::FieldRef(FieldRef {
                            name: name.to_string(),
                            target: None,
                        }),
                        start,
                    ))
                }
            }
            Token::LParen => {
                self.bump();
                let inner = self.parse_expr(0)?;
                let end = self.expect(Token::RParen)?;
                Ok(Expr::new(inner.kind, join(&start, &end)))
            }
            Token::Minus => {
                self.bump();
                let operand = self.parse_expr(prec::NEGATE)?;
                let span = join(&start, &operand.span);
                Ok(Expr::new(
                    ExprKind::UnaryOp {
                        op: UnaryOp::Neg,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            Token::Not => {
                self.bump();
                let operand = self.parse_expr(prec::NOT)?;
                let span = join(&start, &operand.span);
                Ok(Expr::new(
                    ExprKind::UnaryOp {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            _ => Err(self.error("an expression")),
        }
    }

    fn parse_call(&mut self, name: &str, start: Span) -> Result<Expr, ParseError> {
        self.bump(); // name
        self.bump(); // (
        let mut args = Vec::new();

        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_expr(0)?);
                match self.peek() {
                    Some(Token::Comma) => {
                        self.bump();
                    }
                    Some(Token::RParen) => break,
                    _ => return Err(self.error("',' or ')'")),
                }
            }
        }

        let end = self.expect(Token::RParen)?;
        Ok(Expr::new(
            ExprKind::Call {
                function: name.to_string(),
                args,
            },
            join(&start, &end),
        ))
    }
}
