//! Expression parsing, precedence climbing from `or` down to primaries.
//!
//! Precedence (loosest first): `or`, `and`, `not`, comparisons, `+ -`,
//! `* /`, unary `-`, primary. Comparisons are non-associative — chaining
//! them is a syntax error. A binary node's span is the operator token, so
//! type errors like a currency mismatch point at the operator.

use super::{ParseResult, Parser};
use crate::ast::{BinaryOp, Expr, ExprKind, Literal, UnaryOp};
use crate::error::{ParseError, ParseErrorKind};
use crate::token::{Keyword, Punct, TokenKind};

impl<'a, 'int> Parser<'a, 'int> {
    pub(crate) fn parse_expr(&mut self) -> ParseResult<&'a Expr<'a>> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<&'a Expr<'a>> {
        let mut left = self.parse_and()?;
        while self.peek().kind.is_keyword(Keyword::Or) {
            let span = self.advance().span;
            let right = self.parse_and()?;
            left = self.ctx.expr(
                ExprKind::Binary { op: BinaryOp::Or, left, right },
                span,
            );
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<&'a Expr<'a>> {
        let mut left = self.parse_not()?;
        while self.peek().kind.is_keyword(Keyword::And) {
            let span = self.advance().span;
            let right = self.parse_not()?;
            left = self.ctx.expr(
                ExprKind::Binary { op: BinaryOp::And, left, right },
                span,
            );
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<&'a Expr<'a>> {
        if self.peek().kind.is_keyword(Keyword::Not) {
            let span = self.advance().span;
            let operand = self.parse_not()?;
            return Ok(self.ctx.expr(
                ExprKind::Unary { op: UnaryOp::Not, operand },
                span,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<&'a Expr<'a>> {
        let left = self.parse_additive()?;
        let Some(op) = comparison_op(&self.peek().kind) else {
            return Ok(left);
        };
        let span = self.advance().span;
        let right = self.parse_additive()?;
        if comparison_op(&self.peek().kind).is_some() {
            return Err(ParseError::new(
                ParseErrorKind::ChainedComparison,
                self.peek().span,
            ));
        }
        Ok(self.ctx.expr(ExprKind::Binary { op, left, right }, span))
    }

    fn parse_additive(&mut self) -> ParseResult<&'a Expr<'a>> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Punct(Punct::Plus) => BinaryOp::Add,
                TokenKind::Punct(Punct::Minus) => BinaryOp::Sub,
                _ => break,
            };
            let span = self.advance().span;
            let right = self.parse_multiplicative()?;
            left = self.ctx.expr(ExprKind::Binary { op, left, right }, span);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<&'a Expr<'a>> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Punct(Punct::Star) => BinaryOp::Mul,
                TokenKind::Punct(Punct::Slash) => BinaryOp::Div,
                _ => break,
            };
            let span = self.advance().span;
            let right = self.parse_unary()?;
            left = self.ctx.expr(ExprKind::Binary { op, left, right }, span);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<&'a Expr<'a>> {
        if self.peek().kind.is_punct(Punct::Minus) {
            let span = self.advance().span;
            let operand = self.parse_unary()?;
            return Ok(self.ctx.expr(
                ExprKind::Unary { op: UnaryOp::Neg, operand },
                span,
            ));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ParseResult<&'a Expr<'a>> {
        let span = self.peek().span;
        match self.peek().kind.clone() {
            TokenKind::Str(sym) => {
                self.advance();
                Ok(self.ctx.expr(ExprKind::Literal(Literal::Str(sym)), span))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(self.ctx.expr(ExprKind::Literal(Literal::Number(n)), span))
            }
            TokenKind::Money { currency, amount } => {
                self.advance();
                Ok(self
                    .ctx
                    .expr(ExprKind::Literal(Literal::Money { currency, amount }), span))
            }
            TokenKind::Date(date) => {
                self.advance();
                Ok(self.ctx.expr(ExprKind::Literal(Literal::Date(date)), span))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(self.ctx.expr(ExprKind::Literal(Literal::Boolean(true)), span))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(self.ctx.expr(ExprKind::Literal(Literal::Boolean(false)), span))
            }
            TokenKind::Ident(sym) => {
                self.advance();
                let text = self.interner.resolve(sym).to_string();
                if text.contains('.') {
                    let mut parts = text.split('.');
                    let (table, column) = (parts.next().unwrap(), parts.next().unwrap());
                    if parts.next().is_some() {
                        return Err(ParseError::new(
                            ParseErrorKind::BadQualifiedName(text.clone()),
                            span,
                        ));
                    }
                    let table = self.interner.intern(table);
                    let column = self.interner.intern(column);
                    return Ok(self.ctx.expr(ExprKind::ColumnRef { table, column }, span));
                }
                if self.peek().kind.is_punct(Punct::LParen) {
                    return self.parse_call_args(sym, span);
                }
                Ok(self.ctx.expr(ExprKind::Identifier(sym), span))
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                Ok(inner)
            }
            _ => {
                let token = self.peek();
                Err(ParseError::new(
                    ParseErrorKind::ExpectedExpression {
                        found_kind: token.kind.category(),
                        found_lexeme: self.interner.resolve(token.lexeme).to_string(),
                    },
                    token.span,
                ))
            }
        }
    }

    fn parse_call_args(
        &mut self,
        function: crate::intern::Symbol,
        span: crate::token::Span,
    ) -> ParseResult<&'a Expr<'a>> {
        self.expect_punct(Punct::LParen)?;
        let mut args = Vec::new();
        if !self.peek().kind.is_punct(Punct::RParen) {
            args.push(self.parse_expr()?);
            while self.eat_punct(Punct::Comma) {
                args.push(self.parse_expr()?);
            }
        }
        self.expect_punct(Punct::RParen)?;
        let args = self.ctx.expr_list(args);
        Ok(self.ctx.expr(ExprKind::Call { function, args }, span))
    }
}

fn comparison_op(kind: &TokenKind) -> Option<BinaryOp> {
    match kind {
        TokenKind::Punct(Punct::Eq) => Some(BinaryOp::Eq),
        TokenKind::Punct(Punct::NotEq) => Some(BinaryOp::NotEq),
        TokenKind::Punct(Punct::Gt) => Some(BinaryOp::Gt),
        TokenKind::Punct(Punct::Lt) => Some(BinaryOp::Lt),
        TokenKind::Punct(Punct::GtEq) => Some(BinaryOp::GtEq),
        TokenKind::Punct(Punct::LtEq) => Some(BinaryOp::LtEq),
        _ => None,
    }
}
