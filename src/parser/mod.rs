//! Recursive-descent parser: one token of lookahead, statements dispatched
//! on their leading keyword.
//!
//! Every sentence ends with `.` — a missing period is the single most
//! common user error, so `expect_period` produces the canonical
//! `Expected ., got <KIND> '<lexeme>'` message at the offending token.
//! Blocks (`For each row …:`, `If …:`, `Otherwise:`, `On error:`) are
//! indentation-delimited through the lexer's `Indent`/`Dedent` tokens;
//! `On error:` also accepts a single handler statement on the same line.
//!
//! On an error the parser reports, skips to just past the next `.` (or to
//! the end of the block) and keeps going, so one run can surface several
//! diagnostics.

mod expr;

#[cfg(test)]
mod tests;

use crate::ast::{AstContext, Block, Program, Stmt, StmtKind, TypeName};
use crate::error::{ParseError, ParseErrorKind};
use crate::intern::{well_known, Interner, Symbol};
use crate::suggest::{find_similar, STATEMENT_WORDS};
use crate::token::{Keyword, Punct, Span, Token, TokenKind};

pub(crate) type ParseResult<T> = Result<T, ParseError>;

pub struct Parser<'a, 'int> {
    tokens: Vec<Token>,
    pos: usize,
    pub(crate) ctx: AstContext<'a>,
    pub(crate) interner: &'int mut Interner,
    errors: Vec<ParseError>,
}

/// Parse a token stream into a [`Program`]. Returns every diagnostic the
/// recovery loop collected if any statement failed.
pub fn parse<'a>(
    tokens: Vec<Token>,
    ctx: AstContext<'a>,
    interner: &mut Interner,
) -> Result<Program<'a>, Vec<ParseError>> {
    Parser::new(tokens, ctx, interner).run()
}

impl<'a, 'int> Parser<'a, 'int> {
    pub fn new(tokens: Vec<Token>, ctx: AstContext<'a>, interner: &'int mut Interner) -> Self {
        Parser { tokens, pos: 0, ctx, interner, errors: Vec::new() }
    }

    pub fn run(mut self) -> Result<Program<'a>, Vec<ParseError>> {
        let mut stmts = Vec::new();
        while !self.at_eof() {
            // A dedent at top level is the tail of an already-closed block.
            if self.peek().kind == TokenKind::Dedent {
                self.advance();
                continue;
            }
            match self.parse_statement() {
                Ok(stmt) => stmts.push(stmt),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
        }
        if self.errors.is_empty() {
            Ok(Program { stmts: self.ctx.block(stmts) })
        } else {
            Err(self.errors)
        }
    }

    fn parse_statement(&mut self) -> ParseResult<Stmt<'a>> {
        let span = self.peek().span;
        let kind = match self.peek().kind.clone() {
            TokenKind::Keyword(kw) => match kw {
                Keyword::Open => self.parse_open_workbook()?,
                Keyword::In => self.parse_treat_range()?,
                Keyword::Set => self.parse_set_var()?,
                Keyword::Add => self.parse_add_column()?,
                Keyword::Filter => self.parse_filter()?,
                Keyword::Sort => self.parse_sort()?,
                Keyword::Group => self.parse_group()?,
                Keyword::Join => self.parse_join()?,
                Keyword::Export => self.parse_export()?,
                Keyword::For => self.parse_for_each()?,
                Keyword::If => self.parse_if()?,
                Keyword::Use => self.parse_use_system()?,
                Keyword::Log => self.parse_log()?,
                Keyword::Go => self.parse_go_to_page()?,
                Keyword::Enter => self.parse_enter()?,
                Keyword::Click => self.parse_click()?,
                Keyword::Extract => self.parse_extract()?,
                Keyword::Define => self.parse_define()?,
                Keyword::Call => self.parse_call()?,
                Keyword::On => self.parse_on_error()?,
                kw if kw.is_reserved() => {
                    return Err(ParseError::new(
                        ParseErrorKind::ReservedWord(kw.as_str()),
                        span,
                    ));
                }
                _ => return Err(self.expected_statement()),
            },
            _ => return Err(self.expected_statement()),
        };
        Ok(Stmt { kind, span })
    }

    /// `Open workbook "path".`
    fn parse_open_workbook(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Open
        self.expect_keyword(Keyword::Workbook)?;
        let (path, _) = self.expect_string()?;
        self.expect_period()?;
        Ok(StmtKind::OpenWorkbook { path })
    }

    /// `In sheet "S", treat range A1G999 as table T.`
    fn parse_treat_range(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // In
        self.expect_keyword(Keyword::Sheet)?;
        let (sheet, _) = self.expect_string()?;
        self.expect_punct(Punct::Comma)?;
        self.expect_keyword(Keyword::Treat)?;
        self.expect_keyword(Keyword::Range)?;
        let range = match self.peek().kind {
            TokenKind::Range(range) => {
                self.advance();
                range
            }
            _ => return Err(self.unexpected("a range like A1G999")),
        };
        self.expect_keyword(Keyword::As)?;
        self.expect_keyword(Keyword::Table)?;
        let (table, _) = self.expect_plain_ident()?;
        self.expect_period()?;
        Ok(StmtKind::TreatRange { sheet, range, table })
    }

    /// `Set x to expr.`
    fn parse_set_var(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Set
        let (name, _) = self.expect_plain_ident()?;
        self.expect_keyword(Keyword::To)?;
        let value = self.parse_expr()?;
        self.expect_period()?;
        Ok(StmtKind::SetVar { name, value })
    }

    /// `Add column C to T as expr.`
    fn parse_add_column(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Add
        self.expect_keyword(Keyword::Column)?;
        let (column, _) = self.expect_plain_ident()?;
        self.expect_keyword(Keyword::To)?;
        let (table, _) = self.expect_plain_ident()?;
        self.expect_keyword(Keyword::As)?;
        let expr = self.parse_expr()?;
        self.expect_period()?;
        Ok(StmtKind::AddColumn { column, table, expr })
    }

    /// `Filter T where predicate.`
    fn parse_filter(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Filter
        let (table, _) = self.expect_plain_ident()?;
        self.expect_keyword(Keyword::Where)?;
        let predicate = self.parse_expr()?;
        self.expect_period()?;
        Ok(StmtKind::Filter { table, predicate })
    }

    /// `Sort T by key.` with optional `ascending` / `descending`.
    fn parse_sort(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Sort
        let (table, _) = self.expect_plain_ident()?;
        self.expect_keyword(Keyword::By)?;
        let key = self.parse_expr()?;
        let ascending = if self.eat_keyword(Keyword::Ascending) {
            true
        } else if self.eat_keyword(Keyword::Descending) {
            false
        } else {
            true
        };
        self.expect_period()?;
        Ok(StmtKind::Sort { table, key, ascending })
    }

    /// `Group T by k1, k2 as total = sum(expr), n = count(expr).`
    fn parse_group(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Group
        let (table, _) = self.expect_plain_ident()?;
        self.expect_keyword(Keyword::By)?;
        let mut keys = vec![self.parse_expr()?];
        while self.eat_punct(Punct::Comma) {
            keys.push(self.parse_expr()?);
        }
        self.expect_keyword(Keyword::As)?;
        let mut aggregations = vec![self.parse_aggregation()?];
        while self.eat_punct(Punct::Comma) {
            aggregations.push(self.parse_aggregation()?);
        }
        self.expect_period()?;
        Ok(StmtKind::Group {
            table,
            keys: self.ctx.expr_list(keys),
            aggregations: self.ctx.agg_list(aggregations),
        })
    }

    fn parse_aggregation(&mut self) -> ParseResult<crate::ast::Aggregation<'a>> {
        let (name, _) = self.expect_plain_ident()?;
        self.expect_punct(Punct::Eq)?;
        let expr = self.parse_expr()?;
        Ok(crate::ast::Aggregation { name, expr })
    }

    /// `Join L and R where predicate.`
    fn parse_join(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Join
        let (left, _) = self.expect_plain_ident()?;
        self.expect_keyword(Keyword::And)?;
        let (right, _) = self.expect_plain_ident()?;
        self.expect_keyword(Keyword::Where)?;
        let on = self.parse_expr()?;
        self.expect_period()?;
        Ok(StmtKind::Join { left, right, on })
    }

    /// `Export source to "path".`
    fn parse_export(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Export
        let source = self.parse_expr()?;
        self.expect_keyword(Keyword::To)?;
        let (path, _) = self.expect_string()?;
        self.expect_period()?;
        Ok(StmtKind::Export { source, path })
    }

    /// `For each row r in T:` + indented block.
    fn parse_for_each(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // For
        self.expect_keyword(Keyword::Each)?;
        self.expect_keyword(Keyword::Row)?;
        let (var, _) = self.expect_plain_ident()?;
        self.expect_keyword(Keyword::LowerIn)?;
        let (table, _) = self.expect_plain_ident()?;
        let body = self.parse_block()?;
        Ok(StmtKind::ForEach { var, table, body })
    }

    /// `If cond:` block, optional `Otherwise:` block.
    fn parse_if(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // If
        let cond = self.parse_expr()?;
        let then_body = self.parse_block()?;
        let else_body = if self.eat_keyword(Keyword::Otherwise) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(StmtKind::If { cond, then_body, else_body })
    }

    /// `Use system "name" version "v".`
    fn parse_use_system(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Use
        self.expect_keyword(Keyword::System)?;
        let (name, _) = self.expect_string()?;
        self.expect_keyword(Keyword::Version)?;
        let (version, _) = self.expect_string()?;
        self.expect_period()?;
        Ok(StmtKind::UseSystem { name, version })
    }

    /// `Log in.`, `Log in as credential "c".`, `Log out.` — `out` is not in
    /// the keyword set, so it arrives as an identifier.
    fn parse_log(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Log
        if self.eat_keyword(Keyword::LowerIn) {
            let credential = if self.eat_keyword(Keyword::As) {
                self.expect_keyword(Keyword::Credential)?;
                let (cred, _) = self.expect_string()?;
                Some(cred)
            } else {
                None
            };
            self.expect_period()?;
            return Ok(StmtKind::LogIn { credential });
        }
        if self.check_ident(well_known::OUT) {
            self.advance();
            self.expect_period()?;
            return Ok(StmtKind::LogOut);
        }
        Err(self.unexpected("in or out"))
    }

    /// `Go to page "name".`
    fn parse_go_to_page(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Go
        self.expect_keyword(Keyword::To)?;
        self.expect_keyword(Keyword::Page)?;
        let (name, _) = self.expect_string()?;
        self.expect_period()?;
        Ok(StmtKind::GoToPage { name })
    }

    /// `Enter "selector" = expr.`
    fn parse_enter(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Enter
        let (selector, _) = self.expect_string()?;
        self.expect_punct(Punct::Eq)?;
        let value = self.parse_expr()?;
        self.expect_period()?;
        Ok(StmtKind::EnterField { selector, value })
    }

    /// `Click "selector".`
    fn parse_click(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Click
        let (selector, _) = self.expect_string()?;
        self.expect_period()?;
        Ok(StmtKind::Click { selector })
    }

    /// `Extract x from field "selector".` — `field` is contextual, like
    /// `out`.
    fn parse_extract(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Extract
        let (var, _) = self.expect_plain_ident()?;
        self.expect_keyword(Keyword::From)?;
        if !self.check_ident(well_known::FIELD) {
            return Err(self.unexpected("field"));
        }
        self.advance();
        let (selector, _) = self.expect_string()?;
        self.expect_period()?;
        Ok(StmtKind::Extract { var, selector })
    }

    /// `Define x as Number.`
    fn parse_define(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Define
        let (name, _) = self.expect_plain_ident()?;
        self.expect_keyword(Keyword::As)?;
        let span = self.peek().span;
        let word = match self.peek().kind {
            TokenKind::Ident(sym) => self.interner.resolve(sym).to_string(),
            _ => return Err(self.unexpected("a type name")),
        };
        let ty = TypeName::from_word(&word)
            .ok_or_else(|| ParseError::new(ParseErrorKind::BadTypeName(word), span))?;
        self.advance();
        self.expect_period()?;
        Ok(StmtKind::Define { name, ty })
    }

    /// `Call result x.`
    fn parse_call(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // Call
        self.expect_keyword(Keyword::Result)?;
        let (result, _) = self.expect_plain_ident()?;
        self.expect_period()?;
        Ok(StmtKind::Call { result })
    }

    /// `On error:` — either one handler statement inline or an indented
    /// block.
    fn parse_on_error(&mut self) -> ParseResult<StmtKind<'a>> {
        self.advance(); // On
        self.expect_keyword(Keyword::Error)?;
        self.expect_punct(Punct::Colon)?;
        let action = if self.peek().kind == TokenKind::Indent {
            self.parse_block_body()?
        } else {
            let stmt = self.parse_statement()?;
            self.ctx.block(vec![stmt])
        };
        Ok(StmtKind::OnError { action })
    }

    /// `:` then an indented run of statements.
    fn parse_block(&mut self) -> ParseResult<Block<'a>> {
        self.expect_punct(Punct::Colon)?;
        self.parse_block_body()
    }

    fn parse_block_body(&mut self) -> ParseResult<Block<'a>> {
        if self.peek().kind != TokenKind::Indent {
            return Err(self.unexpected("an indented block"));
        }
        self.advance(); // Indent
        let mut stmts = Vec::new();
        while self.peek().kind != TokenKind::Dedent && !self.at_eof() {
            match self.parse_statement() {
                Ok(stmt) => stmts.push(stmt),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
        }
        if self.peek().kind == TokenKind::Dedent {
            self.advance();
        }
        Ok(self.ctx.block(stmts))
    }

    /// Skip to just past the next `.`, or stop at a block boundary.
    fn synchronize(&mut self) {
        while !self.at_eof() {
            match &self.peek().kind {
                TokenKind::Punct(Punct::Period) => {
                    self.advance();
                    return;
                }
                TokenKind::Dedent => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // Token plumbing.

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub(crate) fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.peek().kind.is_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_punct(&mut self, p: Punct) -> bool {
        if self.peek().kind.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> ParseResult<Token> {
        if self.peek().kind.is_keyword(kw) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(kw.as_str()))
        }
    }

    pub(crate) fn expect_punct(&mut self, p: Punct) -> ParseResult<Token> {
        if self.peek().kind.is_punct(p) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(p.as_str()))
        }
    }

    fn expect_period(&mut self) -> ParseResult<Token> {
        self.expect_punct(Punct::Period)
    }

    fn expect_string(&mut self) -> ParseResult<(Symbol, Span)> {
        match self.peek().kind {
            TokenKind::Str(sym) => {
                let span = self.peek().span;
                self.advance();
                Ok((sym, span))
            }
            _ => Err(self.unexpected("a string literal")),
        }
    }

    /// An identifier with no dot in it (variable, table or column name).
    pub(crate) fn expect_plain_ident(&mut self) -> ParseResult<(Symbol, Span)> {
        match self.peek().kind {
            TokenKind::Ident(sym) => {
                let span = self.peek().span;
                if self.interner.resolve(sym).contains('.') {
                    return Err(self.unexpected("an identifier"));
                }
                self.advance();
                Ok((sym, span))
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    /// Contextual words (`out`, `field`) arrive as identifiers; they are
    /// pre-seeded in the interner, so a symbol comparison suffices.
    fn check_ident(&self, expected: Symbol) -> bool {
        matches!(self.peek().kind, TokenKind::Ident(sym) if sym == expected)
    }

    pub(crate) fn unexpected(&self, expected: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError::new(
            ParseErrorKind::Unexpected {
                expected: expected.into(),
                found_kind: token.kind.category(),
                found_lexeme: self.interner.resolve(token.lexeme).to_string(),
            },
            token.span,
        )
    }

    fn expected_statement(&self) -> ParseError {
        let token = self.peek();
        let lexeme = self.interner.resolve(token.lexeme).to_string();
        let suggestion = find_similar(&lexeme, STATEMENT_WORDS.iter(), 2);
        ParseError::new(
            ParseErrorKind::ExpectedStatement {
                found_kind: token.kind.category(),
                found_lexeme: lexeme,
            },
            token.span,
        )
        .with_suggestion(suggestion)
    }
}
