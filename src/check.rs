//! Static type checker: one left-to-right pass that builds the symbol
//! table and enforces literal domains.
//!
//! Errors accumulate across statements — the first fatal error inside a
//! statement abandons that statement, and checking resumes at the next one,
//! so a single run can surface several diagnostics. Table columns resolve
//! lazily: a `TreatRange` table starts with unknown columns, and every
//! first reference records the column as `Unknown`.

use std::collections::HashMap;

use crate::ast::{
    Aggregation, BinaryOp, Block, Expr, ExprKind, Literal, Program, Stmt, StmtKind, TypeName,
    UnaryOp,
};
use crate::error::{TypeError, TypeErrorKind};
use crate::intern::{well_known, Interner, Symbol};
use crate::suggest::find_similar;
use crate::token::Span;
use crate::types::{SymbolTable, TableSchema, Type};

/// Check a parsed program. On success the symbol table is carried forward
/// to lowering; on failure every collected diagnostic is returned.
pub fn check(program: &Program<'_>, interner: &Interner) -> Result<SymbolTable, Vec<TypeError>> {
    let mut checker = Checker {
        interner,
        symtab: SymbolTable::new(),
        scopes: Vec::new(),
        errors: Vec::new(),
    };
    for (index, stmt) in program.stmts.iter().enumerate() {
        checker.check_stmt(stmt, index);
    }
    if checker.errors.is_empty() {
        Ok(checker.symtab)
    } else {
        Err(checker.errors)
    }
}

/// Expression context: which tables provide a row scope, and whether
/// aggregate calls are legal (only inside `Group` aggregations).
#[derive(Default, Clone)]
struct ExprCtx {
    row_tables: Vec<Symbol>,
    in_aggregation: bool,
}

impl ExprCtx {
    fn row_of(table: Symbol) -> Self {
        ExprCtx { row_tables: vec![table], in_aggregation: false }
    }

    fn aggregating(&self) -> Self {
        ExprCtx { row_tables: self.row_tables.clone(), in_aggregation: true }
    }
}

struct Checker<'i> {
    interner: &'i Interner,
    symtab: SymbolTable,
    /// Block-local bindings (the `For each row` variable); innermost last.
    scopes: Vec<HashMap<Symbol, Type>>,
    errors: Vec<TypeError>,
}

impl<'i> Checker<'i> {
    fn check_stmt(&mut self, stmt: &Stmt<'_>, index: usize) {
        if let Err(err) = self.try_stmt(stmt, index) {
            self.errors.push(err);
        }
    }

    fn try_stmt(&mut self, stmt: &Stmt<'_>, index: usize) -> Result<(), TypeError> {
        match &stmt.kind {
            StmtKind::OpenWorkbook { .. } => Ok(()),

            StmtKind::TreatRange { table, .. } => {
                self.symtab.tables.insert(*table, TableSchema::lazy(index));
                Ok(())
            }

            StmtKind::SetVar { name, value } => {
                let ty = self.infer(value, &ExprCtx::default())?;
                self.bind_var(*name, ty);
                Ok(())
            }

            StmtKind::AddColumn { column, table, expr } => {
                self.require_table(*table, stmt.span)?;
                let ty = self.infer(expr, &ExprCtx::row_of(*table))?;
                if let Some(schema) = self.symtab.tables.get_mut(table) {
                    schema.columns.insert(*column, ty);
                }
                Ok(())
            }

            StmtKind::Filter { table, predicate } => {
                self.require_table(*table, stmt.span)?;
                let ty = self.infer(predicate, &ExprCtx::row_of(*table))?;
                if !ty.is_boolean_like() {
                    return Err(TypeError::new(
                        TypeErrorKind::NotBoolean { found: ty.to_string() },
                        predicate.span,
                    ));
                }
                Ok(())
            }

            StmtKind::Sort { table, key, .. } => {
                self.require_table(*table, stmt.span)?;
                let ty = self.infer(key, &ExprCtx::row_of(*table))?;
                if !ty.is_orderable() {
                    return Err(TypeError::new(
                        TypeErrorKind::NotOrderable { found: ty.to_string() },
                        key.span,
                    ));
                }
                Ok(())
            }

            StmtKind::Group { table, keys, aggregations } => {
                self.require_table(*table, stmt.span)?;
                let ctx = ExprCtx::row_of(*table);
                let mut columns = HashMap::new();
                for key in keys.iter() {
                    let ty = self.infer(key, &ctx)?;
                    if let Some(name) = key_column_name(key) {
                        columns.insert(name, ty);
                    }
                }
                for Aggregation { name, expr } in aggregations.iter() {
                    let ty = self.infer_aggregation(expr, &ctx)?;
                    columns.insert(*name, ty);
                }
                // The grouped result replaces the table wholesale.
                if let Some(schema) = self.symtab.tables.get_mut(table) {
                    schema.columns = columns;
                    schema.columns_known = true;
                }
                Ok(())
            }

            StmtKind::Join { left, right, on } => {
                self.require_table(*left, stmt.span)?;
                self.require_table(*right, stmt.span)?;
                let ctx = ExprCtx { row_tables: vec![*left, *right], in_aggregation: false };
                let ty = self.infer(on, &ctx)?;
                if !ty.is_boolean_like() {
                    return Err(TypeError::new(
                        TypeErrorKind::NotBoolean { found: ty.to_string() },
                        on.span,
                    ));
                }
                // The joined result keeps the left name, columns merged.
                if let Some(right_schema) = self.symtab.tables.get(right).cloned() {
                    if let Some(left_schema) = self.symtab.tables.get_mut(left) {
                        for (col, ty) in right_schema.columns {
                            left_schema.columns.entry(col).or_insert(ty);
                        }
                        left_schema.columns_known =
                            left_schema.columns_known && right_schema.columns_known;
                    }
                }
                Ok(())
            }

            StmtKind::Export { source, .. } => {
                self.infer(source, &ExprCtx::default())?;
                Ok(())
            }

            StmtKind::ForEach { var, table, body } => {
                self.require_table(*table, stmt.span)?;
                self.scopes.push(HashMap::from([(*var, Type::Row(*table))]));
                self.check_block(body, index);
                self.scopes.pop();
                Ok(())
            }

            StmtKind::If { cond, then_body, else_body } => {
                let ty = self.infer(cond, &ExprCtx::default())?;
                if !ty.is_boolean_like() {
                    return Err(TypeError::new(
                        TypeErrorKind::NotBoolean { found: ty.to_string() },
                        cond.span,
                    ));
                }
                self.scopes.push(HashMap::new());
                self.check_block(then_body, index);
                self.scopes.pop();
                if let Some(else_body) = else_body {
                    self.scopes.push(HashMap::new());
                    self.check_block(else_body, index);
                    self.scopes.pop();
                }
                Ok(())
            }

            StmtKind::UseSystem { .. }
            | StmtKind::LogIn { .. }
            | StmtKind::LogOut
            | StmtKind::GoToPage { .. }
            | StmtKind::Click { .. } => Ok(()),

            StmtKind::EnterField { value, .. } => {
                self.infer(value, &ExprCtx::default())?;
                Ok(())
            }

            StmtKind::Extract { var, .. } => {
                self.bind_var(*var, Type::String);
                Ok(())
            }

            StmtKind::Define { name, ty } => {
                let ty = match ty {
                    TypeName::String => Type::String,
                    TypeName::Number => Type::Number,
                    TypeName::Money => Type::Money(None),
                    TypeName::Date => Type::Date,
                    TypeName::Boolean => Type::Boolean,
                };
                self.bind_var(*name, ty);
                Ok(())
            }

            StmtKind::Call { result } => {
                self.bind_var(*result, Type::Unknown);
                Ok(())
            }

            StmtKind::OnError { action } => {
                self.check_block(action, index);
                Ok(())
            }
        }
    }

    fn check_block(&mut self, block: Block<'_>, parent_index: usize) {
        for stmt in block {
            self.check_stmt(stmt, parent_index);
        }
    }

    /// Bind or rebind a variable; a rebind with a different type widens to
    /// `Unknown`, and the name stays in scope either way.
    fn bind_var(&mut self, name: Symbol, ty: Type) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(existing) = scope.get_mut(&name) {
                *existing = widen(existing.clone(), ty);
                return;
            }
        }
        if let Some(existing) = self.symtab.variables.get_mut(&name) {
            *existing = widen(existing.clone(), ty);
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, ty);
        } else {
            self.symtab.variables.insert(name, ty);
        }
    }

    fn lookup_var(&self, name: Symbol) -> Option<Type> {
        for scope in self.scopes.iter().rev() {
            if let Some(ty) = scope.get(&name) {
                return Some(ty.clone());
            }
        }
        self.symtab.variables.get(&name).cloned()
    }

    fn require_table(&self, table: Symbol, span: Span) -> Result<(), TypeError> {
        if self.symtab.is_table(table) {
            return Ok(());
        }
        let name = self.interner.resolve(table).to_string();
        let suggestion = find_similar(&name, self.table_names(), 2);
        Err(TypeError::new(TypeErrorKind::UnknownTable(name), span).with_suggestion(suggestion))
    }

    fn table_names(&self) -> Vec<String> {
        self.symtab
            .tables
            .keys()
            .map(|s| self.interner.resolve(*s).to_string())
            .collect()
    }

    fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .symtab
            .variables
            .keys()
            .chain(self.symtab.tables.keys())
            .map(|s| self.interner.resolve(*s).to_string())
            .collect();
        for scope in &self.scopes {
            names.extend(scope.keys().map(|s| self.interner.resolve(*s).to_string()));
        }
        names
    }

    fn infer(&mut self, expr: &Expr<'_>, ctx: &ExprCtx) -> Result<Type, TypeError> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(literal_type(lit)),

            ExprKind::Identifier(sym) => self.infer_identifier(*sym, ctx, expr.span),

            ExprKind::ColumnRef { table, column } => {
                self.infer_column(*table, *column, expr.span)
            }

            ExprKind::Binary { op, left, right } => {
                let lt = self.infer(left, ctx)?;
                let rt = self.infer(right, ctx)?;
                self.infer_binary(*op, lt, rt, expr.span)
            }

            ExprKind::Unary { op, operand } => {
                let ty = self.infer(operand, ctx)?;
                match op {
                    UnaryOp::Not => {
                        if ty.is_boolean_like() {
                            Ok(Type::Boolean)
                        } else {
                            Err(TypeError::new(
                                TypeErrorKind::BadUnaryOperand {
                                    op: "not",
                                    operand: ty.to_string(),
                                },
                                expr.span,
                            ))
                        }
                    }
                    UnaryOp::Neg => match ty {
                        Type::Number | Type::Unknown => Ok(Type::Number),
                        Type::Money(c) => Ok(Type::Money(c)),
                        other => Err(TypeError::new(
                            TypeErrorKind::BadUnaryOperand {
                                op: "-",
                                operand: other.to_string(),
                            },
                            expr.span,
                        )),
                    },
                }
            }

            ExprKind::Call { function, args } => self.infer_call(*function, args, ctx, expr.span),
        }
    }

    fn infer_identifier(
        &mut self,
        sym: Symbol,
        ctx: &ExprCtx,
        span: Span,
    ) -> Result<Type, TypeError> {
        if let Some(ty) = self.lookup_var(sym) {
            return Ok(ty);
        }
        // In row context a bare name may be a column of the scoped table.
        for table in &ctx.row_tables {
            if let Some(schema) = self.symtab.tables.get_mut(table) {
                if let Some(ty) = schema.columns.get(&sym) {
                    return Ok(ty.clone());
                }
                if !schema.columns_known {
                    schema.columns.insert(sym, Type::Unknown);
                    return Ok(Type::Unknown);
                }
            }
        }
        if self.symtab.is_table(sym) {
            return Ok(Type::Table);
        }
        let name = self.interner.resolve(sym).to_string();
        let suggestion = find_similar(&name, self.known_names(), 2);
        Err(TypeError::new(TypeErrorKind::UnknownIdentifier(name), span)
            .with_suggestion(suggestion))
    }

    fn infer_column(
        &mut self,
        table: Symbol,
        column: Symbol,
        span: Span,
    ) -> Result<Type, TypeError> {
        // A row variable stands in for its table: `r.C` is `T.C`.
        let table = match self.lookup_var(table) {
            Some(Type::Row(of)) => of,
            _ => table,
        };
        if let Some(schema) = self.symtab.tables.get_mut(&table) {
            if let Some(ty) = schema.columns.get(&column) {
                return Ok(ty.clone());
            }
            if !schema.columns_known {
                schema.columns.insert(column, Type::Unknown);
                return Ok(Type::Unknown);
            }
        } else {
            let name = self.interner.resolve(table).to_string();
            let suggestion = find_similar(&name, self.table_names(), 2);
            return Err(TypeError::new(TypeErrorKind::UnknownTable(name), span)
                .with_suggestion(suggestion));
        }

        // Known column set and the column is not in it.
        let column_names: Vec<String> = self.symtab.tables[&table]
            .columns
            .keys()
            .map(|s| self.interner.resolve(*s).to_string())
            .collect();
        let column_name = self.interner.resolve(column).to_string();
        let suggestion = find_similar(&column_name, column_names, 2);
        Err(TypeError::new(
            TypeErrorKind::UnknownColumn {
                table: self.interner.resolve(table).to_string(),
                column: column_name,
            },
            span,
        )
        .with_suggestion(suggestion))
    }

    fn infer_binary(
        &mut self,
        op: BinaryOp,
        left: Type,
        right: Type,
        span: Span,
    ) -> Result<Type, TypeError> {
        use Type::*;
        let bad = |op: BinaryOp, l: &Type, r: &Type| {
            TypeError::new(
                TypeErrorKind::BadOperands {
                    op: op.as_str(),
                    left: l.to_string(),
                    right: r.to_string(),
                },
                span,
            )
        };

        match op {
            BinaryOp::Add | BinaryOp::Sub => match (&left, &right) {
                (Unknown, _) | (_, Unknown) => Ok(Unknown),
                (Number, Number) => Ok(Number),
                (Money(a), Money(b)) => {
                    let currency = merge_currencies(*a, *b).map_err(|(l, r)| {
                        TypeError::new(TypeErrorKind::CurrencyMismatch { left: l, right: r }, span)
                    })?;
                    Ok(Money(currency))
                }
                // Date algebra: Date - Date is a day count, Date ± Number
                // shifts the date.
                (Date, Date) if op == BinaryOp::Sub => Ok(Number),
                (Date, Number) => Ok(Date),
                (Number, Date) if op == BinaryOp::Add => Ok(Date),
                (String, String) if op == BinaryOp::Add => Ok(String),
                (l, r) => Err(bad(op, l, r)),
            },

            BinaryOp::Mul => match (&left, &right) {
                (Unknown, _) | (_, Unknown) => Ok(Unknown),
                (Number, Number) => Ok(Number),
                (Money(c), Number) | (Number, Money(c)) => Ok(Money(*c)),
                (l, r) => Err(bad(op, l, r)),
            },

            BinaryOp::Div => match (&left, &right) {
                (Unknown, _) | (_, Unknown) => Ok(Unknown),
                (Number, Number) => Ok(Number),
                (Money(c), Number) => Ok(Money(*c)),
                (l, r) => Err(bad(op, l, r)),
            },

            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Gt | BinaryOp::Lt | BinaryOp::GtEq
            | BinaryOp::LtEq => match (&left, &right) {
                (Unknown, _) | (_, Unknown) => Ok(Boolean),
                (Money(a), Money(b)) => {
                    merge_currencies(*a, *b).map_err(|(l, r)| {
                        TypeError::new(TypeErrorKind::CurrencyMismatch { left: l, right: r }, span)
                    })?;
                    Ok(Boolean)
                }
                (Number, Number) | (Date, Date) | (String, String) | (Boolean, Boolean) => {
                    Ok(Boolean)
                }
                (l, r) => Err(bad(op, l, r)),
            },

            BinaryOp::And | BinaryOp::Or => {
                if left.is_boolean_like() && right.is_boolean_like() {
                    Ok(Boolean)
                } else {
                    Err(bad(op, &left, &right))
                }
            }
        }
    }

    fn infer_call(
        &mut self,
        function: Symbol,
        args: &[&Expr<'_>],
        ctx: &ExprCtx,
        span: Span,
    ) -> Result<Type, TypeError> {
        let name = self.interner.resolve(function).to_string();
        let arity = |expected: usize| -> Result<(), TypeError> {
            if args.len() == expected {
                Ok(())
            } else {
                Err(TypeError::new(
                    TypeErrorKind::WrongArity {
                        function: name.clone(),
                        expected,
                        found: args.len(),
                    },
                    span,
                ))
            }
        };

        if function == well_known::TODAY {
            arity(0)?;
            return Ok(Type::Date);
        }

        if function == well_known::DAYS_BETWEEN {
            arity(2)?;
            for arg in args {
                let ty = self.infer(arg, ctx)?;
                if !matches!(ty, Type::Date | Type::Unknown) {
                    return Err(TypeError::new(
                        TypeErrorKind::BadOperands {
                            op: "days_between",
                            left: Type::Date.to_string(),
                            right: ty.to_string(),
                        },
                        arg.span,
                    ));
                }
            }
            return Ok(Type::Number);
        }

        if well_known::AGGREGATES.contains(&function) {
            if !ctx.in_aggregation {
                return Err(TypeError::new(
                    TypeErrorKind::AggregateOutsideGroup(name),
                    span,
                ));
            }
            arity(1)?;
            let ty = self.infer(args[0], ctx)?;
            if function == well_known::COUNT {
                return Ok(Type::Number);
            }
            if function == well_known::AVG {
                return Ok(match ty {
                    Type::Money(c) => Type::Money(c),
                    _ => Type::Number,
                });
            }
            return Ok(ty);
        }

        let suggestion = find_similar(&name, well_known::FUNCTION_NAMES, 2);
        Err(TypeError::new(TypeErrorKind::UnknownFunction(name), span)
            .with_suggestion(suggestion))
    }

    fn infer_aggregation(
        &mut self,
        expr: &Expr<'_>,
        ctx: &ExprCtx,
    ) -> Result<Type, TypeError> {
        self.infer(expr, &ctx.aggregating())
    }
}

fn literal_type(lit: &Literal) -> Type {
    match lit {
        Literal::Str(_) => Type::String,
        Literal::Number(_) => Type::Number,
        Literal::Money { currency, .. } => Type::Money(Some(*currency)),
        Literal::Date(_) => Type::Date,
        Literal::Boolean(_) => Type::Boolean,
    }
}

/// `Money(None)` unifies with anything; two concrete currencies must match.
fn merge_currencies(
    a: Option<crate::token::Currency>,
    b: Option<crate::token::Currency>,
) -> Result<Option<crate::token::Currency>, (crate::token::Currency, crate::token::Currency)> {
    match (a, b) {
        (Some(a), Some(b)) if a != b => Err((a, b)),
        (Some(c), _) | (_, Some(c)) => Ok(Some(c)),
        (None, None) => Ok(None),
    }
}

/// Rebinds keep the new type when it agrees, otherwise widen to Unknown.
fn widen(old: Type, new: Type) -> Type {
    if old == new {
        old
    } else {
        Type::Unknown
    }
}

/// The result column a group key contributes, when it has a nameable shape.
fn key_column_name(key: &Expr<'_>) -> Option<Symbol> {
    match key.kind {
        ExprKind::Identifier(sym) => Some(sym),
        ExprKind::ColumnRef { column, .. } => Some(column),
        _ => None,
    }
}
