//! Lowering: checked AST → IR.
//!
//! Deterministic and stable: each statement emits exactly one top-level
//! record in source order; compound statements nest their bodies as
//! `Block` args. Expressions lower verbatim to `ExprTree`s — no folding,
//! no simplification. Identifier arguments resolve to `TableRef` or
//! `VarRef` through the symbol table the checker built; interned names
//! resolve to owned strings so the IR outlives the arenas.

use crate::ast::{
    Aggregation, Block, Expr, ExprKind, Literal, Program, Stmt, StmtKind, UnaryOp,
};
use crate::intern::{Interner, Symbol};
use crate::ir::{ExprNode, OpCode, OpRecord, Scalar, Value};
use crate::types::SymbolTable;

/// Lower a checked program. Infallible: anything the checker accepted has
/// a lowering.
pub fn lower(program: &Program<'_>, symtab: &SymbolTable, interner: &Interner) -> Vec<OpRecord> {
    let lowering = Lowering { symtab, interner };
    lowering.lower_block(program.stmts)
}

struct Lowering<'c> {
    symtab: &'c SymbolTable,
    interner: &'c Interner,
}

impl<'c> Lowering<'c> {
    fn lower_block(&self, block: Block<'_>) -> Vec<OpRecord> {
        block.iter().map(|stmt| self.lower_stmt(stmt)).collect()
    }

    fn lower_stmt(&self, stmt: &Stmt<'_>) -> OpRecord {
        match &stmt.kind {
            StmtKind::OpenWorkbook { path } => OpRecord::new(OpCode::ExcelOpenWorkbook)
                .arg("path", self.string(*path)),

            StmtKind::TreatRange { sheet, range, table } => {
                OpRecord::new(OpCode::ExcelReadTable)
                    .arg("sheet", self.string(*sheet))
                    .arg("range", Value::Literal(Scalar::Range(*range)))
                    .arg("name", self.string(*table))
            }

            StmtKind::SetVar { name, value } => OpRecord::new(OpCode::SetVar)
                .arg("name", self.string(*name))
                .arg("value", self.value(value)),

            StmtKind::AddColumn { column, table, expr } => {
                OpRecord::new(OpCode::TableAddColumn)
                    .arg("table", self.table_ref(*table))
                    .arg("column", self.string(*column))
                    .arg("expr", Value::ExprTree(self.expr(expr)))
            }

            StmtKind::Filter { table, predicate } => OpRecord::new(OpCode::TableFilter)
                .arg("table", self.table_ref(*table))
                .arg("predicate", Value::ExprTree(self.expr(predicate))),

            StmtKind::Sort { table, key, ascending } => OpRecord::new(OpCode::TableSort)
                .arg("table", self.table_ref(*table))
                .arg("key", Value::ExprTree(self.expr(key)))
                .arg("ascending", Value::Literal(Scalar::Bool(*ascending))),

            StmtKind::Group { table, keys, aggregations } => {
                let keys = keys
                    .iter()
                    .map(|key| Value::ExprTree(self.expr(key)))
                    .collect();
                let aggregations = aggregations
                    .iter()
                    .map(|Aggregation { name, expr }| {
                        Value::List(vec![
                            self.string(*name),
                            Value::ExprTree(self.expr(expr)),
                        ])
                    })
                    .collect();
                OpRecord::new(OpCode::TableGroup)
                    .arg("table", self.table_ref(*table))
                    .arg("keys", Value::List(keys))
                    .arg("aggregations", Value::List(aggregations))
            }

            StmtKind::Join { left, right, on } => OpRecord::new(OpCode::TableJoin)
                .arg("left", self.table_ref(*left))
                .arg("right", self.table_ref(*right))
                .arg("on", Value::ExprTree(self.expr(on))),

            StmtKind::Export { source, path } => OpRecord::new(OpCode::ExcelExport)
                .arg("source", self.value(source))
                .arg("path", self.string(*path)),

            StmtKind::ForEach { var, table, body } => OpRecord::new(OpCode::ControlForEach)
                .arg("var", self.string(*var))
                .arg("table", self.table_ref(*table))
                .arg("body", Value::Block(self.lower_block(body))),

            StmtKind::If { cond, then_body, else_body } => {
                let mut record = OpRecord::new(OpCode::ControlIf)
                    .arg("cond", Value::ExprTree(self.expr(cond)))
                    .arg("then", Value::Block(self.lower_block(then_body)));
                if let Some(else_body) = else_body {
                    record = record.arg("else", Value::Block(self.lower_block(else_body)));
                }
                record
            }

            StmtKind::UseSystem { name, version } => OpRecord::new(OpCode::WebUseSystem)
                .arg("name", self.string(*name))
                .arg("version", self.string(*version)),

            StmtKind::LogIn { credential } => {
                let mut record = OpRecord::new(OpCode::WebLogin);
                if let Some(credential) = credential {
                    record = record.arg("credential", self.string(*credential));
                }
                record
            }

            StmtKind::LogOut => OpRecord::new(OpCode::WebLogout),

            StmtKind::GoToPage { name } => {
                OpRecord::new(OpCode::WebGotoPage).arg("page", self.string(*name))
            }

            StmtKind::EnterField { selector, value } => OpRecord::new(OpCode::WebEnter)
                .arg("field", self.string(*selector))
                .arg("value", self.value(value)),

            StmtKind::Click { selector } => {
                OpRecord::new(OpCode::WebClick).arg("field", self.string(*selector))
            }

            StmtKind::Extract { var, selector } => OpRecord::new(OpCode::WebExtract)
                .arg("var", self.string(*var))
                .arg("field", self.string(*selector)),

            // No dedicated opcode: the binding exists at run time with a
            // null value, the declared type lives in the symbol table.
            StmtKind::Define { name, .. } => OpRecord::new(OpCode::SetVar)
                .arg("name", self.string(*name))
                .arg("value", Value::Literal(Scalar::Null)),

            StmtKind::Call { result } => {
                OpRecord::new(OpCode::CallResult).arg("name", self.string(*result))
            }

            StmtKind::OnError { action } => OpRecord::new(OpCode::ControlOnError)
                .arg("action", Value::Block(self.lower_block(action))),
        }
    }

    /// Lower an expression used as an argument: literals and references
    /// stay first-class, anything else becomes an `ExprTree`.
    fn value(&self, expr: &Expr<'_>) -> Value {
        match &expr.kind {
            ExprKind::Literal(lit) => Value::Literal(self.scalar(lit)),
            ExprKind::Identifier(sym) => {
                let name = self.resolve(*sym);
                if self.symtab.is_table(*sym) {
                    Value::TableRef(name)
                } else {
                    Value::VarRef(name)
                }
            }
            ExprKind::ColumnRef { table, column } => Value::ColRef {
                table: self.resolve(*table),
                column: self.resolve(*column),
            },
            _ => Value::ExprTree(self.expr(expr)),
        }
    }

    fn expr(&self, expr: &Expr<'_>) -> ExprNode {
        match &expr.kind {
            ExprKind::Literal(lit) => ExprNode::Literal(self.scalar(lit)),
            ExprKind::Identifier(sym) => ExprNode::Ref(self.resolve(*sym)),
            ExprKind::ColumnRef { table, column } => ExprNode::Col {
                table: self.resolve(*table),
                column: self.resolve(*column),
            },
            ExprKind::Binary { op, left, right } => ExprNode::Binary {
                op: op.as_str().to_string(),
                left: Box::new(self.expr(left)),
                right: Box::new(self.expr(right)),
            },
            ExprKind::Unary { op, operand } => ExprNode::Unary {
                op: match op {
                    UnaryOp::Not => "not".to_string(),
                    UnaryOp::Neg => "-".to_string(),
                },
                operand: Box::new(self.expr(operand)),
            },
            ExprKind::Call { function, args } => ExprNode::Call {
                function: self.resolve(*function),
                args: args.iter().map(|arg| self.expr(arg)).collect(),
            },
        }
    }

    fn scalar(&self, lit: &Literal) -> Scalar {
        match lit {
            Literal::Str(sym) => Scalar::Str(self.resolve(*sym)),
            Literal::Number(n) => Scalar::Number(*n),
            Literal::Money { currency, amount } => {
                Scalar::Money { currency: *currency, amount: *amount }
            }
            Literal::Date(date) => Scalar::Date(*date),
            Literal::Boolean(b) => Scalar::Bool(*b),
        }
    }

    fn string(&self, sym: Symbol) -> Value {
        Value::Literal(Scalar::Str(self.resolve(sym)))
    }

    fn table_ref(&self, sym: Symbol) -> Value {
        Value::TableRef(self.resolve(sym))
    }

    fn resolve(&self, sym: Symbol) -> String {
        self.interner.resolve(sym).to_string()
    }
}
