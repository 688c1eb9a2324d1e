//! Deterministic interpreter: drives an IR against an effect provider and
//! accumulates a step-by-step trace.
//!
//! Execution is single-threaded and strictly ordered; record `i` observes
//! the full effect of records `0..i`. For each record the interpreter
//! resolves the args (environment lookups, eager evaluation of
//! environment-scoped expressions — row-scoped expressions pass through to
//! the provider unevaluated), calls the provider method for the opcode,
//! appends a trace entry with a monotonic duration, and mutates the
//! environment. `control.*` records execute here rather than in the
//! provider; their blocks expand inline in the trace.
//!
//! `control.on_error` arms a handler for exactly the next record: a
//! failure there is recorded in the trace, the handler block runs, and
//! execution continues. Unhandled failures halt the run. A cooperative
//! [`CancelToken`] is checked between records.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::RuntimeError;
use crate::eval::{self, Scope};
use crate::ir::{ExprNode, OpCode, OpRecord, Scalar, Value};
use crate::provider::{EffectError, EffectProvider, ResolvedArgs, ResolvedValue};
use crate::value::{CellValue, Row, Table};

/// Mutable run state: variables and table bindings. Owned by exactly one
/// interpreter invocation; table-algebra ops replace bindings wholesale.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub variables: HashMap<String, CellValue>,
    pub tables: HashMap<String, Table>,
}

/// One executed record: opcode, resolved args (rendered), the provider's
/// result, the error if any, and how long the step took.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub op: OpCode,
    pub args: BTreeMap<String, String>,
    pub result: CellValue,
    pub error: Option<String>,
    pub duration_nanos: u128,
}

/// What a run produced. `error` is the first unhandled runtime failure;
/// `cancelled` is set when the token stopped the run between records.
#[derive(Debug)]
pub struct RunOutcome {
    pub trace: Vec<TraceEntry>,
    pub error: Option<RuntimeError>,
    pub cancelled: bool,
}

impl RunOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }
}

/// Cooperative cancellation flag, checked between records.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn run<P: EffectProvider>(ir: &[OpRecord], provider: &mut P) -> RunOutcome {
    run_with_cancel(ir, provider, CancelToken::new())
}

pub fn run_with_cancel<P: EffectProvider>(
    ir: &[OpRecord],
    provider: &mut P,
    cancel: CancelToken,
) -> RunOutcome {
    let mut interpreter = Interpreter {
        provider,
        env: Environment::default(),
        trace: Vec::new(),
        rows: Vec::new(),
        handler: None,
        cancel,
    };
    let halt = interpreter.execute_block(ir);
    let (error, cancelled) = match halt {
        Ok(()) => (None, false),
        Err(Halt::Error(err)) => (Some(err), false),
        Err(Halt::Cancelled) => (None, true),
    };
    RunOutcome { trace: interpreter.trace, error, cancelled }
}

enum Halt {
    Error(RuntimeError),
    Cancelled,
}

struct Interpreter<'p, P: EffectProvider> {
    provider: &'p mut P,
    env: Environment,
    trace: Vec<TraceEntry>,
    /// Active `For each` row bindings, innermost last.
    rows: Vec<(String, Row)>,
    /// Handler armed by the previous `control.on_error`, if any.
    handler: Option<Vec<OpRecord>>,
    cancel: CancelToken,
}

impl<'p, P: EffectProvider> Interpreter<'p, P> {
    fn execute_block(&mut self, records: &[OpRecord]) -> Result<(), Halt> {
        for record in records {
            if self.cancel.is_cancelled() {
                let start = Instant::now();
                self.push_entry(
                    record.op,
                    BTreeMap::new(),
                    CellValue::Null,
                    Some("cancelled".to_string()),
                    start,
                );
                return Err(Halt::Cancelled);
            }

            // A handler armed by the previous record covers this one only.
            let handler = self.handler.take();
            match self.step(record) {
                Ok(()) => {}
                Err(Halt::Error(_)) if handler.is_some() => {
                    // The failing entry is already in the trace with its
                    // error field set; run the handler and continue.
                    if let Some(handler) = handler {
                        self.execute_block(&handler)?;
                    }
                }
                Err(halt) => return Err(halt),
            }
        }
        Ok(())
    }

    fn step(&mut self, record: &OpRecord) -> Result<(), Halt> {
        match record.op {
            OpCode::ControlForEach => self.step_for_each(record),
            OpCode::ControlIf => self.step_if(record),
            OpCode::ControlOnError => self.step_on_error(record),
            _ => self.step_provider(record),
        }
    }

    fn step_provider(&mut self, record: &OpRecord) -> Result<(), Halt> {
        let start = Instant::now();
        let resolved = match self.resolve_args(record) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.push_entry(
                    record.op,
                    BTreeMap::new(),
                    CellValue::Null,
                    Some(err.message.clone()),
                    start,
                );
                return Err(Halt::Error(err));
            }
        };
        let rendered = resolved.rendered();
        match self.call_provider(record.op, &resolved) {
            Ok(value) => {
                let result = self.apply(record.op, &resolved, value);
                self.push_entry(record.op, rendered, result, None, start);
                Ok(())
            }
            Err(err) => {
                self.push_entry(
                    record.op,
                    rendered,
                    CellValue::Null,
                    Some(err.message.clone()),
                    start,
                );
                Err(Halt::Error(RuntimeError::new(err.message)))
            }
        }
    }

    fn step_for_each(&mut self, record: &OpRecord) -> Result<(), Halt> {
        let start = Instant::now();
        let var = match record.args.get("var") {
            Some(Value::Literal(Scalar::Str(s))) => s.clone(),
            _ => {
                let err = RuntimeError::new("for_each is missing its variable");
                return self.record_failure(record.op, start, err);
            }
        };
        let table = match record.args.get("table") {
            Some(Value::TableRef(name)) => match self.env.tables.get(name) {
                Some(table) => table.clone(),
                None => {
                    let err = RuntimeError::new(format!("unknown table '{name}'"));
                    return self.record_failure(record.op, start, err);
                }
            },
            _ => {
                let err = RuntimeError::new("for_each is missing its table");
                return self.record_failure(record.op, start, err);
            }
        };
        let body = match record.args.get("body") {
            Some(Value::Block(records)) => records,
            _ => {
                let err = RuntimeError::new("for_each is missing its body");
                return self.record_failure(record.op, start, err);
            }
        };

        let args = BTreeMap::from([
            ("var".to_string(), var.clone()),
            ("table".to_string(), CellValue::Table(table.clone()).to_display_string()),
        ]);
        self.push_entry(record.op, args, CellValue::Null, None, start);

        for row in table.rows {
            self.rows.push((var.clone(), row));
            let flow = self.execute_block(body);
            self.rows.pop();
            flow?;
        }
        Ok(())
    }

    fn step_if(&mut self, record: &OpRecord) -> Result<(), Halt> {
        let start = Instant::now();
        let cond_node = match record.args.get("cond") {
            Some(Value::ExprTree(node)) => node,
            _ => {
                let err = RuntimeError::new("if is missing its condition");
                self.push_entry(
                    record.op,
                    BTreeMap::new(),
                    CellValue::Null,
                    Some(err.message.clone()),
                    start,
                );
                return Err(Halt::Error(err));
            }
        };

        let rendered = BTreeMap::from([("cond".to_string(), cond_node.to_string())]);
        let evaluated = {
            let scope = self.scope();
            eval::evaluate(cond_node, &scope)
        };
        let cond = match evaluated {
            Ok(CellValue::Bool(b)) => b,
            Ok(CellValue::Null) => false,
            Ok(other) => {
                let err = RuntimeError::new(format!(
                    "condition evaluated to {}, not a boolean",
                    other.type_name()
                ));
                self.push_entry(
                    record.op,
                    rendered,
                    CellValue::Null,
                    Some(err.message.clone()),
                    start,
                );
                return Err(Halt::Error(err));
            }
            Err(err) => {
                self.push_entry(
                    record.op,
                    rendered,
                    CellValue::Null,
                    Some(err.message.clone()),
                    start,
                );
                return Err(Halt::Error(err));
            }
        };

        self.push_entry(record.op, rendered, CellValue::Bool(cond), None, start);

        let branch = if cond { "then" } else { "else" };
        if let Some(Value::Block(records)) = record.args.get(branch) {
            self.execute_block(records)?;
        }
        Ok(())
    }

    fn step_on_error(&mut self, record: &OpRecord) -> Result<(), Halt> {
        let start = Instant::now();
        let action = match record.args.get("action") {
            Some(Value::Block(records)) => records.clone(),
            _ => Vec::new(),
        };
        let args = BTreeMap::from([
            ("action".to_string(), format!("[{} records]", action.len())),
        ]);
        self.handler = Some(action);
        self.push_entry(record.op, args, CellValue::Null, None, start);
        Ok(())
    }

    fn call_provider(&mut self, op: OpCode, args: &ResolvedArgs) -> Result<CellValue, EffectError> {
        match op {
            OpCode::ExcelOpenWorkbook => self.provider.open_workbook(args),
            OpCode::ExcelReadTable => self.provider.read_table(args),
            OpCode::ExcelExport => self.provider.export(args),
            OpCode::TableAddColumn => self.provider.add_column(args),
            OpCode::TableFilter => self.provider.filter(args),
            OpCode::TableSort => self.provider.sort(args),
            OpCode::TableGroup => self.provider.group(args),
            OpCode::TableJoin => self.provider.join(args),
            OpCode::SetVar => self.provider.set_var(args),
            OpCode::CallResult => self.provider.call_result(args),
            OpCode::WebUseSystem => self.provider.use_system(args),
            OpCode::WebLogin => self.provider.login(args),
            OpCode::WebLogout => self.provider.logout(args),
            OpCode::WebGotoPage => self.provider.goto_page(args),
            OpCode::WebEnter => self.provider.enter(args),
            OpCode::WebClick => self.provider.click(args),
            OpCode::WebExtract => self.provider.extract(args),
            OpCode::ControlForEach | OpCode::ControlIf | OpCode::ControlOnError => {
                Err(EffectError::new("control opcode reached the provider"))
            }
        }
    }

    /// Environment mutation per op; returns what the trace records as the
    /// step's result.
    fn apply(&mut self, op: OpCode, args: &ResolvedArgs, result: CellValue) -> CellValue {
        match op {
            OpCode::SetVar => {
                if let (Ok(name), Ok(value)) = (args.text("name"), args.value("value")) {
                    let value = value.clone();
                    self.env.variables.insert(name.to_string(), value.clone());
                    return value;
                }
                result
            }
            OpCode::ExcelReadTable
            | OpCode::TableAddColumn
            | OpCode::TableFilter
            | OpCode::TableSort
            | OpCode::TableGroup
            | OpCode::TableJoin => {
                if let CellValue::Table(table) = &result {
                    self.env.tables.insert(table.name.clone(), table.clone());
                }
                result
            }
            OpCode::WebExtract => {
                if let Ok(var) = args.text("var") {
                    self.env.variables.insert(var.to_string(), result.clone());
                }
                result
            }
            OpCode::CallResult => {
                if let Ok(name) = args.text("name") {
                    self.env.variables.insert(name.to_string(), result.clone());
                }
                result
            }
            _ => result,
        }
    }

    fn resolve_args(&self, record: &OpRecord) -> Result<ResolvedArgs, RuntimeError> {
        let mut resolved = ResolvedArgs::new();
        for (name, value) in &record.args {
            let entry = match value {
                // Blocks execute in the interpreter; they are not provider
                // arguments.
                Value::Block(_) => continue,

                Value::List(items) if record.op == OpCode::TableGroup => {
                    if name == "aggregations" {
                        ResolvedValue::Aggregations(self.resolve_aggregations(items)?)
                    } else {
                        ResolvedValue::ExprList(self.resolve_expr_list(items)?)
                    }
                }

                Value::ExprTree(node) if is_row_scoped(record.op, name) => {
                    ResolvedValue::Expr(self.substitute(node))
                }

                other => self.resolve_simple(other)?,
            };
            resolved.insert(name.clone(), entry);
        }
        Ok(resolved)
    }

    fn resolve_simple(&self, value: &Value) -> Result<ResolvedValue, RuntimeError> {
        match value {
            Value::Literal(scalar) => Ok(ResolvedValue::Value(eval::scalar_value(scalar))),

            Value::VarRef(name) => {
                if let Some(value) = self.env.variables.get(name) {
                    return Ok(ResolvedValue::Value(value.clone()));
                }
                for (binding, row) in self.rows.iter().rev() {
                    if binding == name {
                        return Ok(ResolvedValue::Value(CellValue::Row(row.clone())));
                    }
                }
                Err(RuntimeError::new(format!("unknown variable '{name}'")))
            }

            Value::TableRef(name) => self
                .env
                .tables
                .get(name)
                .cloned()
                .map(|t| ResolvedValue::Value(CellValue::Table(t)))
                .ok_or_else(|| RuntimeError::new(format!("unknown table '{name}'"))),

            Value::ColRef { table, column } => {
                for (binding, row) in self.rows.iter().rev() {
                    if binding == table {
                        return Ok(ResolvedValue::Value(
                            row.get(column).cloned().unwrap_or(CellValue::Null),
                        ));
                    }
                }
                Err(RuntimeError::new(format!(
                    "no row in scope for '{table}.{column}'"
                )))
            }

            Value::ExprTree(node) => Ok(ResolvedValue::Value(eval::evaluate(
                node,
                &self.scope(),
            )?)),

            Value::Block(_) | Value::List(_) => {
                Err(RuntimeError::new("argument cannot be resolved to a value"))
            }
        }
    }

    fn resolve_expr_list(&self, items: &[Value]) -> Result<Vec<ExprNode>, RuntimeError> {
        items
            .iter()
            .map(|item| match item {
                Value::ExprTree(node) => Ok(self.substitute(node)),
                _ => Err(RuntimeError::new("malformed expression list")),
            })
            .collect()
    }

    fn resolve_aggregations(
        &self,
        items: &[Value],
    ) -> Result<Vec<(String, ExprNode)>, RuntimeError> {
        items
            .iter()
            .map(|item| {
                if let Value::List(pair) = item {
                    if let [Value::Literal(Scalar::Str(name)), Value::ExprTree(node)] =
                        pair.as_slice()
                    {
                        return Ok((name.clone(), self.substitute(node)));
                    }
                }
                Err(RuntimeError::new("malformed aggregation"))
            })
            .collect()
    }

    /// Pre-substitute environment bindings into a row-scoped expression:
    /// variables and active `For each` row cells become literals, so the
    /// provider evaluates against its own rows only.
    fn substitute(&self, node: &ExprNode) -> ExprNode {
        match node {
            ExprNode::Literal(_) => node.clone(),

            ExprNode::Ref(name) => {
                if let Some(value) = self.env.variables.get(name) {
                    if let Some(scalar) = cell_to_scalar(value) {
                        return ExprNode::Literal(scalar);
                    }
                }
                node.clone()
            }

            ExprNode::Col { table, column } => {
                for (binding, row) in self.rows.iter().rev() {
                    if binding == table {
                        let value = row.get(column).cloned().unwrap_or(CellValue::Null);
                        if let Some(scalar) = cell_to_scalar(&value) {
                            return ExprNode::Literal(scalar);
                        }
                        return node.clone();
                    }
                }
                node.clone()
            }

            ExprNode::Binary { op, left, right } => ExprNode::Binary {
                op: op.clone(),
                left: Box::new(self.substitute(left)),
                right: Box::new(self.substitute(right)),
            },

            ExprNode::Unary { op, operand } => ExprNode::Unary {
                op: op.clone(),
                operand: Box::new(self.substitute(operand)),
            },

            ExprNode::Call { function, args } => ExprNode::Call {
                function: function.clone(),
                args: args.iter().map(|arg| self.substitute(arg)).collect(),
            },
        }
    }

    fn scope(&self) -> Scope<'_> {
        Scope {
            variables: Some(&self.env.variables),
            rows: self
                .rows
                .iter()
                .map(|(name, row)| (name.as_str(), row))
                .collect(),
        }
    }

    fn record_failure(
        &mut self,
        op: OpCode,
        start: Instant,
        err: RuntimeError,
    ) -> Result<(), Halt> {
        self.push_entry(
            op,
            BTreeMap::new(),
            CellValue::Null,
            Some(err.message.clone()),
            start,
        );
        Err(Halt::Error(err))
    }

    fn push_entry(
        &mut self,
        op: OpCode,
        args: BTreeMap<String, String>,
        result: CellValue,
        error: Option<String>,
        start: Instant,
    ) {
        self.trace.push(TraceEntry {
            op,
            args,
            result,
            error,
            duration_nanos: start.elapsed().as_nanos(),
        });
    }
}

fn is_row_scoped(op: OpCode, name: &str) -> bool {
    matches!(
        (op, name),
        (OpCode::TableFilter, "predicate")
            | (OpCode::TableSort, "key")
            | (OpCode::TableAddColumn, "expr")
            | (OpCode::TableGroup, "keys")
            | (OpCode::TableGroup, "aggregations")
            | (OpCode::TableJoin, "on")
    )
}

fn cell_to_scalar(value: &CellValue) -> Option<Scalar> {
    match value {
        CellValue::Null => Some(Scalar::Null),
        CellValue::Str(s) => Some(Scalar::Str(s.clone())),
        CellValue::Number(n) => Some(Scalar::Number(*n)),
        CellValue::Bool(b) => Some(Scalar::Bool(*b)),
        CellValue::Money { currency, amount } => {
            Some(Scalar::Money { currency: *currency, amount: *amount })
        }
        CellValue::Date(d) => Some(Scalar::Date(*d)),
        CellValue::Row(_) | CellValue::Table(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Value;
    use crate::provider::DryRunProvider;

    #[test]
    fn empty_ir_yields_an_empty_trace() {
        let outcome = run(&[], &mut DryRunProvider::new());
        assert!(outcome.is_ok());
        assert!(outcome.trace.is_empty());
    }

    #[test]
    fn a_pre_cancelled_token_stops_before_the_first_record() {
        let ir = vec![OpRecord::new(OpCode::WebLogout)];
        let token = CancelToken::new();
        token.cancel();
        let outcome = run_with_cancel(&ir, &mut DryRunProvider::new(), token);
        assert!(outcome.cancelled);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.trace[0].error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn set_var_binds_and_traces_the_value() {
        let ir = vec![OpRecord::new(OpCode::SetVar)
            .arg("name", Value::Literal(Scalar::Str("x".into())))
            .arg("value", Value::Literal(Scalar::Number(7.0)))];
        let outcome = run(&ir, &mut DryRunProvider::new());
        assert!(outcome.is_ok());
        assert_eq!(outcome.trace[0].result, CellValue::Number(7.0));
    }

    #[test]
    fn unknown_variable_reference_halts() {
        let ir = vec![OpRecord::new(OpCode::SetVar)
            .arg("name", Value::Literal(Scalar::Str("x".into())))
            .arg("value", Value::VarRef("missing".into()))];
        let outcome = run(&ir, &mut DryRunProvider::new());
        assert!(outcome.error.is_some());
        assert_eq!(outcome.trace.len(), 1);
        assert!(outcome.trace[0].error.as_deref().unwrap().contains("missing"));
    }
}
