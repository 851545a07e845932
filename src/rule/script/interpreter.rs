//! Runs a compiled [Program] against a transaction.

use std::{
    cmp::Ordering,
    fmt::Display,
    time::{Duration, Instant},
};

use rust_decimal::{Decimal, prelude::ToPrimitive};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{decimal::round_to, rule::TransactionView};

use super::{
    ScriptPosition,
    parser::{BinaryOp, Builtin, Expr, ExprKind, Program, Stmt, TxMethod, UnaryOp},
};

/// A value a script works with.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The absence of a value, e.g. a transaction without a category.
    Nil,
    /// `true` or `false`.
    Bool(bool),
    /// Every number is a decimal.
    Number(Decimal),
    /// A string.
    Str(String),
    /// A list, e.g. the tag IDs of a transaction.
    List(Vec<Value>),
}

impl Value {
    /// Whether the value counts as true in a condition.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(value) => *value,
            Value::Number(number) => !number.is_zero(),
            Value::Str(text) => !text.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Number(number) => write!(f, "{number}"),
            Value::Str(text) => write!(f, "{text}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<Option<i64>> for Value {
    fn from(id: Option<i64>) -> Self {
        id.map_or(Value::Nil, |id| Value::Number(Decimal::from(id)))
    }
}

impl From<Option<Decimal>> for Value {
    fn from(number: Option<Decimal>) -> Self {
        number.map_or(Value::Nil, Value::Number)
    }
}

impl From<Option<String>> for Value {
    fn from(text: Option<String>) -> Self {
        text.map_or(Value::Nil, Value::Str)
    }
}

/// The resources a single run may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Wall clock time.
    pub time: Duration,
    /// Statements and expressions evaluated.
    pub steps: u64,
    /// Bytes of strings and lists created.
    pub memory: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            time: Duration::from_millis(100),
            steps: 100_000,
            memory: 8 * 1024 * 1024,
        }
    }
}

/// How a run ended without a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The script returned, the flag says whether the returned value was truthy.
    Returned(bool),
    /// The script called `tx.reject` with a reason.
    Rejected(String),
}

/// A run time error in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Where the error happened.
    pub position: ScriptPosition,
    /// What went wrong.
    pub message: String,
}

impl Fault {
    fn new(position: ScriptPosition, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

enum Flow {
    Next,
    Return(Value),
}

enum Interrupt {
    Fault(Fault),
    Reject(String),
}

impl From<Fault> for Interrupt {
    fn from(fault: Fault) -> Self {
        Interrupt::Fault(fault)
    }
}

type Step<T> = Result<T, Interrupt>;

struct Machine<'a> {
    tx: &'a mut TransactionView,
    now: OffsetDateTime,
    limits: &'a Limits,
    started: Instant,
    steps: u64,
    allocated: usize,
    variables: Vec<(String, Value)>,
}

impl Machine<'_> {
    fn tick(&mut self, position: ScriptPosition) -> Result<(), Fault> {
        self.steps += 1;

        if self.steps > self.limits.steps {
            return Err(Fault::new(
                position,
                format!("step limit of {} exceeded", self.limits.steps),
            ));
        }

        if self.steps % 64 == 0 && self.started.elapsed() > self.limits.time {
            return Err(Fault::new(
                position,
                format!("time limit of {} ms exceeded", self.limits.time.as_millis()),
            ));
        }

        Ok(())
    }

    fn allocate(&mut self, bytes: usize, position: ScriptPosition) -> Result<(), Fault> {
        self.allocated = self.allocated.saturating_add(bytes);

        if self.allocated > self.limits.memory {
            return Err(Fault::new(
                position,
                format!("memory limit of {} bytes exceeded", self.limits.memory),
            ));
        }

        Ok(())
    }

    fn text(&mut self, text: String, position: ScriptPosition) -> Step<Value> {
        self.allocate(text.len(), position)?;
        Ok(Value::Str(text))
    }

    // ===== STATEMENTS =====

    fn run_block(&mut self, statements: &[Stmt]) -> Step<Flow> {
        let scope_start = self.variables.len();
        let flow = self.run_statements(statements);
        self.variables.truncate(scope_start);

        flow
    }

    fn run_statements(&mut self, statements: &[Stmt]) -> Step<Flow> {
        for statement in statements {
            if let Flow::Return(value) = self.run_statement(statement)? {
                return Ok(Flow::Return(value));
            }
        }

        Ok(Flow::Next)
    }

    fn run_statement(&mut self, statement: &Stmt) -> Step<Flow> {
        self.tick(statement.position())?;

        match statement {
            Stmt::Let { name, value, .. } => {
                let value = self.eval(value)?;
                self.variables.push((name.clone(), value));
            }
            Stmt::Assign {
                name,
                value,
                position,
            } => {
                let value = self.eval(value)?;
                let slot = self
                    .variables
                    .iter_mut()
                    .rev()
                    .find(|(declared, _)| declared == name)
                    .ok_or_else(|| Fault::new(*position, format!("unknown variable \"{name}\"")))?;
                slot.1 = value;
            }
            Stmt::If {
                branches,
                otherwise,
                ..
            } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.is_truthy() {
                        return self.run_block(body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.run_block(body);
                }
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
        }

        Ok(Flow::Next)
    }

    // ===== EXPRESSIONS =====

    fn eval_all(&mut self, exprs: &[Expr]) -> Step<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }

    fn eval(&mut self, expr: &Expr) -> Step<Value> {
        self.tick(expr.position)?;
        let position = expr.position;

        match &expr.kind {
            ExprKind::Literal(value) => Ok(value.clone()),
            ExprKind::List(items) => {
                let values = self.eval_all(items)?;
                self.allocate(values.len() * size_of::<Value>(), position)?;
                Ok(Value::List(values))
            }
            ExprKind::Variable(name) => self
                .variables
                .iter()
                .rev()
                .find(|(declared, _)| declared == name)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| Fault::new(position, format!("unknown variable \"{name}\"")).into()),
            ExprKind::Unary(UnaryOp::Not, operand) => {
                Ok(Value::Bool(!self.eval(operand)?.is_truthy()))
            }
            ExprKind::Unary(UnaryOp::Negate, operand) => match self.eval(operand)? {
                Value::Number(number) => Ok(Value::Number(-number)),
                other => Err(Fault::new(
                    position,
                    format!("cannot negate a {}", other.type_name()),
                )
                .into()),
            },
            ExprKind::And(left, right) => {
                if !self.eval(left)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(right)?.is_truthy()))
            }
            ExprKind::Or(left, right) => {
                if self.eval(left)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(right)?.is_truthy()))
            }
            ExprKind::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right, position)
            }
            ExprKind::Matches(subject, regex) => match self.eval(subject)? {
                Value::Str(text) => Ok(Value::Bool(regex.is_match(&text))),
                Value::Nil => Ok(Value::Bool(false)),
                other => Err(Fault::new(
                    position,
                    format!("matches needs a string, got {}", other.type_name()),
                )
                .into()),
            },
            ExprKind::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(target, index, position).map_err(Interrupt::from)
            }
            ExprKind::Call(builtin, arguments) => {
                let arguments = self.eval_all(arguments)?;
                self.call_builtin(*builtin, arguments, position)
            }
            ExprKind::Tx(method, arguments) => {
                let arguments = self.eval_all(arguments)?;
                self.call_tx(*method, arguments, position)
            }
        }
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        left: Value,
        right: Value,
        position: ScriptPosition,
    ) -> Step<Value> {
        let overflow = || Fault::new(position, "number overflow");

        let value = match (op, left, right) {
            (BinaryOp::Equal, left, right) => Value::Bool(left == right),
            (BinaryOp::NotEqual, left, right) => Value::Bool(left != right),

            (BinaryOp::Add, Value::Number(a), Value::Number(b)) => {
                Value::Number(a.checked_add(b).ok_or_else(overflow)?)
            }
            (BinaryOp::Add, Value::Str(a), Value::Str(b)) => return self.text(a + &b, position),
            (BinaryOp::Add, Value::List(mut a), Value::List(b)) => {
                self.allocate(b.len() * size_of::<Value>(), position)?;
                a.extend(b);
                Value::List(a)
            }
            (BinaryOp::Subtract, Value::Number(a), Value::Number(b)) => {
                Value::Number(a.checked_sub(b).ok_or_else(overflow)?)
            }
            (BinaryOp::Multiply, Value::Number(a), Value::Number(b)) => {
                Value::Number(a.checked_mul(b).ok_or_else(overflow)?)
            }
            (BinaryOp::Divide | BinaryOp::Remainder, Value::Number(_), Value::Number(b))
                if b.is_zero() =>
            {
                return Err(Fault::new(position, "division by zero").into());
            }
            (BinaryOp::Divide, Value::Number(a), Value::Number(b)) => {
                Value::Number(a.checked_div(b).ok_or_else(overflow)?)
            }
            (BinaryOp::Remainder, Value::Number(a), Value::Number(b)) => {
                Value::Number(a.checked_rem(b).ok_or_else(overflow)?)
            }

            (
                BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual,
                left,
                right,
            ) => {
                let ordering = match (&left, &right) {
                    (Value::Number(a), Value::Number(b)) => a.cmp(b),
                    (Value::Str(a), Value::Str(b)) => a.cmp(b),
                    _ => {
                        return Err(Fault::new(
                            position,
                            format!(
                                "cannot compare {} with {}",
                                left.type_name(),
                                right.type_name()
                            ),
                        )
                        .into());
                    }
                };
                Value::Bool(match op {
                    BinaryOp::Less => ordering == Ordering::Less,
                    BinaryOp::LessEqual => ordering != Ordering::Greater,
                    BinaryOp::Greater => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }

            (BinaryOp::Contains, Value::Str(haystack), Value::Str(needle)) => {
                Value::Bool(haystack.contains(&needle))
            }
            (BinaryOp::Contains, Value::List(items), needle) => {
                Value::Bool(items.contains(&needle))
            }
            (BinaryOp::Contains, Value::Nil, _) => Value::Bool(false),

            (op, left, right) => {
                return Err(Fault::new(
                    position,
                    format!(
                        "unsupported operands for {op:?}: {} and {}",
                        left.type_name(),
                        right.type_name()
                    ),
                )
                .into());
            }
        };

        Ok(value)
    }

    fn call_builtin(
        &mut self,
        builtin: Builtin,
        arguments: Vec<Value>,
        position: ScriptPosition,
    ) -> Step<Value> {
        let name = builtin.name();

        match (builtin, arguments.as_slice()) {
            (Builtin::Lower, [Value::Str(text)]) => self.text(text.to_lowercase(), position),
            (Builtin::Upper, [Value::Str(text)]) => self.text(text.to_uppercase(), position),
            (Builtin::Trim, [Value::Str(text)]) => self.text(text.trim().to_owned(), position),
            (Builtin::Len, [Value::Str(text)]) => {
                Ok(Value::Number(Decimal::from(text.chars().count())))
            }
            (Builtin::Len, [Value::List(items)]) => Ok(Value::Number(Decimal::from(items.len()))),
            (Builtin::StartsWith, [Value::Str(text), Value::Str(prefix)]) => {
                Ok(Value::Bool(text.starts_with(prefix.as_str())))
            }
            (Builtin::EndsWith, [Value::Str(text), Value::Str(suffix)]) => {
                Ok(Value::Bool(text.ends_with(suffix.as_str())))
            }
            (Builtin::Abs, [Value::Number(number)]) => Ok(Value::Number(number.abs())),
            (Builtin::Round, [Value::Number(number)]) => Ok(Value::Number(round_to(*number, 0))),
            (Builtin::Round, [Value::Number(number), Value::Number(requested)]) => {
                let places = requested
                    .to_u32()
                    .filter(|places| *places <= 28 && Decimal::from(*places) == *requested)
                    .ok_or_else(|| {
                        Fault::new(position, "round expects 0 to 28 decimal places")
                    })?;
                Ok(Value::Number(round_to(*number, places)))
            }
            (Builtin::Str, [value]) => self.text(value.to_string(), position),
            (Builtin::Now, []) => {
                let now = format_timestamp(self.now, position)?;
                self.text(now, position)
            }
            (_, arguments) => Err(Fault::new(
                position,
                format!(
                    "{name} cannot be called with ({})",
                    arguments
                        .iter()
                        .map(Value::type_name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
            .into()),
        }
    }

    fn call_tx(
        &mut self,
        method: TxMethod,
        arguments: Vec<Value>,
        position: ScriptPosition,
    ) -> Step<Value> {
        let tx = &mut *self.tx;

        let value = match (method, arguments.as_slice()) {
            (TxMethod::GetTitle, []) => Value::Str(tx.title.clone()),
            (TxMethod::GetNotes, []) => Value::Str(tx.notes.clone()),
            (TxMethod::GetAmount, []) => tx.source_amount.or(tx.destination_amount).into(),
            (TxMethod::GetSourceAccountId, []) => tx.source_account_id.into(),
            (TxMethod::GetDestinationAccountId, []) => tx.destination_account_id.into(),
            (TxMethod::GetSourceAmount, []) => tx.source_amount.into(),
            (TxMethod::GetDestinationAmount, []) => tx.destination_amount.into(),
            (TxMethod::GetSourceCurrency, []) => tx.source_currency.clone().into(),
            (TxMethod::GetDestinationCurrency, []) => tx.destination_currency.clone().into(),
            (TxMethod::GetCategoryId, []) => tx.category_id.into(),
            (TxMethod::GetTags, []) => Value::List(
                tx.tag_ids
                    .iter()
                    .map(|id| Value::Number(Decimal::from(*id)))
                    .collect(),
            ),
            (TxMethod::HasTag, [id]) => Value::Bool(tx.tag_ids.contains(&to_id(id, position)?)),
            (TxMethod::GetTransactionType, []) => {
                Value::Str(tx.transaction_type.as_str().to_owned())
            }
            (TxMethod::GetTransactionDate, []) => {
                Value::Str(format_timestamp(tx.transaction_date, position)?)
            }
            (TxMethod::SetCategoryId, [Value::Nil]) => {
                tx.category_id = None;
                Value::Nil
            }
            (TxMethod::SetCategoryId, [id]) => {
                tx.category_id = Some(to_id(id, position)?);
                Value::Nil
            }
            (TxMethod::AddTag, [id]) => {
                let id = to_id(id, position)?;
                if let Err(index) = tx.tag_ids.binary_search(&id) {
                    tx.tag_ids.insert(index, id);
                }
                Value::Nil
            }
            (TxMethod::RemoveTag, [id]) => {
                let id = to_id(id, position)?;
                tx.tag_ids.retain(|tag_id| *tag_id != id);
                Value::Nil
            }
            (TxMethod::SetTitle, [Value::Str(title)]) => {
                tx.title = title.clone();
                Value::Nil
            }
            (TxMethod::SetNotes, [Value::Str(notes)]) => {
                tx.notes = notes.clone();
                Value::Nil
            }
            (TxMethod::Reject, [reason]) => {
                let reason = match reason {
                    Value::Str(reason) => reason.clone(),
                    other => other.to_string(),
                };
                return Err(Interrupt::Reject(reason));
            }
            (method, arguments) => {
                return Err(Fault::new(
                    position,
                    format!(
                        "tx.{} cannot be called with ({})",
                        method.name(),
                        arguments
                            .iter()
                            .map(Value::type_name)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )
                .into());
            }
        };

        Ok(value)
    }
}

fn index_value(target: Value, index: Value, position: ScriptPosition) -> Result<Value, Fault> {
    match (target, index) {
        (Value::List(items), Value::Number(index)) => {
            let Some(index) = index.to_usize().filter(|i| Decimal::from(*i) == index) else {
                return Ok(Value::Nil);
            };
            Ok(items.get(index).cloned().unwrap_or(Value::Nil))
        }
        (target, index) => Err(Fault::new(
            position,
            format!(
                "cannot index a {} with a {}",
                target.type_name(),
                index.type_name()
            ),
        )),
    }
}

fn to_id(value: &Value, position: ScriptPosition) -> Result<i64, Fault> {
    match value {
        Value::Number(number) if number.fract().is_zero() && number.is_sign_positive() => number
            .to_i64()
            .ok_or_else(|| Fault::new(position, format!("{number} is not a valid ID"))),
        other => Err(Fault::new(
            position,
            format!("expected an ID, got {other}"),
        )),
    }
}

fn format_timestamp(timestamp: OffsetDateTime, position: ScriptPosition) -> Result<String, Fault> {
    timestamp
        .format(&Rfc3339)
        .map_err(|error| Fault::new(position, format!("could not format date: {error}")))
}

/// Run `program` against `tx`.
///
/// Changes made through the `tx` setters are applied to `tx` as the script runs, so callers that
/// need to discard them should pass a copy.
///
/// # Errors
/// Returns a [Fault] if the script hits a type error, divides by zero or exceeds `limits`.
pub fn execute(
    program: &Program,
    tx: &mut TransactionView,
    now: OffsetDateTime,
    limits: &Limits,
) -> Result<Completion, Fault> {
    let mut machine = Machine {
        tx,
        now,
        limits,
        started: Instant::now(),
        steps: 0,
        allocated: 0,
        variables: Vec::new(),
    };

    match machine.run_statements(&program.statements) {
        Ok(Flow::Return(value)) => Ok(Completion::Returned(value.is_truthy())),
        Ok(Flow::Next) => Ok(Completion::Returned(false)),
        Err(Interrupt::Reject(reason)) => Ok(Completion::Rejected(reason)),
        Err(Interrupt::Fault(fault)) => Err(fault),
    }
}
