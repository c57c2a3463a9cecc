//! Runtime values for the Petal language.
//!
//! Petal is dynamically typed over a closed set of variants.  Primitives
//! (`Null`, `Boolean`, `Number`, `String`, `DateTime`) and the callable /
//! sequence variants are immutable; only a generic [`Object`] has a member
//! table that scripts and hosts can write to.
//!
//! Every variant also exposes *extension members* (e.g. `"abc".length`),
//! registered per [`ValueKind`] in an [`Extensions`] table.  The table is
//! read-only from a script's point of view.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use futures::stream::{self, LocalBoxStream, StreamExt};
use rust_decimal::Decimal;

use super::ast::{BinaryOp, UnaryOp};
use super::cancel::CancelToken;
use super::error::{Result, ScriptError};

// ── Kinds ─────────────────────────────────────────────────────────────────────

/// Variant tag of a [`Value`]; keys the extension table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Boolean,
    Number,
    String,
    DateTime,
    Function,
    Object,
    Enumerable,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "Null",
            ValueKind::Boolean => "Boolean",
            ValueKind::Number => "Number",
            ValueKind::String => "String",
            ValueKind::DateTime => "DateTime",
            ValueKind::Function => "Function",
            ValueKind::Object => "Object",
            ValueKind::Enumerable => "Enumerable",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Function ──────────────────────────────────────────────────────────────────

type CallFn = dyn Fn(Vec<Value>, CancelToken) -> LocalBoxFuture<'static, Result<Value>>;

/// A callable value: a script closure or a host function.
///
/// Calls are asynchronous and receive the caller's cancel token; a host
/// function that suspends should race its wait against it.
#[derive(Clone)]
pub struct Function(Rc<CallFn>);

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>, CancelToken) -> LocalBoxFuture<'static, Result<Value>> + 'static,
    {
        Function(Rc::new(f))
    }

    pub fn call(&self, args: Vec<Value>, cancel: CancelToken) -> LocalBoxFuture<'static, Result<Value>> {
        (self.0)(args, cancel)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// ── Enumerable ────────────────────────────────────────────────────────────────

/// Stream of elements produced by one pass over an [`Enumerable`].
pub type ValueStream = LocalBoxStream<'static, Result<Value>>;

/// Lazy asynchronous sequence.  Each `foreach` starts a fresh pass.
#[derive(Clone)]
pub struct Enumerable(Rc<dyn Fn() -> ValueStream>);

impl Enumerable {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> ValueStream + 'static,
    {
        Enumerable(Rc::new(f))
    }

    /// An enumerable over a fixed list of values.
    pub fn from_values(values: Vec<Value>) -> Self {
        let values = Rc::new(values);
        Enumerable::new(move || {
            let values = Rc::clone(&values);
            stream::iter((0..values.len()).map(move |i| Ok(values[i].clone()))).boxed_local()
        })
    }

    pub fn stream(&self) -> ValueStream {
        (self.0)()
    }

    pub fn ptr_eq(&self, other: &Enumerable) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// ── Object ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ObjectData {
    members: RefCell<BTreeMap<String, Value>>,
    frozen: Cell<bool>,
}

/// Shared, string-keyed member table.  Clones alias the same table.
#[derive(Clone, Default)]
pub struct Object(Rc<ObjectData>);

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forbid further writes.
    pub fn freeze(&self) {
        self.0.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.members.borrow().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.members.borrow().contains_key(key)
    }

    /// Create or overwrite `key`.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if self.is_frozen() {
            return Err(ScriptError::type_error(format!(
                "Cannot set property \"{key}\" on an immutable object."
            )));
        }
        self.0.members.borrow_mut().insert(key, value);
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.members.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.members.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// ── Value ─────────────────────────────────────────────────────────────────────

/// A Petal runtime value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Number(Decimal),
    String(String),
    DateTime(DateTime<Utc>),
    Function(Function),
    Object(Object),
    Enumerable(Enumerable),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::Function(_) => ValueKind::Function,
            Value::Object(_) => ValueKind::Object,
            Value::Enumerable(_) => ValueKind::Enumerable,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    // ── Operators ─────────────────────────────────────────────────────────────

    /// Apply a unary operator.
    pub fn unary_operation(&self, op: UnaryOp) -> Result<Value> {
        match (op, self) {
            (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
            (UnaryOp::Minus, Value::Number(n)) => Ok(Value::Number(-*n)),
            (UnaryOp::Plus, Value::Number(n)) => Ok(Value::Number(*n)),
            _ => Err(ScriptError::runtime(format!(
                "Cannot apply operator \"{}\" to type {}",
                op.symbol(),
                self.type_name()
            ))),
        }
    }

    /// Apply a binary (or logical) operator.
    ///
    /// `??` and comparisons against `null` work for every variant; all other
    /// operators need both operands of the same variant.
    pub fn binary_operation(&self, op: BinaryOp, rhs: &Value) -> Result<Value> {
        match (op, self, rhs) {
            (BinaryOp::Coalesce, Value::Null, _) => return Ok(rhs.clone()),
            (BinaryOp::Coalesce, _, _) => return Ok(self.clone()),
            (BinaryOp::Eq, _, _) if self.is_null() || rhs.is_null() => {
                return Ok(Value::Boolean(self.is_null() && rhs.is_null()))
            }
            (BinaryOp::Ne, _, _) if self.is_null() || rhs.is_null() => {
                return Ok(Value::Boolean(!(self.is_null() && rhs.is_null())))
            }
            _ => {}
        }

        let result = match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => number_operation(op, *a, *b)?,
            (Value::String(a), Value::String(b)) => match op {
                BinaryOp::Add => Some(Value::String(format!("{a}{b}"))),
                BinaryOp::Eq => Some(Value::Boolean(a == b)),
                BinaryOp::Ne => Some(Value::Boolean(a != b)),
                _ => None,
            },
            (Value::Boolean(a), Value::Boolean(b)) => match op {
                BinaryOp::And => Some(Value::Boolean(*a && *b)),
                BinaryOp::Or => Some(Value::Boolean(*a || *b)),
                BinaryOp::Eq => Some(Value::Boolean(a == b)),
                BinaryOp::Ne => Some(Value::Boolean(a != b)),
                _ => None,
            },
            (Value::DateTime(a), Value::DateTime(b)) => compare(op, a, b),
            _ => None,
        };

        result.ok_or_else(|| {
            ScriptError::runtime(format!(
                "Cannot apply operator \"{}\" to types {} and {}",
                op.symbol(),
                self.type_name(),
                rhs.type_name()
            ))
        })
    }

    // ── Conversion ────────────────────────────────────────────────────────────

    /// Text form used by template literals and `print`.
    ///
    /// `null` converts to the empty string; booleans, functions, objects and
    /// enumerables do not convert.
    pub fn to_display_string(&self) -> Result<String> {
        match self {
            Value::Null => Ok(String::new()),
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) => Ok(s.clone()),
            Value::DateTime(d) => Ok(format_datetime(d)),
            other => Err(ScriptError::type_error(format!(
                "Cannot convert {} to String",
                other.type_name()
            ))),
        }
    }

    // ── Members ───────────────────────────────────────────────────────────────

    /// Soft member lookup: own members, then extension members, else `Null`.
    pub fn get_member(&self, key: &str, extensions: &Extensions) -> Result<Value> {
        if self.is_null() {
            return Err(ScriptError::type_error(format!(
                "Cannot get property \"{key}\" on null."
            )));
        }
        if let Value::Object(obj) = self {
            if let Some(v) = obj.get(key) {
                return Ok(v);
            }
        }
        Ok(extensions.lookup(self, key)?.unwrap_or(Value::Null))
    }

    /// Write a member.  Only mutable objects accept writes.
    pub fn set_member(&self, key: &str, value: Value) -> Result<()> {
        match self {
            Value::Object(obj) => obj.set(key, value),
            Value::Null => Err(ScriptError::type_error(format!(
                "Cannot set property \"{key}\" on null."
            ))),
            other => Err(ScriptError::type_error(format!(
                "Cannot set property \"{key}\" on immutable {}.",
                other.type_name()
            ))),
        }
    }
}

fn number_operation(op: BinaryOp, a: Decimal, b: Decimal) -> Result<Option<Value>> {
    let overflow = || ScriptError::runtime(format!("Numeric overflow in {a} {} {b}", op.symbol()));
    let n = match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinaryOp::Div => {
            if b.is_zero() {
                return Err(ScriptError::runtime("Attempted to divide by zero."));
            }
            a.checked_div(b).ok_or_else(overflow)?
        }
        _ => return Ok(compare(op, &a, &b)),
    };
    Ok(Some(Value::Number(n)))
}

fn compare<T: PartialOrd>(op: BinaryOp, a: &T, b: &T) -> Option<Value> {
    let r = match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Ge => a >= b,
        BinaryOp::Eq => a == b,
        BinaryOp::Ne => a != b,
        _ => return None,
    };
    Some(Value::Boolean(r))
}

/// Canonical text form of a date-time value.
pub fn format_datetime(d: &DateTime<Utc>) -> String {
    d.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Enumerable(a), Value::Enumerable(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::DateTime(d) => write!(f, "DateTime({d})"),
            Value::Function(_) => f.write_str("Function"),
            Value::Object(o) => write!(f, "Object({:?})", o.keys()),
            Value::Enumerable(_) => f.write_str("Enumerable"),
        }
    }
}

/// Human-readable form for the command line; unlike
/// [`Value::to_display_string`] this never fails.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::DateTime(d) => f.write_str(&format_datetime(d)),
            Value::Function(_) => f.write_str("<function>"),
            Value::Enumerable(_) => f.write_str("<enumerable>"),
            Value::Object(o) => {
                f.write_str("{")?;
                for (i, key) in o.keys().iter().enumerate() {
                    let v = o.get(key).unwrap_or_default();
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}{key}: {v}")?;
                }
                f.write_str(if o.is_empty() { "}" } else { " }" })
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Decimal> for Value {
    fn from(n: Decimal) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Decimal::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(Decimal::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::DateTime(d)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Enumerable> for Value {
    fn from(e: Enumerable) -> Self {
        Value::Enumerable(e)
    }
}

// ── Extensions ────────────────────────────────────────────────────────────────

/// Builds an extension member for a given receiver.
pub type Extension = Rc<dyn Fn(&Value) -> Result<Value>>;

/// Per-kind table of extension members, shared by an interpreter and every
/// closure it creates.
#[derive(Clone, Default)]
pub struct Extensions(Rc<RefCell<HashMap<ValueKind, HashMap<String, Extension>>>>);

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) extension member `name` on every value of `kind`.
    pub fn register<F>(&self, kind: ValueKind, name: impl Into<String>, build: F)
    where
        F: Fn(&Value) -> Result<Value> + 'static,
    {
        self.0
            .borrow_mut()
            .entry(kind)
            .or_default()
            .insert(name.into(), Rc::new(build));
    }

    pub fn contains(&self, kind: ValueKind, name: &str) -> bool {
        self.0
            .borrow()
            .get(&kind)
            .is_some_and(|members| members.contains_key(name))
    }

    /// Materialise extension member `name` for `receiver`, if one exists.
    pub fn lookup(&self, receiver: &Value, name: &str) -> Result<Option<Value>> {
        // Clone the builder out so it can run without holding the borrow.
        let build = self
            .0
            .borrow()
            .get(&receiver.kind())
            .and_then(|members| members.get(name))
            .cloned();
        build.map(|b| b(receiver)).transpose()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
