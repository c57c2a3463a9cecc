//! Host bridge: typed adapters between host Rust code and script values.
//!
//! | Direction      | Type                                        |
//! |----------------|---------------------------------------------|
//! | host → script  | [`ProxyWriter`], [`ObjectBuilder`], [`ArgumentBuilder`] |
//! | script → host  | [`ValueReader`], [`ObjectReader`], [`FunctionProxy`]    |
//! | host functions | [`CallContext`] (arguments, return slot, cancel token) |
//! | sequences      | [`EnumerableMapContext`] (maps host items to values)   |
//!
//! A writer is a thin wrapper over a sink closure, so the same API fills a
//! global variable, an object member, a return value or an argument list.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::future::{self, FutureExt};
use futures::stream::{Stream, StreamExt};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::cancel::CancelToken;
use super::error::{Result, ScriptError};
use super::value::{format_datetime, Enumerable, Function, Object, Value, ValueKind};

// ── ProxyWriter ───────────────────────────────────────────────────────────────

/// Writes one host value into wherever the sink points.
#[derive(Clone)]
pub struct ProxyWriter {
    sink: Rc<dyn Fn(Value)>,
}

impl ProxyWriter {
    pub fn new(sink: impl Fn(Value) + 'static) -> Self {
        ProxyWriter { sink: Rc::new(sink) }
    }

    pub fn value(&self, value: Value) -> &Self {
        (self.sink)(value);
        self
    }

    pub fn null(&self) -> &Self {
        self.value(Value::Null)
    }

    pub fn number(&self, n: impl Into<Decimal>) -> &Self {
        self.value(Value::Number(n.into()))
    }

    pub fn string(&self, s: impl Into<String>) -> &Self {
        self.value(Value::String(s.into()))
    }

    pub fn boolean(&self, b: bool) -> &Self {
        self.value(Value::Boolean(b))
    }

    pub fn datetime(&self, d: DateTime<Utc>) -> &Self {
        self.value(Value::DateTime(d))
    }

    /// A host function.  The handler may suspend, raced against the call's
    /// cancel token; its return value is whatever it wrote through
    /// [`CallContext::ret`] (`null` otherwise).
    pub fn function<F, Fut>(&self, handler: F) -> &Self
    where
        F: Fn(CallContext) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let handler = Rc::new(handler);
        self.value(Value::Function(Function::new(move |args, cancel| {
            let handler = Rc::clone(&handler);
            async move {
                let slot = Rc::new(RefCell::new(Value::Null));
                let call = CallContext {
                    args: args.into_iter().map(ValueReader::new).collect(),
                    ret: Rc::clone(&slot),
                    cancel: cancel.clone(),
                };
                debug!(args = call.args.len(), "host call");
                cancel.run(handler(call)).await?;
                Ok(slot.take())
            }
            .boxed_local()
        })))
    }

    /// A host function that never suspends.
    pub fn sync_function<F>(&self, handler: F) -> &Self
    where
        F: Fn(&CallContext) -> Result<()> + 'static,
    {
        self.function(move |call| future::ready(handler(&call)))
    }

    /// A fresh object whose members are filled in by `configure`.
    pub fn object(&self, configure: impl FnOnce(&ObjectBuilder)) -> &Self {
        let builder = ObjectBuilder::new();
        configure(&builder);
        self.value(Value::Object(builder.build()))
    }

    /// A lazy sequence: each pass calls `source` for a new stream and maps
    /// every host item through `map` (unwritten items become `null`).
    pub fn enumerable<T, S, Src, M>(&self, source: Src, map: M) -> &Self
    where
        T: 'static,
        S: Stream<Item = T> + 'static,
        Src: Fn() -> S + 'static,
        M: Fn(&EnumerableMapContext<T>) + 'static,
    {
        let map = Rc::new(map);
        self.value(Value::Enumerable(Enumerable::new(move || {
            let map = Rc::clone(&map);
            source()
                .map(move |item| {
                    let ctx = EnumerableMapContext::new(item);
                    map(&ctx);
                    Ok(ctx.into_value())
                })
                .boxed_local()
        })))
    }
}

/// Capture whatever `write` produces as a bare value.
pub fn build_value(write: impl FnOnce(&ProxyWriter)) -> Value {
    let slot = Rc::new(RefCell::new(Value::Null));
    let sink = Rc::clone(&slot);
    write(&ProxyWriter::new(move |value| *sink.borrow_mut() = value));
    slot.take()
}

// ── ObjectBuilder ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ObjectBuilder {
    object: Object,
    frozen: Cell<bool>,
}

impl ObjectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer for member `key`.
    pub fn add(&self, key: impl Into<String>) -> ProxyWriter {
        let key = key.into();
        let object = self.object.clone();
        ProxyWriter::new(move |value| {
            if let Err(e) = object.set(key.clone(), value) {
                warn!("object builder: {e}");
            }
        })
    }

    /// Make the built object read-only to scripts.
    pub fn freeze(&self) -> &Self {
        self.frozen.set(true);
        self
    }

    pub fn build(self) -> Object {
        if self.frozen.get() {
            self.object.freeze();
        }
        self.object
    }
}

// ── ArgumentBuilder ───────────────────────────────────────────────────────────

/// Positional arguments for [`FunctionProxy::call`].
#[derive(Default)]
pub struct ArgumentBuilder {
    args: Rc<RefCell<Vec<Value>>>,
}

impl ArgumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer for the next positional argument.
    pub fn add(&self) -> ProxyWriter {
        let args = Rc::clone(&self.args);
        ProxyWriter::new(move |value| args.borrow_mut().push(value))
    }

    pub fn build(&self) -> Vec<Value> {
        self.args.borrow().clone()
    }
}

// ── CallContext ───────────────────────────────────────────────────────────────

/// What a host function sees when a script calls it.
pub struct CallContext {
    args: Vec<ValueReader>,
    ret: Rc<RefCell<Value>>,
    cancel: CancelToken,
}

impl CallContext {
    pub fn args(&self) -> &[ValueReader] {
        &self.args
    }

    /// Positional argument `i`, or a `null` reader past the end.
    pub fn arg(&self, i: usize) -> ValueReader {
        self.args.get(i).cloned().unwrap_or_default()
    }

    /// Writer for the call's return value.
    pub fn ret(&self) -> ProxyWriter {
        let slot = Rc::clone(&self.ret);
        ProxyWriter::new(move |value| *slot.borrow_mut() = value)
    }

    /// The executing script's cancel token; long waits should honour it.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

// ── EnumerableMapContext ──────────────────────────────────────────────────────

pub struct EnumerableMapContext<T> {
    input: T,
    ret: Rc<RefCell<Value>>,
}

impl<T> EnumerableMapContext<T> {
    fn new(input: T) -> Self {
        EnumerableMapContext {
            input,
            ret: Rc::default(),
        }
    }

    pub fn input(&self) -> &T {
        &self.input
    }

    pub fn ret(&self) -> ProxyWriter {
        let slot = Rc::clone(&self.ret);
        ProxyWriter::new(move |value| *slot.borrow_mut() = value)
    }

    fn into_value(self) -> Value {
        self.ret.take()
    }
}

// ── ValueReader ───────────────────────────────────────────────────────────────

/// Typed view of a script value.  Each `as_*` reader returns `None` when the
/// value is of another variant; the `convert_to_*` readers coerce between
/// primitive variants instead.
#[derive(Debug, Clone, Default)]
pub struct ValueReader {
    value: Value,
}

impl ValueReader {
    pub fn new(value: Value) -> Self {
        ValueReader { value }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match &self.value {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        self.as_str().map(str::to_owned)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match &self.value {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match &self.value {
            Value::DateTime(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectReader> {
        match &self.value {
            Value::Object(o) => Some(ObjectReader { object: o.clone() }),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<FunctionProxy> {
        match &self.value {
            Value::Function(f) => Some(FunctionProxy { function: f.clone() }),
            _ => None,
        }
    }

    pub fn as_enumerable(&self) -> Option<Enumerable> {
        match &self.value {
            Value::Enumerable(e) => Some(e.clone()),
            _ => None,
        }
    }

    // ── Coercions ─────────────────────────────────────────────────────────────

    /// Text form of a primitive; `None` for null and non-primitives.
    pub fn convert_to_string(&self) -> Option<String> {
        match &self.value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::DateTime(d) => Some(format_datetime(d)),
            _ => None,
        }
    }

    pub fn convert_to_number(&self) -> Result<Option<Decimal>> {
        match &self.value {
            Value::Number(n) => Ok(Some(*n)),
            Value::Boolean(b) => Ok(Some(Decimal::from(u8::from(*b)))),
            Value::String(s) => Decimal::from_str(s.trim())
                .map(Some)
                .map_err(|_| self.cast_error("Number")),
            Value::DateTime(_) => Err(self.cast_error("Number")),
            _ => Ok(None),
        }
    }

    pub fn convert_to_boolean(&self) -> Result<Option<bool>> {
        match &self.value {
            Value::Boolean(b) => Ok(Some(*b)),
            Value::Number(n) => Ok(Some(!n.is_zero())),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(self.cast_error("Boolean")),
            },
            Value::DateTime(_) => Err(self.cast_error("Boolean")),
            _ => Ok(None),
        }
    }

    pub fn convert_to_datetime(&self) -> Result<Option<DateTime<Utc>>> {
        match &self.value {
            Value::DateTime(d) => Ok(Some(*d)),
            Value::String(s) => parse_datetime(s.trim())
                .map(Some)
                .ok_or_else(|| self.cast_error("DateTime")),
            Value::Number(_) | Value::Boolean(_) => Err(self.cast_error("DateTime")),
            _ => Ok(None),
        }
    }

    fn cast_error(&self, target: &str) -> ScriptError {
        let shown = self.convert_to_string().unwrap_or_default();
        ScriptError::type_error(format!(
            "Cannot convert {} \"{shown}\" to {target}.",
            self.value.type_name()
        ))
    }
}

/// Accepts RFC 3339, `yyyy-MM-dd HH:mm:ss`, `yyyy-MM-dd` and `dd/MM/yyyy`.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(d.and_utc());
    }
    ["%Y-%m-%d", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

// ── ObjectReader ──────────────────────────────────────────────────────────────

pub struct ObjectReader {
    object: Object,
}

impl ObjectReader {
    /// Member `key`, or a `null` reader when absent.
    pub fn get(&self, key: &str) -> ValueReader {
        ValueReader::new(self.object.get(key).unwrap_or_default())
    }

    pub fn has(&self, key: &str) -> bool {
        self.object.contains(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.object.keys()
    }
}

// ── FunctionProxy ─────────────────────────────────────────────────────────────

/// Lets host code call a script (or host) function value.
pub struct FunctionProxy {
    function: Function,
}

impl FunctionProxy {
    /// Call with arguments written by `configure`.  Failures come back as a
    /// categorized error text, exactly like `Interpreter::execute`.
    pub async fn call(&self, configure: impl FnOnce(&ArgumentBuilder), cancel: CancelToken) -> ExecutionResult {
        let args = ArgumentBuilder::new();
        configure(&args);
        match cancel.run(self.function.call(args.build(), cancel.clone())).await {
            Ok(value) => ExecutionResult::success(value),
            Err(e) => ExecutionResult::failure(e.describe()),
        }
    }
}

// ── ExecutionResult ───────────────────────────────────────────────────────────

/// Outcome of an execution or a proxied call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    value: Value,
    error: Option<String>,
}

impl ExecutionResult {
    pub fn success(value: Value) -> Self {
        ExecutionResult { value, error: None }
    }

    /// A success whose value is produced through a writer.
    pub fn from_writer(write: impl FnOnce(&ProxyWriter)) -> Self {
        ExecutionResult::success(build_value(write))
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ExecutionResult {
            value: Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Typed access to the result; a `null` reader after a failure.
    pub fn value(&self) -> ValueReader {
        ValueReader::new(self.value.clone())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
