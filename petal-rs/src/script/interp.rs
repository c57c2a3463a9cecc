//! The host-facing interpreter.
//!
//! An [`Interpreter`] owns the global scope, the extension-member table and
//! the print log.  Hosts populate globals through [`Interpreter::register`],
//! then run source text with [`Interpreter::execute`].  Every failure is
//! caught at this boundary and returned as a categorized message inside an
//! [`ExecutionResult`]; nothing escapes as a panic or an `Err`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, warn};

use super::ast::{Expr, Program};
use super::builtins;
use super::cancel::{CancelToken, DEFAULT_MAX_CALL_DEPTH};
use super::error::{Result, ScriptError};
use super::eval::Evaluator;
use super::parser;
use super::proxy::{ExecutionResult, ProxyWriter, ValueReader};
use super::reference::Scope;
use super::value::{Extensions, Value, ValueKind};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Per-interpreter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterConfig {
    /// Deadline applied by [`Interpreter::execute`].
    pub timeout: Duration,
    /// Install `print`, `today`, `convert` and `string` as globals.
    pub install_builtins: bool,
    /// Script calls allowed on the stack at once.
    pub max_call_depth: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            timeout: Duration::from_secs(30),
            install_builtins: true,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

// ── ScriptLog ─────────────────────────────────────────────────────────────────

/// Text accumulated by `print` (and by failed executions).  Clones share the
/// buffer.
#[derive(Clone, Default)]
pub struct ScriptLog(Rc<RefCell<String>>);

impl ScriptLog {
    /// Append `text` followed by a newline.
    pub fn print_line(&self, text: &str) {
        let mut log = self.0.borrow_mut();
        log.push_str(text);
        log.push('\n');
    }

    pub fn text(&self) -> String {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

// ── ParseResult ───────────────────────────────────────────────────────────────

/// Outcome of [`Interpreter::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    error: Option<String>,
}

impl ParseResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// `"Syntax Error: …"` when the source did not parse.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

// ── Interpreter ───────────────────────────────────────────────────────────────

type ErrorHook = Box<dyn Fn(&ScriptError)>;

pub struct Interpreter {
    config: InterpreterConfig,
    globals: Scope,
    extensions: Extensions,
    log: ScriptLog,
    on_error: Option<ErrorHook>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        let interp = Interpreter {
            config,
            globals: Scope::global(),
            extensions: Extensions::new(),
            log: ScriptLog::default(),
            on_error: None,
        };
        builtins::install_extensions(&interp.extensions);
        if interp.config.install_builtins {
            builtins::install_globals(&interp);
        }
        interp
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    // ── Host registration ─────────────────────────────────────────────────────

    /// Writer for global `name`.  Writing again replaces the previous value.
    pub fn register(&self, name: &str) -> ProxyWriter {
        let globals = self.globals.clone();
        let name = name.to_owned();
        ProxyWriter::new(move |value| {
            let stored = if globals.is_declared_here(&name) {
                globals.set(&name, value)
            } else {
                globals.define(&name, value)
            };
            if let Err(e) = stored {
                warn!(global = %name, "register: {e}");
            }
        })
    }

    /// Current value of global `name`, if the host registered one.
    pub fn global(&self, name: &str) -> Option<ValueReader> {
        if !self.globals.is_declared_here(name) {
            return None;
        }
        self.globals.get(name).ok().map(ValueReader::new)
    }

    /// Add (or replace) extension member `name` on every value of `kind`.
    /// `build` receives the receiver and returns the member's value.
    pub fn extend<F>(&self, kind: ValueKind, name: &str, build: F)
    where
        F: Fn(&Value) -> Result<Value> + 'static,
    {
        self.extensions.register(kind, name, build);
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Called with the raw error whenever an execution fails.
    pub fn on_error(&mut self, hook: impl Fn(&ScriptError) + 'static) {
        self.on_error = Some(Box::new(hook));
    }

    // ── Log ───────────────────────────────────────────────────────────────────

    pub fn print_line(&self, text: &str) {
        self.log.print_line(text);
    }

    /// Everything printed since the last execution started.
    pub fn get_log(&self) -> String {
        self.log.text()
    }

    /// A handle onto the log buffer, for host functions that print.
    pub fn log(&self) -> ScriptLog {
        self.log.clone()
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    pub fn validate(&self, source: &str) -> ParseResult {
        ParseResult {
            error: parser::parse_program(source).err().map(|e| e.describe()),
        }
    }

    pub fn parse(&self, source: &str) -> Result<Program> {
        parser::parse_program(source)
    }

    pub fn parse_expression(&self, source: &str) -> Result<Expr> {
        parser::parse_expression(source)
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    /// Run `source` with the configured timeout.
    pub async fn execute(&self, source: &str) -> ExecutionResult {
        self.execute_with(source, self.config.timeout, CancelToken::new())
            .await
    }

    /// Run `source`, stopping after `timeout` or when `cancel` fires.
    pub async fn execute_with(
        &self,
        source: &str,
        timeout: Duration,
        cancel: CancelToken,
    ) -> ExecutionResult {
        self.log.clear();
        debug!(bytes = source.len(), "execute");
        let outcome = match parser::parse_program(source) {
            Ok(program) => self.run(&program, timeout, cancel).await,
            Err(e) => Err(e),
        };
        self.finish(outcome)
    }

    /// Run an already parsed program with the configured timeout.
    pub async fn execute_program(&self, program: &Program) -> ExecutionResult {
        self.log.clear();
        let outcome = self
            .run(program, self.config.timeout, CancelToken::new())
            .await;
        self.finish(outcome)
    }

    /// Evaluate a standalone expression against the globals.
    pub async fn evaluate(&self, expr: &Expr) -> ExecutionResult {
        self.log.clear();
        let cancel = CancelToken::new()
            .with_timeout(self.config.timeout)
            .with_max_call_depth(self.config.max_call_depth);
        let (scope, frames) = self.globals.push_tracked();
        let mut evaluator = Evaluator::new(self.extensions.clone(), cancel.clone());
        let outcome = cancel.run(evaluator.evaluate(expr, &scope)).await;
        frames.release();
        self.finish(outcome)
    }

    async fn run(&self, program: &Program, timeout: Duration, cancel: CancelToken) -> Result<Value> {
        let cancel = cancel
            .with_timeout(timeout)
            .with_max_call_depth(self.config.max_call_depth);
        // Script-level `let`s live in a per-run frame above the globals.
        // Every frame of the run is emptied afterwards, which frees
        // functions that captured the frame they are stored in.
        let (scope, frames) = self.globals.push_tracked();
        let mut evaluator = Evaluator::new(self.extensions.clone(), cancel.clone());
        let outcome = cancel.run(evaluator.run_program(program, &scope)).await;
        frames.release();
        outcome
    }

    fn finish(&self, outcome: Result<Value>) -> ExecutionResult {
        match outcome {
            Ok(value) => {
                debug!(result = %value.type_name(), "execute finished");
                ExecutionResult::success(value)
            }
            Err(e) => {
                debug!(error = %e, category = e.category(), "execute failed");
                if let Some(hook) = &self.on_error {
                    hook(&e);
                }
                let message = e.describe();
                self.log.print_line(&message);
                ExecutionResult::failure(message)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::Function;
    use futures::future::{self, FutureExt};
    use std::cell::Cell;

    async fn run(src: &str) -> ExecutionResult {
        Interpreter::new().execute(src).await
    }

    fn bare() -> Interpreter {
        Interpreter::with_config(InterpreterConfig {
            install_builtins: false,
            ..InterpreterConfig::default()
        })
    }

    #[tokio::test]
    async fn last_statement_is_the_result() {
        let r = run("let x = 6; x * 7").await;
        assert!(r.is_success(), "{:?}", r.error());
        assert_eq!(r.value().as_number(), Some(42.into()));
    }

    #[tokio::test]
    async fn register_replaces_existing_global() {
        let interp = Interpreter::new();
        interp.register("x").number(1);
        interp.register("x").number(2);
        let r = interp.execute("x").await;
        assert_eq!(r.value().as_number(), Some(2.into()));
        assert_eq!(interp.global("x").and_then(|v| v.as_number()), Some(2.into()));
    }

    #[tokio::test]
    async fn script_lets_do_not_outlive_the_run() {
        let interp = Interpreter::new();
        assert!(interp.execute("let x = 1;").await.is_success());
        assert!(interp.execute("let x = 2; x").await.is_success());
        assert!(interp.global("x").is_none());
    }

    #[tokio::test]
    async fn failures_are_categorized_and_logged() {
        let interp = Interpreter::new();
        let r = interp.execute("undefinedThing").await;
        assert_eq!(
            r.error(),
            Some("Runtime Error: Cannot read from variable. \"undefinedThing\" does not exist.")
        );
        assert!(interp.get_log().ends_with("does not exist.\n"));
    }

    #[tokio::test]
    async fn syntax_errors_come_back_as_text() {
        let r = run("let = 4;").await;
        assert!(r.error().unwrap().starts_with("Syntax Error: "));
    }

    #[tokio::test]
    async fn on_error_sees_the_raw_error() {
        let mut interp = Interpreter::new();
        let seen = Rc::new(Cell::new(false));
        let flag = Rc::clone(&seen);
        interp.on_error(move |e| flag.set(matches!(e, ScriptError::Type(_))));
        interp.execute("let n = null; n.x").await;
        assert!(seen.get());
    }

    #[tokio::test]
    async fn log_is_reset_per_execution() {
        let interp = Interpreter::new();
        interp.execute("print(\"one\");").await;
        assert_eq!(interp.get_log(), "one\n");
        interp.execute("print(\"two\");").await;
        assert_eq!(interp.get_log(), "two\n");
    }

    #[test]
    fn validate_reports_syntax_errors() {
        let interp = Interpreter::new();
        assert!(interp.validate("let x = 1;").is_success());
        let bad = interp.validate("if (x {");
        assert!(bad.error().unwrap().starts_with("Syntax Error: "));
    }

    #[tokio::test]
    async fn builtins_can_be_disabled() {
        let r = bare().execute("print(\"x\")").await;
        assert!(r.error().unwrap().contains("\"print\" does not exist"));
        // Extension members are always available.
        let r = bare().execute("\"abc\".length").await;
        assert_eq!(r.value().as_number(), Some(3.into()));
    }

    #[tokio::test]
    async fn custom_extension_member() {
        let interp = bare();
        interp.extend(ValueKind::Number, "double", |v| match v {
            Value::Number(n) => Ok(Value::Number(n * rust_decimal::Decimal::TWO)),
            _ => Ok(Value::Null),
        });
        let r = interp.execute("let n = 21; n.double").await;
        assert_eq!(r.value().as_number(), Some(42.into()));
    }

    #[tokio::test]
    async fn execute_program_and_evaluate() {
        let interp = Interpreter::new();
        interp.register("base").number(10);
        let program = interp.parse("base + 1").unwrap();
        let r = interp.execute_program(&program).await;
        assert_eq!(r.value().as_number(), Some(11.into()));

        let expr = interp.parse_expression("base * 3").unwrap();
        let r = interp.evaluate(&expr).await;
        assert_eq!(r.value().as_number(), Some(30.into()));
    }

    #[tokio::test]
    async fn timeout_is_reported_with_the_allotted_time() {
        let interp = Interpreter::new();
        let r = interp
            .execute_with("while (true) {}", Duration::from_millis(50), CancelToken::new())
            .await;
        assert_eq!(r.error(), Some("Execution timed out after 0.05 seconds"));
    }

    #[tokio::test]
    async fn host_cancel_stops_execution() {
        let interp = Interpreter::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let r = interp
            .execute_with("1", Duration::from_secs(5), cancel)
            .await;
        assert_eq!(r.error(), Some("Execution was cancelled"));
    }

    #[tokio::test]
    async fn declared_functions_do_not_outlive_the_run() {
        let marker = Rc::new(());
        let interp = Interpreter::new();
        let held = Rc::clone(&marker);
        interp.register("make").sync_function(move |call| {
            let held = Rc::clone(&held);
            call.ret().value(Value::Function(Function::new(move |_, _| {
                let refs = Rc::strong_count(&held);
                future::ready(Ok(Value::from(refs as i64))).boxed_local()
            })));
            Ok(())
        });
        let baseline = Rc::strong_count(&marker);

        assert!(interp.execute("let held = make(); 1").await.is_success());
        assert_eq!(Rc::strong_count(&marker), baseline);

        let r = interp.execute("let held = make(); def f() { held; } f(); 1").await;
        assert!(r.is_success(), "{:?}", r.error());
        assert_eq!(Rc::strong_count(&marker), baseline);

        let src = "
            def outer() { let h = make(); def inner() { h(); } return inner; }
            let g = outer();
            g()
        ";
        let r = interp.execute(src).await;
        assert!(r.is_success(), "{:?}", r.error());
        assert_eq!(Rc::strong_count(&marker), baseline);
    }
}
