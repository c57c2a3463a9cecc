//! Async tree-walking evaluator.
//!
//! One exhaustive `match` per node family: [`Evaluator::exec`] for statements
//! (yielding the statement's value) and [`Evaluator::eval`] for expressions
//! (yielding a [`Reference`] so the caller decides between read and write).
//!
//! Scopes are passed down explicitly.  Blocks, conditionals and loops run in
//! a fresh child frame that is dropped when the construct finishes; a call
//! runs in a child of the closure's defining frame, so nothing leaks into the
//! caller's chain.
//!
//! `&&`, `||` and `??` always evaluate both operands.

use std::sync::Arc;

use futures::future::{FutureExt, LocalBoxFuture};
use futures::StreamExt;
use tracing::trace;

use super::ast::{
    AssignOp, Expr, ForInit, FunctionDeclaration, Program, Property, Stmt, TemplateSegment,
    VariableDeclaration,
};
use super::cancel::CancelToken;
use super::error::{Result, ScriptError};
use super::reference::{Reference, Scope};
use super::value::{Enumerable, Extensions, Function, Value, ValueStream};

/// Walks one program (or one function body) to completion.
pub struct Evaluator {
    extensions: Extensions,
    cancel: CancelToken,
    /// Set by `return`; unwinds blocks and loops up to the call boundary.
    must_return: bool,
}

impl Evaluator {
    pub fn new(extensions: Extensions, cancel: CancelToken) -> Self {
        Evaluator {
            extensions,
            cancel,
            must_return: false,
        }
    }

    /// Run `program` directly in `scope`; the value of the last executed
    /// statement is the result.
    pub async fn run_program(&mut self, program: &Program, scope: &Scope) -> Result<Value> {
        self.must_return = false;
        self.statements(&program.body, scope).await
    }

    /// Evaluate a standalone expression and read its value.
    pub async fn evaluate(&mut self, expr: &Expr, scope: &Scope) -> Result<Value> {
        self.value_of(expr, scope).await
    }

    // ── Statements ────────────────────────────────────────────────────────────

    async fn statements(&mut self, body: &[Stmt], scope: &Scope) -> Result<Value> {
        let mut result = Value::Null;
        for stmt in body {
            result = self.exec(stmt, scope).await?;
            if self.must_return {
                break;
            }
        }
        Ok(result)
    }

    async fn block(&mut self, body: &[Stmt], scope: &Scope) -> Result<Value> {
        let inner = scope.push();
        self.statements(body, &inner).await
    }

    fn exec<'a>(&'a mut self, stmt: &'a Stmt, scope: &'a Scope) -> LocalBoxFuture<'a, Result<Value>> {
        async move {
            self.cancel.check()?;
            match stmt {
                Stmt::Empty => Ok(Value::Null),
                Stmt::Expression(expr) => self.value_of(expr, scope).await,
                Stmt::Block(body) => self.block(body, scope).await,

                Stmt::Return(argument) => {
                    let value = match argument {
                        Some(expr) => self.value_of(expr, scope).await?,
                        None => Value::Null,
                    };
                    self.must_return = true;
                    Ok(value)
                }

                Stmt::Variable(decls) => {
                    self.declare_all(decls, scope).await?;
                    Ok(Value::Null)
                }

                Stmt::Function(decl) => {
                    let function = Value::Function(closure(
                        Arc::clone(decl),
                        scope.clone(),
                        self.extensions.clone(),
                    ));
                    scope.define(&decl.name, function.clone())?;
                    Ok(function)
                }

                Stmt::If {
                    test,
                    consequent,
                    alternate,
                } => {
                    let inner = scope.push();
                    if self.condition(test, &inner).await? {
                        self.exec(consequent, &inner).await
                    } else if let Some(alternate) = alternate {
                        self.exec(alternate, &inner).await
                    } else {
                        Ok(Value::Null)
                    }
                }

                Stmt::While { test, body } => {
                    let inner = scope.push();
                    let mut result = Value::Null;
                    while self.condition(test, &inner).await? {
                        result = self.exec(body, &inner).await?;
                        if self.must_return {
                            break;
                        }
                    }
                    Ok(result)
                }

                Stmt::DoWhile { body, test } => {
                    let inner = scope.push();
                    loop {
                        let result = self.exec(body, &inner).await?;
                        if self.must_return || !self.condition(test, &inner).await? {
                            break Ok(result);
                        }
                    }
                }

                Stmt::For {
                    init,
                    test,
                    update,
                    body,
                } => {
                    let inner = scope.push();
                    match init {
                        Some(ForInit::Variable(decls)) => self.declare_all(decls, &inner).await?,
                        Some(ForInit::Expression(expr)) => {
                            self.eval(expr, &inner).await?;
                        }
                        None => {}
                    }
                    let mut result = Value::Null;
                    loop {
                        if let Some(test) = test {
                            if !self.condition(test, &inner).await? {
                                break;
                            }
                        }
                        result = self.exec(body, &inner).await?;
                        if self.must_return {
                            break;
                        }
                        if let Some(update) = update {
                            self.eval(update, &inner).await?;
                        }
                    }
                    Ok(result)
                }

                Stmt::Foreach { id, iterable, body } => {
                    let source = self.eval(iterable, scope).await?;
                    let Value::Enumerable(items) = source.read_or_resolve(scope, &self.extensions)? else {
                        return Err(ScriptError::type_error(format!(
                            "{} is not enumerable.",
                            source.full_name()
                        )));
                    };
                    self.foreach(id, &items, body, scope).await
                }
            }
        }
        .boxed_local()
    }

    async fn foreach(&mut self, id: &str, items: &Enumerable, body: &Stmt, scope: &Scope) -> Result<Value> {
        let mut stream = items.stream();
        let mut result = Value::Null;
        while let Some(item) = self.next_item(&mut stream).await? {
            let inner = scope.push();
            inner.define(id, item)?;
            result = self.exec(body, &inner).await?;
            if self.must_return {
                break;
            }
        }
        Ok(result)
    }

    /// Pull the next element; a host stream may suspend, so race it
    /// against the cancel token.
    async fn next_item(&self, stream: &mut ValueStream) -> Result<Option<Value>> {
        self.cancel.run(async { stream.next().await.transpose() }).await
    }

    /// Initialisers are evaluated before the name is declared, so
    /// `let x = x;` in an inner block reads the outer `x`.
    async fn declare_all(&mut self, decls: &[VariableDeclaration], scope: &Scope) -> Result<()> {
        for decl in decls {
            let value = match &decl.init {
                Some(expr) => self.value_of(expr, scope).await?,
                None => Value::Null,
            };
            scope.define(&decl.id, value)?;
        }
        Ok(())
    }

    async fn condition(&mut self, test: &Expr, scope: &Scope) -> Result<bool> {
        self.eval(test, scope).await?.truthy(scope, &self.extensions)
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    async fn value_of(&mut self, expr: &Expr, scope: &Scope) -> Result<Value> {
        self.eval(expr, scope)
            .await?
            .read_or_resolve(scope, &self.extensions)
    }

    fn eval<'a>(&'a mut self, expr: &'a Expr, scope: &'a Scope) -> LocalBoxFuture<'a, Result<Reference>> {
        async move {
            self.cancel.check()?;
            let reference = match expr {
                Expr::Number { value, .. } => Reference::Value(Value::Number(*value)),
                Expr::String(s) => Reference::Value(Value::String(s.clone())),
                Expr::Boolean(b) => Reference::Value(Value::Boolean(*b)),
                Expr::Null => Reference::Value(Value::Null),
                Expr::Identifier(name) => Reference::Identifier(name.clone()),

                Expr::Template(segments) => {
                    let mut text = String::new();
                    for segment in segments {
                        match segment {
                            TemplateSegment::Text(t) => text.push_str(t),
                            TemplateSegment::Expr(e) => {
                                text.push_str(&self.value_of(e, scope).await?.to_display_string()?)
                            }
                        }
                    }
                    Reference::Value(Value::String(text))
                }

                Expr::Assignment { op, target, value } => {
                    let target = self.eval(target, scope).await?.resolve(scope);
                    let value = match op {
                        AssignOp::Assign => self.value_of(value, scope).await?,
                        AssignOp::Compound(op) => {
                            let old = target.read(&self.extensions)?;
                            let rhs = self.value_of(value, scope).await?;
                            old.binary_operation(*op, &rhs)?
                        }
                    };
                    target.write(value.clone(), &self.extensions)?;
                    Reference::Value(value)
                }

                Expr::Binary { .. } | Expr::Logical { .. } => {
                    // Fold the left spine in a loop; long operator chains
                    // would otherwise recurse once per operator.
                    let mut spine = Vec::new();
                    let mut base = expr;
                    while let Expr::Binary { op, left, right } | Expr::Logical { op, left, right } = base {
                        spine.push((*op, right.as_ref()));
                        base = left.as_ref();
                    }
                    let mut acc = self.value_of(base, scope).await?;
                    for (op, right) in spine.into_iter().rev() {
                        let rhs = self.value_of(right, scope).await?;
                        acc = acc.binary_operation(op, &rhs)?;
                    }
                    Reference::Value(acc)
                }

                Expr::Unary { op, operand } => {
                    let operand = self.value_of(operand, scope).await?;
                    Reference::Value(operand.unary_operation(*op)?)
                }

                Expr::Member {
                    object,
                    property,
                    null_propagating,
                } => {
                    let parent = self.eval(object, scope).await?.resolve(scope);
                    if *null_propagating && parent.read(&self.extensions)?.is_null() {
                        return Ok(Reference::Value(Value::Null));
                    }
                    let key = match property {
                        Property::Named(name) => name.clone(),
                        Property::Computed(key) => self.value_of(key, scope).await?.to_display_string()?,
                    };
                    Reference::Member {
                        parent: Box::new(parent),
                        key,
                    }
                }

                Expr::Call { callee, args } => {
                    let callee = self.eval(callee, scope).await?;
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.value_of(arg, scope).await?);
                    }
                    let Value::Function(function) = callee.read_or_resolve(scope, &self.extensions)? else {
                        return Err(ScriptError::type_error(format!(
                            "\"{}\" is not a function",
                            callee.full_name()
                        )));
                    };
                    trace!(callee = %callee.full_name(), args = values.len(), "call");
                    Reference::Value(function.call(values, self.cancel.clone()).await?)
                }
            };
            Ok(reference)
        }
        .boxed_local()
    }
}

/// A script function closing over its defining scope.
///
/// Each call runs on a fresh evaluator, which confines the `return` flag to
/// the call, and holds a call slot on the token for its duration.  Missing
/// arguments are `null`; extra ones are ignored.
fn closure(decl: Arc<FunctionDeclaration>, captured: Scope, extensions: Extensions) -> Function {
    Function::new(move |args, cancel| {
        let decl = Arc::clone(&decl);
        let captured = captured.clone();
        let extensions = extensions.clone();
        async move {
            let _slot = cancel.enter_call()?;
            let frame = captured.push();
            let mut args = args.into_iter();
            for param in &decl.params {
                frame.define(param, args.next().unwrap_or_default())?;
            }
            Evaluator::new(extensions, cancel).block(&decl.body, &frame).await
        }
        .boxed_local()
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::{parse_expression, parse_program};
    use crate::script::value::Object;
    use rust_decimal::Decimal;

    async fn run_in(src: &str, scope: &Scope) -> Result<Value> {
        let program = parse_program(src)?;
        Evaluator::new(Extensions::new(), CancelToken::new())
            .run_program(&program, scope)
            .await
    }

    async fn run(src: &str) -> Result<Value> {
        run_in(src, &Scope::global()).await
    }

    fn num(n: i64) -> Value {
        Value::from(n)
    }

    #[tokio::test]
    async fn precedence() {
        assert_eq!(run("12 + 16 * 2;").await.unwrap(), num(44));
        assert_eq!(run("(12 + 16) * 2;").await.unwrap(), num(56));
    }

    #[tokio::test]
    async fn chained_assignment() {
        let g = Scope::global();
        run_in("let x, y; x = y = 1;", &g).await.unwrap();
        assert_eq!(g.get("x").unwrap(), num(1));
        assert_eq!(g.get("y").unwrap(), num(1));
    }

    #[tokio::test]
    async fn compound_assignment() {
        assert_eq!(run("let a = 10; a -= 4; a *= 2; a;").await.unwrap(), num(12));
        assert_eq!(run("let s = 'a'; s += 'b'; s;").await.unwrap(), Value::from("ab"));
    }

    #[tokio::test]
    async fn assignment_to_undeclared_fails() {
        let err = run("x = 1;").await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot write to variable. \"x\" does not exist.");
    }

    #[tokio::test]
    async fn functions_and_closures() {
        assert_eq!(
            run("let x = 5; def sayten(a) { a * x; } sayten(2);").await.unwrap(),
            num(10)
        );
        assert_eq!(
            run("def counter() { let n = 0; def next() { n += 1; } next; } \
                 let c = counter(); c(); c(); c();")
                .await
                .unwrap(),
            num(3)
        );
    }

    #[tokio::test]
    async fn missing_arguments_are_null() {
        assert_eq!(run("def f(a, b) { b ?? 7; } f(1);").await.unwrap(), num(7));
    }

    #[tokio::test]
    async fn recursion() {
        let src = "def fact(n) { if (n <= 1) { return 1; } return n * fact(n - 1); } fact(10);";
        assert_eq!(run(src).await.unwrap(), num(3_628_800));
    }

    #[tokio::test]
    async fn return_unwinds_loops_but_not_the_caller() {
        let src = "def first() { let i = 0; while (true) { i += 1; if (i == 3) { return i; } } } \
                   let r = first(); r + 1;";
        assert_eq!(run(src).await.unwrap(), num(4));
    }

    #[tokio::test]
    async fn top_level_return_stops_the_program() {
        assert_eq!(run("return 1; 2;").await.unwrap(), num(1));
    }

    #[tokio::test]
    async fn blocks_scope_their_declarations() {
        assert_eq!(run("let a = 1; { let a = 2; } a;").await.unwrap(), num(1));
        let err = run("{ let b = 1; } b;").await.unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)));
    }

    #[tokio::test]
    async fn redeclaration_fails_only_in_same_frame() {
        assert!(matches!(run("let a; let a;").await, Err(ScriptError::Runtime(_))));
        assert!(run("let a; { let a; }").await.is_ok());
    }

    #[tokio::test]
    async fn loops() {
        assert_eq!(
            run("let s = 0; for (let i = 0; i < 5; i += 1) s += i; s;").await.unwrap(),
            num(10)
        );
        assert_eq!(run("let n = 0; while (n < 3) n += 1;").await.unwrap(), num(3));
        assert_eq!(run("let n = 10; do n += 1; while (n < 3);").await.unwrap(), num(11));
        assert_eq!(run("while (false) 1;").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn conditions_must_be_boolean() {
        let err = run("if (1) 2;").await.unwrap_err();
        assert!(matches!(err, ScriptError::Type(_)));
    }

    #[tokio::test]
    async fn foreach_over_values() {
        let g = Scope::global();
        g.define(
            "items",
            Value::Enumerable(Enumerable::from_values(vec![num(5), num(7)])),
        )
        .unwrap();
        assert_eq!(
            run_in("let t = 0; foreach (let i in items) t += i; t;", &g).await.unwrap(),
            num(12)
        );
    }

    #[tokio::test]
    async fn foreach_over_empty_sequence_yields_null() {
        let g = Scope::global();
        g.define("items", Value::Enumerable(Enumerable::from_values(vec![])))
            .unwrap();
        assert_eq!(run_in("foreach (let i in items) 1;", &g).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn foreach_requires_enumerable() {
        let err = run("let x = 1; foreach (let i in x) 1;").await.unwrap_err();
        assert_eq!(err.to_string(), "x is not enumerable.");
    }

    #[tokio::test]
    async fn logical_operators_evaluate_both_sides() {
        let src = "let hits = 0; def hit() { hits += 1; true; } false && hit(); true || hit(); 1 ?? hit(); hits;";
        assert_eq!(run(src).await.unwrap(), num(3));
    }

    #[tokio::test]
    async fn null_propagation() {
        assert_eq!(run("let a; a?.b ?? 100;").await.unwrap(), num(100));
        assert_eq!(run("let a; a?.[b];").await.unwrap(), Value::Null);
        let err = run("let a; a.b;").await.unwrap_err();
        assert!(matches!(err, ScriptError::Type(_)));
    }

    #[tokio::test]
    async fn object_members() {
        let g = Scope::global();
        g.define("x", Value::Object(Object::new())).unwrap();
        assert_eq!(
            run_in("x.y = 10; x['z'] = 2; let k = 'y'; x[k] * x.z + (x.missing ?? 0);", &g)
                .await
                .unwrap(),
            num(20)
        );
    }

    #[tokio::test]
    async fn templates() {
        assert_eq!(
            run(r#"def getWorld() { "world"; } $"Hello {$"foo {getWorld()}"}";"#)
                .await
                .unwrap(),
            Value::from("Hello foo world")
        );
        assert_eq!(run(r#"$"hello-{null}-world";"#).await.unwrap(), Value::from("hello--world"));
        assert!(run(r#"$"{true}";"#).await.is_err());
    }

    #[tokio::test]
    async fn calling_a_non_function() {
        let err = run("let f = 1; f();").await.unwrap_err();
        assert_eq!(err.to_string(), "\"f\" is not a function");
    }

    #[tokio::test]
    async fn host_functions_are_awaited() {
        let g = Scope::global();
        let add = Function::new(|args, _| {
            async move {
                let mut total = Decimal::ZERO;
                for a in args {
                    if let Value::Number(n) = a {
                        total += n;
                    }
                }
                Ok(Value::Number(total))
            }
            .boxed_local()
        });
        g.define("add", Value::Function(add)).unwrap();
        assert_eq!(run_in("add(1, 2, 3);", &g).await.unwrap(), num(6));
    }

    #[tokio::test]
    async fn expired_token_stops_an_infinite_loop() {
        let program = parse_program("while (true) {}").unwrap();
        let cancel = CancelToken::new().with_timeout(std::time::Duration::from_millis(20));
        let err = Evaluator::new(Extensions::new(), cancel)
            .run_program(&program, &Scope::global())
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::TimedOut(_)));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_the_first_node() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let program = parse_program("1;").unwrap();
        let err = Evaluator::new(Extensions::new(), cancel)
            .run_program(&program, &Scope::global())
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Cancelled));
    }

    #[tokio::test]
    async fn standalone_expression() {
        let g = Scope::global();
        g.define("a", num(4)).unwrap();
        let expr = parse_expression("a * 2 + 1").unwrap();
        let v = Evaluator::new(Extensions::new(), CancelToken::new())
            .evaluate(&expr, &g)
            .await
            .unwrap();
        assert_eq!(v, num(9));
    }
}
