//! The Petal scripting language.
//!
//! A small imperative language embedded in a host application.  The host
//! registers values, functions and object graphs, runs a program against
//! them and reads back the result and the printed log.
//!
//! - [`lexer`]: regex rule tables, with a mode stack for template literals
//! - [`parser`]: recursive descent into the immutable [`ast`]
//! - [`reference`]: lexical scopes and read/write references
//! - [`value`]: runtime values, operators and extension members
//! - [`eval`]: async tree-walking evaluator with cooperative [`cancel`]lation
//! - [`proxy`]: typed adapters between host code and script values
//! - [`interp`]: the [`Interpreter`] facade the host talks to
//!
//! # Quick start
//!
//! ```rust
//! use petal::script::Interpreter;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let interp = Interpreter::new();
//! interp.register("base").number(40);
//! let result = interp.execute(r#"print($"adding to {base}"); base + 2"#).await;
//! assert_eq!(result.value().as_number(), Some(42.into()));
//! assert_eq!(interp.get_log(), "adding to 40\n");
//! # });
//! ```

pub mod ast;
pub mod builtins;
pub mod cancel;
pub mod error;
pub mod eval;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod proxy;
pub mod reference;
pub mod value;

// Re-exports for convenience.
pub use cancel::{CancelToken, DEFAULT_MAX_CALL_DEPTH};
pub use error::{Result, ScriptError};
pub use interp::{Interpreter, InterpreterConfig, ParseResult, ScriptLog};
pub use proxy::{
    ArgumentBuilder, CallContext, EnumerableMapContext, ExecutionResult, FunctionProxy,
    ObjectBuilder, ObjectReader, ProxyWriter, ValueReader,
};
pub use value::{Value, ValueKind};
