pub mod cli;
pub mod config;
pub mod script;

pub use script::{CancelToken, ExecutionResult, Interpreter, InterpreterConfig, ScriptError, Value};
