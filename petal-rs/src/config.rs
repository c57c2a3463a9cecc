//! `petal.conf` configuration file parser.
//!
//! One directive per line:
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `timeout = <seconds>` | default execution timeout (fractions allowed) |
//! | `builtins = on\|off` | install the builtin globals |
//! | `let <name> = <literal>` | pre-register a global number, string, boolean or null |
//! | Lines starting with `;` or `#` | comment, ignored |
//!
//! Errors are collected per line rather than aborting the load, so a file
//! with one bad line still yields every good setting.

use std::path::Path;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::script::ast::{Expr, UnaryOp};
use crate::script::parser::parse_expression;
use crate::script::{Interpreter, InterpreterConfig, Value};

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Parsed settings.  `None` means "not mentioned", so defaults survive.
#[derive(Debug, Default)]
pub struct Config {
    pub timeout: Option<Duration>,
    pub builtins: Option<bool>,
    /// Globals in file order; a later line wins on a repeated name.
    pub globals: Vec<(String, Value)>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string, returning the config and any line errors.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Err(message) = config.apply_line(line) {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Overlay these settings onto `base`.
    pub fn interpreter_config(&self, base: InterpreterConfig) -> InterpreterConfig {
        InterpreterConfig {
            timeout: self.timeout.unwrap_or(base.timeout),
            install_builtins: self.builtins.unwrap_or(base.install_builtins),
            ..base
        }
    }

    /// Register every `let` global with `interp`.
    pub fn install(&self, interp: &Interpreter) {
        for (name, value) in &self.globals {
            interp.register(name).value(value.clone());
        }
    }

    fn apply_line(&mut self, line: &str) -> Result<(), String> {
        if let Some(rest) = line.strip_prefix("let") {
            if rest.starts_with(|c: char| c.is_ascii_whitespace()) {
                return self.apply_let(rest.trim());
            }
        }

        let (key, value) = split_assignment(line)?;
        match key {
            "timeout" => self.timeout = Some(parse_timeout(value)?),
            "builtins" => self.builtins = Some(parse_switch(value)?),
            other => return Err(format!("unknown setting \"{other}\"")),
        }
        Ok(())
    }

    fn apply_let(&mut self, rest: &str) -> Result<(), String> {
        let (name, literal) = split_assignment(rest)?;
        if !is_identifier(name) {
            return Err(format!("invalid global name \"{name}\""));
        }
        let value = parse_literal(literal)?;
        self.globals.retain(|(existing, _)| existing != name);
        self.globals.push((name.to_owned(), value));
        Ok(())
    }
}

// ── Value parsers ─────────────────────────────────────────────────────────────

fn split_assignment(line: &str) -> Result<(&str, &str), String> {
    let (key, value) = line
        .split_once('=')
        .ok_or_else(|| format!("expected \"<name> = <value>\", got \"{line}\""))?;
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() {
        return Err("missing setting name".to_owned());
    }
    if value.is_empty() {
        return Err(format!("missing value for \"{key}\""));
    }
    Ok((key, value))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let secs: Decimal = value
        .parse()
        .map_err(|_| format!("invalid timeout \"{value}\""))?;
    secs.to_f64()
        .filter(|s| *s > 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .ok_or_else(|| format!("timeout must be a positive number of seconds, got \"{value}\""))
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(format!("expected on or off, got \"{value}\"")),
    }
}

/// A literal in script syntax: number (with `%`/`£` forms), quoted string,
/// `true`, `false` or `null`.
fn parse_literal(text: &str) -> Result<Value, String> {
    let expr = parse_expression(text).map_err(|e| e.to_string())?;
    match expr {
        Expr::Number { value, .. } => Ok(Value::Number(value)),
        Expr::Unary {
            op: UnaryOp::Minus,
            operand,
        } => match *operand {
            Expr::Number { value, .. } => Ok(Value::Number(-value)),
            _ => Err(format!("not a literal: \"{text}\"")),
        },
        Expr::String(s) => Ok(Value::String(s)),
        Expr::Boolean(b) => Ok(Value::Boolean(b)),
        Expr::Null => Ok(Value::Null),
        _ => Err(format!("not a literal: \"{text}\"")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_and_comments() {
        let (cfg, errs) = Config::load_str("\n; comment\n# another\n   \n");
        assert!(errs.is_empty(), "{errs:?}");
        assert!(cfg.timeout.is_none());
        assert!(cfg.builtins.is_none());
        assert!(cfg.globals.is_empty());
    }

    #[test]
    fn timeout_and_builtins() {
        let (cfg, errs) = Config::load_str("timeout = 2.5\nbuiltins = off");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(cfg.builtins, Some(false));
    }

    #[test]
    fn bad_timeout_is_reported_with_line() {
        let (cfg, errs) = Config::load_str("builtins = on\ntimeout = soon\ntimeout = -1");
        assert_eq!(errs.len(), 2);
        assert_eq!(errs[0].line, 2);
        assert_eq!(errs[1].line, 3);
        assert_eq!(cfg.builtins, Some(true));
        assert!(cfg.timeout.is_none());
    }

    #[test]
    fn let_literals() {
        let src = "let rate = 15%\nlet name = 'Ada'\nlet on = true\nlet debt = -£4.50\nlet nothing = null";
        let (cfg, errs) = Config::load_str(src);
        assert!(errs.is_empty(), "{errs:?}");
        let get = |n: &str| {
            cfg.globals
                .iter()
                .find(|(k, _)| k == n)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("rate"), Value::Number(Decimal::new(15, 2)));
        assert_eq!(get("name"), Value::from("Ada"));
        assert_eq!(get("on"), Value::Boolean(true));
        assert_eq!(get("debt"), Value::Number(Decimal::new(-450, 2)));
        assert_eq!(get("nothing"), Value::Null);
    }

    #[test]
    fn repeated_let_keeps_the_last() {
        let (cfg, errs) = Config::load_str("let x = 1\nlet x = 2");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.globals.len(), 1);
        assert_eq!(cfg.globals[0].1, Value::from(2));
    }

    #[test]
    fn let_rejects_expressions_and_bad_names() {
        let (_, errs) = Config::load_str("let x = 1 + 2\nlet 9x = 1\nlet y");
        assert_eq!(errs.iter().map(|e| e.line).collect::<Vec<_>>(), [1, 2, 3]);
    }

    #[test]
    fn unknown_setting_is_not_fatal() {
        let (cfg, errs) = Config::load_str("colour = blue\ntimeout = 1");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("colour"));
        assert_eq!(cfg.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn overlay_onto_defaults() {
        let (cfg, _) = Config::load_str("builtins = off");
        let ic = cfg.interpreter_config(InterpreterConfig::default());
        assert_eq!(ic.timeout, Duration::from_secs(30));
        assert!(!ic.install_builtins);
    }

    #[tokio::test]
    async fn install_registers_globals() {
        let (cfg, _) = Config::load_str("let base = 40");
        let interp = Interpreter::new();
        cfg.install(&interp);
        let r = interp.execute("base + 2").await;
        assert_eq!(r.value().as_number(), Some(Decimal::from(42)));
    }

    #[test]
    fn load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "timeout = 3").unwrap();
        let (cfg, errs) = Config::load_file(f.path()).unwrap();
        assert!(errs.is_empty());
        assert_eq!(cfg.timeout, Some(Duration::from_secs(3)));
    }
}
