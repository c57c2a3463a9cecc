//! Petal lexer.
//!
//! Tokens are produced on demand by matching an ordered table of anchored
//! regular expressions against the unread input; the first matching rule
//! wins, so keywords are listed before the generic identifier rule.  Rules
//! with no token kind (whitespace, comments) are consumed silently.
//!
//! A mode stack selects the active table.  `$"` pushes template mode, where
//! only raw text, `{` and the closing `"` are recognised; `{` pushes normal
//! mode for the embedded expression, and the matching `}` / `"` pop.

use std::sync::LazyLock;

use regex::Regex;

use super::error::{Result, ScriptError};

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Symbols, delimiters
    Semicolon,
    OpenCurly,
    CloseCurly,
    OpenParen,
    CloseParen,
    Comma,
    Dot,
    OpenSquare,
    CloseSquare,
    NullPropagator,

    // Keywords
    Let,
    If,
    Else,
    True,
    False,
    Null,
    While,
    Do,
    For,
    Foreach,
    In,
    Def,
    Return,

    // Literals
    Number,
    String,

    // Template literals
    OpenTemplate,
    CloseTemplate,
    PartialString,

    // Operators
    Additive,
    Multiplicative,
    Relational,
    Equality,
    LogicalAnd,
    LogicalOr,
    LogicalNot,
    NullCoalescing,
    SimpleAssign,
    ComplexAssign,

    Identifier,
}

impl TokenKind {
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            TokenKind::Number
                | TokenKind::String
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
        )
    }

    pub fn is_assignment(self) -> bool {
        matches!(self, TokenKind::SimpleAssign | TokenKind::ComplexAssign)
    }
}

/// A lexeme with its byte span in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

// ── Rule tables ───────────────────────────────────────────────────────────────

type Rule = (Regex, Option<TokenKind>);

fn rules(spec: &[(&str, Option<TokenKind>)]) -> Vec<Rule> {
    spec.iter()
        .map(|(pattern, kind)| {
            // Patterns are literals in this file; a failure here is a programming error.
            let re = Regex::new(&format!("^(?:{pattern})")).expect("invalid lexer rule");
            (re, *kind)
        })
        .collect()
}

static NORMAL_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use TokenKind::*;
    rules(&[
        // Whitespace and comments
        (r"\s+", None),
        (r"/\*[\s\S]*?\*/", None),
        (r"//[^\n]*", None),
        // Symbols, delimiters
        (r";", Some(Semicolon)),
        (r"\{", Some(OpenCurly)),
        (r"\}", Some(CloseCurly)),
        (r"\(", Some(OpenParen)),
        (r"\)", Some(CloseParen)),
        (r",", Some(Comma)),
        (r"\?\.", Some(NullPropagator)),
        (r"\.", Some(Dot)),
        (r"\[", Some(OpenSquare)),
        (r"\]", Some(CloseSquare)),
        (r#"\$""#, Some(OpenTemplate)),
        // Keywords
        (r"let\b", Some(Let)),
        (r"if\b", Some(If)),
        (r"else\b", Some(Else)),
        (r"true\b", Some(True)),
        (r"false\b", Some(False)),
        (r"null\b", Some(Null)),
        (r"while\b", Some(While)),
        (r"do\b", Some(Do)),
        (r"foreach\b", Some(Foreach)),
        (r"for\b", Some(For)),
        (r"in\b", Some(In)),
        (r"def\b", Some(Def)),
        (r"return\b", Some(Return)),
        // Literals
        (r"\d+(?:\.\d+)?%", Some(Number)),
        (r"£\d+(?:\.\d+)?", Some(Number)),
        (r"\d+(?:\.\d+)?", Some(Number)),
        (r#""[^"]*""#, Some(String)),
        (r"'[^']*'", Some(String)),
        // Relational, equality
        (r"[<>]=?", Some(Relational)),
        (r"[!=]=", Some(Equality)),
        // Logical
        (r"\?\?", Some(NullCoalescing)),
        (r"&&", Some(LogicalAnd)),
        (r"\|\|", Some(LogicalOr)),
        (r"!", Some(LogicalNot)),
        // Assignment
        (r"=", Some(SimpleAssign)),
        (r"[*/+\-]=", Some(ComplexAssign)),
        // Arithmetic
        (r"[+\-]", Some(Additive)),
        (r"[*/]", Some(Multiplicative)),
        // Identifiers
        (r"\w+", Some(Identifier)),
    ])
});

static TEMPLATE_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use TokenKind::*;
    rules(&[
        (r"\{", Some(OpenCurly)),
        (r#"""#, Some(CloseTemplate)),
        (r#"[^"{]+"#, Some(PartialString)),
    ])
});

// ── Lexer ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Template,
}

/// Lazy tokenizer over a source string.
#[derive(Debug)]
pub struct Lexer<'a> {
    src: &'a str,
    cursor: usize,
    modes: Vec<Mode>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            cursor: 0,
            modes: vec![Mode::Normal],
        }
    }

    /// Restart scanning over a new source text.
    pub fn init(&mut self, src: &'a str) {
        self.src = src;
        self.cursor = 0;
        self.modes.clear();
        self.modes.push(Mode::Normal);
    }

    /// Current byte offset into the source.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn in_template(&self) -> bool {
        self.mode() == Mode::Template
    }

    fn mode(&self) -> Mode {
        self.modes.last().copied().unwrap_or(Mode::Normal)
    }

    /// Produce the next token, `Ok(None)` once the input is exhausted.
    pub fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            if self.cursor >= self.src.len() {
                return Ok(None);
            }
            let rest = &self.src[self.cursor..];
            let table: &[Rule] = match self.mode() {
                Mode::Normal => &NORMAL_RULES,
                Mode::Template => &TEMPLATE_RULES,
            };

            let matched = table
                .iter()
                .find_map(|(re, kind)| re.find(rest).map(|m| (m.end(), *kind)));

            let Some((len, kind)) = matched else {
                let ch = rest.chars().next().unwrap_or_default();
                return Err(ScriptError::syntax(
                    format!("Unexpected token: \"{ch}\""),
                    self.cursor,
                ));
            };

            let start = self.cursor;
            self.cursor += len;

            let Some(kind) = kind else { continue };
            match kind {
                TokenKind::OpenCurly => self.modes.push(Mode::Normal),
                TokenKind::OpenTemplate => self.modes.push(Mode::Template),
                TokenKind::CloseCurly | TokenKind::CloseTemplate => {
                    if self.modes.len() > 1 {
                        self.modes.pop();
                    }
                }
                _ => {}
            }
            return Ok(Some(Token {
                kind,
                text: rest[..len].to_owned(),
                start,
                end: self.cursor,
            }));
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
