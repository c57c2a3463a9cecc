//! Petal abstract syntax tree.
//!
//! The tree is plain immutable data: statements and expressions are closed
//! enums, children are owned by their parent.  Function declarations sit
//! behind an [`Arc`] so a function value created at runtime can keep its body
//! alive after the [`Program`] that declared it is dropped.
//!
//! The [`fmt::Display`] impls print a tree back to source that re-parses to
//! an equal tree.  Nested binary, logical and assignment expressions are
//! always parenthesised so the printed form does not depend on precedence.

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;

// ── Operators ─────────────────────────────────────────────────────────────────

/// Binary operators, shared by the AST and the value model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    pub fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "&&" => BinaryOp::And,
            "||" => BinaryOp::Or,
            "??" => BinaryOp::Coalesce,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
            UnaryOp::Not => "!",
        }
    }
}

/// `=` or one of the compound forms `+= -= *= /=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    Assign,
    Compound(BinaryOp),
}

impl AssignOp {
    pub fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "=" => AssignOp::Assign,
            "+=" => AssignOp::Compound(BinaryOp::Add),
            "-=" => AssignOp::Compound(BinaryOp::Sub),
            "*=" => AssignOp::Compound(BinaryOp::Mul),
            "/=" => AssignOp::Compound(BinaryOp::Div),
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Compound(BinaryOp::Add) => "+=",
            AssignOp::Compound(BinaryOp::Sub) => "-=",
            AssignOp::Compound(BinaryOp::Mul) => "*=",
            AssignOp::Compound(BinaryOp::Div) => "/=",
            AssignOp::Compound(op) => op.symbol(),
        }
    }
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

/// Root of a parsed script.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expression(Expr),
    Block(Vec<Stmt>),
    Return(Option<Expr>),
    /// `let a = 1, b;`
    Variable(Vec<VariableDeclaration>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    Foreach {
        id: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Empty,
    Function(Arc<FunctionDeclaration>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    Variable(Vec<VariableDeclaration>),
    Expression(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    pub id: String,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub params: Vec<String>,
    /// Statements of the body block.
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal; `raw` is the token text (`12`, `23%`, `£4.99`).
    Number { raw: String, value: Decimal },
    String(String),
    Boolean(bool),
    Null,
    Template(Vec<TemplateSegment>),
    Identifier(String),
    Assignment {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// Arithmetic, relational and equality operators.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `&&`, `||` and `??`.
    Logical {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: Property,
        null_propagating: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    /// `a.name`
    Named(String),
    /// `a[expr]`
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSegment {
    Text(String),
    Expr(Expr),
}

impl Expr {
    /// Whether the expression may appear on the left of `=`.
    pub fn is_assignable(&self) -> bool {
        matches!(self, Expr::Identifier(_) | Expr::Member { .. })
    }

    /// Expressions that can be followed by `.x`, `[x]` or `(..)` without
    /// parentheses when printed.
    fn is_postfix_safe(&self) -> bool {
        matches!(
            self,
            Expr::Identifier(_)
                | Expr::Member { .. }
                | Expr::Call { .. }
                | Expr::String(_)
                | Expr::Template(_)
                | Expr::Boolean(_)
                | Expr::Null
        )
    }
}

// ── Printing ──────────────────────────────────────────────────────────────────

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stmt) in self.body.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{stmt}")?;
        }
        Ok(())
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, body: &[Stmt]) -> fmt::Result {
    f.write_str("{")?;
    for stmt in body {
        write!(f, " {stmt}")?;
    }
    f.write_str(" }")
}

fn write_declarations(f: &mut fmt::Formatter<'_>, decls: &[VariableDeclaration]) -> fmt::Result {
    f.write_str("let ")?;
    for (i, d) in decls.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(&d.id)?;
        if let Some(init) = &d.init {
            write!(f, " = {init}")?;
        }
    }
    Ok(())
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Expression(e) => write!(f, "{e};"),
            Stmt::Block(body) => write_block(f, body),
            Stmt::Return(None) => f.write_str("return;"),
            Stmt::Return(Some(e)) => write!(f, "return {e};"),
            Stmt::Variable(decls) => {
                write_declarations(f, decls)?;
                f.write_str(";")
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                write!(f, "if ({test}) {consequent}")?;
                if let Some(alt) = alternate {
                    write!(f, " else {alt}")?;
                }
                Ok(())
            }
            Stmt::While { test, body } => write!(f, "while ({test}) {body}"),
            Stmt::DoWhile { body, test } => write!(f, "do {body} while ({test});"),
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                f.write_str("for (")?;
                match init {
                    Some(ForInit::Variable(decls)) => write_declarations(f, decls)?,
                    Some(ForInit::Expression(e)) => write!(f, "{e}")?,
                    None => {}
                }
                f.write_str(";")?;
                if let Some(t) = test {
                    write!(f, " {t}")?;
                }
                f.write_str(";")?;
                if let Some(u) = update {
                    write!(f, " {u}")?;
                }
                write!(f, ") {body}")
            }
            Stmt::Foreach { id, iterable, body } => {
                write!(f, "foreach (let {id} in {iterable}) {body}")
            }
            Stmt::Empty => f.write_str(";"),
            Stmt::Function(decl) => {
                write!(f, "def {}({}) ", decl.name, decl.params.join(", "))?;
                write_block(f, &decl.body)
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, e: &Expr) -> fmt::Result {
    match e {
        Expr::Binary { .. } | Expr::Logical { .. } | Expr::Assignment { .. } => write!(f, "({e})"),
        _ => write!(f, "{e}"),
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    if s.contains('"') {
        write!(f, "'{s}'")
    } else {
        write!(f, "\"{s}\"")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number { raw, .. } => f.write_str(raw),
            Expr::String(s) => write_quoted(f, s),
            Expr::Boolean(b) => write!(f, "{b}"),
            Expr::Null => f.write_str("null"),
            Expr::Template(segments) => {
                f.write_str("$\"")?;
                for seg in segments {
                    match seg {
                        TemplateSegment::Text(t) => f.write_str(t)?,
                        TemplateSegment::Expr(e) => write!(f, "{{{e}}}")?,
                    }
                }
                f.write_str("\"")
            }
            Expr::Identifier(name) => f.write_str(name),
            Expr::Assignment { op, target, value } => {
                write!(f, "{target} {} ", op.symbol())?;
                write_operand(f, value)
            }
            Expr::Binary { op, left, right } | Expr::Logical { op, left, right } => {
                write_operand(f, left)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right)
            }
            Expr::Unary { op, operand } => {
                f.write_str(op.symbol())?;
                match operand.as_ref() {
                    Expr::Identifier(_) | Expr::Member { .. } | Expr::Call { .. } => {
                        write!(f, "{operand}")
                    }
                    _ => write!(f, "({operand})"),
                }
            }
            Expr::Member {
                object,
                property,
                null_propagating,
            } => {
                if object.is_postfix_safe() {
                    write!(f, "{object}")?;
                } else {
                    write!(f, "({object})")?;
                }
                match (property, null_propagating) {
                    (Property::Named(name), false) => write!(f, ".{name}"),
                    (Property::Named(name), true) => write!(f, "?.{name}"),
                    (Property::Computed(key), false) => write!(f, "[{key}]"),
                    (Property::Computed(key), true) => write!(f, "?.[{key}]"),
                }
            }
            Expr::Call { callee, args } => {
                if callee.is_postfix_safe() {
                    write!(f, "{callee}(")?;
                } else {
                    write!(f, "({callee})(")?;
                }
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
