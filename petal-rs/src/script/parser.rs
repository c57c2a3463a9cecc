//! Recursive-descent parser for Petal.
//!
//! One token of lookahead, no backtracking.  Operator precedence
//! (lowest → highest):
//!   assignment  →  `??`  →  `||`  →  `&&`  →  equality  →  relational  →
//!   additive  →  multiplicative  →  unary  →  call/member  →  primary
//!
//! Every binary level is left-associative; assignment is right-associative
//! and only accepts an identifier or member expression on its left.
//!
//! A statement terminator may be left out at end of input or directly before
//! a closing `}`: the parser synthesizes the `;` in those two places only.
//!
//! Nesting is bounded so hostile input fails with a Syntax error rather than
//! overflowing the stack, here or later in the evaluator.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;

use super::ast::{
    AssignOp, BinaryOp, Expr, ForInit, FunctionDeclaration, Program, Property, Stmt,
    TemplateSegment, UnaryOp, VariableDeclaration,
};
use super::error::{Result, ScriptError};
use super::lexer::{Lexer, Token, TokenKind};

/// Parse a complete program.
pub fn parse_program(src: &str) -> Result<Program> {
    Parser::new(src)?.program()
}

/// Parse a single expression (an optional trailing `;` is allowed).
pub fn parse_expression(src: &str) -> Result<Expr> {
    let mut parser = Parser::new(src)?;
    let expr = parser.expression()?;
    if parser.peek_kind() == Some(TokenKind::Semicolon) {
        parser.eat(TokenKind::Semicolon)?;
    }
    match &parser.lookahead {
        None => Ok(expr),
        Some(tok) => Err(parser.error(format!("Unexpected token \"{}\" after expression", tok.text))),
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Statements, sub-expressions, unary operators and member/call links that
/// may be open at once.
const MAX_NESTING: usize = 80;

/// Binary operators one expression may chain.
const MAX_CHAIN: usize = 1000;

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Option<Token>,
    depth: usize,
    chain: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self> {
        let mut lexer = Lexer::new(src);
        let lookahead = lexer.next_token()?;
        Ok(Parser {
            lexer,
            lookahead,
            depth: 0,
            chain: 0,
        })
    }

    fn too_deep(&self) -> ScriptError {
        self.error("Expression nested too deeply")
    }

    /// Open one nesting level, failing past [`MAX_NESTING`].
    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.too_deep());
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.enter()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Count one more binary operator in the current chain.
    fn link(&mut self) -> Result<()> {
        if self.chain >= MAX_CHAIN {
            return Err(self.too_deep());
        }
        self.chain += 1;
        Ok(())
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.lookahead.as_ref().map(|t| t.kind)
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        let position = self
            .lookahead
            .as_ref()
            .map_or(self.lexer.position(), |t| t.start);
        ScriptError::syntax(message, position)
    }

    /// Consume the lookahead, which must be of `kind`.
    fn eat(&mut self, kind: TokenKind) -> Result<Token> {
        match self.lookahead.take() {
            None => Err(self.error(format!("Unexpected end of input, expected: {kind:?}"))),
            Some(tok) if tok.kind != kind => {
                let message = format!("Unexpected token \"{}\", expected: {kind:?}", tok.text);
                self.lookahead = Some(tok);
                Err(self.error(message))
            }
            Some(tok) => {
                self.lookahead = self.lexer.next_token()?;
                Ok(tok)
            }
        }
    }

    /// Consume a statement-terminating `;`, synthesizing one at end of input
    /// or before a closing `}`.
    fn eat_terminator(&mut self) -> Result<()> {
        match self.peek_kind() {
            None | Some(TokenKind::CloseCurly) => Ok(()),
            _ => self.eat(TokenKind::Semicolon).map(drop),
        }
    }

    // ── Statements ────────────────────────────────────────────────────────────

    fn program(&mut self) -> Result<Program> {
        Ok(Program {
            body: self.statement_list(None)?,
        })
    }

    fn statement_list(&mut self, stop: Option<TokenKind>) -> Result<Vec<Stmt>> {
        let mut list = Vec::new();
        while self.peek_kind() != stop {
            list.push(self.statement()?);
        }
        Ok(list)
    }

    fn statement(&mut self) -> Result<Stmt> {
        self.nested(Self::statement_body)
    }

    fn statement_body(&mut self) -> Result<Stmt> {
        let Some(kind) = self.peek_kind() else {
            return Err(self.error("Unexpected end of input: expected a statement."));
        };
        match kind {
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Do => self.do_while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Foreach => self.foreach_statement(),
            TokenKind::Def => self.function_declaration(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Let => self.variable_statement(),
            TokenKind::Semicolon => {
                self.eat(TokenKind::Semicolon)?;
                Ok(Stmt::Empty)
            }
            TokenKind::OpenCurly => Ok(Stmt::Block(self.block()?)),
            _ => {
                let expr = self.expression()?;
                self.eat_terminator()?;
                Ok(Stmt::Expression(expr))
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.eat(TokenKind::OpenCurly)?;
        let body = self.statement_list(Some(TokenKind::CloseCurly))?;
        self.eat(TokenKind::CloseCurly)?;
        Ok(body)
    }

    fn function_declaration(&mut self) -> Result<Stmt> {
        self.eat(TokenKind::Def)?;
        let name = self.identifier()?;
        self.eat(TokenKind::OpenParen)?;
        let mut params = Vec::new();
        if self.peek_kind() != Some(TokenKind::CloseParen) {
            params.push(self.identifier()?);
            while self.peek_kind() == Some(TokenKind::Comma) {
                self.eat(TokenKind::Comma)?;
                params.push(self.identifier()?);
            }
        }
        self.eat(TokenKind::CloseParen)?;
        let body = self.block()?;
        Ok(Stmt::Function(Arc::new(FunctionDeclaration { name, params, body })))
    }

    fn return_statement(&mut self) -> Result<Stmt> {
        self.eat(TokenKind::Return)?;
        let argument = match self.peek_kind() {
            None | Some(TokenKind::Semicolon) | Some(TokenKind::CloseCurly) => None,
            _ => Some(self.expression()?),
        };
        self.eat_terminator()?;
        Ok(Stmt::Return(argument))
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        self.eat(TokenKind::If)?;
        let test = self.parenthesised()?;
        let consequent = Box::new(self.statement()?);
        let alternate = if self.peek_kind() == Some(TokenKind::Else) {
            self.eat(TokenKind::Else)?;
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt> {
        self.eat(TokenKind::While)?;
        let test = self.parenthesised()?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While { test, body })
    }

    fn do_while_statement(&mut self) -> Result<Stmt> {
        self.eat(TokenKind::Do)?;
        let body = Box::new(self.statement()?);
        self.eat(TokenKind::While)?;
        let test = self.parenthesised()?;
        self.eat_terminator()?;
        Ok(Stmt::DoWhile { body, test })
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        self.eat(TokenKind::For)?;
        self.eat(TokenKind::OpenParen)?;

        let init = match self.peek_kind() {
            Some(TokenKind::Semicolon) => None,
            Some(TokenKind::Let) => {
                self.eat(TokenKind::Let)?;
                Some(ForInit::Variable(self.variable_declarations()?))
            }
            _ => Some(ForInit::Expression(self.expression()?)),
        };
        self.eat(TokenKind::Semicolon)?;

        let test = match self.peek_kind() {
            Some(TokenKind::Semicolon) => None,
            _ => Some(self.expression()?),
        };
        self.eat(TokenKind::Semicolon)?;

        let update = match self.peek_kind() {
            Some(TokenKind::CloseParen) => None,
            _ => Some(self.expression()?),
        };
        self.eat(TokenKind::CloseParen)?;

        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn foreach_statement(&mut self) -> Result<Stmt> {
        self.eat(TokenKind::Foreach)?;
        self.eat(TokenKind::OpenParen)?;
        self.eat(TokenKind::Let)?;
        let id = self.identifier()?;
        self.eat(TokenKind::In)?;
        let iterable = self.expression()?;
        self.eat(TokenKind::CloseParen)?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::Foreach { id, iterable, body })
    }

    fn variable_statement(&mut self) -> Result<Stmt> {
        self.eat(TokenKind::Let)?;
        let decls = self.variable_declarations()?;
        self.eat_terminator()?;
        Ok(Stmt::Variable(decls))
    }

    fn variable_declarations(&mut self) -> Result<Vec<VariableDeclaration>> {
        let mut decls = vec![self.variable_declaration()?];
        while self.peek_kind() == Some(TokenKind::Comma) {
            self.eat(TokenKind::Comma)?;
            decls.push(self.variable_declaration()?);
        }
        Ok(decls)
    }

    fn variable_declaration(&mut self) -> Result<VariableDeclaration> {
        let id = self.identifier()?;
        let init = if self.peek_kind() == Some(TokenKind::SimpleAssign) {
            self.eat(TokenKind::SimpleAssign)?;
            Some(self.assignment_expression()?)
        } else {
            None
        };
        Ok(VariableDeclaration { id, init })
    }

    fn parenthesised(&mut self) -> Result<Expr> {
        self.eat(TokenKind::OpenParen)?;
        let expr = self.expression()?;
        self.eat(TokenKind::CloseParen)?;
        Ok(expr)
    }

    fn identifier(&mut self) -> Result<String> {
        Ok(self.eat(TokenKind::Identifier)?.text)
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    fn expression(&mut self) -> Result<Expr> {
        if self.lookahead.is_none() {
            return Err(self.error("Unexpected end of input: expected an expression."));
        }
        self.assignment_expression()
    }

    fn assignment_expression(&mut self) -> Result<Expr> {
        self.nested(Self::assignment_body)
    }

    fn assignment_body(&mut self) -> Result<Expr> {
        let left = self.logical(TokenKind::NullCoalescing)?;

        let Some(kind) = self.peek_kind().filter(|k| k.is_assignment()) else {
            return Ok(left);
        };
        if !left.is_assignable() {
            return Err(self.error("Invalid left-hand side in assignment expression"));
        }
        let tok = self.eat(kind)?;
        let op = AssignOp::from_symbol(&tok.text)
            .ok_or_else(|| ScriptError::syntax(format!("Unknown operator \"{}\"", tok.text), tok.start))?;
        let value = self.assignment_expression()?;
        Ok(Expr::Assignment {
            op,
            target: Box::new(left),
            value: Box::new(value),
        })
    }

    /// `??` → `||` → `&&`, each left-associative.
    fn logical(&mut self, level: TokenKind) -> Result<Expr> {
        let next = |p: &mut Self| match level {
            TokenKind::NullCoalescing => p.logical(TokenKind::LogicalOr),
            TokenKind::LogicalOr => p.logical(TokenKind::LogicalAnd),
            _ => p.binary(TokenKind::Equality),
        };
        let mut left = next(self)?;
        let outer = self.chain;
        while self.peek_kind() == Some(level) {
            self.link()?;
            let op = self.operator(level)?;
            let right = next(self)?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.chain = outer;
        Ok(left)
    }

    /// equality → relational → additive → multiplicative, each left-associative.
    fn binary(&mut self, level: TokenKind) -> Result<Expr> {
        let next = |p: &mut Self| match level {
            TokenKind::Equality => p.binary(TokenKind::Relational),
            TokenKind::Relational => p.binary(TokenKind::Additive),
            TokenKind::Additive => p.binary(TokenKind::Multiplicative),
            _ => p.unary(),
        };
        let mut left = next(self)?;
        let outer = self.chain;
        while self.peek_kind() == Some(level) {
            self.link()?;
            let op = self.operator(level)?;
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.chain = outer;
        Ok(left)
    }

    fn operator(&mut self, kind: TokenKind) -> Result<BinaryOp> {
        let tok = self.eat(kind)?;
        BinaryOp::from_symbol(&tok.text)
            .ok_or_else(|| ScriptError::syntax(format!("Unknown operator \"{}\"", tok.text), tok.start))
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.lookahead.as_ref() {
            Some(t) if t.kind == TokenKind::Additive && t.text == "-" => UnaryOp::Minus,
            Some(t) if t.kind == TokenKind::Additive => UnaryOp::Plus,
            Some(t) if t.kind == TokenKind::LogicalNot => UnaryOp::Not,
            _ => return self.call_member_expression(),
        };
        self.lookahead = self.lexer.next_token()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(self.nested(Self::unary)?),
        })
    }

    /// Primary expression followed by any chain of `.x`, `?.x`, `[k]`,
    /// `?.[k]` and `(args)`.
    fn call_member_expression(&mut self) -> Result<Expr> {
        let outer = self.depth;
        let result = self.call_member_chain();
        self.depth = outer;
        result
    }

    /// Each link nests the expression one level, so each one counts.
    fn call_member_chain(&mut self) -> Result<Expr> {
        let mut expr = self.primary_expression()?;
        loop {
            if matches!(
                self.peek_kind(),
                Some(TokenKind::Dot | TokenKind::NullPropagator | TokenKind::OpenSquare | TokenKind::OpenParen)
            ) {
                self.enter()?;
            }
            expr = match self.peek_kind() {
                Some(TokenKind::Dot) => {
                    self.eat(TokenKind::Dot)?;
                    let name = self.identifier()?;
                    member(expr, Property::Named(name), false)
                }
                Some(TokenKind::NullPropagator) => {
                    self.eat(TokenKind::NullPropagator)?;
                    if self.peek_kind() == Some(TokenKind::OpenSquare) {
                        let key = self.computed_key()?;
                        member(expr, key, true)
                    } else {
                        let name = self.identifier()?;
                        member(expr, Property::Named(name), true)
                    }
                }
                Some(TokenKind::OpenSquare) => {
                    let key = self.computed_key()?;
                    member(expr, key, false)
                }
                Some(TokenKind::OpenParen) => Expr::Call {
                    callee: Box::new(expr),
                    args: self.arguments()?,
                },
                _ => return Ok(expr),
            };
        }
    }

    fn computed_key(&mut self) -> Result<Property> {
        self.eat(TokenKind::OpenSquare)?;
        let key = self.expression()?;
        self.eat(TokenKind::CloseSquare)?;
        Ok(Property::Computed(Box::new(key)))
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        self.eat(TokenKind::OpenParen)?;
        let mut args = Vec::new();
        if self.peek_kind() != Some(TokenKind::CloseParen) {
            args.push(self.assignment_expression()?);
            while self.peek_kind() == Some(TokenKind::Comma) {
                self.eat(TokenKind::Comma)?;
                args.push(self.assignment_expression()?);
            }
        }
        self.eat(TokenKind::CloseParen)?;
        Ok(args)
    }

    fn primary_expression(&mut self) -> Result<Expr> {
        let Some(tok) = self.lookahead.as_ref() else {
            return Err(self.error("Unexpected end of input: expected an expression."));
        };
        if tok.kind.is_literal() {
            return self.literal();
        }
        match tok.kind {
            TokenKind::OpenTemplate => self.template_literal(),
            TokenKind::OpenParen => self.parenthesised(),
            TokenKind::Identifier => Ok(Expr::Identifier(self.identifier()?)),
            _ => {
                let message = format!("Invalid expression \"{}\"", tok.text);
                Err(self.error(message))
            }
        }
    }

    fn template_literal(&mut self) -> Result<Expr> {
        self.eat(TokenKind::OpenTemplate)?;
        let mut segments = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::CloseTemplate) => break,
                Some(TokenKind::PartialString) => {
                    segments.push(TemplateSegment::Text(self.eat(TokenKind::PartialString)?.text));
                }
                Some(TokenKind::OpenCurly) => {
                    self.eat(TokenKind::OpenCurly)?;
                    let expr = self.expression()?;
                    self.eat(TokenKind::CloseCurly)?;
                    segments.push(TemplateSegment::Expr(expr));
                }
                None => return Err(self.error("Unexpected end of input: unterminated template literal")),
                Some(_) => return Err(self.error("Invalid template literal")),
            }
        }
        self.eat(TokenKind::CloseTemplate)?;
        Ok(Expr::Template(segments))
    }

    fn literal(&mut self) -> Result<Expr> {
        let Some(kind) = self.peek_kind() else {
            return Err(self.error("Literal: unexpected end of input"));
        };
        let tok = self.eat(kind)?;
        Ok(match kind {
            TokenKind::Number => numeric_literal(tok)?,
            // Quotes are single ASCII bytes.
            TokenKind::String => Expr::String(tok.text[1..tok.text.len() - 1].to_owned()),
            TokenKind::True => Expr::Boolean(true),
            TokenKind::False => Expr::Boolean(false),
            TokenKind::Null => Expr::Null,
            _ => return Err(ScriptError::syntax("Literal: unexpected literal production", tok.start)),
        })
    }
}

fn member(object: Expr, property: Property, null_propagating: bool) -> Expr {
    Expr::Member {
        object: Box::new(object),
        property,
        null_propagating,
    }
}

/// Fold the `£` prefix and `%` suffix into the literal's value.
fn numeric_literal(tok: Token) -> Result<Expr> {
    let parse = |s: &str| {
        Decimal::from_str(s)
            .map_err(|e| ScriptError::syntax(format!("Invalid number \"{}\": {e}", tok.text), tok.start))
    };
    let value = if let Some(amount) = tok.text.strip_prefix('£') {
        parse(amount)?
    } else if let Some(percent) = tok.text.strip_suffix('%') {
        parse(percent)? / Decimal::ONE_HUNDRED
    } else {
        parse(&tok.text)?
    };
    Ok(Expr::Number {
        raw: tok.text,
        value,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn num(raw: &str, value: i64) -> Expr {
        Expr::Number {
            raw: raw.into(),
            value: Decimal::from(value),
        }
    }

    fn ident(name: &str) -> Expr {
        Expr::Identifier(name.into())
    }

    fn bin(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn single_expr(src: &str) -> Expr {
        let program = parse_program(src).expect("parse failed");
        match program.body.as_slice() {
            [Stmt::Expression(e)] => e.clone(),
            other => panic!("expected one expression statement, got {other:?}"),
        }
    }

    #[test]
    fn literals() {
        let p = parse_program(r#"12;"p";'q';true;null;"#).unwrap();
        assert_eq!(
            p.body,
            vec![
                Stmt::Expression(num("12", 12)),
                Stmt::Expression(Expr::String("p".into())),
                Stmt::Expression(Expr::String("q".into())),
                Stmt::Expression(Expr::Boolean(true)),
                Stmt::Expression(Expr::Null),
            ]
        );
    }

    #[test]
    fn nested_blocks_and_empty_statements() {
        let p = parse_program(r#"{ 42; { "hello"; } ; ; }"#).unwrap();
        assert_eq!(
            p.body,
            vec![Stmt::Block(vec![
                Stmt::Expression(num("42", 42)),
                Stmt::Block(vec![Stmt::Expression(Expr::String("hello".into()))]),
                Stmt::Empty,
                Stmt::Empty,
            ])]
        );
    }

    #[test]
    fn multiplication_binds_tighter() {
        assert_eq!(
            single_expr("12 + 16 * 2;"),
            bin(BinaryOp::Add, num("12", 12), bin(BinaryOp::Mul, num("16", 16), num("2", 2)))
        );
    }

    #[test]
    fn additive_is_left_associative() {
        assert_eq!(
            single_expr("12 + 16 + 2;"),
            bin(BinaryOp::Add, bin(BinaryOp::Add, num("12", 12), num("16", 16)), num("2", 2))
        );
    }

    #[test]
    fn parentheses_override_precedence() {
        assert_eq!(
            single_expr("(12 + 16) * 2;"),
            bin(BinaryOp::Mul, bin(BinaryOp::Add, num("12", 12), num("16", 16)), num("2", 2))
        );
    }

    #[test]
    fn assignment_is_right_associative() {
        let e = single_expr("x = y = 1;");
        let Expr::Assignment { target, value, .. } = e else { panic!("not an assignment") };
        assert_eq!(*target, ident("x"));
        assert!(matches!(*value, Expr::Assignment { .. }));
    }

    #[test]
    fn invalid_assignment_target() {
        let err = parse_program("1 = 2;").unwrap_err();
        assert!(err.to_string().starts_with("Invalid left-hand side"), "{err}");
    }

    #[test]
    fn logical_precedence() {
        let e = single_expr("a ?? b || c && d;");
        let Expr::Logical { op, right, .. } = e else { panic!("not logical") };
        assert_eq!(op, BinaryOp::Coalesce);
        let Expr::Logical { op, right, .. } = *right else { panic!("not logical") };
        assert_eq!(op, BinaryOp::Or);
        assert!(matches!(*right, Expr::Logical { op: BinaryOp::And, .. }));
    }

    #[test]
    fn relational_below_equality() {
        let e = single_expr("1 < 2 == true;");
        assert!(matches!(e, Expr::Binary { op: BinaryOp::Eq, .. }));
    }

    #[test]
    fn unary_chains() {
        assert_eq!(
            single_expr("-!x;"),
            Expr::Unary {
                op: UnaryOp::Minus,
                operand: Box::new(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(ident("x")),
                }),
            }
        );
    }

    #[test]
    fn percent_and_currency_literals() {
        assert_eq!(
            single_expr("23%;"),
            Expr::Number {
                raw: "23%".into(),
                value: Decimal::new(23, 2),
            }
        );
        assert_eq!(
            single_expr("£4.99;"),
            Expr::Number {
                raw: "£4.99".into(),
                value: Decimal::new(499, 2),
            }
        );
    }

    #[test]
    fn call_member_chains() {
        let e = single_expr(r#"a["k"].c(1)(2)?.d;"#);
        let Expr::Member { object, null_propagating, .. } = e else { panic!("not member") };
        assert!(null_propagating);
        let Expr::Call { callee, args } = *object else { panic!("not call") };
        assert_eq!(args, vec![num("2", 2)]);
        assert!(matches!(*callee, Expr::Call { .. }));
    }

    #[test]
    fn computed_null_propagation() {
        let e = single_expr("a?.[k];");
        assert_eq!(
            e,
            Expr::Member {
                object: Box::new(ident("a")),
                property: Property::Computed(Box::new(ident("k"))),
                null_propagating: true,
            }
        );
    }

    #[test]
    fn template_literal_segments() {
        assert_eq!(
            single_expr(r#"$"Hello {$"foo {getWorld()}"}";"#),
            Expr::Template(vec![
                TemplateSegment::Text("Hello ".into()),
                TemplateSegment::Expr(Expr::Template(vec![
                    TemplateSegment::Text("foo ".into()),
                    TemplateSegment::Expr(Expr::Call {
                        callee: Box::new(ident("getWorld")),
                        args: vec![],
                    }),
                ])),
            ])
        );
    }

    #[test]
    fn statements() {
        let p = parse_program(
            "let a = 1, b; def f(x, y) { return x; } if (a) b = 2; else { b = 3; } \
             while (a < 3) a += 1; do a -= 1; while (a > 0); \
             for (let i = 0; i < 2; i += 1) ; foreach (let it in items) print(it);",
        )
        .unwrap();
        assert_eq!(p.body.len(), 7);
        assert!(matches!(&p.body[0], Stmt::Variable(d) if d.len() == 2 && d[1].init.is_none()));
        assert!(matches!(&p.body[1], Stmt::Function(f) if f.params == ["x", "y"]));
        assert!(matches!(&p.body[2], Stmt::If { alternate: Some(_), .. }));
        assert!(matches!(&p.body[5], Stmt::For { init: Some(ForInit::Variable(_)), .. }));
        assert!(matches!(&p.body[6], Stmt::Foreach { id, .. } if id == "it"));
    }

    #[test]
    fn empty_for_clauses() {
        let p = parse_program("for (;;) {}").unwrap();
        assert_eq!(
            p.body,
            vec![Stmt::For {
                init: None,
                test: None,
                update: None,
                body: Box::new(Stmt::Block(vec![])),
            }]
        );
    }

    #[test]
    fn implicit_semicolon_at_end_of_input() {
        assert_eq!(parse_program("10 - 4").unwrap().body.len(), 1);
        assert_eq!(parse_program("let a").unwrap().body.len(), 1);
    }

    #[test]
    fn implicit_semicolon_before_close_curly() {
        let p = parse_program("{ 42 }").unwrap();
        assert_eq!(p.body, vec![Stmt::Block(vec![Stmt::Expression(num("42", 42))])]);
    }

    #[test]
    fn missing_semicolon_mid_program() {
        let err = parse_program("1 2").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected token \"2\", expected: Semicolon at position 2"
        );
    }

    #[test]
    fn unterminated_block() {
        let err = parse_program("{ 1;").unwrap_err();
        assert!(err.to_string().starts_with("Unexpected end of input"), "{err}");
    }

    #[test]
    fn invalid_expression_reports_offset() {
        let err = parse_program("let x = ;").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { position: 8, .. }), "{err:?}");
    }

    fn nested(open: &str, close: &str, n: usize) -> String {
        format!("{}1{}", open.repeat(n), close.repeat(n))
    }

    #[test]
    fn reasonable_nesting_parses() {
        for src in [
            nested("(", ")", 40),
            nested("-", "", 40),
            nested("{ ", " }", 30),
            nested("f(", ")", 30),
            nested("$\"{", "}\"", 20),
            format!("a{}", ".b".repeat(50)),
            format!("1{}", " + 1".repeat(900)),
        ] {
            assert!(parse_program(&src).is_ok(), "{src}");
        }
    }

    #[test]
    fn excessive_nesting_is_a_syntax_error() {
        for src in [
            nested("(", ")", 1000),
            nested("-", "", 1000),
            nested("!", "", 1000),
            nested("{ ", " }", 1000),
            nested("f(", ")", 1000),
            nested("a[", "]", 1000),
            nested("$\"{", "}\"", 1000),
            nested("x = ", "", 1000),
            format!("if (true) {}1", "if (true) ".repeat(1000)),
            format!("a{}", ".b".repeat(1000)),
            format!("f{}", "()".repeat(1000)),
            format!("1{}", " + 1".repeat(5000)),
            format!("true{}", " && true".repeat(5000)),
        ] {
            match parse_program(&src) {
                Err(ScriptError::Syntax { message, .. }) => {
                    assert_eq!(message, "Expression nested too deeply", "{src}")
                }
                other => panic!("expected a nesting error, got {other:?}"),
            }
        }
        assert!(parse_expression(&nested("(", ")", 1000)).is_err());
    }

    #[test]
    fn parse_expression_entry_point() {
        assert_eq!(parse_expression("1 + 2").unwrap(), bin(BinaryOp::Add, num("1", 1), num("2", 2)));
        assert!(parse_expression("1 + 2; 3").is_err());
    }

    #[test]
    fn printing_round_trips() {
        let src = r#"let a = 1, b; def f(x) { return (x + 1) * 2; } a = b = f(a)?.c ?? -3%; $"v {a}";"#;
        let first = parse_program(src).unwrap();
        let second = parse_program(&first.to_string()).unwrap();
        assert_eq!(first, second);
    }
}
