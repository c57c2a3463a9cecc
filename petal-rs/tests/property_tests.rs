use proptest::prelude::*;
use rust_decimal::Decimal;

use petal::script::ast::{AssignOp, BinaryOp, Expr, Property, TemplateSegment, UnaryOp};
use petal::script::lexer::Lexer;
use petal::script::parser::{parse_expression, parse_program};
use petal::script::{Interpreter, ScriptError};

const KEYWORDS: &[&str] = &[
    "let", "if", "else", "true", "false", "null", "while", "do", "for", "foreach", "in", "def",
    "return",
];

// ── Generators ────────────────────────────────────────────────────────────────

fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,5}".prop_filter("keyword", |s| !KEYWORDS.contains(&s.as_str()))
}

fn leaf() -> impl Strategy<Value = Expr> {
    prop_oneof![
        (0u32..100_000).prop_map(|n| Expr::Number {
            raw: n.to_string(),
            value: Decimal::from(n),
        }),
        "[a-zA-Z0-9 ]{0,8}".prop_map(Expr::String),
        any::<bool>().prop_map(Expr::Boolean),
        Just(Expr::Null),
        ident().prop_map(Expr::Identifier),
    ]
}

fn binary_op() -> impl Strategy<Value = BinaryOp> {
    prop::sample::select(vec![
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::Eq,
        BinaryOp::Ne,
    ])
}

fn logical_op() -> impl Strategy<Value = BinaryOp> {
    prop::sample::select(vec![BinaryOp::And, BinaryOp::Or, BinaryOp::Coalesce])
}

fn unary_op() -> impl Strategy<Value = UnaryOp> {
    prop::sample::select(vec![UnaryOp::Plus, UnaryOp::Minus, UnaryOp::Not])
}

fn expr() -> impl Strategy<Value = Expr> {
    leaf().prop_recursive(4, 48, 3, |inner| {
        prop_oneof![
            (binary_op(), inner.clone(), inner.clone()).prop_map(|(op, l, r)| Expr::Binary {
                op,
                left: Box::new(l),
                right: Box::new(r),
            }),
            (logical_op(), inner.clone(), inner.clone()).prop_map(|(op, l, r)| Expr::Logical {
                op,
                left: Box::new(l),
                right: Box::new(r),
            }),
            (unary_op(), inner.clone()).prop_map(|(op, e)| Expr::Unary {
                op,
                operand: Box::new(e),
            }),
            (inner.clone(), ident(), any::<bool>()).prop_map(|(o, name, np)| Expr::Member {
                object: Box::new(o),
                property: Property::Named(name),
                null_propagating: np,
            }),
            (inner.clone(), inner.clone(), any::<bool>()).prop_map(|(o, k, np)| Expr::Member {
                object: Box::new(o),
                property: Property::Computed(Box::new(k)),
                null_propagating: np,
            }),
            (inner.clone(), prop::collection::vec(inner.clone(), 0..3)).prop_map(|(c, args)| {
                Expr::Call {
                    callee: Box::new(c),
                    args,
                }
            }),
            (ident(), inner.clone()).prop_map(|(t, v)| Expr::Assignment {
                op: AssignOp::Assign,
                target: Box::new(Expr::Identifier(t)),
                value: Box::new(v),
            }),
            prop::collection::vec(("[a-z ]{1,4}", inner.clone()), 1..3).prop_map(|parts| {
                Expr::Template(
                    parts
                        .into_iter()
                        .flat_map(|(t, e)| [TemplateSegment::Text(t), TemplateSegment::Expr(e)])
                        .collect(),
                )
            }),
        ]
    })
}

// ── Properties ────────────────────────────────────────────────────────────────

proptest! {
    /// The lexer returns tokens or an error on any input, never panics.
    #[test]
    fn lexer_does_not_panic(s in "\\PC*") {
        let mut lexer = Lexer::new(&s);
        while let Ok(Some(_)) = lexer.next_token() {}
    }

    /// Same for the parser.
    #[test]
    fn parser_does_not_panic(s in "\\PC*") {
        let _ = parse_program(&s);
    }

    /// Script-shaped noise: real tokens in random order.
    #[test]
    fn parser_does_not_panic_on_token_soup(
        toks in prop::collection::vec(
            prop::sample::select(vec![
                "let", "x", "=", "1", "+", "(", ")", "{", "}", ";", "$\"", "\"", "?.", "[",
                "]", "if", "else", "def", "f", ",", "foreach", "in", "return", "23%", "&&",
            ]),
            0..40,
        )
    ) {
        let _ = parse_program(&toks.join(" "));
    }

    /// Arbitrarily deep nesting fails with a Syntax error, not a stack overflow.
    #[test]
    fn deep_nesting_is_rejected(
        open in prop::sample::select(vec!["(", "-", "!", "{ ", "f(", "a[", "$\"{", "x = "]),
        depth in 100usize..3000,
    ) {
        let close = match open {
            "(" | "f(" => ")",
            "{ " => " }",
            "a[" => "]",
            "$\"{" => "}\"",
            _ => "",
        };
        let src = format!("{}1{}", open.repeat(depth), close.repeat(depth));
        let parsed = parse_program(&src);
        prop_assert!(matches!(parsed, Err(ScriptError::Syntax { .. })), "{:?}", parsed.err());
    }

    /// Printing an expression and parsing it back yields the same tree.
    #[test]
    fn print_then_parse_is_identity(e in expr()) {
        let printed = e.to_string();
        let reparsed = parse_expression(&printed);
        prop_assert!(reparsed.is_ok(), "{printed}: {:?}", reparsed.err());
        prop_assert_eq!(reparsed.unwrap(), e, "printed as {}", printed);
    }

    /// Re-printing a parsed program is a fixed point.
    #[test]
    fn program_printing_is_idempotent(e in expr()) {
        let src = format!("let a = 1; if (a) {{ {e}; }} else {{ a = 2; }}");
        let first = parse_program(&src).unwrap();
        let second = parse_program(&first.to_string()).unwrap();
        prop_assert_eq!(first.to_string(), second.to_string());
        prop_assert_eq!(first, second);
    }

    /// Integer arithmetic agrees with `Decimal` arithmetic and precedence.
    #[test]
    fn integer_arithmetic(a in -1000i64..1000, b in -1000i64..1000, c in -1000i64..1000) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let interp = Interpreter::new();
        let r = rt.block_on(interp.execute(&format!("{a} + {b} * {c} - ({a} - {b})")));
        let (a, b, c) = (Decimal::from(a), Decimal::from(b), Decimal::from(c));
        prop_assert_eq!(r.value().as_number(), Some(a + b * c - (a - b)));
    }
}
