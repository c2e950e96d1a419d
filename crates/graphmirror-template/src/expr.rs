//! The template expression language.
//!
//! Scalar template leaves come in two forms:
//!
//! - plain strings with `{field}` placeholders, handled by [`interpolate`];
//! - whole-value `eval(<expression>)` strings whose inner expression is
//!   parsed into a small AST and evaluated by [`evaluate`].
//!
//! The AST is deliberately tiny: identifiers (record fields), string and
//! number literals, list literals, and helper calls. There is no mutation,
//! indexing, attribute access, or any other way to reach outside the record
//! and the helper registry.

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_while1};
use nom::character::complete::{char as pchar, multispace0};
use nom::combinator::{all_consuming, map, opt, recognize, value};
use nom::multi::separated_list0;
use nom::number::complete::recognize_float;
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;
use serde_json::{Number, Value};

use crate::helpers::{HelperCaches, HelperRegistry};
use crate::record::Record;

/// A parsed template expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Record field reference.
    Ident(String),
    /// String literal (`"..."` or `'...'`).
    Str(String),
    /// Numeric literal.
    Number(f64),
    /// List literal.
    List(Vec<Expr>),
    /// Helper call.
    Call { name: String, args: Vec<Expr> },
}

/// Why an evaluation did not produce a value.
///
/// Both variants are *recovered* by the compiler: the attribute being
/// compiled degrades to the empty sentinel (or a probe placeholder), and
/// compilation of the surrounding document continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalFailure {
    /// A referenced record field is missing (or null).
    UndefinedReference(String),
    /// A helper raised, or the expression misused a value.
    Expression(String),
}

impl std::fmt::Display for EvalFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalFailure::UndefinedReference(field) => {
                write!(f, "undefined field reference: {field}")
            }
            EvalFailure::Expression(msg) => write!(f, "expression error: {msg}"),
        }
    }
}

// ============================================================================
// Parser (nom)
// ============================================================================

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn ident_raw(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        opt(take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')),
    ))(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    let double = delimited(
        pchar('"'),
        opt(escaped_transform(
            is_not("\"\\"),
            '\\',
            alt((
                value("\"", tag("\"")),
                value("\\", tag("\\")),
                value("\n", tag("n")),
                value("\t", tag("t")),
            )),
        )),
        pchar('"'),
    );
    let single = delimited(
        pchar('\''),
        opt(escaped_transform(
            is_not("'\\"),
            '\\',
            alt((
                value("'", tag("'")),
                value("\\", tag("\\")),
                value("\n", tag("n")),
                value("\t", tag("t")),
            )),
        )),
        pchar('\''),
    );
    map(alt((double, single)), |s| s.unwrap_or_default())(input)
}

fn number_literal(input: &str) -> IResult<&str, f64> {
    let (rest, text) = recognize_float(input)?;
    match text.parse::<f64>() {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

fn list_literal(input: &str) -> IResult<&str, Vec<Expr>> {
    delimited(
        pchar('['),
        separated_list0(ws(pchar(',')), expr_node),
        ws(pchar(']')),
    )(input)
}

fn call_or_ident(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = ident_raw(input)?;
    let (rest, args) = opt(delimited(
        preceded(multispace0, pchar('(')),
        separated_list0(ws(pchar(',')), expr_node),
        ws(pchar(')')),
    ))(rest)?;
    let expr = match args {
        Some(args) => Expr::Call {
            name: name.to_string(),
            args,
        },
        None => Expr::Ident(name.to_string()),
    };
    Ok((rest, expr))
}

fn expr_node(input: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            map(string_literal, Expr::Str),
            map(list_literal, Expr::List),
            call_or_ident,
            map(number_literal, Expr::Number),
        )),
    )(input)
}

/// Parse one expression; the whole input must be consumed.
pub fn parse_expr(input: &str) -> Result<Expr, String> {
    match all_consuming(ws(expr_node))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(e) => Err(format!("invalid expression {input:?}: {e}")),
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluate an expression against a record and the helper registry.
///
/// Identifiers resolve to record fields; calls resolve to registered
/// helpers. Nothing else is reachable from an expression.
pub fn evaluate(
    expr: &Expr,
    record: &Record,
    helpers: &HelperRegistry,
    caches: &HelperCaches,
) -> Result<Value, EvalFailure> {
    match expr {
        Expr::Ident(field) => match record.get(field) {
            Some(Value::Null) | None => {
                Err(EvalFailure::UndefinedReference(field.clone()))
            }
            Some(v) => Ok(v.clone()),
        },
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Number(n) => Number::from_f64(*n)
            .map(Value::Number)
            .ok_or_else(|| EvalFailure::Expression(format!("non-finite number literal: {n}"))),
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, record, helpers, caches)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, record, helpers, caches)?);
            }
            helpers
                .call(name, &values, caches)
                .map_err(|e| EvalFailure::Expression(format!("{name}: {e}")))
        }
    }
}

/// Substitute `{field}` references in a literal template string.
///
/// All-or-nothing: any missing field fails the whole attribute with
/// [`EvalFailure::UndefinedReference`]. `{{` and `}}` escape literal braces.
pub fn interpolate(template: &str, record: &Record) -> Result<String, EvalFailure> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => {
                            return Err(EvalFailure::Expression(format!(
                                "unterminated placeholder in {template:?}"
                            )))
                        }
                    }
                }
                let field = field.trim();
                match record.get(field) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(Value::Number(n)) => out.push_str(&n.to_string()),
                    Some(Value::Bool(b)) => out.push_str(if *b { "true" } else { "false" }),
                    Some(Value::Null) | None => {
                        return Err(EvalFailure::UndefinedReference(field.to_string()))
                    }
                    Some(other) => {
                        return Err(EvalFailure::Expression(format!(
                            "field {field:?} is a {} and cannot interpolate into a string",
                            crate::record::type_name(other)
                        )))
                    }
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}
