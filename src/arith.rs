//! Integer expression evaluator
//!
//! Recursive descent over, in ascending precedence:
//!
//! ```text
//! equality    := relational (("==" | "!=") relational)*
//! relational  := additive (("<=" | ">=" | "<" | ">") additive)*
//! additive    := term (("+" | "-") term)*
//! term        := factor (("*" | "/" | "%") factor)*
//! factor      := "(" equality ")" | ("-" | "+" | "!") factor | integer
//! ```
//!
//! Everything is `i64`; comparisons yield 1 or 0. Input left over after a
//! complete expression is ignored.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{cut, value},
    error::{ErrorKind, ParseError},
    multi::fold_many0,
    sequence::{pair, preceded},
    IResult,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArithError {
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Unexpected end of expression")]
    UnexpectedEnd,
    #[error("Mismatched parentheses")]
    MismatchedParentheses,
    #[error("Invalid character in expression: '{0}'")]
    InvalidCharacter(char),
    #[error("Expected number")]
    ExpectedNumber,
    #[error("Integer overflow")]
    Overflow,
}

impl ArithError {
    /// Work out what went wrong from the input left at the failure point
    fn at(input: &str) -> Self {
        match input.trim_start().chars().next() {
            None => ArithError::UnexpectedEnd,
            Some(c) if c.is_ascii_digit() || "+-*/%()<>=!".contains(c) => {
                ArithError::ExpectedNumber
            }
            Some(c) => ArithError::InvalidCharacter(c),
        }
    }
}

impl<'a> ParseError<&'a str> for ArithError {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        ArithError::at(input)
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type PResult<'a, T> = IResult<&'a str, T, ArithError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(i64),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    preceded(multispace0, inner)
}

fn number(input: &str) -> PResult<'_, Expr> {
    let (rest, digits) = digit1(input)?;
    let n = digits
        .parse::<i64>()
        .map_err(|_| nom::Err::Failure(ArithError::Overflow))?;
    Ok((rest, Expr::Num(n)))
}

fn parens(input: &str) -> PResult<'_, Expr> {
    let (input, _) = char('(')(input)?;
    let (input, inner) = cut(equality)(input)?;
    match ws(char::<&str, ArithError>(')'))(input) {
        Ok((rest, _)) => Ok((rest, inner)),
        Err(_) => Err(nom::Err::Failure(ArithError::MismatchedParentheses)),
    }
}

fn unary(input: &str) -> PResult<'_, Expr> {
    let (input, op) = one_of("-+!")(input)?;
    let (input, operand) = cut(factor)(input)?;
    let expr = match op {
        '-' => Expr::Neg(Box::new(operand)),
        '!' => Expr::Not(Box::new(operand)),
        _ => operand,
    };
    Ok((input, expr))
}

fn factor(input: &str) -> PResult<'_, Expr> {
    ws(alt((parens, unary, number)))(input)
}

/// One left-associative precedence level. Once an operator is consumed the
/// right operand is mandatory.
fn binary_level<'a>(
    input: &'a str,
    operand: fn(&'a str) -> PResult<'a, Expr>,
    op: fn(&'a str) -> PResult<'a, BinOp>,
) -> PResult<'a, Expr> {
    let (input, first) = operand(input)?;
    fold_many0(
        pair(op, cut(operand)),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
    )(input)
}

fn term_op(input: &str) -> PResult<'_, BinOp> {
    ws(alt((
        value(BinOp::Mul, char('*')),
        value(BinOp::Div, char('/')),
        value(BinOp::Rem, char('%')),
    )))(input)
}

fn additive_op(input: &str) -> PResult<'_, BinOp> {
    ws(alt((value(BinOp::Add, char('+')), value(BinOp::Sub, char('-')))))(input)
}

fn relational_op(input: &str) -> PResult<'_, BinOp> {
    ws(alt((
        value(BinOp::Le, tag("<=")),
        value(BinOp::Ge, tag(">=")),
        value(BinOp::Lt, tag("<")),
        value(BinOp::Gt, tag(">")),
    )))(input)
}

fn equality_op(input: &str) -> PResult<'_, BinOp> {
    ws(alt((value(BinOp::Eq, tag("==")), value(BinOp::Ne, tag("!=")))))(input)
}

fn term(input: &str) -> PResult<'_, Expr> {
    binary_level(input, factor, term_op)
}

fn additive(input: &str) -> PResult<'_, Expr> {
    binary_level(input, term, additive_op)
}

fn relational(input: &str) -> PResult<'_, Expr> {
    binary_level(input, additive, relational_op)
}

fn equality(input: &str) -> PResult<'_, Expr> {
    binary_level(input, relational, equality_op)
}

fn eval(expr: &Expr) -> Result<i64, ArithError> {
    match expr {
        Expr::Num(n) => Ok(*n),
        Expr::Neg(inner) => eval(inner)?.checked_neg().ok_or(ArithError::Overflow),
        Expr::Not(inner) => Ok((eval(inner)? == 0) as i64),
        Expr::Binary(op, lhs, rhs) => {
            let (l, r) = (eval(lhs)?, eval(rhs)?);
            match op {
                BinOp::Add => l.checked_add(r).ok_or(ArithError::Overflow),
                BinOp::Sub => l.checked_sub(r).ok_or(ArithError::Overflow),
                BinOp::Mul => l.checked_mul(r).ok_or(ArithError::Overflow),
                BinOp::Div | BinOp::Rem if r == 0 => Err(ArithError::DivisionByZero),
                BinOp::Div => l.checked_div(r).ok_or(ArithError::Overflow),
                BinOp::Rem => l.checked_rem(r).ok_or(ArithError::Overflow),
                BinOp::Eq => Ok((l == r) as i64),
                BinOp::Ne => Ok((l != r) as i64),
                BinOp::Lt => Ok((l < r) as i64),
                BinOp::Le => Ok((l <= r) as i64),
                BinOp::Gt => Ok((l > r) as i64),
                BinOp::Ge => Ok((l >= r) as i64),
            }
        }
    }
}

/// Evaluate an integer expression.
pub fn evaluate(expr: &str) -> Result<i64, ArithError> {
    match equality(expr) {
        Ok((_rest, ast)) => eval(&ast),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(e),
        Err(nom::Err::Incomplete(_)) => Err(ArithError::UnexpectedEnd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence() {
        assert_eq!(evaluate("2 + 3 * 4"), Ok(14));
        assert_eq!(evaluate("(2+3)*(4+5)"), Ok(45));
        assert_eq!(evaluate("10 - 4 - 3"), Ok(3));
        assert_eq!(evaluate("7 / 2 * 2"), Ok(6));
        assert_eq!(evaluate("7 % 4"), Ok(3));
    }

    #[test]
    fn comparisons_yield_one_or_zero() {
        assert_eq!(evaluate("3 < 5"), Ok(1));
        assert_eq!(evaluate("3 >= 5"), Ok(0));
        assert_eq!(evaluate("1 + 1 == 2"), Ok(1));
        assert_eq!(evaluate("2 != 2"), Ok(0));
        assert_eq!(evaluate("1 < 2 == 1"), Ok(1));
    }

    #[test]
    fn unary_operators() {
        assert_eq!(evaluate("-5 + 2"), Ok(-3));
        assert_eq!(evaluate("3 - -2"), Ok(5));
        assert_eq!(evaluate("-(2 + 3)"), Ok(-5));
        assert_eq!(evaluate("!0"), Ok(1));
        assert_eq!(evaluate("!7"), Ok(0));
    }

    #[test]
    fn division_by_zero_fails() {
        assert_eq!(evaluate("10 / 0"), Err(ArithError::DivisionByZero));
        assert_eq!(evaluate("10 % (2 - 2)"), Err(ArithError::DivisionByZero));
    }

    #[test]
    fn malformed_input_fails() {
        assert_eq!(evaluate(""), Err(ArithError::UnexpectedEnd));
        assert_eq!(evaluate("   "), Err(ArithError::UnexpectedEnd));
        assert_eq!(evaluate("1 +"), Err(ArithError::UnexpectedEnd));
        assert_eq!(evaluate("(1 + 2"), Err(ArithError::MismatchedParentheses));
        assert_eq!(evaluate("x + 1"), Err(ArithError::InvalidCharacter('x')));
        assert_eq!(evaluate("2 * )"), Err(ArithError::ExpectedNumber));
    }

    #[test]
    fn trailing_input_is_ignored() {
        assert_eq!(evaluate("1 + 2)"), Ok(3));
        assert_eq!(evaluate("4 x"), Ok(4));
    }

    #[test]
    fn overflow_is_an_error() {
        assert_eq!(evaluate("9223372036854775807 + 1"), Err(ArithError::Overflow));
        assert_eq!(evaluate("99999999999999999999"), Err(ArithError::Overflow));
    }
}
