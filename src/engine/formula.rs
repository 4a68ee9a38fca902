//! Formula parser and evaluator
//!
//! Parses composite-metric formulas into a small arithmetic AST and
//! evaluates them against named variable bindings.
//!
//! # Supported Syntax
//!
//! ```text
//! expression = term (('+' | '-') term)*
//! term       = factor (('*' | '/') factor)*
//! factor     = '-' factor | number | identifier | '(' expression ')'
//! ```
//!
//! # Examples
//!
//! ```text
//! approved_count / total_count * 100
//! (granted - revoked) / active_total
//! payment_total * 0.05
//! ```
//!
//! This is deliberately a four-operator interpreter with parentheses and
//! named variables, not a scripting engine. Identifiers are bound to the
//! computed values of dependent metrics at evaluation time.

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map, map_res, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Errors from formula parsing and evaluation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    /// The expression text does not parse
    #[error("malformed formula: {0}")]
    Parse(String),

    /// The expression references a variable with no bound value
    #[error("formula references unbound variable '{0}'")]
    UnknownVariable(String),

    /// Evaluation produced NaN or infinity (e.g., division by zero)
    #[error("formula evaluated to a non-finite number")]
    NonFinite,
}

pub type FormulaResult<T> = Result<T, FormulaError>;

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Parsed arithmetic expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// A parsed formula, retaining its source text for display and storage
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    /// Parse a formula string
    pub fn parse(input: &str) -> FormulaResult<Formula> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(FormulaError::Parse("empty expression".to_string()));
        }

        match parse_expression(trimmed) {
            Ok((remaining, expr)) => {
                if remaining.trim().is_empty() {
                    Ok(Formula {
                        source: trimmed.to_string(),
                        expr,
                    })
                } else {
                    Err(FormulaError::Parse(format!(
                        "unexpected input after expression: '{}'",
                        remaining.trim()
                    )))
                }
            }
            Err(e) => Err(FormulaError::Parse(format!("{:?}", e))),
        }
    }

    /// The formula's source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variables the formula references, in deterministic order
    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        collect_variables(&self.expr, &mut vars);
        vars
    }

    /// Evaluate against variable bindings
    ///
    /// Fails if any referenced variable is unbound or if the result is not
    /// a finite number.
    pub fn evaluate(&self, bindings: &HashMap<String, f64>) -> FormulaResult<f64> {
        let result = eval(&self.expr, bindings)?;
        if result.is_finite() {
            Ok(result)
        } else {
            Err(FormulaError::NonFinite)
        }
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn collect_variables(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Variable(name) => {
            out.insert(name.clone());
        }
        Expr::Negate(inner) => collect_variables(inner, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_variables(lhs, out);
            collect_variables(rhs, out);
        }
    }
}

fn eval(expr: &Expr, bindings: &HashMap<String, f64>) -> FormulaResult<f64> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Variable(name) => bindings
            .get(name)
            .copied()
            .ok_or_else(|| FormulaError::UnknownVariable(name.clone())),
        Expr::Negate(inner) => Ok(-eval(inner, bindings)?),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval(lhs, bindings)?;
            let r = eval(rhs, bindings)?;
            Ok(match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
            })
        }
    }
}

/// Parse addition/subtraction level (lowest precedence)
fn parse_expression(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_term(input)?;
    let (input, rest) = many0(pair(
        delimited(
            multispace0,
            alt((
                value(BinaryOp::Add, char('+')),
                value(BinaryOp::Sub, char('-')),
            )),
            multispace0,
        ),
        parse_term,
    ))(input)?;

    Ok((input, fold_binary(first, rest)))
}

/// Parse multiplication/division level
fn parse_term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_factor(input)?;
    let (input, rest) = many0(pair(
        delimited(
            multispace0,
            alt((
                value(BinaryOp::Mul, char('*')),
                value(BinaryOp::Div, char('/')),
            )),
            multispace0,
        ),
        parse_factor,
    ))(input)?;

    Ok((input, fold_binary(first, rest)))
}

/// Parse a single operand
fn parse_factor(input: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            parse_negation,
            parse_parenthesized,
            parse_number,
            parse_variable,
        )),
    )(input)
}

/// Parse unary minus
fn parse_negation(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('-')(input)?;
    let (input, inner) = parse_factor(input)?;
    Ok((input, Expr::Negate(Box::new(inner))))
}

/// Parse a parenthesized sub-expression
fn parse_parenthesized(input: &str) -> IResult<&str, Expr> {
    delimited(
        char('('),
        parse_expression,
        preceded(multispace0, char(')')),
    )(input)
}

/// Parse a numeric literal
fn parse_number(input: &str) -> IResult<&str, Expr> {
    map_res(
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        |s: &str| s.parse::<f64>().map(Expr::Number),
    )(input)
}

/// Parse a variable reference (a dependent metric code)
fn parse_variable(input: &str) -> IResult<&str, Expr> {
    map(parse_identifier, |s| Expr::Variable(s.to_string()))(input)
}

/// Parse an identifier
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

fn fold_binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn test_parse_simple_ratio() {
        let formula = Formula::parse("approved_count / total_count * 100").unwrap();
        assert_eq!(
            formula.variables(),
            BTreeSet::from(["approved_count".to_string(), "total_count".to_string()])
        );
    }

    #[test]
    fn test_approval_rate_evaluation() {
        let formula = Formula::parse("approved_count / total_count * 100").unwrap();
        let value = formula
            .evaluate(&bind(&[("approved_count", 80.0), ("total_count", 100.0)]))
            .unwrap();
        assert_eq!(value, 80.0);
    }

    #[test]
    fn test_operator_precedence() {
        let formula = Formula::parse("2 + 3 * 4").unwrap();
        assert_eq!(formula.evaluate(&HashMap::new()).unwrap(), 14.0);

        let formula = Formula::parse("(2 + 3) * 4").unwrap();
        assert_eq!(formula.evaluate(&HashMap::new()).unwrap(), 20.0);
    }

    #[test]
    fn test_left_associativity() {
        let formula = Formula::parse("10 - 2 - 3").unwrap();
        assert_eq!(formula.evaluate(&HashMap::new()).unwrap(), 5.0);

        let formula = Formula::parse("100 / 10 / 2").unwrap();
        assert_eq!(formula.evaluate(&HashMap::new()).unwrap(), 5.0);
    }

    #[test]
    fn test_unary_minus() {
        let formula = Formula::parse("-deficit + 5").unwrap();
        assert_eq!(
            formula.evaluate(&bind(&[("deficit", 2.0)])).unwrap(),
            3.0
        );

        let formula = Formula::parse("-(a - b)").unwrap();
        assert_eq!(
            formula.evaluate(&bind(&[("a", 3.0), ("b", 10.0)])).unwrap(),
            7.0
        );
    }

    #[test]
    fn test_decimal_literals() {
        let formula = Formula::parse("payment_total * 0.05").unwrap();
        assert_eq!(
            formula.evaluate(&bind(&[("payment_total", 200.0)])).unwrap(),
            10.0
        );
    }

    #[test]
    fn test_unknown_variable() {
        let formula = Formula::parse("a + b").unwrap();
        let err = formula.evaluate(&bind(&[("a", 1.0)])).unwrap_err();
        assert_eq!(err, FormulaError::UnknownVariable("b".to_string()));
    }

    #[test]
    fn test_division_by_zero_is_non_finite() {
        let formula = Formula::parse("a / b").unwrap();
        let err = formula
            .evaluate(&bind(&[("a", 1.0), ("b", 0.0)]))
            .unwrap_err();
        assert_eq!(err, FormulaError::NonFinite);

        // 0/0 produces NaN, also rejected
        let err = formula
            .evaluate(&bind(&[("a", 0.0), ("b", 0.0)]))
            .unwrap_err();
        assert_eq!(err, FormulaError::NonFinite);
    }

    #[test]
    fn test_malformed_expressions_rejected() {
        for bad in ["", "a +", "(a", "a b", "* 3", "a ** b", "1..2"] {
            assert!(
                matches!(Formula::parse(bad), Err(FormulaError::Parse(_))),
                "expected parse failure for '{}'",
                bad
            );
        }
    }

    #[test]
    fn test_whitespace_insensitive() {
        let tight = Formula::parse("a/b*100").unwrap();
        let spaced = Formula::parse("  a / b  *  100  ").unwrap();
        let bindings = bind(&[("a", 1.0), ("b", 4.0)]);
        assert_eq!(
            tight.evaluate(&bindings).unwrap(),
            spaced.evaluate(&bindings).unwrap()
        );
    }

    #[test]
    fn test_nested_parentheses() {
        let formula = Formula::parse("((granted - revoked) / (active + 1)) * 100").unwrap();
        let value = formula
            .evaluate(&bind(&[
                ("granted", 120.0),
                ("revoked", 20.0),
                ("active", 199.0),
            ]))
            .unwrap();
        assert_eq!(value, 50.0);
    }

    #[test]
    fn test_source_preserved() {
        let formula = Formula::parse("  a + b ").unwrap();
        assert_eq!(formula.source(), "a + b");
        assert_eq!(formula.to_string(), "a + b");
    }
}
