//! Threshold Expression Evaluation
//!
//! Evaluates the restricted comparison grammar used by alert thresholds:
//!
//! ```text
//! expression := number operator number
//! operator   := ">" | ">=" | "<" | "<=" | "=="
//! number     := ["+" | "-"] digits ["." digits]
//! ```
//!
//! Threshold operators come from a file anyone with access to the config
//! web UI can write, so nothing outside this grammar is ever interpreted.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

/// Characters that may start or continue an operator token.
const OPERATOR_CHARS: &[char] = &['<', '>', '=', '!'];

/// Evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    /// Input is not a two-operand numeric comparison.
    #[error("unsupported expression: {0:?}")]
    UnsupportedExpression(String),
}

/// Supported comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `==`
    Eq,
}

impl Comparator {
    /// Operator token as written in expressions and config files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
        }
    }

    /// Whether this operator may be used for a threshold bound.
    ///
    /// Equality is accepted by the evaluator but never as a bound.
    #[must_use]
    pub const fn is_ordering(self) -> bool {
        !matches!(self, Self::Eq)
    }

    /// Apply the comparison `left <op> right`.
    #[must_use]
    pub fn apply(self, left: Decimal, right: Decimal) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Eq => left == right,
        }
    }
}

impl FromStr for Comparator {
    type Err = EvaluationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            "==" => Ok(Self::Eq),
            other => Err(EvaluationError::UnsupportedExpression(other.to_string())),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `number <op> number` comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    /// Left operand.
    pub left: Decimal,
    /// Operator.
    pub op: Comparator,
    /// Right operand.
    pub right: Decimal,
}

impl Comparison {
    /// Parse a comparison expression.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedExpression` for anything that is not exactly two
    /// numeric operands joined by one supported operator.
    pub fn parse(expr: &str) -> Result<Self, EvaluationError> {
        let unsupported = || EvaluationError::UnsupportedExpression(expr.to_string());

        let op_start = expr.find(OPERATOR_CHARS).ok_or_else(unsupported)?;
        let (left, rest) = expr.split_at(op_start);
        let op_len = rest
            .find(|c: char| !OPERATOR_CHARS.contains(&c))
            .unwrap_or(rest.len());
        let (op, right) = rest.split_at(op_len);

        Ok(Self {
            left: parse_operand(left).ok_or_else(unsupported)?,
            op: op.parse().map_err(|_| unsupported())?,
            right: parse_operand(right).ok_or_else(unsupported)?,
        })
    }

    /// Evaluate the comparison.
    #[must_use]
    pub fn evaluate(&self) -> bool {
        self.op.apply(self.left, self.right)
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.left, self.op, self.right)
    }
}

/// Evaluate `value <op> threshold` where `op` is an operator token.
///
/// # Errors
///
/// Returns `UnsupportedExpression` if `op` is not one of the five
/// supported comparators.
pub fn evaluate(value: Decimal, op: &str, threshold: Decimal) -> Result<bool, EvaluationError> {
    let op: Comparator = op.parse()?;
    Ok(op.apply(value, threshold))
}

/// Parse and evaluate a textual comparison such as `"10000.00>=9999.99"`.
///
/// # Errors
///
/// Returns `UnsupportedExpression` if the text is outside the grammar.
pub fn evaluate_expression(expr: &str) -> Result<bool, EvaluationError> {
    Comparison::parse(expr).map(|c| c.evaluate())
}

/// Parse a plain decimal operand: optional sign, digits, optional fraction.
fn parse_operand(raw: &str) -> Option<Decimal> {
    let text = raw.trim();
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);

    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let digits_ok = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if int_part.is_empty() || !digits_ok(int_part) {
        return None;
    }
    if let Some(frac) = frac_part
        && (frac.is_empty() || !digits_ok(frac))
    {
        return None;
    }

    Decimal::from_str(text).ok()
}
