//! Split predicates.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::StructuralError;

use super::field::{FieldValue, InputRecord};

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    In,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Gt => ">",
            Self::In => "in",
        }
    }

    #[inline]
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Ge => ordering != Ordering::Less,
            Self::Gt => ordering == Ordering::Greater,
            Self::In => false,
        }
    }
}

impl FromStr for Operator {
    type Err = StructuralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "<" => Self::Lt,
            "<=" => Self::Le,
            "=" | "==" => Self::Eq,
            "!=" | "/=" => Self::Ne,
            ">=" => Self::Ge,
            ">" => Self::Gt,
            "in" => Self::In,
            _ => return Err(StructuralError::UnknownOperator(s.to_string())),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `null`: with `=` tests that the field is missing, with `!=` that it is present.
    Missing,
    Value(FieldValue),
    /// Category set for `in`.
    Set(Vec<String>),
}

/// A split condition on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    operator: Operator,
    field: String,
    literal: Literal,
    /// Missing values satisfy the predicate (operator written with a trailing `*`).
    missing: bool,
}

impl Predicate {
    pub fn new(operator: Operator, field: impl Into<String>, literal: Literal) -> Self {
        let literal = match (operator, literal) {
            (Operator::In, Literal::Value(v)) => Literal::Set(vec![v.as_text().into_owned()]),
            (_, literal) => literal,
        };
        Self {
            operator,
            field: field.into(),
            literal,
            missing: false,
        }
    }

    /// Parse an operator as written in a model description; a trailing `*`
    /// marks a missing-aware predicate.
    pub fn parse(
        operator: &str,
        field: impl Into<String>,
        literal: Literal,
    ) -> Result<Self, StructuralError> {
        let (symbol, missing) = match operator.strip_suffix('*') {
            Some(symbol) => (symbol, true),
            None => (operator, false),
        };
        Ok(Self::new(symbol.parse()?, field, literal).with_missing(missing))
    }

    pub fn with_missing(mut self, missing: bool) -> Self {
        self.missing = missing;
        self
    }

    #[inline]
    pub fn operator(&self) -> Operator {
        self.operator
    }

    #[inline]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[inline]
    pub fn literal(&self) -> &Literal {
        &self.literal
    }

    /// Whether a missing value takes this branch.
    #[inline]
    pub fn accepts_missing(&self) -> bool {
        self.missing || (self.operator == Operator::Eq && self.literal == Literal::Missing)
    }

    /// Evaluate against a cast input record.
    pub fn applies(&self, input: &InputRecord) -> bool {
        let Some(value) = input.get(&self.field) else {
            return self.accepts_missing();
        };

        match (&self.literal, self.operator) {
            (Literal::Missing, op) => op == Operator::Ne,
            (Literal::Set(categories), Operator::In) => {
                let text = value.as_text();
                categories.iter().any(|c| *c == *text)
            }
            (Literal::Set(_), _) | (Literal::Value(_), Operator::In) => false,
            (Literal::Value(expected), op) => {
                compare(value, expected).is_some_and(|ordering| op.accepts(ordering))
            }
        }
    }
}

/// Numeric comparison when both sides are numbers, lexical otherwise.
fn compare(value: &FieldValue, literal: &FieldValue) -> Option<Ordering> {
    match (value, literal) {
        (FieldValue::Number(a), FieldValue::Number(b)) => a.partial_cmp(b),
        _ => Some(value.as_text().cmp(&literal.as_text())),
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let star = if self.missing { "*" } else { "" };
        match &self.literal {
            Literal::Missing => write!(f, "{} {}{} null", self.field, self.operator, star),
            Literal::Value(v) => write!(f, "{} {}{} {}", self.field, self.operator, star, v),
            Literal::Set(set) => {
                write!(f, "{} {}{} [{}]", self.field, self.operator, star, set.join(", "))
            }
        }
    }
}
