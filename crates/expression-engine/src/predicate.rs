use crate::{
    error::ExpressionError,
    lexer::{Token, tokenize},
    parser::parse_number,
};
use model::{core::value::Value, records::row::RowData};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessOrEqual,
    GreaterOrEqual,
}

/// A compiled conditional-branch predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        literal: Value,
    },
    Like {
        column: String,
        pattern: String,
    },
    IsNull(String),
    IsNotNull(String),
}

impl Predicate {
    pub fn column(&self) -> &str {
        match self {
            Predicate::Compare { column, .. }
            | Predicate::Like { column, .. }
            | Predicate::IsNull(column)
            | Predicate::IsNotNull(column) => column,
        }
    }
}

/// Parses `col op lit`, `col IS [NOT] NULL` or `col LIKE 'pattern'`.
pub fn parse_predicate(input: &str) -> Result<Predicate, ExpressionError> {
    let tokens = tokenize(input)?;
    let mut iter = tokens.into_iter();

    let column = match iter.next() {
        Some(Token::Identifier(name)) => name,
        Some(tok) => {
            return Err(ExpressionError::InvalidPredicate(format!(
                "expected column name, found {tok:?}"
            )));
        }
        None => return Err(ExpressionError::Empty),
    };

    let predicate = match iter.next() {
        Some(Token::Is) => match (iter.next(), iter.next()) {
            (Some(Token::Null), None) => Predicate::IsNull(column),
            (Some(Token::Not), Some(Token::Null)) => Predicate::IsNotNull(column),
            _ => {
                return Err(ExpressionError::InvalidPredicate(
                    "expected NULL or NOT NULL after IS".into(),
                ));
            }
        },
        Some(Token::Like) => match iter.next() {
            Some(Token::Str(pattern)) => Predicate::Like { column, pattern },
            _ => {
                return Err(ExpressionError::InvalidPredicate(
                    "LIKE requires a string pattern".into(),
                ));
            }
        },
        Some(op_token) => {
            let op = match op_token {
                Token::Equal => CompareOp::Equal,
                Token::NotEqual => CompareOp::NotEqual,
                Token::LessThan => CompareOp::LessThan,
                Token::GreaterThan => CompareOp::GreaterThan,
                Token::LessOrEqual => CompareOp::LessOrEqual,
                Token::GreaterOrEqual => CompareOp::GreaterOrEqual,
                other => {
                    return Err(ExpressionError::InvalidPredicate(format!(
                        "expected comparison operator, found {other:?}"
                    )));
                }
            };
            let literal = match iter.next() {
                Some(Token::Str(s)) => Value::Text(s),
                Some(Token::Number(raw)) => parse_number(&raw)?,
                Some(Token::Null) => Value::Null,
                other => {
                    return Err(ExpressionError::InvalidPredicate(format!(
                        "expected literal, found {other:?}"
                    )));
                }
            };
            Predicate::Compare { column, op, literal }
        }
        None => {
            return Err(ExpressionError::InvalidPredicate(
                "predicate has no operator".into(),
            ));
        }
    };

    if let Some(extra) = iter.next() {
        return Err(ExpressionError::InvalidPredicate(format!(
            "trailing token {extra:?}"
        )));
    }
    Ok(predicate)
}

/// Evaluates a predicate against a row. Comparison with a NULL cell is
/// false for every operator except `IS NULL`.
pub fn evaluate_predicate(predicate: &Predicate, row: &RowData) -> bool {
    match predicate {
        Predicate::IsNull(column) => row.value_of(column).is_null(),
        Predicate::IsNotNull(column) => !row.value_of(column).is_null(),
        Predicate::Like { column, pattern } => match row.value_of(column).as_text() {
            Some(text) => like_match(&text, pattern),
            None => false,
        },
        Predicate::Compare { column, op, literal } => {
            let cell = row.value_of(column);
            if cell.is_null() || literal.is_null() {
                return false;
            }
            match cell.compare(literal) {
                Some(ordering) => matches_ordering(*op, ordering),
                None => false,
            }
        }
    }
}

fn matches_ordering(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Equal => ordering == Ordering::Equal,
        CompareOp::NotEqual => ordering != Ordering::Equal,
        CompareOp::LessThan => ordering == Ordering::Less,
        CompareOp::GreaterThan => ordering == Ordering::Greater,
        CompareOp::LessOrEqual => ordering != Ordering::Greater,
        CompareOp::GreaterOrEqual => ordering != Ordering::Less,
    }
}

/// SQL `LIKE` matching: `%` matches any sequence (including empty), `_`
/// matches exactly one character, everything else matches itself.
pub fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_match_at(&text, &pattern)
}

fn like_match_at(text: &[char], pattern: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('%') => {
            // Try consuming zero or more characters.
            (0..=text.len()).any(|skip| like_match_at(&text[skip..], &pattern[1..]))
        }
        Some('_') => !text.is_empty() && like_match_at(&text[1..], &pattern[1..]),
        Some(&literal) => {
            text.first() == Some(&literal) && like_match_at(&text[1..], &pattern[1..])
        }
    }
}
