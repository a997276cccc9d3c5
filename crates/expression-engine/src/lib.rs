//! Scoped evaluator for calculated-column expressions and conditional
//! predicates. Expressions are tokenized, parsed into a small AST and
//! evaluated against a single row with null propagation; nothing is ever
//! handed to a shell or general-purpose interpreter.
//!
//! Expression grammar (calculated columns):
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := number | string | column | '(' expr ')'
//! column := identifier | '[' any chars ']'
//! ```
//!
//! `+` concatenates when either operand is text, otherwise adds. Integer
//! arithmetic stays exact in `i64`; division and any mixed-type
//! arithmetic is carried out in decimal. Any referenced column that is
//! NULL makes the whole expression NULL.
//!
//! Predicate grammar (conditional branches):
//!
//! ```text
//! predicate := column op literal
//!            | column IS NULL
//!            | column IS NOT NULL
//!            | column LIKE string
//! op        := = | != | <> | < | > | <= | >=
//! ```
//!
//! Comparisons are numeric when both sides coerce to numbers, otherwise
//! lexicographic. `LIKE` supports `%` (any sequence) and `_` (one char).

pub mod ast;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod predicate;

pub use ast::{BinaryOp, Expr};
pub use error::ExpressionError;
pub use eval::evaluate;
pub use parser::parse_expression;
pub use predicate::{CompareOp, Predicate, evaluate_predicate, like_match, parse_predicate};
