use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("unexpected character `{ch}` at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string literal starting at position {0}")]
    UnterminatedString(usize),

    #[error("unterminated bracketed identifier starting at position {0}")]
    UnterminatedIdentifier(usize),

    #[error("invalid numeric literal `{0}`")]
    InvalidNumber(String),

    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("empty expression")]
    Empty,

    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),
}
