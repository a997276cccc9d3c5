use crate::{
    ast::{BinaryOp, Expr},
    error::ExpressionError,
    lexer::{Token, tokenize},
};
use bigdecimal::BigDecimal;
use model::core::value::Value;
use std::str::FromStr;

/// Parses a calculated-column expression into an AST. Parsing happens
/// once per table at plan-compile time; evaluation is per row.
pub fn parse_expression(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(ExpressionError::UnexpectedToken(format!("{tok:?}"))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expression(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.term()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus) => Some(BinaryOp::Add),
            Some(Token::Minus) => Some(BinaryOp::Subtract),
            _ => None,
        } {
            self.advance();
            let right = self.term()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.factor()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star) => Some(BinaryOp::Multiply),
            Some(Token::Slash) => Some(BinaryOp::Divide),
            _ => None,
        } {
            self.advance();
            let right = self.factor()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::Number(raw)) => parse_number(&raw).map(Expr::Literal),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Text(s))),
            Some(Token::Identifier(name)) => Ok(Expr::Column(name)),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(tok) => Err(ExpressionError::UnexpectedToken(format!("{tok:?}"))),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some(tok) => Err(ExpressionError::UnexpectedToken(format!("{tok:?}"))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

pub(crate) fn parse_number(raw: &str) -> Result<Value, ExpressionError> {
    if raw.contains('.') {
        BigDecimal::from_str(raw)
            .map(Value::Decimal)
            .map_err(|_| ExpressionError::InvalidNumber(raw.to_string()))
    } else {
        raw.parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ExpressionError::InvalidNumber(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_multiplication_binds_tighter() {
        let expr = parse_expression("A + B * C").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Add, right, .. } => {
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Multiply, .. }));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn parentheses_override_precedence() {
        let expr = parse_expression("(A + B) * C").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Multiply, .. }));
    }

    #[test]
    fn collects_referenced_columns() {
        let expr = parse_expression("Price * Qty - [Discount Amount]").unwrap();
        assert_eq!(
            expr.referenced_columns(),
            vec!["Price", "Qty", "Discount Amount"]
        );
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_expression("A + B C").is_err());
        assert!(parse_expression("").is_err());
        assert!(parse_expression("A +").is_err());
    }
}
