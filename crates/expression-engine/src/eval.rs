use crate::ast::{BinaryOp, Expr};
use bigdecimal::BigDecimal;
use model::{core::value::Value, records::row::RowData};

/// Evaluates an expression against a row. Returns `None` when any
/// referenced column is NULL or absent, or when an operation is not
/// defined for the operand types; the caller maps `None` to the
/// transformation's null default.
pub fn evaluate(expr: &Expr, row: &RowData) -> Option<Value> {
    match expr {
        Expr::Literal(Value::Null) => None,
        Expr::Literal(value) => Some(value.clone()),
        Expr::Column(name) => match row.value_of(name) {
            Value::Null => None,
            value => Some(value),
        },
        Expr::Binary { left, op, right } => {
            let left = evaluate(left, row)?;
            let right = evaluate(right, row)?;
            apply(&left, *op, &right)
        }
    }
}

fn apply(left: &Value, op: BinaryOp, right: &Value) -> Option<Value> {
    // Text on either side of `+` means concatenation.
    if op == BinaryOp::Add
        && (matches!(left, Value::Text(_)) || matches!(right, Value::Text(_)))
    {
        return Some(Value::Text(format!(
            "{}{}",
            left.as_text()?,
            right.as_text()?
        )));
    }

    match (left, right) {
        (Value::Int(l), Value::Int(r)) if op != BinaryOp::Divide => Some(match op {
            BinaryOp::Add => Value::Int(l + r),
            BinaryOp::Subtract => Value::Int(l - r),
            BinaryOp::Multiply => Value::Int(l * r),
            BinaryOp::Divide => unreachable!(),
        }),
        _ => {
            let l = left.as_big_decimal()?;
            let r = right.as_big_decimal()?;
            let result = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Subtract => l - r,
                BinaryOp::Multiply => l * r,
                BinaryOp::Divide => {
                    if r == BigDecimal::from(0) {
                        return None;
                    }
                    l / r
                }
            };
            Some(Value::Decimal(result.normalized()))
        }
    }
}
