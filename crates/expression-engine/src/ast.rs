use model::core::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Column names referenced anywhere in the expression, for
    /// validation against the source schema.
    pub fn referenced_columns(&self) -> Vec<&str> {
        match self {
            Expr::Literal(_) => vec![],
            Expr::Column(name) => vec![name.as_str()],
            Expr::Binary { left, right, .. } => {
                let mut cols = left.referenced_columns();
                cols.extend(right.referenced_columns());
                cols
            }
        }
    }
}
