//! Database-specific SQL syntax: identifier quoting, literal rendering
//! and the keyset-pagination SELECT each source dialect understands.

use model::{core::value::Value, plan::table::TableRef};

pub trait Dialect: Send + Sync {
    /// Wraps a table or column name in the dialect's quoting characters.
    fn quote_identifier(&self, ident: &str) -> String;

    /// Renders a value as an escaped SQL literal for this dialect.
    fn literal(&self, value: &Value) -> String;

    /// Cheap liveness query used by connectivity checks.
    fn ping_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn quote_table(&self, table: &TableRef) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(&table.schema),
            self.quote_identifier(&table.table)
        )
    }

    /// One page of a keyset-paginated read: rows strictly greater than
    /// `after` in `batch_column` order, at most `size` rows.
    fn batch_select(
        &self,
        table: &TableRef,
        batch_column: &str,
        size: usize,
        after: Option<&Value>,
    ) -> String;

    /// Unpaged full-table read, still ordered for deterministic
    /// processing when an order column is known.
    fn select_all(&self, table: &TableRef, order_by: Option<&str>) -> String {
        let mut sql = format!("SELECT * FROM {}", self.quote_table(table));
        if let Some(col) = order_by {
            sql.push_str(&format!(" ORDER BY {}", self.quote_identifier(col)));
        }
        sql
    }

    fn where_after(&self, batch_column: &str, after: Option<&Value>) -> String {
        match after {
            Some(value) => format!(
                " WHERE {} > {}",
                self.quote_identifier(batch_column),
                self.literal(value)
            ),
            None => String::new(),
        }
    }
}

fn escape_quotes(text: &str) -> String {
    text.replace('\'', "''")
}

#[derive(Debug, Clone, Default)]
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn literal(&self, value: &Value) -> String {
        value.to_sql_literal()
    }

    fn batch_select(
        &self,
        table: &TableRef,
        batch_column: &str,
        size: usize,
        after: Option<&Value>,
    ) -> String {
        format!(
            "SELECT TOP {size} * FROM {}{} ORDER BY {}",
            self.quote_table(table),
            self.where_after(batch_column, after),
            self.quote_identifier(batch_column)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Text(text) => format!("'{}'", escape_quotes(text)),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::DateTime(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S")),
            other => other.to_sql_literal(),
        }
    }

    fn batch_select(
        &self,
        table: &TableRef,
        batch_column: &str,
        size: usize,
        after: Option<&Value>,
    ) -> String {
        format!(
            "SELECT * FROM {}{} ORDER BY {} LIMIT {size}",
            self.quote_table(table),
            self.where_after(batch_column, after),
            self.quote_identifier(batch_column)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn quote_identifier(&self, ident: &str) -> String {
        format!(r#""{}""#, ident.replace('"', "\"\""))
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Text(text) => format!("'{}'", escape_quotes(text)),
            Value::DateTime(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S")),
            Value::Bytes(bytes) => {
                let hex = bytes
                    .iter()
                    .fold(String::new(), |acc, b| acc + &format!("{b:02x}"));
                format!("'\\x{hex}'")
            }
            other => other.to_sql_literal(),
        }
    }

    fn batch_select(
        &self,
        table: &TableRef,
        batch_column: &str,
        size: usize,
        after: Option<&Value>,
    ) -> String {
        format!(
            "SELECT * FROM {}{} ORDER BY {} LIMIT {size}",
            self.quote_table(table),
            self.where_after(batch_column, after),
            self.quote_identifier(batch_column)
        )
    }
}

/// Oracle identifiers are left unquoted: quoting makes them
/// case-sensitive, and plans carry the case-insensitive names operators
/// actually type.
#[derive(Debug, Clone, Default)]
pub struct OracleDialect;

impl Dialect for OracleDialect {
    fn quote_identifier(&self, ident: &str) -> String {
        ident.to_string()
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Text(text) => format!("'{}'", escape_quotes(text)),
            Value::Date(d) => format!("DATE '{d}'"),
            Value::DateTime(ts) => {
                format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S"))
            }
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            other => other.to_sql_literal(),
        }
    }

    fn ping_query(&self) -> &'static str {
        "SELECT 1 FROM DUAL"
    }

    fn batch_select(
        &self,
        table: &TableRef,
        batch_column: &str,
        size: usize,
        after: Option<&Value>,
    ) -> String {
        format!(
            "SELECT * FROM {}{} ORDER BY {} FETCH FIRST {size} ROWS ONLY",
            self.quote_table(table),
            self.where_after(batch_column, after),
            self.quote_identifier(batch_column)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableRef {
        TableRef::new("dbo", "Orders")
    }

    #[test]
    fn sql_server_uses_top() {
        let sql = SqlServerDialect.batch_select(&table(), "Id", 50, Some(&Value::Int(10)));
        assert_eq!(
            sql,
            "SELECT TOP 50 * FROM [dbo].[Orders] WHERE [Id] > 10 ORDER BY [Id]"
        );
    }

    #[test]
    fn mysql_uses_limit() {
        let sql = MySqlDialect.batch_select(&table(), "Id", 50, Some(&Value::Int(10)));
        assert_eq!(
            sql,
            "SELECT * FROM `dbo`.`Orders` WHERE `Id` > 10 ORDER BY `Id` LIMIT 50"
        );
    }

    #[test]
    fn postgres_uses_limit() {
        let sql = PostgresDialect.batch_select(&table(), "Id", 50, None);
        assert_eq!(sql, r#"SELECT * FROM "dbo"."Orders" ORDER BY "Id" LIMIT 50"#);
    }

    #[test]
    fn oracle_uses_fetch_first() {
        let sql = OracleDialect.batch_select(&table(), "ID", 50, Some(&Value::Int(10)));
        assert_eq!(
            sql,
            "SELECT * FROM dbo.Orders WHERE ID > 10 ORDER BY ID FETCH FIRST 50 ROWS ONLY"
        );
    }

    #[test]
    fn text_keys_are_escaped() {
        let sql = MySqlDialect.batch_select(
            &table(),
            "Code",
            10,
            Some(&Value::Text("O'Neil".into())),
        );
        assert!(sql.contains("`Code` > 'O''Neil'"));
    }

    #[test]
    fn oracle_dates_use_typed_literals() {
        let d = Value::Date(chrono::NaiveDate::from_ymd_opt(2026, 2, 3).unwrap());
        assert_eq!(OracleDialect.literal(&d), "DATE '2026-02-03'");
    }
}
