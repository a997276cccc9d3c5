use crate::core::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnValue {
    pub name: String,
    pub value: Value,
}

/// One row in flight through the pipeline. Column order is preserved as
/// read from the source (or as written by transformations).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowData {
    pub columns: Vec<ColumnValue>,
}

impl RowData {
    pub fn new(columns: Vec<ColumnValue>) -> Self {
        RowData { columns }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| &c.value)
    }

    /// Like [`get`](Self::get) but treats an absent column as SQL NULL.
    pub fn value_of(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Writes `value` into `name`, replacing an existing column or
    /// appending a new one.
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(col) = self
            .columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
        {
            col.value = value;
        } else {
            self.columns.push(ColumnValue {
                name: name.to_string(),
                value,
            });
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Full snapshot used for row-error reporting.
    pub fn to_json_map(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.value.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> RowData {
        RowData::new(vec![
            ColumnValue {
                name: "Id".into(),
                value: Value::Int(1),
            },
            ColumnValue {
                name: "Name".into(),
                value: Value::Text("Ada".into()),
            },
        ])
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let row = row();
        assert_eq!(row.get("name"), Some(&Value::Text("Ada".into())));
        assert_eq!(row.value_of("missing"), Value::Null);
    }

    #[test]
    fn set_replaces_existing_column() {
        let mut row = row();
        row.set("NAME", Value::Text("Grace".into()));
        assert_eq!(row.columns.len(), 2);
        assert_eq!(row.get("Name"), Some(&Value::Text("Grace".into())));
    }

    #[test]
    fn json_snapshot_preserves_nulls() {
        let mut row = row();
        row.set("Note", Value::Null);
        let json = row.to_json_map();
        assert_eq!(json["Id"], serde_json::json!(1));
        assert!(json["Note"].is_null());
    }
}
