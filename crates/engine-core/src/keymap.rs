//! Persistent OldKey→NewKey maps for parents migrated with generated
//! identities. Each parent gets a dedicated table on the target, created
//! when the parent starts and dropped unconditionally at run end.

use crate::error::KeyMapError;
use connectors::adapter::TargetAdapter;
use model::plan::table::TableRef;
use std::collections::HashMap;
use tracing::{debug, info};

/// Every key-map table starts with this; cleanup drops all matches.
pub const KEY_MAP_PREFIX: &str = "drover_keymap_";

/// Keys are stored as NVARCHAR(450) so the primary key stays within the
/// index-key size limit.
pub const MAX_KEY_LEN: usize = 450;

const INSERT_CHUNK: usize = 1000;

/// Stable derivation of the key-map table name from the parent's source
/// identifier: dots become underscores under a fixed prefix.
pub fn key_map_table_name(parent: &TableRef) -> String {
    format!("{KEY_MAP_PREFIX}{}_{}", parent.schema, parent.table).replace('.', "_")
}

fn quote(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn escape(text: &str) -> String {
    text.replace('\'', "''")
}

pub(crate) fn create_sql(table_name: &str) -> String {
    format!(
        "CREATE TABLE {table} (\
         [old_key] NVARCHAR(450) NOT NULL PRIMARY KEY, \
         [new_key] NVARCHAR(450) NOT NULL); \
         CREATE INDEX {index} ON {table} ([new_key])",
        table = quote(table_name),
        index = quote(&format!("IX_{table_name}_new_key"))
    )
}

/// Multi-row insert with escaped literals; keys are user data, so quote
/// escaping guards against injection.
pub(crate) fn insert_sql(table_name: &str, pairs: &[(String, String)]) -> String {
    let values = pairs
        .iter()
        .map(|(old, new)| format!("(N'{}', N'{}')", escape(old), escape(new)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ([old_key], [new_key]) VALUES {values}",
        quote(table_name)
    )
}

pub struct KeyMapStore;

impl KeyMapStore {
    /// Creates the parent's key-map table, replacing any stale leftover.
    pub async fn create(
        target: &dyn TargetAdapter,
        parent: &TableRef,
    ) -> Result<(), KeyMapError> {
        let name = key_map_table_name(parent);
        if target
            .list_tables_with_prefix(&name)
            .await?
            .iter()
            .any(|t| t == &name)
        {
            target.drop_table(&name).await?;
        }
        info!(table = %name, "Creating key-map table");
        target.exec(&create_sql(&name)).await?;
        Ok(())
    }

    /// Appends a batch of (oldKey, newKey) pairs, chunked to the VALUES
    /// list limit.
    pub async fn append(
        target: &dyn TargetAdapter,
        parent: &TableRef,
        pairs: &[(String, String)],
    ) -> Result<(), KeyMapError> {
        if pairs.is_empty() {
            return Ok(());
        }
        if let Some((old, new)) = pairs
            .iter()
            .find(|(old, new)| old.len() > MAX_KEY_LEN || new.len() > MAX_KEY_LEN)
        {
            let offending = if old.len() > MAX_KEY_LEN { old } else { new };
            return Err(KeyMapError::KeyTooLong(offending.clone()));
        }

        let name = key_map_table_name(parent);
        for chunk in pairs.chunks(INSERT_CHUNK) {
            target.exec(&insert_sql(&name, chunk)).await?;
        }
        debug!(table = %name, rows = pairs.len(), "Persisted key mappings");
        Ok(())
    }

    /// Loads the parent's complete map into memory for descendants'
    /// keyLookup transformations.
    pub async fn load(
        target: &dyn TargetAdapter,
        parent: &TableRef,
    ) -> Result<HashMap<String, String>, KeyMapError> {
        let name = key_map_table_name(parent);
        let sql = format!("SELECT [old_key], [new_key] FROM {}", quote(&name));
        let rows = target.query_rows(&sql).await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            if let (Some(old), Some(new)) = (
                row.value_of("old_key").as_text(),
                row.value_of("new_key").as_text(),
            ) {
                map.insert(old, new);
            }
        }
        Ok(map)
    }

    /// Drops every key-map table on the target. Runs at start (stale
    /// leftovers) and unconditionally at teardown.
    pub async fn drop_all(target: &dyn TargetAdapter) -> Result<Vec<String>, KeyMapError> {
        let tables = target.list_tables_with_prefix(KEY_MAP_PREFIX).await?;
        for table in &tables {
            info!(table = %table, "Dropping key-map table");
            target.drop_table(table).await?;
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_derivation_flattens_dots() {
        let name = key_map_table_name(&TableRef::new("dbo", "Customers"));
        assert_eq!(name, "drover_keymap_dbo_Customers");
    }

    #[test]
    fn create_sql_has_pk_and_secondary_index() {
        let sql = create_sql("drover_keymap_dbo_Customers");
        assert!(sql.contains("[old_key] NVARCHAR(450) NOT NULL PRIMARY KEY"));
        assert!(sql.contains("CREATE INDEX [IX_drover_keymap_dbo_Customers_new_key]"));
    }

    #[test]
    fn insert_sql_escapes_user_keys() {
        let sql = insert_sql(
            "km",
            &[("O'Neil".to_string(), "5001".to_string())],
        );
        assert_eq!(
            sql,
            "INSERT INTO [km] ([old_key], [new_key]) VALUES (N'O''Neil', N'5001')"
        );
    }
}
