//! In-memory adapter doubles shared by the migrator and coordinator
//! tests.

use crate::recorder::RunRecorder;
use async_trait::async_trait;
use chrono::Utc;
use connectors::{
    adapter::{SourceAdapter, TargetAdapter},
    error::DbError,
};
use engine_core::status::StatusWriter;
use model::{
    core::value::Value,
    plan::table::{TableJob, TableRef, TableSettings},
    records::row::{ColumnValue, RowData},
    state::{
        artifacts::{ErrorLogReport, RowErrorsReport},
        run_state::RunState,
    },
};
use std::{
    collections::HashMap,
    sync::Mutex,
};
use tempfile::TempDir;

pub fn row(columns: Vec<(&str, Value)>) -> RowData {
    RowData::new(
        columns
            .into_iter()
            .map(|(name, value)| ColumnValue {
                name: name.into(),
                value,
            })
            .collect(),
    )
}

pub fn job(source: &str, order: u32) -> TableJob {
    TableJob {
        order,
        source: TableRef::parse(source),
        target: TableRef::parse(source),
        batch_column: "Id".into(),
        include: true,
        mappings: vec![],
        transformations: vec![],
        settings: TableSettings::default(),
    }
}

pub fn recorder(migration: &str) -> (RunRecorder, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let run_id = "20260701_120000";
    let writer = StatusWriter::new(dir.path(), migration, run_id);
    let now = Utc::now();
    let recorder = RunRecorder::new(
        writer,
        RunState::new(migration, now),
        RowErrorsReport::new(migration, run_id, now),
        ErrorLogReport::new(migration, run_id, now),
        Utc::now,
    );
    (recorder, dir)
}

/// Source double: rows keyed on a configurable batch column.
pub struct VecSource {
    batch_column: String,
    rows: Vec<RowData>,
}

impl VecSource {
    pub fn new(batch_column: &str, rows: Vec<RowData>) -> Self {
        VecSource {
            batch_column: batch_column.to_string(),
            rows,
        }
    }

    fn sorted(&self) -> Vec<RowData> {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            a.value_of(&self.batch_column)
                .compare(&b.value_of(&self.batch_column))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows
    }
}

#[async_trait]
impl SourceAdapter for VecSource {
    async fn list_columns(&self, _table: &TableRef) -> Result<Vec<String>, DbError> {
        Ok(self
            .rows
            .first()
            .map(|r| r.column_names())
            .unwrap_or_default())
    }

    async fn table_exists(&self, _table: &TableRef) -> Result<bool, DbError> {
        Ok(true)
    }

    async fn row_count(&self, _table: &TableRef) -> Result<u64, DbError> {
        Ok(self.rows.len() as u64)
    }

    async fn distinct_count(&self, _table: &TableRef, column: &str) -> Result<u64, DbError> {
        let mut keys: Vec<String> = self
            .rows
            .iter()
            .filter_map(|r| r.value_of(column).as_text())
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys.len() as u64)
    }

    async fn read_batch(
        &self,
        _table: &TableRef,
        batch_column: &str,
        size: usize,
        after: Option<&Value>,
    ) -> Result<Vec<RowData>, DbError> {
        let rows = self
            .sorted()
            .into_iter()
            .filter(|r| match after {
                Some(floor) => {
                    r.value_of(batch_column).compare(floor)
                        == Some(std::cmp::Ordering::Greater)
                }
                None => true,
            })
            .take(size)
            .collect();
        Ok(rows)
    }

    async fn read_all(
        &self,
        _table: &TableRef,
        _order_by: Option<&str>,
    ) -> Result<Vec<RowData>, DbError> {
        Ok(self.sorted())
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        Ok(())
    }
}

#[derive(Default)]
struct TargetState {
    inserted: Vec<RowData>,
    insert_column_sets: Vec<Vec<String>>,
    executed_sql: Vec<String>,
    keymap_tables: Vec<String>,
    keymap_rows: HashMap<String, Vec<(String, String)>>,
    identity_toggles: Vec<bool>,
    trigger_toggles: Vec<bool>,
    constraint_toggles: Vec<bool>,
    delete_all_called: bool,
    next_identity: i64,
}

/// Target double recording every operation; key-map DDL/DML issued via
/// `exec` is interpreted so the key-map store round-trips.
pub struct MockTarget {
    columns: Vec<String>,
    identity: Option<String>,
    fail_insert_when: Mutex<Option<(String, Value)>>,
    fail_bulk: Mutex<bool>,
    fail_truncate: Mutex<bool>,
    state: Mutex<TargetState>,
}

impl MockTarget {
    pub fn new(columns: Vec<&str>, identity: Option<&str>) -> Self {
        MockTarget {
            columns: columns.into_iter().map(|c| c.to_string()).collect(),
            identity: identity.map(|c| c.to_string()),
            fail_insert_when: Mutex::new(None),
            fail_bulk: Mutex::new(false),
            fail_truncate: Mutex::new(false),
            state: Mutex::new(TargetState {
                next_identity: 5001,
                ..TargetState::default()
            }),
        }
    }

    pub fn fail_insert_when(&self, column: &str, value: Value) {
        *self.fail_insert_when.lock().unwrap() = Some((column.to_string(), value));
    }

    pub fn fail_bulk_inserts(&self) {
        *self.fail_bulk.lock().unwrap() = true;
    }

    pub fn fail_truncate(&self) {
        *self.fail_truncate.lock().unwrap() = true;
    }

    pub fn inserted(&self) -> Vec<RowData> {
        self.state.lock().unwrap().inserted.clone()
    }

    pub fn insert_column_sets(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().insert_column_sets.clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.state.lock().unwrap().executed_sql.clone()
    }

    pub fn tables_created(&self) -> Vec<String> {
        self.state.lock().unwrap().keymap_tables.clone()
    }

    pub fn keymap_rows(&self, table: &str) -> Vec<(String, String)> {
        self.state
            .lock()
            .unwrap()
            .keymap_rows
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn identity_insert_toggles(&self) -> Vec<bool> {
        self.state.lock().unwrap().identity_toggles.clone()
    }

    pub fn trigger_toggles(&self) -> Vec<bool> {
        self.state.lock().unwrap().trigger_toggles.clone()
    }

    pub fn constraint_toggles(&self) -> Vec<bool> {
        self.state.lock().unwrap().constraint_toggles.clone()
    }

    pub fn delete_all_called(&self) -> bool {
        self.state.lock().unwrap().delete_all_called
    }

    fn parse_keymap_insert(sql: &str, state: &mut TargetState) {
        // INSERT INTO [name] ([old_key], [new_key]) VALUES (N'a', N'b'), ...
        let Some(name) = sql
            .strip_prefix("INSERT INTO [")
            .and_then(|rest| rest.split(']').next())
        else {
            return;
        };
        let Some(values) = sql.split_once("VALUES ").map(|(_, v)| v) else {
            return;
        };
        let rows = state.keymap_rows.entry(name.to_string()).or_default();
        for pair in values.split("), (") {
            let pair = pair.trim_matches(|c| c == '(' || c == ')');
            let cells: Vec<String> = pair
                .split(", ")
                .map(|cell| {
                    cell.trim_start_matches("N'")
                        .trim_end_matches('\'')
                        .replace("''", "'")
                })
                .collect();
            if cells.len() == 2 {
                rows.push((cells[0].clone(), cells[1].clone()));
            }
        }
    }
}

#[async_trait]
impl TargetAdapter for MockTarget {
    async fn list_columns(&self, _table: &TableRef) -> Result<Vec<String>, DbError> {
        Ok(self.columns.clone())
    }

    async fn table_exists(&self, _table: &TableRef) -> Result<bool, DbError> {
        Ok(true)
    }

    async fn identity_column_of(&self, _table: &TableRef) -> Result<Option<String>, DbError> {
        Ok(self.identity.clone())
    }

    async fn exec(&self, sql: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.executed_sql.push(sql.to_string());
        if let Some(name) = sql
            .strip_prefix("CREATE TABLE [")
            .and_then(|rest| rest.split(']').next())
        {
            state.keymap_tables.push(name.to_string());
        } else if sql.starts_with("INSERT INTO [drover_keymap_") {
            Self::parse_keymap_insert(sql, &mut state);
        }
        Ok(())
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<RowData>, DbError> {
        let state = self.state.lock().unwrap();
        if let Some(name) = sql
            .strip_prefix("SELECT [old_key], [new_key] FROM [")
            .and_then(|rest| rest.split(']').next())
        {
            let rows = state
                .keymap_rows
                .get(name)
                .map(|pairs| {
                    pairs
                        .iter()
                        .map(|(old, new)| {
                            row(vec![
                                ("old_key", Value::Text(old.clone())),
                                ("new_key", Value::Text(new.clone())),
                            ])
                        })
                        .collect()
                })
                .unwrap_or_default();
            return Ok(rows);
        }
        Ok(vec![])
    }

    async fn insert_returning_identity(
        &self,
        _table: &TableRef,
        columns: &[String],
        row: &RowData,
    ) -> Result<Value, DbError> {
        if let Some((column, value)) = self.fail_insert_when.lock().unwrap().as_ref() {
            if &row.value_of(column) == value {
                return Err(DbError::Unexpected("constraint violation".into()));
            }
        }
        let mut state = self.state.lock().unwrap();
        state.insert_column_sets.push(columns.to_vec());
        state.inserted.push(row.clone());
        let key = state.next_identity;
        state.next_identity += 1;
        Ok(Value::Int(key))
    }

    async fn insert_one(
        &self,
        _table: &TableRef,
        columns: &[String],
        row: &RowData,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.insert_column_sets.push(columns.to_vec());
        state.inserted.push(row.clone());
        Ok(())
    }

    async fn bulk_insert(
        &self,
        _table: &TableRef,
        columns: &[String],
        rows: &[RowData],
    ) -> Result<(), DbError> {
        if *self.fail_bulk.lock().unwrap() {
            return Err(DbError::Unexpected("bulk insert rejected".into()));
        }
        let mut state = self.state.lock().unwrap();
        state.insert_column_sets.push(columns.to_vec());
        state.inserted.extend(rows.iter().cloned());
        Ok(())
    }

    async fn set_identity_insert(&self, _table: &TableRef, on: bool) -> Result<(), DbError> {
        self.state.lock().unwrap().identity_toggles.push(on);
        Ok(())
    }

    async fn set_triggers_enabled(
        &self,
        _table: &TableRef,
        enabled: bool,
    ) -> Result<(), DbError> {
        self.state.lock().unwrap().trigger_toggles.push(enabled);
        Ok(())
    }

    async fn set_all_constraints_enabled(&self, enabled: bool) -> Result<(), DbError> {
        self.state.lock().unwrap().constraint_toggles.push(enabled);
        Ok(())
    }

    async fn truncate_table(&self, _table: &TableRef) -> Result<(), DbError> {
        if *self.fail_truncate.lock().unwrap() {
            return Err(DbError::Unexpected(
                "cannot truncate a table referenced by a foreign key".into(),
            ));
        }
        Ok(())
    }

    async fn delete_all_rows(&self, _table: &TableRef) -> Result<(), DbError> {
        self.state.lock().unwrap().delete_all_called = true;
        Ok(())
    }

    async fn list_tables_with_prefix(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .keymap_tables
            .iter()
            .filter(|t| t.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn drop_table(&self, name: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.keymap_tables.retain(|t| t != name);
        state.keymap_rows.remove(name);
        Ok(())
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        Ok(())
    }
}
