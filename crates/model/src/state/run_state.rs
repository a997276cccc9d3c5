use crate::state::time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRunState {
    pub source_table: String,
    pub target_table: String,
    pub status: TableStatus,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub last_batch_key_value: Option<String>,
}

/// The Progress artefact: rewritten after every batch and table
/// transition. `processed_rows` is monotonically non-decreasing and
/// `last_batch_key_value` never moves backwards under the batch column's
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub migration_name: String,
    #[serde(with = "time")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "time")]
    pub last_updated_at: DateTime<Utc>,
    pub status: RunStatus,
    pub tables: Vec<TableRunState>,
}

impl RunState {
    pub fn new(migration_name: &str, started_at: DateTime<Utc>) -> Self {
        RunState {
            migration_name: migration_name.to_string(),
            started_at,
            last_updated_at: started_at,
            status: RunStatus::InProgress,
            tables: Vec::new(),
        }
    }

    pub fn table(&self, source_table: &str) -> Option<&TableRunState> {
        self.tables.iter().find(|t| t.source_table == source_table)
    }

    pub fn table_mut(&mut self, source_table: &str) -> Option<&mut TableRunState> {
        self.tables
            .iter_mut()
            .find(|t| t.source_table == source_table)
    }

    /// Registers a pending entry for a table unless one already exists
    /// (a resumed run keeps the loaded entry).
    pub fn ensure_table(&mut self, source_table: &str, target_table: &str) {
        if self.table(source_table).is_none() {
            self.tables.push(TableRunState {
                source_table: source_table.to_string(),
                target_table: target_table.to_string(),
                status: TableStatus::Pending,
                total_rows: 0,
                processed_rows: 0,
                last_batch_key_value: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ensure_table_is_idempotent() {
        let started = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut state = RunState::new("m", started);
        state.ensure_table("dbo.A", "dbo.A");
        state.table_mut("dbo.A").unwrap().processed_rows = 7;
        state.ensure_table("dbo.A", "dbo.A");
        assert_eq!(state.tables.len(), 1);
        assert_eq!(state.table("dbo.A").unwrap().processed_rows, 7);
    }

    #[test]
    fn progress_serializes_camel_case() {
        let started = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut state = RunState::new("m", started);
        state.ensure_table("dbo.A", "dbo.B");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["migrationName"], "m");
        assert_eq!(json["startedAt"], "2026-01-02T03:04:05");
        assert_eq!(json["tables"][0]["sourceTable"], "dbo.A");
        assert_eq!(json["tables"][0]["lastBatchKeyValue"], serde_json::Value::Null);
    }
}
