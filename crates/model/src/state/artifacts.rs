use crate::state::time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Error => "Error",
            LogLevel::Warning => "Warning",
            LogLevel::Info => "Info",
            LogLevel::Verbose => "Verbose",
            LogLevel::Debug => "Debug",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "verbose" => Ok(LogLevel::Verbose),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

/// One captured row failure: the transform or single-row insert error
/// plus a full snapshot of the source row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowErrorEntry {
    pub source_key_value: String,
    #[serde(with = "time")]
    pub error_timestamp: DateTime<Utc>,
    pub error_message: String,
    pub source_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRowErrors {
    pub source_table: String,
    pub target_table: String,
    pub error_count: u64,
    pub rows: Vec<RowErrorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowErrorsReport {
    pub migration_name: String,
    pub migration_run_id: String,
    #[serde(with = "time")]
    pub generated_at: DateTime<Utc>,
    pub total_row_errors: u64,
    pub tables: Vec<TableRowErrors>,
}

impl RowErrorsReport {
    pub fn new(migration_name: &str, run_id: &str, at: DateTime<Utc>) -> Self {
        RowErrorsReport {
            migration_name: migration_name.to_string(),
            migration_run_id: run_id.to_string(),
            generated_at: at,
            total_row_errors: 0,
            tables: Vec::new(),
        }
    }

    pub fn push(
        &mut self,
        source_table: &str,
        target_table: &str,
        entry: RowErrorEntry,
    ) {
        let idx = match self
            .tables
            .iter()
            .position(|t| t.source_table == source_table)
        {
            Some(idx) => idx,
            None => {
                self.tables.push(TableRowErrors {
                    source_table: source_table.to_string(),
                    target_table: target_table.to_string(),
                    error_count: 0,
                    rows: Vec::new(),
                });
                self.tables.len() - 1
            }
        };
        let slot = &mut self.tables[idx];
        slot.rows.push(entry);
        slot.error_count += 1;
        self.total_row_errors += 1;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    #[serde(with = "time")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogReport {
    pub migration_name: String,
    pub migration_run_id: String,
    #[serde(with = "time")]
    pub generated_at: DateTime<Utc>,
    pub total_entries: u64,
    pub entries: Vec<ErrorLogEntry>,
}

impl ErrorLogReport {
    pub fn new(migration_name: &str, run_id: &str, at: DateTime<Utc>) -> Self {
        ErrorLogReport {
            migration_name: migration_name.to_string(),
            migration_run_id: run_id.to_string(),
            generated_at: at,
            total_entries: 0,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: ErrorLogEntry) {
        self.entries.push(entry);
        self.total_entries += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn row_errors_aggregate_per_table() {
        let at = Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap();
        let mut report = RowErrorsReport::new("m", "20260506_070809", at);
        let entry = RowErrorEntry {
            source_key_value: "42".into(),
            error_timestamp: at,
            error_message: "boom".into(),
            source_data: serde_json::json!({"Id": 42}),
        };
        report.push("dbo.A", "dbo.A", entry.clone());
        report.push("dbo.A", "dbo.A", entry);
        assert_eq!(report.total_row_errors, 2);
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.tables[0].error_count, 2);
    }

    #[test]
    fn error_log_omits_absent_table() {
        let at = Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap();
        let mut report = ErrorLogReport::new("m", "r", at);
        report.push(ErrorLogEntry {
            timestamp: at,
            level: LogLevel::Warning,
            table: None,
            message: "teardown step failed".into(),
        });
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["entries"][0].get("table").is_none());
        assert_eq!(json["entries"][0]["level"], "Warning");
    }
}
