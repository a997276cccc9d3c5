//! Bundles the run's mutable reporting state: the progress file, the
//! row-errors file and the error log, all rewritten through the status
//! writer after every meaningful change.

use chrono::{DateTime, Utc};
use engine_core::{error::StatusError, status::StatusWriter};
use model::state::{
    artifacts::{ErrorLogEntry, ErrorLogReport, LogLevel, RowErrorEntry, RowErrorsReport},
    run_state::{RunState, RunStatus, TableStatus},
};
use tracing::{error, info, warn};

pub struct RunRecorder {
    writer: StatusWriter,
    pub state: RunState,
    row_errors: RowErrorsReport,
    error_log: ErrorLogReport,
    now: fn() -> DateTime<Utc>,
}

impl RunRecorder {
    pub fn new(
        writer: StatusWriter,
        state: RunState,
        row_errors: RowErrorsReport,
        error_log: ErrorLogReport,
        now: fn() -> DateTime<Utc>,
    ) -> Self {
        RunRecorder {
            writer,
            state,
            row_errors,
            error_log,
            now,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now)()
    }

    pub fn run_id(&self) -> &str {
        self.writer.run_id()
    }

    pub fn write_progress(&mut self) -> Result<(), StatusError> {
        self.writer.write_progress(&mut self.state, (self.now)())
    }

    pub fn set_run_status(&mut self, status: RunStatus) -> Result<(), StatusError> {
        self.state.status = status;
        self.write_progress()
    }

    pub fn set_table_status(
        &mut self,
        source_table: &str,
        status: TableStatus,
    ) -> Result<(), StatusError> {
        if let Some(table) = self.state.table_mut(source_table) {
            table.status = status;
        }
        self.write_progress()
    }

    /// Captures a row failure with its full source snapshot and rewrites
    /// the row-errors artefact.
    pub fn record_row_error(
        &mut self,
        source_table: &str,
        target_table: &str,
        source_key: &str,
        message: &str,
        source_data: serde_json::Value,
    ) -> Result<(), StatusError> {
        warn!(table = source_table, key = source_key, message, "Row error");
        let at = (self.now)();
        self.row_errors.push(
            source_table,
            target_table,
            RowErrorEntry {
                source_key_value: source_key.to_string(),
                error_timestamp: at,
                error_message: message.to_string(),
                source_data,
            },
        );
        self.writer.write_row_errors(&mut self.row_errors, at)
    }

    /// Appends to the error log artefact and tees the entry into the
    /// process log.
    pub fn log(
        &mut self,
        level: LogLevel,
        table: Option<&str>,
        message: &str,
    ) -> Result<(), StatusError> {
        match level {
            LogLevel::Error => error!(table, "{message}"),
            LogLevel::Warning => warn!(table, "{message}"),
            _ => info!(table, "{message}"),
        }
        let at = (self.now)();
        self.error_log.push(ErrorLogEntry {
            timestamp: at,
            level,
            table: table.map(|t| t.to_string()),
            message: message.to_string(),
        });
        self.writer.write_error_log(&mut self.error_log, at)
    }

    pub fn row_error_count(&self, source_table: &str) -> u64 {
        self.row_errors
            .tables
            .iter()
            .find(|t| t.source_table == source_table)
            .map(|t| t.error_count)
            .unwrap_or(0)
    }
}
