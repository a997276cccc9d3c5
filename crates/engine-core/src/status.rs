//! Writes the persisted JSON artefacts external observers (dashboard,
//! operators) consume. Every write is a synchronous full-file
//! replacement so watchers always see a consistent snapshot.

use crate::error::StatusError;
use chrono::{DateTime, Utc};
use model::state::{
    artifacts::{ErrorLogReport, RowErrorsReport},
    run_state::RunState,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

pub const TOOL_NAME: &str = "drover";
const VALIDATION_SUBDIR: &str = "validation";

/// Formats a run id from the run's start instant; the format sorts
/// lexicographically in timestamp order, which resume discovery relies
/// on.
pub fn make_run_id(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

pub struct StatusWriter {
    dir: PathBuf,
    migration_name: String,
    run_id: String,
}

impl StatusWriter {
    pub fn new(dir: &Path, migration_name: &str, run_id: &str) -> Self {
        StatusWriter {
            dir: dir.to_path_buf(),
            migration_name: migration_name.to_string(),
            run_id: run_id.to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn artefact_path(&self, kind: &str) -> PathBuf {
        self.dir.join(format!(
            "{TOOL_NAME}_{}_{}_{kind}.json",
            self.migration_name, self.run_id
        ))
    }

    pub fn progress_path(&self) -> PathBuf {
        self.artefact_path("progress")
    }

    pub fn row_errors_path(&self) -> PathBuf {
        self.artefact_path("rowerrors")
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.artefact_path("errorlog")
    }

    pub fn validation_path(&self) -> PathBuf {
        self.dir.join(VALIDATION_SUBDIR).join(format!(
            "{TOOL_NAME}_{}_{}_validation.json",
            self.migration_name, self.run_id
        ))
    }

    /// Refreshes `lastUpdatedAt` and replaces the progress artefact.
    pub fn write_progress(
        &self,
        state: &mut RunState,
        now: DateTime<Utc>,
    ) -> Result<(), StatusError> {
        state.last_updated_at = now;
        self.replace_file(&self.progress_path(), state)
    }

    pub fn write_row_errors(
        &self,
        report: &mut RowErrorsReport,
        now: DateTime<Utc>,
    ) -> Result<(), StatusError> {
        report.generated_at = now;
        self.replace_file(&self.row_errors_path(), report)
    }

    pub fn write_error_log(
        &self,
        report: &mut ErrorLogReport,
        now: DateTime<Utc>,
    ) -> Result<(), StatusError> {
        report.generated_at = now;
        self.replace_file(&self.error_log_path(), report)
    }

    pub fn write_validation<T: Serialize>(&self, report: &T) -> Result<(), StatusError> {
        self.replace_file(&self.validation_path(), report)
    }

    fn replace_file<T: Serialize>(&self, path: &Path, payload: &T) -> Result<(), StatusError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StatusError::Write {
                path: path.display().to_string(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(payload)?;
        fs::write(path, json).map_err(|source| StatusError::Write {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Replaced status artefact");
        Ok(())
    }
}

/// Locates the newest prior run for `migration_name` in `dir` and
/// returns its run id with the loaded progress state. Row-error and
/// error-log artefacts from the same run are loaded when present.
pub fn find_latest_run(
    dir: &Path,
    migration_name: &str,
) -> Result<ResumedRun, StatusError> {
    let prefix = format!("{TOOL_NAME}_{migration_name}_");
    let suffix = "_progress.json";

    let mut run_ids: Vec<String> = Vec::new();
    let entries = fs::read_dir(dir).map_err(|source| StatusError::Read {
        path: dir.display().to_string(),
        source,
    })?;
    for entry in entries.flatten() {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if let Some(middle) = file_name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
        {
            run_ids.push(middle.to_string());
        }
    }

    // Run ids are timestamps, so the lexicographic max is the newest.
    run_ids.sort();
    let run_id = run_ids
        .pop()
        .ok_or_else(|| StatusError::NoPriorRun(migration_name.to_string()))?;

    let writer = StatusWriter::new(dir, migration_name, &run_id);
    let progress: RunState = read_json(&writer.progress_path())?;
    let row_errors: Option<RowErrorsReport> = read_json_opt(&writer.row_errors_path())?;
    let error_log: Option<ErrorLogReport> = read_json_opt(&writer.error_log_path())?;

    Ok(ResumedRun {
        run_id,
        progress,
        row_errors,
        error_log,
    })
}

pub struct ResumedRun {
    pub run_id: String,
    pub progress: RunState,
    pub row_errors: Option<RowErrorsReport>,
    pub error_log: Option<ErrorLogReport>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StatusError> {
    let raw = fs::read_to_string(path).map_err(|source| StatusError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StatusError> {
    if path.exists() {
        read_json(path).map(Some)
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use model::state::run_state::{RunStatus, TableStatus};
    use tempfile::tempdir;

    fn at(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, sec).unwrap()
    }

    #[test]
    fn filenames_follow_convention() {
        let writer = StatusWriter::new(Path::new("/tmp/out"), "crm", "20260701_100000");
        assert_eq!(
            writer.progress_path(),
            Path::new("/tmp/out/drover_crm_20260701_100000_progress.json")
        );
        assert_eq!(
            writer.validation_path(),
            Path::new("/tmp/out/validation/drover_crm_20260701_100000_validation.json")
        );
    }

    #[test]
    fn write_progress_refreshes_last_updated() {
        let dir = tempdir().unwrap();
        let writer = StatusWriter::new(dir.path(), "crm", "20260701_100000");
        let mut state = RunState::new("crm", at(0));
        state.ensure_table("dbo.A", "dbo.A");

        writer.write_progress(&mut state, at(30)).unwrap();
        assert_eq!(state.last_updated_at, at(30));

        let raw = fs::read_to_string(writer.progress_path()).unwrap();
        let parsed: RunState = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.last_updated_at, at(30));
        assert_eq!(parsed.status, RunStatus::InProgress);
    }

    #[test]
    fn resume_picks_the_newest_run() {
        let dir = tempdir().unwrap();
        for (run_id, processed) in [("20260701_090000", 2u64), ("20260701_110000", 4u64)] {
            let writer = StatusWriter::new(dir.path(), "crm", run_id);
            let mut state = RunState::new("crm", at(0));
            state.ensure_table("dbo.A", "dbo.A");
            let slot = state.table_mut("dbo.A").unwrap();
            slot.processed_rows = processed;
            slot.status = TableStatus::InProgress;
            writer.write_progress(&mut state, at(1)).unwrap();
        }

        let resumed = find_latest_run(dir.path(), "crm").unwrap();
        assert_eq!(resumed.run_id, "20260701_110000");
        assert_eq!(resumed.progress.table("dbo.A").unwrap().processed_rows, 4);
        assert!(resumed.row_errors.is_none());
    }

    #[test]
    fn resume_fails_without_prior_artefact() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            find_latest_run(dir.path(), "crm"),
            Err(StatusError::NoPriorRun(_))
        ));
    }

    #[test]
    fn other_migrations_are_ignored() {
        let dir = tempdir().unwrap();
        let writer = StatusWriter::new(dir.path(), "other", "20260701_090000");
        let mut state = RunState::new("other", at(0));
        writer.write_progress(&mut state, at(1)).unwrap();

        assert!(find_latest_run(dir.path(), "crm").is_err());
    }
}
