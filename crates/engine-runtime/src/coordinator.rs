//! Sequences tables in declared order, owns run-level target state
//! (constraints, stale key maps) and always leaves a resumable set of
//! artefacts behind.

use crate::{error::MigrationError, migrator::TableMigrator, recorder::RunRecorder};
use chrono::Utc;
use connectors::{
    adapter::{SourceAdapter, TargetAdapter},
    factory,
};
use engine_core::{
    keymap::{KeyMapStore, key_map_table_name},
    status::{StatusWriter, find_latest_run, make_run_id},
};
use engine_processing::{KeyMaps, RuntimeFns};
use model::{
    plan::{migration::MigrationPlan, table::IdentityMode},
    state::{
        artifacts::{ErrorLogReport, LogLevel, RowErrorsReport},
        run_state::{RunState, RunStatus, TableStatus},
    },
};
use std::{path::PathBuf, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct RunOptions {
    pub resume: bool,
    pub table_filter: bool,
    pub output_dir: PathBuf,
}

pub struct RunCoordinator {
    plan: MigrationPlan,
    options: RunOptions,
    fns: RuntimeFns,
}

impl RunCoordinator {
    pub fn new(plan: MigrationPlan, options: RunOptions) -> Self {
        RunCoordinator {
            plan,
            options,
            fns: RuntimeFns::default(),
        }
    }

    /// Opens both connections and drives the run to completion.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), MigrationError> {
        let timeout = Duration::from_secs(self.plan.query_timeout_secs);
        let source = factory::connect_source(&self.plan.source, timeout).await?;
        let target = factory::connect_target(&self.plan.target, timeout).await?;
        self.run_with(source.as_ref(), target.as_ref(), cancel).await
    }

    /// Runs against already-open adapters. Separated from [`run`] so the
    /// orchestration is testable without live databases.
    pub async fn run_with(
        &self,
        source: &dyn SourceAdapter,
        target: &dyn TargetAdapter,
        cancel: CancellationToken,
    ) -> Result<(), MigrationError> {
        let mut recorder = self.init_recorder()?;
        info!(
            migration = %self.plan.name,
            run_id = recorder.run_id(),
            resume = self.options.resume,
            "Starting migration run"
        );

        let mut keymaps = KeyMaps::new();
        let result = self
            .execute(source, target, &mut recorder, &mut keymaps, cancel)
            .await;

        // Final status writes are best-effort: a broken artefact disk
        // must not keep teardown from running.
        let (status, level, message) = match &result {
            Ok(()) => (RunStatus::Completed, LogLevel::Info, "migration completed".to_string()),
            Err(MigrationError::Cancelled) => (
                RunStatus::Failed,
                LogLevel::Info,
                "migration stopped by shutdown request; progress has been saved".to_string(),
            ),
            Err(err) => (
                RunStatus::Failed,
                LogLevel::Error,
                format!("migration failed: {err}"),
            ),
        };
        if let Err(err) = recorder.set_run_status(status) {
            tracing::warn!("failed to write final run status: {err}");
        }
        if let Err(err) = recorder.log(level, None, &message) {
            tracing::warn!("failed to write final error-log entry: {err}");
        }

        self.teardown(source, target, &mut recorder).await;
        result
    }

    async fn execute(
        &self,
        source: &dyn SourceAdapter,
        target: &dyn TargetAdapter,
        recorder: &mut RunRecorder,
        keymaps: &mut KeyMaps,
        cancel: CancellationToken,
    ) -> Result<(), MigrationError> {
        target.set_all_constraints_enabled(false).await?;
        if !self.options.resume {
            KeyMapStore::drop_all(target).await?;
        }

        for job in self.plan.ordered_jobs(self.options.table_filter) {
            if cancel.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }

            let source_name = job.source.to_string();
            let status = recorder
                .state
                .table(&source_name)
                .map(|t| t.status)
                .unwrap_or(TableStatus::Pending);

            if status == TableStatus::Completed {
                info!(table = %source_name, "Skipping completed table");
                // A completed generate-mode parent may still have its
                // key map on the target if the prior teardown could not
                // drop it; reload it for descendants when possible.
                if job.settings.identity_mode == IdentityMode::Generate {
                    let km_table = key_map_table_name(&job.source);
                    let existing = target.list_tables_with_prefix(&km_table).await?;
                    if existing.iter().any(|t| t == &km_table) {
                        let map = KeyMapStore::load(target, &job.source).await?;
                        keymaps.insert(source_name.clone(), map);
                    } else {
                        recorder.log(
                            LogLevel::Warning,
                            Some(&source_name),
                            "completed parent's key map is gone; descendants' keyLookups will miss",
                        )?;
                        keymaps.insert(source_name.clone(), Default::default());
                    }
                }
                continue;
            }

            let migrator = TableMigrator::new(
                source,
                target,
                job,
                self.plan.batch_size,
                self.fns,
                cancel.clone(),
            );
            migrator.run(recorder, keymaps).await?;
        }

        Ok(())
    }

    fn init_recorder(&self) -> Result<RunRecorder, MigrationError> {
        let dir = &self.options.output_dir;
        let (run_id, mut state, row_errors, error_log) = if self.options.resume {
            let resumed = find_latest_run(dir, &self.plan.name)
                .map_err(|err| MigrationError::ResumeImpossible(err.to_string()))?;
            let run_id = resumed.run_id.clone();
            let row_errors = resumed
                .row_errors
                .unwrap_or_else(|| RowErrorsReport::new(&self.plan.name, &run_id, Utc::now()));
            let error_log = resumed
                .error_log
                .unwrap_or_else(|| ErrorLogReport::new(&self.plan.name, &run_id, Utc::now()));
            (run_id, resumed.progress, row_errors, error_log)
        } else {
            let run_id = make_run_id(Utc::now());
            (
                run_id.clone(),
                RunState::new(&self.plan.name, Utc::now()),
                RowErrorsReport::new(&self.plan.name, &run_id, Utc::now()),
                ErrorLogReport::new(&self.plan.name, &run_id, Utc::now()),
            )
        };

        state.status = RunStatus::InProgress;
        for job in self.plan.ordered_jobs(self.options.table_filter) {
            state.ensure_table(&job.source.to_string(), &job.target.to_string());
        }

        let writer = StatusWriter::new(dir, &self.plan.name, &run_id);
        let mut recorder = RunRecorder::new(writer, state, row_errors, error_log, Utc::now);
        recorder.write_progress()?;
        Ok(recorder)
    }

    /// Teardown always runs; each step is individually fault-tolerant so
    /// one failure never suppresses the rest.
    async fn teardown(
        &self,
        source: &dyn SourceAdapter,
        target: &dyn TargetAdapter,
        recorder: &mut RunRecorder,
    ) {
        if let Err(err) = KeyMapStore::drop_all(target).await {
            let _ = recorder.log(
                LogLevel::Warning,
                None,
                &format!("teardown: failed to drop key-map tables: {err}"),
            );
        }
        if let Err(err) = target.set_all_constraints_enabled(true).await {
            let _ = recorder.log(
                LogLevel::Warning,
                None,
                &format!("teardown: failed to re-enable constraints: {err}"),
            );
        }
        if let Err(err) = source.close().await {
            let _ = recorder.log(
                LogLevel::Warning,
                None,
                &format!("teardown: failed to close source connection: {err}"),
            );
        }
        if let Err(err) = target.close().await {
            let _ = recorder.log(
                LogLevel::Warning,
                None,
                &format!("teardown: failed to close target connection: {err}"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{MockTarget, VecSource, job, row};
    use engine_core::status::TOOL_NAME;
    use model::{
        core::value::Value,
        plan::{
            connection::{AuthMode, ConnectionDescriptor, Provider},
            table::{ExistingDataAction, SimpleMapping, TableSettings},
            transform::Transformation,
        },
    };
    use std::fs;
    use tempfile::TempDir;

    fn descriptor(provider: Provider) -> ConnectionDescriptor {
        ConnectionDescriptor {
            provider,
            server: "s".into(),
            port: None,
            database: "d".into(),
            auth: AuthMode::SqlAuth,
            username: Some("u".into()),
            password: Some("p".into()),
        }
    }

    fn plan(tables: Vec<model::plan::table::TableJob>) -> MigrationPlan {
        MigrationPlan {
            name: "crm".into(),
            batch_size: 2,
            query_timeout_secs: 30,
            source: descriptor(Provider::MySql),
            target: descriptor(Provider::SqlServer),
            tables,
        }
    }

    fn options(dir: &TempDir, resume: bool) -> RunOptions {
        RunOptions {
            resume,
            table_filter: false,
            output_dir: dir.path().to_path_buf(),
        }
    }

    fn mapping(source: &str, target: &str) -> SimpleMapping {
        SimpleMapping {
            source: source.into(),
            target: target.into(),
            source_date_format: None,
        }
    }

    /// Parent generates identities, child remaps its foreign key through
    /// the parent's in-memory key map.
    #[tokio::test]
    async fn parent_key_map_flows_to_child() {
        let mut parent = job("dbo.Customers", 1);
        parent.batch_column = "CustID".into();
        parent.mappings = vec![
            mapping("CustID", "CustomerID"),
            mapping("Name", "CustomerName"),
        ];
        parent.settings = TableSettings {
            identity_mode: IdentityMode::Generate,
            identity_column: Some("CustomerID".into()),
            existing_data: ExistingDataAction::Append,
        };

        let mut child = job("dbo.Orders", 2);
        child.batch_column = "OrderID".into();
        child.mappings = vec![mapping("OrderID", "OrderID")];
        child.transformations = vec![Transformation::KeyLookup {
            source: "CustID".into(),
            target: "CustomerID".into(),
            parent_table: "dbo.Customers".into(),
            parent_key_column: "CustID".into(),
            null_default: Some("-1".into()),
        }];

        let source = VecSource::new(
            "CustID",
            vec![
                row(vec![("CustID", Value::Int(100)), ("Name", Value::Text("Ada".into())), ("OrderID", Value::Int(1))]),
                row(vec![("CustID", Value::Int(999)), ("Name", Value::Text("Eve".into())), ("OrderID", Value::Int(2))]),
            ],
        );
        let target = MockTarget::new(
            vec!["CustomerID", "CustomerName", "OrderID"],
            Some("CustomerID"),
        );

        let dir = tempfile::tempdir().unwrap();
        let coordinator = RunCoordinator::new(
            plan(vec![parent, child]),
            options(&dir, false),
        );
        coordinator
            .run_with(&source, &target, CancellationToken::new())
            .await
            .unwrap();

        // Parent inserted 100 -> 5001 and 999 -> 5002; the child rows
        // carry the remapped keys.
        let inserted = target.inserted();
        let child_rows: Vec<_> = inserted
            .iter()
            .filter(|r| !r.value_of("OrderID").is_null())
            .collect();
        assert_eq!(child_rows.len(), 2);
        assert_eq!(
            child_rows[0].value_of("CustomerID"),
            Value::Text("5001".into())
        );
        assert_eq!(
            child_rows[1].value_of("CustomerID"),
            Value::Text("5002".into())
        );

        // Teardown completeness: no key-map tables survive the run.
        assert!(target.tables_created().is_empty());
        // Constraints were disabled once and re-enabled once.
        assert_eq!(target.constraint_toggles(), vec![false, true]);

        // The progress artefact reports a completed run.
        let progress = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .find(|e| e.file_name().to_string_lossy().contains("_progress.json"))
            .unwrap();
        let raw = fs::read_to_string(progress.path()).unwrap();
        assert!(raw.contains("\"status\": \"Completed\""));
    }

    #[tokio::test]
    async fn failure_still_tears_down_and_leaves_resumable_state() {
        let mut t1 = job("dbo.A", 1);
        t1.mappings = vec![mapping("Id", "Id")];
        let mut t2 = job("dbo.B", 2);
        t2.mappings = vec![mapping("Id", "Id")];

        let source = VecSource::new("Id", vec![row(vec![("Id", Value::Int(1))])]);
        let target = MockTarget::new(vec!["Id"], None);
        target.fail_bulk_inserts();

        let dir = tempfile::tempdir().unwrap();
        let coordinator = RunCoordinator::new(plan(vec![t1, t2]), options(&dir, false));
        let err = coordinator
            .run_with(&source, &target, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::TableFailed { .. }));

        assert!(target.tables_created().is_empty());
        assert_eq!(target.constraint_toggles(), vec![false, true]);

        // Progress, row-errors and error-log artefacts all exist.
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("_progress.json")));
        assert!(names.iter().any(|n| n.ends_with("_errorlog.json")));
        let progress = names.iter().find(|n| n.ends_with("_progress.json")).unwrap();
        let raw = fs::read_to_string(dir.path().join(progress)).unwrap();
        assert!(raw.contains("\"status\": \"Failed\""));
    }

    #[tokio::test]
    async fn resume_skips_completed_tables_and_reuses_run_id() {
        let mut t1 = job("dbo.A", 1);
        t1.mappings = vec![mapping("Id", "Id")];
        let mut t2 = job("dbo.B", 2);
        t2.mappings = vec![mapping("Id", "Id")];
        let the_plan = plan(vec![t1, t2]);

        let dir = tempfile::tempdir().unwrap();

        // Seed a prior failed run: table A completed, table B pending.
        let run_id = "20260101_080000";
        let writer = StatusWriter::new(dir.path(), "crm", run_id);
        let mut prior = RunState::new("crm", Utc::now());
        prior.status = RunStatus::Failed;
        prior.ensure_table("dbo.A", "dbo.A");
        prior.ensure_table("dbo.B", "dbo.B");
        prior.table_mut("dbo.A").unwrap().status = TableStatus::Completed;
        prior.table_mut("dbo.A").unwrap().processed_rows = 1;
        writer.write_progress(&mut prior, Utc::now()).unwrap();

        let source = VecSource::new("Id", vec![row(vec![("Id", Value::Int(1))])]);
        let target = MockTarget::new(vec!["Id"], None);

        let coordinator = RunCoordinator::new(the_plan, options(&dir, true));
        coordinator
            .run_with(&source, &target, CancellationToken::new())
            .await
            .unwrap();

        // Only table B inserted; table A's count was untouched.
        assert_eq!(target.inserted().len(), 1);
        let raw = fs::read_to_string(
            dir.path()
                .join(format!("{TOOL_NAME}_crm_{run_id}_progress.json")),
        )
        .unwrap();
        let parsed: RunState = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.status, RunStatus::Completed);
        assert_eq!(parsed.table("dbo.A").unwrap().processed_rows, 1);
        assert_eq!(parsed.table("dbo.B").unwrap().status, TableStatus::Completed);
    }

    #[tokio::test]
    async fn resume_without_prior_run_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut t1 = job("dbo.A", 1);
        t1.mappings = vec![mapping("Id", "Id")];
        let source = VecSource::new("Id", vec![]);
        let target = MockTarget::new(vec!["Id"], None);
        let coordinator = RunCoordinator::new(plan(vec![t1]), options(&dir, true));
        let err = coordinator
            .run_with(&source, &target, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::ResumeImpossible(_)));
    }

    #[tokio::test]
    async fn inclusion_filter_restricts_tables() {
        let mut t1 = job("dbo.A", 1);
        t1.mappings = vec![mapping("Id", "Id")];
        let mut t2 = job("dbo.B", 2);
        t2.include = false;
        t2.mappings = vec![mapping("Id", "Id")];

        let source = VecSource::new("Id", vec![row(vec![("Id", Value::Int(1))])]);
        let target = MockTarget::new(vec!["Id"], None);

        let dir = tempfile::tempdir().unwrap();
        let coordinator = RunCoordinator::new(
            plan(vec![t1, t2]),
            RunOptions {
                resume: false,
                table_filter: true,
                output_dir: dir.path().to_path_buf(),
            },
        );
        coordinator
            .run_with(&source, &target, CancellationToken::new())
            .await
            .unwrap();

        // One table, one row.
        assert_eq!(target.inserted().len(), 1);
        let progress = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .find(|e| e.file_name().to_string_lossy().ends_with("_progress.json"))
            .unwrap();
        let parsed: RunState =
            serde_json::from_str(&fs::read_to_string(progress.path()).unwrap()).unwrap();
        assert!(parsed.table("dbo.B").is_none());
    }
}
