//! Migrates one table: fetch, transform, insert, record progress.
//! Row-level failures are captured and never abort the table; batch and
//! DDL failures are fatal for the table and propagate to the
//! coordinator.

use crate::{error::MigrationError, recorder::RunRecorder};
use connectors::adapter::{SourceAdapter, TargetAdapter};
use engine_core::{cursor::BatchCursor, keymap::KeyMapStore};
use engine_processing::{KeyMaps, RowTransformer, RuntimeFns};
use model::{
    core::value::Value,
    plan::table::{ExistingDataAction, IdentityMode, TableJob},
    records::row::RowData,
    state::{artifacts::LogLevel, run_state::TableStatus},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct TableMigrator<'a> {
    source: &'a dyn SourceAdapter,
    target: &'a dyn TargetAdapter,
    job: &'a TableJob,
    batch_size: usize,
    fns: RuntimeFns,
    cancel: CancellationToken,
}

enum InsertPolicy {
    /// Row-by-row inserts capturing each generated key.
    GenerateCapture { identity: String },
    /// Bulk insert under explicit identity insert.
    PreserveIdentity,
    /// Plain bulk insert.
    Bulk,
}

impl<'a> TableMigrator<'a> {
    pub fn new(
        source: &'a dyn SourceAdapter,
        target: &'a dyn TargetAdapter,
        job: &'a TableJob,
        batch_size: usize,
        fns: RuntimeFns,
        cancel: CancellationToken,
    ) -> Self {
        TableMigrator {
            source,
            target,
            job,
            batch_size,
            fns,
            cancel,
        }
    }

    pub async fn run(
        &self,
        recorder: &mut RunRecorder,
        keymaps: &mut KeyMaps,
    ) -> Result<(), MigrationError> {
        let table_name = self.job.source.to_string();
        let started = std::time::Instant::now();
        info!(table = %table_name, "Starting table migration");

        match self.execute(recorder, keymaps).await {
            Ok(()) => {
                recorder.set_table_status(&table_name, TableStatus::Completed)?;
                info!(
                    table = %table_name,
                    duration_secs = started.elapsed().as_secs_f64(),
                    "Table migration completed"
                );
                Ok(())
            }
            Err(MigrationError::Cancelled) => Err(MigrationError::Cancelled),
            Err(err) => {
                recorder.set_table_status(&table_name, TableStatus::Failed)?;
                recorder.log(
                    LogLevel::Error,
                    Some(&table_name),
                    &format!("table migration failed: {err}"),
                )?;
                Err(MigrationError::TableFailed {
                    table: table_name,
                    source: Box::new(err),
                })
            }
        }
    }

    async fn execute(
        &self,
        recorder: &mut RunRecorder,
        keymaps: &mut KeyMaps,
    ) -> Result<(), MigrationError> {
        let source_name = self.job.source.to_string();

        // Resume check happens before the state transition so the
        // persisted cursor position survives the rewrite.
        let (resume_key, mut processed) = self.resume_state(recorder);
        recorder.set_table_status(&source_name, TableStatus::InProgress)?;

        // Total row count is best-effort progress garnish.
        match self.source.row_count(&self.job.source).await {
            Ok(total) => {
                if let Some(slot) = recorder.state.table_mut(&source_name) {
                    slot.total_rows = total;
                }
                recorder.write_progress()?;
            }
            Err(err) => {
                recorder.log(
                    LogLevel::Warning,
                    Some(&source_name),
                    &format!("could not count source rows: {err}"),
                )?;
            }
        }

        if self.job.settings.existing_data == ExistingDataAction::Truncate
            && resume_key.is_none()
        {
            self.truncate_target(recorder).await?;
        }

        self.target.set_triggers_enabled(&self.job.target, false).await?;

        let result = self
            .page_loop(recorder, keymaps, resume_key, &mut processed)
            .await;

        // Scoped release: triggers come back on every exit path.
        if let Err(err) = self.target.set_triggers_enabled(&self.job.target, true).await {
            recorder.log(
                LogLevel::Warning,
                Some(&source_name),
                &format!("failed to re-enable triggers: {err}"),
            )?;
        }
        result?;

        // The finished parent's map is loaded once and handed to every
        // descendant through `keymaps`.
        if self.job.settings.identity_mode == IdentityMode::Generate {
            let map = KeyMapStore::load(self.target, &self.job.source).await?;
            keymaps.insert(source_name, map);
        }

        Ok(())
    }

    fn resume_state(&self, recorder: &RunRecorder) -> (Option<Value>, u64) {
        let Some(slot) = recorder.state.table(&self.job.source.to_string()) else {
            return (None, 0);
        };
        let key = slot.last_batch_key_value.as_ref().map(|raw| {
            // Numeric batch keys compare numerically on the source side.
            raw.parse::<i64>()
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(raw.clone()))
        });
        (key, slot.processed_rows)
    }

    async fn truncate_target(&self, recorder: &mut RunRecorder) -> Result<(), MigrationError> {
        let source_name = self.job.source.to_string();
        match self.target.truncate_table(&self.job.target).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // Referential integrity blocks TRUNCATE; a full DELETE
                // still empties the table.
                recorder.log(
                    LogLevel::Warning,
                    Some(&source_name),
                    &format!("truncate failed ({err}), falling back to delete"),
                )?;
                self.target.delete_all_rows(&self.job.target).await?;
                Ok(())
            }
        }
    }

    async fn page_loop(
        &self,
        recorder: &mut RunRecorder,
        keymaps: &KeyMaps,
        resume_key: Option<Value>,
        processed: &mut u64,
    ) -> Result<(), MigrationError> {
        let source_name = self.job.source.to_string();
        let target_name = self.job.target.to_string();

        if self.job.settings.identity_mode == IdentityMode::Generate
            && resume_key.is_none()
        {
            KeyMapStore::create(self.target, &self.job.source).await?;
        }

        let policy = self.resolve_policy().await?;
        let insert_columns = self.insert_columns(&policy).await?;
        let old_key_column = self.old_key_column().await?;

        let transformer = RowTransformer::compile(self.job, self.fns)?;
        let mut cursor = BatchCursor::new(
            self.source,
            self.job.source.clone(),
            &self.job.batch_column,
            self.batch_size,
            resume_key,
        );

        loop {
            // Cooperative cancel lands on batch boundaries only, so the
            // persisted cursor value stays truthful.
            if self.cancel.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }

            let Some(page) = cursor.next_page().await? else {
                break;
            };
            let page_len = page.len() as u64;

            let mut outgoing: Vec<(String, RowData, RowData)> = Vec::with_capacity(page.len());
            for source_row in &page {
                let tracking_key = source_row
                    .value_of(&self.job.batch_column)
                    .as_text()
                    .unwrap_or_else(|| "<null>".to_string());
                match transformer.apply(source_row, keymaps) {
                    Ok(outcome) => {
                        for warning in &outcome.warnings {
                            recorder.log(LogLevel::Warning, Some(&source_name), warning)?;
                        }
                        outgoing.push((tracking_key, source_row.clone(), outcome.row));
                    }
                    Err(err) => {
                        recorder.record_row_error(
                            &source_name,
                            &target_name,
                            &tracking_key,
                            &err.to_string(),
                            source_row.to_json_map(),
                        )?;
                    }
                }
            }

            let pending_keys = self
                .insert_page(recorder, &policy, &insert_columns, &old_key_column, outgoing)
                .await?;

            KeyMapStore::append(self.target, &self.job.source, &pending_keys).await?;

            *processed += page_len;
            let last_key = cursor.last_key().and_then(|v| v.as_text());
            if let Some(slot) = recorder.state.table_mut(&source_name) {
                slot.processed_rows = *processed;
                if last_key.is_some() {
                    slot.last_batch_key_value = last_key;
                }
            }
            recorder.write_progress()?;
        }

        Ok(())
    }

    /// Inserts one transformed page under the table's policy and returns
    /// the (oldKey, newKey) pairs captured for the key map.
    async fn insert_page(
        &self,
        recorder: &mut RunRecorder,
        policy: &InsertPolicy,
        insert_columns: &[String],
        old_key_column: &Option<String>,
        rows: Vec<(String, RowData, RowData)>,
    ) -> Result<Vec<(String, String)>, MigrationError> {
        let source_name = self.job.source.to_string();
        let target_name = self.job.target.to_string();
        let mut pending_keys = Vec::new();

        match policy {
            InsertPolicy::GenerateCapture { .. } => {
                for (tracking_key, source_row, target_row) in rows {
                    match self
                        .target
                        .insert_returning_identity(&self.job.target, insert_columns, &target_row)
                        .await
                    {
                        Ok(new_key) => {
                            let old_key = old_key_column
                                .as_deref()
                                .map(|col| source_row.value_of(col))
                                .and_then(|v| v.as_text())
                                .unwrap_or_else(|| tracking_key.clone());
                            if let Some(new_key) = new_key.as_text() {
                                pending_keys.push((old_key, new_key));
                            }
                        }
                        Err(err) if err.is_timeout() => return Err(err.into()),
                        Err(err) => {
                            recorder.record_row_error(
                                &source_name,
                                &target_name,
                                &tracking_key,
                                &err.to_string(),
                                source_row.to_json_map(),
                            )?;
                        }
                    }
                }
            }
            InsertPolicy::PreserveIdentity => {
                let batch: Vec<RowData> =
                    rows.into_iter().map(|(_, _, target)| target).collect();
                self.target
                    .set_identity_insert(&self.job.target, true)
                    .await?;
                let insert_result = self
                    .target
                    .bulk_insert(&self.job.target, insert_columns, &batch)
                    .await;
                // Identity insert is session state; always switch it back.
                let toggle_result =
                    self.target.set_identity_insert(&self.job.target, false).await;
                insert_result?;
                toggle_result?;
            }
            InsertPolicy::Bulk => {
                let batch: Vec<RowData> =
                    rows.into_iter().map(|(_, _, target)| target).collect();
                self.target
                    .bulk_insert(&self.job.target, insert_columns, &batch)
                    .await?;
            }
        }

        Ok(pending_keys)
    }

    async fn resolve_policy(&self) -> Result<InsertPolicy, MigrationError> {
        let identity = match &self.job.settings.identity_column {
            Some(column) => Some(column.clone()),
            None => self.target.identity_column_of(&self.job.target).await?,
        };
        Ok(match (self.job.settings.identity_mode, identity) {
            (IdentityMode::Generate, Some(identity)) => {
                InsertPolicy::GenerateCapture { identity }
            }
            (IdentityMode::Preserve, Some(_)) => InsertPolicy::PreserveIdentity,
            (IdentityMode::Generate, None) => {
                warn!(
                    table = %self.job.target,
                    "identity mode is generate but the target has no identity column"
                );
                InsertPolicy::Bulk
            }
            (IdentityMode::Preserve, None) => InsertPolicy::Bulk,
        })
    }

    /// The insert column set: target columns the program actually
    /// produces, in program order, with the identity column dropped when
    /// the database generates it.
    async fn insert_columns(&self, policy: &InsertPolicy) -> Result<Vec<String>, MigrationError> {
        let target_columns = self.target.list_columns(&self.job.target).await?;

        let mut produced: Vec<String> = Vec::new();
        for mapping in self.job.unclaimed_mappings() {
            produced.push(mapping.target.clone());
        }
        for transformation in &self.job.transformations {
            for column in transformation.target_columns() {
                produced.push(column.to_string());
            }
        }

        let mut columns: Vec<String> = Vec::new();
        for candidate in produced {
            let exists = target_columns
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&candidate));
            let already = columns.iter().any(|c| c.eq_ignore_ascii_case(&candidate));
            if exists && !already {
                columns.push(candidate);
            }
        }

        if let InsertPolicy::GenerateCapture { identity } = policy {
            columns.retain(|c| !c.eq_ignore_ascii_case(identity));
        }
        Ok(columns)
    }

    /// The source column whose values become the key map's old keys: the
    /// column mapped onto the identity column, falling back to the batch
    /// column.
    async fn old_key_column(&self) -> Result<Option<String>, MigrationError> {
        if self.job.settings.identity_mode != IdentityMode::Generate {
            return Ok(None);
        }
        let identity = match &self.job.settings.identity_column {
            Some(column) => Some(column.clone()),
            None => self.target.identity_column_of(&self.job.target).await?,
        };
        let Some(identity) = identity else {
            return Ok(None);
        };
        Ok(Some(
            self.job
                .mappings
                .iter()
                .find(|m| m.target.eq_ignore_ascii_case(&identity))
                .map(|m| m.source.clone())
                .unwrap_or_else(|| self.job.batch_column.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{MockTarget, VecSource, job, recorder, row};
    use engine_core::keymap::key_map_table_name;
    use model::plan::table::{SimpleMapping, TableSettings};
    use model::state::run_state::TableStatus;

    fn fns() -> RuntimeFns {
        RuntimeFns::default()
    }

    #[tokio::test]
    async fn simple_copy_preserve_keys() {
        // Scenario: two country rows, straight column mappings, default
        // identity mode, no identity column on the target.
        let source = VecSource::new(
            "Code",
            vec![
                row(vec![("Code", Value::Text("US".into())), ("Name", Value::Text("United States".into()))]),
                row(vec![("Code", Value::Text("CA".into())), ("Name", Value::Text("Canada".into()))]),
            ],
        );
        let target = MockTarget::new(vec!["CountryCode", "CountryName"], None);
        let mut job = job("dbo.Countries", 1);
        job.batch_column = "Code".into();
        job.mappings = vec![
            SimpleMapping { source: "Code".into(), target: "CountryCode".into(), source_date_format: None },
            SimpleMapping { source: "Name".into(), target: "CountryName".into(), source_date_format: None },
        ];

        let (mut rec, _dir) = recorder("countries");
        rec.state.ensure_table("dbo.Countries", "dbo.Countries");
        let migrator = TableMigrator::new(
            &source, &target, &job, 10, fns(), CancellationToken::new(),
        );
        let mut keymaps = KeyMaps::new();
        migrator.run(&mut rec, &mut keymaps).await.unwrap();

        let inserted = target.inserted();
        assert_eq!(inserted.len(), 2);
        // Pages come back in batch-column order: CA before US.
        assert_eq!(inserted[0].value_of("CountryCode"), Value::Text("CA".into()));
        assert_eq!(inserted[1].value_of("CountryCode"), Value::Text("US".into()));

        let slot = rec.state.table("dbo.Countries").unwrap();
        assert_eq!(slot.status, TableStatus::Completed);
        assert_eq!(slot.processed_rows, 2);
        assert_eq!(slot.last_batch_key_value.as_deref(), Some("US"));
        // Preserve mode with no identity: no key map and no identity
        // column in the insert set.
        assert!(keymaps.is_empty());
        assert!(target.executed_sql().iter().all(|s| !s.contains("IDENTITY_INSERT")));
    }

    #[tokio::test]
    async fn generate_mode_never_inserts_identity_and_records_key_map() {
        let source = VecSource::new(
            "CustID",
            vec![
                row(vec![("CustID", Value::Int(100)), ("Name", Value::Text("Ada".into()))]),
                row(vec![("CustID", Value::Int(101)), ("Name", Value::Text("Grace".into()))]),
            ],
        );
        let target = MockTarget::new(
            vec!["CustomerID", "CustomerName"],
            Some("CustomerID"),
        );
        let mut job = job("dbo.Customers", 1);
        job.batch_column = "CustID".into();
        job.mappings = vec![
            SimpleMapping { source: "CustID".into(), target: "CustomerID".into(), source_date_format: None },
            SimpleMapping { source: "Name".into(), target: "CustomerName".into(), source_date_format: None },
        ];
        job.settings = TableSettings {
            identity_mode: IdentityMode::Generate,
            identity_column: Some("CustomerID".into()),
            existing_data: ExistingDataAction::Append,
        };

        let (mut rec, _dir) = recorder("customers");
        rec.state.ensure_table("dbo.Customers", "dbo.Customers");
        let migrator = TableMigrator::new(
            &source, &target, &job, 10, fns(), CancellationToken::new(),
        );
        let mut keymaps = KeyMaps::new();
        migrator.run(&mut rec, &mut keymaps).await.unwrap();

        // Insert column invariant: the identity column is never named.
        for columns in target.insert_column_sets() {
            assert!(!columns.iter().any(|c| c.eq_ignore_ascii_case("CustomerID")));
        }

        // The key map landed on the target and is loaded for children.
        let km_table = key_map_table_name(&job.source);
        assert!(target.tables_created().contains(&km_table));
        let map = keymaps.get("dbo.Customers").unwrap();
        assert_eq!(map.get("100"), Some(&"5001".to_string()));
        assert_eq!(map.get("101"), Some(&"5002".to_string()));
    }

    #[tokio::test]
    async fn preserve_mode_scopes_identity_insert() {
        let source = VecSource::new(
            "Id",
            vec![row(vec![("Id", Value::Int(7)), ("Name", Value::Text("x".into()))])],
        );
        let target = MockTarget::new(vec!["Id", "Name"], Some("Id"));
        let mut job = job("dbo.Items", 1);
        job.mappings = vec![
            SimpleMapping { source: "Id".into(), target: "Id".into(), source_date_format: None },
            SimpleMapping { source: "Name".into(), target: "Name".into(), source_date_format: None },
        ];

        let (mut rec, _dir) = recorder("items");
        rec.state.ensure_table("dbo.Items", "dbo.Items");
        let migrator = TableMigrator::new(
            &source, &target, &job, 10, fns(), CancellationToken::new(),
        );
        migrator.run(&mut rec, &mut KeyMaps::new()).await.unwrap();

        let toggles = target.identity_insert_toggles();
        assert_eq!(toggles, vec![true, false]);
        let inserted = target.inserted();
        assert_eq!(inserted[0].value_of("Id"), Value::Int(7));
    }

    #[tokio::test]
    async fn row_insert_failures_are_isolated() {
        let source = VecSource::new(
            "CustID",
            vec![
                row(vec![("CustID", Value::Int(1))]),
                row(vec![("CustID", Value::Int(2))]),
                row(vec![("CustID", Value::Int(3))]),
            ],
        );
        let target = MockTarget::new(vec!["CustomerID", "LegacyID"], Some("CustomerID"));
        target.fail_insert_when("LegacyID", Value::Int(2));
        let mut job = job("dbo.Customers", 1);
        job.batch_column = "CustID".into();
        job.mappings = vec![SimpleMapping {
            source: "CustID".into(),
            target: "LegacyID".into(),
            source_date_format: None,
        }];
        job.settings = TableSettings {
            identity_mode: IdentityMode::Generate,
            identity_column: Some("CustomerID".into()),
            existing_data: ExistingDataAction::Append,
        };

        let (mut rec, _dir) = recorder("customers");
        rec.state.ensure_table("dbo.Customers", "dbo.Customers");
        let migrator = TableMigrator::new(
            &source, &target, &job, 2, fns(), CancellationToken::new(),
        );
        migrator.run(&mut rec, &mut KeyMaps::new()).await.unwrap();

        // N - K rows in the target, K row errors recorded.
        assert_eq!(target.inserted().len(), 2);
        assert_eq!(rec.row_error_count("dbo.Customers"), 1);
        let slot = rec.state.table("dbo.Customers").unwrap();
        assert_eq!(slot.status, TableStatus::Completed);
        assert_eq!(slot.processed_rows, 3);
    }

    #[tokio::test]
    async fn bulk_insert_failure_is_fatal_for_the_table() {
        let source = VecSource::new(
            "Id",
            vec![row(vec![("Id", Value::Int(1)), ("Name", Value::Text("x".into()))])],
        );
        let target = MockTarget::new(vec!["Id", "Name"], None);
        target.fail_bulk_inserts();
        let mut job = job("dbo.Items", 1);
        job.mappings = vec![SimpleMapping {
            source: "Name".into(),
            target: "Name".into(),
            source_date_format: None,
        }];

        let (mut rec, _dir) = recorder("items");
        rec.state.ensure_table("dbo.Items", "dbo.Items");
        let migrator = TableMigrator::new(
            &source, &target, &job, 10, fns(), CancellationToken::new(),
        );
        let err = migrator.run(&mut rec, &mut KeyMaps::new()).await.unwrap_err();
        assert!(matches!(err, MigrationError::TableFailed { .. }));
        assert_eq!(
            rec.state.table("dbo.Items").unwrap().status,
            TableStatus::Failed
        );
        // Triggers were re-enabled on the error path too.
        assert_eq!(target.trigger_toggles(), vec![false, true]);
    }

    #[tokio::test]
    async fn resume_continues_after_persisted_key() {
        let source = VecSource::new(
            "Id",
            (1..=5)
                .map(|id| row(vec![("Id", Value::Int(id)), ("Name", Value::Text(format!("n{id}")))]))
                .collect(),
        );
        let target = MockTarget::new(vec!["Id", "Name"], None);
        let mut job = job("dbo.Seq", 1);
        job.mappings = vec![
            SimpleMapping { source: "Id".into(), target: "Id".into(), source_date_format: None },
            SimpleMapping { source: "Name".into(), target: "Name".into(), source_date_format: None },
        ];

        let (mut rec, _dir) = recorder("seq");
        rec.state.ensure_table("dbo.Seq", "dbo.Seq");
        {
            let slot = rec.state.table_mut("dbo.Seq").unwrap();
            slot.status = TableStatus::InProgress;
            slot.processed_rows = 4;
            slot.last_batch_key_value = Some("4".into());
        }

        let migrator = TableMigrator::new(
            &source, &target, &job, 2, fns(), CancellationToken::new(),
        );
        migrator.run(&mut rec, &mut KeyMaps::new()).await.unwrap();

        // Only the unacknowledged tail was re-read.
        let inserted = target.inserted();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].value_of("Id"), Value::Int(5));
        let slot = rec.state.table("dbo.Seq").unwrap();
        assert_eq!(slot.processed_rows, 5);
        assert_eq!(slot.last_batch_key_value.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_batch() {
        let source = VecSource::new(
            "Id",
            (1..=4).map(|id| row(vec![("Id", Value::Int(id))])).collect(),
        );
        let target = MockTarget::new(vec!["Id"], None);
        let mut job = job("dbo.Seq", 1);
        job.mappings = vec![SimpleMapping {
            source: "Id".into(),
            target: "Id".into(),
            source_date_format: None,
        }];

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (mut rec, _dir) = recorder("seq");
        rec.state.ensure_table("dbo.Seq", "dbo.Seq");
        let migrator = TableMigrator::new(&source, &target, &job, 2, fns(), cancel);
        let err = migrator.run(&mut rec, &mut KeyMaps::new()).await.unwrap_err();
        assert!(matches!(err, MigrationError::Cancelled));
        assert!(target.inserted().is_empty());
    }

    #[tokio::test]
    async fn truncate_falls_back_to_delete() {
        let source = VecSource::new("Id", vec![row(vec![("Id", Value::Int(1))])]);
        let target = MockTarget::new(vec!["Id"], None);
        target.fail_truncate();
        let mut job = job("dbo.Items", 1);
        job.mappings = vec![SimpleMapping {
            source: "Id".into(),
            target: "Id".into(),
            source_date_format: None,
        }];
        job.settings.existing_data = ExistingDataAction::Truncate;

        let (mut rec, _dir) = recorder("items");
        rec.state.ensure_table("dbo.Items", "dbo.Items");
        let migrator = TableMigrator::new(
            &source, &target, &job, 10, fns(), CancellationToken::new(),
        );
        migrator.run(&mut rec, &mut KeyMaps::new()).await.unwrap();
        assert!(target.delete_all_called());
    }
}
