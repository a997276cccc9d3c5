//! Dry-run validation: configuration, connectivity, schema presence,
//! mapping consistency and sample transformations, with no writes to
//! the target.

use crate::error::MigrationError;
use chrono::Utc;
use connectors::{
    adapter::{SourceAdapter, TargetAdapter},
    factory,
};
use engine_config::report::{
    ConfigurationValidation, ConnectionCheck, ConnectionsValidation, SampleRow, TableValidation,
    ValidationReport, ValidationSummary,
};
use engine_core::status::{StatusWriter, make_run_id};
use engine_processing::{KeyMaps, RowTransformer, RuntimeFns};
use model::plan::{
    migration::MigrationPlan, table::TableJob, transform::Transformation,
};
use std::{path::Path, time::Duration};
use tracing::info;

const DEFAULT_SAMPLE_ROWS: usize = 3;

pub struct Validator {
    plan: MigrationPlan,
    load_warnings: Vec<String>,
    sample_rows: usize,
    fns: RuntimeFns,
}

impl Validator {
    pub fn new(plan: MigrationPlan, load_warnings: Vec<String>) -> Self {
        Validator {
            plan,
            load_warnings,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            fns: RuntimeFns::default(),
        }
    }

    pub fn with_sample_rows(mut self, sample_rows: usize) -> Self {
        self.sample_rows = sample_rows;
        self
    }

    /// Connects, runs every check, writes the validation artefact and
    /// returns the report for the CLI's exit decision.
    pub async fn run(&self, output_dir: &Path) -> Result<ValidationReport, MigrationError> {
        let timeout = Duration::from_secs(self.plan.query_timeout_secs);

        let source = factory::connect_source(&self.plan.source, timeout).await;
        let target = factory::connect_target(&self.plan.target, timeout).await;

        // Connectivity is proven with a round trip, not just a socket.
        let source_error = match &source {
            Ok(adapter) => adapter.ping().await.err().map(|e| e.to_string()),
            Err(err) => Some(err.to_string()),
        };
        let target_error = match &target {
            Ok(adapter) => adapter.ping().await.err().map(|e| e.to_string()),
            Err(err) => Some(err.to_string()),
        };
        let source_check = connection_check(
            &self.plan.source.provider.to_string(),
            &self.plan.source.server,
            source_error,
        );
        let target_check = connection_check(
            &self.plan.target.provider.to_string(),
            &self.plan.target.server,
            target_error,
        );

        let tables = match (&source, &target) {
            (Ok(source), Ok(target)) => {
                self.check_tables(source.as_ref(), target.as_ref()).await
            }
            _ => Vec::new(),
        };

        if let Ok(source) = &source {
            let _ = source.close().await;
        }
        if let Ok(target) = &target {
            let _ = target.close().await;
        }

        let mut report = ValidationReport {
            migration_name: self.plan.name.clone(),
            validated_at: Utc::now(),
            is_valid: false,
            summary: ValidationSummary::default(),
            configuration: ConfigurationValidation {
                is_valid: true,
                errors: vec![],
                warnings: self.load_warnings.clone(),
            },
            connections: ConnectionsValidation {
                source: source_check,
                target: target_check,
            },
            tables,
        };
        report.finalize();

        let writer = StatusWriter::new(output_dir, &self.plan.name, &make_run_id(Utc::now()));
        writer.write_validation(&report)?;
        info!(
            migration = %self.plan.name,
            valid = report.is_valid,
            errors = report.summary.errors_found,
            warnings = report.summary.warnings_found,
            "Validation finished"
        );
        Ok(report)
    }

    pub(crate) async fn check_tables(
        &self,
        source: &dyn SourceAdapter,
        target: &dyn TargetAdapter,
    ) -> Vec<TableValidation> {
        // keyLookups sample against empty parent maps: misses fall back
        // to their null defaults without touching the target.
        let mut sample_keymaps = KeyMaps::new();
        for parent in self.plan.key_remap_parents().keys() {
            sample_keymaps.insert(parent.to_string(), Default::default());
        }

        let mut results = Vec::new();
        for job in self.plan.ordered_jobs(false) {
            results.push(self.check_table(source, target, job, &sample_keymaps).await);
        }
        results
    }

    async fn check_table(
        &self,
        source: &dyn SourceAdapter,
        target: &dyn TargetAdapter,
        job: &TableJob,
        sample_keymaps: &KeyMaps,
    ) -> TableValidation {
        let mut result = TableValidation {
            source_table: job.source.to_string(),
            target_table: job.target.to_string(),
            ..TableValidation::default()
        };

        let source_columns = match source.table_exists(&job.source).await {
            Ok(true) => match source.list_columns(&job.source).await {
                Ok(columns) => columns,
                Err(err) => {
                    result.errors.push(format!("cannot list source columns: {err}"));
                    return result;
                }
            },
            Ok(false) => {
                result
                    .errors
                    .push(format!("source table `{}` does not exist", job.source));
                return result;
            }
            Err(err) => {
                result.errors.push(format!("source check failed: {err}"));
                return result;
            }
        };

        let target_columns = match target.table_exists(&job.target).await {
            Ok(true) => match TargetAdapter::list_columns(target, &job.target).await {
                Ok(columns) => columns,
                Err(err) => {
                    result.errors.push(format!("cannot list target columns: {err}"));
                    return result;
                }
            },
            Ok(false) => {
                result
                    .errors
                    .push(format!("target table `{}` does not exist", job.target));
                return result;
            }
            Err(err) => {
                result.errors.push(format!("target check failed: {err}"));
                return result;
            }
        };

        if let Ok(count) = source.row_count(&job.source).await {
            result.source_row_count = count;
        }

        let has_source = |name: &str| source_columns.iter().any(|c| c.eq_ignore_ascii_case(name));
        let has_target = |name: &str| target_columns.iter().any(|c| c.eq_ignore_ascii_case(name));

        if !has_source(&job.batch_column) {
            result.errors.push(format!(
                "batch column `{}` is not a source column",
                job.batch_column
            ));
        } else if result.source_row_count > 0 {
            // Strict-greater resume skips boundary duplicates, so a
            // non-unique batch column deserves a warning.
            if let Ok(distinct) = source.distinct_count(&job.source, &job.batch_column).await {
                if distinct < result.source_row_count {
                    result.warnings.push(format!(
                        "batch column `{}` is not unique; rows sharing a page-boundary value can be skipped on resume",
                        job.batch_column
                    ));
                }
            }
        }

        for mapping in &job.mappings {
            if !has_source(&mapping.source) {
                result.errors.push(format!(
                    "mapping source column `{}` does not exist",
                    mapping.source
                ));
            }
            if !has_target(&mapping.target) {
                result.errors.push(format!(
                    "mapping target column `{}` does not exist",
                    mapping.target
                ));
            }
        }

        for transformation in &job.transformations {
            self.check_transformation(transformation, &has_source, &has_target, &mut result);
        }

        let identity = job.settings.identity_column.clone();
        let mut produced: Vec<String> = job
            .unclaimed_mappings()
            .iter()
            .map(|m| m.target.clone())
            .collect();
        for t in &job.transformations {
            produced.extend(t.target_columns().iter().map(|c| c.to_string()));
        }

        for column in &target_columns {
            let is_identity = identity
                .as_deref()
                .is_some_and(|i| i.eq_ignore_ascii_case(column));
            let mapped = produced.iter().any(|p| p.eq_ignore_ascii_case(column));
            if !mapped && !is_identity {
                result.warnings.push(format!(
                    "target column `{column}` is unmapped and will take its default"
                ));
            }
        }
        let mut used_sources: Vec<String> =
            job.mappings.iter().map(|m| m.source.clone()).collect();
        for t in &job.transformations {
            used_sources.extend(t.source_columns().iter().map(|c| c.to_string()));
        }
        for column in &source_columns {
            if !used_sources.iter().any(|u| u.eq_ignore_ascii_case(column)) {
                result.warnings.push(format!(
                    "source column `{column}` is unmapped and will be ignored"
                ));
            }
        }

        self.sample(source, job, sample_keymaps, &mut result).await;
        result
    }

    fn check_transformation(
        &self,
        transformation: &Transformation,
        has_source: &dyn Fn(&str) -> bool,
        has_target: &dyn Fn(&str) -> bool,
        result: &mut TableValidation,
    ) {
        let kind = transformation.kind();
        for column in transformation.source_columns() {
            if !has_source(column) {
                result.errors.push(format!(
                    "{kind} transformation references missing source column `{column}`"
                ));
            }
        }
        for column in transformation.target_columns() {
            if !has_target(column) {
                result.errors.push(format!(
                    "{kind} transformation writes missing target column `{column}`"
                ));
            }
        }
        match transformation {
            Transformation::Calculated { expression, .. } => {
                match expression_engine::parse_expression(expression) {
                    Ok(expr) => {
                        for column in expr.referenced_columns() {
                            if !has_source(column) {
                                result.errors.push(format!(
                                    "calculated expression references missing source column `{column}`"
                                ));
                            }
                        }
                    }
                    Err(err) => result
                        .errors
                        .push(format!("calculated expression does not parse: {err}")),
                }
            }
            Transformation::Conditional { whens, .. } => {
                for when in whens {
                    match expression_engine::parse_predicate(&when.predicate) {
                        Ok(predicate) => {
                            if !has_source(predicate.column()) {
                                result.errors.push(format!(
                                    "conditional predicate references missing source column `{}`",
                                    predicate.column()
                                ));
                            }
                        }
                        Err(err) => result
                            .errors
                            .push(format!("conditional predicate does not parse: {err}")),
                    }
                }
            }
            _ => {}
        }
    }

    /// Fetches up to N source rows and produces before/after pairs.
    async fn sample(
        &self,
        source: &dyn SourceAdapter,
        job: &TableJob,
        sample_keymaps: &KeyMaps,
        result: &mut TableValidation,
    ) {
        if self.sample_rows == 0 {
            return;
        }
        let transformer = match RowTransformer::compile(job, self.fns) {
            Ok(transformer) => transformer,
            Err(err) => {
                result
                    .errors
                    .push(format!("transformation program does not compile: {err}"));
                return;
            }
        };
        let rows = match source
            .read_batch(&job.source, &job.batch_column, self.sample_rows, None)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                result
                    .warnings
                    .push(format!("could not fetch sample rows: {err}"));
                return;
            }
        };
        for row in rows {
            match transformer.apply(&row, sample_keymaps) {
                Ok(outcome) => result.sample_data.push(SampleRow {
                    source: row.to_json_map(),
                    transformed: outcome.row.to_json_map(),
                }),
                Err(err) => result
                    .warnings
                    .push(format!("sample transformation failed: {err}")),
            }
        }
    }
}

/// Writes a validation artefact for a configuration that failed
/// structural validation, so the operator gets the error list in the
/// same shape as a full dry run.
pub fn write_config_failure_report(
    migration_name: &str,
    errors: Vec<String>,
    output_dir: &Path,
) -> Result<ValidationReport, MigrationError> {
    let unchecked = ConnectionCheck {
        is_valid: false,
        provider: "Unknown".into(),
        server: String::new(),
        message: "not checked: configuration invalid".into(),
    };
    let mut report = ValidationReport {
        migration_name: migration_name.to_string(),
        validated_at: Utc::now(),
        is_valid: false,
        summary: ValidationSummary::default(),
        configuration: ConfigurationValidation {
            is_valid: false,
            errors,
            warnings: vec![],
        },
        connections: ConnectionsValidation {
            source: unchecked.clone(),
            target: unchecked,
        },
        tables: vec![],
    };
    report.finalize();

    let writer = StatusWriter::new(output_dir, migration_name, &make_run_id(Utc::now()));
    writer.write_validation(&report)?;
    Ok(report)
}

fn connection_check(provider: &str, server: &str, error: Option<String>) -> ConnectionCheck {
    match error {
        None => ConnectionCheck {
            is_valid: true,
            provider: provider.to_string(),
            server: server.to_string(),
            message: "connected".into(),
        },
        Some(message) => ConnectionCheck {
            is_valid: false,
            provider: provider.to_string(),
            server: server.to_string(),
            message,
        },
    }
}
