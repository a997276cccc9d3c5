//! The Validation artefact produced by a dry run, shaped for the
//! external observers that read it.

use chrono::{DateTime, Utc};
use model::state::time;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub migration_name: String,
    #[serde(with = "time")]
    pub validated_at: DateTime<Utc>,
    pub is_valid: bool,
    pub summary: ValidationSummary,
    pub configuration: ConfigurationValidation,
    pub connections: ConnectionsValidation,
    pub tables: Vec<TableValidation>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub tables_validated: usize,
    pub errors_found: usize,
    pub warnings_found: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsValidation {
    pub source: ConnectionCheck,
    pub target: ConnectionCheck,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCheck {
    pub is_valid: bool,
    pub provider: String,
    pub server: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableValidation {
    pub source_table: String,
    pub target_table: String,
    pub is_valid: bool,
    pub source_row_count: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub sample_data: Vec<SampleRow>,
}

/// One before/after pair from the sample evaluation step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRow {
    pub source: serde_json::Value,
    pub transformed: serde_json::Value,
}

impl ValidationReport {
    /// Recomputes the roll-up counters and overall verdict from the
    /// section results.
    pub fn finalize(&mut self) {
        let table_errors: usize = self.tables.iter().map(|t| t.errors.len()).sum();
        let table_warnings: usize = self.tables.iter().map(|t| t.warnings.len()).sum();
        self.summary = ValidationSummary {
            tables_validated: self.tables.len(),
            errors_found: self.configuration.errors.len() + table_errors,
            warnings_found: self.configuration.warnings.len() + table_warnings,
        };
        for table in &mut self.tables {
            table.is_valid = table.errors.is_empty();
        }
        self.configuration.is_valid = self.configuration.errors.is_empty();
        self.is_valid = self.summary.errors_found == 0
            && self.connections.source.is_valid
            && self.connections.target.is_valid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn check(ok: bool) -> ConnectionCheck {
        ConnectionCheck {
            is_valid: ok,
            provider: "SqlServer".into(),
            server: "s".into(),
            message: if ok { "connected" } else { "refused" }.into(),
        }
    }

    #[test]
    fn finalize_rolls_up_counts() {
        let mut report = ValidationReport {
            migration_name: "m".into(),
            validated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            is_valid: false,
            summary: ValidationSummary::default(),
            configuration: ConfigurationValidation {
                is_valid: false,
                errors: vec![],
                warnings: vec!["dup order".into()],
            },
            connections: ConnectionsValidation {
                source: check(true),
                target: check(true),
            },
            tables: vec![TableValidation {
                source_table: "dbo.A".into(),
                target_table: "dbo.A".into(),
                errors: vec!["missing column".into()],
                warnings: vec![],
                ..Default::default()
            }],
        };
        report.finalize();
        assert_eq!(report.summary.tables_validated, 1);
        assert_eq!(report.summary.errors_found, 1);
        assert_eq!(report.summary.warnings_found, 1);
        assert!(!report.is_valid);
        assert!(!report.tables[0].is_valid);
    }

    #[test]
    fn failed_connection_invalidates_report() {
        let mut report = ValidationReport {
            migration_name: "m".into(),
            validated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            is_valid: false,
            summary: ValidationSummary::default(),
            configuration: ConfigurationValidation::default(),
            connections: ConnectionsValidation {
                source: check(false),
                target: check(true),
            },
            tables: vec![],
        };
        report.finalize();
        assert!(!report.is_valid);
    }
}
