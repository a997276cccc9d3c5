use crate::plan::transform::Transformation;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Schema-qualified table identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: &str, table: &str) -> Self {
        TableRef {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    /// Parses `schema.table`; a bare name defaults to the `dbo` schema.
    pub fn parse(qualified: &str) -> Self {
        match qualified.split_once('.') {
            Some((schema, table)) => TableRef::new(schema, table),
            None => TableRef::new("dbo", qualified),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdentityMode {
    #[default]
    Preserve,
    Generate,
}

impl FromStr for IdentityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preserve" => Ok(IdentityMode::Preserve),
            "generate" => Ok(IdentityMode::Generate),
            other => Err(format!("unknown identity mode `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExistingDataAction {
    Truncate,
    #[default]
    Append,
}

impl FromStr for ExistingDataAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "truncate" => Ok(ExistingDataAction::Truncate),
            "append" => Ok(ExistingDataAction::Append),
            other => Err(format!("unknown existing-data action `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSettings {
    pub identity_mode: IdentityMode,
    pub identity_column: Option<String>,
    pub existing_data: ExistingDataAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleMapping {
    pub source: String,
    pub target: String,
    pub source_date_format: Option<String>,
}

/// One table's unit of work within a migration plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableJob {
    pub order: u32,
    pub source: TableRef,
    pub target: TableRef,
    pub batch_column: String,
    pub include: bool,
    pub mappings: Vec<SimpleMapping>,
    pub transformations: Vec<Transformation>,
    pub settings: TableSettings,
}

impl TableJob {
    /// Simple mappings whose target is not claimed by any transformation;
    /// claimed targets are suppressed in favor of the program.
    pub fn unclaimed_mappings(&self) -> Vec<&SimpleMapping> {
        self.mappings
            .iter()
            .filter(|m| {
                !self.transformations.iter().any(|t| {
                    t.target_columns()
                        .iter()
                        .any(|c| c.eq_ignore_ascii_case(&m.target))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::transform::Transformation;

    fn mapping(source: &str, target: &str) -> SimpleMapping {
        SimpleMapping {
            source: source.into(),
            target: target.into(),
            source_date_format: None,
        }
    }

    #[test]
    fn table_ref_parse_defaults_schema() {
        assert_eq!(TableRef::parse("Customers"), TableRef::new("dbo", "Customers"));
        assert_eq!(TableRef::parse("sales.Orders"), TableRef::new("sales", "Orders"));
    }

    #[test]
    fn claimed_targets_suppress_simple_mappings() {
        let job = TableJob {
            order: 1,
            source: TableRef::parse("dbo.People"),
            target: TableRef::parse("dbo.People"),
            batch_column: "Id".into(),
            include: true,
            mappings: vec![mapping("First", "FullName"), mapping("Age", "Age")],
            transformations: vec![Transformation::Concat {
                parts: vec![],
                target: "fullname".into(),
                null_default: None,
            }],
            settings: TableSettings::default(),
        };
        let unclaimed = job.unclaimed_mappings();
        assert_eq!(unclaimed.len(), 1);
        assert_eq!(unclaimed[0].target, "Age");
    }
}
