use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};

/// One part of a `concat` program: either a source column reference or a
/// verbatim literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConcatPart {
    Column(String),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitTarget {
    pub index: usize,
    pub column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaticFunction {
    NowLocal,
    NowUtc,
    NewGuid,
    CurrentUser,
}

impl FromStr for StaticFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nowlocal" => Ok(StaticFunction::NowLocal),
            "nowutc" => Ok(StaticFunction::NowUtc),
            "newguid" => Ok(StaticFunction::NewGuid),
            "currentuser" => Ok(StaticFunction::CurrentUser),
            other => Err(format!("unknown static function `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StaticValue {
    Literal(String),
    Function(StaticFunction),
}

/// Value produced by a matching conditional branch: a literal or a copy
/// of another source column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueSpec {
    Literal(String),
    Column(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenBranch {
    pub predicate: String,
    pub value: ValueSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvertType {
    DateTime,
    DateTime2,
    Date,
    SmallDateTime,
    Int,
    BigInt,
    Decimal,
    Float,
    Bit,
    VarChar,
    NVarChar,
    UniqueIdentifier,
}

impl FromStr for ConvertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "datetime" => Ok(ConvertType::DateTime),
            "datetime2" => Ok(ConvertType::DateTime2),
            "date" => Ok(ConvertType::Date),
            "smalldatetime" => Ok(ConvertType::SmallDateTime),
            "int" => Ok(ConvertType::Int),
            "bigint" => Ok(ConvertType::BigInt),
            "decimal" => Ok(ConvertType::Decimal),
            "float" => Ok(ConvertType::Float),
            "bit" => Ok(ConvertType::Bit),
            "varchar" => Ok(ConvertType::VarChar),
            "nvarchar" => Ok(ConvertType::NVarChar),
            "uniqueidentifier" => Ok(ConvertType::UniqueIdentifier),
            other => Err(format!("unknown convert target type `{other}`")),
        }
    }
}

impl fmt::Display for ConvertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConvertType::DateTime => "datetime",
            ConvertType::DateTime2 => "datetime2",
            ConvertType::Date => "date",
            ConvertType::SmallDateTime => "smalldatetime",
            ConvertType::Int => "int",
            ConvertType::BigInt => "bigint",
            ConvertType::Decimal => "decimal",
            ConvertType::Float => "float",
            ConvertType::Bit => "bit",
            ConvertType::VarChar => "varchar",
            ConvertType::NVarChar => "nvarchar",
            ConvertType::UniqueIdentifier => "uniqueidentifier",
        };
        f.write_str(name)
    }
}

/// A single typed operation in a table's transformation program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transformation {
    Simple {
        source: String,
        target: String,
        null_default: Option<String>,
    },
    Concat {
        parts: Vec<ConcatPart>,
        target: String,
        null_default: Option<String>,
    },
    Split {
        source: String,
        delimiter: String,
        targets: Vec<SplitTarget>,
    },
    Lookup {
        source: String,
        target: String,
        table: HashMap<String, String>,
        default: Option<String>,
        null_default: Option<String>,
    },
    Calculated {
        expression: String,
        target: String,
        null_default: Option<String>,
    },
    Static {
        target: String,
        value: StaticValue,
    },
    Conditional {
        target: String,
        whens: Vec<WhenBranch>,
        otherwise: Option<ValueSpec>,
    },
    Convert {
        source: String,
        source_format: Option<String>,
        target: String,
        target_type: ConvertType,
        null_default: Option<String>,
    },
    KeyLookup {
        source: String,
        target: String,
        parent_table: String,
        parent_key_column: String,
        null_default: Option<String>,
    },
}

impl Transformation {
    /// Every target column this operation writes. All variants write one
    /// column except `split`, which fans out.
    pub fn target_columns(&self) -> Vec<&str> {
        match self {
            Transformation::Simple { target, .. }
            | Transformation::Concat { target, .. }
            | Transformation::Lookup { target, .. }
            | Transformation::Calculated { target, .. }
            | Transformation::Static { target, .. }
            | Transformation::Conditional { target, .. }
            | Transformation::Convert { target, .. }
            | Transformation::KeyLookup { target, .. } => vec![target.as_str()],
            Transformation::Split { targets, .. } => {
                targets.iter().map(|t| t.column.as_str()).collect()
            }
        }
    }

    /// Source columns this operation reads directly (calculated
    /// expressions and conditional predicates are resolved separately by
    /// their parsers).
    pub fn source_columns(&self) -> Vec<&str> {
        match self {
            Transformation::Simple { source, .. }
            | Transformation::Split { source, .. }
            | Transformation::Lookup { source, .. }
            | Transformation::Convert { source, .. }
            | Transformation::KeyLookup { source, .. } => vec![source.as_str()],
            Transformation::Concat { parts, .. } => parts
                .iter()
                .filter_map(|p| match p {
                    ConcatPart::Column(name) => Some(name.as_str()),
                    ConcatPart::Literal(_) => None,
                })
                .collect(),
            Transformation::Conditional { whens, otherwise, .. } => {
                let mut cols: Vec<&str> = whens
                    .iter()
                    .filter_map(|w| match &w.value {
                        ValueSpec::Column(name) => Some(name.as_str()),
                        ValueSpec::Literal(_) => None,
                    })
                    .collect();
                if let Some(ValueSpec::Column(name)) = otherwise {
                    cols.push(name.as_str());
                }
                cols
            }
            Transformation::Calculated { .. } | Transformation::Static { .. } => vec![],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Transformation::Simple { .. } => "simple",
            Transformation::Concat { .. } => "concat",
            Transformation::Split { .. } => "split",
            Transformation::Lookup { .. } => "lookup",
            Transformation::Calculated { .. } => "calculated",
            Transformation::Static { .. } => "static",
            Transformation::Conditional { .. } => "conditional",
            Transformation::Convert { .. } => "convert",
            Transformation::KeyLookup { .. } => "keyLookup",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reports_all_targets() {
        let t = Transformation::Split {
            source: "Addr".into(),
            delimiter: ", ".into(),
            targets: vec![
                SplitTarget { index: 0, column: "Street".into() },
                SplitTarget { index: 1, column: "City".into() },
            ],
        };
        assert_eq!(t.target_columns(), vec!["Street", "City"]);
        assert_eq!(t.source_columns(), vec!["Addr"]);
    }

    #[test]
    fn concat_reports_only_column_parts() {
        let t = Transformation::Concat {
            parts: vec![
                ConcatPart::Column("First".into()),
                ConcatPart::Literal(" ".into()),
                ConcatPart::Column("Last".into()),
            ],
            target: "Full".into(),
            null_default: None,
        };
        assert_eq!(t.source_columns(), vec!["First", "Last"]);
    }

    #[test]
    fn convert_type_parses() {
        assert_eq!("DateTime2".parse::<ConvertType>(), Ok(ConvertType::DateTime2));
        assert!("text".parse::<ConvertType>().is_err());
    }
}
