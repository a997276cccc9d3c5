//! The logical configuration schema as deserialized from the external
//! XML files. These structs define the contract; the parser itself is
//! quick-xml's serde layer.

use serde::Deserialize;

fn default_true() -> bool {
    true
}

/// `<global environment=".." defaultLogLevel=".."/>`
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfigXml {
    #[serde(rename = "@environment")]
    pub environment: String,
    #[serde(rename = "@defaultLogLevel")]
    pub default_log_level: String,
}

/// Root of the master config: migration identity, batching, the two
/// connections and the table list.
#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfigXml {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@batchSize")]
    pub batch_size: usize,
    #[serde(rename = "@queryTimeoutSeconds")]
    pub query_timeout_seconds: u64,
    #[serde(rename = "sourceConnection")]
    pub source: ConnectionXml,
    #[serde(rename = "targetConnection")]
    pub target: ConnectionXml,
    pub tables: TablesXml,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TablesXml {
    #[serde(rename = "table", default)]
    pub tables: Vec<TableXml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionXml {
    #[serde(rename = "@provider")]
    pub provider: String,
    #[serde(rename = "@server")]
    pub server: String,
    #[serde(rename = "@port")]
    pub port: Option<u16>,
    #[serde(rename = "@database")]
    pub database: String,
    #[serde(rename = "@auth")]
    pub auth: String,
    #[serde(rename = "@username")]
    pub username: Option<String>,
    #[serde(rename = "@password")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableXml {
    #[serde(rename = "@order")]
    pub order: u32,
    #[serde(rename = "@include", default = "default_true")]
    pub include: bool,
    #[serde(rename = "@sourceTable")]
    pub source_table: String,
    #[serde(rename = "@targetTable")]
    pub target_table: String,
    #[serde(rename = "@batchColumn")]
    pub batch_column: String,
    /// Relative path to a table-map file carrying settings and the
    /// transformation program.
    #[serde(rename = "@tableMap")]
    pub table_map: Option<String>,
    #[serde(rename = "mapping", default)]
    pub mappings: Vec<MappingXml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingXml {
    #[serde(rename = "@sourceColumn")]
    pub source_column: String,
    #[serde(rename = "@targetColumn")]
    pub target_column: String,
    #[serde(rename = "@sourceDateFormat")]
    pub source_date_format: Option<String>,
}

/// Root of a table-map file.
#[derive(Debug, Clone, Deserialize)]
pub struct TableMapXml {
    pub settings: Option<SettingsXml>,
    #[serde(rename = "mapping", default)]
    pub mappings: Vec<MappingXml>,
    pub transformations: Option<TransformationsXml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsXml {
    #[serde(rename = "@identityMode")]
    pub identity_mode: Option<String>,
    #[serde(rename = "@identityColumn")]
    pub identity_column: Option<String>,
    #[serde(rename = "@existingDataAction")]
    pub existing_data_action: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransformationsXml {
    #[serde(rename = "$value", default)]
    pub items: Vec<TransformationXml>,
}

/// One transformation element; the element name selects the variant.
#[derive(Debug, Clone, Deserialize)]
pub enum TransformationXml {
    #[serde(rename = "simple")]
    Simple(SimpleXml),
    #[serde(rename = "concat")]
    Concat(ConcatXml),
    #[serde(rename = "split")]
    Split(SplitXml),
    #[serde(rename = "lookup")]
    Lookup(LookupXml),
    #[serde(rename = "calculated")]
    Calculated(CalculatedXml),
    #[serde(rename = "static")]
    Static(StaticXml),
    #[serde(rename = "conditional")]
    Conditional(ConditionalXml),
    #[serde(rename = "convert")]
    Convert(ConvertXml),
    #[serde(rename = "keyLookup")]
    KeyLookup(KeyLookupXml),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimpleXml {
    #[serde(rename = "@sourceColumn")]
    pub source_column: String,
    #[serde(rename = "@targetColumn")]
    pub target_column: String,
    #[serde(rename = "@nullDefault")]
    pub null_default: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcatXml {
    #[serde(rename = "@targetColumn")]
    pub target_column: String,
    #[serde(rename = "@nullDefault")]
    pub null_default: Option<String>,
    #[serde(rename = "$value", default)]
    pub parts: Vec<ConcatPartXml>,
}

#[derive(Debug, Clone, Deserialize)]
pub enum ConcatPartXml {
    #[serde(rename = "column")]
    Column(ColumnRefXml),
    #[serde(rename = "literal")]
    Literal(LiteralXml),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnRefXml {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiteralXml {
    #[serde(rename = "@value")]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SplitXml {
    #[serde(rename = "@sourceColumn")]
    pub source_column: String,
    #[serde(rename = "@delimiter")]
    pub delimiter: String,
    #[serde(rename = "target", default)]
    pub targets: Vec<SplitTargetXml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SplitTargetXml {
    #[serde(rename = "@index")]
    pub index: usize,
    #[serde(rename = "@column")]
    pub column: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LookupXml {
    #[serde(rename = "@sourceColumn")]
    pub source_column: String,
    #[serde(rename = "@targetColumn")]
    pub target_column: String,
    #[serde(rename = "@default")]
    pub default: Option<String>,
    #[serde(rename = "@nullDefault")]
    pub null_default: Option<String>,
    #[serde(rename = "entry", default)]
    pub entries: Vec<LookupEntryXml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LookupEntryXml {
    #[serde(rename = "@key")]
    pub key: String,
    #[serde(rename = "@value")]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalculatedXml {
    #[serde(rename = "@expression")]
    pub expression: String,
    #[serde(rename = "@targetColumn")]
    pub target_column: String,
    #[serde(rename = "@nullDefault")]
    pub null_default: Option<String>,
}

/// Exactly one of `value` / `function` must be present; the loader
/// enforces this.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticXml {
    #[serde(rename = "@targetColumn")]
    pub target_column: String,
    #[serde(rename = "@value")]
    pub value: Option<String>,
    #[serde(rename = "@function")]
    pub function: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionalXml {
    #[serde(rename = "@targetColumn")]
    pub target_column: String,
    #[serde(rename = "when", default)]
    pub whens: Vec<WhenXml>,
    #[serde(rename = "else")]
    pub otherwise: Option<BranchValueXml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhenXml {
    #[serde(rename = "@predicate")]
    pub predicate: String,
    #[serde(rename = "@value")]
    pub value: Option<String>,
    #[serde(rename = "@column")]
    pub column: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchValueXml {
    #[serde(rename = "@value")]
    pub value: Option<String>,
    #[serde(rename = "@column")]
    pub column: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvertXml {
    #[serde(rename = "@sourceColumn")]
    pub source_column: String,
    #[serde(rename = "@sourceFormat")]
    pub source_format: Option<String>,
    #[serde(rename = "@targetColumn")]
    pub target_column: String,
    #[serde(rename = "@targetType")]
    pub target_type: String,
    #[serde(rename = "@nullDefault")]
    pub null_default: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyLookupXml {
    #[serde(rename = "@sourceColumn")]
    pub source_column: String,
    #[serde(rename = "@targetColumn")]
    pub target_column: String,
    #[serde(rename = "@parentTable")]
    pub parent_table: String,
    #[serde(rename = "@parentKeyColumn")]
    pub parent_key_column: String,
    #[serde(rename = "@nullDefault")]
    pub null_default: Option<String>,
}
