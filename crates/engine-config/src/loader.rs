//! Turns the deserialized XML documents into the immutable
//! [`MigrationPlan`], resolving table-map file references and collecting
//! structural errors along the way.

use crate::{
    error::ConfigError,
    validate,
    xml::{
        ConcatPartXml, ConnectionXml, GlobalConfigXml, MappingXml, MasterConfigXml, StaticXml,
        TableMapXml, TableXml, TransformationXml,
    },
};
use model::plan::{
    connection::{AuthMode, ConnectionDescriptor, Provider},
    migration::MigrationPlan,
    table::{
        ExistingDataAction, IdentityMode, SimpleMapping, TableJob, TableRef, TableSettings,
    },
    transform::{
        ConcatPart, ConvertType, SplitTarget, StaticFunction, StaticValue, Transformation,
        ValueSpec, WhenBranch,
    },
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

#[derive(Debug)]
pub struct LoadedConfig {
    pub plan: MigrationPlan,
    pub warnings: Vec<String>,
}

pub fn load_global(path: &Path) -> Result<GlobalConfigXml, ConfigError> {
    parse_file(path)
}

/// Loads the master config and every referenced table-map file, then
/// runs structural validation. Errors abort; warnings ride along.
pub fn load_plan(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let master: MasterConfigXml = parse_file(path)?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut errors = Vec::new();
    let source = build_connection(&master.source, "sourceConnection", &mut errors);
    let target = build_connection(&master.target, "targetConnection", &mut errors);

    let mut tables = Vec::new();
    for table in &master.tables.tables {
        match build_table(table, &base_dir, &mut errors) {
            Some(job) => tables.push(job),
            None => continue,
        }
    }
    tables.sort_by_key(|j: &TableJob| j.order);

    let (source, target) = match (source, target) {
        (Some(source), Some(target)) => (source, target),
        _ => {
            return Err(ConfigError::Structural {
                migration: master.name.clone(),
                errors,
            });
        }
    };

    let plan = MigrationPlan {
        name: master.name.clone(),
        batch_size: master.batch_size,
        query_timeout_secs: master.query_timeout_seconds,
        source,
        target,
        tables,
    };

    let (mut structural_errors, warnings) = validate::structural(&plan);
    errors.append(&mut structural_errors);
    if !errors.is_empty() {
        return Err(ConfigError::Structural {
            migration: master.name,
            errors,
        });
    }

    debug!(
        migration = %plan.name,
        tables = plan.tables.len(),
        "Loaded migration plan"
    );
    Ok(LoadedConfig { plan, warnings })
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    quick_xml::de::from_str(&raw).map_err(|source| ConfigError::Xml {
        path: path.display().to_string(),
        source,
    })
}

fn build_connection(
    xml: &ConnectionXml,
    role: &str,
    errors: &mut Vec<String>,
) -> Option<ConnectionDescriptor> {
    let provider = match xml.provider.parse::<Provider>() {
        Ok(provider) => provider,
        Err(err) => {
            errors.push(format!("{role}: {err}"));
            return None;
        }
    };
    let auth = match xml.auth.parse::<AuthMode>() {
        Ok(auth) => auth,
        Err(err) => {
            errors.push(format!("{role}: {err}"));
            return None;
        }
    };
    Some(ConnectionDescriptor {
        provider,
        server: xml.server.clone(),
        port: xml.port,
        database: xml.database.clone(),
        auth,
        username: xml.username.clone(),
        password: xml.password.clone(),
    })
}

fn build_table(
    xml: &TableXml,
    base_dir: &Path,
    errors: &mut Vec<String>,
) -> Option<TableJob> {
    let context = format!("table `{}` (order {})", xml.source_table, xml.order);

    let mut mappings: Vec<SimpleMapping> = xml.mappings.iter().map(build_mapping).collect();
    let mut transformations = Vec::new();
    let mut settings = TableSettings::default();

    if let Some(map_ref) = &xml.table_map {
        let map_path: PathBuf = base_dir.join(map_ref);
        if !map_path.exists() {
            errors.push(format!(
                "{context}: referenced table-map file `{map_ref}` does not exist"
            ));
            return None;
        }
        let table_map: TableMapXml = match parse_file(&map_path) {
            Ok(map) => map,
            Err(err) => {
                errors.push(format!("{context}: {err}"));
                return None;
            }
        };
        mappings.extend(table_map.mappings.iter().map(build_mapping));
        if let Some(settings_xml) = &table_map.settings {
            settings = build_settings(settings_xml, &context, errors)?;
        }
        if let Some(transformations_xml) = &table_map.transformations {
            for item in &transformations_xml.items {
                match build_transformation(item, &context, errors) {
                    Some(t) => transformations.push(t),
                    None => return None,
                }
            }
        }
    }

    Some(TableJob {
        order: xml.order,
        source: TableRef::parse(&xml.source_table),
        target: TableRef::parse(&xml.target_table),
        batch_column: xml.batch_column.clone(),
        include: xml.include,
        mappings,
        transformations,
        settings,
    })
}

fn build_mapping(xml: &MappingXml) -> SimpleMapping {
    SimpleMapping {
        source: xml.source_column.clone(),
        target: xml.target_column.clone(),
        source_date_format: xml.source_date_format.clone(),
    }
}

fn build_settings(
    xml: &crate::xml::SettingsXml,
    context: &str,
    errors: &mut Vec<String>,
) -> Option<TableSettings> {
    let identity_mode = match &xml.identity_mode {
        Some(raw) => match raw.parse::<IdentityMode>() {
            Ok(mode) => mode,
            Err(err) => {
                errors.push(format!("{context}: {err}"));
                return None;
            }
        },
        None => IdentityMode::default(),
    };
    let existing_data = match &xml.existing_data_action {
        Some(raw) => match raw.parse::<ExistingDataAction>() {
            Ok(action) => action,
            Err(err) => {
                errors.push(format!("{context}: {err}"));
                return None;
            }
        },
        None => ExistingDataAction::default(),
    };
    Some(TableSettings {
        identity_mode,
        identity_column: xml.identity_column.clone(),
        existing_data,
    })
}

fn build_transformation(
    xml: &TransformationXml,
    context: &str,
    errors: &mut Vec<String>,
) -> Option<Transformation> {
    Some(match xml {
        TransformationXml::Simple(t) => Transformation::Simple {
            source: t.source_column.clone(),
            target: t.target_column.clone(),
            null_default: t.null_default.clone(),
        },
        TransformationXml::Concat(t) => Transformation::Concat {
            parts: t
                .parts
                .iter()
                .map(|p| match p {
                    ConcatPartXml::Column(c) => ConcatPart::Column(c.name.clone()),
                    ConcatPartXml::Literal(l) => ConcatPart::Literal(l.value.clone()),
                })
                .collect(),
            target: t.target_column.clone(),
            null_default: t.null_default.clone(),
        },
        TransformationXml::Split(t) => Transformation::Split {
            source: t.source_column.clone(),
            delimiter: t.delimiter.clone(),
            targets: t
                .targets
                .iter()
                .map(|target| SplitTarget {
                    index: target.index,
                    column: target.column.clone(),
                })
                .collect(),
        },
        TransformationXml::Lookup(t) => Transformation::Lookup {
            source: t.source_column.clone(),
            target: t.target_column.clone(),
            table: t
                .entries
                .iter()
                .map(|e| (e.key.clone(), e.value.clone()))
                .collect(),
            default: t.default.clone(),
            null_default: t.null_default.clone(),
        },
        TransformationXml::Calculated(t) => Transformation::Calculated {
            expression: t.expression.clone(),
            target: t.target_column.clone(),
            null_default: t.null_default.clone(),
        },
        TransformationXml::Static(t) => Transformation::Static {
            target: t.target_column.clone(),
            value: build_static_value(t, context, errors)?,
        },
        TransformationXml::Conditional(t) => {
            let mut whens = Vec::new();
            for w in &t.whens {
                let value = branch_value(&w.value, &w.column, context, errors)?;
                whens.push(WhenBranch {
                    predicate: w.predicate.clone(),
                    value,
                });
            }
            let otherwise = match &t.otherwise {
                Some(branch) => {
                    Some(branch_value(&branch.value, &branch.column, context, errors)?)
                }
                None => None,
            };
            Transformation::Conditional {
                target: t.target_column.clone(),
                whens,
                otherwise,
            }
        }
        TransformationXml::Convert(t) => Transformation::Convert {
            source: t.source_column.clone(),
            source_format: t.source_format.clone(),
            target: t.target_column.clone(),
            target_type: match t.target_type.parse::<ConvertType>() {
                Ok(target_type) => target_type,
                Err(err) => {
                    errors.push(format!("{context}: {err}"));
                    return None;
                }
            },
            null_default: t.null_default.clone(),
        },
        TransformationXml::KeyLookup(t) => Transformation::KeyLookup {
            source: t.source_column.clone(),
            target: t.target_column.clone(),
            parent_table: t.parent_table.clone(),
            parent_key_column: t.parent_key_column.clone(),
            null_default: t.null_default.clone(),
        },
    })
}

fn build_static_value(
    xml: &StaticXml,
    context: &str,
    errors: &mut Vec<String>,
) -> Option<StaticValue> {
    match (&xml.value, &xml.function) {
        (Some(value), None) => Some(StaticValue::Literal(value.clone())),
        (None, Some(function)) => match function.parse::<StaticFunction>() {
            Ok(function) => Some(StaticValue::Function(function)),
            Err(err) => {
                errors.push(format!("{context}: {err}"));
                None
            }
        },
        _ => {
            errors.push(format!(
                "{context}: static transformation for `{}` needs exactly one of value/function",
                xml.target_column
            ));
            None
        }
    }
}

fn branch_value(
    value: &Option<String>,
    column: &Option<String>,
    context: &str,
    errors: &mut Vec<String>,
) -> Option<ValueSpec> {
    match (value, column) {
        (Some(value), None) => Some(ValueSpec::Literal(value.clone())),
        (None, Some(column)) => Some(ValueSpec::Column(column.clone())),
        _ => {
            errors.push(format!(
                "{context}: conditional branch needs exactly one of value/column"
            ));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    const MASTER: &str = r#"
<migration name="crm" batchSize="500" queryTimeoutSeconds="30">
  <sourceConnection provider="MySql" server="db1" port="3306" database="legacy" auth="SqlAuth" username="u" password="p"/>
  <targetConnection provider="AzureSql" server="x.database.windows.net" database="crm" auth="CliDelegated"/>
  <tables>
    <table order="1" sourceTable="legacy.customers" targetTable="dbo.Customers" batchColumn="id" tableMap="customers.map.xml">
      <mapping sourceColumn="id" targetColumn="LegacyId"/>
    </table>
    <table order="2" include="false" sourceTable="legacy.orders" targetTable="dbo.Orders" batchColumn="order_id"/>
  </tables>
</migration>"#;

    const CUSTOMERS_MAP: &str = r#"
<tableMap>
  <settings identityMode="generate" identityColumn="CustomerID" existingDataAction="truncate"/>
  <mapping sourceColumn="email" targetColumn="Email"/>
  <transformations>
    <concat targetColumn="FullName" nullDefault="Unknown">
      <column name="first_name"/>
      <literal value=" "/>
      <column name="last_name"/>
    </concat>
    <lookup sourceColumn="status" targetColumn="StatusID" default="0">
      <entry key="A" value="1"/>
      <entry key="I" value="2"/>
    </lookup>
    <static targetColumn="MigratedAt" function="nowUtc"/>
    <conditional targetColumn="Tier">
      <when predicate="total &gt;= 1000" value="gold"/>
      <else value="bronze"/>
    </conditional>
    <convert sourceColumn="signup" targetColumn="SignupDate" targetType="date" sourceFormat="%d/%m/%Y"/>
  </transformations>
</tableMap>"#;

    fn write_config(dir: &Path) -> PathBuf {
        let master_path = dir.join("migration.xml");
        fs::File::create(&master_path)
            .unwrap()
            .write_all(MASTER.as_bytes())
            .unwrap();
        fs::File::create(dir.join("customers.map.xml"))
            .unwrap()
            .write_all(CUSTOMERS_MAP.as_bytes())
            .unwrap();
        master_path
    }

    #[test]
    fn loads_master_and_table_map() {
        let dir = tempdir().unwrap();
        let loaded = load_plan(&write_config(dir.path())).unwrap();
        let plan = loaded.plan;

        assert_eq!(plan.name, "crm");
        assert_eq!(plan.batch_size, 500);
        assert_eq!(plan.source.provider, Provider::MySql);
        assert_eq!(plan.target.auth, AuthMode::CliDelegated);
        assert_eq!(plan.tables.len(), 2);

        let customers = &plan.tables[0];
        assert_eq!(customers.source, TableRef::parse("legacy.customers"));
        assert_eq!(customers.settings.identity_mode, IdentityMode::Generate);
        assert_eq!(
            customers.settings.existing_data,
            ExistingDataAction::Truncate
        );
        // Mappings merge from the master entry and the table map.
        assert_eq!(customers.mappings.len(), 2);
        assert_eq!(customers.transformations.len(), 5);
        assert!(matches!(
            customers.transformations[0],
            Transformation::Concat { ref parts, .. } if parts.len() == 3
        ));

        assert!(!plan.tables[1].include);
    }

    #[test]
    fn missing_table_map_is_a_structural_error() {
        let dir = tempdir().unwrap();
        let master_path = dir.path().join("migration.xml");
        fs::File::create(&master_path)
            .unwrap()
            .write_all(MASTER.as_bytes())
            .unwrap();
        // customers.map.xml deliberately absent.
        match load_plan(&master_path) {
            Err(ConfigError::Structural { migration, errors }) => {
                assert_eq!(migration, "crm");
                assert!(errors.iter().any(|e| e.contains("customers.map.xml")));
            }
            other => panic!("expected structural error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_provider_is_a_structural_error() {
        let dir = tempdir().unwrap();
        let bad = MASTER.replace("provider=\"MySql\"", "provider=\"mongodb\"");
        let master_path = dir.path().join("migration.xml");
        fs::File::create(&master_path)
            .unwrap()
            .write_all(bad.as_bytes())
            .unwrap();
        fs::File::create(dir.path().join("customers.map.xml"))
            .unwrap()
            .write_all(CUSTOMERS_MAP.as_bytes())
            .unwrap();
        match load_plan(&master_path) {
            Err(ConfigError::Structural { errors, .. }) => {
                assert!(errors.iter().any(|e| e.contains("unknown provider")));
            }
            other => panic!("expected structural error, got {other:?}"),
        }
    }

    #[test]
    fn global_config_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("global.xml");
        fs::File::create(&path)
            .unwrap()
            .write_all(br#"<global environment="prod" defaultLogLevel="Info"/>"#)
            .unwrap();
        let global = load_global(&path).unwrap();
        assert_eq!(global.environment, "prod");
        assert_eq!(global.default_log_level, "Info");
    }
}
