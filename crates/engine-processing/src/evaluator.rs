//! The per-row transform evaluator. Pure with respect to its inputs:
//! given the same source row, program and key maps it produces the same
//! target row, and it performs no I/O. The non-deterministic static
//! functions are injected through [`RuntimeFns`].

use crate::{convert::convert_value, error::TransformError, ports::RuntimeFns};
use chrono::NaiveDateTime;
use expression_engine::{
    Expr, Predicate, evaluate, evaluate_predicate, parse_expression, parse_predicate,
};
use model::{
    core::value::Value,
    plan::{
        table::{SimpleMapping, TableJob, TableRef},
        transform::{
            ConcatPart, ConvertType, SplitTarget, StaticFunction, StaticValue, Transformation,
            ValueSpec,
        },
    },
    records::row::RowData,
};
use std::collections::HashMap;

/// In-memory key maps for every parent table that has finished, keyed by
/// the parent's qualified source name.
pub type KeyMaps = HashMap<String, HashMap<String, String>>;

/// The transformed row plus any row-level warnings (currently only
/// conversion failures) the caller should log.
pub struct TransformOutcome {
    pub row: RowData,
    pub warnings: Vec<String>,
}

enum CompiledOp {
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
        expr: Expr,
        target: String,
        null_default: Option<String>,
    },
    Static {
        target: String,
        value: StaticValue,
    },
    Conditional {
        target: String,
        whens: Vec<(Predicate, ValueSpec)>,
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
        null_default: Option<String>,
    },
}

/// A compiled per-table program: calculated expressions and conditional
/// predicates are parsed once here, then evaluated per row.
pub struct RowTransformer {
    mappings: Vec<SimpleMapping>,
    ops: Vec<CompiledOp>,
    fns: RuntimeFns,
}

impl RowTransformer {
    pub fn compile(job: &TableJob, fns: RuntimeFns) -> Result<Self, TransformError> {
        let mappings = job
            .unclaimed_mappings()
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();

        let ops = job
            .transformations
            .iter()
            .map(|t| compile_op(t, &job.source))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RowTransformer { mappings, ops, fns })
    }

    /// Applies the program: unclaimed simple mappings first, then each
    /// transformation in declaration order. A later write into the same
    /// target column overrides an earlier one.
    pub fn apply(
        &self,
        source: &RowData,
        keymaps: &KeyMaps,
    ) -> Result<TransformOutcome, TransformError> {
        let mut row = RowData::default();
        let mut warnings = Vec::new();

        for mapping in &self.mappings {
            row.set(&mapping.target, map_simple(source, mapping));
        }

        for op in &self.ops {
            match op {
                CompiledOp::Simple {
                    source: src,
                    target,
                    null_default,
                } => {
                    let value = match source.value_of(src) {
                        Value::Null => null_default_value(null_default),
                        value => value,
                    };
                    row.set(target, value);
                }
                CompiledOp::Concat {
                    parts,
                    target,
                    null_default,
                } => {
                    row.set(target, eval_concat(source, parts, null_default));
                }
                CompiledOp::Split {
                    source: src,
                    delimiter,
                    targets,
                } => {
                    eval_split(source, src, delimiter, targets, &mut row);
                }
                CompiledOp::Lookup {
                    source: src,
                    target,
                    table,
                    default,
                    null_default,
                } => {
                    let value = match source.value_of(src).as_text() {
                        None => null_default_value(null_default),
                        Some(key) => match table.get(&key) {
                            Some(hit) => Value::Text(hit.clone()),
                            None => default
                                .as_ref()
                                .map(|d| Value::Text(d.clone()))
                                .unwrap_or(Value::Null),
                        },
                    };
                    row.set(target, value);
                }
                CompiledOp::Calculated {
                    expr,
                    target,
                    null_default,
                } => {
                    let value = evaluate(expr, source)
                        .unwrap_or_else(|| null_default_value(null_default));
                    row.set(target, value);
                }
                CompiledOp::Static { target, value } => {
                    row.set(target, self.eval_static(value));
                }
                CompiledOp::Conditional {
                    target,
                    whens,
                    otherwise,
                } => {
                    let branch = whens
                        .iter()
                        .find(|(predicate, _)| evaluate_predicate(predicate, source))
                        .map(|(_, spec)| spec)
                        .or(otherwise.as_ref());
                    let value = match branch {
                        Some(spec) => eval_value_spec(source, spec),
                        None => Value::Null,
                    };
                    row.set(target, value);
                }
                CompiledOp::Convert {
                    source: src,
                    source_format,
                    target,
                    target_type,
                    null_default,
                } => {
                    let cell = source.value_of(src);
                    let value = if cell.is_null() {
                        null_default_value(null_default)
                    } else {
                        match convert_value(&cell, source_format.as_deref(), *target_type) {
                            Some(converted) => converted,
                            None => {
                                warnings.push(format!(
                                    "convert to {target_type} failed for column `{src}` value `{cell}`"
                                ));
                                null_default_value(null_default)
                            }
                        }
                    };
                    row.set(target, value);
                }
                CompiledOp::KeyLookup {
                    source: src,
                    target,
                    parent_table,
                    null_default,
                } => {
                    let map = keymaps.get(parent_table).ok_or_else(|| {
                        TransformError::MissingKeyMap {
                            target: target.clone(),
                            parent: parent_table.clone(),
                        }
                    })?;
                    let value = source
                        .value_of(src)
                        .as_text()
                        .and_then(|key| map.get(&key))
                        .map(|new_key| Value::Text(new_key.clone()))
                        .unwrap_or_else(|| null_default_value(null_default));
                    row.set(target, value);
                }
            }
        }

        Ok(TransformOutcome { row, warnings })
    }

    fn eval_static(&self, value: &StaticValue) -> Value {
        match value {
            StaticValue::Literal(literal) => Value::Text(literal.clone()),
            StaticValue::Function(function) => match function {
                StaticFunction::NowLocal => Value::DateTime((self.fns.now_local)()),
                StaticFunction::NowUtc => Value::DateTime((self.fns.now_utc)().naive_utc()),
                StaticFunction::NewGuid => Value::Uuid((self.fns.new_guid)()),
                StaticFunction::CurrentUser => Value::Text((self.fns.current_user)()),
            },
        }
    }
}

fn compile_op(t: &Transformation, table: &TableRef) -> Result<CompiledOp, TransformError> {
    Ok(match t {
        Transformation::Simple {
            source,
            target,
            null_default,
        } => CompiledOp::Simple {
            source: source.clone(),
            target: target.clone(),
            null_default: null_default.clone(),
        },
        Transformation::Concat {
            parts,
            target,
            null_default,
        } => CompiledOp::Concat {
            parts: parts.clone(),
            target: target.clone(),
            null_default: null_default.clone(),
        },
        Transformation::Split {
            source,
            delimiter,
            targets,
        } => CompiledOp::Split {
            source: source.clone(),
            delimiter: delimiter.clone(),
            targets: targets.clone(),
        },
        Transformation::Lookup {
            source,
            target,
            table,
            default,
            null_default,
        } => CompiledOp::Lookup {
            source: source.clone(),
            target: target.clone(),
            table: table.clone(),
            default: default.clone(),
            null_default: null_default.clone(),
        },
        Transformation::Calculated {
            expression,
            target,
            null_default,
        } => CompiledOp::Calculated {
            expr: parse_expression(expression).map_err(|source| TransformError::Compile {
                table: table.to_string(),
                target: target.clone(),
                source,
            })?,
            target: target.clone(),
            null_default: null_default.clone(),
        },
        Transformation::Static { target, value } => CompiledOp::Static {
            target: target.clone(),
            value: value.clone(),
        },
        Transformation::Conditional {
            target,
            whens,
            otherwise,
        } => CompiledOp::Conditional {
            target: target.clone(),
            whens: whens
                .iter()
                .map(|w| {
                    parse_predicate(&w.predicate)
                        .map(|p| (p, w.value.clone()))
                        .map_err(|source| TransformError::Compile {
                            table: table.to_string(),
                            target: target.clone(),
                            source,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
            otherwise: otherwise.clone(),
        },
        Transformation::Convert {
            source,
            source_format,
            target,
            target_type,
            null_default,
        } => CompiledOp::Convert {
            source: source.clone(),
            source_format: source_format.clone(),
            target: target.clone(),
            target_type: *target_type,
            null_default: null_default.clone(),
        },
        Transformation::KeyLookup {
            source,
            target,
            parent_table,
            null_default,
            ..
        } => CompiledOp::KeyLookup {
            source: source.clone(),
            target: target.clone(),
            parent_table: TableRef::parse(parent_table).to_string(),
            null_default: null_default.clone(),
        },
    })
}

/// A simple mapping copies the source value; with a source date format
/// the text is parsed into a datetime on the way through.
fn map_simple(source: &RowData, mapping: &SimpleMapping) -> Value {
    let value = source.value_of(&mapping.source);
    match (&mapping.source_date_format, &value) {
        (Some(fmt), Value::Text(text)) => {
            NaiveDateTime::parse_from_str(text.trim(), fmt)
                .ok()
                .or_else(|| {
                    chrono::NaiveDate::parse_from_str(text.trim(), fmt)
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(Value::DateTime)
                .unwrap_or(value)
        }
        _ => value,
    }
}

fn eval_concat(
    source: &RowData,
    parts: &[ConcatPart],
    null_default: &Option<String>,
) -> Value {
    let mut result = String::new();
    let mut every_column_null = true;
    for part in parts {
        match part {
            ConcatPart::Literal(text) => result.push_str(text),
            ConcatPart::Column(name) => {
                if let Some(text) = source.value_of(name).as_text() {
                    every_column_null = false;
                    result.push_str(&text);
                }
            }
        }
    }
    // Only an all-null, effectively empty result falls back.
    if every_column_null && result.trim().is_empty() {
        null_default_value(null_default)
    } else {
        Value::Text(result)
    }
}

fn eval_split(
    source: &RowData,
    src: &str,
    delimiter: &str,
    targets: &[SplitTarget],
    row: &mut RowData,
) {
    match source.value_of(src).as_text() {
        None => {
            for target in targets {
                row.set(&target.column, Value::Null);
            }
        }
        Some(text) => {
            let fragments: Vec<&str> = text.split(delimiter).collect();
            for target in targets {
                let value = fragments
                    .get(target.index)
                    .map(|f| Value::Text(f.trim().to_string()))
                    .unwrap_or(Value::Null);
                row.set(&target.column, value);
            }
        }
    }
}

fn eval_value_spec(source: &RowData, spec: &ValueSpec) -> Value {
    match spec {
        ValueSpec::Literal(text) => Value::Text(text.clone()),
        ValueSpec::Column(name) => source.value_of(name),
    }
}

fn null_default_value(null_default: &Option<String>) -> Value {
    match null_default {
        Some(literal) => Value::Text(literal.clone()),
        None => Value::Null,
    }
}
