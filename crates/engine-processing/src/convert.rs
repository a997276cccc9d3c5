//! The `convert` transformation: parses a source value into a declared
//! SQL Server type. Date parsing is strict against an explicit source
//! format and otherwise accepts the common ISO-8601 shapes.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use model::{core::value::Value, plan::transform::ConvertType};
use std::str::FromStr;
use uuid::Uuid;

const ISO_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Attempts the conversion; `None` means the value could not be parsed
/// and the caller should fall back to the null default and record a
/// row-level warning.
pub fn convert_value(
    value: &Value,
    source_format: Option<&str>,
    target_type: ConvertType,
) -> Option<Value> {
    match target_type {
        ConvertType::DateTime | ConvertType::DateTime2 | ConvertType::SmallDateTime => {
            parse_datetime(value, source_format).map(Value::DateTime)
        }
        ConvertType::Date => parse_date(value, source_format).map(Value::Date),
        ConvertType::Int => value.as_i64().filter(in_i32_range).map(Value::Int),
        ConvertType::BigInt => value.as_i64().map(Value::Int),
        ConvertType::Decimal => value.as_big_decimal().map(Value::Decimal),
        ConvertType::Float => value.as_f64().map(Value::Float),
        ConvertType::Bit => value.as_bool().map(Value::Bool),
        ConvertType::VarChar | ConvertType::NVarChar => value.as_text().map(Value::Text),
        ConvertType::UniqueIdentifier => match value {
            Value::Uuid(id) => Some(Value::Uuid(*id)),
            other => other
                .as_text()
                .and_then(|text| Uuid::from_str(text.trim()).ok())
                .map(Value::Uuid),
        },
    }
}

fn in_i32_range(v: &i64) -> bool {
    i32::try_from(*v).is_ok()
}

fn parse_datetime(value: &Value, source_format: Option<&str>) -> Option<NaiveDateTime> {
    match value {
        Value::DateTime(ts) => Some(*ts),
        Value::Date(d) => d.and_hms_opt(0, 0, 0),
        Value::Text(text) => {
            let text = text.trim();
            match source_format {
                // Strict parse against the declared format; a date-only
                // format yields midnight.
                Some(fmt) => NaiveDateTime::parse_from_str(text, fmt).ok().or_else(|| {
                    NaiveDate::parse_from_str(text, fmt)
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                }),
                None => ISO_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                    .or_else(|| {
                        NaiveDate::parse_from_str(text, "%Y-%m-%d")
                            .ok()
                            .and_then(|d| d.and_hms_opt(0, 0, 0))
                    }),
            }
        }
        _ => None,
    }
}

fn parse_date(value: &Value, source_format: Option<&str>) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::DateTime(ts) => Some(ts.date()),
        Value::Text(_) => parse_datetime(value, source_format)
            .map(|ts| ts.date())
            .or_else(|| match value {
                Value::Text(text) => source_format
                    .and_then(|fmt| NaiveDate::parse_from_str(text.trim(), fmt).ok()),
                _ => None,
            }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn strict_format_parses_exactly() {
        let v = Value::Text("31/12/2025".into());
        let parsed = convert_value(&v, Some("%d/%m/%Y"), ConvertType::Date);
        assert_eq!(
            parsed,
            Some(Value::Date(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()))
        );
        // Same input without the format is not ISO and fails.
        assert_eq!(convert_value(&v, None, ConvertType::Date), None);
    }

    #[test]
    fn permissive_iso_datetime() {
        let v = Value::Text("2025-12-31T08:15:30".into());
        let parsed = convert_value(&v, None, ConvertType::DateTime).unwrap();
        assert_eq!(
            parsed,
            Value::DateTime(
                NaiveDate::from_ymd_opt(2025, 12, 31)
                    .unwrap()
                    .and_hms_opt(8, 15, 30)
                    .unwrap()
            )
        );
    }

    #[test]
    fn date_only_iso_becomes_midnight_datetime() {
        let v = Value::Text("2025-12-31".into());
        let parsed = convert_value(&v, None, ConvertType::DateTime2).unwrap();
        assert_eq!(
            parsed,
            Value::DateTime(
                NaiveDate::from_ymd_opt(2025, 12, 31)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn int_respects_i32_range() {
        assert_eq!(
            convert_value(&Value::Text("123".into()), None, ConvertType::Int),
            Some(Value::Int(123))
        );
        assert_eq!(
            convert_value(&Value::Int(i64::MAX), None, ConvertType::Int),
            None
        );
        assert_eq!(
            convert_value(&Value::Int(i64::MAX), None, ConvertType::BigInt),
            Some(Value::Int(i64::MAX))
        );
    }

    #[test]
    fn bit_accepts_common_spellings() {
        assert_eq!(
            convert_value(&Value::Text("yes".into()), None, ConvertType::Bit),
            Some(Value::Bool(true))
        );
        assert_eq!(
            convert_value(&Value::Text("maybe".into()), None, ConvertType::Bit),
            None
        );
    }

    #[test]
    fn uniqueidentifier_round_trips() {
        let id = "6fa459ea-ee8a-3ca4-894e-db77e160355e";
        assert_eq!(
            convert_value(&Value::Text(id.into()), None, ConvertType::UniqueIdentifier),
            Some(Value::Uuid(Uuid::from_str(id).unwrap()))
        );
        assert_eq!(
            convert_value(&Value::Text("nope".into()), None, ConvertType::UniqueIdentifier),
            None
        );
    }
}
