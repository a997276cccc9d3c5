//! ISO-8601 timestamps with seconds precision, as required by the
//! persisted artefact schemas.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer, de::Error};

const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&ts.format(FORMAT).to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let naive = NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(D::Error::custom)?;
    Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Stamped {
        #[serde(with = "super")]
        at: DateTime<Utc>,
    }

    #[test]
    fn round_trip_drops_subseconds() {
        let stamped = Stamped {
            at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 45).unwrap(),
        };
        let json = serde_json::to_string(&stamped).unwrap();
        assert_eq!(json, r#"{"at":"2026-03-01T12:30:45"}"#);
        let back: Stamped = serde_json::from_str(&json).unwrap();
        assert_eq!(back.at, stamped.at);
    }
}
