//! Serde helpers for runtime JSON conventions.
//!
//! Use with `#[serde(with = "...")]` on model fields:
//!
//! | Module | Rust type | Wire form |
//! |--------|-----------|-----------|
//! | [`timestamp`] | `DateTime<Utc>` | ISO-8601 string or Unix seconds |
//! | [`optional_timestamp`] | `Option<DateTime<Utc>>` | as above; zero time and `null` are `None` |
//! | [`duration_nanos`] | `Duration` | integer nanoseconds |
//! | [`duration_secs`] | `Duration` | integer seconds |
//! | [`base64_bytes`] | `Vec<u8>` | standard base64 string |
//!
//! ```
//! use chrono::{DateTime, Utc};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Event {
//!     #[serde(with = "dockhand::protocol::json::timestamp")]
//!     time: DateTime<Utc>,
//! }
//!
//! let from_epoch: Event = serde_json::from_str(r#"{"time": 1700000000}"#).unwrap();
//! let from_text: Event = serde_json::from_str(r#"{"time": "2023-11-14T22:13:20Z"}"#).unwrap();
//! assert_eq!(from_epoch.time, from_text.time);
//! ```

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Epoch(i64),
    Text(String),
}

fn parse_timestamp<E: serde::de::Error>(raw: RawTimestamp) -> Result<DateTime<Utc>, E> {
    match raw {
        RawTimestamp::Epoch(secs) => DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| E::custom(format!("timestamp out of range: {secs}"))),
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|err| E::custom(format!("invalid timestamp {text:?}: {err}"))),
    }
}

/// `DateTime<Utc>` from an ISO-8601 string or Unix seconds; serialized as RFC 3339.
pub mod timestamp {
    use super::*;

    /// Serialize as an RFC 3339 string.
    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    /// Deserialize from a string or an integer.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        parse_timestamp(RawTimestamp::deserialize(deserializer)?)
    }
}

/// Like [`timestamp`], mapping `null` and the zero time (`0001-01-01T00:00:00Z`) to `None`.
pub mod optional_timestamp {
    use super::*;
    use chrono::Datelike;

    /// Serialize `None` as `null`.
    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_str(&value.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize, treating the zero time as absent.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<RawTimestamp>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => {
                let parsed = parse_timestamp::<D::Error>(raw)?;
                Ok((parsed.year() > 1).then_some(parsed))
            }
        }
    }
}

/// `Duration` as integer nanoseconds.
pub mod duration_nanos {
    use super::*;
    use std::time::Duration;

    /// Serialize as nanoseconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = i64::try_from(value.as_nanos()).map_err(serde::ser::Error::custom)?;
        serializer.serialize_i64(nanos)
    }

    /// Deserialize from nanoseconds; negative values are rejected.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(deserializer)?;
        u64::try_from(nanos)
            .map(Duration::from_nanos)
            .map_err(|_| D::Error::custom(format!("negative duration: {nanos}")))
    }
}

/// `Duration` as integer seconds.
pub mod duration_secs {
    use super::*;
    use std::time::Duration;

    /// Serialize as whole seconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    /// Deserialize from whole seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// `Vec<u8>` as a standard base64 string.
pub mod base64_bytes {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    /// Serialize as base64.
    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    /// Deserialize from base64.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "optional_timestamp")]
        finished: Option<DateTime<Utc>>,
        #[serde(with = "duration_nanos")]
        interval: Duration,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    }

    #[test]
    fn test_zero_time_is_none() {
        let sample: Sample = serde_json::from_str(
            r#"{"finished":"0001-01-01T00:00:00Z","interval":30000000000,"data":"aGk="}"#,
        )
        .unwrap();
        assert!(sample.finished.is_none());
        assert_eq!(sample.interval, Duration::from_secs(30));
        assert_eq!(sample.data, b"hi");
    }

    #[test]
    fn test_fractional_timestamp() {
        let sample: Sample = serde_json::from_str(
            r#"{"finished":"2024-03-01T10:00:00.123456789+02:00","interval":0,"data":""}"#,
        )
        .unwrap();
        let finished = sample.finished.unwrap();
        assert_eq!(finished.to_rfc3339(), "2024-03-01T08:00:00.123456789+00:00");
    }

    #[test]
    fn test_null_timestamp() {
        let sample: Sample =
            serde_json::from_str(r#"{"finished":null,"interval":1,"data":""}"#).unwrap();
        assert!(sample.finished.is_none());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result = serde_json::from_str::<Sample>(r#"{"finished":null,"interval":-5,"data":""}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_round() {
        let sample = Sample {
            finished: None,
            interval: Duration::from_millis(5),
            data: vec![0xff],
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["interval"], 5_000_000);
        assert_eq!(json["data"], "/w==");
        assert!(json["finished"].is_null());
    }
}
