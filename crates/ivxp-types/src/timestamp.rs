//! ISO-8601 timestamps for the IVXP wire format.
//!
//! Every IVXP message carries a `timestamp`, and the signed payment and
//! confirmation messages embed one verbatim. The accepted grammar is
//! `YYYY-MM-DDThh:mm:ss[.fff](Z|±hh:mm)`: both the `Z` suffix and explicit
//! offsets must parse, with or without fractional seconds. Produced
//! timestamps are UTC with millisecond precision.

use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// A point in time carried on the wire.
///
/// The original offset is preserved so that a timestamp echoed back into a
/// signed message stays byte-for-byte what the peer transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(DateTime<FixedOffset>);

impl Timestamp {
    /// The current time in UTC.
    pub fn now() -> Self {
        Timestamp(Utc::now().fixed_offset())
    }

    /// Parse an ISO-8601 timestamp with a `Z` or `±hh:mm` offset.
    pub fn parse(input: &str) -> Result<Self, TimestampError> {
        DateTime::parse_from_rfc3339(input)
            .map(Timestamp)
            .map_err(|_| TimestampError(input.to_string()))
    }

    /// This timestamp shifted forward by whole seconds.
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Timestamp(self.0 + Duration::seconds(seconds))
    }

    /// The inner chrono value.
    pub fn as_datetime(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

/// Error returned for input outside the accepted timestamp grammar.
#[derive(Debug, thiserror::Error)]
#[error("Invalid ISO-8601 timestamp: {0}")]
pub struct TimestampError(String);

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.0
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timestamp::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Timestamp::parse(&s).map_err(serde::de::Error::custom)
    }
}
