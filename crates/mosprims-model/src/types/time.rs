use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::warn;

use super::{MosType, MosTypeTag, Strictness};
use crate::error::ValidationError;

/// A point in time with the offset it was expressed in.
///
/// Wire form is `YYYY-MM-DDTHH:MM:SS,mmm` followed by `Z` or `±HH:MM`. On input
/// a space may replace the `T`, `.` may replace `,`, the fraction is optional and
/// a missing zone is read as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosTime(DateTime<FixedOffset>);

/// Accepted inputs for [`MosTime::create`].
#[derive(Debug, Clone)]
pub enum TimeInput {
    Text(String),
    UnixMillis(i64),
    DateTime(DateTime<FixedOffset>),
}

impl From<String> for TimeInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for TimeInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for TimeInput {
    fn from(value: i64) -> Self {
        Self::UnixMillis(value)
    }
}

impl From<DateTime<FixedOffset>> for TimeInput {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::DateTime(value)
    }
}

impl From<DateTime<Utc>> for TimeInput {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value.fixed_offset())
    }
}

impl MosTime {
    pub fn now() -> Self {
        Self(Utc::now().fixed_offset())
    }

    pub fn as_datetime(&self) -> DateTime<FixedOffset> {
        self.0
    }

    fn invalid(raw: String, strictness: Strictness) -> Result<Self, ValidationError> {
        match strictness {
            Strictness::Strict => Err(ValidationError::InvalidTimestamp { raw }),
            Strictness::Lenient => {
                warn!(%raw, "invalid timestamp, using fallback");
                Ok(Self::fallback())
            }
        }
    }
}

impl MosType for MosTime {
    const TAG: MosTypeTag = MosTypeTag::Time;
    const BLANK_IS_ABSENT: bool = true;
    type Input = TimeInput;
    /// Milliseconds since the Unix epoch.
    type Value = i64;

    fn create(input: impl Into<TimeInput>, strictness: Strictness) -> Result<Self, ValidationError> {
        match input.into() {
            TimeInput::DateTime(dt) => Ok(Self(dt)),
            TimeInput::UnixMillis(ms) => match DateTime::from_timestamp_millis(ms) {
                Some(dt) => Ok(Self(dt.fixed_offset())),
                None => Self::invalid(ms.to_string(), strictness),
            },
            TimeInput::Text(raw) => match parse_text(&raw) {
                Some(dt) => Ok(Self(dt)),
                None => Self::invalid(raw, strictness),
            },
        }
    }

    fn validate(&self, _strictness: Strictness) -> Result<(), ValidationError> {
        Ok(())
    }

    fn value_of(&self) -> i64 {
        self.0.timestamp_millis()
    }

    fn stringify(&self) -> String {
        let stamp = self.0.format("%Y-%m-%dT%H:%M:%S,%3f");
        if self.0.offset().local_minus_utc() == 0 {
            format!("{stamp}Z")
        } else {
            format!("{stamp}{}", self.0.format("%:z"))
        }
    }

    /// The Unix epoch in UTC.
    fn fallback() -> Self {
        Self(DateTime::<Utc>::default().fixed_offset())
    }
}

fn parse_text(raw: &str) -> Option<DateTime<FixedOffset>> {
    let mut text = raw.trim().replacen(' ', "T", 1).replace(',', ".");
    if let Some(head) = text.strip_suffix('Z').or_else(|| text.strip_suffix('z')) {
        text = format!("{head}+00:00");
    }

    for format in [
        "%Y-%m-%dT%H:%M:%S%.f%:z",
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M:%S%.f%#z",
    ] {
        if let Ok(dt) = DateTime::parse_from_str(&text, format) {
            return Some(dt);
        }
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().fixed_offset());
    }
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

impl fmt::Display for MosTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl Serialize for MosTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.stringify())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict(text: &str) -> MosTime {
        MosTime::create(text, Strictness::Strict).unwrap()
    }

    #[test]
    fn test_parse_wire_forms() {
        let reference = strict("2009-04-11T14:22:07Z").value_of();
        assert_eq!(reference, 1_239_459_727_000);
        assert_eq!(strict("2009-04-11T14:22:07,000Z").value_of(), reference);
        assert_eq!(strict("2009-04-11 14:22:07.000").value_of(), reference);
        assert_eq!(strict("2009-04-11T16:22:07+02:00").value_of(), reference);
        assert_eq!(strict("2009-04-11T09:22:07-0500").value_of(), reference);
        assert_eq!(strict("2009-04-11T14:22:07,250Z").value_of(), reference + 250);
    }

    #[test]
    fn test_stringify_keeps_offset() {
        assert_eq!(strict("2009-04-11T14:22:07Z").stringify(), "2009-04-11T14:22:07,000Z");
        assert_eq!(
            strict("2009-04-11T16:22:07.5+02:00").stringify(),
            "2009-04-11T16:22:07,500+02:00"
        );
    }

    #[test]
    fn test_strict_rejects_garbage() {
        let err = MosTime::create("not a time", Strictness::Strict).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid timestamp: \"not a time\""
        );
    }

    #[test]
    fn test_lenient_falls_back_to_epoch() {
        let value = MosTime::create("2009-13-45T99:00:00", Strictness::Lenient).unwrap();
        assert_eq!(value, MosTime::fallback());
        assert_eq!(value.value_of(), 0);
    }

    #[test]
    fn test_create_from_millis() {
        let value = MosTime::create(1_239_459_727_000_i64, Strictness::Strict).unwrap();
        assert_eq!(value.stringify(), "2009-04-11T14:22:07,000Z");
    }
}
