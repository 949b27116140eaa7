use std::fmt;

use serde::{Serialize, Serializer};
use tracing::warn;

use super::{MosType, MosTypeTag, Strictness};
use crate::error::ValidationError;

/// A duration in whole seconds, written `HH:MM:SS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MosDuration(u64);

/// Accepted inputs for [`MosDuration::create`].
#[derive(Debug, Clone)]
pub enum DurationInput {
    Text(String),
    Seconds(u64),
}

impl From<String> for DurationInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for DurationInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<u64> for DurationInput {
    fn from(value: u64) -> Self {
        Self::Seconds(value)
    }
}

impl From<std::time::Duration> for DurationInput {
    fn from(value: std::time::Duration) -> Self {
        Self::Seconds(value.as_secs())
    }
}

impl MosDuration {
    pub fn from_seconds(seconds: u64) -> Self {
        Self(seconds)
    }
}

impl MosType for MosDuration {
    const TAG: MosTypeTag = MosTypeTag::Duration;
    const BLANK_IS_ABSENT: bool = true;
    type Input = DurationInput;
    /// Seconds.
    type Value = u64;

    fn create(input: impl Into<DurationInput>, strictness: Strictness) -> Result<Self, ValidationError> {
        let raw = match input.into() {
            DurationInput::Seconds(seconds) => return Ok(Self(seconds)),
            DurationInput::Text(raw) => raw,
        };
        match parse_clock(raw.trim(), strictness) {
            Some(seconds) => Ok(Self(seconds)),
            None if strictness.is_strict() => Err(ValidationError::InvalidDuration { raw }),
            None => {
                warn!(%raw, "invalid duration, using fallback");
                Ok(Self::fallback())
            }
        }
    }

    fn validate(&self, _strictness: Strictness) -> Result<(), ValidationError> {
        Ok(())
    }

    fn value_of(&self) -> u64 {
        self.0
    }

    fn stringify(&self) -> String {
        let hours = self.0 / 3600;
        let minutes = (self.0 % 3600) / 60;
        let seconds = self.0 % 60;
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }

    /// Zero seconds.
    fn fallback() -> Self {
        Self(0)
    }
}

/// `S`, `M:SS` or `H:MM:SS`. Strict mode requires minutes and seconds below 60
/// when a larger unit is present; lenient mode carries the overflow.
fn parse_clock(text: &str, strictness: Strictness) -> Option<u64> {
    let parts = text
        .split(':')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    if strictness.is_strict() && parts.iter().skip(1).any(|&unit| unit >= 60) {
        return None;
    }
    parts
        .iter()
        .try_fold(0u64, |total, &unit| total.checked_mul(60)?.checked_add(unit))
}

impl fmt::Display for MosDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl Serialize for MosDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.stringify())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let parse = |text| MosDuration::create(text, Strictness::Strict).unwrap().value_of();
        assert_eq!(parse("01:02:03"), 3723);
        assert_eq!(parse("2:30"), 150);
        assert_eq!(parse("45"), 45);
    }

    #[test]
    fn test_strict_rejects_overflowing_minutes() {
        assert_eq!(
            MosDuration::create("00:75:00", Strictness::Strict),
            Err(ValidationError::InvalidDuration {
                raw: "00:75:00".into()
            })
        );
        let lenient = MosDuration::create("00:75:00", Strictness::Lenient).unwrap();
        assert_eq!(lenient.stringify(), "01:15:00");
    }

    #[test]
    fn test_lenient_garbage_is_zero() {
        let value = MosDuration::create("soon", Strictness::Lenient).unwrap();
        assert_eq!(value, MosDuration::fallback());
    }
}
