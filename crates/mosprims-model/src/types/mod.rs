//! Typed protocol values.
//!
//! Every type supports two construction modes. [`Strictness::Strict`] rejects
//! out-of-range or malformed input with a [`ValidationError`];
//! [`Strictness::Lenient`] normalizes what it can (truncation, clamping) and
//! falls back to [`MosType::fallback`] when nothing can be recovered.

mod duration;
mod string128;
mod time;

use std::fmt;

use serde::Serialize;

use crate::error::ValidationError;

pub use duration::{DurationInput, MosDuration};
pub use string128::MosString128;
pub use time::{MosTime, TimeInput};

/// Global parse/construct policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    #[default]
    Strict,
    Lenient,
}

impl Strictness {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            Self::Strict
        } else {
            Self::Lenient
        }
    }

    pub fn is_strict(self) -> bool {
        self == Self::Strict
    }
}

/// Discriminant carried by every typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MosTypeTag {
    String128,
    Time,
    Duration,
}

impl fmt::Display for MosTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String128 => "mosString128",
            Self::Time => "mosTime",
            Self::Duration => "mosDuration",
        })
    }
}

/// Common interface of the typed values.
pub trait MosType: Sized + Clone + Into<AnyMosValue> {
    const TAG: MosTypeTag;

    /// Blank wire text reads as an absent field rather than a value.
    const BLANK_IS_ABSENT: bool = false;

    /// Accepted construction input.
    type Input: From<String>;

    /// Canonical primitive.
    type Value;

    fn create(input: impl Into<Self::Input>, strictness: Strictness) -> Result<Self, ValidationError>;

    /// Check an existing value against the policy.
    fn validate(&self, strictness: Strictness) -> Result<(), ValidationError>;

    fn value_of(&self) -> Self::Value;

    /// Wire representation.
    fn stringify(&self) -> String;

    /// Value substituted when lenient parsing cannot recover anything.
    fn fallback() -> Self;

    /// Parse wire text.
    fn parse(text: &str, strictness: Strictness) -> Result<Self, ValidationError> {
        Self::create(Self::Input::from(text.to_string()), strictness)
    }

    fn is(value: &AnyMosValue) -> bool {
        value.tag() == Self::TAG
    }
}

/// A typed value of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyMosValue {
    String128(MosString128),
    Time(MosTime),
    Duration(MosDuration),
}

impl AnyMosValue {
    pub fn tag(&self) -> MosTypeTag {
        match self {
            Self::String128(_) => MosTypeTag::String128,
            Self::Time(_) => MosTypeTag::Time,
            Self::Duration(_) => MosTypeTag::Duration,
        }
    }

    pub fn stringify(&self) -> String {
        match self {
            Self::String128(v) => v.stringify(),
            Self::Time(v) => v.stringify(),
            Self::Duration(v) => v.stringify(),
        }
    }
}

impl From<MosString128> for AnyMosValue {
    fn from(value: MosString128) -> Self {
        Self::String128(value)
    }
}

impl From<MosTime> for AnyMosValue {
    fn from(value: MosTime) -> Self {
        Self::Time(value)
    }
}

impl From<MosDuration> for AnyMosValue {
    fn from(value: MosDuration) -> Self {
        Self::Duration(value)
    }
}

/// Typed-value constructors bound to one [`Strictness`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MosTypes {
    pub strictness: Strictness,
}

impl MosTypes {
    pub fn new(strictness: Strictness) -> Self {
        Self { strictness }
    }

    pub fn string128(&self, value: impl Into<String>) -> Result<MosString128, ValidationError> {
        MosString128::create(value.into(), self.strictness)
    }

    pub fn time(&self, value: impl Into<TimeInput>) -> Result<MosTime, ValidationError> {
        MosTime::create(value, self.strictness)
    }

    pub fn duration(&self, value: impl Into<DurationInput>) -> Result<MosDuration, ValidationError> {
        MosDuration::create(value, self.strictness)
    }
}
