use std::fmt;

use serde::Serialize;
use tracing::warn;

use super::{MosType, MosTypeTag, Strictness};
use crate::error::ValidationError;

/// A string of at most 128 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct MosString128(String);

impl MosString128 {
    pub const MAX_CHARS: usize = 128;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl MosType for MosString128 {
    const TAG: MosTypeTag = MosTypeTag::String128;
    type Input = String;
    type Value = String;

    fn create(input: impl Into<Self::Input>, strictness: Strictness) -> Result<Self, ValidationError> {
        let text = input.into();
        let len = text.chars().count();
        if len <= Self::MAX_CHARS {
            return Ok(Self(text));
        }
        match strictness {
            Strictness::Strict => Err(ValidationError::TooLong {
                len,
                max: Self::MAX_CHARS,
            }),
            Strictness::Lenient => {
                warn!(len, "truncating string to {} characters", Self::MAX_CHARS);
                Ok(Self(text.chars().take(Self::MAX_CHARS).collect()))
            }
        }
    }

    fn validate(&self, strictness: Strictness) -> Result<(), ValidationError> {
        let len = self.0.chars().count();
        if strictness.is_strict() && len > Self::MAX_CHARS {
            return Err(ValidationError::TooLong {
                len,
                max: Self::MAX_CHARS,
            });
        }
        Ok(())
    }

    fn value_of(&self) -> String {
        self.0.clone()
    }

    fn stringify(&self) -> String {
        self.0.clone()
    }

    fn fallback() -> Self {
        Self(String::new())
    }
}

impl fmt::Display for MosString128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_128_is_accepted() {
        let text = "é".repeat(128);
        let value = MosString128::create(text.clone(), Strictness::Strict).unwrap();
        assert_eq!(value.as_str(), text);
    }

    #[test]
    fn test_strict_rejects_129() {
        let err = MosString128::create("a".repeat(129), Strictness::Strict).unwrap_err();
        assert_eq!(err, ValidationError::TooLong { len: 129, max: 128 });
    }

    #[test]
    fn test_lenient_truncates() {
        let value = MosString128::create("b".repeat(200), Strictness::Lenient).unwrap();
        assert_eq!(value.stringify(), "b".repeat(128));
        assert!(value.validate(Strictness::Strict).is_ok());
    }

    #[test]
    fn test_fallback_is_empty() {
        assert_eq!(MosString128::fallback().as_str(), "");
    }
}
