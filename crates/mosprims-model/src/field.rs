//! Field-level parsing of received messages.
//!
//! A field is either absent, present and valid, or present and invalid
//! ([`FieldValue`]). [`ParseContext`] walks a payload, tracks the dotted path of
//! the field being read and collects defects. In strict mode the first defect
//! becomes a [`ParseError`]; in lenient mode invalid fields fall back and the
//! defects are returned alongside the value. Either way one bad field never
//! changes how the others are read.

use mosprims_frame::XmlElement;
use tracing::warn;

use crate::error::{ParseError, ValidationError};
use crate::types::{MosType, Strictness};

/// Three-way result of reading one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<T> {
    Absent,
    Valid(T),
    Invalid { raw: String, error: ValidationError },
}

impl<T: MosType> FieldValue<T> {
    /// Classify optional wire text with strict validation.
    pub fn from_text(text: Option<&str>) -> Self {
        match text {
            None => Self::Absent,
            Some(raw) if T::BLANK_IS_ABSENT && raw.trim().is_empty() => Self::Absent,
            Some(raw) => match T::parse(raw, Strictness::Strict) {
                Ok(value) => Self::Valid(value),
                Err(error) => Self::Invalid {
                    raw: raw.to_string(),
                    error,
                },
            },
        }
    }

    /// Classify the text of `parent`'s child `name`.
    pub fn read(parent: &XmlElement, name: &str) -> Self {
        Self::from_text(parent.child_text(name).as_deref())
    }
}

impl<T> FieldValue<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn valid(self) -> Option<T> {
        match self {
            Self::Valid(value) => Some(value),
            _ => None,
        }
    }
}

/// A field that did not parse cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    pub path: String,
    pub error: ValidationError,
}

impl From<Defect> for ParseError {
    fn from(defect: Defect) -> Self {
        ParseError {
            path: defect.path,
            source: defect.error,
        }
    }
}

/// A leniently parsed value with the defects that were papered over.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<V> {
    pub value: V,
    pub defects: Vec<Defect>,
}

/// Tracks path and defects while reading a payload.
#[derive(Debug)]
pub struct ParseContext {
    strictness: Strictness,
    path: Vec<String>,
    defects: Vec<Defect>,
}

impl ParseContext {
    pub fn new(strictness: Strictness, root: &str) -> Self {
        Self {
            strictness,
            path: vec![root.to_string()],
            defects: Vec::new(),
        }
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    /// Run `f` with `name` appended to the current path.
    pub fn scope<R>(&mut self, name: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        self.path.push(name.to_string());
        let result = f(self);
        self.path.pop();
        result
    }

    /// Read an optional typed field.
    pub fn optional<T: MosType>(&mut self, parent: &XmlElement, name: &str) -> Option<T> {
        match FieldValue::<T>::read(parent, name) {
            FieldValue::Absent => None,
            FieldValue::Valid(value) => Some(value),
            FieldValue::Invalid { raw, error } => Some(self.recover(name, &raw, error)),
        }
    }

    /// Read a required typed field. A missing field is a defect.
    pub fn required<T: MosType>(&mut self, parent: &XmlElement, name: &str) -> T {
        match FieldValue::<T>::read(parent, name) {
            FieldValue::Valid(value) => value,
            FieldValue::Absent => {
                self.record(name, ValidationError::Missing);
                T::fallback()
            }
            FieldValue::Invalid { raw, error } => self.recover(name, &raw, error),
        }
    }

    /// Record a defect at `name` below the current path.
    pub fn record(&mut self, name: &str, error: ValidationError) {
        let path = self.path_to(name);
        if !self.strictness.is_strict() {
            warn!(%path, %error, "lenient parse substituted a field");
        }
        self.defects.push(Defect { path, error });
    }

    pub fn defects(&self) -> &[Defect] {
        &self.defects
    }

    /// Strict: fail with the first defect. Lenient: return the value with all defects.
    pub fn finish<V>(self, value: V) -> Result<Parsed<V>, ParseError> {
        let mut defects = self.defects;
        if self.strictness.is_strict() && !defects.is_empty() {
            return Err(defects.swap_remove(0).into());
        }
        Ok(Parsed { value, defects })
    }

    fn recover<T: MosType>(&mut self, name: &str, raw: &str, error: ValidationError) -> T {
        self.record(name, error);
        T::parse(raw, Strictness::Lenient).unwrap_or_else(|_| T::fallback())
    }

    fn path_to(&self, name: &str) -> String {
        let mut path = self.path.join(".");
        path.push('.');
        path.push_str(name);
        path
    }
}
