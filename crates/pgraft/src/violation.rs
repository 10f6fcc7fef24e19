//! Field-level validation violations.
//!
//! These types carry the machine-readable payload behind
//! [`GraftError::Validation`](crate::GraftError::Validation).

use serde::Serialize;
use std::collections::BTreeMap;

/// A machine-friendly violation code.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationCode {
    Required,
    Type,
    Unknown,
    Len,
    Range,
    Email,
    Regex,
    Url,
    OneOf,
    NotAllowed,
    Custom(String),
}

impl ViolationCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Required => "required",
            Self::Type => "type",
            Self::Unknown => "unknown",
            Self::Len => "len",
            Self::Range => "range",
            Self::Email => "email",
            Self::Regex => "regex",
            Self::Url => "url",
            Self::OneOf => "one_of",
            Self::NotAllowed => "not_allowed",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl Serialize for ViolationCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// A single field violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub code: ViolationCode,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

/// A collection of violations for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Violations {
    pub items: Vec<Violation>,
}

impl Violations {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn push(&mut self, violation: Violation) {
        self.items.push(violation);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.items.iter()
    }

    /// Group violations by field name, preserving per-field order.
    pub fn by_field(&self) -> BTreeMap<String, Violations> {
        let mut out: BTreeMap<String, Violations> = BTreeMap::new();
        for v in &self.items {
            out.entry(v.field.clone()).or_default().push(v.clone());
        }
        out
    }

    /// True if any violation targets the given field.
    pub fn has_field(&self, field: &str) -> bool {
        self.items.iter().any(|v| v.field == field)
    }
}

impl std::fmt::Display for Violations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, v) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", v.field, v.message)?;
        }
        Ok(())
    }
}
