use super::Value;
use serde::{Deserialize, Serialize};

/// An artifact observed in the protected environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub value: Value,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub source: String,
    /// Unix seconds
    #[serde(default)]
    pub recorded_at: i64,
}

impl Entity {
    pub fn new(value: Value, label: impl Into<String>, source: impl Into<String>, recorded_at: i64) -> Self {
        Self {
            value,
            label: label.into(),
            source: source.into(),
            recorded_at,
        }
    }

    /// Entity with empty provenance, used as query input
    pub fn of(value: Value) -> Self {
        Self::new(value, "", "", 0)
    }
}

/// A known-bad indicator reported by a feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ioc {
    pub value: Value,
    #[serde(default)]
    pub source: String,
    /// Unix seconds
    #[serde(default)]
    pub updated_at: i64,
}

impl Ioc {
    pub fn new(value: Value, source: impl Into<String>, updated_at: i64) -> Self {
        Self {
            value,
            source: source.into(),
            updated_at,
        }
    }

    pub fn of(value: Value) -> Self {
        Self::new(value, "", 0)
    }
}
