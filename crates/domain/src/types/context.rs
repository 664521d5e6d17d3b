//! Structured context attached to records and batches

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::VARIES_SENTINEL;

/// Free-form structured context, ordered by key for stable output
pub type ContextMap = BTreeMap<String, serde_json::Value>;

/// One entry of a pattern's common context
///
/// Starts as the first occurrence's value and is downgraded to
/// [`ContextValue::Varies`] once two occurrences disagree. Serialized as the
/// plain value, or as the `"<varies>"` sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Value(serde_json::Value),
    Varies,
}

impl ContextValue {
    pub const fn is_varies(&self) -> bool {
        matches!(self, Self::Varies)
    }

    /// Fold another occurrence's value into this entry
    pub fn merge(&mut self, other: &serde_json::Value) {
        if let Self::Value(current) = self {
            if current != other {
                *self = Self::Varies;
            }
        }
    }
}

impl Serialize for ContextValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(value) => value.serialize(serializer),
            Self::Varies => serializer.serialize_str(VARIES_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for ContextValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        if value.as_str() == Some(VARIES_SENTINEL) {
            Ok(Self::Varies)
        } else {
            Ok(Self::Value(value))
        }
    }
}
