//! Recurring-failure groupings
//!
//! Patterns are derived views: they are rebuilt from the live error history
//! on every request and never updated incrementally.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use keel_common::error::{ErrorCategory, ErrorSeverity};
use serde::{Deserialize, Serialize};

use super::context::ContextValue;
use super::error_record::ErrorRecord;

/// Grouping key of a pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternKey {
    pub error_type: String,
    pub stage: String,
    pub operation: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
}

impl PatternKey {
    pub fn of(record: &ErrorRecord) -> Self {
        Self {
            error_type: record.error_type.clone(),
            stage: record.stage.clone(),
            operation: record.operation.clone(),
            category: record.category(),
            severity: record.severity(),
        }
    }

    /// Human-readable identifier, `type:stage:operation:category:severity`
    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.error_type, self.stage, self.operation, self.category, self.severity
        )
    }
}

/// Structurally similar failures observed within one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub pattern_id: String,
    pub key: PatternKey,
    pub frequency: usize,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub affected_entities: BTreeSet<String>,
    pub sample_messages: Vec<String>,
    pub common_context: BTreeMap<String, ContextValue>,
}

impl ErrorPattern {
    /// Start a pattern from its first occurrence
    pub fn seed(record: &ErrorRecord, max_samples: usize) -> Self {
        let key = PatternKey::of(record);
        let mut pattern = Self {
            pattern_id: key.id(),
            key,
            frequency: 1,
            first_occurrence: record.timestamp,
            last_occurrence: record.timestamp,
            affected_entities: BTreeSet::new(),
            sample_messages: Vec::new(),
            common_context: record
                .context
                .iter()
                .map(|(k, v)| (k.clone(), ContextValue::Value(v.clone())))
                .collect(),
        };
        pattern.note_entity_and_sample(record, max_samples);
        pattern
    }

    /// Fold a further occurrence into the pattern
    ///
    /// Context keys missing from `record` count as disagreement.
    pub fn absorb(&mut self, record: &ErrorRecord, max_samples: usize) {
        self.frequency += 1;
        self.first_occurrence = self.first_occurrence.min(record.timestamp);
        self.last_occurrence = self.last_occurrence.max(record.timestamp);
        for (key, entry) in &mut self.common_context {
            match record.context.get(key) {
                Some(value) => entry.merge(value),
                None => *entry = ContextValue::Varies,
            }
        }
        for key in record.context.keys() {
            if !self.common_context.contains_key(key) {
                self.common_context.insert(key.clone(), ContextValue::Varies);
            }
        }
        self.note_entity_and_sample(record, max_samples);
    }

    fn note_entity_and_sample(&mut self, record: &ErrorRecord, max_samples: usize) {
        if let Some(entity) = &record.entity_id {
            self.affected_entities.insert(entity.clone());
        }
        if self.sample_messages.len() < max_samples {
            self.sample_messages.push(record.message.clone());
        }
    }

    pub fn affected_entity_count(&self) -> usize {
        self.affected_entities.len()
    }
}
