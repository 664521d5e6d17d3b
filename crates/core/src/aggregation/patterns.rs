//! Pattern detection over a slice of the error history

use std::collections::HashMap;

use keel_domain::{ErrorPattern, ErrorRecord, PatternKey};

/// Group `records` into patterns, most frequent first
///
/// Ties are broken by pattern id so the output is deterministic.
pub fn detect_patterns<'a, I>(records: I, max_samples: usize) -> Vec<ErrorPattern>
where
    I: IntoIterator<Item = &'a ErrorRecord>,
{
    let mut groups: HashMap<PatternKey, ErrorPattern> = HashMap::new();
    for record in records {
        let key = PatternKey::of(record);
        match groups.get_mut(&key) {
            Some(pattern) => pattern.absorb(record, max_samples),
            None => {
                groups.insert(key, ErrorPattern::seed(record, max_samples));
            }
        }
    }

    let mut patterns: Vec<ErrorPattern> = groups.into_values().collect();
    patterns.sort_by(|a, b| {
        b.frequency.cmp(&a.frequency).then_with(|| a.pattern_id.cmp(&b.pattern_id))
    });
    patterns
}
