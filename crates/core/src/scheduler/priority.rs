//! Priority derivation for retries scheduled without an explicit priority

use std::collections::HashSet;

use keel_domain::constants::TRANSIENT_ERROR_MARKERS;
use keel_domain::Priority;

/// Rules that pick a priority from destination, attempt and error text
#[derive(Debug, Clone, Default)]
pub struct PriorityRules {
    payment_destinations: HashSet<String>,
}

impl PriorityRules {
    pub fn new<I, S>(payment_destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            payment_destinations: payment_destinations
                .into_iter()
                .map(|d| d.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn is_payment_destination(&self, destination: &str) -> bool {
        self.payment_destinations.contains(&destination.to_lowercase())
    }

    /// First matching rule wins: payment destination, transient error
    /// text, repeat attempt, otherwise Normal
    pub fn derive(&self, destination: &str, attempt: u32, error: &str) -> Priority {
        if self.is_payment_destination(destination) {
            return Priority::Critical;
        }
        let error = error.to_lowercase();
        if TRANSIENT_ERROR_MARKERS.iter().any(|marker| error.contains(marker)) {
            return Priority::High;
        }
        if attempt >= 2 {
            return Priority::High;
        }
        Priority::Normal
    }
}
