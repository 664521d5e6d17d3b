//! Delayed redelivery items and event records

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_domain_status_conversions;

/// Redelivery priority; `Critical` sorts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Self; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    /// Queue rank, lower pops first
    pub const fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl_domain_status_conversions!(Priority {
    Critical => "critical",
    High => "high",
    Normal => "normal",
    Low => "low",
});

/// One pending delayed redelivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryQueueItem {
    pub event_id: String,
    pub destination: String,
    /// 1-based attempt this item will perform
    pub attempt: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub priority: Priority,
    pub error_count: u32,
    pub last_error: String,
    pub created_at: DateTime<Utc>,
}

impl RetryQueueItem {
    /// Storage key; one pending item per event and destination
    pub fn key(&self) -> String {
        Self::key_for(&self.destination, &self.event_id)
    }

    /// `destination:event_id`, with backslashes and colons in the destination
    /// escaped by a backslash
    ///
    /// The first unescaped `:` always separates the two parts, so distinct
    /// pairs never share a key.
    pub fn key_for(destination: &str, event_id: &str) -> String {
        let mut key = String::with_capacity(destination.len() + event_id.len() + 1);
        for ch in destination.chars() {
            if matches!(ch, '\\' | ':') {
                key.push('\\');
            }
            key.push(ch);
        }
        key.push(':');
        key.push_str(event_id);
        key
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_at <= now
    }
}

/// Delivery status of a source event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Retrying,
    Delivered,
    Failed,
}

impl_domain_status_conversions!(EventStatus {
    Pending => "pending",
    Retrying => "retrying",
    Delivered => "delivered",
    Failed => "failed",
});

/// Delivery bookkeeping for one event at one destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub destination: String,
    pub status: EventStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(event_id: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            destination: destination.into(),
            status: EventStatus::Pending,
            attempts: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        RetryQueueItem::key_for(&self.destination, &self.event_id)
    }
}
