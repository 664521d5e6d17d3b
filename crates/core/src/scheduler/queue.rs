//! Priority queue of pending redeliveries
//!
//! A binary min-heap over immutable entries ordered by
//! `(priority rank, next eligible time, insertion sequence)`. The sequence
//! number makes the order total, so equal keys pop in insertion order.
//!
//! Items handed out by [`RetryQueue::drain_ready`] stay tracked as in flight
//! until [`RetryQueue::finish`] or [`RetryQueue::requeue`], so a push for the
//! same key during a redelivery can see and merge with the running item.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use keel_domain::{Priority, RetryQueueItem};

#[derive(Debug, Clone)]
struct QueueEntry {
    seq: u64,
    item: RetryQueueItem,
}

impl QueueEntry {
    fn sort_key(&self) -> (u8, DateTime<Utc>, u64) {
        (self.item.priority.rank(), self.item.next_eligible_at, self.seq)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An item currently out for redelivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub item: RetryQueueItem,
    /// A forced retry arrived while the redelivery was running
    pub forced: bool,
    /// The item was cleared while the redelivery was running
    pub cancelled: bool,
}

/// Min-heap of [`RetryQueueItem`]s plus the items currently in flight
///
/// Not synchronized; the scheduler guards it with a single lock.
#[derive(Debug, Default)]
pub struct RetryQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    in_flight: HashMap<String, InFlight>,
    next_seq: u64,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an item, replacing any queued item with the same key
    pub fn push(&mut self, item: RetryQueueItem) {
        let key = item.key();
        self.remove_where(|queued| queued.key() == key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(QueueEntry { seq, item }));
    }

    pub fn pop(&mut self) -> Option<RetryQueueItem> {
        self.heap.pop().map(|Reverse(entry)| entry.item)
    }

    pub fn peek(&self) -> Option<&RetryQueueItem> {
        self.heap.peek().map(|Reverse(entry)| &entry.item)
    }

    /// Remove and return every item eligible at `now`, in pop order, and
    /// track each one as in flight
    ///
    /// Items that are not yet eligible keep their original sequence number.
    pub fn drain_ready(&mut self, now: DateTime<Utc>) -> Vec<RetryQueueItem> {
        let mut ready = Vec::new();
        let mut waiting = Vec::new();
        while let Some(Reverse(entry)) = self.heap.pop() {
            if entry.item.is_ready(now) {
                self.in_flight.insert(
                    entry.item.key(),
                    InFlight { item: entry.item.clone(), forced: false, cancelled: false },
                );
                ready.push(entry.item);
            } else {
                waiting.push(Reverse(entry));
            }
        }
        self.heap.extend(waiting);
        ready
    }

    /// Stop tracking `key` as in flight, returning its bookkeeping
    pub fn finish(&mut self, key: &str) -> Option<InFlight> {
        self.in_flight.remove(key)
    }

    /// Put an undelivered in-flight item back, unless a newer item for the
    /// same key was pushed meanwhile
    pub fn requeue(&mut self, mut item: RetryQueueItem) {
        let key = item.key();
        let flight = self.finish(&key);
        if flight.as_ref().is_some_and(|flight| flight.cancelled) || self.contains_key(&key) {
            return;
        }
        if flight.is_some_and(|flight| flight.forced) {
            item.priority = Priority::Critical;
        }
        self.push(item);
    }

    pub fn in_flight(&self, key: &str) -> Option<&InFlight> {
        self.in_flight.get(key)
    }

    pub fn in_flight_mut(&mut self, key: &str) -> Option<&mut InFlight> {
        self.in_flight.get_mut(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// The queued item for `key`, else the one in flight
    pub fn lookup(&self, key: &str) -> Option<&RetryQueueItem> {
        self.get(key).or_else(|| self.in_flight.get(key).map(|flight| &flight.item))
    }

    /// Mark in-flight items matching `predicate` as cancelled, returning
    /// their keys
    pub fn cancel_in_flight_where<F>(&mut self, mut predicate: F) -> Vec<String>
    where
        F: FnMut(&RetryQueueItem) -> bool,
    {
        self.in_flight
            .iter_mut()
            .filter(|(_, flight)| predicate(&flight.item))
            .map(|(key, flight)| {
                flight.cancelled = true;
                key.clone()
            })
            .collect()
    }

    /// Remove every item matching `predicate`, returning how many went
    pub fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&RetryQueueItem) -> bool,
    {
        let before = self.heap.len();
        self.heap.retain(|Reverse(entry)| !predicate(&entry.item));
        before - self.heap.len()
    }

    /// Remove and return every item matching `predicate`, in pop order
    pub fn take_where<F>(&mut self, mut predicate: F) -> Vec<RetryQueueItem>
    where
        F: FnMut(&RetryQueueItem) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = Vec::new();
        while let Some(Reverse(entry)) = self.heap.pop() {
            if predicate(&entry.item) {
                taken.push(entry.item);
            } else {
                kept.push(Reverse(entry));
            }
        }
        self.heap.extend(kept);
        taken
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.heap.iter().any(|Reverse(entry)| entry.item.key() == key)
    }

    pub fn get(&self, key: &str) -> Option<&RetryQueueItem> {
        self.heap.iter().map(|Reverse(entry)| &entry.item).find(|item| item.key() == key)
    }

    pub fn ready_count(&self, now: DateTime<Utc>) -> usize {
        self.heap.iter().filter(|Reverse(entry)| entry.item.is_ready(now)).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetryQueueItem> + '_ {
        self.heap.iter().map(|Reverse(entry)| &entry.item)
    }

    /// Items in pop order
    pub fn sorted(&self) -> Vec<RetryQueueItem> {
        let mut entries: Vec<&QueueEntry> = self.heap.iter().map(|Reverse(entry)| entry).collect();
        entries.sort();
        entries.into_iter().map(|entry| entry.item.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every queued item; in-flight tracking is left alone
    pub fn clear(&mut self) -> usize {
        let count = self.heap.len();
        self.heap.clear();
        count
    }
}
