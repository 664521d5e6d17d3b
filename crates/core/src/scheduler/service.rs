//! Delayed retry scheduler - core business logic
//!
//! Pending redeliveries live in a [`RetryQueue`] guarded by one lock and are
//! mirrored to a [`RetryStore`] so the queue can be rebuilt after a restart.
//! A background loop sweeps ready items every `sweep_interval`; each sweep
//! redelivers at most `max_concurrency` items at a time and either removes,
//! reschedules or drops them.
//!
//! Every change that touches both the store and the queue runs under one
//! async write gate, so the store always holds exactly the keys that are
//! queued or in flight. A schedule for a key whose redelivery is running
//! merges with it and survives the redelivery's outcome; a forced retry of a
//! running key is folded into that redelivery instead of delivering twice.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_common::error::CommonError;
use keel_common::resilience::{
    CircuitBreakerRegistry, CircuitBreakerSnapshot, Clock, RetryConfigError, RetryPolicy,
    SystemClock,
};
use keel_domain::{ErrorRecord, EventRecord, EventStatus, KeelError, Priority, RetryQueueItem};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::ports::{Redeliverer, RetryStore};
use super::priority::PriorityRules;
use super::queue::RetryQueue;
use crate::aggregation::ErrorAggregator;
use crate::config::SchedulerConfig;

const SCHEDULER_STAGE: &str = "retry_scheduler";

/// Scheduler lifecycle and persistence failures
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Retry scheduler is already running")]
    AlreadyRunning,

    #[error("Retry scheduler is not running")]
    NotRunning,

    #[error("Retry scheduler is shutting down")]
    ShuttingDown,

    #[error("Invalid retry policy for '{destination}': {source}")]
    Config {
        destination: String,
        #[source]
        source: RetryConfigError,
    },

    #[error("Retry store failed: {0}")]
    Store(#[from] KeelError),
}

#[derive(Debug, Default)]
struct SchedulerCounters {
    scheduled: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    rescheduled: AtomicU64,
    dropped: AtomicU64,
    deferred: AtomicU64,
}

impl SchedulerCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub ready: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub dropped: usize,
    /// Ready items pushed back because their destination's breaker is open
    pub deferred: usize,
}

/// Operator view of the queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub total_queued: usize,
    pub ready: usize,
    pub by_destination: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
    pub oldest_item: Option<DateTime<Utc>>,
    pub scheduled: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub rescheduled: u64,
    pub dropped: u64,
    pub deferred: u64,
    /// Items currently out for redelivery
    pub in_flight: usize,
    pub running: bool,
    pub paused: bool,
    pub breakers: Vec<CircuitBreakerSnapshot>,
}

/// Durable, time-ordered redelivery queue with per-destination policies
/// and breakers
pub struct RetryScheduler<C: Clock + Clone = SystemClock> {
    config: SchedulerConfig,
    default_policy: RetryPolicy,
    policies: RwLock<HashMap<String, RetryPolicy>>,
    priority_rules: PriorityRules,
    breakers: Arc<CircuitBreakerRegistry<C>>,
    queue: Mutex<RetryQueue>,
    store: Arc<dyn RetryStore>,
    redeliverer: Arc<dyn Redeliverer>,
    aggregator: Option<Arc<ErrorAggregator>>,
    permits: Arc<Semaphore>,
    counters: SchedulerCounters,
    running: AtomicBool,
    paused: AtomicBool,
    stopping: AtomicBool,
    sweep_gate: tokio::sync::Mutex<()>,
    write_gate: tokio::sync::Mutex<()>,
    shutdown: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
    clock: C,
}

impl<C: Clock + Clone> std::fmt::Debug for RetryScheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("queued", &self.queue.lock().len())
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

impl RetryScheduler<SystemClock> {
    /// # Errors
    /// Returns `SchedulerError::Config` when a destination override in
    /// `config` is invalid.
    pub fn new(
        config: SchedulerConfig,
        breakers: Arc<CircuitBreakerRegistry>,
        store: Arc<dyn RetryStore>,
        redeliverer: Arc<dyn Redeliverer>,
    ) -> Result<Self, SchedulerError> {
        Self::with_clock(config, breakers, store, redeliverer, SystemClock)
    }
}

impl<C: Clock + Clone> RetryScheduler<C> {
    /// # Errors
    /// Returns `SchedulerError::Config` when a destination override in
    /// `config` is invalid.
    pub fn with_clock(
        config: SchedulerConfig,
        breakers: Arc<CircuitBreakerRegistry<C>>,
        store: Arc<dyn RetryStore>,
        redeliverer: Arc<dyn Redeliverer>,
        clock: C,
    ) -> Result<Self, SchedulerError> {
        for (destination, policy) in &config.destinations {
            policy.validate().map_err(|source| SchedulerError::Config {
                destination: destination.clone(),
                source,
            })?;
        }
        let policies = config.destinations.clone().into_iter().collect();
        Ok(Self {
            priority_rules: PriorityRules::new(&config.payment_destinations),
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            default_policy: RetryPolicy::default(),
            policies: RwLock::new(policies),
            breakers,
            queue: Mutex::new(RetryQueue::new()),
            store,
            redeliverer,
            aggregator: None,
            counters: SchedulerCounters::default(),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            sweep_gate: tokio::sync::Mutex::new(()),
            write_gate: tokio::sync::Mutex::new(()),
            shutdown: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
            config,
            clock,
        })
    }

    /// Policy for destinations without their own registration
    pub fn with_default_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Report permanently failed redeliveries to `aggregator`
    pub fn with_aggregator(mut self, aggregator: Arc<ErrorAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry<C>> {
        &self.breakers
    }

    /// Set the retry policy for one destination
    ///
    /// # Errors
    /// Returns `SchedulerError::Config` when `policy` does not validate.
    pub fn register_destination(
        &self,
        destination: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<(), SchedulerError> {
        let destination = destination.into();
        policy.validate().map_err(|source| SchedulerError::Config {
            destination: destination.clone(),
            source,
        })?;
        info!(destination = %destination, max_attempts = policy.max_attempts, "Registered retry destination");
        self.policies.write().insert(destination, policy);
        Ok(())
    }

    pub fn policy_for(&self, destination: &str) -> RetryPolicy {
        self.policies.read().get(destination).cloned().unwrap_or_else(|| self.default_policy.clone())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Queue a delayed redelivery of `event_id` to `destination`
    ///
    /// Returns `Ok(false)` without side effects when `attempt` exceeds the
    /// destination's `max_attempts` or its breaker rejects calls. Without an
    /// explicit `priority` one is derived from destination, error text and
    /// attempt. An item already queued or in flight for the same key passes
    /// on its error count and creation time.
    ///
    /// # Errors
    /// Returns `SchedulerError::Store` when the item cannot be persisted (it
    /// is then not queued either), or `ShuttingDown` during `stop()`.
    #[instrument(skip(self, error))]
    pub async fn schedule_retry(
        &self,
        event_id: &str,
        destination: &str,
        attempt: u32,
        error: &str,
        priority: Option<Priority>,
    ) -> Result<bool, SchedulerError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }
        let attempt = attempt.max(1);
        let policy = self.policy_for(destination);
        if attempt > policy.max_attempts {
            SchedulerCounters::bump(&self.counters.rejected);
            debug!(max_attempts = policy.max_attempts, "Retry rejected, attempts exhausted");
            return Ok(false);
        }
        if !self.breakers.can_execute(destination) {
            SchedulerCounters::bump(&self.counters.rejected);
            debug!("Retry rejected, circuit open");
            return Ok(false);
        }

        let now = self.clock.utc_now();
        let priority =
            priority.unwrap_or_else(|| self.priority_rules.derive(destination, attempt, error));
        let delay = policy.delay_for_attempt(attempt);
        let key = RetryQueueItem::key_for(destination, event_id);
        let _write = self.write_gate.lock().await;
        let (error_count, created_at) = self
            .queue
            .lock()
            .lookup(&key)
            .map_or((1, now), |known| (known.error_count.saturating_add(1), known.created_at));

        let item = RetryQueueItem {
            event_id: event_id.to_string(),
            destination: destination.to_string(),
            attempt,
            next_eligible_at: after(now, delay),
            priority,
            error_count,
            last_error: error.to_string(),
            created_at,
        };
        self.store.store_retry(&item).await?;
        self.queue.lock().push(item);
        SchedulerCounters::bump(&self.counters.scheduled);
        self.mark_event(event_id, destination, EventStatus::Retrying, attempt, Some(error)).await;

        info!(%priority, ?delay, "Retry scheduled");
        Ok(true)
    }

    /// Queue `event_id` at Critical priority, eligible immediately
    ///
    /// Bypasses the attempt limit and the breaker; keeps the attempt number
    /// and error history of an already pending item. When the event's
    /// redelivery is already running and nothing newer is queued, the force
    /// is attached to that redelivery: a failure reschedules it at Critical,
    /// eligible immediately, whatever the limits say.
    ///
    /// # Errors
    /// Returns `SchedulerError::Store` when the store cannot be read or
    /// written, or `ShuttingDown` during `stop()`.
    #[instrument(skip(self))]
    pub async fn force_retry_event(
        &self,
        event_id: &str,
        destination: &str,
    ) -> Result<(), SchedulerError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }
        let key = RetryQueueItem::key_for(destination, event_id);
        let _write = self.write_gate.lock().await;
        let (queued, running_attempt) = {
            let mut queue = self.queue.lock();
            match queue.get(&key).cloned() {
                Some(item) => (Some(item), None),
                None => (
                    None,
                    queue.in_flight_mut(&key).map(|flight| {
                        flight.forced = true;
                        flight.item.attempt
                    }),
                ),
            }
        };
        if let Some(attempt) = running_attempt {
            self.mark_event(event_id, destination, EventStatus::Retrying, attempt, None).await;
            info!(event_id, "Redelivery already running, forced retry attached to it");
            return Ok(());
        }
        let existing = match queued {
            Some(item) => Some(item),
            None => self.store.get_retry(&key).await?,
        };

        let now = self.clock.utc_now();
        let item = match existing {
            Some(item) => RetryQueueItem { next_eligible_at: now, priority: Priority::Critical, ..item },
            None => RetryQueueItem {
                event_id: event_id.to_string(),
                destination: destination.to_string(),
                attempt: 1,
                next_eligible_at: now,
                priority: Priority::Critical,
                error_count: 0,
                last_error: "forced retry".to_string(),
                created_at: now,
            },
        };
        self.store.store_retry(&item).await?;
        let attempt = item.attempt;
        self.queue.lock().push(item);
        SchedulerCounters::bump(&self.counters.scheduled);
        self.mark_event(event_id, destination, EventStatus::Retrying, attempt, None).await;
        info!(event_id, "Forced retry queued");
        Ok(())
    }

    /// Redeliver every item that is eligible now
    ///
    /// Does nothing while paused. Concurrent sweeps are serialized, and
    /// every redelivery started by a sweep finishes before it returns.
    pub async fn sweep_once(self: &Arc<Self>) -> SweepReport {
        let mut report = SweepReport::default();
        if self.is_paused() {
            return report;
        }
        let _gate = self.sweep_gate.lock().await;

        let now = self.clock.utc_now();
        let ready = self.queue.lock().drain_ready(now);
        report.ready = ready.len();

        let mut in_flight = JoinSet::new();
        let mut dispatched: HashMap<String, RetryQueueItem> = HashMap::new();
        for mut item in ready {
            let breaker = self.breakers.get(&item.destination);
            if !breaker.can_execute() {
                let wait = breaker
                    .time_until_retry()
                    .unwrap_or_else(|| self.policy_for(&item.destination).base_delay);
                item.next_eligible_at = after(now, wait);
                self.queue.lock().requeue(item);
                SchedulerCounters::bump(&self.counters.deferred);
                report.deferred += 1;
                continue;
            }

            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                self.queue.lock().requeue(item);
                continue;
            };
            let redeliverer = Arc::clone(&self.redeliverer);
            dispatched.insert(item.key(), item.clone());
            in_flight.spawn(async move {
                let _permit = permit;
                let outcome = redeliverer.redeliver(&item).await;
                (item, outcome)
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((item, outcome)) => {
                    dispatched.remove(&item.key());
                    self.settle(item, outcome, &mut report).await;
                }
                Err(err) => error!(error = %err, "Redelivery task failed"),
            }
        }
        // Items whose task panicked go back as they were; the store still has them.
        for (_, item) in dispatched {
            self.queue.lock().requeue(item);
        }
        if report.ready > 0 {
            debug!(?report, "Sweep finished");
        }
        report
    }

    async fn settle(
        &self,
        item: RetryQueueItem,
        outcome: Result<(), CommonError>,
        report: &mut SweepReport,
    ) {
        let _write = self.write_gate.lock().await;
        let key = item.key();
        let (flight, newer) = {
            let mut queue = self.queue.lock();
            let flight = queue.finish(&key);
            (flight, queue.get(&key).cloned())
        };
        let forced = flight.as_ref().is_some_and(|flight| flight.forced);
        let cancelled = flight.as_ref().is_some_and(|flight| flight.cancelled);

        let breaker = self.breakers.get(&item.destination);
        let err = match outcome {
            Ok(()) => {
                breaker.record_success();
                if newer.is_none() {
                    self.forget(&key).await;
                } else {
                    debug!(key = %key, "Newer retry queued during redelivery, keeping it");
                }
                self.mark_event(&item.event_id, &item.destination, EventStatus::Delivered, item.attempt, None)
                    .await;
                SchedulerCounters::bump(&self.counters.delivered);
                report.delivered += 1;
                info!(event_id = %item.event_id, destination = %item.destination, attempt = item.attempt, "Redelivered");
                return;
            }
            Err(err) => err,
        };

        breaker.record_failure();
        let message = err.to_string();

        if let Some(newer) = newer {
            let merged = RetryQueueItem {
                error_count: newer.error_count.saturating_add(1),
                last_error: message.clone(),
                ..newer
            };
            self.reschedule(merged, &message, report).await;
            return;
        }
        if cancelled {
            self.forget(&key).await;
            debug!(key = %key, "Redelivery failed after its item was cleared");
            return;
        }

        let policy = self.policy_for(&item.destination);
        let next_attempt = item.attempt.saturating_add(1);
        if forced || (policy.is_retryable(&err) && next_attempt <= policy.max_attempts) {
            let now = self.clock.utc_now();
            let (next_eligible_at, priority) = if forced {
                (now, Priority::Critical)
            } else {
                let derived = self.priority_rules.derive(&item.destination, next_attempt, &message);
                (after(now, policy.delay_for_attempt(next_attempt)), item.priority.min(derived))
            };
            let next = RetryQueueItem {
                attempt: next_attempt,
                next_eligible_at,
                priority,
                error_count: item.error_count.saturating_add(1),
                last_error: message.clone(),
                ..item
            };
            self.reschedule(next, &message, report).await;
            return;
        }

        error!(
            event_id = %item.event_id,
            destination = %item.destination,
            attempt = item.attempt,
            error = %message,
            "Redelivery failed permanently, dropping"
        );
        self.forget(&key).await;
        self.mark_event(&item.event_id, &item.destination, EventStatus::Failed, item.attempt, Some(&message))
            .await;
        if let Some(aggregator) = &self.aggregator {
            let record = ErrorRecord::from_error(&err, SCHEDULER_STAGE, "redeliver")
                .with_destination(&item.destination)
                .with_entity_id(&item.event_id)
                .with_context("attempt", item.attempt)
                .with_context("error_count", item.error_count.saturating_add(1))
                .with_context("priority", item.priority.as_str())
                .with_max_retries(policy.max_attempts);
            aggregator.add_error(record);
        }
        SchedulerCounters::bump(&self.counters.dropped);
        report.dropped += 1;
    }

    async fn reschedule(&self, next: RetryQueueItem, message: &str, report: &mut SweepReport) {
        if let Err(err) = self.store.store_retry(&next).await {
            warn!(key = %next.key(), error = %err, "Failed to persist rescheduled retry");
        }
        self.mark_event(&next.event_id, &next.destination, EventStatus::Retrying, next.attempt, Some(message))
            .await;
        debug!(event_id = %next.event_id, attempt = next.attempt, "Redelivery failed, rescheduled");
        self.queue.lock().push(next);
        SchedulerCounters::bump(&self.counters.rescheduled);
        report.rescheduled += 1;
    }

    async fn forget(&self, key: &str) {
        if let Err(err) = self.store.remove_retry(key).await {
            warn!(key, error = %err, "Failed to remove retry from store");
        }
    }

    async fn mark_event(
        &self,
        event_id: &str,
        destination: &str,
        status: EventStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) {
        let mut record = match self.store.get_event(event_id, destination).await {
            Ok(Some(record)) => record,
            Ok(None) => EventRecord::new(event_id, destination),
            Err(KeelError::NotSupported(_)) => return,
            Err(err) => {
                warn!(event_id, error = %err, "Failed to load event record");
                return;
            }
        };
        record.status = status;
        record.attempts = attempts;
        if let Some(last_error) = last_error {
            record.last_error = Some(last_error.to_string());
        }
        record.updated_at = self.clock.utc_now();
        match self.store.update_event(&record).await {
            Ok(()) | Err(KeelError::NotSupported(_)) => {}
            Err(err) => warn!(event_id, error = %err, "Failed to update event record"),
        }
    }

    /// Reload pending items from the store and start the sweep loop
    ///
    /// The first sweep runs one `sweep_interval` after start. Returns how
    /// many items were loaded into the queue.
    ///
    /// # Errors
    /// Returns `AlreadyRunning`, or `Store` when the pending set cannot be
    /// listed.
    pub async fn start(self: &Arc<Self>) -> Result<usize, SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        let loaded = match self.reload().await {
            Ok(loaded) => loaded,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        let token = CancellationToken::new();
        *self.shutdown.lock() = token.clone();
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move { scheduler.run_loop(token).await });
        *self.task.lock() = Some(handle);

        info!(
            loaded,
            sweep_interval = ?self.config.sweep_interval,
            max_concurrency = self.config.max_concurrency,
            "Retry scheduler started"
        );
        Ok(loaded)
    }

    async fn reload(&self) -> Result<usize, SchedulerError> {
        let pending = self.store.list_retries().await?;
        let mut queue = self.queue.lock();
        let mut loaded = 0;
        for item in pending {
            if queue.lookup(&item.key()).is_none() {
                queue.push(item);
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let period = self.config.sweep_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.is_paused() {
                continue;
            }
            self.sweep_once().await;
        }
        debug!("Sweep loop exited");
    }

    /// Stop sweeping without losing queued items
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Retry scheduler paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Retry scheduler resumed");
        }
    }

    /// Terminate the sweep loop
    ///
    /// A sweep already in progress finishes, including its redeliveries,
    /// before this returns. Queued items stay queued and persisted.
    ///
    /// # Errors
    /// Returns `NotRunning` when the scheduler was not started.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.lock().cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "Sweep loop ended abnormally");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        self.stopping.store(false, Ordering::SeqCst);
        info!(queued = self.queue.lock().len(), "Retry scheduler stopped");
        Ok(())
    }

    /// Remove queued items, for one destination or all of them
    ///
    /// Persisted items are removed too, including ones not currently
    /// loaded into the queue. Items whose redelivery is running are not
    /// rescheduled if it fails.
    ///
    /// # Errors
    /// Returns `Store` when the store cannot be listed or an item cannot be
    /// removed.
    pub async fn clear_queue(&self, destination: Option<&str>) -> Result<usize, SchedulerError> {
        let _write = self.write_gate.lock().await;
        let selected = |item: &RetryQueueItem| destination.map_or(true, |d| item.destination == d);
        let (taken, cancelled) = {
            let mut queue = self.queue.lock();
            (queue.take_where(selected), queue.cancel_in_flight_where(selected))
        };
        let persisted = match destination {
            Some(destination) => self.store.get_retries_for_destination(destination).await?,
            None => self.store.list_retries().await?,
        };

        let keys: BTreeSet<String> = taken
            .iter()
            .chain(persisted.iter())
            .map(RetryQueueItem::key)
            .chain(cancelled)
            .collect();
        for key in &keys {
            self.store.remove_retry(key).await?;
        }
        warn!(destination = destination.unwrap_or("*"), cleared = keys.len(), "Retry queue cleared");
        Ok(keys.len())
    }

    /// Queued items in the order they would be redelivered
    pub fn pending_items(&self) -> Vec<RetryQueueItem> {
        self.queue.lock().sorted()
    }

    pub fn get_priority_distribution(&self) -> BTreeMap<Priority, usize> {
        let mut distribution: BTreeMap<Priority, usize> =
            Priority::ALL.iter().map(|p| (*p, 0)).collect();
        for item in self.queue.lock().iter() {
            *distribution.entry(item.priority).or_default() += 1;
        }
        distribution
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        let now = self.clock.utc_now();
        let (total_queued, ready, in_flight, by_destination, oldest_item) = {
            let queue = self.queue.lock();
            let mut by_destination: BTreeMap<String, usize> = BTreeMap::new();
            for item in queue.iter() {
                *by_destination.entry(item.destination.clone()).or_default() += 1;
            }
            let oldest = queue.iter().map(|item| item.created_at).min();
            (queue.len(), queue.ready_count(now), queue.in_flight_count(), by_destination, oldest)
        };

        QueueStats {
            total_queued,
            ready,
            by_destination,
            by_priority: self.get_priority_distribution(),
            oldest_item,
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            rescheduled: self.counters.rescheduled.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            deferred: self.counters.deferred.load(Ordering::Relaxed),
            in_flight,
            running: self.is_running(),
            paused: self.is_paused(),
            breakers: self.breakers.snapshot_all(),
        }
    }
}

/// `now + delay`, saturating at the latest representable time
fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
