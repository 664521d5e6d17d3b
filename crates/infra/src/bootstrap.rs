//! Startup assembly of the resilience services
//!
//! One aggregator, one propagation manager, one breaker registry and one
//! scheduler are created here and handed to callers explicitly; the batch
//! processor, the scheduler and every executor built through the context
//! share them.

use std::sync::Arc;

use anyhow::Context;
use keel_common::resilience::{CircuitBreakerRegistry, RetryExecutor};
use keel_core::{
    BatchProcessor, ErrorAggregator, ErrorPropagationManager, KeelConfig, Redeliverer,
    RetryScheduler, RetryStore, SchedulerError,
};
use tracing::info;

use crate::storage::InMemoryRetryStore;

/// Shared handles to every resilience service
pub struct ResilienceContext {
    config: KeelConfig,
    aggregator: Arc<ErrorAggregator>,
    propagation: Arc<ErrorPropagationManager>,
    processor: BatchProcessor,
    breakers: Arc<CircuitBreakerRegistry>,
    scheduler: Arc<RetryScheduler>,
}

impl ResilienceContext {
    /// Wire the services described by `config` around the given ports
    ///
    /// # Errors
    /// Fails if the configuration does not validate.
    pub fn build(
        config: KeelConfig,
        store: Arc<dyn RetryStore>,
        redeliverer: Arc<dyn Redeliverer>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid resilience configuration")?;

        let aggregator = Arc::new(ErrorAggregator::new(config.aggregator.clone()));
        let propagation = Arc::new(
            ErrorPropagationManager::new(config.propagation.clone())
                .with_aggregator(Arc::clone(&aggregator)),
        );
        let processor = BatchProcessor::new(Arc::clone(&propagation));
        let breakers = Arc::new(
            CircuitBreakerRegistry::new(config.circuit_breaker.clone())
                .context("invalid circuit breaker configuration")?,
        );
        let scheduler = Arc::new(
            RetryScheduler::new(config.scheduler.clone(), Arc::clone(&breakers), store, redeliverer)
                .context("failed to create retry scheduler")?
                .with_default_policy(config.retry.clone())
                .with_aggregator(Arc::clone(&aggregator)),
        );

        info!(
            destinations = config.scheduler.destinations.len(),
            max_concurrency = config.scheduler.max_concurrency,
            "Resilience context assembled"
        );
        Ok(Self { config, aggregator, propagation, processor, breakers, scheduler })
    }

    /// Same as [`build`](Self::build) with a fresh [`InMemoryRetryStore`]
    ///
    /// # Errors
    /// Fails if the configuration does not validate.
    pub fn in_memory(config: KeelConfig, redeliverer: Arc<dyn Redeliverer>) -> anyhow::Result<Self> {
        Self::build(config, Arc::new(InMemoryRetryStore::new()), redeliverer)
    }

    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Arc<ErrorAggregator> {
        &self.aggregator
    }

    pub fn propagation(&self) -> &Arc<ErrorPropagationManager> {
        &self.propagation
    }

    pub fn processor(&self) -> &BatchProcessor {
        &self.processor
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn scheduler(&self) -> &Arc<RetryScheduler> {
        &self.scheduler
    }

    /// Executor for `destination` using its configured policy and the
    /// shared breaker, so inline retries and redeliveries see one circuit
    pub fn executor_for(&self, destination: &str) -> RetryExecutor {
        RetryExecutor::new(self.config.policy_for(destination).clone(), self.breakers.get(destination))
    }

    /// Start the scheduler's sweep loop
    ///
    /// # Errors
    /// See [`RetryScheduler::start`].
    pub async fn start(&self) -> Result<usize, SchedulerError> {
        self.scheduler.start().await
    }

    /// Stop the sweep loop if it is running
    ///
    /// # Errors
    /// See [`RetryScheduler::stop`]; a scheduler that was never started is
    /// not an error here.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        match self.scheduler.stop().await {
            Ok(()) | Err(SchedulerError::NotRunning) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
