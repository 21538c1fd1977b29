//! Batch Deliverer
//!
//! Backs a batch up locally, posts it unit by unit with per-attempt timeouts
//! and linear retries, and dead-letters whatever is still failing.

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::dead_letter::DeadLetterQueue;
use super::payload::{plan_units, DeliveryUnit};
use super::retry::{RetryPolicy, RetryRecord};
use super::transport::Transport;
use super::types::{DeadLetterEntry, DeliveryError, DeliveryOutcome};
use crate::constants::DEAD_LETTER_CAPACITY;
use crate::logic::clock::Clock;
use crate::logic::config::{Config, ConfigHandle};
use crate::logic::events::NormalizedEvent;
use crate::logic::pipeline::DeliveryBatch;
use crate::logic::stats::{StatEvent, StatsRecorder};
use crate::logic::storage::LocalBackup;

pub struct Deliverer {
    config: ConfigHandle,
    transport: Arc<dyn Transport>,
    backup: LocalBackup,
    stats: Arc<StatsRecorder>,
    clock: Arc<dyn Clock>,
    dead_letters: Mutex<DeadLetterQueue>,
}

impl Deliverer {
    pub fn new(
        config: ConfigHandle,
        transport: Arc<dyn Transport>,
        backup: LocalBackup,
        stats: Arc<StatsRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            transport,
            backup,
            stats,
            clock,
            dead_letters: Mutex::new(DeadLetterQueue::new(DEAD_LETTER_CAPACITY)),
        }
    }

    pub fn backup(&self) -> &LocalBackup {
        &self.backup
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().len()
    }

    /// Copy of the dead-letter queue, oldest first
    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.lock().iter().cloned().collect()
    }

    // ========================================================================
    // DELIVER
    // ========================================================================

    pub async fn deliver(&self, batch: &DeliveryBatch) -> DeliveryOutcome {
        if batch.is_empty() {
            return DeliveryOutcome::Empty;
        }
        let config = self.config.snapshot();

        self.save_backup(batch.id, batch.events.clone(), config.max_local_storage_size)
            .await;

        let units = plan_units(&batch.events);
        let policy = RetryPolicy::new(config.max_retries, config.retry_delay());

        let mut delivered_units = 0;
        let mut total_attempts = 0;
        let mut failed: Vec<NormalizedEvent> = Vec::new();
        let mut last_error = None;

        for unit in &units {
            match self.send_with_retry(batch.id, unit, &config, &policy).await {
                Ok(attempts) => {
                    delivered_units += 1;
                    total_attempts += attempts;
                }
                Err(e) => {
                    failed.extend(unit.events.iter().cloned());
                    last_error = Some(e);
                }
            }
        }

        // Drain before dead-lettering so this batch's own failures wait their turn
        if delivered_units > 0 {
            self.drain_one(&config).await;
        }

        match last_error {
            None => {
                self.clear_backup(batch.id).await;
                log::debug!("Batch {} delivered ({} units)", batch.id, delivered_units);
                DeliveryOutcome::Delivered {
                    units: delivered_units,
                    attempts: total_attempts,
                }
            }
            Some(error) => {
                let dead = failed.len();
                self.dead_letter(batch.id, failed, policy.max_attempts, &error, &config)
                    .await;
                if delivered_units == 0 {
                    DeliveryOutcome::DeadLettered {
                        events: dead,
                        last_error: error,
                    }
                } else {
                    DeliveryOutcome::Partial {
                        delivered: delivered_units,
                        dead_lettered: dead,
                    }
                }
            }
        }
    }

    async fn send_with_retry(
        &self,
        batch_id: Uuid,
        unit: &DeliveryUnit,
        config: &Config,
        policy: &RetryPolicy,
    ) -> Result<u32, DeliveryError> {
        let mut record = RetryRecord {
            batch: batch_id,
            attempt: 1,
            next_delay: None,
        };

        loop {
            match self.attempt(unit, config).await {
                Ok(()) => return Ok(record.attempt),
                Err(e) => {
                    record.next_delay = policy.delay_after(record.attempt);
                    match record.next_delay {
                        Some(delay) => {
                            log::warn!(
                                "Upload to {} failed for batch {} (attempt {}/{}): {}; retrying in {:?}",
                                unit.route.path(),
                                record.batch,
                                record.attempt,
                                policy.max_attempts,
                                e,
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            record.attempt += 1;
                        }
                        None => {
                            log::error!(
                                "Upload to {} failed for batch {} after {} attempts: {}",
                                unit.route.path(),
                                record.batch,
                                record.attempt,
                                e
                            );
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// One bounded network attempt, counted in the statistics either way
    async fn attempt(&self, unit: &DeliveryUnit, config: &Config) -> Result<(), DeliveryError> {
        let result = match unit.to_request(config, self.clock.now()) {
            Ok(request) => {
                let bytes = request.body.len();
                let timeout = config.fetch_timeout();
                match tokio::time::timeout(timeout, self.transport.send(request)).await {
                    Ok(Ok(())) => Ok(bytes),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(DeliveryError::Timeout(timeout)),
                }
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => {
                self.stats.record(StatEvent::UploadSucceeded { bytes });
                Ok(())
            }
            Err(e) => {
                self.stats.record(StatEvent::UploadFailed);
                Err(e)
            }
        }
    }

    async fn dead_letter(
        &self,
        batch_id: Uuid,
        events: Vec<NormalizedEvent>,
        attempts: u32,
        error: &DeliveryError,
        config: &Config,
    ) {
        // Backup now mirrors exactly what is still undelivered
        self.save_backup(batch_id, events.clone(), config.max_local_storage_size)
            .await;

        let entry = DeadLetterEntry {
            batch_id,
            events,
            attempts,
            last_error: error.to_string(),
            dead_lettered_at: self.clock.now(),
        };
        self.stats.record(StatEvent::DeadLettered);

        let discarded = self.dead_letters.lock().push(entry);
        if let Some(discarded) = discarded {
            self.stats.record(StatEvent::DeadLetterDiscarded);
            log::warn!(
                "Dead-letter queue full, discarded batch {} ({} events)",
                discarded.batch_id,
                discarded.events.len()
            );
        }
    }

    // ========================================================================
    // DRAIN
    // ========================================================================

    /// Give the oldest dead-letter entry one more try. Never recurses.
    async fn drain_one(&self, config: &Config) {
        let oldest = self.dead_letters.lock().pop_oldest();
        let Some(mut entry) = oldest else {
            return;
        };

        let mut remaining = Vec::new();
        let mut last_error = None;
        for unit in plan_units(&entry.events) {
            if let Err(e) = self.attempt(&unit, config).await {
                remaining.extend(unit.events);
                last_error = Some(e);
            }
        }
        entry.attempts += 1;

        match last_error {
            None => {
                log::info!(
                    "Dead-lettered batch {} delivered on attempt {}",
                    entry.batch_id,
                    entry.attempts
                );
                self.clear_backup(entry.batch_id).await;
            }
            Some(error) => {
                log::debug!("Dead-letter retry for batch {} failed: {}", entry.batch_id, error);
                if remaining.len() != entry.events.len() {
                    self.save_backup(
                        entry.batch_id,
                        remaining.clone(),
                        config.max_local_storage_size,
                    )
                    .await;
                }
                entry.events = remaining;
                entry.last_error = error.to_string();
                let discarded = self.dead_letters.lock().push_front(entry);
                if let Some(discarded) = discarded {
                    self.stats.record(StatEvent::DeadLetterDiscarded);
                    log::warn!("Dead-letter queue full, discarded batch {}", discarded.batch_id);
                }
            }
        }
    }
}

// ============================================================================
// BACKUP I/O
// ============================================================================

// The store may rewrite a multi-megabyte file, so keep it off the async workers
impl Deliverer {
    async fn save_backup(&self, batch_id: Uuid, events: Vec<NormalizedEvent>, max_bytes: usize) {
        let backup = self.backup.clone();
        let stored_at = self.clock.now();
        let result = tokio::task::spawn_blocking(move || {
            backup.persist(batch_id, &events, stored_at, max_bytes)
        })
        .await;
        match result {
            Ok(Ok(evicted)) if evicted > 0 => {
                log::debug!("Backup for batch {} evicted {} older batches", batch_id, evicted)
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::warn!("Failed to back up batch {}: {}", batch_id, e),
            Err(e) => log::warn!("Backup task for batch {} failed: {}", batch_id, e),
        }
    }

    async fn clear_backup(&self, batch_id: Uuid) {
        let backup = self.backup.clone();
        match tokio::task::spawn_blocking(move || backup.remove(batch_id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::warn!("Failed to clear backup for batch {}: {}", batch_id, e),
            Err(e) => log::warn!("Backup task for batch {} failed: {}", batch_id, e),
        }
    }
}

impl std::fmt::Debug for Deliverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deliverer")
            .field("dead_letters", &self.dead_letter_count())
            .finish_non_exhaustive()
    }
}
