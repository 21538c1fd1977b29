//! Relay Pipeline
//!
//! Owns the buffer, deliverer and statistics of one relay instance and
//! decides when buffered events are flushed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Map;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::buffer::{BufferStatus, EventBuffer};
use crate::constants::STATS_STORAGE_KEY;
use crate::logic::clock::Clock;
use crate::logic::config::{Config, ConfigHandle};
use crate::logic::delivery::{Deliverer, DeliveryOutcome, Transport};
use crate::logic::detection::DetectionEngine;
use crate::logic::events::{
    try_normalize, DropReason, LifecycleAction, NormalizeContext, RawSignal, Route,
};
use crate::logic::stats::{StatEvent, Statistics, StatsRecorder};
use crate::logic::storage::{KeyValueStore, LocalBackup};

/// What `submit` did with a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued {
        route: Route,
        /// Buffer length after the enqueue
        buffered: usize,
        /// Older events evicted to make room
        evicted: usize,
    },
    Dropped(DropReason),
}

impl SubmitOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SubmitOutcome::Queued { .. })
    }
}

struct PipelineInner {
    config: ConfigHandle,
    engine: DetectionEngine,
    buffer: Mutex<EventBuffer>,
    deliverer: Deliverer,
    stats: Arc<StatsRecorder>,
    store: Arc<dyn KeyValueStore>,
    session_id: String,
    flushing: AtomicBool,
    flush_done: Notify,
    debounce: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; clones share the same state
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn new(
        config: ConfigHandle,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::with_engine(config, clock, transport, store, DetectionEngine::default())
    }

    pub fn with_engine(
        config: ConfigHandle,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        engine: DetectionEngine,
    ) -> Self {
        let snapshot = config.snapshot();
        let stats = Arc::new(StatsRecorder::new(clock.clone()));
        restore_stats(&stats, store.as_ref());

        let deliverer = Deliverer::new(
            config.clone(),
            transport,
            LocalBackup::new(store.clone()),
            stats.clone(),
            clock,
        );

        let inner = Arc::new(PipelineInner {
            config: config.clone(),
            engine,
            buffer: Mutex::new(EventBuffer::new(snapshot.max_buffer_size, snapshot.batch_size)),
            deliverer,
            stats,
            store,
            session_id: Uuid::new_v4().to_string(),
            flushing: AtomicBool::new(false),
            flush_done: Notify::new(),
            debounce: Mutex::new(None),
        });

        // Weak: the config handle must not keep the pipeline alive
        let weak: Weak<PipelineInner> = Arc::downgrade(&inner);
        config.on_change(move |old, new| {
            if let Some(inner) = weak.upgrade() {
                apply_limits(&inner, old, new);
            }
        });

        log::info!("Pipeline started (session {})", inner.session_id);
        Self { inner }
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Classify, normalize and buffer one signal.
    ///
    /// Never blocks on the network: reaching `batch_size` spawns a flush on
    /// the current tokio runtime, anything less arms the debounce timer.
    pub fn submit(&self, signal: RawSignal) -> SubmitOutcome {
        let inner = &self.inner;
        let config = inner.config.snapshot();

        if let RawSignal::NetworkRequest(req) = &signal {
            inner.stats.record(StatEvent::RequestObserved {
                blocked: req.blocked,
            });
        }

        let ctx = NormalizeContext::new(&config, &inner.session_id);
        let verdict = if ctx.wants_detection(&signal) {
            signal
                .detection_sample()
                .and_then(|sample| inner.engine.classify(sample, signal.source()))
        } else {
            None
        };
        if let Some(v) = &verdict {
            inner.stats.record(StatEvent::Detection);
            log::info!(
                "Detection from {} (score {}, category {})",
                v.source,
                v.score,
                v.category.as_str()
            );
        }

        let event = match try_normalize(&signal, verdict.as_ref(), &ctx) {
            Ok(event) => event,
            Err(reason) => {
                log::trace!("Dropped {} signal: {}", signal.kind(), reason);
                return SubmitOutcome::Dropped(reason);
            }
        };

        if let RawSignal::ComponentLifecycle(component) = &signal {
            match component.action {
                LifecycleAction::Installed => inner.stats.record(StatEvent::ExtensionInstalled),
                LifecycleAction::Uninstalled => {
                    inner.stats.record(StatEvent::ExtensionUninstalled)
                }
                _ => {}
            }
        }

        let route = event.route;
        let bytes = event.serialized_len();
        let outcome = inner.buffer.lock().enqueue(event);

        inner.stats.record(StatEvent::Enqueued {
            bytes,
            extension: route == Route::Extension,
        });
        if outcome.evicted > 0 {
            inner.stats.record(StatEvent::Evicted(outcome.evicted));
            log::warn!("Buffer full, evicted {} oldest events", outcome.evicted);
        }

        if outcome.reached_batch_size {
            self.spawn_flush();
        } else {
            self.schedule_debounce(&config);
        }

        SubmitOutcome::Queued {
            route,
            buffered: outcome.len,
            evicted: outcome.evicted,
        }
    }

    fn spawn_flush(&self) -> Option<JoinHandle<()>> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pipeline = self.clone();
                Some(handle.spawn(async move {
                    pipeline.flush().await;
                }))
            }
            Err(_) => {
                log::debug!("No async runtime, flush deferred");
                None
            }
        }
    }

    /// Arm the single debounce timer unless one is already pending
    fn schedule_debounce(&self, config: &Config) {
        let mut slot = self.inner.debounce.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let pipeline = self.clone();
        let delay = config.debounce_interval();
        *slot = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            pipeline.inner.debounce.lock().take();
            pipeline.flush().await;
        }));
    }

    // ========================================================================
    // FLUSH
    // ========================================================================

    /// Drain the buffer batch by batch until it is empty.
    ///
    /// Returns immediately (with no outcomes) if another flush is running.
    pub async fn flush(&self) -> Vec<DeliveryOutcome> {
        let inner = &self.inner;
        let mut outcomes = Vec::new();
        let mut ran = false;

        loop {
            if inner
                .flushing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                break;
            }
            ran = true;

            {
                let _guard = FlushGuard {
                    flag: &inner.flushing,
                    done: &inner.flush_done,
                };
                loop {
                    let batch = {
                        let mut buffer = inner.buffer.lock();
                        let n = buffer.batch_size();
                        buffer.take_batch(n)
                    };
                    let Some(batch) = batch else { break };
                    log::debug!("Flushing batch {} ({} events)", batch.id, batch.len());
                    outcomes.push(inner.deliverer.deliver(&batch).await);
                }
            }

            // Events enqueued while the guard was still held saw a busy flush
            if inner.buffer.lock().is_empty() {
                break;
            }
        }

        if ran {
            let pipeline = self.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || pipeline.persist_stats()).await {
                log::warn!("Statistics task failed: {}", e);
            }
        }
        outcomes
    }

    /// Flush until the buffer is empty and no flush is running, waiting out
    /// any flush another task already started.
    pub async fn drain(&self) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::new();
        loop {
            // Registered before flushing so a guard released meanwhile still wakes us
            let idle = self.inner.flush_done.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            outcomes.extend(self.flush().await);
            if !self.is_flushing() {
                if self.inner.buffer.lock().is_empty() {
                    return outcomes;
                }
                continue;
            }
            log::debug!("Waiting for the running flush to finish");
            idle.await;
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Re-buffer batches a previous process backed up but never delivered.
    ///
    /// Returns the number of events recovered.
    pub fn recover_backup(&self) -> usize {
        let backup = self.inner.deliverer.backup();
        let entries = match backup.load_all() {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Failed to read backup: {}", e);
                return 0;
            }
        };
        if entries.is_empty() {
            return 0;
        }

        let events: Vec<_> = entries.into_iter().flat_map(|e| e.events).collect();
        let count = events.len();
        let evicted = self.inner.buffer.lock().requeue_front(events);
        if evicted > 0 {
            self.inner.stats.record(StatEvent::Evicted(evicted));
        }
        // Re-backed-up under new batch ids when flushed
        if let Err(e) = backup.clear() {
            log::warn!("Failed to clear recovered backup: {}", e);
        }

        log::info!("Recovered {} events from backup", count);
        self.spawn_flush();
        count
    }

    /// Cancel the debounce timer, persist statistics and start draining the
    /// buffer. Awaiting the returned handle waits for every in-flight and
    /// buffered batch; dropping it leaves the drain running in the background.
    pub fn shutdown(&self) -> Option<JoinHandle<()>> {
        if let Some(timer) = self.inner.debounce.lock().take() {
            timer.abort();
        }
        self.persist_stats();
        log::info!(
            "Pipeline shutting down ({} events buffered)",
            self.buffered_len()
        );
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let pipeline = self.clone();
        Some(handle.spawn(async move {
            pipeline.drain().await;
        }))
    }

    // ========================================================================
    // STATS & ACCESSORS
    // ========================================================================

    pub fn stats(&self) -> Statistics {
        self.inner.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
        self.persist_stats();
    }

    fn persist_stats(&self) {
        let snapshot = self.inner.stats.snapshot();
        let value = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to encode statistics: {}", e);
                return;
            }
        };
        let mut items = Map::new();
        items.insert(STATS_STORAGE_KEY.to_string(), value);
        if let Err(e) = self.inner.store.set(items) {
            log::warn!("Failed to persist statistics: {}", e);
        }
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.inner.config
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn buffered_len(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    pub fn buffer_status(&self) -> BufferStatus {
        self.inner.buffer.lock().status()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.inner.deliverer.dead_letter_count()
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("session_id", &self.inner.session_id)
            .field("buffered", &self.buffered_len())
            .field("dead_letters", &self.dead_letter_count())
            .finish()
    }
}

struct FlushGuard<'a> {
    flag: &'a AtomicBool,
    done: &'a Notify,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.done.notify_waiters();
    }
}

fn restore_stats(stats: &StatsRecorder, store: &dyn KeyValueStore) {
    let persisted = match store.get(&[STATS_STORAGE_KEY]) {
        Ok(mut found) => found.remove(STATS_STORAGE_KEY),
        Err(e) => {
            log::warn!("Failed to read persisted statistics: {}", e);
            None
        }
    };
    if let Some(value) = persisted {
        match serde_json::from_value::<Statistics>(value) {
            Ok(snapshot) => stats.restore(snapshot),
            Err(e) => log::warn!("Ignoring unreadable statistics snapshot: {}", e),
        }
    }
}

fn apply_limits(inner: &PipelineInner, old: &Config, new: &Config) {
    if old.max_buffer_size == new.max_buffer_size && old.batch_size == new.batch_size {
        return;
    }
    let evicted = inner
        .buffer
        .lock()
        .set_limits(new.max_buffer_size, new.batch_size);
    if evicted > 0 {
        inner.stats.record(StatEvent::Evicted(evicted));
        log::warn!("Buffer capacity lowered, evicted {} oldest events", evicted);
    }
    log::info!(
        "Buffer limits updated (capacity {}, batch size {})",
        new.max_buffer_size,
        new.batch_size
    );
}
