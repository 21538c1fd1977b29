//! Statistics Aggregator
//!
//! Counters tapped off every pipeline stage. Owned by one pipeline instance;
//! other components only see snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::clock::Clock;

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Counter snapshot (camelCase on the wire and in storage)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub logged_requests: u64,
    pub successful_uploads: u64,
    pub failed_uploads: u64,
    pub bytes_logged: u64,
    pub bytes_sent: u64,
    pub extension_installs: u64,
    pub extension_uninstalls: u64,
    pub extension_events: u64,
    #[serde(default)]
    pub detections: u64,
    #[serde(default)]
    pub evicted_events: u64,
    #[serde(default)]
    pub dead_lettered_batches: u64,
    #[serde(default)]
    pub dead_letters_discarded: u64,
    pub session_start: DateTime<Utc>,
    pub last_upload_time: Option<DateTime<Utc>>,
}

impl Statistics {
    pub fn new(session_start: DateTime<Utc>) -> Self {
        Self {
            total_requests: 0,
            blocked_requests: 0,
            logged_requests: 0,
            successful_uploads: 0,
            failed_uploads: 0,
            bytes_logged: 0,
            bytes_sent: 0,
            extension_installs: 0,
            extension_uninstalls: 0,
            extension_events: 0,
            detections: 0,
            evicted_events: 0,
            dead_lettered_batches: 0,
            dead_letters_discarded: 0,
            session_start,
            last_upload_time: None,
        }
    }

    /// Share of upload attempts that succeeded (0.0 when none were made)
    pub fn upload_success_rate(&self) -> f64 {
        let total = self.successful_uploads + self.failed_uploads;
        if total == 0 {
            0.0
        } else {
            self.successful_uploads as f64 / total as f64
        }
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Something a pipeline stage observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    RequestObserved { blocked: bool },
    Detection,
    Enqueued { bytes: usize, extension: bool },
    Evicted(usize),
    UploadSucceeded { bytes: usize },
    UploadFailed,
    DeadLettered,
    /// Dead-letter queue was full and dropped its oldest entry
    DeadLetterDiscarded,
    ExtensionInstalled,
    ExtensionUninstalled,
}

// ============================================================================
// RECORDER
// ============================================================================

pub struct StatsRecorder {
    inner: Mutex<Statistics>,
    clock: Arc<dyn Clock>,
}

impl StatsRecorder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Statistics::new(clock.now())),
            clock,
        }
    }

    pub fn record(&self, event: StatEvent) {
        let mut s = self.inner.lock();
        match event {
            StatEvent::RequestObserved { blocked } => {
                s.total_requests += 1;
                if blocked {
                    s.blocked_requests += 1;
                }
            }
            StatEvent::Detection => s.detections += 1,
            StatEvent::Enqueued { bytes, extension } => {
                s.logged_requests += 1;
                s.bytes_logged += bytes as u64;
                if extension {
                    s.extension_events += 1;
                }
            }
            StatEvent::Evicted(count) => s.evicted_events += count as u64,
            StatEvent::UploadSucceeded { bytes } => {
                s.successful_uploads += 1;
                s.bytes_sent += bytes as u64;
                s.last_upload_time = Some(self.clock.now());
            }
            StatEvent::UploadFailed => s.failed_uploads += 1,
            StatEvent::DeadLettered => s.dead_lettered_batches += 1,
            StatEvent::DeadLetterDiscarded => s.dead_letters_discarded += 1,
            StatEvent::ExtensionInstalled => s.extension_installs += 1,
            StatEvent::ExtensionUninstalled => s.extension_uninstalls += 1,
        }
    }

    pub fn snapshot(&self) -> Statistics {
        self.inner.lock().clone()
    }

    /// Zero every counter and re-stamp the session start
    pub fn reset(&self) {
        *self.inner.lock() = Statistics::new(self.clock.now());
    }

    /// Adopt a previously persisted snapshot
    pub fn restore(&self, persisted: Statistics) {
        *self.inner.lock() = persisted;
    }
}

impl std::fmt::Debug for StatsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsRecorder")
            .field("inner", &*self.inner.lock())
            .finish()
    }
}
