//! Event Buffer - bounded FIFO of normalized events awaiting delivery
//!
//! Not synchronized on its own; the pipeline keeps it behind a mutex and
//! never holds that lock across an await.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::events::{NormalizedEvent, Route};

// ============================================================================
// BATCH
// ============================================================================

/// Events taken from the buffer head in one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryBatch {
    pub id: Uuid,
    pub events: Vec<NormalizedEvent>,
}

impl DeliveryBatch {
    pub fn new(events: Vec<NormalizedEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            events,
        }
    }

    /// Rebuild a batch under a known id (backup recovery)
    pub fn with_id(id: Uuid, events: Vec<NormalizedEvent>) -> Self {
        Self { id, events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events grouped by route, FIFO order kept within each route
    pub fn partition_by_route(&self) -> BTreeMap<Route, Vec<&NormalizedEvent>> {
        let mut groups: BTreeMap<Route, Vec<&NormalizedEvent>> = BTreeMap::new();
        for event in &self.events {
            groups.entry(event.route).or_default().push(event);
        }
        groups
    }
}

// ============================================================================
// BUFFER
// ============================================================================

/// Result of one enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Length after the enqueue
    pub len: usize,
    /// Oldest events dropped to stay within capacity
    pub evicted: usize,
    /// Length crossed from below `batch_size` to at least `batch_size`
    pub reached_batch_size: bool,
}

#[derive(Debug)]
pub struct EventBuffer {
    events: VecDeque<NormalizedEvent>,
    capacity: usize,
    batch_size: usize,
    evicted_total: u64,
}

impl EventBuffer {
    pub fn new(capacity: usize, batch_size: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            batch_size: batch_size.max(1),
            evicted_total: 0,
        }
    }

    /// Apply new limits; shrinking capacity evicts immediately
    pub fn set_limits(&mut self, capacity: usize, batch_size: usize) -> usize {
        self.capacity = capacity.max(1);
        self.batch_size = batch_size.max(1);
        self.evict_overflow()
    }

    pub fn enqueue(&mut self, event: NormalizedEvent) -> EnqueueOutcome {
        let before = self.events.len();
        self.events.push_back(event);
        let evicted = self.evict_overflow();
        let len = self.events.len();

        EnqueueOutcome {
            len,
            evicted,
            reached_batch_size: before < self.batch_size && len >= self.batch_size,
        }
    }

    /// Put recovered events back at the head, ahead of newer ones
    pub fn requeue_front(&mut self, events: Vec<NormalizedEvent>) -> usize {
        for event in events.into_iter().rev() {
            self.events.push_front(event);
        }
        // Overflow still drops from the head: the oldest go first
        self.evict_overflow()
    }

    /// Remove up to `max_n` events from the head (never more than `batch_size`)
    pub fn take_batch(&mut self, max_n: usize) -> Option<DeliveryBatch> {
        let n = max_n.min(self.batch_size).min(self.events.len());
        if n == 0 {
            return None;
        }
        Some(DeliveryBatch::new(self.events.drain(..n).collect()))
    }

    fn evict_overflow(&mut self) -> usize {
        let overflow = self.events.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.events.drain(..overflow);
            self.evicted_total += overflow as u64;
        }
        overflow
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            current_size: self.events.len(),
            capacity: self.capacity,
            batch_size: self.batch_size,
            evicted_total: self.evicted_total,
            fill_percent: (self.events.len() as f32 / self.capacity as f32 * 100.0).min(100.0),
        }
    }
}

/// Buffer status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStatus {
    pub current_size: usize,
    pub capacity: usize,
    pub batch_size: usize,
    pub evicted_total: u64,
    pub fill_percent: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Map};

    fn event(n: usize, route: Route) -> NormalizedEvent {
        let mut payload = Map::new();
        payload.insert("n".into(), json!(n));
        NormalizedEvent::new(route, payload, "s", None, Utc::now())
    }

    fn seq(e: &NormalizedEvent) -> usize {
        e.payload["n"].as_u64().unwrap() as usize
    }

    #[test]
    fn test_never_exceeds_capacity_and_keeps_newest() {
        let mut buffer = EventBuffer::new(5, 50);
        let mut evicted = 0;
        for n in 0..12 {
            let outcome = buffer.enqueue(event(n, Route::NetworkLog));
            assert!(outcome.len <= 5);
            evicted += outcome.evicted;
        }

        assert_eq!(buffer.len(), 5);
        assert_eq!(evicted, 7);
        assert_eq!(buffer.evicted_total(), 7);

        let batch = buffer.take_batch(50).unwrap();
        let kept: Vec<usize> = batch.events.iter().map(seq).collect();
        assert_eq!(kept, vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_batch_size_reached_once() {
        let mut buffer = EventBuffer::new(100, 3);
        let flags: Vec<bool> = (0..6)
            .map(|n| buffer.enqueue(event(n, Route::Security)).reached_batch_size)
            .collect();
        assert_eq!(flags, vec![false, false, true, false, false, false]);

        // Drained below the mark, the next crossing fires again
        buffer.take_batch(3);
        buffer.take_batch(3);
        assert!(buffer.is_empty());
        buffer.enqueue(event(6, Route::Security));
        buffer.enqueue(event(7, Route::Security));
        assert!(buffer.enqueue(event(8, Route::Security)).reached_batch_size);
    }

    #[test]
    fn test_take_batch_bounded_and_disjoint() {
        let mut buffer = EventBuffer::new(100, 4);
        for n in 0..10 {
            buffer.enqueue(event(n, Route::NetworkLog));
        }

        let first = buffer.take_batch(100).unwrap();
        let second = buffer.take_batch(2).unwrap();
        let third = buffer.take_batch(100).unwrap();

        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 2);
        assert_eq!(third.len(), 4);
        assert_ne!(first.id, second.id);

        let mut all: Vec<usize> = first
            .events
            .iter()
            .chain(&second.events)
            .chain(&third.events)
            .map(seq)
            .collect();
        all.dedup();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
        assert!(buffer.take_batch(4).is_none());
    }

    #[test]
    fn test_partition_keeps_route_order() {
        let mut buffer = EventBuffer::new(100, 10);
        buffer.enqueue(event(0, Route::NetworkLog));
        buffer.enqueue(event(1, Route::Security));
        buffer.enqueue(event(2, Route::NetworkLog));
        buffer.enqueue(event(3, Route::Extension));

        let batch = buffer.take_batch(10).unwrap();
        let groups = batch.partition_by_route();

        let logs: Vec<usize> = groups[&Route::NetworkLog].iter().map(|e| seq(e)).collect();
        assert_eq!(logs, vec![0, 2]);
        assert_eq!(groups[&Route::Security].len(), 1);
        assert_eq!(groups[&Route::Extension].len(), 1);
    }

    #[test]
    fn test_shrinking_capacity_evicts_oldest() {
        let mut buffer = EventBuffer::new(10, 10);
        for n in 0..8 {
            buffer.enqueue(event(n, Route::NetworkLog));
        }
        assert_eq!(buffer.set_limits(3, 2), 5);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.take_batch(10).unwrap().len(), 2);
    }

    #[test]
    fn test_requeue_front_preserves_order() {
        let mut buffer = EventBuffer::new(10, 10);
        buffer.enqueue(event(5, Route::NetworkLog));
        buffer.requeue_front(vec![event(1, Route::NetworkLog), event(2, Route::NetworkLog)]);

        let order: Vec<usize> = buffer.take_batch(10).unwrap().events.iter().map(seq).collect();
        assert_eq!(order, vec![1, 2, 5]);
    }
}
