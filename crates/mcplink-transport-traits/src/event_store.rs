//! Event storage for resumable streams.
//!
//! A server transport publishes every outbound SSE event through an
//! [`EventStore`] and uses the returned id as the SSE `id:` field. When a
//! client reconnects with `Last-Event-ID`, the store replays every later event
//! of the same stream, in original order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};

/// A stored event for replay support.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Opaque event id, strictly ordered within its stream
    pub id: String,

    /// Logical stream the event belongs to
    pub stream_id: String,

    /// The JSON-RPC payload
    pub message: Value,

    /// Timestamp when the event was stored (Unix milliseconds)
    pub timestamp: u64,
}

impl StoredEvent {
    fn new(id: String, stream_id: &str, message: Value) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            id,
            stream_id: stream_id.to_string(),
            message,
            timestamp,
        }
    }
}

/// Pluggable storage for resumability.
#[async_trait]
pub trait EventStore: Send + Sync + fmt::Debug {
    /// Persist one outbound message and return the id assigned to it.
    async fn store_event(&self, stream_id: &str, message: Value) -> TransportResult<String>;

    /// Send every event of the stream that `last_event_id` belongs to, stored
    /// after it, through `sender`. Returns that stream's id.
    ///
    /// Fails with [`TransportError::UnknownEvent`] when the id is not known.
    async fn replay_events_after(
        &self,
        last_event_id: &str,
        sender: mpsc::UnboundedSender<StoredEvent>,
    ) -> TransportResult<String>;
}

/// Events kept per stream by [`InMemoryEventStore::new`]
pub const DEFAULT_MAX_EVENTS_PER_STREAM: usize = 1024;

/// Streams kept by [`InMemoryEventStore::new`]
pub const DEFAULT_MAX_STREAMS: usize = 256;

/// In-process [`EventStore`].
///
/// Event ids have the form `{stream_id}_{seq}` where `seq` comes from one
/// global counter. Each stream keeps its newest events up to a cap. Past the
/// stream cap, the stream written least recently is dropped whole, so a server
/// that opens one stream per request stays bounded.
#[derive(Debug)]
pub struct InMemoryEventStore {
    streams: DashMap<String, VecDeque<(u64, StoredEvent)>>,
    sequence: AtomicU64,
    max_events_per_stream: usize,
    max_streams: usize,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self {
            streams: DashMap::new(),
            sequence: AtomicU64::new(0),
            max_events_per_stream: DEFAULT_MAX_EVENTS_PER_STREAM,
            max_streams: DEFAULT_MAX_STREAMS,
        }
    }
}

impl InMemoryEventStore {
    /// Create a store with the default caps
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `max` events per stream, evicting the
    /// oldest first
    pub fn with_max_events_per_stream(max: usize) -> Self {
        Self {
            max_events_per_stream: max.max(1),
            ..Self::default()
        }
    }

    /// Keep at most `max` streams
    #[must_use]
    pub fn with_max_streams(mut self, max: usize) -> Self {
        self.max_streams = max.max(1);
        self
    }

    /// Number of events currently retained for a stream
    pub fn stream_len(&self, stream_id: &str) -> usize {
        self.streams.get(stream_id).map_or(0, |s| s.len())
    }

    /// Number of streams currently retained
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn parse_event_id(event_id: &str) -> Option<(&str, u64)> {
        let (stream_id, seq) = event_id.rsplit_once('_')?;
        Some((stream_id, seq.parse().ok()?))
    }

    fn evict_stale_streams(&self, keep: &str) {
        while self.streams.len() > self.max_streams {
            let stalest = self
                .streams
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.value().back().map_or(0, |(seq, _)| *seq))
                .map(|entry| entry.key().clone());
            let Some(stream_id) = stalest else {
                return;
            };
            self.streams.remove(&stream_id);
            tracing::debug!(%stream_id, "evicted event stream");
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store_event(&self, stream_id: &str, message: Value) -> TransportResult<String> {
        let id = {
            let mut stream = self.streams.entry(stream_id.to_string()).or_default();
            // Allocated under the shard lock so per-stream order matches id order
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let id = format!("{stream_id}_{seq}");
            stream.push_back((seq, StoredEvent::new(id.clone(), stream_id, message)));
            while stream.len() > self.max_events_per_stream {
                stream.pop_front();
            }
            id
        };
        // The entry guard is released above; iterating under it would deadlock
        self.evict_stale_streams(stream_id);
        tracing::trace!(stream_id, event_id = %id, "stored event");
        Ok(id)
    }

    async fn replay_events_after(
        &self,
        last_event_id: &str,
        sender: mpsc::UnboundedSender<StoredEvent>,
    ) -> TransportResult<String> {
        let (stream_id, after) = Self::parse_event_id(last_event_id)
            .ok_or_else(|| TransportError::UnknownEvent(last_event_id.to_string()))?;

        let events: Vec<StoredEvent> = {
            let stream = self
                .streams
                .get(stream_id)
                .ok_or_else(|| TransportError::UnknownEvent(last_event_id.to_string()))?;
            stream
                .iter()
                .filter(|(seq, _)| *seq > after)
                .map(|(_, event)| event.clone())
                .collect()
        };

        tracing::debug!(stream_id, count = events.len(), "replaying events");
        for event in events {
            if sender.send(event).is_err() {
                break;
            }
        }
        Ok(stream_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn drain(store: &InMemoryEventStore, last: &str) -> (String, Vec<Value>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = store.replay_events_after(last, tx).await.unwrap();
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.message);
        }
        (stream, out)
    }

    #[tokio::test]
    async fn test_replay_only_later_events_of_same_stream() {
        let store = InMemoryEventStore::new();
        let first = store.store_event("a", json!(1)).await.unwrap();
        store.store_event("b", json!("other")).await.unwrap();
        store.store_event("a", json!(2)).await.unwrap();
        store.store_event("a", json!(3)).await.unwrap();

        let (stream, replayed) = drain(&store, &first).await;
        assert_eq!(stream, "a");
        assert_eq!(replayed, vec![json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_stream_ids_with_underscores() {
        let store = InMemoryEventStore::new();
        let first = store.store_event("session_x", json!("one")).await.unwrap();
        store.store_event("session_x", json!("two")).await.unwrap();
        let (stream, replayed) = drain(&store, &first).await;
        assert_eq!(stream, "session_x");
        assert_eq!(replayed, vec![json!("two")]);
    }

    #[tokio::test]
    async fn test_unknown_event_id() {
        let store = InMemoryEventStore::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = store.replay_events_after("nope", tx.clone()).await.unwrap_err();
        assert_eq!(err, TransportError::UnknownEvent("nope".into()));

        let err = store.replay_events_after("ghost_4", tx).await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownEvent(_)));
    }

    #[tokio::test]
    async fn test_default_store_is_bounded() {
        let store = InMemoryEventStore::new();
        for n in 0..DEFAULT_MAX_EVENTS_PER_STREAM + 3 {
            store.store_event("standalone", json!(n)).await.unwrap();
        }
        assert_eq!(store.stream_len("standalone"), DEFAULT_MAX_EVENTS_PER_STREAM);
    }

    #[tokio::test]
    async fn test_stalest_stream_is_dropped_past_the_stream_cap() {
        let store = InMemoryEventStore::new().with_max_streams(2);
        let first = store.store_event("req-a", json!(1)).await.unwrap();
        let kept = store.store_event("standalone", json!(2)).await.unwrap();
        store.store_event("req-b", json!(3)).await.unwrap();
        assert_eq!(store.stream_count(), 2);
        assert_eq!(store.stream_len("req-a"), 0);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = store.replay_events_after(&first, tx).await.unwrap_err();
        assert_eq!(err, TransportError::UnknownEvent(first));

        // Writing refreshes a stream, so the other one goes next
        store.store_event("standalone", json!(4)).await.unwrap();
        store.store_event("req-c", json!(5)).await.unwrap();
        assert_eq!(store.stream_len("req-b"), 0);
        let (stream, replayed) = drain(&store, &kept).await;
        assert_eq!(stream, "standalone");
        assert_eq!(replayed, vec![json!(4)]);
    }

    #[tokio::test]
    async fn test_eviction_keeps_newest() {
        let store = InMemoryEventStore::with_max_events_per_stream(2);
        let first = store.store_event("s", json!(1)).await.unwrap();
        store.store_event("s", json!(2)).await.unwrap();
        store.store_event("s", json!(3)).await.unwrap();
        assert_eq!(store.stream_len("s"), 2);

        let (_, replayed) = drain(&store, &first).await;
        assert_eq!(replayed, vec![json!(2), json!(3)]);
    }
}
