// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Stream bus client.
//!
//! The bus is the transport between the planner, the workers, and the result
//! broker: a key-value store with append-only per-key streams and blocking
//! read cursors. Per-process state lives solely here; the broker itself keeps
//! nothing between requests.
//!
//! A `"error"` field inside a stream entry is the worker-side failure signal;
//! consumers stop collecting when they see one.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{aio::ConnectionManager, AsyncCommands};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("stream bus unavailable: {0}")]
    Connection(String),

    #[error("stream bus command failed: {0}")]
    Command(String),
}

/// One appended stream entry: its cursor id and field/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, Vec<u8>)>,
}

/// The bus operations the core depends on. `read_after` has blocking-read
/// semantics: it suspends until entries past the cursor exist.
#[async_trait]
pub trait StreamBus: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BusError>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BusError>;

    /// Push work units onto a worker queue, preserving order.
    async fn enqueue(&self, queue: &str, items: &[Vec<u8>]) -> Result<(), BusError>;

    /// Append one field/value entry to the stream at `key`.
    async fn append(&self, key: &str, field: &str, value: &[u8]) -> Result<String, BusError>;

    /// Entries appended after `cursor` ("0" for the stream start), blocking
    /// until at least one exists.
    async fn read_after(&self, key: &str, cursor: &str) -> Result<Vec<StreamEntry>, BusError>;

    async fn len(&self, key: &str) -> Result<u64, BusError>;
}

/// Redis-backed bus: GET/SET EX for the header keys, RPUSH for the task
/// queue, XADD/XREAD/XLEN for the per-process result streams.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        info!("connecting to stream bus at {url}");
        let client =
            redis::Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self { client, conn })
    }
}

fn command_error(e: redis::RedisError) -> BusError {
    BusError::Command(e.to_string())
}

#[async_trait]
impl StreamBus for RedisBus {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BusError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(command_error)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(command_error)
    }

    async fn enqueue(&self, queue: &str, items: &[Vec<u8>]) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(queue, items)
            .await
            .map_err(command_error)
    }

    async fn append(&self, key: &str, field: &str, value: &[u8]) -> Result<String, BusError> {
        let mut conn = self.conn.clone();
        conn.xadd(key, "*", &[(field, value)])
            .await
            .map_err(command_error)
    }

    async fn read_after(&self, key: &str, cursor: &str) -> Result<Vec<StreamEntry>, BusError> {
        // A dedicated connection per blocking read: XREAD BLOCK 0 parks the
        // connection indefinitely, which would starve everything else
        // multiplexed onto the shared one.
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        let options = StreamReadOptions::default().block(0);
        let reply: StreamReadReply = conn
            .xread_options(&[key], &[cursor], &options)
            .await
            .map_err(command_error)?;

        let mut entries = Vec::new();
        for stream_key in reply.keys {
            for id in stream_key.ids {
                let mut fields = Vec::with_capacity(id.map.len());
                for (field, value) in id.map {
                    let bytes: Vec<u8> =
                        redis::from_redis_value(&value).map_err(command_error)?;
                    fields.push((field, bytes));
                }
                entries.push(StreamEntry { id: id.id, fields });
            }
        }
        debug!(key, count = entries.len(), "stream read");
        Ok(entries)
    }

    async fn len(&self, key: &str) -> Result<u64, BusError> {
        let mut conn = self.conn.clone();
        conn.xlen(key).await.map_err(command_error)
    }
}

/// In-memory bus with the same observable semantics, for tests and for
/// running the broker without a Redis at hand. Entry ids count up from
/// `1-0`; TTLs are accepted and ignored.
#[derive(Default)]
pub struct MemoryBus {
    state: Mutex<MemoryState>,
    appended: Notify,
}

#[derive(Default)]
struct MemoryState {
    values: HashMap<String, Vec<u8>>,
    streams: HashMap<String, Vec<(u64, String, Vec<u8>)>>,
    queues: HashMap<String, Vec<Vec<u8>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything enqueued on `queue` so far. Test-facing.
    pub fn queued(&self, queue: &str) -> Vec<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.queues.get(queue).cloned().unwrap_or_default()
    }
}

fn cursor_seq(cursor: &str) -> u64 {
    cursor
        .split('-')
        .next()
        .and_then(|seq| seq.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl StreamBus for MemoryBus {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BusError> {
        let state = self.state.lock().unwrap();
        Ok(state.values.get(key).cloned())
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], _ttl: Duration) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        state.values.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn enqueue(&self, queue: &str, items: &[Vec<u8>]) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .extend(items.iter().cloned());
        Ok(())
    }

    async fn append(&self, key: &str, field: &str, value: &[u8]) -> Result<String, BusError> {
        let id = {
            let mut state = self.state.lock().unwrap();
            let entries = state.streams.entry(key.to_string()).or_default();
            let seq = entries.len() as u64 + 1;
            entries.push((seq, field.to_string(), value.to_vec()));
            format!("{seq}-0")
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_after(&self, key: &str, cursor: &str) -> Result<Vec<StreamEntry>, BusError> {
        let after = cursor_seq(cursor);
        loop {
            // Register interest before checking, so an append between the
            // check and the await cannot be missed.
            let notified = self.appended.notified();
            {
                let state = self.state.lock().unwrap();
                if let Some(entries) = state.streams.get(key) {
                    let fresh: Vec<StreamEntry> = entries
                        .iter()
                        .filter(|(seq, _, _)| *seq > after)
                        .map(|(seq, field, value)| StreamEntry {
                            id: format!("{seq}-0"),
                            fields: vec![(field.clone(), value.clone())],
                        })
                        .collect();
                    if !fresh.is_empty() {
                        return Ok(fresh);
                    }
                }
            }
            notified.await;
        }
    }

    async fn len(&self, key: &str) -> Result<u64, BusError> {
        let state = self.state.lock().unwrap();
        Ok(state.streams.get(key).map_or(0, |entries| entries.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_of_absent_key_is_none() {
        let bus = MemoryBus::new();
        assert_eq!(bus.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let bus = MemoryBus::new();
        bus.set_with_ttl("k", b"v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(bus.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_len_counts_appends() {
        let bus = MemoryBus::new();
        assert_eq!(bus.len("s").await.unwrap(), 0);
        bus.append("s", "tile", b"a").await.unwrap();
        bus.append("s", "tile", b"b").await.unwrap();
        assert_eq!(bus.len("s").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_read_after_skips_consumed_entries() {
        let bus = MemoryBus::new();
        bus.append("s", "tile", b"a").await.unwrap();
        let id = bus.append("s", "tile", b"b").await.unwrap();

        let all = bus.read_after("s", "0").await.unwrap();
        assert_eq!(all.len(), 2);

        bus.append("s", "tile", b"c").await.unwrap();
        let fresh = bus.read_after("s", &id).await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].fields[0].1, b"c".to_vec());
    }

    #[tokio::test]
    async fn test_read_after_blocks_until_append() {
        let bus = Arc::new(MemoryBus::new());

        let reader = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.read_after("s", "0").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        bus.append("s", "tile", b"late").await.unwrap();
        let entries = reader.await.unwrap().unwrap();
        assert_eq!(entries[0].fields[0].1, b"late".to_vec());
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let bus = MemoryBus::new();
        bus.enqueue("tasks", &[b"t1".to_vec(), b"t2".to_vec()])
            .await
            .unwrap();
        bus.enqueue("tasks", &[b"t3".to_vec()]).await.unwrap();
        assert_eq!(
            bus.queued("tasks"),
            vec![b"t1".to_vec(), b"t2".to_vec(), b"t3".to_vec()]
        );
    }
}
