//! In-memory broker backend for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;

use super::{Broker, BrokerError, BrokerResult, ConsumerInfo, StreamEntry};

#[derive(Default)]
struct MemoryState {
    keys: HashMap<String, Slot>,
    streams: HashMap<String, MemoryStream>,
}

struct Slot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct MemoryStream {
    entries: Vec<(u64, HashMap<String, Vec<u8>>)>,
    last_seq: u64,
    expires_at: Option<Instant>,
    groups: HashMap<String, MemoryGroup>,
}

#[derive(Default)]
struct MemoryGroup {
    last_delivered: u64,
    consumers: HashMap<String, MemoryConsumer>,
}

struct MemoryConsumer {
    seen: Instant,
    idle_offset: Duration,
}

fn expired(expires_at: Option<Instant>) -> bool {
    expires_at.is_some_and(|at| at <= Instant::now())
}

fn parse_seq(id: &str) -> BrokerResult<u64> {
    let seq = id.split('-').next().unwrap_or(id);
    seq.parse()
        .map_err(|_| BrokerError::decode(format!("invalid stream id {:?}", id)))
}

fn to_entry(seq: u64, fields: &HashMap<String, Vec<u8>>) -> StreamEntry {
    StreamEntry {
        id: format!("{}-0", seq),
        fields: fields.clone(),
    }
}

impl MemoryState {
    fn purge(&mut self) {
        self.keys.retain(|_, slot| !expired(slot.expires_at));
        self.streams.retain(|_, stream| !expired(stream.expires_at));
    }
}

/// In-memory broker backend for testing
///
/// Streams and keys live in a single map guarded by a lock. Blocking reads
/// park on a [`Notify`] that every stream append wakes. Expiry is applied
/// lazily on access.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<RwLock<MemoryState>>,
    appended: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer that has been idle for `idle`, creating the
    /// group if needed
    pub async fn register_consumer(&self, stream: &str, group: &str, name: &str, idle: Duration) {
        let mut state = self.state.write().await;
        let consumers = &mut state
            .streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default()
            .consumers;
        consumers.insert(
            name.to_string(),
            MemoryConsumer {
                seen: Instant::now(),
                idle_offset: idle,
            },
        );
    }

    /// Whether a plain key exists and has not expired
    pub async fn contains_key(&self, key: &str) -> bool {
        let state = self.state.read().await;
        state
            .keys
            .get(key)
            .is_some_and(|slot| !expired(slot.expires_at))
    }

    /// Remaining time to live of a key or stream, `None` when it has none
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let state = self.state.read().await;
        let expires_at = match state.keys.get(key) {
            Some(slot) => slot.expires_at,
            None => state.streams.get(key).and_then(|s| s.expires_at),
        };
        expires_at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Wait for entries, checking once per wakeup until `block` runs out
    async fn wait_for<F>(&self, block: Duration, mut poll: F) -> BrokerResult<Vec<StreamEntry>>
    where
        F: FnMut(&mut MemoryState) -> BrokerResult<Vec<StreamEntry>>,
    {
        let deadline = Instant::now() + block;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = {
                let mut state = self.state.write().await;
                state.purge();
                poll(&mut *state)?
            };
            if !entries.is_empty() || block.is_zero() {
                return Ok(entries);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> BrokerResult<()> {
        let mut state = self.state.write().await;
        state.keys.insert(
            key.to_string(),
            Slot {
                value: value.to_vec(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> BrokerResult<Option<Vec<u8>>> {
        let mut state = self.state.write().await;
        state.purge();
        Ok(state.keys.get(key).map(|slot| slot.value.clone()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> BrokerResult<bool> {
        let mut state = self.state.write().await;
        state.purge();
        let at = Some(Instant::now() + ttl);
        if let Some(slot) = state.keys.get_mut(key) {
            slot.expires_at = at;
            return Ok(true);
        }
        if let Some(stream) = state.streams.get_mut(key) {
            stream.expires_at = at;
            return Ok(true);
        }
        Ok(false)
    }

    async fn xadd(&self, stream: &str, fields: &[(&str, &[u8])]) -> BrokerResult<String> {
        let id = {
            let mut state = self.state.write().await;
            state.purge();
            let stream = state.streams.entry(stream.to_string()).or_default();
            stream.last_seq += 1;
            let seq = stream.last_seq;
            let fields = fields
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_vec()))
                .collect();
            stream.entries.push((seq, fields));
            format!("{}-0", seq)
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn xlen(&self, stream: &str) -> BrokerResult<usize> {
        let mut state = self.state.write().await;
        state.purge();
        Ok(state.streams.get(stream).map_or(0, |s| s.entries.len()))
    }

    async fn xread(
        &self,
        stream: &str,
        after: &str,
        block: Duration,
    ) -> BrokerResult<Vec<StreamEntry>> {
        let after = parse_seq(after)?;
        self.wait_for(block, |state| {
            Ok(state
                .streams
                .get(stream)
                .map(|s| {
                    s.entries
                        .iter()
                        .filter(|(seq, _)| *seq > after)
                        .map(|(seq, fields)| to_entry(*seq, fields))
                        .collect()
                })
                .unwrap_or_default())
        })
        .await
    }

    async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BrokerResult<Vec<StreamEntry>> {
        self.wait_for(block, |state| {
            let no_group = || BrokerError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            };
            let s = state.streams.get_mut(stream).ok_or_else(no_group)?;
            let g = s.groups.get_mut(group).ok_or_else(no_group)?;
            g.consumers.insert(
                consumer.to_string(),
                MemoryConsumer {
                    seen: Instant::now(),
                    idle_offset: Duration::ZERO,
                },
            );

            let last = g.last_delivered;
            let batch: Vec<StreamEntry> = s
                .entries
                .iter()
                .filter(|(seq, _)| *seq > last)
                .take(count.max(1))
                .map(|(seq, fields)| to_entry(*seq, fields))
                .collect();
            if let Some(entry) = batch.last() {
                g.last_delivered = parse_seq(&entry.id)?;
            }
            Ok(batch)
        })
        .await
    }

    async fn xdel(&self, stream: &str, ids: &[String]) -> BrokerResult<usize> {
        let seqs = ids
            .iter()
            .map(|id| parse_seq(id))
            .collect::<BrokerResult<Vec<_>>>()?;
        let mut state = self.state.write().await;
        let Some(s) = state.streams.get_mut(stream) else {
            return Ok(0);
        };
        let before = s.entries.len();
        s.entries.retain(|(seq, _)| !seqs.contains(seq));
        Ok(before - s.entries.len())
    }

    async fn create_group(&self, stream: &str, group: &str) -> BrokerResult<bool> {
        let mut state = self.state.write().await;
        state.purge();
        let s = state.streams.entry(stream.to_string()).or_default();
        if s.groups.contains_key(group) {
            return Ok(false);
        }
        // Groups start at id 0, so entries already on the stream are delivered
        s.groups.insert(group.to_string(), MemoryGroup::default());
        Ok(true)
    }

    async fn consumers(&self, stream: &str, group: &str) -> BrokerResult<Vec<ConsumerInfo>> {
        let state = self.state.read().await;
        let g = state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| BrokerError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;
        let mut consumers: Vec<ConsumerInfo> = g
            .consumers
            .iter()
            .map(|(name, c)| ConsumerInfo {
                name: name.clone(),
                pending: 0,
                idle: c.seen.elapsed() + c.idle_offset,
            })
            .collect();
        consumers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(consumers)
    }

    async fn delete_consumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> BrokerResult<usize> {
        let mut state = self.state.write().await;
        let g = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| BrokerError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;
        g.consumers.remove(consumer);
        Ok(0)
    }
}
