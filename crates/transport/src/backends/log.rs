//! In-process partitioned append-only log.

use crate::error::{TransportError, TransportResult};
use crate::traits::{LogOffset, LogRecord, LogStream};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

struct StoredRecord {
    key: Option<Bytes>,
    payload: Bytes,
}

/// Records `[base, base + records.len())` of one partition.
#[derive(Default)]
struct Partition {
    base: u64,
    records: VecDeque<StoredRecord>,
    bytes: u64,
}

impl Partition {
    fn end(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&StoredRecord> {
        let index = offset.checked_sub(self.base)?;
        self.records.get(index as usize)
    }

    fn pop_front(&mut self) -> bool {
        match self.records.pop_front() {
            Some(record) => {
                self.bytes -= record.payload.len() as u64;
                self.base += 1;
                true
            }
            None => false,
        }
    }
}

struct TopicLog {
    partitions: Vec<Partition>,
    /// Next offset to hand out, per group and partition.
    groups: HashMap<String, Vec<u64>>,
    /// Partition a group's next read starts scanning from.
    cursors: HashMap<String, usize>,
    appended: Arc<Notify>,
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Partition::default()).collect(),
            groups: HashMap::new(),
            cursors: HashMap::new(),
            appended: Arc::new(Notify::new()),
        }
    }

    fn pick_partition(&self, key: Option<&Bytes>) -> usize {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions.len() as u64) as usize
            }
            None => self
                .partitions
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.bytes)
                .map(|(i, _)| i)
                .unwrap_or(0),
        }
    }

    /// Drop records every known group has read.
    fn trim_consumed(&mut self, partition: usize) {
        let Some(committed) = self.groups.values().map(|o| o[partition]).min() else {
            return;
        };
        let slot = &mut self.partitions[partition];
        while slot.base < committed && slot.pop_front() {}
    }

    /// Evict the oldest records until the partition fits in `max_bytes`.
    /// The newest record is always kept. Returns the number evicted.
    fn enforce_cap(&mut self, partition: usize, max_bytes: u64) -> u64 {
        let slot = &mut self.partitions[partition];
        let mut evicted = 0;
        while slot.bytes > max_bytes && slot.records.len() > 1 && slot.pop_front() {
            evicted += 1;
        }
        evicted
    }

    /// Hand out and commit the next record for `group`, scanning partitions round-robin.
    fn take_next(&mut self, topic: &str, group: &str) -> Option<LogRecord> {
        let count = self.partitions.len();
        let offsets = self
            .groups
            .entry(group.to_string())
            .or_insert_with(|| vec![0; count]);
        let cursor = self.cursors.entry(group.to_string()).or_insert(0);

        for step in 0..count {
            let partition = (*cursor + step) % count;
            let slot = &self.partitions[partition];
            // Records below the base were evicted; skip past them.
            let next = offsets[partition].max(slot.base);
            if let Some(record) = slot.get(next) {
                offsets[partition] = next + 1;
                *cursor = (partition + 1) % count;
                let record = LogRecord {
                    topic: topic.to_string(),
                    position: LogOffset {
                        partition: partition as u32,
                        offset: next,
                    },
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                };
                self.trim_consumed(partition);
                return Some(record);
            }
        }
        None
    }
}

/// In-process partitioned log.
///
/// Keyed records go to `hash(key) % partitions`; keyless records go to the
/// partition holding the fewest bytes. Ordering holds within a partition only.
///
/// Retention: a record is dropped once every consumer group that has read
/// the topic has moved past it. Each partition is also capped at
/// `max_partition_bytes`; when it overflows the oldest records are evicted,
/// read or not, and groups behind them skip ahead.
pub struct MemoryLog {
    partitions: u32,
    max_partition_bytes: u64,
    topics: Mutex<HashMap<String, TopicLog>>,
    evicted: AtomicU64,
}

impl MemoryLog {
    /// A log without a size cap. Consumed records are still trimmed.
    pub fn new(partitions: u32) -> TransportResult<Self> {
        Self::with_retention(partitions, u64::MAX)
    }

    pub fn with_retention(partitions: u32, max_partition_bytes: u64) -> TransportResult<Self> {
        if partitions == 0 {
            return Err(TransportError::Config(
                "log stream needs at least one partition".to_string(),
            ));
        }
        if max_partition_bytes == 0 {
            return Err(TransportError::Config(
                "log partition cap must be positive".to_string(),
            ));
        }
        Ok(Self {
            partitions,
            max_partition_bytes,
            topics: Mutex::new(HashMap::new()),
            evicted: AtomicU64::new(0),
        })
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, TopicLog>> {
        self.topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records appended to `topic` that `group` has not read yet.
    pub fn lag(&self, topic: &str, group: &str) -> u64 {
        let topics = self.topics();
        let Some(log) = topics.get(topic) else {
            return 0;
        };
        let offsets = log.groups.get(group);
        log.partitions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let read = offsets.map(|o| o[i]).unwrap_or(0).max(p.base);
                p.end().saturating_sub(read)
            })
            .sum()
    }

    /// Records and payload bytes currently held for `topic`.
    pub fn retained(&self, topic: &str) -> (u64, u64) {
        let topics = self.topics();
        topics.get(topic).map_or((0, 0), |log| {
            log.partitions.iter().fold((0, 0), |(records, bytes), p| {
                (records + p.records.len() as u64, bytes + p.bytes)
            })
        })
    }

    /// Records evicted by the size cap before every group read them.
    pub fn evicted_records(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

fn check_topic(topic: &str) -> TransportResult<()> {
    if topic.is_empty() {
        return Err(TransportError::InvalidTopic(
            "log topic cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl LogStream for MemoryLog {
    async fn append(
        &self,
        topic: &str,
        key: Option<Bytes>,
        payload: Bytes,
    ) -> TransportResult<LogOffset> {
        check_topic(topic)?;
        let (position, appended, evicted) = {
            let mut topics = self.topics();
            let log = topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::new(self.partitions));
            let partition = log.pick_partition(key.as_ref());
            let slot = &mut log.partitions[partition];
            let offset = slot.end();
            slot.bytes += payload.len() as u64;
            slot.records.push_back(StoredRecord { key, payload });
            let evicted = log.enforce_cap(partition, self.max_partition_bytes);
            (
                LogOffset {
                    partition: partition as u32,
                    offset,
                },
                log.appended.clone(),
                evicted,
            )
        };
        if evicted > 0 {
            self.evicted.fetch_add(evicted, Ordering::Relaxed);
            tracing::debug!(
                topic = %topic,
                partition = position.partition,
                evicted,
                "Log partition over its size cap, oldest records evicted"
            );
        }
        appended.notify_waiters();
        Ok(position)
    }

    async fn read(&self, topic: &str, group: &str) -> TransportResult<LogRecord> {
        check_topic(topic)?;
        loop {
            let appended = {
                let mut topics = self.topics();
                let log = topics
                    .entry(topic.to_string())
                    .or_insert_with(|| TopicLog::new(self.partitions));
                if let Some(record) = log.take_next(topic, group) {
                    return Ok(record);
                }
                log.appended.clone()
            };

            let notified = appended.notified();
            tokio::pin!(notified);
            // Register before re-checking so an append in between is not missed.
            notified.as_mut().enable();
            let ready = {
                let mut topics = self.topics();
                topics
                    .get_mut(topic)
                    .and_then(|log| log.take_next(topic, group))
            };
            if let Some(record) = ready {
                return Ok(record);
            }
            notified.await;
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
