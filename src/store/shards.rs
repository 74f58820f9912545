//! Append-only, size-bounded shard persistence with timestamp bookkeeping.
//!
//! Messages accumulate in an in-memory buffer. Once the buffer reaches
//! `MIN_SHARD_BYTES` a flush pass slices contiguous prefixes of up to
//! `MAX_SHARD_BYTES` into immutable shard records, stopping when the
//! remainder drops below the minimum. `finalize` force-drains whatever is
//! left so no message is ever lost. Single-writer discipline: one ingest run
//! owns the buffer at a time.

use crate::constants::{MAX_SHARD_BYTES, MIN_SHARD_BYTES};
use crate::error::Result;
use crate::store::BlobStore;
use crate::types::{Message, ShardFilter, ShardId, ShardMeta, ShardProgress, ShardRecord};

pub struct ShardStore<B: BlobStore> {
    blobs: B,
    pending: Vec<Message>,
    pending_bytes: u64,
    persisted_bytes: u64,
    last_shard_id: Option<ShardId>,
    min_shard_bytes: u64,
    max_shard_bytes: u64,
}

impl<B: BlobStore> ShardStore<B> {
    #[must_use]
    pub fn new(blobs: B) -> Self {
        Self::with_bounds(blobs, MIN_SHARD_BYTES, MAX_SHARD_BYTES)
    }

    /// Bounds are configurable so tests do not need to buffer 12 MiB.
    #[must_use]
    pub fn with_bounds(blobs: B, min_shard_bytes: u64, max_shard_bytes: u64) -> Self {
        Self {
            blobs,
            pending: Vec::new(),
            pending_bytes: 0,
            persisted_bytes: 0,
            last_shard_id: None,
            min_shard_bytes,
            max_shard_bytes: max_shard_bytes.max(min_shard_bytes),
        }
    }

    #[must_use]
    pub fn last_shard_id(&self) -> Option<ShardId> {
        self.last_shard_id
    }

    #[must_use]
    pub fn progress(&self) -> ShardProgress {
        ShardProgress {
            persisted_bytes: self.persisted_bytes,
            pending_bytes: self.pending_bytes,
        }
    }

    /// Buffers one message; flushes full shards once the buffer crosses the
    /// lower threshold. Returns the most recently persisted shard id.
    pub fn append(&mut self, message: Message) -> Result<Option<ShardId>> {
        self.pending_bytes += message.footprint();
        self.pending.push(message);
        if self.pending_bytes >= self.min_shard_bytes {
            self.flush(false)?;
        }
        Ok(self.last_shard_id)
    }

    /// Force-drains the remaining buffer into one final shard, however small.
    pub fn finalize(&mut self) -> Result<Option<ShardId>> {
        self.flush(true)?;
        Ok(self.last_shard_id)
    }

    fn flush(&mut self, force: bool) -> Result<()> {
        while self.pending_bytes > 0 && (force || self.pending_bytes >= self.min_shard_bytes) {
            let take = if force {
                // Terminal flush drains everything into one shard.
                self.pending.len()
            } else {
                self.prefix_within_max()
            };
            let slice: Vec<Message> = self.pending.drain(..take).collect();
            let record = build_record(slice);
            self.pending_bytes -= record.size_bytes;

            let id = self.blobs.put(&record)?;
            self.persisted_bytes += record.size_bytes;
            self.last_shard_id = Some(id);
            tracing::debug!(
                shard.id = id,
                shard.bytes = record.size_bytes,
                shard.messages = record.message_count,
                forced = force,
                "flushed shard"
            );
        }
        Ok(())
    }

    /// Longest message prefix whose summed footprint stays within the upper
    /// bound. Always at least one message, so oversized messages still flush.
    fn prefix_within_max(&self) -> usize {
        let mut bytes = 0u64;
        let mut take = 0;
        for message in &self.pending {
            let next = bytes + message.footprint();
            if take > 0 && next > self.max_shard_bytes {
                break;
            }
            bytes = next;
            take += 1;
        }
        take.max(1)
    }

    /// Shard metadata, optionally excluding shards entirely before a cutoff.
    /// Shards with no timestamps are always included.
    pub fn list_shards(&self, filter: ShardFilter) -> Result<Vec<ShardMeta>> {
        let mut metas = Vec::new();
        for (id, record) in self.blobs.iterate()? {
            if let (Some(cutoff), Some(max_ts)) = (filter.cutoff, record.max_ts) {
                if max_ts < cutoff {
                    continue;
                }
            }
            metas.push(ShardMeta {
                id,
                size_bytes: record.size_bytes,
                min_ts: record.min_ts,
                max_ts: record.max_ts,
                message_count: record.message_count,
            });
        }
        Ok(metas)
    }

    pub fn read_shard(&self, id: ShardId) -> Result<Option<ShardRecord>> {
        self.blobs.get(id)
    }

    pub fn read_shard_messages(&self, id: ShardId) -> Result<Option<Vec<Message>>> {
        Ok(self.blobs.get(id)?.map(|record| record.messages))
    }

    /// Wipes all persisted shards and resets in-memory accounting. Must not
    /// run concurrently with a pending writer.
    pub fn clear_all(&mut self) -> Result<()> {
        self.blobs.delete_all()?;
        self.pending.clear();
        self.pending_bytes = 0;
        self.persisted_bytes = 0;
        self.last_shard_id = None;
        Ok(())
    }
}

fn build_record(messages: Vec<Message>) -> ShardRecord {
    let mut size_bytes = 0;
    let mut min_ts = None;
    let mut max_ts = None;
    for message in &messages {
        size_bytes += message.footprint();
        if let Some(ts) = message.ts {
            min_ts = Some(min_ts.map_or(ts, |current: i64| current.min(ts)));
            max_ts = Some(max_ts.map_or(ts, |current: i64| current.max(ts)));
        }
    }
    ShardRecord {
        size_bytes,
        min_ts,
        max_ts,
        message_count: messages.len() as u32,
        messages,
    }
}
