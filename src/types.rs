//! Public data model: normalized messages, shard records, and the cooperative
//! cancellation token shared by ingest and analysis runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Opaque, store-assigned shard identifier.
pub type ShardId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A normalized chat message, as emitted by the ingest pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub text: String,
    /// Milliseconds since the Unix epoch, when the export carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Message {
    /// Serialized byte footprint used for shard size accounting.
    #[must_use]
    pub fn footprint(&self) -> u64 {
        self.text.len() as u64
    }
}

/// One persisted shard: an immutable, ordered batch of messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardRecord {
    pub messages: Vec<Message>,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ts: Option<i64>,
    pub message_count: u32,
}

/// Shard metadata as returned by `ShardStore::list_shards`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMeta {
    pub id: ShardId,
    pub size_bytes: u64,
    pub min_ts: Option<i64>,
    pub max_ts: Option<i64>,
    pub message_count: u32,
}

/// Filter for shard listing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShardFilter {
    /// Exclude shards whose `max_ts` is defined and strictly less than this.
    /// Shards with no timestamps are always included.
    pub cutoff: Option<i64>,
}

/// Byte-level progress of the shard store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardProgress {
    pub persisted_bytes: u64,
    pub pending_bytes: u64,
}

/// Cooperative cancellation signal. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
