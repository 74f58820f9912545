//! Error type shared across the crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatTrendError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("blob store failure: {reason}")]
    Store { reason: String },

    #[error("shard {id} not found")]
    ShardMissing { id: u64 },

    #[error("worker pool has been terminated")]
    PoolTerminated,

    #[error("worker crashed: {reason}")]
    WorkerCrashed { reason: String },

    #[error("analysis failed for shard {shard_id}: {reason}")]
    ShardAnalysis { shard_id: u64, reason: String },
}

pub type Result<T> = std::result::Result<T, ChatTrendError>;
