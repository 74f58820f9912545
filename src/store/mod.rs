//! Persistence: an abstract blob store plus the size-bounded shard store
//! layered on top of it.

mod blob;
mod shards;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use shards::ShardStore;
