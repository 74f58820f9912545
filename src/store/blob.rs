//! Abstract key-value blob substrate for shard records.
//!
//! Records are opaque to the substrate; identifiers are store-assigned and
//! auto-incrementing. Two implementations ship: an in-memory store for tests
//! and short-lived sessions, and a directory-backed store with one JSON file
//! per shard.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ChatTrendError, Result};
use crate::types::{ShardId, ShardRecord};

pub trait BlobStore {
    /// Persists one record and returns its store-assigned identifier.
    fn put(&mut self, record: &ShardRecord) -> Result<ShardId>;

    /// Random-access read. `None` when the identifier is unknown.
    fn get(&self, id: ShardId) -> Result<Option<ShardRecord>>;

    /// All `(id, record)` pairs in ascending id order.
    fn iterate(&self) -> Result<Vec<(ShardId, ShardRecord)>>;

    /// Wipes every persisted record.
    fn delete_all(&mut self) -> Result<()>;
}

/// Volatile blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    records: BTreeMap<ShardId, ShardRecord>,
    next_id: ShardId,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&mut self, record: &ShardRecord) -> Result<ShardId> {
        self.next_id += 1;
        self.records.insert(self.next_id, record.clone());
        Ok(self.next_id)
    }

    fn get(&self, id: ShardId) -> Result<Option<ShardRecord>> {
        Ok(self.records.get(&id).cloned())
    }

    fn iterate(&self) -> Result<Vec<(ShardId, ShardRecord)>> {
        Ok(self
            .records
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect())
    }

    fn delete_all(&mut self) -> Result<()> {
        self.records.clear();
        self.next_id = 0;
        Ok(())
    }
}

/// Directory-backed blob store: `shard-<id>.json` per record.
#[derive(Debug)]
pub struct FsBlobStore {
    dir: PathBuf,
    next_id: ShardId,
}

impl FsBlobStore {
    /// Opens (creating if needed) a store rooted at `dir`. The next id picks
    /// up after the highest id already present.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs_err::create_dir_all(&dir)?;
        let mut highest = 0;
        for entry in fs_err::read_dir(&dir)? {
            let entry = entry?;
            if let Some(id) = parse_shard_file_name(&entry.file_name().to_string_lossy()) {
                highest = highest.max(id);
            }
        }
        Ok(Self {
            dir,
            next_id: highest,
        })
    }

    fn path_for(&self, id: ShardId) -> PathBuf {
        self.dir.join(format!("shard-{id:06}.json"))
    }
}

fn parse_shard_file_name(name: &str) -> Option<ShardId> {
    name.strip_prefix("shard-")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

impl BlobStore for FsBlobStore {
    fn put(&mut self, record: &ShardRecord) -> Result<ShardId> {
        let id = self.next_id + 1;
        let encoded = serde_json::to_vec(record)?;
        fs_err::write(self.path_for(id), encoded)?;
        self.next_id = id;
        Ok(id)
    }

    fn get(&self, id: ShardId) -> Result<Option<ShardRecord>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs_err::read(path)?;
        let record = serde_json::from_slice(&bytes)?;
        Ok(Some(record))
    }

    fn iterate(&self) -> Result<Vec<(ShardId, ShardRecord)>> {
        let mut ids = Vec::new();
        for entry in fs_err::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(id) = parse_shard_file_name(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let record = self.get(id)?.ok_or(ChatTrendError::ShardMissing { id })?;
            records.push((id, record));
        }
        Ok(records)
    }

    fn delete_all(&mut self) -> Result<()> {
        for entry in fs_err::read_dir(&self.dir)? {
            let entry = entry?;
            if parse_shard_file_name(&entry.file_name().to_string_lossy()).is_some() {
                fs_err::remove_file(entry.path())?;
            }
        }
        self.next_id = 0;
        Ok(())
    }
}
