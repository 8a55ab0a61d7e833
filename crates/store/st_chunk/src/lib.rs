//! The contract between the engine and whatever holds slice payloads.
//!
//! The engine never interprets chunk bytes; it derives keys, writes whole
//! objects, and reads ranges. Real deployments plug in a disk- or
//! S3-backed implementation; [`MemoryChunkStore`] covers tests and
//! single-process demos.

use std::collections::HashMap;

use parking_lot::RwLock;

use st_types::{Error, Result};

/// Capacity as reported by [`ChunkStore::capacity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreCapacity {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

/// Opaque byte storage addressed by string keys.
///
/// Every operation may suspend (network, disk) and may fail with
/// `NotFound`, `IoError`, or `InvalidArgument`. A ranged read that runs
/// off the end of an object returns the available bytes; that is not an
/// error.
pub trait ChunkStore: Send + Sync {
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Bytes `[offset, offset + size)` of the object, clamped to its end.
    fn get_range(&self, key: &str, offset: u64, size: u64) -> Result<Vec<u8>>;

    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Point-gets each key in order. Fails if any key is missing.
    fn batch_get(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    fn health_check(&self) -> Result<()>;

    fn capacity(&self) -> Result<StoreCapacity>;
}

// ---

type AHashMap<K, V> = HashMap<K, V, ahash::RandomState>;

/// Chunk storage in a process-local map. Not durable, by design.
pub struct MemoryChunkStore {
    objects: RwLock<AHashMap<String, Vec<u8>>>,
    total_capacity: u64,
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl MemoryChunkStore {
    pub fn new(total_capacity: u64) -> Self {
        Self {
            objects: RwLock::new(AHashMap::default()),
            total_capacity,
        }
    }

    fn used(&self) -> u64 {
        self.objects.read().values().map(|v| v.len() as u64).sum()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_argument("empty chunk key"));
        }
        let mut objects = self.objects.write();
        let incoming = data.len() as u64;
        let used: u64 = objects
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(_, v)| v.len() as u64)
            .sum();
        if used + incoming > self.total_capacity {
            return Err(Error::no_space(format!(
                "chunk store full: {used} used of {}",
                self.total_capacity
            )));
        }
        objects.insert(key.to_owned(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("chunk {key:?}")))
    }

    fn get_range(&self, key: &str, offset: u64, size: u64) -> Result<Vec<u8>> {
        let objects = self.objects.read();
        let data = objects
            .get(key)
            .ok_or_else(|| Error::not_found(format!("chunk {key:?}")))?;

        let start = (offset as usize).min(data.len());
        let end = (offset.saturating_add(size) as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn capacity(&self) -> Result<StoreCapacity> {
        let used = self.used();
        Ok(StoreCapacity {
            total: self.total_capacity,
            used,
            available: self.total_capacity.saturating_sub(used),
        })
    }
}
