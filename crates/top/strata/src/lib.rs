//! The strata object-storage engine, assembled.
//!
//! This crate wires the pieces — KV stores, metadata partitions, the S3
//! sub-store, a chunk store, and the namespace layer — into one engine
//! value, and re-exports the public surface of the member crates.
//!
//! ```no_run
//! use strata::{Strata, StrataConfig};
//!
//! let engine = Strata::open(StrataConfig::new("/var/lib/strata")).unwrap();
//! let cancel = strata::CancelToken::never();
//! engine.namespace.write("s3://data/hello.txt", b"hi", 0, &cancel).unwrap();
//! ```

use std::path::PathBuf;
use std::sync::Arc;

pub use st_chunk::{ChunkStore, MemoryChunkStore, StoreCapacity};
pub use st_kv::{KvStore, Txn, WriteBatch};
pub use st_meta::{parse_path, MetaPartition, MetadataService};
pub use st_namespace::{NamespaceService, ParsedPath, PathConverter};
pub use st_object_store::{ObjectListing, ObjectStore};
pub use st_singleflight::SingleFlight;
pub use st_slice_tree::{Slice, SliceTree};
pub use st_types::{
    unix_now, AttrMask, BucketMeta, CancelToken, Dentry, DentryType, Error, ErrorKind, FileLayout,
    FileMode, InodeAttr, InodeId, ObjectMeta, Result, SliceInfo,
};

/// Where and how to open an engine.
#[derive(Clone, Debug)]
pub struct StrataConfig {
    /// Root directory; the metadata partition and the S3 sub-store get
    /// subdirectories of their own.
    pub data_dir: PathBuf,
    /// Bucket assumed for bare `/key` paths.
    pub default_bucket: String,
    /// Capacity handed to the built-in chunk store. Ignored when a custom
    /// chunk store is supplied.
    pub chunk_capacity: u64,
}

impl StrataConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            default_bucket: "default".to_owned(),
            chunk_capacity: u64::MAX,
        }
    }

    pub fn default_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.default_bucket = bucket.into();
        self
    }

    pub fn chunk_capacity(mut self, capacity: u64) -> Self {
        self.chunk_capacity = capacity;
        self
    }
}

/// One running engine: every service, already wired.
pub struct Strata {
    pub meta: Arc<MetadataService>,
    pub objects: Arc<ObjectStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub namespace: Arc<NamespaceService>,
}

impl Strata {
    /// Opens (or bootstraps) an engine under `config.data_dir` with the
    /// built-in in-memory chunk store.
    pub fn open(config: StrataConfig) -> Result<Self> {
        let chunks: Arc<dyn ChunkStore> =
            Arc::new(MemoryChunkStore::new(config.chunk_capacity));
        Self::open_with_chunks(config, chunks)
    }

    /// Opens the engine against a caller-supplied chunk store.
    pub fn open_with_chunks(config: StrataConfig, chunks: Arc<dyn ChunkStore>) -> Result<Self> {
        st_log::setup_logging();

        let meta = Arc::new(MetadataService::open(&config.data_dir.join("meta"))?);
        let objects = Arc::new(ObjectStore::open(&config.data_dir.join("objects"))?);
        let namespace = Arc::new(NamespaceService::new(
            Arc::clone(&meta),
            Arc::clone(&chunks),
            PathConverter::new(config.default_bucket),
        ));

        st_log::info!("strata engine open at {}", config.data_dir.display());
        Ok(Self {
            meta,
            objects,
            chunks,
            namespace,
        })
    }
}
