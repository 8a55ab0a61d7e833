//! The metadata engine: partitions that own inode-id ranges, and the
//! stateless service that walks paths and drives layout mutations on top
//! of them.
//!
//! A partition pairs one KV sub-store with in-memory hot indices; every
//! mutation is a KV transaction, and the indices are read-through caches
//! populated only after a successful commit. The service routes each
//! inode id to the partition owning its range and owns the global
//! "next inode" counter.

mod partition;
mod service;

pub use partition::{MetaPartition, SPLIT_THRESHOLD};
pub use service::{parse_path, MetadataService};
