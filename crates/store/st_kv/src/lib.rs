//! An ordered, byte-keyed KV store.
//!
//! The working set lives in an in-memory ordered map; durability comes from
//! an append-only write-ahead log that is fsynced before a batch is applied.
//! Reads observe the latest committed state within the process; the store
//! assumes a single writing process.
//!
//! Three write paths, all funneling into the same WAL append:
//! * [`KvStore::put`] / [`KvStore::delete`] — single-op batches;
//! * [`KvStore::write_batch`] — an explicit atomic group;
//! * [`KvStore::begin_transaction`] — a scoped [`Txn`] that buffers ops and
//!   rolls back if dropped without [`Txn::commit`].

mod store;
mod wal;

pub use store::{KvStore, Txn, WriteBatch};
pub(crate) use wal::Wal;

/// One mutation inside a batch or transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Op {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl Op {
    pub(crate) fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}
