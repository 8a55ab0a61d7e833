use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::{Mutex, RwLock};

use st_types::Result;

use crate::{Op, Wal};

const WAL_FILE: &str = "kv.wal";

/// The ordered KV store.
///
/// Concurrent readers share the map lock; writers serialize on the WAL so
/// batch commits have a total order. Lock order is always WAL, then map.
pub struct KvStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    wal: Mutex<Wal>,
}

impl KvStore {
    /// Opens the store under `dir`, creating it if needed and replaying the
    /// write-ahead log.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut map = BTreeMap::new();
        let wal = Wal::open(&dir.join(WAL_FILE), |op| match op {
            Op::Put { key, value } => {
                map.insert(key, value);
            }
            Op::Delete { key } => {
                map.remove(&key);
            }
        })?;

        st_log::debug!(
            "opened kv store at {} ({} live keys)",
            dir.display(),
            map.len()
        );

        Ok(Self {
            map: RwLock::new(map),
            wal: Mutex::new(wal),
        })
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.read().get(key).cloned()
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.map.read().contains_key(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.commit(vec![Op::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.commit(vec![Op::Delete { key: key.to_vec() }])
    }

    /// Ascending `(key, value)` pairs whose key starts with `prefix`,
    /// stopping after `limit` entries. Pass `usize::MAX` for no limit.
    pub fn scan(&self, prefix: &[u8], limit: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        let map = self.map.read();
        map.range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// The greatest `(key, value)` whose key starts with `prefix`.
    pub fn last_in_prefix(&self, prefix: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        let map = self.map.read();
        let entry = match prefix_upper_bound(prefix) {
            Some(upper) => map.range(prefix.to_vec()..upper).next_back(),
            // A prefix of all 0xff bytes has no exclusive upper bound.
            None => map.range(prefix.to_vec()..).next_back(),
        }?;
        let (key, value) = entry;
        key.starts_with(prefix)
            .then(|| (key.clone(), value.clone()))
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().len() == 0
    }

    /// Applies `batch` atomically: on return all its operations are visible
    /// and WAL-durable; on error none are.
    pub fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        self.commit(batch.ops)
    }

    /// Starts a transaction. Dropping it without
    /// [`Txn::commit`] discards every staged operation.
    pub fn begin_transaction(&self) -> Txn<'_> {
        Txn {
            store: self,
            staged: Vec::new(),
        }
    }

    /// Folds the WAL into a single snapshot frame, dropping history. The
    /// store stays readable throughout; writers queue behind the WAL lock.
    pub fn compact(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        let before = wal.size_on_disk()?;
        let snapshot: Vec<Op> = {
            let map = self.map.read();
            map.iter()
                .map(|(key, value)| Op::Put {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect()
        };
        wal.rewrite(&snapshot)?;
        st_log::info!(
            "compacted kv wal: {} -> {} bytes",
            before,
            wal.size_on_disk()?
        );
        Ok(())
    }

    fn commit(&self, ops: Vec<Op>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        // WAL first: the batch must be recoverable before it is visible.
        let mut wal = self.wal.lock();
        wal.append(&ops)?;

        let mut map = self.map.write();
        for op in ops {
            match op {
                Op::Put { key, value } => {
                    map.insert(key, value);
                }
                Op::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// The smallest key strictly greater than every key starting with
/// `prefix`, or `None` when no such key exists (all-0xff prefixes).
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(upper);
        }
        upper.pop();
    }
    None
}

// ---

/// An atomic group of put/delete operations.
#[derive(Default)]
pub struct WriteBatch {
    pub(crate) ops: Vec<Op>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(Op::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(Op::Delete { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ---

/// A scoped transaction: buffered put/delete that become one atomic batch
/// on [`Txn::commit`]. Dropping the value without committing rolls back.
///
/// Reads through the transaction see its own staged writes before the
/// store's committed state.
pub struct Txn<'a> {
    store: &'a KvStore,
    staged: Vec<Op>,
}

impl Txn<'_> {
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.staged.push(Op::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.staged.push(Op::Delete { key: key.into() });
    }

    /// Reads `key` as this transaction would leave it: the latest staged
    /// write wins, otherwise the committed state.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        for op in self.staged.iter().rev() {
            if op.key() == key {
                return match op {
                    Op::Put { value, .. } => Some(value.clone()),
                    Op::Delete { .. } => None,
                };
            }
        }
        self.store.get(key)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Durably applies every staged operation as one atomic batch.
    pub fn commit(mut self) -> Result<()> {
        let ops = std::mem::take(&mut self.staged);
        self.store.commit(ops)
    }

    /// Discards every staged operation. Equivalent to dropping the value;
    /// spelled out for call sites where the rollback is the point.
    pub fn rollback(mut self) {
        self.staged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, KvStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_delete() {
        let (_dir, store) = open_temp();

        assert_eq!(store.get(b"k"), None);
        store.put(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k"), Some(b"v".to_vec()));
        assert!(store.exists(b"k"));

        store.delete(b"k").unwrap();
        assert_eq!(store.get(b"k"), None);
        assert!(!store.exists(b"k"));
    }

    #[test]
    fn scan_respects_prefix_order_and_limit() {
        let (_dir, store) = open_temp();
        for key in ["a/3", "a/1", "b/1", "a/2", "aa"] {
            store.put(key.as_bytes(), b"x").unwrap();
        }

        let hits = store.scan(b"a/", usize::MAX);
        let keys: Vec<_> = hits.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"a/1"[..], b"a/2", b"a/3"]);

        assert_eq!(store.scan(b"a/", 2).len(), 2);
        assert_eq!(store.scan(b"zzz", usize::MAX), vec![]);
    }

    #[test]
    fn last_in_prefix_finds_the_greatest_match() {
        let (_dir, store) = open_temp();
        for key in ["I\x00\x01", "I\x00\x05", "I\x00\x03", "J\x00\x09"] {
            store.put(key.as_bytes(), b"x").unwrap();
        }

        let (key, _) = store.last_in_prefix(b"I").unwrap();
        assert_eq!(key, b"I\x00\x05".to_vec());
        assert_eq!(store.last_in_prefix(b"K"), None);

        // 0xff-prefix edge: no exclusive upper bound exists.
        store.put(&[0xff, 0xff, 0x01], b"x").unwrap();
        let (key, _) = store.last_in_prefix(&[0xff, 0xff]).unwrap();
        assert_eq!(key, vec![0xff, 0xff, 0x01]);
    }

    #[test]
    fn committed_batches_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = KvStore::open(dir.path()).unwrap();
            let mut batch = WriteBatch::new();
            batch.put(&b"x"[..], &b"1"[..]).put(&b"y"[..], &b"2"[..]);
            store.write_batch(batch).unwrap();
            store.delete(b"y").unwrap();
        }

        let store = KvStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"x"), Some(b"1".to_vec()));
        assert_eq!(store.get(b"y"), None);
    }

    #[test]
    fn transaction_commit_is_atomic_and_durable() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = KvStore::open(dir.path()).unwrap();
            let mut txn = store.begin_transaction();
            txn.put(&b"a"[..], &b"1"[..]);
            txn.put(&b"b"[..], &b"2"[..]);

            // Nothing visible until commit.
            assert_eq!(store.get(b"a"), None);
            txn.commit().unwrap();
            assert_eq!(store.get(b"a"), Some(b"1".to_vec()));
        }

        let store = KvStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"b"), Some(b"2".to_vec()));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let (_dir, store) = open_temp();
        store.put(b"keep", b"old").unwrap();

        {
            let mut txn = store.begin_transaction();
            txn.put(&b"keep"[..], &b"new"[..]);
            txn.put(&b"gone"[..], &b"x"[..]);
            // Dropped here without commit.
        }

        assert_eq!(store.get(b"keep"), Some(b"old".to_vec()));
        assert_eq!(store.get(b"gone"), None);
    }

    #[test]
    fn transaction_reads_its_own_writes() {
        let (_dir, store) = open_temp();
        store.put(b"a", b"committed").unwrap();

        let mut txn = store.begin_transaction();
        assert_eq!(txn.get(b"a"), Some(b"committed".to_vec()));

        txn.put(&b"a"[..], &b"staged"[..]);
        assert_eq!(txn.get(b"a"), Some(b"staged".to_vec()));

        txn.delete(&b"a"[..]);
        assert_eq!(txn.get(b"a"), None);
        assert!(!txn.exists(b"a"));

        txn.rollback();
        assert_eq!(store.get(b"a"), Some(b"committed".to_vec()));
    }

    #[test]
    fn compaction_preserves_content() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = KvStore::open(dir.path()).unwrap();
            for i in 0..100_u32 {
                store.put(format!("k{i:03}").as_bytes(), b"v").unwrap();
            }
            for i in 0..50_u32 {
                store.delete(format!("k{i:03}").as_bytes()).unwrap();
            }
            store.compact().unwrap();
            assert_eq!(store.len(), 50);
        }

        let store = KvStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 50);
        assert_eq!(store.get(b"k099"), Some(b"v".to_vec()));
        assert_eq!(store.get(b"k000"), None);
    }
}
