use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;

use st_encoding::keys;
use st_kv::KvStore;
use st_types::{
    unix_now, Dentry, DentryType, Error, FileLayout, FileMode, InodeAttr, InodeId, Result,
};

/// Live-object count above which [`MetaPartition::should_split`] starts
/// advising a split.
pub const SPLIT_THRESHOLD: usize = 1_000_000_000;

type AHashMap<K, V> = HashMap<K, V, ahash::RandomState>;

/// A metadata shard: one inode-id range `[start, end)`, one KV sub-store,
/// and read-through hot indices for inodes and dentries.
///
/// All mutations commit through a KV transaction; a partial write never
/// appears. The caches are populated only after a successful commit and
/// evicted on delete, so they can lag but never lie.
pub struct MetaPartition {
    start: u64,
    end: u64,
    kv: KvStore,
    inode_cache: RwLock<AHashMap<InodeId, InodeAttr>>,
    dentry_cache: RwLock<AHashMap<(InodeId, String), Dentry>>,
}

impl MetaPartition {
    /// Opens the partition owning `[start, end)` with its KV sub-store
    /// under `dir`.
    pub fn open(dir: &Path, start: u64, end: u64) -> Result<Self> {
        if start == 0 || start >= end {
            return Err(Error::invalid_argument(format!(
                "bad inode range [{start}, {end})"
            )));
        }
        let kv = KvStore::open(dir)?;
        st_log::debug!(
            "opened meta partition [{start}, {end}) at {}",
            dir.display()
        );
        Ok(Self {
            start,
            end,
            kv,
            inode_cache: RwLock::new(AHashMap::default()),
            dentry_cache: RwLock::new(AHashMap::default()),
        })
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Whether this partition owns `id`.
    #[inline]
    pub fn contains(&self, id: InodeId) -> bool {
        self.start <= id.as_u64() && id.as_u64() < self.end
    }

    /// The largest inode id ever persisted here, for seeding the
    /// allocation counter after a restart.
    pub fn max_inode_id(&self) -> Option<InodeId> {
        let (key, _) = self.kv.last_in_prefix(&[keys::INODE_PREFIX])?;
        // 'I' || be64(id)
        let raw: [u8; 8] = key.get(1..9)?.try_into().ok()?;
        Some(InodeId(u64::from_be_bytes(raw)))
    }

    // --- lookups ---

    pub fn lookup_inode(&self, id: InodeId) -> Result<InodeAttr> {
        if let Some(attr) = self.inode_cache.read().get(&id) {
            return Ok(attr.clone());
        }

        let raw = self
            .kv
            .get(&keys::inode_key(id))
            .ok_or_else(|| Error::not_found(format!("inode {id}")))?;
        let attr = st_encoding::decode_inode_attr(&raw)?;

        self.inode_cache.write().insert(id, attr.clone());
        Ok(attr)
    }

    pub fn lookup_dentry(&self, parent: InodeId, name: &str) -> Result<Dentry> {
        let cache_key = (parent, name.to_owned());
        if let Some(dentry) = self.dentry_cache.read().get(&cache_key) {
            return Ok(dentry.clone());
        }

        let raw = self
            .kv
            .get(&keys::dentry_key(parent, name))
            .ok_or_else(|| Error::not_found(format!("entry {name:?} under inode {parent}")))?;
        let dentry = st_encoding::decode_dentry_value(name, &raw)?;

        self.dentry_cache.write().insert(cache_key, dentry.clone());
        Ok(dentry)
    }

    /// Every dentry under `parent`, in name order.
    pub fn list_dentries(&self, parent: InodeId) -> Result<Vec<Dentry>> {
        let prefix = keys::dentry_scan_prefix(parent);
        let mut entries = Vec::new();
        for (key, value) in self.kv.scan(&prefix, usize::MAX) {
            let name = keys::dentry_name_from_key(&key)?;
            entries.push(st_encoding::decode_dentry_value(name, &value)?);
        }
        Ok(entries)
    }

    // --- mutations ---

    /// Creates the inode record for `id`. The id must belong to this
    /// partition and must not already exist.
    pub fn create_inode(&self, id: InodeId, mode: FileMode, uid: u32, gid: u32) -> Result<InodeAttr> {
        if !self.contains(id) {
            return Err(Error::invalid_argument(format!(
                "inode {id} outside partition range [{}, {})",
                self.start, self.end
            )));
        }
        let key = keys::inode_key(id);
        if self.kv.exists(&key) {
            return Err(Error::exist(format!("inode {id}")));
        }

        let attr = InodeAttr::new(id, mode, uid, gid, unix_now());

        let mut txn = self.kv.begin_transaction();
        txn.put(key, st_encoding::encode_inode_attr(&attr));
        txn.commit()?;

        self.inode_cache.write().insert(id, attr.clone());
        Ok(attr)
    }

    /// Creates the `(parent, name)` edge. The parent must exist here and
    /// be a directory; the name must be free.
    pub fn create_dentry(
        &self,
        parent: InodeId,
        name: &str,
        inode: InodeId,
        dtype: DentryType,
    ) -> Result<()> {
        self.check_parent_dir(parent)?;

        let key = keys::dentry_key(parent, name);
        if self.kv.exists(&key) {
            return Err(Error::exist(format!("entry {name:?} under inode {parent}")));
        }

        let mut txn = self.kv.begin_transaction();
        txn.put(key, st_encoding::encode_dentry_value(inode, dtype));
        txn.commit()?;

        self.dentry_cache.write().insert(
            (parent, name.to_owned()),
            Dentry {
                name: name.to_owned(),
                inode,
                dtype,
            },
        );
        Ok(())
    }

    /// Creates an inode and its dentry in one transaction: either both
    /// land or neither does. This is the common path; the split
    /// `create_inode` + `create_dentry` pair exists for the cross-partition
    /// case where the service compensates explicitly.
    pub fn create_entry(
        &self,
        parent: InodeId,
        name: &str,
        id: InodeId,
        mode: FileMode,
        uid: u32,
        gid: u32,
    ) -> Result<InodeAttr> {
        if !self.contains(id) {
            return Err(Error::invalid_argument(format!(
                "inode {id} outside partition range [{}, {})",
                self.start, self.end
            )));
        }
        self.check_parent_dir(parent)?;

        let inode_key = keys::inode_key(id);
        let dentry_key = keys::dentry_key(parent, name);
        if self.kv.exists(&inode_key) {
            return Err(Error::exist(format!("inode {id}")));
        }
        if self.kv.exists(&dentry_key) {
            return Err(Error::exist(format!("entry {name:?} under inode {parent}")));
        }

        let attr = InodeAttr::new(id, mode, uid, gid, unix_now());
        let dtype = mode.file_type();

        let mut txn = self.kv.begin_transaction();
        txn.put(inode_key, st_encoding::encode_inode_attr(&attr));
        txn.put(dentry_key, st_encoding::encode_dentry_value(id, dtype));
        txn.commit()?;

        self.inode_cache.write().insert(id, attr.clone());
        self.dentry_cache.write().insert(
            (parent, name.to_owned()),
            Dentry {
                name: name.to_owned(),
                inode: id,
                dtype,
            },
        );
        Ok(attr)
    }

    pub fn delete_inode(&self, id: InodeId) -> Result<()> {
        let mut txn = self.kv.begin_transaction();
        txn.delete(keys::inode_key(id));
        txn.delete(keys::layout_key(id));
        txn.commit()?;

        self.inode_cache.write().remove(&id);
        Ok(())
    }

    pub fn delete_dentry(&self, parent: InodeId, name: &str) -> Result<()> {
        let mut txn = self.kv.begin_transaction();
        txn.delete(keys::dentry_key(parent, name));
        txn.commit()?;

        self.dentry_cache.write().remove(&(parent, name.to_owned()));
        Ok(())
    }

    /// Unlinks `(parent, name)` and settles the child inode in the same
    /// transaction: nlink is decremented, and at zero the inode and its
    /// layout go too. Requires the child to live in this partition.
    ///
    /// Returns the removed dentry and the attr as left on disk (`None`
    /// when the inode was reclaimed).
    pub fn remove_entry(&self, parent: InodeId, name: &str) -> Result<(Dentry, Option<InodeAttr>)> {
        let dentry = self.lookup_dentry(parent, name)?;
        let mut attr = self.lookup_inode(dentry.inode)?;

        let mut txn = self.kv.begin_transaction();
        txn.delete(keys::dentry_key(parent, name));

        attr.nlink = attr.nlink.saturating_sub(1);
        let reclaimed = attr.nlink == 0;
        if reclaimed {
            txn.delete(keys::inode_key(dentry.inode));
            txn.delete(keys::layout_key(dentry.inode));
        } else {
            attr.ctime = unix_now();
            txn.put(
                keys::inode_key(dentry.inode),
                st_encoding::encode_inode_attr(&attr),
            );
        }
        txn.commit()?;

        self.dentry_cache.write().remove(&(parent, name.to_owned()));
        let mut inodes = self.inode_cache.write();
        if reclaimed {
            inodes.remove(&dentry.inode);
        } else {
            inodes.insert(dentry.inode, attr.clone());
        }
        drop(inodes);

        Ok((dentry, (!reclaimed).then_some(attr)))
    }

    /// Moves `(old_parent, old_name)` to `(new_parent, new_name)` in one
    /// transaction. Both parents must live in this partition.
    pub fn rename_entry(
        &self,
        old_parent: InodeId,
        old_name: &str,
        new_parent: InodeId,
        new_name: &str,
    ) -> Result<()> {
        let dentry = self.lookup_dentry(old_parent, old_name)?;
        self.check_parent_dir(new_parent)?;

        let new_key = keys::dentry_key(new_parent, new_name);
        if self.kv.exists(&new_key) {
            return Err(Error::exist(format!(
                "entry {new_name:?} under inode {new_parent}"
            )));
        }

        let mut txn = self.kv.begin_transaction();
        txn.delete(keys::dentry_key(old_parent, old_name));
        txn.put(
            new_key,
            st_encoding::encode_dentry_value(dentry.inode, dentry.dtype),
        );
        txn.commit()?;

        let mut dentries = self.dentry_cache.write();
        dentries.remove(&(old_parent, old_name.to_owned()));
        dentries.insert(
            (new_parent, new_name.to_owned()),
            Dentry {
                name: new_name.to_owned(),
                inode: dentry.inode,
                dtype: dentry.dtype,
            },
        );
        Ok(())
    }

    /// Read-modify-write on an inode attr, committed as one transaction.
    pub fn update_attr(&self, id: InodeId, mutate: impl FnOnce(&mut InodeAttr)) -> Result<InodeAttr> {
        let mut attr = self.lookup_inode(id)?;
        mutate(&mut attr);
        attr.inode = id; // the closure must not retarget the record

        let mut txn = self.kv.begin_transaction();
        txn.put(keys::inode_key(id), st_encoding::encode_inode_attr(&attr));
        txn.commit()?;

        self.inode_cache.write().insert(id, attr.clone());
        Ok(attr)
    }

    // --- layouts ---

    /// The persisted layout for `id`, or `None` if nothing was written yet.
    pub fn get_layout(&self, id: InodeId) -> Result<Option<FileLayout>> {
        match self.kv.get(&keys::layout_key(id)) {
            Some(raw) => Ok(Some(st_encoding::decode_layout(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_layout(&self, layout: &FileLayout) -> Result<()> {
        let mut txn = self.kv.begin_transaction();
        txn.put(
            keys::layout_key(layout.inode),
            st_encoding::encode_layout(layout),
        );
        txn.commit()
    }

    /// Inodes whose nlink dropped to zero but whose records are still on
    /// disk: the debris of an interrupted cross-partition rename or
    /// unlink. The reaper feeds on this.
    pub fn scan_orphans(&self) -> Result<Vec<InodeAttr>> {
        let mut orphans = Vec::new();
        for (_, raw) in self.kv.scan(&[keys::INODE_PREFIX], usize::MAX) {
            let attr = st_encoding::decode_inode_attr(&raw)?;
            if attr.nlink == 0 {
                orphans.push(attr);
            }
        }
        Ok(orphans)
    }

    // --- split policy (advisory) ---

    pub fn live_count(&self) -> usize {
        self.kv.len()
    }

    /// Whether this partition has outgrown its range and should be split.
    /// Advisory: nothing in the current scope acts on it automatically.
    pub fn should_split(&self) -> bool {
        self.live_count() > SPLIT_THRESHOLD
    }

    /// The two half-ranges a split would produce.
    pub fn split_ranges(&self) -> ((u64, u64), (u64, u64)) {
        let mid = self.start + (self.end - self.start) / 2;
        ((self.start, mid), (mid, self.end))
    }

    fn check_parent_dir(&self, parent: InodeId) -> Result<()> {
        // Cross-partition parents are verified by the service before it
        // routes the call here.
        if !self.contains(parent) {
            return Ok(());
        }
        let attr = self.lookup_inode(parent).map_err(|err| {
            if err.is_not_found() {
                Error::not_found(format!("parent inode {parent}"))
            } else {
                err
            }
        })?;
        if !attr.mode.is_dir() {
            return Err(Error::not_directory(format!("inode {parent}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_types::ErrorKind;

    fn open_temp() -> (tempfile::TempDir, MetaPartition) {
        let dir = tempfile::tempdir().unwrap();
        let partition = MetaPartition::open(dir.path(), 1, 1 << 20).unwrap();
        partition
            .create_inode(InodeId::ROOT, FileMode::dir(0o755), 0, 0)
            .unwrap();
        (dir, partition)
    }

    #[test]
    fn create_inode_enforces_range_and_uniqueness() {
        let (_dir, p) = open_temp();

        let attr = p
            .create_inode(InodeId(2), FileMode::regular(0o644), 1000, 1000)
            .unwrap();
        assert_eq!(attr.size, 0);
        assert_eq!(attr.nlink, 1);

        let err = p
            .create_inode(InodeId(2), FileMode::regular(0o644), 0, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exist);

        let err = p
            .create_inode(InodeId(1 << 20), FileMode::regular(0o644), 0, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn dentry_requires_directory_parent() {
        let (_dir, p) = open_temp();
        p.create_inode(InodeId(2), FileMode::regular(0o644), 0, 0)
            .unwrap();

        let err = p
            .create_dentry(InodeId(2), "child", InodeId(3), DentryType::File)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotDirectory);

        let err = p
            .create_dentry(InodeId(9999), "child", InodeId(3), DentryType::File)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn dentry_uniqueness_until_delete() {
        let (_dir, p) = open_temp();
        p.create_entry(InodeId::ROOT, "a", InodeId(2), FileMode::regular(0o644), 0, 0)
            .unwrap();

        let err = p
            .create_dentry(InodeId::ROOT, "a", InodeId(3), DentryType::File)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exist);

        p.delete_dentry(InodeId::ROOT, "a").unwrap();
        p.create_dentry(InodeId::ROOT, "a", InodeId(3), DentryType::File)
            .unwrap();
    }

    #[test]
    fn lookups_are_cache_backed_but_truthful() {
        let (_dir, p) = open_temp();
        p.create_entry(InodeId::ROOT, "f", InodeId(2), FileMode::regular(0o600), 7, 8)
            .unwrap();

        // Twice: once through the KV store, once through the cache.
        for _ in 0..2 {
            let attr = p.lookup_inode(InodeId(2)).unwrap();
            assert_eq!((attr.uid, attr.gid), (7, 8));
            let dentry = p.lookup_dentry(InodeId::ROOT, "f").unwrap();
            assert_eq!(dentry.inode, InodeId(2));
        }

        assert_eq!(
            p.lookup_inode(InodeId(42)).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn list_dentries_is_name_ordered() {
        let (_dir, p) = open_temp();
        for (i, name) in ["zeta", "alpha", "mid"].iter().enumerate() {
            p.create_entry(
                InodeId::ROOT,
                name,
                InodeId(2 + i as u64),
                FileMode::regular(0o644),
                0,
                0,
            )
            .unwrap();
        }

        let names: Vec<_> = p
            .list_dentries(InodeId::ROOT)
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn remove_entry_reclaims_at_nlink_zero() {
        let (_dir, p) = open_temp();
        p.create_entry(InodeId::ROOT, "f", InodeId(2), FileMode::regular(0o644), 0, 0)
            .unwrap();
        p.put_layout(&FileLayout::new(InodeId(2))).unwrap();

        let (dentry, attr) = p.remove_entry(InodeId::ROOT, "f").unwrap();
        assert_eq!(dentry.inode, InodeId(2));
        assert!(attr.is_none());

        assert!(p.lookup_inode(InodeId(2)).is_err());
        assert!(p.get_layout(InodeId(2)).unwrap().is_none());
        assert!(p.lookup_dentry(InodeId::ROOT, "f").is_err());
    }

    #[test]
    fn rename_entry_is_atomic_within_the_partition() {
        let (_dir, p) = open_temp();
        p.create_entry(InodeId::ROOT, "dir", InodeId(2), FileMode::dir(0o755), 0, 0)
            .unwrap();
        p.create_entry(InodeId::ROOT, "old", InodeId(3), FileMode::regular(0o644), 0, 0)
            .unwrap();

        p.rename_entry(InodeId::ROOT, "old", InodeId(2), "new")
            .unwrap();

        assert!(p.lookup_dentry(InodeId::ROOT, "old").is_err());
        assert_eq!(p.lookup_dentry(InodeId(2), "new").unwrap().inode, InodeId(3));

        // Renaming onto an existing name refuses.
        p.create_entry(InodeId::ROOT, "other", InodeId(4), FileMode::regular(0o644), 0, 0)
            .unwrap();
        let err = p
            .rename_entry(InodeId(2), "new", InodeId::ROOT, "other")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exist);
    }

    #[test]
    fn update_attr_round_trips_through_kv() {
        let dir = tempfile::tempdir().unwrap();
        {
            let p = MetaPartition::open(dir.path(), 1, 1 << 20).unwrap();
            p.create_inode(InodeId(2), FileMode::regular(0o644), 0, 0)
                .unwrap();
            p.update_attr(InodeId(2), |attr| attr.size = 4096).unwrap();
        }

        // Fresh open: no caches, straight off the WAL.
        let p = MetaPartition::open(dir.path(), 1, 1 << 20).unwrap();
        assert_eq!(p.lookup_inode(InodeId(2)).unwrap().size, 4096);
        assert_eq!(p.max_inode_id(), Some(InodeId(2)));
    }

    #[test]
    fn orphan_scan_sees_zero_nlink_inodes() {
        let (_dir, p) = open_temp();
        p.create_inode(InodeId(5), FileMode::regular(0o644), 0, 0)
            .unwrap();
        p.update_attr(InodeId(5), |attr| attr.nlink = 0).unwrap();

        let orphans = p.scan_orphans().unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].inode, InodeId(5));
    }

    #[test]
    fn split_is_advisory() {
        let (_dir, p) = open_temp();
        assert!(!p.should_split());
        let ((lo_start, lo_end), (hi_start, hi_end)) = p.split_ranges();
        assert_eq!(lo_start, 1);
        assert_eq!(lo_end, hi_start);
        assert_eq!(hi_end, 1 << 20);
    }
}
