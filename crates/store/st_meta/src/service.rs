use std::path::Path;

use parking_lot::Mutex;

use st_slice_tree::{Slice, SliceTree};
use st_types::{
    unix_now, AttrMask, CancelToken, Dentry, Error, FileLayout, FileMode, InodeAttr, InodeId,
    Result, SliceInfo,
};

use crate::MetaPartition;

/// Default id range for a freshly bootstrapped single-partition store.
const DEFAULT_RANGE_END: u64 = 1 << 40;

/// Splits an absolute path into its segments.
///
/// Empty segments collapse (`"//a///b"` walks like `"/a/b"`); a path that
/// does not begin with `/` is refused.
pub fn parse_path(path: &str) -> Result<Vec<&str>> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(Error::invalid_argument(format!(
            "path {path:?} is not absolute"
        )));
    };
    Ok(rest.split('/').filter(|s| !s.is_empty()).collect())
}

/// The stateless front-end over a set of [`MetaPartition`]s.
///
/// Routes every inode id to the partition owning its range, walks paths
/// from the root, and owns the monotonic "next inode" counter. All public
/// operations take a [`CancelToken`], honored at each KV boundary.
pub struct MetadataService {
    partitions: Vec<MetaPartition>,
    next_inode: Mutex<u64>,
}

impl MetadataService {
    /// Bootstraps a single-partition service under `dir`, creating the
    /// root directory inode on first open.
    pub fn open(dir: &Path) -> Result<Self> {
        let partition = MetaPartition::open(dir, 1, DEFAULT_RANGE_END)?;
        Self::with_partitions(vec![partition])
    }

    /// Builds the service over pre-opened partitions. Ranges must be
    /// disjoint and the first must own the root inode.
    pub fn with_partitions(partitions: Vec<MetaPartition>) -> Result<Self> {
        if partitions.is_empty() {
            return Err(Error::invalid_argument("no partitions"));
        }

        let next = partitions
            .iter()
            .filter_map(MetaPartition::max_inode_id)
            .map(|id| id.as_u64() + 1)
            .max()
            .unwrap_or(2)
            .max(2);

        let service = Self {
            partitions,
            next_inode: Mutex::new(next),
        };

        let root_partition = service.partition_for(InodeId::ROOT)?;
        if root_partition.lookup_inode(InodeId::ROOT).is_err() {
            root_partition.create_inode(InodeId::ROOT, FileMode::dir(0o755), 0, 0)?;
            st_log::info!("created root inode");
        }

        Ok(service)
    }

    /// Allocates the next inode id. Root is reserved, so a fresh store
    /// hands out 2, 3, 4, …
    pub fn generate_inode_id(&self) -> InodeId {
        let mut next = self.next_inode.lock();
        let id = *next;
        *next += 1;
        InodeId(id)
    }

    fn partition_for(&self, id: InodeId) -> Result<&MetaPartition> {
        self.partitions
            .iter()
            .find(|p| p.contains(id))
            .ok_or_else(|| Error::invalid_argument(format!("no partition owns inode {id}")))
    }

    /// Direct attr lookup by id, for callers that already resolved a path.
    pub fn lookup_inode(&self, id: InodeId) -> Result<InodeAttr> {
        self.partition_for(id)?.lookup_inode(id)
    }

    // --- path operations ---

    /// Walks `path` from the root, returning the inode it names.
    pub fn lookup_path(&self, path: &str, cancel: &CancelToken) -> Result<InodeId> {
        let segments = parse_path(path)?;

        let mut current = InodeId::ROOT;
        for segment in segments {
            cancel.check()?;
            let dentry = self
                .partition_for(current)?
                .lookup_dentry(current, segment)
                .map_err(|err| {
                    if err.is_not_found() {
                        Error::not_found(format!("path {path:?}: no entry {segment:?}"))
                    } else {
                        err
                    }
                })?;
            current = dentry.inode;
        }
        Ok(current)
    }

    /// Creates a file (or directory, if `mode` says so) at `path`.
    pub fn create(
        &self,
        path: &str,
        mode: FileMode,
        uid: u32,
        gid: u32,
        cancel: &CancelToken,
    ) -> Result<InodeAttr> {
        let (parent, name) = self.resolve_parent(path, cancel)?;
        cancel.check()?;

        let id = self.generate_inode_id();
        let id_partition = self.partition_for(id)?;
        let parent_partition = self.partition_for(parent)?;

        if std::ptr::eq(id_partition, parent_partition) {
            return id_partition.create_entry(parent, &name, id, mode, uid, gid);
        }

        // The inode and its dentry live in different partitions: create
        // the inode first, compensate with a delete if the dentry side
        // refuses. A crash between the two leaves an orphan for the
        // reaper (`scan_orphans`).
        self.verify_directory(parent)?;
        let attr = id_partition.create_inode(id, mode, uid, gid)?;
        if let Err(err) = parent_partition.create_dentry(parent, &name, id, mode.file_type()) {
            if let Err(cleanup) = id_partition.delete_inode(id) {
                st_log::warn!("failed to compensate inode {id} after dentry failure: {cleanup}");
            }
            return Err(err);
        }
        Ok(attr)
    }

    /// `create` with the directory type forced into `mode`.
    pub fn mkdir(
        &self,
        path: &str,
        mode: FileMode,
        uid: u32,
        gid: u32,
        cancel: &CancelToken,
    ) -> Result<InodeAttr> {
        self.create(path, FileMode::dir(mode.perm()), uid, gid, cancel)
    }

    pub fn get_attr(&self, path: &str, cancel: &CancelToken) -> Result<InodeAttr> {
        let inode = self.lookup_path(path, cancel)?;
        self.lookup_inode(inode)
    }

    /// Merges the fields of `attr` selected by `mask` into the inode at
    /// `path`. Bits outside [`AttrMask::ALL`] are ignored.
    pub fn set_attr(
        &self,
        path: &str,
        attr: &InodeAttr,
        mask: u32,
        cancel: &CancelToken,
    ) -> Result<InodeAttr> {
        let inode = self.lookup_path(path, cancel)?;
        let partition = self.partition_for(inode)?;

        // Shrinking a file clips its layout first, so the layout-size
        // invariant never observes size < slice end.
        if mask & AttrMask::SET_SIZE != 0 {
            cancel.check()?;
            if let Some(layout) = partition.get_layout(inode)? {
                if layout.end_offset() > attr.size {
                    let clipped = truncate_layout(layout, attr.size);
                    partition.put_layout(&clipped)?;
                }
            }
        }

        cancel.check()?;
        partition.update_attr(inode, |current| {
            if mask & AttrMask::SET_MODE != 0 {
                current.mode = attr.mode;
            }
            if mask & AttrMask::SET_UID != 0 {
                current.uid = attr.uid;
            }
            if mask & AttrMask::SET_GID != 0 {
                current.gid = attr.gid;
            }
            if mask & AttrMask::SET_SIZE != 0 {
                current.size = attr.size;
            }
            if mask & AttrMask::SET_MTIME != 0 {
                current.mtime = attr.mtime;
            }
            current.ctime = unix_now();
        })
    }

    /// Removes the file at `path`. Directories are refused; use
    /// [`Self::rmdir`]. Returns the layout of the reclaimed inode (if the
    /// last link went away) so the caller can release chunk data.
    pub fn unlink(&self, path: &str, cancel: &CancelToken) -> Result<Option<FileLayout>> {
        let (parent, name) = self.resolve_parent(path, cancel)?;
        let parent_partition = self.partition_for(parent)?;

        let dentry = parent_partition.lookup_dentry(parent, &name)?;
        let child_partition = self.partition_for(dentry.inode)?;
        let attr = child_partition.lookup_inode(dentry.inode)?;
        if attr.mode.is_dir() {
            return Err(Error::is_directory(format!("{path:?}")));
        }

        let layout = child_partition.get_layout(dentry.inode)?;
        cancel.check()?;

        if std::ptr::eq(parent_partition, child_partition) {
            let (_, remaining) = parent_partition.remove_entry(parent, &name)?;
            return Ok(if remaining.is_none() { layout } else { None });
        }

        // Cross-partition: drop the edge, then settle the inode. A crash
        // in between leaves a zero-nlink inode for the reaper.
        parent_partition.delete_dentry(parent, &name)?;
        let remaining = child_partition.update_attr(dentry.inode, |a| {
            a.nlink = a.nlink.saturating_sub(1);
        })?;
        if remaining.nlink == 0 {
            child_partition.delete_inode(dentry.inode)?;
            return Ok(layout);
        }
        Ok(None)
    }

    /// Removes the directory at `path`, which must be empty.
    pub fn rmdir(&self, path: &str, cancel: &CancelToken) -> Result<()> {
        let (parent, name) = self.resolve_parent(path, cancel)?;
        let parent_partition = self.partition_for(parent)?;

        let dentry = parent_partition.lookup_dentry(parent, &name)?;
        let child_partition = self.partition_for(dentry.inode)?;
        let attr = child_partition.lookup_inode(dentry.inode)?;
        if !attr.mode.is_dir() {
            return Err(Error::not_directory(format!("{path:?}")));
        }

        cancel.check()?;
        if !child_partition.list_dentries(dentry.inode)?.is_empty() {
            return Err(Error::not_empty(format!("directory {path:?}")));
        }

        if std::ptr::eq(parent_partition, child_partition) {
            parent_partition.remove_entry(parent, &name)?;
            return Ok(());
        }

        parent_partition.delete_dentry(parent, &name)?;
        child_partition.delete_inode(dentry.inode)?;
        Ok(())
    }

    /// Moves `old_path` to `new_path`.
    ///
    /// Within one partition this is a single transaction. Across
    /// partitions it is two: create the new edge, drop the old one. If
    /// the second transaction fails the first is compensated; if even the
    /// compensation fails, the caller gets an error it may retry, and the
    /// duplicate edge is visible to orphan-scanning recovery.
    pub fn rename(&self, old_path: &str, new_path: &str, cancel: &CancelToken) -> Result<()> {
        let (old_parent, old_name) = self.resolve_parent(old_path, cancel)?;
        let (new_parent, new_name) = self.resolve_parent(new_path, cancel)?;

        let old_partition = self.partition_for(old_parent)?;
        let new_partition = self.partition_for(new_parent)?;
        cancel.check()?;

        if std::ptr::eq(old_partition, new_partition) {
            return old_partition.rename_entry(old_parent, &old_name, new_parent, &new_name);
        }

        let dentry = old_partition.lookup_dentry(old_parent, &old_name)?;
        self.verify_directory(new_parent)?;
        new_partition.create_dentry(new_parent, &new_name, dentry.inode, dentry.dtype)?;

        if let Err(err) = old_partition.delete_dentry(old_parent, &old_name) {
            if let Err(cleanup) = new_partition.delete_dentry(new_parent, &new_name) {
                st_log::warn!(
                    "rename {old_path:?} -> {new_path:?} stalled between partitions: {cleanup}"
                );
                return Err(Error::io(format!(
                    "rename interrupted after linking {new_path:?}; retry to finish: {err}"
                )));
            }
            return Err(err);
        }
        Ok(())
    }

    /// Lists the directory at `path`, in name order.
    pub fn readdir(&self, path: &str, cancel: &CancelToken) -> Result<Vec<Dentry>> {
        let inode = self.lookup_path(path, cancel)?;
        let partition = self.partition_for(inode)?;

        let attr = partition.lookup_inode(inode)?;
        if !attr.mode.is_dir() {
            return Err(Error::not_directory(format!("{path:?}")));
        }
        cancel.check()?;
        partition.list_dentries(inode)
    }

    // --- data-plane hooks ---

    /// The file layout for `inode`; an empty layout if none was persisted.
    pub fn get_layout(&self, inode: InodeId, cancel: &CancelToken) -> Result<FileLayout> {
        cancel.check()?;
        Ok(self
            .partition_for(inode)?
            .get_layout(inode)?
            .unwrap_or_else(|| FileLayout::new(inode)))
    }

    /// Merges one written slice into the layout of `inode`, cutting any
    /// overlap with older slices.
    pub fn add_slice(&self, inode: InodeId, slice: SliceInfo, cancel: &CancelToken) -> Result<()> {
        let partition = self.partition_for(inode)?;
        let mut layout = partition
            .get_layout(inode)?
            .unwrap_or_else(|| FileLayout::new(inode));

        // The tree tracks ids; storage keys are carried around it so
        // callers may use any uniqueness scheme they like.
        let mut keys_by_id: std::collections::HashMap<u64, String> = layout
            .slices
            .iter()
            .map(|s| (s.slice_id, s.storage_key.clone()))
            .collect();
        keys_by_id.insert(slice.slice_id, slice.storage_key.clone());

        let mut tree = SliceTree::from_slices(layout.slices.iter().map(|s| Slice {
            pos: s.offset,
            id: s.slice_id,
            storage_size: s.storage_offset + s.size,
            off_in_storage: s.storage_offset,
            len: s.size,
        }));
        tree.insert(
            slice.offset,
            slice.slice_id,
            slice.storage_offset + slice.size,
            slice.storage_offset,
            slice.size,
        );

        layout.slices = tree
            .iter()
            .map(|s| SliceInfo {
                slice_id: s.id,
                offset: s.pos,
                size: s.len,
                storage_offset: s.off_in_storage,
                storage_key: keys_by_id
                    .get(&s.id)
                    .cloned()
                    .unwrap_or_else(|| format!("chunks/{inode}/{}", s.id)),
            })
            .collect();

        cancel.check()?;
        partition.put_layout(&layout)
    }

    /// Grows the recorded size of `inode` to at least `new_size`. Sizes
    /// never shrink here; truncation goes through `set_attr`.
    pub fn update_size(
        &self,
        inode: InodeId,
        new_size: u64,
        cancel: &CancelToken,
    ) -> Result<InodeAttr> {
        cancel.check()?;
        self.partition_for(inode)?.update_attr(inode, |attr| {
            if new_size > attr.size {
                attr.size = new_size;
            }
            attr.mtime = unix_now();
        })
    }

    /// Zero-nlink inodes across all partitions: what a crashed
    /// cross-partition rename or unlink leaves behind.
    pub fn scan_orphans(&self, cancel: &CancelToken) -> Result<Vec<InodeAttr>> {
        let mut orphans = Vec::new();
        for partition in &self.partitions {
            cancel.check()?;
            orphans.extend(partition.scan_orphans()?);
        }
        Ok(orphans)
    }

    // --- helpers ---

    /// Resolves `path` to its parent inode and final segment.
    fn resolve_parent(&self, path: &str, cancel: &CancelToken) -> Result<(InodeId, String)> {
        let mut segments = parse_path(path)?;
        let Some(name) = segments.pop() else {
            return Err(Error::invalid_argument("the root has no parent"));
        };

        let mut current = InodeId::ROOT;
        for segment in segments {
            cancel.check()?;
            let dentry = self.partition_for(current)?.lookup_dentry(current, segment)?;
            current = dentry.inode;
        }
        Ok((current, name.to_owned()))
    }

    fn verify_directory(&self, id: InodeId) -> Result<()> {
        let attr = self.partition_for(id)?.lookup_inode(id)?;
        if !attr.mode.is_dir() {
            return Err(Error::not_directory(format!("inode {id}")));
        }
        Ok(())
    }
}

/// Clips a layout to `new_size`: slices fully past the cut disappear,
/// a straddling slice keeps its head.
fn truncate_layout(mut layout: FileLayout, new_size: u64) -> FileLayout {
    layout.slices.retain(|s| s.offset < new_size);
    for slice in &mut layout.slices {
        if slice.end() > new_size {
            slice.size = new_size - slice.offset;
        }
    }
    layout
}
