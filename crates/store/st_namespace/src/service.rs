use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use st_chunk::ChunkStore;
use st_meta::MetadataService;
use st_singleflight::SingleFlight;
use st_types::{
    CancelToken, Error, FileLayout, FileMode, InodeId, Result, SliceInfo,
};

use crate::PathConverter;

/// The read/write pipeline over metadata and chunks.
///
/// Writes go chunk-store first: only after the payload is durable does the
/// layout learn about the new slice, so a failed chunk write never
/// corrupts metadata. A failed metadata step after a successful chunk
/// write leaves an unreachable chunk behind — logged, and left for the
/// chunk store to reclaim.
pub struct NamespaceService {
    meta: Arc<MetadataService>,
    chunks: Arc<dyn ChunkStore>,
    converter: PathConverter,
    next_slice_id: AtomicU64,
    layout_flights: SingleFlight<u64, Result<FileLayout>>,
}

impl NamespaceService {
    pub fn new(
        meta: Arc<MetadataService>,
        chunks: Arc<dyn ChunkStore>,
        converter: PathConverter,
    ) -> Self {
        Self {
            meta,
            chunks,
            converter,
            next_slice_id: AtomicU64::new(1),
            layout_flights: SingleFlight::new(),
        }
    }

    pub fn converter(&self) -> &PathConverter {
        &self.converter
    }

    pub fn metadata(&self) -> &Arc<MetadataService> {
        &self.meta
    }

    /// Writes `data` at `offset` into the object at `path` (either path
    /// shape), creating the file and its parent directories on first
    /// touch. Returns the file size after the write.
    pub fn write(
        &self,
        path: &str,
        data: &[u8],
        offset: u64,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let parsed = self.converter.parse(path)?;
        let inode = self.resolve_or_create(&parsed.posix_path, cancel)?;

        if data.is_empty() {
            return Ok(self.meta.lookup_inode(inode)?.size);
        }

        // Slice ids must never repeat within an inode across restarts, or
        // a fresh chunk would overwrite one an old layout still maps.
        let layout = self.load_layout(inode, cancel)?;
        let floor = layout.slices.iter().map(|s| s.slice_id + 1).max().unwrap_or(1);
        self.next_slice_id.fetch_max(floor, Ordering::Relaxed);
        let slice_id = self.next_slice_id.fetch_add(1, Ordering::Relaxed);

        let storage_key = format!("chunks/{inode}/{slice_id}");

        cancel.check()?;
        self.chunks.put(&storage_key, data)?;

        let slice = SliceInfo {
            slice_id,
            offset,
            size: data.len() as u64,
            storage_offset: 0,
            storage_key: storage_key.clone(),
        };
        if let Err(err) = self.meta.add_slice(inode, slice, cancel) {
            st_log::warn!(
                "orphaned chunk {storage_key:?}: layout update failed: {err}"
            );
            return Err(err);
        }

        let end = offset + data.len() as u64;
        let attr = self.meta.update_size(inode, end, cancel)?;
        Ok(attr.size)
    }

    /// Reads up to `size` bytes at `offset` from the object at `path`.
    ///
    /// Holes read as zeros; a range past end-of-file returns the available
    /// bytes (possibly none) and reports success.
    pub fn read(
        &self,
        path: &str,
        offset: u64,
        size: u64,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        let parsed = self.converter.parse(path)?;
        let inode = self.meta.lookup_path(&parsed.posix_path, cancel)?;
        let attr = self.meta.lookup_inode(inode)?;
        if attr.mode.is_dir() {
            return Err(Error::is_directory(format!("{path:?}")));
        }

        let end = offset.saturating_add(size).min(attr.size);
        if offset >= end {
            return Ok(Vec::new());
        }
        let mut buf = vec![0_u8; (end - offset) as usize];

        let layout = self.load_layout(inode, cancel)?;
        for slice in &layout.slices {
            if slice.end() <= offset || slice.offset >= end {
                continue;
            }
            let overlap_start = slice.offset.max(offset);
            let overlap_end = slice.end().min(end);

            cancel.check()?;
            let chunk_offset = slice.storage_offset + (overlap_start - slice.offset);
            let bytes = self.chunks.get_range(
                &slice.storage_key,
                chunk_offset,
                overlap_end - overlap_start,
            )?;

            let at = (overlap_start - offset) as usize;
            buf[at..at + bytes.len()].copy_from_slice(&bytes);
        }
        Ok(buf)
    }

    /// Unlinks the object at `path` and releases its chunks best-effort.
    pub fn remove(&self, path: &str, cancel: &CancelToken) -> Result<()> {
        let parsed = self.converter.parse(path)?;
        let reclaimed = self.meta.unlink(&parsed.posix_path, cancel)?;

        if let Some(layout) = reclaimed {
            let mut keys: Vec<&str> = layout
                .slices
                .iter()
                .map(|s| s.storage_key.as_str())
                .collect();
            keys.sort_unstable();
            keys.dedup();
            for key in keys {
                if let Err(err) = self.chunks.delete(key) {
                    st_log::warn!("leaving chunk {key:?} for gc: {err}");
                }
            }
        }
        Ok(())
    }

    /// The object's size in bytes.
    pub fn size_of(&self, path: &str, cancel: &CancelToken) -> Result<u64> {
        let parsed = self.converter.parse(path)?;
        let inode = self.meta.lookup_path(&parsed.posix_path, cancel)?;
        Ok(self.meta.lookup_inode(inode)?.size)
    }

    /// Coalesces concurrent layout loads for the same inode: one KV read
    /// feeds every waiter, and the entry is gone once the flight lands.
    fn load_layout(&self, inode: InodeId, cancel: &CancelToken) -> Result<FileLayout> {
        self.layout_flights
            .run(inode.as_u64(), || self.meta.get_layout(inode, cancel))
    }

    /// Resolves `posix_path`, creating the file and any missing parent
    /// directories on the way.
    fn resolve_or_create(&self, posix_path: &str, cancel: &CancelToken) -> Result<InodeId> {
        match self.meta.lookup_path(posix_path, cancel) {
            Ok(inode) => {
                let attr = self.meta.lookup_inode(inode)?;
                if attr.mode.is_dir() {
                    return Err(Error::is_directory(format!("{posix_path:?}")));
                }
                Ok(inode)
            }
            Err(err) if err.is_not_found() => {
                let segments = st_meta::parse_path(posix_path)?;
                let mut walked = String::new();
                for dir in &segments[..segments.len().saturating_sub(1)] {
                    walked.push('/');
                    walked.push_str(dir);
                    if self.meta.lookup_path(&walked, cancel).is_err() {
                        self.meta
                            .mkdir(&walked, FileMode::dir(0o755), 0, 0, cancel)?;
                    }
                }
                let attr = self
                    .meta
                    .create(posix_path, FileMode::regular(0o644), 0, 0, cancel)?;
                Ok(attr.inode)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use st_chunk::MemoryChunkStore;

    use super::*;

    fn open_temp() -> (tempfile::TempDir, NamespaceService) {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetadataService::open(dir.path()).unwrap());
        let service = NamespaceService::new(
            meta,
            Arc::new(MemoryChunkStore::default()),
            PathConverter::new("mybucket"),
        );
        (dir, service)
    }

    fn never() -> CancelToken {
        CancelToken::never()
    }

    #[test]
    fn write_then_read_both_path_shapes() {
        let (_dir, ns) = open_temp();

        let size = ns
            .write("s3://mybucket/data/f.txt", b"hello world", 0, &never())
            .unwrap();
        assert_eq!(size, 11);

        // The same object through its POSIX spelling.
        assert_eq!(
            ns.read("/data/f.txt", 0, 64, &never()).unwrap(),
            b"hello world"
        );
        assert_eq!(ns.read("/data/f.txt", 6, 5, &never()).unwrap(), b"world");
    }

    #[test]
    fn overwrite_wins_in_the_overlap() {
        let (_dir, ns) = open_temp();

        ns.write("/f", b"aaaaaaaaaa", 0, &never()).unwrap();
        ns.write("/f", b"BBBB", 3, &never()).unwrap();

        assert_eq!(ns.read("/f", 0, 10, &never()).unwrap(), b"aaaBBBBaaa");
    }

    #[test]
    fn holes_read_as_zeros() {
        let (_dir, ns) = open_temp();

        ns.write("/f", b"xx", 0, &never()).unwrap();
        ns.write("/f", b"yy", 6, &never()).unwrap();

        let got = ns.read("/f", 0, 8, &never()).unwrap();
        assert_eq!(got, b"xx\0\0\0\0yy");
    }

    #[test]
    fn reads_clamp_at_eof() {
        let (_dir, ns) = open_temp();
        ns.write("/f", b"abc", 0, &never()).unwrap();

        assert_eq!(ns.read("/f", 1, 100, &never()).unwrap(), b"bc");
        assert_eq!(ns.read("/f", 3, 10, &never()).unwrap(), b"");
        assert_eq!(ns.read("/f", 99, 10, &never()).unwrap(), b"");
    }

    #[test]
    fn appending_grows_size_monotonically() {
        let (_dir, ns) = open_temp();

        assert_eq!(ns.write("/f", b"12345", 0, &never()).unwrap(), 5);
        assert_eq!(ns.write("/f", b"67", 5, &never()).unwrap(), 7);
        // An interior overwrite does not shrink the file.
        assert_eq!(ns.write("/f", b"x", 1, &never()).unwrap(), 7);
        assert_eq!(ns.size_of("/f", &never()).unwrap(), 7);
    }

    #[test]
    fn failed_chunk_write_leaves_no_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetadataService::open(dir.path()).unwrap());
        let ns = NamespaceService::new(
            Arc::clone(&meta),
            Arc::new(MemoryChunkStore::new(4)), // room for almost nothing
            PathConverter::new("b"),
        );

        let err = ns.write("/f", b"way too large", 0, &never()).unwrap_err();
        assert_eq!(err.kind(), st_types::ErrorKind::NoSpace);

        // The file exists (created on first touch) but saw no slice.
        let inode = meta.lookup_path("/f", &never()).unwrap();
        assert_eq!(meta.lookup_inode(inode).unwrap().size, 0);
        assert!(meta.get_layout(inode, &never()).unwrap().slices.is_empty());
    }

    #[test]
    fn remove_releases_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetadataService::open(dir.path()).unwrap());
        let chunks = Arc::new(MemoryChunkStore::default());
        let ns = NamespaceService::new(
            meta,
            Arc::clone(&chunks) as Arc<dyn ChunkStore>,
            PathConverter::new("b"),
        );

        ns.write("/f", b"payload", 0, &never()).unwrap();
        assert!(chunks.capacity().unwrap().used > 0);

        ns.remove("/f", &never()).unwrap();
        assert!(ns.read("/f", 0, 1, &never()).is_err());
        assert_eq!(chunks.capacity().unwrap().used, 0);
    }

    #[test]
    fn slice_ids_resume_past_persisted_layouts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let meta = Arc::new(MetadataService::open(dir.path()).unwrap());
            let ns = NamespaceService::new(
                meta,
                Arc::new(MemoryChunkStore::default()),
                PathConverter::new("b"),
            );
            ns.write("/f", b"one", 0, &never()).unwrap();
            ns.write("/f", b"two", 10, &never()).unwrap();
        }

        // A fresh service (fresh slice-id counter) must not reuse a chunk
        // key the surviving layout still references.
        let meta = Arc::new(MetadataService::open(dir.path()).unwrap());
        let ns = NamespaceService::new(
            Arc::clone(&meta),
            Arc::new(MemoryChunkStore::default()),
            PathConverter::new("b"),
        );
        ns.write("/f", b"three", 20, &never()).unwrap();

        let inode = meta.lookup_path("/f", &never()).unwrap();
        let layout = meta.get_layout(inode, &never()).unwrap();
        let mut ids: Vec<u64> = layout.slices.iter().map(|s| s.slice_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), layout.slices.len(), "slice ids must be unique");
    }

    #[test]
    fn directories_refuse_data_io() {
        let (_dir, ns) = open_temp();
        ns.write("/d/f", b"x", 0, &never()).unwrap(); // creates /d

        assert_eq!(
            ns.write("/d", b"x", 0, &never()).unwrap_err().kind(),
            st_types::ErrorKind::IsDirectory
        );
        assert_eq!(
            ns.read("/d", 0, 1, &never()).unwrap_err().kind(),
            st_types::ErrorKind::IsDirectory
        );
    }

    #[test]
    fn cancellation_short_circuits_the_pipeline() {
        let (_dir, ns) = open_temp();
        let cancel = CancelToken::new();
        cancel.cancel();

        assert_eq!(
            ns.write("/f", b"x", 0, &cancel).unwrap_err().kind(),
            st_types::ErrorKind::Cancelled
        );
    }
}
