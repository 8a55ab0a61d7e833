use crate::InodeId;

/// Read-time hint for how much data to pull per chunk-store request.
/// It does not bound the size of an individual slice.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// A contiguous byte range of one chunk-store object, mapped into a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceInfo {
    pub slice_id: u64,
    /// Offset within the file.
    pub offset: u64,
    pub size: u64,
    /// Offset of this slice's first byte within the storage object.
    /// Zero for a freshly written slice; advances when a later overwrite
    /// clips the slice from the left.
    pub storage_offset: u64,
    /// Opaque to the engine; by convention `chunks/{inode}/{slice_id}`.
    pub storage_key: String,
}

impl SliceInfo {
    /// One past the last file offset this slice covers.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// The ordered, non-overlapping slice list defining a file's content.
///
/// Slices are sorted by `offset` and may be sparse; holes read as zeros.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLayout {
    pub inode: InodeId,
    pub chunk_size: u64,
    pub slices: Vec<SliceInfo>,
}

impl FileLayout {
    pub fn new(inode: InodeId) -> Self {
        Self {
            inode,
            chunk_size: DEFAULT_CHUNK_SIZE,
            slices: Vec::new(),
        }
    }

    /// One past the last byte any slice covers (0 for an empty layout).
    pub fn end_offset(&self) -> u64 {
        self.slices.iter().map(SliceInfo::end).max().unwrap_or(0)
    }

    /// Whether the slice list is sorted by offset with no overlap.
    pub fn is_canonical(&self) -> bool {
        self.slices
            .windows(2)
            .all(|w| w[0].end() <= w[1].offset)
    }
}
