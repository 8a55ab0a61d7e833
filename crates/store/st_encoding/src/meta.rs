//! Codecs for the metadata-side records: inode attributes, dentry values,
//! slices, and file layouts.

use st_types::{Dentry, DentryType, Error, FileLayout, FileMode, InodeAttr, InodeId, SliceInfo};

use crate::cursor::{put_bytes, put_i64, put_u32, put_u64};
use crate::Cursor;

// --- InodeAttr ---

pub fn encode_inode_attr(attr: &InodeAttr) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 4 + 4 + 4 + 8 + 8 + 8 + 4);
    put_u64(&mut out, attr.inode.as_u64());
    put_u32(&mut out, attr.mode.bits());
    put_u32(&mut out, attr.uid);
    put_u32(&mut out, attr.gid);
    put_u64(&mut out, attr.size);
    put_i64(&mut out, attr.mtime);
    put_i64(&mut out, attr.ctime);
    put_u32(&mut out, attr.nlink);
    out
}

pub fn decode_inode_attr(buf: &[u8]) -> st_types::Result<InodeAttr> {
    let mut c = Cursor::new(buf);
    let attr = InodeAttr {
        inode: InodeId(c.u64("inode")?),
        mode: FileMode(c.u32("mode")?),
        uid: c.u32("uid")?,
        gid: c.u32("gid")?,
        size: c.u64("size")?,
        mtime: c.i64("mtime")?,
        ctime: c.i64("ctime")?,
        nlink: c.u32("nlink")?,
    };
    c.finish("inode attr")?;
    Ok(attr)
}

// --- Dentry value (the name lives in the key) ---

pub fn encode_dentry_value(inode: InodeId, dtype: DentryType) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    put_u64(&mut out, inode.as_u64());
    out.push(dtype as u8);
    out
}

pub fn decode_dentry_value(name: &str, buf: &[u8]) -> st_types::Result<Dentry> {
    let mut c = Cursor::new(buf);
    let inode = InodeId(c.u64("dentry inode")?);
    let raw_type = c.u8("dentry type")?;
    c.finish("dentry value")?;
    let dtype = DentryType::from_u8(raw_type)
        .ok_or_else(|| Error::corrupt(format!("unknown dentry type {raw_type}")))?;
    Ok(Dentry {
        name: name.to_owned(),
        inode,
        dtype,
    })
}

// --- SliceInfo ---

pub fn encode_slice_info(slice: &SliceInfo) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 8 + 8 + 8 + 4 + slice.storage_key.len());
    encode_slice_info_into(slice, &mut out);
    out
}

fn encode_slice_info_into(slice: &SliceInfo, out: &mut Vec<u8>) {
    put_u64(out, slice.slice_id);
    put_u64(out, slice.offset);
    put_u64(out, slice.size);
    put_u64(out, slice.storage_offset);
    put_bytes(out, slice.storage_key.as_bytes());
}

pub fn decode_slice_info(buf: &[u8]) -> st_types::Result<SliceInfo> {
    let mut c = Cursor::new(buf);
    let slice = decode_slice_info_from(&mut c)?;
    c.finish("slice info")?;
    Ok(slice)
}

fn decode_slice_info_from(c: &mut Cursor<'_>) -> st_types::Result<SliceInfo> {
    Ok(SliceInfo {
        slice_id: c.u64("slice id")?,
        offset: c.u64("slice offset")?,
        size: c.u64("slice size")?,
        storage_offset: c.u64("slice storage offset")?,
        storage_key: c.string("slice storage key")?,
    })
}

// --- FileLayout ---

pub fn encode_layout(layout: &FileLayout) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 8 + 4 + layout.slices.len() * 48);
    put_u64(&mut out, layout.inode.as_u64());
    put_u64(&mut out, layout.chunk_size);
    put_u32(&mut out, layout.slices.len() as u32);
    for slice in &layout.slices {
        encode_slice_info_into(slice, &mut out);
    }
    out
}

pub fn decode_layout(buf: &[u8]) -> st_types::Result<FileLayout> {
    let mut c = Cursor::new(buf);
    let inode = InodeId(c.u64("layout inode")?);
    let chunk_size = c.u64("layout chunk size")?;
    let count = c.u32("layout slice count")? as usize;

    // Each slice is at least 36 bytes; a count that cannot fit in the rest
    // of the buffer is rejected before allocating.
    if count > c.remaining() / 36 {
        return Err(Error::corrupt(format!(
            "layout slice count {count} exceeds record size"
        )));
    }

    let mut slices = Vec::with_capacity(count);
    for _ in 0..count {
        slices.push(decode_slice_info_from(&mut c)?);
    }
    c.finish("file layout")?;

    Ok(FileLayout {
        inode,
        chunk_size,
        slices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_attr() -> InodeAttr {
        InodeAttr {
            inode: InodeId(42),
            mode: FileMode::regular(0o644),
            uid: 1000,
            gid: 1000,
            size: 4096,
            mtime: 1_700_000_000,
            ctime: 1_700_000_001,
            nlink: 2,
        }
    }

    #[test]
    fn inode_attr_round_trip() {
        let attr = sample_attr();
        assert_eq!(decode_inode_attr(&encode_inode_attr(&attr)).unwrap(), attr);
    }

    #[test]
    fn inode_attr_rejects_truncation() {
        let encoded = encode_inode_attr(&sample_attr());
        for cut in [0, 1, 7, encoded.len() - 1] {
            let err = decode_inode_attr(&encoded[..cut]).unwrap_err();
            assert_eq!(err.kind(), st_types::ErrorKind::Corrupt, "cut at {cut}");
        }
    }

    #[test]
    fn inode_attr_rejects_trailing_garbage() {
        let mut encoded = encode_inode_attr(&sample_attr());
        encoded.push(0);
        assert!(decode_inode_attr(&encoded).is_err());
    }

    #[test]
    fn dentry_value_round_trip() {
        let encoded = encode_dentry_value(InodeId(9), DentryType::Directory);
        let dentry = decode_dentry_value("docs", &encoded).unwrap();
        assert_eq!(
            dentry,
            Dentry {
                name: "docs".to_owned(),
                inode: InodeId(9),
                dtype: DentryType::Directory,
            }
        );
    }

    #[test]
    fn dentry_value_rejects_unknown_type() {
        let mut encoded = encode_dentry_value(InodeId(9), DentryType::File);
        *encoded.last_mut().unwrap() = 77;
        assert!(decode_dentry_value("x", &encoded).is_err());
    }

    #[test]
    fn layout_round_trip() {
        let layout = FileLayout {
            inode: InodeId(7),
            chunk_size: 4 * 1024 * 1024,
            slices: vec![
                SliceInfo {
                    slice_id: 1,
                    offset: 0,
                    size: 50,
                    storage_offset: 0,
                    storage_key: "chunks/7/1".to_owned(),
                },
                SliceInfo {
                    slice_id: 2,
                    offset: 50,
                    size: 100,
                    storage_offset: 25,
                    storage_key: "chunks/7/2".to_owned(),
                },
            ],
        };
        assert_eq!(decode_layout(&encode_layout(&layout)).unwrap(), layout);
    }

    #[test]
    fn layout_rejects_overdeclared_slice_count() {
        let layout = FileLayout::new(InodeId(7));
        let mut encoded = encode_layout(&layout);
        // Claim 2^31 slices in a 20-byte record.
        let n = encoded.len();
        encoded[n - 4..].copy_from_slice(&0x8000_0000_u32.to_be_bytes());
        let err = decode_layout(&encoded).unwrap_err();
        assert_eq!(err.kind(), st_types::ErrorKind::Corrupt);
    }

    #[test]
    fn slice_storage_key_length_is_bounded() {
        // A declared key length larger than the remaining buffer must fail
        // rather than read past the end.
        let slice = SliceInfo {
            slice_id: 1,
            offset: 0,
            size: 10,
            storage_offset: 0,
            storage_key: "chunks/7/1".to_owned(),
        };
        let mut encoded = encode_slice_info(&slice);
        encoded[32..36].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(decode_slice_info(&encoded).is_err());
    }
}
