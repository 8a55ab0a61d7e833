//! The KV key schema.
//!
//! Metadata keys use single-byte prefixes with fixed 8-byte big-endian
//! inode ids, so a prefix scan over one parent walks its dentries in name
//! order. S3 keys use short string prefixes. The two families, and each
//! record type within them, occupy disjoint subspaces of the key space.

use byteorder::{BigEndian, ByteOrder as _};

use st_types::{Error, InodeId, Result};

pub const DENTRY_PREFIX: u8 = b'D';
pub const INODE_PREFIX: u8 = b'I';
pub const LAYOUT_PREFIX: u8 = b'L';
pub const SLICE_PREFIX: u8 = b'S';

pub const BUCKET_PREFIX: &str = "B:";
pub const BUCKET_LIST_PREFIX: &str = "BL:";
pub const OBJECT_PREFIX: &str = "O:";
pub const OBJECT_LIST_PREFIX: &str = "OL:";

const DENTRY_SEPARATOR: u8 = b'/';

fn be64(id: InodeId) -> [u8; 8] {
    let mut buf = [0_u8; 8];
    BigEndian::write_u64(&mut buf, id.as_u64());
    buf
}

/// `'I' || be64(inode)`
pub fn inode_key(id: InodeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(INODE_PREFIX);
    key.extend_from_slice(&be64(id));
    key
}

/// `'L' || be64(inode)`
pub fn layout_key(id: InodeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(LAYOUT_PREFIX);
    key.extend_from_slice(&be64(id));
    key
}

/// `'S' || be64(inode) || be64(slice_id)` — the optional per-slice key.
pub fn slice_key(inode: InodeId, slice_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(SLICE_PREFIX);
    key.extend_from_slice(&be64(inode));
    let mut sid = [0_u8; 8];
    BigEndian::write_u64(&mut sid, slice_id);
    key.extend_from_slice(&sid);
    key
}

/// `'D' || be64(parent) || '/' || name`
pub fn dentry_key(parent: InodeId, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(10 + name.len());
    key.push(DENTRY_PREFIX);
    key.extend_from_slice(&be64(parent));
    key.push(DENTRY_SEPARATOR);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Everything under one parent: `'D' || be64(parent) || '/'`.
pub fn dentry_scan_prefix(parent: InodeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    key.push(DENTRY_PREFIX);
    key.extend_from_slice(&be64(parent));
    key.push(DENTRY_SEPARATOR);
    key
}

/// Recovers the entry name from a full dentry key; the name is everything
/// past the fixed 10-byte prefix.
pub fn dentry_name_from_key(key: &[u8]) -> Result<&str> {
    if key.len() < 10 || key[0] != DENTRY_PREFIX || key[9] != DENTRY_SEPARATOR {
        return Err(Error::corrupt("malformed dentry key"));
    }
    std::str::from_utf8(&key[10..]).map_err(|_| Error::corrupt("dentry name is not valid utf-8"))
}

// --- S3 side ---

/// `"B:" || name`
pub fn bucket_key(name: &str) -> Vec<u8> {
    [BUCKET_PREFIX.as_bytes(), name.as_bytes()].concat()
}

/// `"BL:" || name` — the listing subspace, scanned by `list_buckets`.
pub fn bucket_list_key(name: &str) -> Vec<u8> {
    [BUCKET_LIST_PREFIX.as_bytes(), name.as_bytes()].concat()
}

/// `"O:" || bucket || '/' || key`
pub fn object_key(bucket: &str, key: &str) -> Vec<u8> {
    [
        OBJECT_PREFIX.as_bytes(),
        bucket.as_bytes(),
        b"/",
        key.as_bytes(),
    ]
    .concat()
}

/// `"OL:" || bucket || '/' || key` — the listing subspace.
pub fn object_list_key(bucket: &str, key: &str) -> Vec<u8> {
    [
        OBJECT_LIST_PREFIX.as_bytes(),
        bucket.as_bytes(),
        b"/",
        key.as_bytes(),
    ]
    .concat()
}

/// Scan prefix for every object-list entry of one bucket.
pub fn object_list_scan_prefix(bucket: &str) -> Vec<u8> {
    [OBJECT_LIST_PREFIX.as_bytes(), bucket.as_bytes(), b"/"].concat()
}

/// Recovers the object key from an object-list KV key.
pub fn object_key_from_list_key<'a>(bucket: &str, kv_key: &'a [u8]) -> Result<&'a str> {
    let prefix_len = OBJECT_LIST_PREFIX.len() + bucket.len() + 1;
    if kv_key.len() < prefix_len {
        return Err(Error::corrupt("malformed object-list key"));
    }
    std::str::from_utf8(&kv_key[prefix_len..])
        .map_err(|_| Error::corrupt("object key is not valid utf-8"))
}
