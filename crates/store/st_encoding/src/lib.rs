//! Bit-exact wire formats for everything the engine persists.
//!
//! All multi-byte integers are big-endian, both in keys and in record
//! bodies. Keys must sort lexicographically in numeric order for prefix
//! scans to work, which forces big-endian there; record bodies follow the
//! same order so the codebase has exactly one.
//!
//! Every variable-length field is preceded by its `u32` length. Decoders
//! reject buffers shorter than the minimum for their type and never read
//! past a declared inner length.

mod cursor;
pub mod keys;
mod meta;
mod s3;

pub(crate) use cursor::Cursor;

pub use meta::{
    decode_dentry_value, decode_inode_attr, decode_layout, decode_slice_info, encode_dentry_value,
    encode_inode_attr, encode_layout, encode_slice_info,
};
pub use s3::{
    decode_bucket_meta, decode_object_meta, encode_bucket_meta, encode_object_meta, RECORD_VERSION,
};
