//! The core data model of the strata metadata engine.
//!
//! Everything in here is plain data: ids, attribute records, file layouts,
//! and the S3-side bucket/object records. The only behavior is small
//! invariant helpers. Persistence lives in `st_encoding`, mutation in
//! `st_meta` and `st_object_store`.

mod cancel;
mod clock;
mod error;
mod inode;
mod layout;
mod s3;

pub use cancel::CancelToken;
pub use clock::unix_now;
pub use error::{Error, ErrorKind, Result};
pub use inode::{AttrMask, Dentry, DentryType, FileMode, InodeAttr, InodeId};
pub use layout::{FileLayout, SliceInfo, DEFAULT_CHUNK_SIZE};
pub use s3::{BucketMeta, ObjectMeta};
