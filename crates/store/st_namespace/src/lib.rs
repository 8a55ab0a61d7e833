//! The namespace layer: translates object paths to inode paths and fuses
//! metadata transactions with chunk-store I/O for reads and writes.

mod converter;
mod service;

pub use converter::{ParsedPath, PathConverter};
pub use service::NamespaceService;
