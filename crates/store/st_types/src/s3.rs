use std::collections::BTreeMap;

/// Per-bucket record in the S3 metadata sub-store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketMeta {
    pub name: String,
    pub owner: String,
    /// Unix seconds.
    pub creation_time: i64,
    pub object_count: u64,
    pub total_size: u64,
    pub region: String,
    pub storage_class: String,
}

impl BucketMeta {
    pub fn new(name: impl Into<String>, owner: impl Into<String>, creation_time: i64) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            creation_time,
            object_count: 0,
            total_size: 0,
            region: "us-east-1".to_owned(),
            storage_class: "STANDARD".to_owned(),
        }
    }
}

/// Per-object record in the S3 metadata sub-store.
///
/// `user_metadata` keeps the `x-amz-meta-*` headers; a `BTreeMap` so encoded
/// records are deterministic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    /// Hex MD5 of the object body, unquoted.
    pub etag: String,
    pub content_type: String,
    /// Unix seconds.
    pub last_modified: i64,
    pub storage_class: String,
    /// Where the body lives in the chunk store.
    pub data_path: String,
    pub user_metadata: BTreeMap<String, String>,
}
