//! The S3 metadata sub-store: bucket and object records in their own
//! prefix subspaces of the ordered KV store.
//!
//! Each record lives twice: under a point-lookup key (`"B:"`, `"O:"`) and
//! as a marker in a listing subspace (`"BL:"`, `"OL:"`) that scans walk in
//! ascending key order. Both sides of a record always move in the same
//! write batch.

use std::path::Path;

use st_encoding::keys;
use st_kv::{KvStore, WriteBatch};
use st_types::{BucketMeta, Error, ObjectMeta, Result};

/// A batch of object keys plus the flag saying more remain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectListing {
    pub objects: Vec<ObjectMeta>,
    pub truncated: bool,
}

/// Bucket/object metadata operations. See the crate docs for the schema.
pub struct ObjectStore {
    kv: KvStore,
}

impl ObjectStore {
    /// Opens the sub-store with its KV under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            kv: KvStore::open(dir)?,
        })
    }

    // --- buckets ---

    /// Registers a bucket. Fails with `Exist` on a duplicate name.
    pub fn put_bucket(&self, bucket: &BucketMeta) -> Result<()> {
        let point_key = keys::bucket_key(&bucket.name);
        if self.kv.exists(&point_key) {
            return Err(Error::exist(format!("bucket {:?}", bucket.name)));
        }

        let mut batch = WriteBatch::new();
        batch.put(point_key, st_encoding::encode_bucket_meta(bucket));
        batch.put(keys::bucket_list_key(&bucket.name), Vec::new());
        self.kv.write_batch(batch)?;

        st_log::debug!("created bucket {:?}", bucket.name);
        Ok(())
    }

    pub fn get_bucket(&self, name: &str) -> Result<BucketMeta> {
        let raw = self
            .kv
            .get(&keys::bucket_key(name))
            .ok_or_else(|| Error::not_found(format!("bucket {name:?}")))?;
        st_encoding::decode_bucket_meta(&raw)
    }

    pub fn bucket_exists(&self, name: &str) -> bool {
        self.kv.exists(&keys::bucket_key(name))
    }

    /// Removes a bucket, which must be empty.
    pub fn delete_bucket(&self, name: &str) -> Result<()> {
        if !self.bucket_exists(name) {
            return Err(Error::not_found(format!("bucket {name:?}")));
        }
        let has_objects = !self
            .kv
            .scan(&keys::object_list_scan_prefix(name), 1)
            .is_empty();
        if has_objects {
            return Err(Error::not_empty(format!("bucket {name:?}")));
        }

        let mut batch = WriteBatch::new();
        batch.delete(keys::bucket_key(name));
        batch.delete(keys::bucket_list_key(name));
        self.kv.write_batch(batch)
    }

    /// Every bucket, in ascending name order.
    pub fn list_buckets(&self) -> Result<Vec<BucketMeta>> {
        let mut buckets = Vec::new();
        for (key, _) in self.kv.scan(keys::BUCKET_LIST_PREFIX.as_bytes(), usize::MAX) {
            let name = std::str::from_utf8(&key[keys::BUCKET_LIST_PREFIX.len()..])
                .map_err(|_| Error::corrupt("bucket name is not valid utf-8"))?;
            buckets.push(self.get_bucket(name)?);
        }
        Ok(buckets)
    }

    // --- objects ---

    /// Inserts or replaces an object record, keeping the owning bucket's
    /// object count and total size in step, all in one batch.
    pub fn put_object(&self, object: &ObjectMeta) -> Result<()> {
        let mut bucket = self.get_bucket(&object.bucket)?;

        let previous = self.lookup_object(&object.bucket, &object.key)?;
        match &previous {
            Some(old) => {
                bucket.total_size = bucket.total_size.saturating_sub(old.size) + object.size;
            }
            None => {
                bucket.object_count += 1;
                bucket.total_size += object.size;
            }
        }

        let mut batch = WriteBatch::new();
        batch.put(
            keys::object_key(&object.bucket, &object.key),
            st_encoding::encode_object_meta(object),
        );
        batch.put(keys::object_list_key(&object.bucket, &object.key), Vec::new());
        batch.put(
            keys::bucket_key(&object.bucket),
            st_encoding::encode_bucket_meta(&bucket),
        );
        self.kv.write_batch(batch)
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        self.lookup_object(bucket, key)?
            .ok_or_else(|| Error::not_found(format!("object {bucket:?}/{key:?}")))
    }

    pub fn object_exists(&self, bucket: &str, key: &str) -> bool {
        self.kv.exists(&keys::object_key(bucket, key))
    }

    /// Removes an object and debits the bucket stats in the same batch.
    pub fn delete_object(&self, bucket_name: &str, key: &str) -> Result<ObjectMeta> {
        let object = self.get_object(bucket_name, key)?;
        let mut bucket = self.get_bucket(bucket_name)?;
        bucket.object_count = bucket.object_count.saturating_sub(1);
        bucket.total_size = bucket.total_size.saturating_sub(object.size);

        let mut batch = WriteBatch::new();
        batch.delete(keys::object_key(bucket_name, key));
        batch.delete(keys::object_list_key(bucket_name, key));
        batch.put(
            keys::bucket_key(bucket_name),
            st_encoding::encode_bucket_meta(&bucket),
        );
        self.kv.write_batch(batch)?;
        Ok(object)
    }

    /// Lists objects in ascending key order.
    ///
    /// Only keys beginning with `prefix` and strictly greater than
    /// `marker` qualify; at most `max_keys` are returned, and `truncated`
    /// says whether more qualify beyond the batch.
    pub fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        max_keys: usize,
    ) -> Result<ObjectListing> {
        if !self.bucket_exists(bucket) {
            return Err(Error::not_found(format!("bucket {bucket:?}")));
        }

        let mut scan_prefix = keys::object_list_scan_prefix(bucket);
        scan_prefix.extend_from_slice(prefix.as_bytes());

        let mut listing = ObjectListing::default();
        for (kv_key, _) in self.kv.scan(&scan_prefix, usize::MAX) {
            let object_key = keys::object_key_from_list_key(bucket, &kv_key)?;
            if object_key <= marker {
                continue;
            }
            if listing.objects.len() == max_keys {
                listing.truncated = true;
                break;
            }
            listing.objects.push(self.get_object(bucket, object_key)?);
        }
        Ok(listing)
    }

    /// Adjusts a bucket's aggregate stats by signed deltas, saturating at
    /// zero. The regular object paths maintain stats themselves; this is
    /// the hook for external reconciliation.
    pub fn update_bucket_stats(
        &self,
        name: &str,
        size_delta: i64,
        count_delta: i64,
    ) -> Result<BucketMeta> {
        let mut bucket = self.get_bucket(name)?;
        bucket.total_size = apply_delta(bucket.total_size, size_delta);
        bucket.object_count = apply_delta(bucket.object_count, count_delta);

        self.kv
            .put(&keys::bucket_key(name), &st_encoding::encode_bucket_meta(&bucket))?;
        Ok(bucket)
    }

    fn lookup_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>> {
        match self.kv.get(&keys::object_key(bucket, key)) {
            Some(raw) => Ok(Some(st_encoding::decode_object_meta(&raw)?)),
            None => Ok(None),
        }
    }
}

fn apply_delta(current: u64, delta: i64) -> u64 {
    if delta >= 0 {
        current.saturating_add(delta as u64)
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}
