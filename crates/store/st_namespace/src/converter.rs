use st_types::{Error, Result};

const S3_SCHEME: &str = "s3://";

/// A path normalized into both of its spellings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedPath {
    /// Whether the input used the `s3://` scheme.
    pub is_s3: bool,
    pub bucket: String,
    /// The object key, empty for the bucket root.
    pub key: String,
    /// The inode-side absolute path (`/` for the bucket root).
    pub posix_path: String,
}

/// Translates between `s3://bucket/key` and `/key`, with a default bucket
/// for bare POSIX paths.
#[derive(Clone, Debug)]
pub struct PathConverter {
    default_bucket: String,
}

impl PathConverter {
    pub fn new(default_bucket: impl Into<String>) -> Self {
        Self {
            default_bucket: default_bucket.into(),
        }
    }

    pub fn default_bucket(&self) -> &str {
        &self.default_bucket
    }

    /// Recognizes the three path shapes:
    ///
    /// | input            | bucket    | key     | posix   |
    /// |------------------|-----------|---------|---------|
    /// | `s3://B/k/k2`    | `B`       | `k/k2`  | `/k/k2` |
    /// | `s3://B`, `s3://B/` | `B`    | `""`    | `/`     |
    /// | `/k/k2`          | default   | `k/k2`  | `/k/k2` |
    pub fn parse(&self, input: &str) -> Result<ParsedPath> {
        if let Some(rest) = input.strip_prefix(S3_SCHEME) {
            let (bucket, key) = match rest.split_once('/') {
                Some((bucket, key)) => (bucket, key.trim_start_matches('/')),
                None => (rest, ""),
            };
            if bucket.is_empty() {
                return Err(Error::invalid_argument(format!(
                    "s3 path {input:?} has no bucket"
                )));
            }
            return Ok(ParsedPath {
                is_s3: true,
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                posix_path: format!("/{key}"),
            });
        }

        if let Some(key) = input.strip_prefix('/') {
            return Ok(ParsedPath {
                is_s3: false,
                bucket: self.default_bucket.clone(),
                key: key.trim_start_matches('/').to_owned(),
                posix_path: input.to_owned(),
            });
        }

        Err(Error::invalid_argument(format!(
            "path {input:?} is neither s3:// nor absolute"
        )))
    }

    /// `s3://bucket/key` → `/key`.
    pub fn s3_to_posix(&self, s3_path: &str) -> Result<String> {
        if !s3_path.starts_with(S3_SCHEME) {
            return Err(Error::invalid_argument(format!(
                "{s3_path:?} is not an s3:// path"
            )));
        }
        Ok(self.parse(s3_path)?.posix_path)
    }

    /// `/key` → `s3://default-bucket/key`.
    pub fn posix_to_s3(&self, posix_path: &str) -> Result<String> {
        let Some(key) = posix_path.strip_prefix('/') else {
            return Err(Error::invalid_argument(format!(
                "{posix_path:?} is not absolute"
            )));
        };
        Ok(format!("{S3_SCHEME}{}/{key}", self.default_bucket))
    }
}
