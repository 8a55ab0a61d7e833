//! Listing-query parsing and the delimiter roll-up shared by the v1 and
//! v2 dialects.

use std::collections::HashMap;

use st_object_store::ObjectStore;
use st_types::{ObjectMeta, Result};

pub const DEFAULT_MAX_KEYS: usize = 1000;

/// The listing parameters of `GET /{bucket}`, normalized across dialects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListQuery {
    pub prefix: String,
    /// Exclusive start key; the v2 continuation token lands here too.
    pub marker: String,
    pub max_keys: usize,
    pub delimiter: String,
    pub v2: bool,
}

impl ListQuery {
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let v2 = params.get("list-type").is_some_and(|v| v == "2");
        let marker = if v2 {
            params.get("continuation-token")
        } else {
            params.get("marker")
        };
        Self {
            prefix: params.get("prefix").cloned().unwrap_or_default(),
            marker: marker.cloned().unwrap_or_default(),
            max_keys: params
                .get("max-keys")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_KEYS),
            delimiter: params.get("delimiter").cloned().unwrap_or_default(),
            v2,
        }
    }
}

/// A listing after delimiter roll-up, ready to render.
#[derive(Clone, Debug, Default)]
pub struct RolledListing {
    pub prefix: String,
    pub marker: String,
    pub delimiter: String,
    pub max_keys: usize,
    pub contents: Vec<ObjectMeta>,
    pub common_prefixes: Vec<String>,
    pub truncated: bool,
    /// The resume point when truncated: `NextMarker` in v1,
    /// `NextContinuationToken` in v2.
    pub next_marker: Option<String>,
}

/// Runs the store listing and folds keys sharing a delimiter-bounded
/// prefix into `CommonPrefixes`, counting both kinds of entry against
/// `max_keys`.
pub fn roll_up(store: &ObjectStore, bucket: &str, query: &ListQuery) -> Result<RolledListing> {
    let raw = store.list_objects(bucket, &query.prefix, &query.marker, usize::MAX)?;

    let mut listing = RolledListing {
        prefix: query.prefix.clone(),
        marker: query.marker.clone(),
        delimiter: query.delimiter.clone(),
        max_keys: query.max_keys,
        ..Default::default()
    };

    let mut emitted = 0_usize;
    for object in raw.objects {
        let group = if query.delimiter.is_empty() {
            None
        } else {
            object.key[query.prefix.len()..]
                .find(&query.delimiter)
                .map(|at| {
                    let end = query.prefix.len() + at + query.delimiter.len();
                    object.key[..end].to_owned()
                })
        };

        if let Some(group) = group {
            // Keys are ordered, so members of one group are adjacent.
            if listing.common_prefixes.last() == Some(&group) {
                continue;
            }
            if emitted == query.max_keys {
                listing.truncated = true;
                break;
            }
            listing.next_marker = Some(group.clone());
            listing.common_prefixes.push(group);
            emitted += 1;
        } else {
            if emitted == query.max_keys {
                listing.truncated = true;
                break;
            }
            listing.next_marker = Some(object.key.clone());
            listing.contents.push(object);
            emitted += 1;
        }
    }

    if !listing.truncated {
        listing.next_marker = None;
    }
    Ok(listing)
}
