//! The axum router: S3 path-based dispatch over the engine.
//!
//! S3 routing is path-shaped, not resource-shaped, so a catch-all route
//! takes every request and splits `bucket/key` by hand. Handlers stay
//! thin — decode the request, hop to the blocking pool for the engine
//! call, render XML. Request signing is not checked here; put the gateway
//! behind something that does if you need it.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;

use st_chunk::ChunkStore;
use st_object_store::ObjectStore;
use st_types::{unix_now, BucketMeta, Error, ErrorKind, ObjectMeta};

use crate::listing::{roll_up, ListQuery};
use crate::time::http_date;
use crate::xml::{error_xml, list_buckets_xml, list_objects_xml};

const MAX_OBJECT_BYTES: usize = 512 * 1024 * 1024;
const USER_META_HEADER_PREFIX: &str = "x-amz-meta-";

/// What a handler needs: the S3 record store, the byte store, and the
/// identity reported as bucket owner.
#[derive(Clone)]
pub struct GatewayState {
    pub objects: Arc<ObjectStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub owner: String,
    pub region: String,
}

impl GatewayState {
    pub fn new(objects: Arc<ObjectStore>, chunks: Arc<dyn ChunkStore>) -> Self {
        Self {
            objects,
            chunks,
            owner: "strata".to_owned(),
            region: "us-east-1".to_owned(),
        }
    }
}

/// Builds the S3 route table.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", any(handle_service))
        .route("/{*path}", any(handle_path))
        .with_state(state)
}

/// Binds `addr` and serves until the process dies.
pub async fn serve(state: GatewayState, addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    st_log::info!("s3 gateway listening on {addr}");
    axum::serve(listener, router(state)).await
}

// --- dispatch ---

async fn handle_service(State(state): State<GatewayState>, req: Request) -> Response {
    if req.method() != Method::GET {
        return not_implemented();
    }
    let owner = state.owner.clone();
    match blocking(move || state.objects.list_buckets()).await {
        Ok(buckets) => xml_response(StatusCode::OK, list_buckets_xml(&owner, &buckets)),
        Err(err) => error_response(ErrScope::Bucket, &err),
    }
}

async fn handle_path(
    State(state): State<GatewayState>,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    req: Request,
) -> Response {
    // `bucket`, `bucket/`, and `bucket/key…` shapes.
    let (bucket, key) = match path.split_once('/') {
        None => (path.as_str(), None),
        Some((bucket, "")) => (bucket, None),
        Some((bucket, key)) => (bucket, Some(key)),
    };
    let bucket = bucket.to_owned();

    match key {
        None => handle_bucket(state, bucket, &params, req).await,
        Some(key) => {
            let key = key.to_owned();
            match req.method() {
                &Method::PUT => put_object(state, bucket, key, req).await,
                &Method::GET => get_object(state, bucket, key, true).await,
                &Method::HEAD => get_object(state, bucket, key, false).await,
                &Method::DELETE => delete_object(state, bucket, key).await,
                _ => not_implemented(),
            }
        }
    }
}

// --- bucket level ---

async fn handle_bucket(
    state: GatewayState,
    bucket: String,
    params: &HashMap<String, String>,
    req: Request,
) -> Response {
    match req.method() {
        &Method::GET => list_bucket(state, bucket, params).await,
        &Method::HEAD => {
            let exists = blocking(move || Ok(state.objects.bucket_exists(&bucket))).await;
            match exists {
                Ok(true) => empty_response(StatusCode::OK),
                // HEAD carries no body, error or not.
                _ => empty_response(StatusCode::NOT_FOUND),
            }
        }
        &Method::PUT => {
            let meta = BucketMeta {
                region: state.region.clone(),
                ..BucketMeta::new(bucket, state.owner.clone(), unix_now())
            };
            match blocking(move || state.objects.put_bucket(&meta)).await {
                Ok(()) => empty_response(StatusCode::OK),
                Err(err) => error_response(ErrScope::Bucket, &err),
            }
        }
        &Method::DELETE => match blocking(move || state.objects.delete_bucket(&bucket)).await {
            Ok(()) => empty_response(StatusCode::NO_CONTENT),
            Err(err) => error_response(ErrScope::Bucket, &err),
        },
        _ => not_implemented(),
    }
}

async fn list_bucket(
    state: GatewayState,
    bucket: String,
    params: &HashMap<String, String>,
) -> Response {
    let query = ListQuery::from_params(params);
    let v2 = query.v2;
    let name = bucket.clone();
    match blocking(move || roll_up(&state.objects, &name, &query)).await {
        Ok(listing) => xml_response(StatusCode::OK, list_objects_xml(&bucket, &listing, v2)),
        Err(err) => error_response(ErrScope::Bucket, &err),
    }
}

// --- object level ---

async fn put_object(state: GatewayState, bucket: String, key: String, req: Request) -> Response {
    let headers = req.headers().clone();
    let body = match axum::body::to_bytes(req.into_body(), MAX_OBJECT_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return error_response(
                ErrScope::Object,
                &Error::invalid_argument(format!("unreadable body: {err}")),
            );
        }
    };

    let etag = format!("{:x}", md5::compute(&body));
    let object = ObjectMeta {
        data_path: format!("objects/{bucket}/{key}"),
        bucket,
        key,
        size: body.len() as u64,
        etag: etag.clone(),
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_owned(),
        last_modified: unix_now(),
        storage_class: "STANDARD".to_owned(),
        user_metadata: user_metadata_from_headers(&headers),
    };

    let stored = blocking(move || {
        // Bytes first: a failed chunk write must not leave a record
        // pointing at nothing.
        state.chunks.put(&object.data_path, &body)?;
        if let Err(err) = state.objects.put_object(&object) {
            st_log::warn!("orphaned object data {:?}: {err}", object.data_path);
            return Err(err);
        }
        Ok(())
    })
    .await;

    match stored {
        Ok(()) => Response::builder()
            .status(StatusCode::OK)
            .header(header::ETAG, format!("\"{etag}\""))
            .body(Body::empty())
            .expect("static response parts"),
        Err(err) => error_response(ErrScope::Bucket, &err),
    }
}

async fn get_object(state: GatewayState, bucket: String, key: String, with_body: bool) -> Response {
    let fetched = blocking(move || {
        let object = state.objects.get_object(&bucket, &key)?;
        let data = if with_body {
            state.chunks.get(&object.data_path)?
        } else {
            Vec::new()
        };
        Ok((object, data))
    })
    .await;

    let (object, data) = match fetched {
        Ok(pair) => pair,
        Err(err) if !with_body => {
            // HEAD responses carry status only.
            return empty_response(match err.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            });
        }
        Err(err) => return error_response(ErrScope::Object, &err),
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, object.content_type.as_str())
        .header(header::CONTENT_LENGTH, object.size)
        .header(header::ETAG, format!("\"{}\"", object.etag))
        .header(header::LAST_MODIFIED, http_date(object.last_modified));
    for (meta_key, value) in &object.user_metadata {
        builder = builder.header(
            format!("{USER_META_HEADER_PREFIX}{meta_key}"),
            value.as_str(),
        );
    }

    let body = if with_body {
        Body::from(data)
    } else {
        Body::empty()
    };
    builder.body(body).unwrap_or_else(|err| {
        error_response(
            ErrScope::Object,
            &Error::io(format!("malformed response headers: {err}")),
        )
    })
}

async fn delete_object(state: GatewayState, bucket: String, key: String) -> Response {
    let deleted = blocking(move || {
        let object = state.objects.delete_object(&bucket, &key)?;
        if let Err(err) = state.chunks.delete(&object.data_path) {
            st_log::warn!("leaving object data {:?} for gc: {err}", object.data_path);
        }
        Ok(())
    })
    .await;

    match deleted {
        Ok(()) => empty_response(StatusCode::NO_CONTENT),
        Err(err) => error_response(ErrScope::Object, &err),
    }
}

// --- plumbing ---

#[derive(Clone, Copy)]
enum ErrScope {
    Bucket,
    Object,
}

fn error_response(scope: ErrScope, err: &Error) -> Response {
    let (status, code) = match err.kind() {
        ErrorKind::NotFound => match scope {
            ErrScope::Bucket => (StatusCode::NOT_FOUND, "NoSuchBucket"),
            ErrScope::Object => (StatusCode::NOT_FOUND, "NoSuchKey"),
        },
        ErrorKind::Exist => (StatusCode::CONFLICT, "BucketAlreadyExists"),
        ErrorKind::NotEmpty => (StatusCode::CONFLICT, "BucketNotEmpty"),
        ErrorKind::InvalidArgument => (StatusCode::BAD_REQUEST, "InvalidArgument"),
        ErrorKind::PermissionDenied => (StatusCode::FORBIDDEN, "AccessDenied"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        st_log::error!("request failed: {err}");
    }
    xml_response(status, error_xml(code, err.message()))
}

fn xml_response(status: StatusCode, xml: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(xml))
        .expect("static response parts")
}

fn empty_response(status: StatusCode) -> Response {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .expect("static response parts")
}

fn not_implemented() -> Response {
    xml_response(
        StatusCode::NOT_IMPLEMENTED,
        error_xml("NotImplemented", "operation not implemented"),
    )
}

/// Runs an engine call on the blocking pool.
async fn blocking<T, F>(f: F) -> st_types::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> st_types::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|join| Error::io(format!("engine task failed: {join}")))?
}

fn user_metadata_from_headers(headers: &HeaderMap) -> std::collections::BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let suffix = name.as_str().strip_prefix(USER_META_HEADER_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((suffix.to_owned(), value.to_owned()))
        })
        .collect()
}
