//! The S3-compatible wire layer.
//!
//! Everything here is a pure function of engine results — XML renderers,
//! header formatting, error-code mapping — except the axum router, which
//! stays a thin dispatch table. Engine calls are synchronous and run on
//! the blocking pool; this crate is the only async one in the workspace.

mod listing;
mod router;
mod time;
mod xml;

pub use listing::{ListQuery, RolledListing};
pub use router::{router, serve, GatewayState};
pub use time::{http_date, iso8601_millis};
pub use xml::{error_xml, list_buckets_xml, list_objects_xml, xml_escape};
