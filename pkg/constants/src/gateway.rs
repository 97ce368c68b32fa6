//! Gateway constants.

/// Query parameter selecting a single namespace.
pub const NAMESPACE_PARAM: &str = "namespace";

/// Query parameter selecting the 1-based page number.
pub const PAGE_NUM_PARAM: &str = "pageNum";

/// Query parameter selecting the page size.
pub const PAGE_SIZE_PARAM: &str = "pageSize";

/// Query keys consumed by the gateway and never forwarded downstream.
pub const GATEWAY_QUERY_KEYS: &[&str] = &[NAMESPACE_PARAM, PAGE_NUM_PARAM, PAGE_SIZE_PARAM];

/// Content type forced on PATCH requests.
pub const MERGE_PATCH_CONTENT_TYPE: &str = "application/merge-patch+json";

/// Default ceiling on concurrent per-namespace fan-out requests.
pub const DEFAULT_FANOUT_LIMIT: usize = 16;

/// Maximum inbound body accepted by the proxy (10 MiB).
pub const MAX_PROXY_BODY_BYTES: usize = 10 * 1024 * 1024;
