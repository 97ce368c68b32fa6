//! Network-related constants.

/// Default port for the fleetgate API server.
pub const DEFAULT_API_PORT: u16 = 8080;

/// Connect timeout applied to every downstream cluster transport, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
