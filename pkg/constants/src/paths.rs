//! Filesystem path constants.

// ─── Server ────────────────────────────────────────────────────────────────

/// Default config file path for the server.
pub const DEFAULT_SERVER_CONFIG: &str = "/etc/fleetgate/config.yaml";

/// Default data directory for the server state store.
pub const DEFAULT_SERVER_DATA_DIR: &str = "/tmp/fleetgate-data";
