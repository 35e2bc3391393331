//! Metric names and label keys

/// Gauge of currently open connections
pub const CONNECTIONS: &str = "pgtwixt_connections";

/// Counter of established connections
pub const CONNECTS_TOTAL: &str = "pgtwixt_connects_total";

/// Counter of ended connections
pub const DISCONNECTS_TOTAL: &str = "pgtwixt_disconnects_total";

/// Label key: which side of the proxy
pub const SIDE: &str = "side";

/// Label key: listen address (frontend) or backend address
pub const ENDPOINT: &str = "endpoint";

/// `side` value for client connections
pub const SIDE_FRONTEND: &str = "frontend";

/// `side` value for backend connections
pub const SIDE_BACKEND: &str = "backend";
