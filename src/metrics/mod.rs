//! Connection metrics
//!
//! The server and the proxy report connection lifecycle events through a
//! [`MetricsSink`]. [`Recorder`] forwards them to the `metrics` facade, so any
//! installed exporter (the binary installs a Prometheus one) picks them up.

pub mod counters;
pub mod gauges;
pub mod labels;

/// Which side of the proxy a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Client connection accepted by the server
    Frontend,
    /// Connection dialed to the backend
    Backend,
}

impl Side {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Frontend => labels::SIDE_FRONTEND,
            Side::Backend => labels::SIDE_BACKEND,
        }
    }
}

/// Receives connection lifecycle events
pub trait MetricsSink: Send + Sync {
    /// A connection was established
    fn connect(&self, side: Side);

    /// A connection previously reported by [`MetricsSink::connect`] ended
    fn disconnect(&self, side: Side);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn connect(&self, _side: Side) {}

    fn disconnect(&self, _side: Side) {}
}

/// Records events through the `metrics` facade.
///
/// Frontend events are labelled with the listen address, backend events with
/// the backend address.
#[derive(Debug, Clone)]
pub struct Recorder {
    bind: String,
    backend: String,
}

impl Recorder {
    /// Create a recorder for one listener and backend
    pub fn new(bind: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            backend: backend.into(),
        }
    }

    fn endpoint(&self, side: Side) -> &str {
        match side {
            Side::Frontend => &self.bind,
            Side::Backend => &self.backend,
        }
    }
}

impl MetricsSink for Recorder {
    fn connect(&self, side: Side) {
        let endpoint = self.endpoint(side);
        counters::connect(side, endpoint);
        gauges::connection_opened(side, endpoint);
    }

    fn disconnect(&self, side: Side) {
        let endpoint = self.endpoint(side);
        counters::disconnect(side, endpoint);
        gauges::connection_closed(side, endpoint);
    }
}
