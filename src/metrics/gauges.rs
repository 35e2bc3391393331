//! Gauge metrics

use super::labels;
use super::Side;

/// One more open connection
pub fn connection_opened(side: Side, endpoint: &str) {
    ::metrics::gauge!(
        labels::CONNECTIONS,
        labels::SIDE => side.as_str(),
        labels::ENDPOINT => endpoint.to_string()
    )
    .increment(1.0);
}

/// One fewer open connection
pub fn connection_closed(side: Side, endpoint: &str) {
    ::metrics::gauge!(
        labels::CONNECTIONS,
        labels::SIDE => side.as_str(),
        labels::ENDPOINT => endpoint.to_string()
    )
    .decrement(1.0);
}
