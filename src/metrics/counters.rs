//! Counter metrics

use super::labels;
use super::Side;

/// Record an established connection
pub fn connect(side: Side, endpoint: &str) {
    ::metrics::counter!(
        labels::CONNECTS_TOTAL,
        labels::SIDE => side.as_str(),
        labels::ENDPOINT => endpoint.to_string()
    )
    .increment(1);
}

/// Record an ended connection
pub fn disconnect(side: Side, endpoint: &str) {
    ::metrics::counter!(
        labels::DISCONNECTS_TOTAL,
        labels::SIDE => side.as_str(),
        labels::ENDPOINT => endpoint.to_string()
    )
    .increment(1);
}
