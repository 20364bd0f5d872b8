//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ratox_messages_total` (counter): messages by direction (in, out)
//! - `ratox_input_rejected_total` (counter): discarded input lines by reason
//! - `ratox_fifo_write_failures_total` (counter): failed output writes by reason
//! - `ratox_file_transfers_total` (counter): transfers by event
//! - `ratox_friends` (gauge): known friends
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - The Prometheus exporter is optional and off by default

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_message(direction: &'static str) {
    ::metrics::counter!("ratox_messages_total", "direction" => direction).increment(1);
}

pub fn record_input_rejected(reason: &'static str) {
    ::metrics::counter!("ratox_input_rejected_total", "reason" => reason).increment(1);
}

pub fn record_fifo_write_failure(reason: &'static str) {
    ::metrics::counter!("ratox_fifo_write_failures_total", "reason" => reason).increment(1);
}

pub fn record_file_transfer(event: &'static str) {
    ::metrics::counter!("ratox_file_transfers_total", "event" => event).increment(1);
}

pub fn record_friend_count(count: usize) {
    ::metrics::gauge!("ratox_friends").set(count as f64);
}
