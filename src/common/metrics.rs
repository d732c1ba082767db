//! Prometheus instruments for one process.
//!
//! Each [`Metrics`] owns its own registry so several processes can live in
//! one test binary. Nothing here gates control flow.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub const ERROR_BIND: &str = "bind";
pub const ERROR_READ: &str = "read";
pub const ERROR_OVERSIZE: &str = "oversize";
pub const ERROR_UNPACK: &str = "unpack";
pub const ERROR_DISPATCH: &str = "dispatch";
pub const ERROR_SEND: &str = "send";
pub const ERROR_EXHAUSTED: &str = "exhausted";

pub struct Metrics {
    registry: Registry,

    pub broadcasts: IntCounter,
    pub deliveries: IntCounter,
    pub delivery_latency: Histogram,
    pub buffer_size: IntGauge,
    pub trusted_peers: IntGauge,
    pub buffer_flushes: IntCounter,
    pub window_resets: IntCounter,

    pub messages_sent: IntCounterVec,
    pub messages_received: IntCounterVec,
    pub bytes_sent: IntCounter,
    pub bytes_received: IntCounter,
    pub errors: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let broadcasts = IntCounter::new("urb_broadcasts_total", "Broadcasts admitted by flow control")?;
        let deliveries = IntCounter::new("urb_deliveries_total", "Messages delivered to the application")?;
        let delivery_latency = Histogram::with_opts(
            HistogramOpts::new(
                "urb_delivery_latency_seconds",
                "Time from broadcast to local delivery of own messages",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        let buffer_size = IntGauge::new("urb_buffer_size", "Records held in the buffer after a round")?;
        let trusted_peers = IntGauge::new("urb_trusted_peers", "Peers trusted by the theta detector")?;
        let buffer_flushes = IntCounter::new("urb_buffer_flushes_total", "Buffers discarded as corrupted")?;
        let window_resets = IntCounter::new("urb_window_resets_total", "Transmit-window resets")?;

        let messages_sent = IntCounterVec::new(
            Opts::new("udp_client_msg_count", "Envelopes handed to the network"),
            &["tag"],
        )?;
        let messages_received = IntCounterVec::new(
            Opts::new("udp_server_msg_count", "Envelopes received from the network"),
            &["tag"],
        )?;
        let bytes_sent = IntCounter::new("udp_bytes_sent_total", "Bytes written to the network")?;
        let bytes_received = IntCounter::new("udp_bytes_received_total", "Bytes read from the network")?;
        let errors = IntCounterVec::new(
            Opts::new("udp_error_count", "Transport and dispatch errors"),
            &["error_type"],
        )?;

        registry.register(Box::new(broadcasts.clone()))?;
        registry.register(Box::new(deliveries.clone()))?;
        registry.register(Box::new(delivery_latency.clone()))?;
        registry.register(Box::new(buffer_size.clone()))?;
        registry.register(Box::new(trusted_peers.clone()))?;
        registry.register(Box::new(buffer_flushes.clone()))?;
        registry.register(Box::new(window_resets.clone()))?;
        registry.register(Box::new(messages_sent.clone()))?;
        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(bytes_sent.clone()))?;
        registry.register(Box::new(bytes_received.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Metrics {
            registry,
            broadcasts,
            deliveries,
            delivery_latency,
            buffer_size,
            trusted_peers,
            buffer_flushes,
            window_resets,
            messages_sent,
            messages_received,
            bytes_sent,
            bytes_received,
            errors,
        })
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors.with_label_values(&[error_type]).inc();
    }

    pub fn record_sent(&self, tag: &str, bytes: usize) {
        self.messages_sent.with_label_values(&[tag]).inc();
        self.bytes_sent.inc_by(bytes as u64);
    }

    pub fn record_received(&self, tag: &str, bytes: usize) {
        self.messages_received.with_label_values(&[tag]).inc();
        self.bytes_received.inc_by(bytes as u64);
    }

    /// Text exposition format, with its content type.
    pub fn encode(&self) -> Result<(String, Vec<u8>), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.broadcasts.inc();
        first.record_error(ERROR_OVERSIZE);

        assert_eq!(first.broadcasts.get(), 1);
        assert_eq!(second.broadcasts.get(), 0);
        assert_eq!(first.errors.with_label_values(&[ERROR_OVERSIZE]).get(), 1);
    }

    #[test]
    fn test_encode_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_sent("APP_MSG", 42);

        let (content_type, body) = metrics.encode().unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("udp_bytes_sent_total 42"));
        assert!(text.contains("udp_client_msg_count{tag=\"APP_MSG\"} 1"));
    }
}
