//! Transport roles and shared plumbing
//!
//! Four roles cover the two messaging patterns: [`Publisher`]/[`Subscriber`]
//! for fan-out topics and [`Pusher`]/[`Puller`] for point-to-point pipes.
//! Both backends deliver whole messages and preserve per-producer order.
//!
//! Pub/sub frames carry a NUL-terminated topic prefix in front of the
//! payload; subscribers filter after dequeue. Push/pull frames are raw
//! payload bytes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::TransportError;

/// How long a blocking receive waits before giving the caller its poll
/// loop back.
pub const RECV_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Default per-peer backlog before messages are dropped (TCP) or a consumer
/// is evicted (ring).
pub const DEFAULT_HWM_MESSAGES: usize = 1000;

/// Largest accepted frame. Anything bigger is treated as a malformed frame
/// and the connection is dropped.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Callback invoked by async receive threads with each whole message.
pub type ReceiveCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Monotonic traffic counters kept by every endpoint.
#[derive(Default)]
pub struct TransportCounters {
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub dropped: AtomicU64,
    pub errors: AtomicU64,
}

impl TransportCounters {
    pub fn record_send(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_recv(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of an endpoint's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub dropped: u64,
    pub errors: u64,
}

/// Fan-out sender. Thread-safe: services publish from their processing
/// thread while monitors read counters.
pub trait Publisher: Send + Sync {
    /// Send `payload` on `topic`. Non-blocking sends return `Ok(false)`
    /// when back-pressure forced a drop.
    fn publish(&self, topic: &str, payload: &[u8], non_blocking: bool)
    -> Result<bool, TransportError>;

    fn stats(&self) -> StatsSnapshot;
    fn endpoint(&self) -> &str;
    fn close(&self);
}

/// Fan-out receiver with topic filtering.
pub trait Subscriber: Send {
    /// Add a topic filter. No filters means receive everything.
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Receive one whole message (topic prefix stripped) into `buf`.
    /// Blocking mode waits at most [`RECV_POLL_TIMEOUT`].
    fn recv(&mut self, buf: &mut [u8], non_blocking: bool)
    -> Result<Option<usize>, TransportError>;

    /// Install the callback used by [`Subscriber::start_async_receive`].
    fn set_receive_callback(&mut self, callback: ReceiveCallback);

    /// Spawn the delivery thread; messages flow to the callback until
    /// [`Subscriber::stop_async_receive`].
    fn start_async_receive(&mut self) -> Result<(), TransportError>;
    fn stop_async_receive(&mut self);

    fn stats(&self) -> StatsSnapshot;
    fn endpoint(&self) -> &str;
    fn close(&mut self);
}

/// Point-to-point sender.
pub trait Pusher: Send + Sync {
    fn push(&self, payload: &[u8], non_blocking: bool) -> Result<bool, TransportError>;
    fn stats(&self) -> StatsSnapshot;
    fn endpoint(&self) -> &str;
    fn close(&self);
}

/// Point-to-point receiver.
pub trait Puller: Send {
    fn pull(&mut self, buf: &mut [u8], non_blocking: bool)
    -> Result<Option<usize>, TransportError>;

    /// Install the callback used by [`Puller::start_async_receive`].
    fn set_receive_callback(&mut self, callback: ReceiveCallback);
    fn start_async_receive(&mut self) -> Result<(), TransportError>;
    fn stop_async_receive(&mut self);

    fn stats(&self) -> StatsSnapshot;
    fn endpoint(&self) -> &str;
    fn close(&mut self);
}

/// Prefix `payload` with a NUL-terminated topic for pub/sub framing.
pub fn frame_topic(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(topic.len() + 1 + payload.len());
    out.extend_from_slice(topic.as_bytes());
    out.push(0);
    out.extend_from_slice(payload);
    out
}

/// Split a pub/sub frame into `(topic, payload)`.
pub fn split_topic(frame: &[u8]) -> Result<(&[u8], &[u8]), TransportError> {
    match frame.iter().position(|&b| b == 0) {
        Some(idx) => Ok((&frame[..idx], &frame[idx + 1..])),
        None => Err(TransportError::MalformedFrame(
            "missing topic terminator".to_string(),
        )),
    }
}

/// True when `topic` passes the filter set (empty set passes everything).
pub fn topic_matches(filters: &[String], topic: &[u8]) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.as_bytes() == topic)
}

/// Shared helper for counter plumbing across backends.
pub fn shared_counters() -> Arc<TransportCounters> {
    Arc::new(TransportCounters::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_framing_round_trip() {
        let frame = frame_topic("md", b"payload");
        let (topic, payload) = split_topic(&frame).unwrap();
        assert_eq!(topic, b"md");
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn missing_terminator_is_malformed() {
        assert!(split_topic(&[1, 2, 3]).is_err());
    }

    #[test]
    fn filters() {
        let filters = vec!["md".to_string(), "exec".to_string()];
        assert!(topic_matches(&filters, b"md"));
        assert!(!topic_matches(&filters, b"pos"));
        assert!(topic_matches(&[], b"anything"));
    }
}
