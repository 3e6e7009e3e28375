//! In-process transport over named SPMC rings
//!
//! Endpoints look like `ring://market-data`. Binding a sender role creates
//! the ring (and claims its single producer); connecting a receiver role
//! registers a consumer cursor. Pub/sub frames carry the usual topic
//! prefix, filtered by the subscriber after dequeue; push/pull frames are
//! raw payloads.

use crossbeam::utils::Backoff;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::error::TransportError;
use crate::spmc::{ConsumerPoll, SpmcConsumer, SpmcProducer, SpmcRing};
use crate::transport::{
    Publisher, Puller, Pusher, ReceiveCallback, RECV_POLL_TIMEOUT, StatsSnapshot, Subscriber,
    TransportCounters, frame_topic, shared_counters, split_topic, topic_matches,
};

/// Default ring size when the endpoint does not specify one.
pub const DEFAULT_RING_BYTES: usize = 1 << 20;

/// Process-local table of named rings. One registry is owned by the
/// transport factory and shared by every endpoint it creates.
pub struct RingRegistry {
    rings: Mutex<FxHashMap<String, Arc<SpmcRing>>>,
    ring_bytes: usize,
}

impl RingRegistry {
    pub fn new(ring_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            rings: Mutex::new(FxHashMap::default()),
            ring_bytes,
        })
    }

    /// Create (or reuse) the named ring. Binding is idempotent on the ring
    /// itself; claiming the producer is not.
    fn bind(&self, name: &str) -> Arc<SpmcRing> {
        let mut rings = self.rings.lock();
        Arc::clone(
            rings
                .entry(name.to_string())
                .or_insert_with(|| SpmcRing::new(self.ring_bytes)),
        )
    }

    fn lookup(&self, name: &str) -> Option<Arc<SpmcRing>> {
        self.rings.lock().get(name).cloned()
    }
}

fn claim_producer(registry: &RingRegistry, name: &str) -> Result<SpmcProducer, TransportError> {
    let ring = registry.bind(name);
    ring.producer()
        .ok_or_else(|| TransportError::RingProducerTaken(name.to_string()))
}

fn attach_consumer(registry: &RingRegistry, name: &str) -> Result<SpmcConsumer, TransportError> {
    let ring = registry
        .lookup(name)
        .ok_or_else(|| TransportError::RingNotBound(name.to_string()))?;
    ring.register_consumer()
        .ok_or_else(|| TransportError::RingConsumersExhausted(name.to_string()))
}

fn push_with_policy(
    producer: &Mutex<SpmcProducer>,
    counters: &TransportCounters,
    frame: &[u8],
    non_blocking: bool,
) -> Result<bool, TransportError> {
    let guard = producer.lock();
    if guard.try_push(frame) {
        counters.record_send(frame.len());
        return Ok(true);
    }
    if non_blocking {
        counters.record_drop();
        return Ok(false);
    }
    // Bounded retry: the ring frees space as consumers drain or are
    // evicted, so a stuck ring resolves within the poll window.
    let deadline = Instant::now() + RECV_POLL_TIMEOUT;
    let backoff = Backoff::new();
    while Instant::now() < deadline {
        if guard.try_push(frame) {
            counters.record_send(frame.len());
            return Ok(true);
        }
        backoff.snooze();
    }
    counters.record_drop();
    Ok(false)
}

/// Sender half of a named ring (pub/sub flavor).
pub struct RingPublisher {
    endpoint: String,
    producer: Mutex<SpmcProducer>,
    counters: Arc<TransportCounters>,
}

impl RingPublisher {
    pub fn bind(registry: &RingRegistry, name: &str, endpoint: String) -> Result<Self, TransportError> {
        Ok(Self {
            endpoint,
            producer: Mutex::new(claim_producer(registry, name)?),
            counters: shared_counters(),
        })
    }
}

impl Publisher for RingPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        non_blocking: bool,
    ) -> Result<bool, TransportError> {
        let frame = frame_topic(topic, payload);
        push_with_policy(&self.producer, &self.counters, &frame, non_blocking)
    }

    fn stats(&self) -> StatsSnapshot {
        self.counters.snapshot()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn close(&self) {}
}

impl std::fmt::Debug for RingSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingSubscriber")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Receiver half of a named ring (pub/sub flavor).
pub struct RingSubscriber {
    endpoint: String,
    consumer: Arc<Mutex<SpmcConsumer>>,
    filters: Arc<RwLock<Vec<String>>>,
    counters: Arc<TransportCounters>,
    scratch: Vec<u8>,
    callback: Option<ReceiveCallback>,
    async_running: Arc<AtomicBool>,
    async_thread: Option<JoinHandle<()>>,
}

impl RingSubscriber {
    pub fn connect(
        registry: &RingRegistry,
        name: &str,
        endpoint: String,
    ) -> Result<Self, TransportError> {
        let consumer = attach_consumer(registry, name)?;
        let max = consumer_scratch_len(&consumer);
        Ok(Self {
            endpoint,
            consumer: Arc::new(Mutex::new(consumer)),
            filters: Arc::new(RwLock::new(Vec::new())),
            counters: shared_counters(),
            scratch: vec![0u8; max],
            callback: None,
            async_running: Arc::new(AtomicBool::new(false)),
            async_thread: None,
        })
    }
}

fn consumer_scratch_len(_c: &SpmcConsumer) -> usize {
    // A frame is capped at a quarter of the largest supported ring.
    DEFAULT_RING_BYTES / 4
}

fn poll_ring_frame(
    consumer: &Mutex<SpmcConsumer>,
    filters: &RwLock<Vec<String>>,
    counters: &TransportCounters,
    scratch: &mut [u8],
    out: &mut [u8],
    non_blocking: bool,
) -> Result<Option<usize>, TransportError> {
    let deadline = Instant::now() + RECV_POLL_TIMEOUT;
    let backoff = Backoff::new();
    loop {
        let polled = consumer.lock().try_pop(scratch);
        match polled {
            ConsumerPoll::Message(len) => {
                let (topic, payload) = split_topic(&scratch[..len])?;
                let filters = filters.read();
                if !topic_matches(&filters, topic) {
                    continue;
                }
                if out.len() < payload.len() {
                    counters.record_error();
                    return Err(TransportError::MalformedFrame(format!(
                        "receive buffer too small: {} < {}",
                        out.len(),
                        payload.len()
                    )));
                }
                out[..payload.len()].copy_from_slice(payload);
                counters.record_recv(payload.len());
                return Ok(Some(payload.len()));
            }
            ConsumerPoll::Empty => {
                if non_blocking || Instant::now() >= deadline {
                    return Ok(None);
                }
                backoff.snooze();
            }
            ConsumerPoll::Evicted => {
                counters.record_error();
                return Err(TransportError::Evicted);
            }
            ConsumerPoll::TooSmall(needed) => {
                counters.record_error();
                return Err(TransportError::MalformedFrame(format!(
                    "frame of {needed} bytes exceeds scratch buffer"
                )));
            }
        }
    }
}

impl Subscriber for RingSubscriber {
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.filters.write().push(topic.to_string());
        Ok(())
    }

    fn recv(
        &mut self,
        buf: &mut [u8],
        non_blocking: bool,
    ) -> Result<Option<usize>, TransportError> {
        poll_ring_frame(
            &self.consumer,
            &self.filters,
            &self.counters,
            &mut self.scratch,
            buf,
            non_blocking,
        )
    }

    fn set_receive_callback(&mut self, callback: ReceiveCallback) {
        self.callback = Some(callback);
    }

    fn start_async_receive(&mut self) -> Result<(), TransportError> {
        let Some(mut callback) = self.callback.take() else {
            return Ok(());
        };
        self.async_running.store(true, Ordering::Release);
        let running = Arc::clone(&self.async_running);
        let consumer = Arc::clone(&self.consumer);
        let filters = Arc::clone(&self.filters);
        let counters = Arc::clone(&self.counters);
        let mut scratch = vec![0u8; self.scratch.len()];
        let mut out = vec![0u8; self.scratch.len()];
        self.async_thread = Some(std::thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                match poll_ring_frame(&consumer, &filters, &counters, &mut scratch, &mut out, false)
                {
                    Ok(Some(len)) => callback(&out[..len]),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(%err, "ring async receive stopping");
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop_async_receive(&mut self) {
        self.async_running.store(false, Ordering::Release);
        if let Some(handle) = self.async_thread.take() {
            let _ = handle.join();
        }
    }

    fn stats(&self) -> StatsSnapshot {
        self.counters.snapshot()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn close(&mut self) {
        self.stop_async_receive();
    }
}

impl std::fmt::Debug for RingPusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingPusher")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Point-to-point sender over a named ring.
pub struct RingPusher {
    endpoint: String,
    producer: Mutex<SpmcProducer>,
    counters: Arc<TransportCounters>,
}

impl RingPusher {
    pub fn bind(registry: &RingRegistry, name: &str, endpoint: String) -> Result<Self, TransportError> {
        Ok(Self {
            endpoint,
            producer: Mutex::new(claim_producer(registry, name)?),
            counters: shared_counters(),
        })
    }
}

impl Pusher for RingPusher {
    fn push(&self, payload: &[u8], non_blocking: bool) -> Result<bool, TransportError> {
        push_with_policy(&self.producer, &self.counters, payload, non_blocking)
    }

    fn stats(&self) -> StatsSnapshot {
        self.counters.snapshot()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn close(&self) {}
}

/// Point-to-point receiver over a named ring.
pub struct RingPuller {
    endpoint: String,
    consumer: Arc<Mutex<SpmcConsumer>>,
    counters: Arc<TransportCounters>,
    scratch: Vec<u8>,
    callback: Option<ReceiveCallback>,
    async_running: Arc<AtomicBool>,
    async_thread: Option<JoinHandle<()>>,
}

impl RingPuller {
    pub fn connect(
        registry: &RingRegistry,
        name: &str,
        endpoint: String,
    ) -> Result<Self, TransportError> {
        let consumer = attach_consumer(registry, name)?;
        let max = consumer_scratch_len(&consumer);
        Ok(Self {
            endpoint,
            consumer: Arc::new(Mutex::new(consumer)),
            counters: shared_counters(),
            scratch: vec![0u8; max],
            callback: None,
            async_running: Arc::new(AtomicBool::new(false)),
            async_thread: None,
        })
    }
}

fn pull_ring_frame(
    consumer: &Mutex<SpmcConsumer>,
    counters: &TransportCounters,
    scratch: &mut [u8],
    out: &mut [u8],
    non_blocking: bool,
) -> Result<Option<usize>, TransportError> {
    let deadline = Instant::now() + RECV_POLL_TIMEOUT;
    let backoff = Backoff::new();
    loop {
        let polled = consumer.lock().try_pop(scratch);
        match polled {
            ConsumerPoll::Message(len) => {
                if out.len() < len {
                    counters.record_error();
                    return Err(TransportError::MalformedFrame(format!(
                        "receive buffer too small: {} < {len}",
                        out.len()
                    )));
                }
                out[..len].copy_from_slice(&scratch[..len]);
                counters.record_recv(len);
                return Ok(Some(len));
            }
            ConsumerPoll::Empty => {
                if non_blocking || Instant::now() >= deadline {
                    return Ok(None);
                }
                backoff.snooze();
            }
            ConsumerPoll::Evicted => {
                counters.record_error();
                return Err(TransportError::Evicted);
            }
            ConsumerPoll::TooSmall(needed) => {
                counters.record_error();
                return Err(TransportError::MalformedFrame(format!(
                    "frame of {needed} bytes exceeds scratch buffer"
                )));
            }
        }
    }
}

impl Puller for RingPuller {
    fn pull(&mut self, buf: &mut [u8], non_blocking: bool) -> Result<Option<usize>, TransportError> {
        pull_ring_frame(
            &self.consumer,
            &self.counters,
            &mut self.scratch,
            buf,
            non_blocking,
        )
    }

    fn set_receive_callback(&mut self, callback: ReceiveCallback) {
        self.callback = Some(callback);
    }

    fn start_async_receive(&mut self) -> Result<(), TransportError> {
        let Some(mut callback) = self.callback.take() else {
            return Ok(());
        };
        self.async_running.store(true, Ordering::Release);
        let running = Arc::clone(&self.async_running);
        let consumer = Arc::clone(&self.consumer);
        let counters = Arc::clone(&self.counters);
        let mut scratch = vec![0u8; self.scratch.len()];
        let mut out = vec![0u8; self.scratch.len()];
        self.async_thread = Some(std::thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                match pull_ring_frame(&consumer, &counters, &mut scratch, &mut out, false) {
                    Ok(Some(len)) => callback(&out[..len]),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(%err, "ring async pull stopping");
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop_async_receive(&mut self) {
        self.async_running.store(false, Ordering::Release);
        if let Some(handle) = self.async_thread.take() {
            let _ = handle.join();
        }
    }

    fn stats(&self) -> StatsSnapshot {
        self.counters.snapshot()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn close(&mut self) {
        self.stop_async_receive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<RingRegistry> {
        RingRegistry::new(1 << 16)
    }

    #[test]
    fn pub_sub_with_topic_filter() {
        let reg = registry();
        let publisher =
            RingPublisher::bind(&reg, "md", "ring://md".to_string()).unwrap();
        let mut subscriber =
            RingSubscriber::connect(&reg, "md", "ring://md".to_string()).unwrap();
        subscriber.subscribe("ticks").unwrap();

        publisher.publish("ticks", b"keep", true).unwrap();
        publisher.publish("noise", b"skip", true).unwrap();
        publisher.publish("ticks", b"keep2", true).unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(subscriber.recv(&mut buf, true).unwrap(), Some(4));
        assert_eq!(&buf[..4], b"keep");
        assert_eq!(subscriber.recv(&mut buf, true).unwrap(), Some(5));
        assert_eq!(&buf[..5], b"keep2");
        assert_eq!(subscriber.recv(&mut buf, true).unwrap(), None);
    }

    #[test]
    fn connect_before_bind_fails() {
        let reg = registry();
        let err = RingSubscriber::connect(&reg, "nope", "ring://nope".to_string()).unwrap_err();
        assert!(matches!(err, TransportError::RingNotBound(_)));
    }

    #[test]
    fn second_producer_is_rejected() {
        let reg = registry();
        let _p = RingPublisher::bind(&reg, "x", "ring://x".to_string()).unwrap();
        let err = RingPusher::bind(&reg, "x", "ring://x".to_string()).unwrap_err();
        assert!(matches!(err, TransportError::RingProducerTaken(_)));
    }

    #[test]
    fn push_pull_round_trip_preserves_bytes() {
        let reg = registry();
        let pusher = RingPusher::bind(&reg, "sig", "ring://sig".to_string()).unwrap();
        let mut puller = RingPuller::connect(&reg, "sig", "ring://sig".to_string()).unwrap();

        let payload: Vec<u8> = (0..=255).collect();
        assert!(pusher.push(&payload, true).unwrap());

        let mut buf = [0u8; 512];
        let len = puller.pull(&mut buf, true).unwrap().unwrap();
        assert_eq!(len, payload.len());
        assert_eq!(&buf[..len], payload.as_slice());

        let sent = pusher.stats();
        let received = puller.stats();
        assert_eq!(sent.bytes_sent, received.bytes_received);
    }

    #[test]
    fn async_receive_delivers_to_callback() {
        let reg = registry();
        let publisher = RingPublisher::bind(&reg, "cb", "ring://cb".to_string()).unwrap();
        let mut subscriber = RingSubscriber::connect(&reg, "cb", "ring://cb".to_string()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let sink = Arc::clone(&seen);
        subscriber.set_receive_callback(Box::new(move |msg| {
            sink.lock().push(msg.to_vec());
        }));
        subscriber.start_async_receive().unwrap();

        publisher.publish("t", b"one", true).unwrap();
        publisher.publish("t", b"two", true).unwrap();

        let deadline = Instant::now() + std::time::Duration::from_secs(2);
        while seen.lock().len() < 2 && Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        subscriber.stop_async_receive();

        let seen = seen.lock();
        assert_eq!(seen.as_slice(), &[b"one".to_vec(), b"two".to_vec()]);
    }
}
