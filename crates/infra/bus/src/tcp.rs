//! Networked transport over framed TCP sockets
//!
//! Sender roles bind a listener and fan frames out to every connected
//! peer through a bounded per-peer queue (the high-water mark); receiver
//! roles connect and reassemble frames, reconnecting with capped backoff
//! when the remote goes away. Frames are `{len: u32 LE, bytes}` and are
//! only surfaced whole.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::{
    DEFAULT_HWM_MESSAGES, MAX_FRAME_LEN, Publisher, Puller, Pusher, RECV_POLL_TIMEOUT,
    ReceiveCallback, StatsSnapshot, Subscriber, TransportCounters, frame_topic, shared_counters,
    split_topic, topic_matches,
};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const RECONNECT_BASE: Duration = Duration::from_millis(100);
const RECONNECT_CAP: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const RECV_QUEUE_DEPTH: usize = 4096;

/// Strip the `tcp://` scheme, leaving `host:port`.
pub fn parse_tcp_endpoint(endpoint: &str) -> Result<String, TransportError> {
    endpoint
        .strip_prefix("tcp://")
        .filter(|rest| rest.contains(':'))
        .map(str::to_string)
        .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.to_string()))
}

fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(payload.len() as u32).to_le_bytes())?;
    stream.write_all(payload)
}

/// Incremental frame reassembly that survives read timeouts without ever
/// losing partial bytes.
struct FrameReader {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl FrameReader {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            pending: Vec::with_capacity(64 * 1024),
        }
    }

    /// Read whatever is available and hand complete frames to `sink`.
    /// Returns `Ok(())` on timeout so callers can poll their running flag.
    fn poll(&mut self, sink: &mut impl FnMut(Vec<u8>)) -> std::io::Result<()> {
        let mut chunk = [0u8; 64 * 1024];
        match self.stream.read(&mut chunk) {
            Ok(0) => return Err(ErrorKind::ConnectionAborted.into()),
            Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let mut offset = 0;
        while self.pending.len() - offset >= 4 {
            let len = u32::from_le_bytes([
                self.pending[offset],
                self.pending[offset + 1],
                self.pending[offset + 2],
                self.pending[offset + 3],
            ]) as usize;
            if len > MAX_FRAME_LEN {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidData,
                    format!("frame of {len} bytes exceeds limit"),
                ));
            }
            if self.pending.len() - offset - 4 < len {
                break;
            }
            sink(self.pending[offset + 4..offset + 4 + len].to_vec());
            offset += 4 + len;
        }
        self.pending.drain(..offset);
        Ok(())
    }
}

struct Peer {
    tx: Sender<Vec<u8>>,
    handle: Option<JoinHandle<()>>,
}

/// Listener + fan-out machinery shared by the publisher and pusher roles.
struct TcpSender {
    endpoint: String,
    running: Arc<AtomicBool>,
    peers: Arc<Mutex<Vec<Peer>>>,
    accept_thread: Option<JoinHandle<()>>,
    counters: Arc<TransportCounters>,
    round_robin: AtomicUsize,
}

impl TcpSender {
    fn bind(endpoint: &str) -> Result<Self, TransportError> {
        let addr = parse_tcp_endpoint(endpoint)?;
        let listener = TcpListener::bind(&addr).map_err(|source| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| TransportError::Bind {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let running = Arc::new(AtomicBool::new(true));
        let peers: Arc<Mutex<Vec<Peer>>> = Arc::new(Mutex::new(Vec::new()));
        let counters = shared_counters();
        let hwm = DEFAULT_HWM_MESSAGES;

        let accept_running = Arc::clone(&running);
        let accept_peers = Arc::clone(&peers);
        let accept_endpoint = endpoint.to_string();
        let accept_thread = std::thread::spawn(move || {
            while accept_running.load(Ordering::Acquire) {
                match listener.accept() {
                    Ok((stream, remote)) => {
                        let _ = stream.set_nodelay(true);
                        debug!(endpoint = %accept_endpoint, %remote, "peer connected");
                        let (tx, rx) = channel::bounded::<Vec<u8>>(hwm);
                        let handle = std::thread::spawn(move || peer_writer(stream, rx));
                        accept_peers.lock().push(Peer {
                            tx,
                            handle: Some(handle),
                        });
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(ACCEPT_POLL);
                    }
                    Err(e) => {
                        warn!(endpoint = %accept_endpoint, error = %e, "accept failed");
                        std::thread::sleep(ACCEPT_POLL);
                    }
                }
            }
        });

        Ok(Self {
            endpoint: endpoint.to_string(),
            running,
            peers,
            accept_thread: Some(accept_thread),
            counters,
            round_robin: AtomicUsize::new(0),
        })
    }

    /// Send to every peer (fan-out). Slow peers drop frames once their
    /// queue hits the high-water mark.
    fn broadcast(&self, frame: &[u8], non_blocking: bool) -> bool {
        let mut peers = self.peers.lock();
        let mut delivered = false;
        peers.retain_mut(|peer| match self.offer(peer, frame, non_blocking) {
            Offer::Delivered => {
                delivered = true;
                true
            }
            Offer::Dropped => true,
            Offer::Disconnected => {
                if let Some(handle) = peer.handle.take() {
                    let _ = handle.join();
                }
                false
            }
        });
        delivered || peers.is_empty()
    }

    /// Send to one peer, rotating among connections.
    fn distribute(&self, frame: &[u8], non_blocking: bool) -> bool {
        let mut peers = self.peers.lock();
        if peers.is_empty() {
            self.counters.record_drop();
            return false;
        }
        let start = self.round_robin.fetch_add(1, Ordering::Relaxed);
        for i in 0..peers.len() {
            let idx = (start + i) % peers.len();
            match self.offer(&mut peers[idx], frame, non_blocking) {
                Offer::Delivered => return true,
                Offer::Dropped => return false,
                Offer::Disconnected => continue,
            }
        }
        self.counters.record_drop();
        false
    }

    fn offer(&self, peer: &mut Peer, frame: &[u8], non_blocking: bool) -> Offer {
        if non_blocking {
            match peer.tx.try_send(frame.to_vec()) {
                Ok(()) => Offer::Delivered,
                Err(TrySendError::Full(_)) => {
                    self.counters.record_drop();
                    Offer::Dropped
                }
                Err(TrySendError::Disconnected(_)) => Offer::Disconnected,
            }
        } else {
            match peer
                .tx
                .send_timeout(frame.to_vec(), RECV_POLL_TIMEOUT)
            {
                Ok(()) => Offer::Delivered,
                Err(channel::SendTimeoutError::Timeout(_)) => {
                    self.counters.record_drop();
                    Offer::Dropped
                }
                Err(channel::SendTimeoutError::Disconnected(_)) => Offer::Disconnected,
            }
        }
    }

    fn close(&self) {
        self.running.store(false, Ordering::Release);
        // Dropping peers disconnects the writer queues; writers exit on
        // their next poll (zero linger: no draining handshake).
        self.peers.lock().clear();
    }
}

enum Offer {
    Delivered,
    Dropped,
    Disconnected,
}

impl Drop for TcpSender {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.peers.lock().clear();
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn peer_writer(mut stream: TcpStream, rx: Receiver<Vec<u8>>) {
    loop {
        match rx.recv_timeout(RECV_POLL_TIMEOUT) {
            Ok(frame) => {
                if let Err(e) = write_frame(&mut stream, &frame) {
                    debug!(error = %e, "peer writer exiting");
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Connector + reassembly machinery shared by the subscriber and puller
/// roles. Frames land in a bounded queue drained by `recv`/`pull`.
struct TcpReceiver {
    endpoint: String,
    running: Arc<AtomicBool>,
    frames: Receiver<Vec<u8>>,
    reader_thread: Option<JoinHandle<()>>,
    counters: Arc<TransportCounters>,
}

impl TcpReceiver {
    fn connect(endpoint: &str) -> Result<Self, TransportError> {
        let addr = parse_tcp_endpoint(endpoint)?;
        let running = Arc::new(AtomicBool::new(true));
        let (tx, frames) = channel::bounded::<Vec<u8>>(RECV_QUEUE_DEPTH);
        let counters = shared_counters();

        let thread_running = Arc::clone(&running);
        let thread_counters = Arc::clone(&counters);
        let thread_endpoint = endpoint.to_string();
        let reader_thread = std::thread::spawn(move || {
            reader_loop(&addr, &thread_endpoint, thread_running, tx, thread_counters);
        });

        Ok(Self {
            endpoint: endpoint.to_string(),
            running,
            frames,
            reader_thread: Some(reader_thread),
            counters,
        })
    }

    fn next_frame(&self, non_blocking: bool) -> Option<Vec<u8>> {
        if non_blocking {
            self.frames.try_recv().ok()
        } else {
            self.frames.recv_timeout(RECV_POLL_TIMEOUT).ok()
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TcpReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_loop(
    addr: &str,
    endpoint: &str,
    running: Arc<AtomicBool>,
    tx: Sender<Vec<u8>>,
    counters: Arc<TransportCounters>,
) {
    let mut backoff = RECONNECT_BASE;
    while running.load(Ordering::Acquire) {
        let stream = match resolve_and_connect(addr) {
            Ok(stream) => {
                backoff = RECONNECT_BASE;
                stream
            }
            Err(e) => {
                debug!(endpoint, error = %e, delay_ms = backoff.as_millis() as u64, "connect failed, backing off");
                counters.record_error();
                interruptible_sleep(&running, backoff);
                backoff = (backoff * 2).min(RECONNECT_CAP);
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let _ = stream.set_read_timeout(Some(RECV_POLL_TIMEOUT));
        debug!(endpoint, "connected");

        let mut reader = FrameReader::new(stream);
        'connected: while running.load(Ordering::Acquire) {
            let mut overflowed = false;
            let result = reader.poll(&mut |frame| {
                if tx.try_send(frame).is_err() {
                    overflowed = true;
                }
            });
            if overflowed {
                // Subscriber-side HWM overrun: newest frames are shed.
                counters.record_drop();
            }
            if let Err(e) = result {
                warn!(endpoint, error = %e, "connection lost, reconnecting");
                counters.record_error();
                break 'connected;
            }
        }
    }
}

fn resolve_and_connect(addr: &str) -> std::io::Result<TcpStream> {
    use std::net::ToSocketAddrs;
    let mut last_err = None;
    for sock_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock_addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| ErrorKind::AddrNotAvailable.into()))
}

fn interruptible_sleep(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::Acquire) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Fan-out sender bound on a TCP endpoint.
pub struct TcpPublisher {
    sender: TcpSender,
}

impl TcpPublisher {
    pub fn bind(endpoint: &str) -> Result<Self, TransportError> {
        Ok(Self {
            sender: TcpSender::bind(endpoint)?,
        })
    }
}

impl Publisher for TcpPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        non_blocking: bool,
    ) -> Result<bool, TransportError> {
        let frame = frame_topic(topic, payload);
        let delivered = self.sender.broadcast(&frame, non_blocking);
        if delivered {
            self.sender.counters.record_send(frame.len());
        }
        Ok(delivered)
    }

    fn stats(&self) -> StatsSnapshot {
        self.sender.counters.snapshot()
    }

    fn endpoint(&self) -> &str {
        &self.sender.endpoint
    }

    fn close(&self) {
        self.sender.close();
    }
}

/// Topic-filtering receiver connected to a [`TcpPublisher`].
pub struct TcpSubscriber {
    receiver: TcpReceiver,
    filters: Arc<RwLock<Vec<String>>>,
    callback: Option<ReceiveCallback>,
    async_running: Arc<AtomicBool>,
    async_thread: Option<JoinHandle<()>>,
}

impl TcpSubscriber {
    pub fn connect(endpoint: &str) -> Result<Self, TransportError> {
        Ok(Self {
            receiver: TcpReceiver::connect(endpoint)?,
            filters: Arc::new(RwLock::new(Vec::new())),
            callback: None,
            async_running: Arc::new(AtomicBool::new(false)),
            async_thread: None,
        })
    }

    fn accept_frame(
        filters: &RwLock<Vec<String>>,
        counters: &TransportCounters,
        frame: &[u8],
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let (topic, payload) = split_topic(frame).inspect_err(|_| counters.record_error())?;
        if !topic_matches(&filters.read(), topic) {
            return Ok(None);
        }
        counters.record_recv(payload.len());
        Ok(Some(payload.to_vec()))
    }
}

impl Subscriber for TcpSubscriber {
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.filters.write().push(topic.to_string());
        Ok(())
    }

    fn recv(
        &mut self,
        buf: &mut [u8],
        non_blocking: bool,
    ) -> Result<Option<usize>, TransportError> {
        let deadline = Instant::now() + RECV_POLL_TIMEOUT;
        loop {
            let Some(frame) = self.receiver.next_frame(non_blocking) else {
                return Ok(None);
            };
            match Self::accept_frame(&self.filters, &self.receiver.counters, &frame)? {
                Some(payload) => {
                    if buf.len() < payload.len() {
                        self.receiver.counters.record_error();
                        return Err(TransportError::MalformedFrame(format!(
                            "receive buffer too small: {} < {}",
                            buf.len(),
                            payload.len()
                        )));
                    }
                    buf[..payload.len()].copy_from_slice(&payload);
                    return Ok(Some(payload.len()));
                }
                None if non_blocking || Instant::now() >= deadline => return Ok(None),
                None => {}
            }
        }
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
        let filters = Arc::clone(&self.filters);
        let frames = self.receiver.frames.clone();
        let counters = Arc::clone(&self.receiver.counters);
        self.async_thread = Some(std::thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                match frames.recv_timeout(RECV_POLL_TIMEOUT) {
                    Ok(frame) => match TcpSubscriber::accept_frame(&filters, &counters, &frame) {
                        Ok(Some(payload)) => callback(&payload),
                        Ok(None) => {}
                        Err(err) => warn!(%err, "dropping malformed frame"),
                    },
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
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
        self.receiver.counters.snapshot()
    }

    fn endpoint(&self) -> &str {
        &self.receiver.endpoint
    }

    fn close(&mut self) {
        self.stop_async_receive();
        self.receiver.close();
    }
}

/// Point-to-point sender bound on a TCP endpoint; connected pullers share
/// the stream round-robin.
pub struct TcpPusher {
    sender: TcpSender,
}

impl TcpPusher {
    pub fn bind(endpoint: &str) -> Result<Self, TransportError> {
        Ok(Self {
            sender: TcpSender::bind(endpoint)?,
        })
    }
}

impl Pusher for TcpPusher {
    fn push(&self, payload: &[u8], non_blocking: bool) -> Result<bool, TransportError> {
        let delivered = self.sender.distribute(payload, non_blocking);
        if delivered {
            self.sender.counters.record_send(payload.len());
        }
        Ok(delivered)
    }

    fn stats(&self) -> StatsSnapshot {
        self.sender.counters.snapshot()
    }

    fn endpoint(&self) -> &str {
        &self.sender.endpoint
    }

    fn close(&self) {
        self.sender.close();
    }
}

/// Point-to-point receiver connected to a [`TcpPusher`].
pub struct TcpPuller {
    receiver: TcpReceiver,
    callback: Option<ReceiveCallback>,
    async_running: Arc<AtomicBool>,
    async_thread: Option<JoinHandle<()>>,
}

impl TcpPuller {
    pub fn connect(endpoint: &str) -> Result<Self, TransportError> {
        Ok(Self {
            receiver: TcpReceiver::connect(endpoint)?,
            callback: None,
            async_running: Arc::new(AtomicBool::new(false)),
            async_thread: None,
        })
    }
}

impl Puller for TcpPuller {
    fn pull(&mut self, buf: &mut [u8], non_blocking: bool) -> Result<Option<usize>, TransportError> {
        let Some(frame) = self.receiver.next_frame(non_blocking) else {
            return Ok(None);
        };
        if buf.len() < frame.len() {
            self.receiver.counters.record_error();
            return Err(TransportError::MalformedFrame(format!(
                "receive buffer too small: {} < {}",
                buf.len(),
                frame.len()
            )));
        }
        buf[..frame.len()].copy_from_slice(&frame);
        self.receiver.counters.record_recv(frame.len());
        Ok(Some(frame.len()))
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
        let frames = self.receiver.frames.clone();
        let counters = Arc::clone(&self.receiver.counters);
        self.async_thread = Some(std::thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                match frames.recv_timeout(RECV_POLL_TIMEOUT) {
                    Ok(frame) => {
                        counters.record_recv(frame.len());
                        callback(&frame);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
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
        self.receiver.counters.snapshot()
    }

    fn endpoint(&self) -> &str {
        &self.receiver.endpoint
    }

    fn close(&mut self) {
        self.stop_async_receive();
        self.receiver.close();
    }
}
