//! Single-producer multi-consumer broadcast ring
//!
//! One producer writes variable-length framed messages into a power-of-two
//! byte buffer; up to [`MAX_CONSUMERS`] consumers follow with independent
//! read cursors. Each frame is `{size: u32, sequence: u32, payload}` and is
//! never split across the buffer end; a `size == u32::MAX` marker tells
//! readers to skip to the boundary.
//!
//! The producer may not overwrite bytes any live cursor still has to read,
//! so the slowest consumer sets the reclaim horizon. A consumer whose lag
//! exceeds the high-water mark is evicted rather than allowed to stall the
//! producer; it observes [`ConsumerPoll::Evicted`] on its next poll.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Maximum number of simultaneously registered consumers.
pub const MAX_CONSUMERS: usize = 32;

const FRAME_HEADER: usize = 8;
const WRAP_MARKER: u32 = u32::MAX;

/// Result of polling a consumer cursor.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsumerPoll {
    /// A whole message of the given length was copied into the buffer.
    Message(usize),
    /// Nothing new behind the producer.
    Empty,
    /// This consumer fell beyond the high-water mark and was closed.
    Evicted,
    /// Caller's buffer is smaller than the next frame.
    TooSmall(usize),
}

struct CursorSlot {
    position: CachePadded<AtomicU64>,
    active: AtomicBool,
    evicted: AtomicBool,
}

/// The shared ring. Construct with [`SpmcRing::new`], then claim the single
/// producer with [`SpmcRing::producer`] and attach consumers with
/// [`SpmcRing::register_consumer`].
pub struct SpmcRing {
    data: Box<[UnsafeCell<u8>]>,
    mask: u64,
    capacity: u64,
    max_message: usize,
    hwm_bytes: u64,
    write_pos: CachePadded<AtomicU64>,
    sequence: AtomicU32,
    producer_claimed: AtomicBool,
    cursors: [CursorSlot; MAX_CONSUMERS],
    evictions: AtomicU64,
}

// SAFETY: buffer bytes are published to consumers only through the
// release store on `write_pos`, and reclaimed only behind the min live
// cursor; cursor slots are individually atomic.
unsafe impl Send for SpmcRing {}
unsafe impl Sync for SpmcRing {}

impl SpmcRing {
    /// Create a ring with `capacity` bytes, rounded up to a power of two.
    /// The high-water mark defaults to three quarters of the capacity.
    pub fn new(capacity: usize) -> Arc<Self> {
        let cap = capacity.max(1024).next_power_of_two();
        let data = (0..cap)
            .map(|_| UnsafeCell::new(0u8))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Arc::new(Self {
            data,
            mask: (cap - 1) as u64,
            capacity: cap as u64,
            max_message: cap / 4,
            hwm_bytes: (cap / 4 * 3) as u64,
            write_pos: CachePadded::new(AtomicU64::new(0)),
            sequence: AtomicU32::new(0),
            producer_claimed: AtomicBool::new(false),
            cursors: std::array::from_fn(|_| CursorSlot {
                position: CachePadded::new(AtomicU64::new(0)),
                active: AtomicBool::new(false),
                evicted: AtomicBool::new(false),
            }),
            evictions: AtomicU64::new(0),
        })
    }

    /// Claim the producer side. Fails if one was already claimed.
    pub fn producer(self: &Arc<Self>) -> Option<SpmcProducer> {
        if self
            .producer_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(SpmcProducer {
                ring: Arc::clone(self),
                _not_sync: PhantomData,
            })
        } else {
            None
        }
    }

    /// Register a consumer starting at the current head of the stream.
    /// Returns `None` when all consumer slots are taken.
    pub fn register_consumer(self: &Arc<Self>) -> Option<SpmcConsumer> {
        for (id, slot) in self.cursors.iter().enumerate() {
            if slot
                .active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.evicted.store(false, Ordering::Release);
                slot.position
                    .store(self.write_pos.load(Ordering::Acquire), Ordering::Release);
                return Some(SpmcConsumer {
                    ring: Arc::clone(self),
                    id,
                });
            }
        }
        None
    }

    /// Number of consumers closed for falling behind the high-water mark.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    fn min_live_cursor(&self, write_pos: u64) -> u64 {
        let mut min = write_pos;
        for slot in &self.cursors {
            if slot.active.load(Ordering::Acquire) && !slot.evicted.load(Ordering::Acquire) {
                min = min.min(slot.position.load(Ordering::Acquire));
            }
        }
        min
    }

    fn evict_laggards(&self, write_pos: u64) {
        for slot in &self.cursors {
            if slot.active.load(Ordering::Acquire) && !slot.evicted.load(Ordering::Acquire) {
                let lag = write_pos.wrapping_sub(slot.position.load(Ordering::Acquire));
                if lag > self.hwm_bytes {
                    slot.evicted.store(true, Ordering::Release);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(lag, hwm = self.hwm_bytes, "evicting delinquent ring consumer");
                }
            }
        }
    }

    #[inline]
    unsafe fn write_bytes(&self, pos: u64, src: &[u8]) {
        let off = (pos & self.mask) as usize;
        // Frames never wrap, so the whole slice is contiguous.
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.data.as_ptr().add(off) as *mut u8,
                src.len(),
            );
        }
    }

    #[inline]
    unsafe fn read_bytes(&self, pos: u64, dst: &mut [u8]) {
        let off = (pos & self.mask) as usize;
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.data.as_ptr().add(off) as *const u8,
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
    }
}

/// The single writer for a ring. `Send` but deliberately not `Sync`.
pub struct SpmcProducer {
    ring: Arc<SpmcRing>,
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

impl SpmcProducer {
    /// Append one framed message. Returns `false` when there is no space
    /// even after evicting consumers beyond the high-water mark; the caller
    /// decides whether to drop or retry.
    pub fn try_push(&self, payload: &[u8]) -> bool {
        let ring = &*self.ring;
        if payload.len() > ring.max_message {
            tracing::warn!(
                len = payload.len(),
                max = ring.max_message,
                "message rejected: larger than ring allows"
            );
            return false;
        }

        let frame_len = (FRAME_HEADER + payload.len()) as u64;
        let write_pos = ring.write_pos.load(Ordering::Relaxed);
        let to_boundary = ring.capacity - (write_pos & ring.mask);

        // Bytes consumed ahead of the payload frame by wrap handling.
        let skip = if to_boundary < frame_len { to_boundary } else { 0 };
        let required = skip + frame_len;

        let mut free = ring.capacity - write_pos.wrapping_sub(ring.min_live_cursor(write_pos));
        if free < required {
            ring.evict_laggards(write_pos);
            free = ring.capacity - write_pos.wrapping_sub(ring.min_live_cursor(write_pos));
            if free < required {
                return false;
            }
        }

        let mut pos = write_pos;
        if skip > 0 {
            if to_boundary >= FRAME_HEADER as u64 {
                let mut marker = [0u8; FRAME_HEADER];
                marker[..4].copy_from_slice(&WRAP_MARKER.to_le_bytes());
                // SAFETY: region [write_pos, write_pos + skip) is reclaimed.
                unsafe { ring.write_bytes(pos, &marker) };
            }
            pos = pos.wrapping_add(skip);
        }

        let seq = ring.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let mut header = [0u8; FRAME_HEADER];
        header[..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        header[4..].copy_from_slice(&seq.to_le_bytes());
        // SAFETY: region [pos, pos + frame_len) is reclaimed and contiguous.
        unsafe {
            ring.write_bytes(pos, &header);
            ring.write_bytes(pos.wrapping_add(FRAME_HEADER as u64), payload);
        }

        ring.write_pos
            .store(pos.wrapping_add(frame_len), Ordering::Release);
        true
    }
}

/// One registered read cursor.
pub struct SpmcConsumer {
    ring: Arc<SpmcRing>,
    id: usize,
}

impl SpmcConsumer {
    /// Copy the next message into `buf` without blocking.
    pub fn try_pop(&mut self, buf: &mut [u8]) -> ConsumerPoll {
        let ring = &*self.ring;
        let slot = &ring.cursors[self.id];

        loop {
            if slot.evicted.load(Ordering::Acquire) {
                return ConsumerPoll::Evicted;
            }
            let write_pos = ring.write_pos.load(Ordering::Acquire);
            let pos = slot.position.load(Ordering::Relaxed);
            if pos == write_pos {
                return ConsumerPoll::Empty;
            }

            let to_boundary = ring.capacity - (pos & ring.mask);
            if to_boundary < FRAME_HEADER as u64 {
                slot.position
                    .store(pos.wrapping_add(to_boundary), Ordering::Release);
                continue;
            }

            let mut header = [0u8; FRAME_HEADER];
            // SAFETY: [pos, write_pos) is published and not yet reclaimed
            // while this cursor is live.
            unsafe { ring.read_bytes(pos, &mut header) };
            let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            if size == WRAP_MARKER {
                slot.position
                    .store(pos.wrapping_add(to_boundary), Ordering::Release);
                continue;
            }

            let size = size as usize;
            if size > ring.max_message {
                // A frame this large was never written; the cursor raced a
                // reclaim. Treat it like an eviction.
                slot.evicted.store(true, Ordering::Release);
                return ConsumerPoll::Evicted;
            }
            if buf.len() < size {
                return ConsumerPoll::TooSmall(size);
            }

            // SAFETY: same published region as the header read.
            unsafe { ring.read_bytes(pos.wrapping_add(FRAME_HEADER as u64), &mut buf[..size]) };

            // If we were evicted mid-copy the bytes may be torn; discard.
            if slot.evicted.load(Ordering::Acquire) {
                return ConsumerPoll::Evicted;
            }
            slot.position.store(
                pos.wrapping_add((FRAME_HEADER + size) as u64),
                Ordering::Release,
            );
            return ConsumerPoll::Message(size);
        }
    }

    /// Bytes between this cursor and the producer.
    pub fn lag(&self) -> u64 {
        let write_pos = self.ring.write_pos.load(Ordering::Acquire);
        write_pos.wrapping_sub(self.ring.cursors[self.id].position.load(Ordering::Acquire))
    }
}

impl Drop for SpmcConsumer {
    fn drop(&mut self) {
        self.ring.cursors[self.id]
            .active
            .store(false, Ordering::Release);
    }
}
