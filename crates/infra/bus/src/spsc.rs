//! Bounded single-producer single-consumer queue
//!
//! Power-of-two capacity, cache-line-padded head and tail, and a `ready`
//! flag per slot. The producer fills the slot and publishes with a release
//! store; the consumer observes the flag with an acquire load, takes the
//! value and clears the flag. Neither side ever blocks: a full queue fails
//! the push, an empty queue fails the pop.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct Slot<T> {
    ready: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct Inner<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: slots are handed between exactly one producer and one consumer,
// with the `ready` flag ordering every access to `value`.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            if slot.ready.load(Ordering::Acquire) {
                // SAFETY: ready slots hold initialized values nobody else
                // can touch once both handles are gone.
                unsafe { (*slot.value.get()).assume_init_drop() };
            }
        }
    }
}

/// Producer half; there is exactly one per queue.
pub struct SpscProducer<T> {
    inner: Arc<Inner<T>>,
}

/// Consumer half; there is exactly one per queue.
pub struct SpscConsumer<T> {
    inner: Arc<Inner<T>>,
}

/// Create a queue with `capacity` rounded up to the next power of two.
pub fn spsc_channel<T: Send>(capacity: usize) -> (SpscProducer<T>, SpscConsumer<T>) {
    let cap = capacity.max(2).next_power_of_two();
    let slots = (0..cap)
        .map(|_| Slot {
            ready: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        })
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let inner = Arc::new(Inner {
        slots,
        mask: cap - 1,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
    });
    (
        SpscProducer {
            inner: Arc::clone(&inner),
        },
        SpscConsumer { inner },
    )
}

impl<T: Send> SpscProducer<T> {
    /// Push without blocking. Returns the value back when the queue is full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let inner = &self.inner;
        let head = inner.head.load(Ordering::Relaxed);
        let slot = &inner.slots[head & inner.mask];
        if slot.ready.load(Ordering::Acquire) {
            return Err(value);
        }
        // SAFETY: the slot is not ready, so the consumer will not read it
        // until we set the flag below.
        unsafe { (*slot.value.get()).write(value) };
        slot.ready.store(true, Ordering::Release);
        inner.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Approximate number of queued entries.
    pub fn len(&self) -> usize {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.mask + 1
    }
}

impl<T: Send> SpscConsumer<T> {
    /// Pop without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let inner = &self.inner;
        let tail = inner.tail.load(Ordering::Relaxed);
        let slot = &inner.slots[tail & inner.mask];
        if !slot.ready.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the slot is ready, so the producer will not write it
        // until we clear the flag below.
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.ready.store(false, Ordering::Release);
        inner.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Drain everything currently visible into `sink`. Returns the count.
    pub fn drain_into(&self, sink: &mut impl FnMut(T)) -> usize {
        let mut n = 0;
        while let Some(v) = self.try_pop() {
            sink(v);
            n += 1;
        }
        n
    }
}
