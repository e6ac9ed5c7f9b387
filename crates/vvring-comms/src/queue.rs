//! Bounded SPSC queue of typed slots.
//!
//! Values are moved into a fixed slot array on push and moved back out on
//! pop; the slot bookkeeping is a [`LocalIndex`]. A full queue drops new items
//! instead of waiting, and an empty queue pops nothing.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::Arc;

use vvring_core::Result;
use vvring_fifo::{LocalIndex, Reservation, RingIndex};

/// Slot storage shared by a [`QueueProducer`] and a [`QueueConsumer`].
pub struct TypedQueue<T> {
    index: LocalIndex,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: Each slot is accessed by exactly one side at a time, as decided by
// the counters: the producer only touches free slots, the consumer only
// published ones. Values cross threads, hence `T: Send`.
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for TypedQueue<T> {}
#[allow(unsafe_code)]
unsafe impl<T: Send> Send for TypedQueue<T> {}

impl<T: Send> TypedQueue<T> {
    /// Create a queue with `capacity` slots and return its two ends
    pub fn new(capacity: usize) -> Result<(QueueProducer<T>, QueueConsumer<T>)> {
        let index = LocalIndex::new(capacity)?;
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        let queue = Arc::new(Self { index, slots });
        Ok((
            QueueProducer {
                queue: Arc::clone(&queue),
            },
            QueueConsumer { queue },
        ))
    }
}

impl<T> TypedQueue<T> {
    fn slot(&self, index: usize) -> *mut MaybeUninit<T> {
        self.slots[index].get()
    }

    fn capacity(&self) -> usize {
        self.index.capacity()
    }

    fn len(&self) -> usize {
        self.index.available_to_read()
    }
}

impl<T> Drop for TypedQueue<T> {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        let pending = self.index.prepare_to_read(self.index.available_to_read());
        for index in pending.indices() {
            // SAFETY: every slot between the read and write counters holds a
            // value that was pushed and never popped; `&mut self` means both
            // ends are gone.
            unsafe { (*self.slot(index)).assume_init_drop() };
        }
        self.index.finished_read(pending.len());
    }
}

/// Pushing end of a [`TypedQueue`]. Not `Clone`: there is one producer.
pub struct QueueProducer<T> {
    queue: Arc<TypedQueue<T>>,
}

impl<T> QueueProducer<T> {
    /// Store `item`, or hand it back if every slot is taken
    #[allow(unsafe_code)]
    pub fn try_push(&mut self, item: T) -> std::result::Result<(), T> {
        let reservation = self.queue.index.prepare_to_write(1);
        if reservation.is_empty() {
            return Err(item);
        }

        // SAFETY: the reserved slot is free (already consumed or never used)
        // and the consumer will not look at it until the write counter moves.
        unsafe { (*self.queue.slot(reservation.start1)).write(item) };
        self.queue.index.finished_write(1);
        Ok(())
    }

    /// Store `item`; when the queue is full the item is dropped and `false`
    /// is returned
    pub fn push(&mut self, item: T) -> bool {
        self.try_push(item).is_ok()
    }

    /// Push every item until the queue fills; the rest are dropped.
    /// Returns the number stored.
    pub fn push_all<I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        items.into_iter().map(|item| self.push(item)).filter(|&stored| stored).count()
    }

    /// Free slots right now
    pub fn free_slots(&self) -> usize {
        self.queue.index.available_to_write()
    }

    /// True when the next push would be dropped
    pub fn is_full(&self) -> bool {
        self.free_slots() == 0
    }

    /// Items waiting to be popped
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

impl<T> fmt::Debug for QueueProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueProducer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Popping end of a [`TypedQueue`]. Not `Clone`: there is one consumer.
pub struct QueueConsumer<T> {
    queue: Arc<TypedQueue<T>>,
}

impl<T> QueueConsumer<T> {
    /// Take the oldest item, if any
    #[allow(unsafe_code)]
    pub fn pop(&mut self) -> Option<T> {
        let reservation = self.queue.index.prepare_to_read(1);
        if reservation.is_empty() {
            return None;
        }

        // SAFETY: the slot was published by the producer and is moved out
        // exactly once before the read counter releases it.
        let item = unsafe { (*self.queue.slot(reservation.start1)).assume_init_read() };
        self.queue.index.finished_read(1);
        Some(item)
    }

    /// Take everything queued at the time of the call.
    ///
    /// Items pushed while the drain is alive are left for the next pop. Each
    /// slot is released as its item is yielded; items not iterated by the
    /// time the drain is dropped are dropped with it. Forgetting the drain
    /// leaves the untaken items queued.
    pub fn pop_all(&mut self) -> Drain<'_, T> {
        let reservation = self
            .queue
            .index
            .prepare_to_read(self.queue.index.available_to_read());
        Drain {
            queue: &self.queue,
            reservation,
            position: 0,
        }
    }

    /// Move everything queued into `out`; returns the number moved
    pub fn pop_into<E>(&mut self, out: &mut E) -> usize
    where
        E: Extend<T>,
    {
        let drain = self.pop_all();
        let count = drain.len();
        out.extend(drain);
        count
    }

    /// Items waiting to be popped
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

impl<T> fmt::Debug for QueueConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Items reserved by [`QueueConsumer::pop_all`], yielded oldest first.
pub struct Drain<'a, T> {
    queue: &'a TypedQueue<T>,
    reservation: Reservation,
    position: usize,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    #[allow(unsafe_code)]
    fn next(&mut self) -> Option<T> {
        let index = self.reservation.index_at(self.position)?;
        self.position += 1;

        // SAFETY: index lies in the published range reserved for this drain
        // and each position is read once.
        let item = unsafe { (*self.queue.slot(index)).assume_init_read() };

        // Release the slot right away so a forgotten drain cannot leave a
        // moved-out value visible to the next pop
        self.queue.index.finished_read(1);
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.reservation.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for Drain<'_, T> {}

impl<T> Drop for Drain<'_, T> {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        while let Some(index) = self.reservation.index_at(self.position) {
            self.position += 1;
            // SAFETY: same range as `next`; these values were never moved out
            unsafe { (*self.queue.slot(index)).assume_init_drop() };
            self.queue.index.finished_read(1);
        }
    }
}
