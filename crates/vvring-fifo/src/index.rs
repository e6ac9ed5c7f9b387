//! Read/write counter bookkeeping for single-producer/single-consumer rings.
//!
//! An index controller never touches the data it describes. It only tracks
//! two monotonic counters and derives from them how much can be read or
//! written, and where. The producer is the only writer of the write counter
//! and the consumer the only writer of the read counter, so a plain
//! load-then-store is enough to advance either one.
//!
//! Counters are loaded with `Acquire` and stored with `Release`: everything
//! the producer wrote into storage before publishing a new write counter is
//! visible to a consumer that observes that counter, and vice versa for
//! slots freed by the consumer.

use std::sync::atomic::{AtomicU64, Ordering};

use vvring_core::{Counter, Error, Result};

use crate::reservation::{Reservation, ScopedRead, ScopedWrite};

/// Counter protocol shared by every index controller.
///
/// Implementors only provide storage for the two counters; all derived
/// quantities are computed here so that every variant behaves identically.
pub trait RingIndex: Send + Sync {
    /// Number of frames or slots managed by this controller
    fn capacity(&self) -> usize;

    /// Total number of frames consumed so far
    fn read_counter(&self) -> Counter;

    /// Total number of frames produced so far
    fn write_counter(&self) -> Counter;

    /// Publish a new read counter (consumer side)
    fn set_read_counter(&self, value: Counter);

    /// Publish a new write counter (producer side)
    fn set_write_counter(&self, value: Counter);

    /// Frames ready to be read.
    ///
    /// A read counter ahead of the write counter can only come from a caller
    /// advancing past what was available; it reports an empty ring.
    fn available_to_read(&self) -> usize {
        let write = self.write_counter();
        let read = self.read_counter();
        let distance = write.wrapping_sub(read) as i64;
        if distance <= 0 {
            0
        } else {
            // Capacity always fits in u64; the min keeps the result in usize range
            (distance as u64).min(self.capacity() as u64) as usize
        }
    }

    /// Frames that can be written without overwriting unread data
    fn available_to_write(&self) -> usize {
        self.capacity() - self.available_to_read()
    }

    /// Physical offset of the next frame to read
    fn read_index(&self) -> usize {
        (self.read_counter() % self.capacity() as u64) as usize
    }

    /// Physical offset of the next frame to write
    fn write_index(&self) -> usize {
        (self.write_counter() % self.capacity() as u64) as usize
    }

    /// Mark `frames` as consumed. No bounds check.
    fn advance_read(&self, frames: usize) {
        self.set_read_counter(self.read_counter().wrapping_add(frames as u64));
    }

    /// Mark `frames` as produced. No bounds check.
    fn advance_write(&self, frames: usize) {
        self.set_write_counter(self.write_counter().wrapping_add(frames as u64));
    }

    /// Make the ring appear empty.
    ///
    /// Only valid while neither side is running.
    fn reset(&self) {
        self.set_write_counter(0);
        self.set_read_counter(0);
    }

    /// Locate where up to `wanted` frames can be written.
    ///
    /// The returned blocks cover `min(wanted, available_to_write())` frames.
    /// Nothing is committed until [`finished_write`](Self::finished_write).
    fn prepare_to_write(&self, wanted: usize) -> Reservation {
        let count = wanted.min(self.available_to_write());
        Reservation::starting_at(self.write_index(), count, self.capacity())
    }

    /// Commit `frames` written into a reservation from `prepare_to_write`
    fn finished_write(&self, frames: usize) {
        self.advance_write(frames);
    }

    /// Locate up to `wanted` frames ready to be read
    fn prepare_to_read(&self, wanted: usize) -> Reservation {
        let count = wanted.min(self.available_to_read());
        Reservation::starting_at(self.read_index(), count, self.capacity())
    }

    /// Release `frames` read from a reservation from `prepare_to_read`
    fn finished_read(&self, frames: usize) {
        self.advance_read(frames);
    }

    /// Reserve up to `wanted` frames for writing; committed when the guard drops
    fn scoped_write(&self, wanted: usize) -> ScopedWrite<'_, Self>
    where
        Self: Sized,
    {
        ScopedWrite::new(self, wanted)
    }

    /// Reserve up to `wanted` frames for reading; released when the guard drops
    fn scoped_read(&self, wanted: usize) -> ScopedRead<'_, Self>
    where
        Self: Sized,
    {
        ScopedRead::new(self, wanted)
    }
}

/// Keeps each counter on its own cache line so the producer and consumer do
/// not invalidate each other's line on every store.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CachePadded<T>(pub T);

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(Error::InvalidCapacity);
    }
    Ok(())
}

/// Index controller that owns its counters.
#[derive(Debug)]
pub struct LocalIndex {
    capacity: usize,
    read: CachePadded<AtomicU64>,
    write: CachePadded<AtomicU64>,
}

impl LocalIndex {
    /// Create an empty controller for `capacity` frames or slots
    pub fn new(capacity: usize) -> Result<Self> {
        check_capacity(capacity)?;
        Ok(Self {
            capacity,
            read: CachePadded(AtomicU64::new(0)),
            write: CachePadded(AtomicU64::new(0)),
        })
    }
}

impl RingIndex for LocalIndex {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read_counter(&self) -> Counter {
        self.read.load(Ordering::Acquire)
    }

    fn write_counter(&self) -> Counter {
        self.write.load(Ordering::Acquire)
    }

    fn set_read_counter(&self, value: Counter) {
        self.read.store(value, Ordering::Release);
    }

    fn set_write_counter(&self, value: Counter) {
        self.write.store(value, Ordering::Release);
    }
}

/// Counter pair laid out for placement in memory shared between processes.
///
/// An all-zero bit pattern is a valid empty state, so freshly truncated
/// shared memory needs no initialization.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SharedCounters {
    /// Frames consumed
    pub read: CachePadded<AtomicU64>,
    /// Frames produced
    pub write: CachePadded<AtomicU64>,
}

impl SharedCounters {
    /// Counters starting at zero
    pub fn new() -> Self {
        Self::default()
    }
}

/// Index controller over counters owned by someone else.
///
/// The counters may live in another struct, in a static, or in a mapped
/// shared memory segment written by another process.
#[derive(Debug, Clone, Copy)]
pub struct IndirectIndex<'a> {
    capacity: usize,
    read: &'a AtomicU64,
    write: &'a AtomicU64,
}

impl<'a> IndirectIndex<'a> {
    /// Drive a ring of `capacity` frames from two external counters
    pub fn new(capacity: usize, read: &'a AtomicU64, write: &'a AtomicU64) -> Result<Self> {
        check_capacity(capacity)?;
        Ok(Self {
            capacity,
            read,
            write,
        })
    }

    /// Drive a ring of `capacity` frames from a [`SharedCounters`] block
    pub fn from_counters(capacity: usize, counters: &'a SharedCounters) -> Result<Self> {
        Self::new(capacity, &counters.read, &counters.write)
    }
}

impl RingIndex for IndirectIndex<'_> {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read_counter(&self) -> Counter {
        self.read.load(Ordering::Acquire)
    }

    fn write_counter(&self) -> Counter {
        self.write.load(Ordering::Acquire)
    }

    fn set_read_counter(&self, value: Counter) {
        self.read.store(value, Ordering::Release);
    }

    fn set_write_counter(&self, value: Counter) {
        self.write.store(value, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(LocalIndex::new(0), Err(Error::InvalidCapacity)));

        let counters = SharedCounters::new();
        assert!(matches!(
            IndirectIndex::from_counters(0, &counters),
            Err(Error::InvalidCapacity)
        ));
    }

    #[test]
    fn test_empty_index() {
        let index = LocalIndex::new(8).unwrap();
        assert_eq!(index.capacity(), 8);
        assert_eq!(index.available_to_read(), 0);
        assert_eq!(index.available_to_write(), 8);
        assert_eq!(index.read_index(), 0);
        assert_eq!(index.write_index(), 0);
    }

    #[test]
    fn test_capacity_invariant_holds() {
        let index = LocalIndex::new(7).unwrap();
        let steps = [(3, 0), (4, 2), (0, 5), (6, 1), (1, 6)];

        for (write, read) in steps {
            let write = write.min(index.available_to_write());
            index.advance_write(write);
            assert_eq!(index.available_to_read() + index.available_to_write(), 7);

            let read = read.min(index.available_to_read());
            index.advance_read(read);
            assert_eq!(index.available_to_read() + index.available_to_write(), 7);
        }
    }

    #[test]
    fn test_indices_wrap_with_non_power_of_two_capacity() {
        let index = LocalIndex::new(5).unwrap();
        index.advance_write(4);
        index.advance_read(4);
        index.advance_write(3);

        assert_eq!(index.read_index(), 4);
        assert_eq!(index.write_index(), 2);
        assert_eq!(index.available_to_read(), 3);
    }

    #[test]
    fn test_read_ahead_of_write_reports_empty() {
        let index = LocalIndex::new(4).unwrap();
        index.advance_write(1);
        index.advance_read(3);

        assert_eq!(index.available_to_read(), 0);
        assert_eq!(index.available_to_write(), 4);
    }

    #[test]
    fn test_overfilled_index_is_clamped_to_capacity() {
        let index = LocalIndex::new(4).unwrap();
        index.advance_write(10);

        assert_eq!(index.available_to_read(), 4);
        assert_eq!(index.available_to_write(), 0);
    }

    #[test]
    fn test_counters_survive_u64_wrap() {
        let index = LocalIndex::new(8).unwrap();
        index.set_read_counter(u64::MAX - 2);
        index.set_write_counter(u64::MAX - 2);

        index.advance_write(6);
        assert_eq!(index.write_counter(), 3);
        assert_eq!(index.available_to_read(), 6);

        index.advance_read(6);
        assert_eq!(index.available_to_read(), 0);
        assert_eq!(index.available_to_write(), 8);
    }

    #[test]
    fn test_reset() {
        let index = LocalIndex::new(4).unwrap();
        index.advance_write(3);
        index.advance_read(1);
        index.reset();

        assert_eq!(index.read_counter(), 0);
        assert_eq!(index.write_counter(), 0);
        assert_eq!(index.available_to_write(), 4);
    }

    #[test]
    fn test_indirect_index_uses_external_counters() {
        let counters = SharedCounters::new();
        let producer = IndirectIndex::from_counters(16, &counters).unwrap();
        let consumer = IndirectIndex::from_counters(16, &counters).unwrap();

        producer.advance_write(5);
        assert_eq!(consumer.available_to_read(), 5);
        assert_eq!(counters.write.load(Ordering::Acquire), 5);

        consumer.advance_read(2);
        assert_eq!(producer.available_to_write(), 13);
        assert_eq!(counters.read.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_indirect_index_over_loose_atomics() {
        let read = AtomicU64::new(10);
        let write = AtomicU64::new(12);
        let index = IndirectIndex::new(4, &read, &write).unwrap();

        assert_eq!(index.available_to_read(), 2);
        assert_eq!(index.read_index(), 2);
        assert_eq!(index.write_index(), 0);
    }

    #[test]
    fn test_counters_are_cache_line_separated() {
        assert!(std::mem::size_of::<SharedCounters>() >= 128);
        assert_eq!(std::mem::align_of::<SharedCounters>(), 64);
    }
}
