//! Frame-oriented byte ring buffer.
//!
//! Translates frame counts into byte offsets and moves data with at most two
//! `memcpy`s per call: one up to the end of the backing array and one from
//! its start when the span wraps. No call blocks or allocates.
//!
//! A [`RingBuffer`] can be used from a single thread through `&mut self`, or
//! [`split`](RingBuffer::split) into a [`FrameProducer`] and a
//! [`FrameConsumer`] that can be moved to two different threads.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use vvring_core::{ChannelCount, Counter, Error, Frames, Result, Sample, frames_to_bytes};

use crate::index::{LocalIndex, RingIndex};

/// Backing bytes for a [`RingBuffer`].
///
/// # Safety
///
/// `as_mut_ptr` must return a pointer valid for reads and writes of `len`
/// bytes for as long as the storage value lives, and writes through it from
/// `&self` must not violate aliasing rules (the bytes sit behind an
/// `UnsafeCell` or are otherwise not referenced by anyone else).
#[allow(unsafe_code)]
pub unsafe trait FrameStorage: Send + Sync {
    /// Base address of the storage
    fn as_mut_ptr(&self) -> *mut u8;

    /// Size of the storage in bytes
    fn len(&self) -> usize;

    /// True for zero-sized storage
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Heap storage owned by the buffer, freed when the buffer drops.
pub struct OwnedStorage {
    bytes: Box<[UnsafeCell<u8>]>,
}

impl OwnedStorage {
    /// Allocate `len` zeroed bytes
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: (0..len).map(|_| UnsafeCell::new(0)).collect(),
        }
    }
}

// SAFETY: The bytes are only reached through raw pointers handed out by
// `as_mut_ptr`; the ring protocol keeps producer and consumer on disjoint
// regions.
#[allow(unsafe_code)]
unsafe impl Sync for OwnedStorage {}

#[allow(unsafe_code)]
unsafe impl FrameStorage for OwnedStorage {
    fn as_mut_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.bytes.as_ptr())
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Storage borrowed from the caller, who keeps ownership and frees it after
/// the buffer is gone.
pub struct BorrowedStorage<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _borrow: PhantomData<&'a mut [u8]>,
}

impl<'a> BorrowedStorage<'a> {
    /// Borrow a byte slice exclusively for the lifetime of the buffer
    pub fn from_slice(bytes: &'a mut [u8]) -> Self {
        Self {
            ptr: NonNull::from(&mut *bytes).cast::<u8>(),
            len: bytes.len(),
            _borrow: PhantomData,
        }
    }

    /// Use memory the borrow checker cannot see, such as a mapped region.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for `'a`, and
    /// nothing else may access those bytes except through the ring protocol.
    #[allow(unsafe_code)]
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            _borrow: PhantomData,
        }
    }
}

// SAFETY: Equivalent to holding `&'a mut [u8]`, which is Send and Sync.
#[allow(unsafe_code)]
unsafe impl Send for BorrowedStorage<'_> {}
#[allow(unsafe_code)]
unsafe impl Sync for BorrowedStorage<'_> {}

#[allow(unsafe_code)]
unsafe impl FrameStorage for BorrowedStorage<'_> {
    fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Read-side diagnostics, owned by whoever consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Frames actually delivered by `read_with_zero_fill`
    pub frames_read: u64,
    /// Frames substituted with silence by `read_with_zero_fill`
    pub underrun_frames: u64,
}

/// State shared by the producer and consumer halves.
struct FrameRing<I, S> {
    index: I,
    storage: S,
    bytes_per_frame: usize,
}

impl<I: RingIndex, S: FrameStorage> FrameRing<I, S> {
    fn capacity(&self) -> Frames {
        self.index.capacity()
    }

    /// Copy up to `frames` frames from `src` into the ring.
    ///
    /// # Safety
    ///
    /// No other thread may call `write` concurrently.
    #[allow(unsafe_code)]
    unsafe fn write(&self, src: &[u8], frames: Frames) -> Result<Frames> {
        let frames = frames.min(src.len() / self.bytes_per_frame);
        if frames == 0 {
            return Ok(0);
        }

        let reservation = self.index.prepare_to_write(frames);
        if reservation.is_empty() {
            return Ok(0);
        }

        let offset = frames_to_bytes(reservation.start1, self.bytes_per_frame)?;
        let first = frames_to_bytes(reservation.len1, self.bytes_per_frame)?;
        let second = frames_to_bytes(reservation.len2, self.bytes_per_frame)?;
        let base = self.storage.as_mut_ptr();

        // SAFETY: The reservation lies inside [0, capacity) frames, storage
        // holds capacity * bytes_per_frame bytes (checked at construction),
        // and `src` holds at least first + second bytes. The reserved region
        // belongs to the producer until the write counter is published.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), base.add(offset), first);
            if second > 0 {
                ptr::copy_nonoverlapping(src.as_ptr().add(first), base, second);
            }
        }

        self.index.finished_write(reservation.len());
        Ok(reservation.len())
    }

    /// Copy up to `frames` frames out of the ring into `dst`.
    ///
    /// # Safety
    ///
    /// No other thread may call `read` concurrently.
    #[allow(unsafe_code)]
    unsafe fn read(&self, dst: &mut [u8], frames: Frames) -> Result<Frames> {
        let frames = frames.min(dst.len() / self.bytes_per_frame);
        if frames == 0 {
            return Ok(0);
        }

        let reservation = self.index.prepare_to_read(frames);
        if reservation.is_empty() {
            return Ok(0);
        }

        let offset = frames_to_bytes(reservation.start1, self.bytes_per_frame)?;
        let first = frames_to_bytes(reservation.len1, self.bytes_per_frame)?;
        let second = frames_to_bytes(reservation.len2, self.bytes_per_frame)?;
        let base = self.storage.as_mut_ptr();

        // SAFETY: Mirror of `write`; the reserved region was published by the
        // producer and belongs to the consumer until the read counter moves.
        unsafe {
            ptr::copy_nonoverlapping(base.add(offset).cast_const(), dst.as_mut_ptr(), first);
            if second > 0 {
                ptr::copy_nonoverlapping(
                    base.cast_const(),
                    dst.as_mut_ptr().add(first),
                    second,
                );
            }
        }

        self.index.finished_read(reservation.len());
        Ok(reservation.len())
    }

    /// `read`, then silence whatever could not be delivered.
    ///
    /// # Safety
    ///
    /// Same contract as `read`.
    #[allow(unsafe_code)]
    unsafe fn read_with_zero_fill(
        &self,
        dst: &mut [u8],
        frames: Frames,
        stats: &mut ReadStats,
    ) -> Result<Frames> {
        let frames = frames.min(dst.len() / self.bytes_per_frame);
        if frames == 0 {
            return Ok(0);
        }

        // SAFETY: forwarded contract
        let read = unsafe { self.read(dst, frames)? };

        let start = frames_to_bytes(read, self.bytes_per_frame)?;
        let end = frames_to_bytes(frames, self.bytes_per_frame)?;
        dst[start..end].fill(0);

        stats.frames_read += read as u64;
        stats.underrun_frames += (frames - read) as u64;
        Ok(read)
    }
}

#[allow(unsafe_code)]
fn as_bytes(samples: &[Sample]) -> &[u8] {
    // SAFETY: f32 has no padding and any byte view of it is valid to read
    unsafe {
        std::slice::from_raw_parts(samples.as_ptr().cast::<u8>(), size_of::<Sample>() * samples.len())
    }
}

#[allow(unsafe_code)]
fn as_bytes_mut(samples: &mut [Sample]) -> &mut [u8] {
    // SAFETY: every bit pattern is a valid f32, so arbitrary bytes may be written
    unsafe {
        std::slice::from_raw_parts_mut(
            samples.as_mut_ptr().cast::<u8>(),
            size_of::<Sample>() * samples.len(),
        )
    }
}

/// Fixed-capacity frame ring with wraparound-safe copies.
pub struct RingBuffer<I: RingIndex = LocalIndex, S: FrameStorage = OwnedStorage> {
    ring: Arc<FrameRing<I, S>>,
    stats: ReadStats,
}

impl RingBuffer {
    /// Create a buffer of `capacity` frames of `bytes_per_frame` bytes each
    #[allow(unsafe_code)]
    pub fn new(bytes_per_frame: usize, capacity: Frames) -> Result<Self> {
        let index = LocalIndex::new(capacity)?;
        let bytes = storage_bytes(bytes_per_frame, capacity)?;
        tracing::debug!(
            bytes_per_frame,
            capacity,
            bytes,
            "Allocating ring buffer storage"
        );

        // SAFETY: The index is freshly created and owned by the buffer alone
        unsafe {
            Self::from_parts(index, OwnedStorage::zeroed(bytes), bytes_per_frame)
        }
    }

    /// Create a buffer of interleaved `f32` frames with `channels` channels
    pub fn for_samples(channels: ChannelCount, capacity: Frames) -> Result<Self> {
        let bytes_per_frame = channels
            .checked_mul(size_of::<Sample>())
            .ok_or(Error::InvalidFrameSize)?;
        Self::new(bytes_per_frame, capacity)
    }
}

impl<'a> RingBuffer<LocalIndex, BorrowedStorage<'a>> {
    /// Use caller-owned storage; the capacity is however many whole frames fit
    #[allow(unsafe_code)]
    pub fn with_storage(bytes_per_frame: usize, storage: &'a mut [u8]) -> Result<Self> {
        if bytes_per_frame == 0 {
            return Err(Error::InvalidFrameSize);
        }
        let index = LocalIndex::new(storage.len() / bytes_per_frame)?;

        // SAFETY: The index is freshly created and owned by the buffer alone
        unsafe {
            Self::from_parts(index, BorrowedStorage::from_slice(storage), bytes_per_frame)
        }
    }
}

fn storage_bytes(bytes_per_frame: usize, capacity: Frames) -> Result<usize> {
    if bytes_per_frame == 0 {
        return Err(Error::InvalidFrameSize);
    }
    if capacity == 0 {
        return Err(Error::InvalidCapacity);
    }
    frames_to_bytes(capacity, bytes_per_frame)
}

impl<I: RingIndex, S: FrameStorage> RingBuffer<I, S> {
    /// Assemble a buffer from an index controller and storage.
    ///
    /// # Safety
    ///
    /// Only this buffer (or its split halves) may advance the counters behind
    /// `index`, apart from one cooperating peer that strictly plays the other
    /// role (for example a reader in another process).
    #[allow(unsafe_code)]
    pub unsafe fn from_parts(index: I, storage: S, bytes_per_frame: usize) -> Result<Self> {
        let expected = storage_bytes(bytes_per_frame, index.capacity())?;
        if storage.len() < expected {
            return Err(Error::StorageSize {
                expected,
                actual: storage.len(),
            });
        }

        Ok(Self {
            ring: Arc::new(FrameRing {
                index,
                storage,
                bytes_per_frame,
            }),
            stats: ReadStats::default(),
        })
    }

    /// Copy up to `frames` frames from `src`; returns frames written
    #[allow(unsafe_code)]
    pub fn write(&mut self, src: &[u8], frames: Frames) -> Result<Frames> {
        // SAFETY: `&mut self` on an unsplit buffer rules out a concurrent writer
        unsafe { self.ring.write(src, frames) }
    }

    /// Copy up to `frames` frames into `dst`; returns frames read
    #[allow(unsafe_code)]
    pub fn read(&mut self, dst: &mut [u8], frames: Frames) -> Result<Frames> {
        // SAFETY: `&mut self` on an unsplit buffer rules out a concurrent reader
        unsafe { self.ring.read(dst, frames) }
    }

    /// Read, then zero the frames that were not available
    #[allow(unsafe_code)]
    pub fn read_with_zero_fill(&mut self, dst: &mut [u8], frames: Frames) -> Result<Frames> {
        // SAFETY: as in `read`
        unsafe { self.ring.read_with_zero_fill(dst, frames, &mut self.stats) }
    }

    /// Write interleaved samples; returns frames written
    pub fn write_samples(&mut self, samples: &[Sample]) -> Result<Frames> {
        let bytes = as_bytes(samples);
        let frames = bytes.len() / self.bytes_per_frame();
        self.write(bytes, frames)
    }

    /// Fill `samples` with interleaved frames, silencing any shortfall
    pub fn read_samples_with_zero_fill(&mut self, samples: &mut [Sample]) -> Result<Frames> {
        let bytes = as_bytes_mut(samples);
        let frames = bytes.len() / self.bytes_per_frame();
        self.read_with_zero_fill(bytes, frames)
    }

    /// Make the buffer appear empty and clear the diagnostics
    pub fn reset(&mut self) {
        self.ring.index.reset();
        self.stats = ReadStats::default();
    }

    /// Separate the buffer into its producer and consumer halves
    pub fn split(self) -> (FrameProducer<I, S>, FrameConsumer<I, S>) {
        let producer = FrameProducer {
            ring: Arc::clone(&self.ring),
        };
        let consumer = FrameConsumer {
            ring: self.ring,
            stats: self.stats,
        };
        (producer, consumer)
    }

    /// Read-side diagnostics
    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    /// Frames delivered by `read_with_zero_fill` so far
    pub fn frames_read_count(&self) -> u64 {
        self.stats.frames_read
    }

    /// Frames replaced with silence by `read_with_zero_fill` so far
    pub fn underrun_count(&self) -> u64 {
        self.stats.underrun_frames
    }

    /// Fixed capacity in frames
    pub fn capacity_in_frames(&self) -> Frames {
        self.ring.capacity()
    }

    /// Size of one frame in bytes
    pub fn bytes_per_frame(&self) -> usize {
        self.ring.bytes_per_frame
    }

    /// Frames ready to be read
    pub fn available_to_read(&self) -> Frames {
        self.ring.index.available_to_read()
    }

    /// Frames that can be written
    pub fn available_to_write(&self) -> Frames {
        self.ring.index.available_to_write()
    }

    /// Total frames consumed
    pub fn read_counter(&self) -> Counter {
        self.ring.index.read_counter()
    }

    /// Total frames produced
    pub fn write_counter(&self) -> Counter {
        self.ring.index.write_counter()
    }
}

/// Writing half of a split [`RingBuffer`].
pub struct FrameProducer<I: RingIndex = LocalIndex, S: FrameStorage = OwnedStorage> {
    ring: Arc<FrameRing<I, S>>,
}

impl<I: RingIndex, S: FrameStorage> FrameProducer<I, S> {
    /// Copy up to `frames` frames from `src`; returns frames written
    #[allow(unsafe_code)]
    pub fn write(&mut self, src: &[u8], frames: Frames) -> Result<Frames> {
        // SAFETY: the producer is not Clone and `write` takes `&mut self`
        unsafe { self.ring.write(src, frames) }
    }

    /// Write interleaved samples; returns frames written
    pub fn write_samples(&mut self, samples: &[Sample]) -> Result<Frames> {
        let bytes = as_bytes(samples);
        let frames = bytes.len() / self.ring.bytes_per_frame;
        self.write(bytes, frames)
    }

    /// Frames that can be written right now
    pub fn available_to_write(&self) -> Frames {
        self.ring.index.available_to_write()
    }

    /// Fixed capacity in frames
    pub fn capacity_in_frames(&self) -> Frames {
        self.ring.capacity()
    }

    /// Size of one frame in bytes
    pub fn bytes_per_frame(&self) -> usize {
        self.ring.bytes_per_frame
    }

    /// Total frames produced
    pub fn write_counter(&self) -> Counter {
        self.ring.index.write_counter()
    }
}

/// Reading half of a split [`RingBuffer`].
pub struct FrameConsumer<I: RingIndex = LocalIndex, S: FrameStorage = OwnedStorage> {
    ring: Arc<FrameRing<I, S>>,
    stats: ReadStats,
}

impl<I: RingIndex, S: FrameStorage> FrameConsumer<I, S> {
    /// Copy up to `frames` frames into `dst`; returns frames read
    #[allow(unsafe_code)]
    pub fn read(&mut self, dst: &mut [u8], frames: Frames) -> Result<Frames> {
        // SAFETY: the consumer is not Clone and `read` takes `&mut self`
        unsafe { self.ring.read(dst, frames) }
    }

    /// Read, then zero the frames that were not available
    #[allow(unsafe_code)]
    pub fn read_with_zero_fill(&mut self, dst: &mut [u8], frames: Frames) -> Result<Frames> {
        // SAFETY: as in `read`
        unsafe { self.ring.read_with_zero_fill(dst, frames, &mut self.stats) }
    }

    /// Fill `samples` with interleaved frames, silencing any shortfall
    pub fn read_samples_with_zero_fill(&mut self, samples: &mut [Sample]) -> Result<Frames> {
        let bytes = as_bytes_mut(samples);
        let frames = bytes.len() / self.ring.bytes_per_frame;
        self.read_with_zero_fill(bytes, frames)
    }

    /// Read-side diagnostics
    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    /// Frames delivered by `read_with_zero_fill` so far
    pub fn frames_read_count(&self) -> u64 {
        self.stats.frames_read
    }

    /// Frames replaced with silence by `read_with_zero_fill` so far
    pub fn underrun_count(&self) -> u64 {
        self.stats.underrun_frames
    }

    /// Frames ready to be read right now
    pub fn available_to_read(&self) -> Frames {
        self.ring.index.available_to_read()
    }

    /// Fixed capacity in frames
    pub fn capacity_in_frames(&self) -> Frames {
        self.ring.capacity()
    }

    /// Size of one frame in bytes
    pub fn bytes_per_frame(&self) -> usize {
        self.ring.bytes_per_frame
    }

    /// Total frames consumed
    pub fn read_counter(&self) -> Counter {
        self.ring.index.read_counter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndirectIndex, SharedCounters};

    /// Frames of 4 bytes each, every byte set to the frame number
    fn pattern(first: u8, frames: usize) -> Vec<u8> {
        (0..frames)
            .flat_map(|i| [first.wrapping_add(i as u8); 4])
            .collect()
    }

    #[test]
    fn test_invalid_construction() {
        assert!(matches!(RingBuffer::new(0, 16), Err(Error::InvalidFrameSize)));
        assert!(matches!(RingBuffer::new(4, 0), Err(Error::InvalidCapacity)));
        assert!(matches!(
            RingBuffer::new(usize::MAX / 2, 4),
            Err(Error::ByteCountOverflow { .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        let mut ring = RingBuffer::new(4, 16).unwrap();
        let data = pattern(1, 10);

        assert_eq!(ring.write(&data, 10).unwrap(), 10);
        assert_eq!(ring.available_to_read(), 10);

        let mut out = vec![0u8; 40];
        assert_eq!(ring.read(&mut out, 10).unwrap(), 10);
        assert_eq!(out, data);
        assert_eq!(ring.available_to_read(), 0);
    }

    #[test]
    fn test_zero_frames_is_a_no_op() {
        let mut ring = RingBuffer::new(4, 8).unwrap();
        let data = pattern(1, 2);

        assert_eq!(ring.write(&data, 0).unwrap(), 0);
        assert_eq!(ring.write_counter(), 0);

        let mut out = [7u8; 8];
        assert_eq!(ring.read_with_zero_fill(&mut out, 0).unwrap(), 0);
        assert_eq!(out, [7u8; 8]);
        assert_eq!(ring.stats(), ReadStats::default());
    }

    #[test]
    fn test_no_over_write() {
        let mut ring = RingBuffer::new(4, 8).unwrap();
        let data = pattern(0, 20);

        assert_eq!(ring.write(&data, 20).unwrap(), 8);
        assert_eq!(ring.available_to_write(), 0);
        assert_eq!(ring.write(&data, 1).unwrap(), 0);
    }

    #[test]
    fn test_no_over_read() {
        let mut ring = RingBuffer::new(4, 8).unwrap();
        ring.write(&pattern(0, 8), 8).unwrap();

        let mut out = vec![0u8; 4 * 20];
        assert_eq!(ring.read(&mut out, 20).unwrap(), 8);
        assert_eq!(&out[..32], pattern(0, 8).as_slice());
        assert!(out[32..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_short_slices_clamp_frame_count() {
        let mut ring = RingBuffer::new(4, 8).unwrap();
        let data = pattern(0, 2);

        // Asking for more frames than the slice holds only writes what is there
        assert_eq!(ring.write(&data, 5).unwrap(), 2);

        let mut out = [0u8; 6];
        assert_eq!(ring.read(&mut out, 2).unwrap(), 1);
        assert_eq!(ring.available_to_read(), 1);
    }

    #[test]
    fn test_capacity_invariant_across_operations() {
        let mut ring = RingBuffer::new(4, 7).unwrap();
        let mut out = vec![0u8; 4 * 7];

        for (write, read) in [(5, 2), (4, 6), (7, 1), (3, 7), (0, 3)] {
            ring.write(&pattern(0, write), write).unwrap();
            assert_eq!(ring.available_to_read() + ring.available_to_write(), 7);
            ring.read(&mut out, read).unwrap();
            assert_eq!(ring.available_to_read() + ring.available_to_write(), 7);
        }
    }

    #[test]
    fn test_wraparound_split_copy() {
        let capacity = 8;
        let mut ring = RingBuffer::new(4, capacity).unwrap();
        let mut out = vec![0u8; 4 * capacity];

        ring.write(&pattern(0, capacity - 2), capacity - 2).unwrap();
        assert_eq!(ring.read(&mut out, capacity - 2).unwrap(), capacity - 2);

        // Straddles the end of the array: 2 frames at the tail, 3 at the head
        let data = pattern(50, 5);
        assert_eq!(ring.write(&data, 5).unwrap(), 5);

        let mut wrapped = vec![0u8; 20];
        assert_eq!(ring.read(&mut wrapped, 5).unwrap(), 5);
        assert_eq!(wrapped, data);
    }

    #[test]
    fn test_round_trip_with_odd_capacity() {
        let mut ring = RingBuffer::new(3, 5).unwrap();
        let mut out = vec![0u8; 15];

        for round in 0..20u8 {
            let data: Vec<u8> = (0..12).map(|i| round.wrapping_mul(7).wrapping_add(i)).collect();
            assert_eq!(ring.write(&data, 4).unwrap(), 4);
            assert_eq!(ring.read(&mut out, 4).unwrap(), 4);
            assert_eq!(&out[..12], data.as_slice());
        }
    }

    #[test]
    fn test_zero_fill_on_underrun() {
        let mut ring = RingBuffer::new(4, 8).unwrap();
        ring.write(&pattern(9, 3), 3).unwrap();

        let mut out = [0xAAu8; 4 * 5];
        assert_eq!(ring.read_with_zero_fill(&mut out, 5).unwrap(), 3);
        assert_eq!(&out[..12], pattern(9, 3).as_slice());
        assert_eq!(&out[12..], &[0u8; 8]);

        assert_eq!(ring.frames_read_count(), 3);
        assert_eq!(ring.underrun_count(), 2);
    }

    #[test]
    fn test_zero_fill_leaves_bytes_past_request_alone() {
        let mut ring = RingBuffer::new(4, 8).unwrap();

        let mut out = [0xAAu8; 4 * 4];
        assert_eq!(ring.read_with_zero_fill(&mut out, 2).unwrap(), 0);
        assert_eq!(&out[..8], &[0u8; 8]);
        assert_eq!(&out[8..], &[0xAAu8; 8]);
        assert_eq!(ring.underrun_count(), 2);
    }

    #[test]
    fn test_sample_helpers() {
        let mut ring = RingBuffer::for_samples(2, 4).unwrap();
        assert_eq!(ring.bytes_per_frame(), 8);

        let written = ring.write_samples(&[0.5, -0.5, 0.25, -0.25]).unwrap();
        assert_eq!(written, 2);

        let mut out = [1.0f32; 6];
        assert_eq!(ring.read_samples_with_zero_fill(&mut out).unwrap(), 2);
        assert_eq!(out, [0.5, -0.5, 0.25, -0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_borrowed_storage() {
        let mut backing = vec![0u8; 32];
        {
            let mut ring = RingBuffer::with_storage(8, &mut backing).unwrap();
            assert_eq!(ring.capacity_in_frames(), 4);
            ring.write(&[3u8; 8], 1).unwrap();
        }
        // The caller keeps the storage and sees what was written
        assert_eq!(&backing[..8], &[3u8; 8]);
    }

    #[test]
    #[allow(unsafe_code)]
    fn test_external_index_and_storage() {
        let counters = SharedCounters::new();
        let mut backing = vec![0u8; 4 * 4];
        let index = IndirectIndex::from_counters(4, &counters).unwrap();

        let mut ring =
            unsafe { RingBuffer::from_parts(index, BorrowedStorage::from_slice(&mut backing), 4) }
                .unwrap();

        ring.write(&pattern(1, 3), 3).unwrap();
        assert_eq!(counters.write.load(std::sync::atomic::Ordering::Acquire), 3);
    }

    #[test]
    #[allow(unsafe_code)]
    fn test_storage_too_small() {
        let index = LocalIndex::new(4).unwrap();
        let result = unsafe { RingBuffer::from_parts(index, OwnedStorage::zeroed(8), 4) };
        assert!(matches!(
            result,
            Err(Error::StorageSize {
                expected: 16,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_reset() {
        let mut ring = RingBuffer::new(4, 4).unwrap();
        ring.write(&pattern(0, 3), 3).unwrap();
        let mut out = [0u8; 16];
        ring.read_with_zero_fill(&mut out, 4).unwrap();

        ring.reset();
        assert_eq!(ring.available_to_read(), 0);
        assert_eq!(ring.available_to_write(), 4);
        assert_eq!(ring.stats(), ReadStats::default());
    }

    #[test]
    fn test_split_across_threads() {
        const FRAMES: usize = 100_000;
        let ring = RingBuffer::new(8, 64).unwrap();
        let (mut producer, mut consumer) = ring.split();

        let writer = std::thread::spawn(move || {
            let mut next = 0u64;
            while next < FRAMES as u64 {
                if producer.write(&next.to_le_bytes(), 1).unwrap() == 1 {
                    next += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0u64;
        let mut frame = [0u8; 8 * 16];
        while expected < FRAMES as u64 {
            let read = consumer.read(&mut frame, 16).unwrap();
            for chunk in frame[..read * 8].chunks_exact(8) {
                let value = u64::from_le_bytes(chunk.try_into().unwrap());
                assert_eq!(value, expected);
                expected += 1;
            }
        }

        writer.join().unwrap();
        assert_eq!(consumer.read_counter(), FRAMES as u64);
    }
}
