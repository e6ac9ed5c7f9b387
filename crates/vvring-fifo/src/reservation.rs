//! Two-block reservations over a ring index.
//!
//! A span of frames that runs past the end of the backing array is described
//! as two contiguous blocks: the tail of the array, then the head. Callers copy
//! into or out of both blocks and then commit the total.

use std::ops::Deref;

use crate::index::RingIndex;

/// Up to two contiguous ranges of physical indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reservation {
    /// Start of the first block
    pub start1: usize,
    /// Length of the first block
    pub len1: usize,
    /// Start of the second block (always the beginning of the array)
    pub start2: usize,
    /// Length of the second block; zero unless the span wraps
    pub len2: usize,
}

impl Reservation {
    /// Describe `count` frames starting at physical offset `start` in an
    /// array of `capacity` frames.
    pub(crate) fn starting_at(start: usize, count: usize, capacity: usize) -> Self {
        let len1 = count.min(capacity - start);
        Self {
            start1: start,
            len1,
            start2: 0,
            len2: count - len1,
        }
    }

    /// Total frames covered by both blocks
    pub fn len(&self) -> usize {
        self.len1 + self.len2
    }

    /// True when nothing could be reserved
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the span is split across the end of the array
    pub fn wraps(&self) -> bool {
        self.len2 > 0
    }

    /// Physical index of the `position`-th reserved frame
    pub fn index_at(&self, position: usize) -> Option<usize> {
        if position < self.len1 {
            Some(self.start1 + position)
        } else if position < self.len() {
            Some(self.start2 + position - self.len1)
        } else {
            None
        }
    }

    /// Every reserved physical index, in FIFO order
    pub fn indices(&self) -> impl Iterator<Item = usize> + use<> {
        (self.start1..self.start1 + self.len1).chain(self.start2..self.start2 + self.len2)
    }

    /// Call `f` with every reserved physical index, in FIFO order
    pub fn for_each(&self, f: impl FnMut(usize)) {
        self.indices().for_each(f);
    }
}

/// Write reservation that commits all reserved frames when dropped.
///
/// Fill every index the guard exposes before letting it go.
#[must_use = "the reservation is committed as soon as the guard is dropped"]
pub struct ScopedWrite<'a, I: RingIndex> {
    index: &'a I,
    reservation: Reservation,
}

impl<'a, I: RingIndex> ScopedWrite<'a, I> {
    pub(crate) fn new(index: &'a I, wanted: usize) -> Self {
        Self {
            index,
            reservation: index.prepare_to_write(wanted),
        }
    }
}

impl<I: RingIndex> Deref for ScopedWrite<'_, I> {
    type Target = Reservation;

    fn deref(&self) -> &Reservation {
        &self.reservation
    }
}

impl<I: RingIndex> Drop for ScopedWrite<'_, I> {
    fn drop(&mut self) {
        self.index.finished_write(self.reservation.len());
    }
}

/// Read reservation that releases all reserved frames when dropped.
#[must_use = "the reservation is released as soon as the guard is dropped"]
pub struct ScopedRead<'a, I: RingIndex> {
    index: &'a I,
    reservation: Reservation,
}

impl<'a, I: RingIndex> ScopedRead<'a, I> {
    pub(crate) fn new(index: &'a I, wanted: usize) -> Self {
        Self {
            index,
            reservation: index.prepare_to_read(wanted),
        }
    }
}

impl<I: RingIndex> Deref for ScopedRead<'_, I> {
    type Target = Reservation;

    fn deref(&self) -> &Reservation {
        &self.reservation
    }
}

impl<I: RingIndex> Drop for ScopedRead<'_, I> {
    fn drop(&mut self) {
        self.index.finished_read(self.reservation.len());
    }
}
