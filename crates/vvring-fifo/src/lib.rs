//! Lock-free single-producer/single-consumer FIFO primitives.
//!
//! This crate provides the building blocks for moving data between a
//! realtime audio thread and a control thread without blocking either one:
//!
//! - **Index controllers** ([`LocalIndex`], [`IndirectIndex`]): counter
//!   bookkeeping, with counters owned locally or stored elsewhere
//! - **Reservations** ([`Reservation`], [`ScopedWrite`], [`ScopedRead`]):
//!   the two-block view of a span that may wrap around the array end
//! - **Frame buffer** ([`RingBuffer`]): byte copies of whole frames, split
//!   into producer and consumer halves for cross-thread use
//! - **Shared memory** ([`SharedRing`], unix only): the same ring laid out in
//!   a named region so two processes can share it
//!
//! Data-path operations never block or allocate.

pub mod buffer;
pub mod index;
pub mod reservation;
#[cfg(unix)]
pub mod shm;

pub use buffer::{
    BorrowedStorage, FrameConsumer, FrameProducer, FrameStorage, OwnedStorage, ReadStats,
    RingBuffer,
};
pub use index::{CachePadded, IndirectIndex, LocalIndex, RingIndex, SharedCounters};
pub use reservation::{Reservation, ScopedRead, ScopedWrite};
#[cfg(unix)]
pub use shm::{SharedRegion, SharedRing};
