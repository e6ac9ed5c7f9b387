//! Core types, constants, and the error type shared across the vvring crates.
//!
//! This crate has no knowledge of threads or atomics; it only defines the
//! vocabulary the FIFO and queue crates build on.

/// Number of audio frames (one sample per channel)
pub type Frames = usize;

/// Monotonic read/write position counter. Wraps at 2^64.
pub type Counter = u64;

/// Audio sample type used by the typed frame helpers
pub type Sample = f32;

/// Number of audio channels
pub type ChannelCount = usize;

/// Default capacities for the typed queues
pub mod capacities {
    /// Slots in a MIDI queue (enough for several seconds of dense controller data)
    pub const MIDI_QUEUE: usize = 1 << 14;
    /// Slots in a command queue
    pub const COMMAND_QUEUE: usize = 1024;
    /// Messages retained by a MIDI history for display
    pub const MIDI_HISTORY: usize = 1000;
}

/// Common block sizes used by the simulated audio callback
pub mod block_sizes {
    use super::Frames;

    /// 64 frames per block (very low latency, ~1.3ms @ 48kHz)
    pub const BLOCK_64: Frames = 64;
    /// 128 frames per block (low latency, ~2.7ms @ 48kHz)
    pub const BLOCK_128: Frames = 128;
    /// 256 frames per block (balanced, ~5.3ms @ 48kHz)
    pub const BLOCK_256: Frames = 256;
    /// 512 frames per block (higher latency, ~10.7ms @ 48kHz)
    pub const BLOCK_512: Frames = 512;
}

/// Common error type
///
/// Only construction and misconfiguration are reported through this type.
/// Full and empty buffers are normal outcomes and show up as short counts.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A ring or queue was requested with zero capacity
    #[error("Capacity must be a positive number of frames or slots")]
    InvalidCapacity,

    /// A frame buffer was requested with zero bytes per frame
    #[error("Bytes per frame must be positive")]
    InvalidFrameSize,

    /// Storage does not match `bytes_per_frame * capacity`
    #[error("Storage holds {actual} bytes but {expected} are required")]
    StorageSize {
        /// Bytes required by the frame layout
        expected: usize,
        /// Bytes actually supplied
        actual: usize,
    },

    /// A frame count converted to bytes does not fit in `isize`
    #[error("Byte count for {frames} frames of {bytes_per_frame} bytes overflows")]
    ByteCountOverflow {
        /// Frames requested
        frames: Frames,
        /// Size of one frame
        bytes_per_frame: usize,
    },

    /// Shared memory setup failed
    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Convert a frame count into a byte count, refusing anything that would not
/// fit in a signed pointer offset.
pub fn frames_to_bytes(frames: Frames, bytes_per_frame: usize) -> Result<usize> {
    frames
        .checked_mul(bytes_per_frame)
        .filter(|bytes| isize::try_from(*bytes).is_ok())
        .ok_or(Error::ByteCountOverflow {
            frames,
            bytes_per_frame,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_to_bytes() {
        assert_eq!(frames_to_bytes(256, 8).unwrap(), 2048);
        assert_eq!(frames_to_bytes(0, 8).unwrap(), 0);
    }

    #[test]
    fn test_frames_to_bytes_overflow() {
        let err = frames_to_bytes(usize::MAX / 2, 4).unwrap_err();
        assert!(matches!(err, Error::ByteCountOverflow { .. }));

        // Fits in usize but not in isize
        let err = frames_to_bytes(isize::MAX as usize, 2).unwrap_err();
        assert!(matches!(err, Error::ByteCountOverflow { .. }));
    }

    #[test]
    fn test_default_capacities_are_powers_of_two() {
        assert!(capacities::MIDI_QUEUE.is_power_of_two());
        assert!(capacities::COMMAND_QUEUE.is_power_of_two());
    }
}
