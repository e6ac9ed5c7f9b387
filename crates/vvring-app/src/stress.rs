//! Sequence stress test
//!
//! One producer thread pushes 0, 1, 2, ... and the consumer on the calling
//! thread checks that every value arrives exactly once and in order. The
//! producer retries on full, so nothing is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use vvring_comms::{TypedQueue, command_fifo};
use vvring_fifo::RingBuffer;

use crate::config::StressSettings;
use crate::report::{SequenceRun, StressReport};

/// Frames read per consumer poll in the frame ring run
const READ_BATCH: usize = 256;

pub fn run(settings: &StressSettings) -> Result<StressReport> {
    tracing::info!(
        capacity = settings.capacity,
        iterations = settings.iterations,
        "Starting stress test"
    );

    let runs = vec![
        queue_run(settings.capacity, settings.iterations)?,
        frame_ring_run(settings.capacity, settings.iterations)?,
        command_run(settings.capacity, settings.iterations)?,
    ];

    Ok(StressReport {
        capacity: settings.capacity,
        runs,
    })
}

/// `TypedQueue<u64>` with batch pops
pub fn queue_run(capacity: usize, iterations: u64) -> Result<SequenceRun> {
    let (mut tx, mut rx) = TypedQueue::new(capacity).context("Failed to create queue")?;

    drive(
        "TypedQueue",
        iterations,
        move |value| tx.push(value),
        move |sink| {
            let mut count = 0;
            for value in rx.pop_all() {
                sink(value);
                count += 1;
            }
            count
        },
    )
}

/// Byte ring with one `u64` per frame
pub fn frame_ring_run(capacity: usize, iterations: u64) -> Result<SequenceRun> {
    let ring = RingBuffer::new(size_of::<u64>(), capacity).context("Failed to create ring")?;
    let (mut tx, mut rx) = ring.split();
    let mut bytes = vec![0u8; READ_BATCH * size_of::<u64>()];

    drive(
        "RingBuffer",
        iterations,
        move |value| tx.write(&value.to_le_bytes(), 1).is_ok_and(|written| written == 1),
        move |sink| {
            let frames = rx.read(&mut bytes, READ_BATCH).unwrap_or(0);
            for chunk in bytes[..frames * size_of::<u64>()].chunks_exact(size_of::<u64>()) {
                let mut word = [0u8; size_of::<u64>()];
                word.copy_from_slice(chunk);
                sink(u64::from_le_bytes(word));
            }
            frames
        },
    )
}

/// Command FIFO whose commands report their value into the context
pub fn command_run(capacity: usize, iterations: u64) -> Result<SequenceRun> {
    let (mut tx, mut rx) = command_fifo::<Vec<u64>>(capacity).context("Failed to create command fifo")?;
    // Never holds more than one queue's worth
    let mut seen = Vec::with_capacity(capacity);

    drive(
        "CommandFifo",
        iterations,
        move |value| tx.push(move |seen: &mut Vec<u64>| seen.push(value)),
        move |sink| {
            seen.clear();
            let count = rx.call(&mut seen);
            for value in seen.drain(..) {
                sink(value);
            }
            count
        },
    )
}

/// Run a producer thread against a consumer loop on this thread.
///
/// `try_push` returns false when the structure is full. `drain` hands every
/// available value to the sink and returns how many it handed over.
pub fn drive<P, C>(structure: &str, iterations: u64, mut try_push: P, mut drain: C) -> Result<SequenceRun>
where
    P: FnMut(u64) -> bool + Send + 'static,
    C: FnMut(&mut dyn FnMut(u64)) -> usize,
{
    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);

    let start = Instant::now();
    let producer = {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name(format!("{structure}-producer"))
            .spawn(move || {
                let mut full_retries = 0u64;
                let mut next = 0;
                while next < iterations && !stop.load(Ordering::Relaxed) {
                    if try_push(next) {
                        next += 1;
                    } else {
                        full_retries += 1;
                        thread::yield_now();
                    }
                }
                // Receiver only disappears if the consumer already failed
                let _ = done_tx.send(full_retries);
            })
            .context("Failed to spawn producer thread")?
    };

    let mut expected = 0u64;
    let mut empty_polls = 0u64;
    let mut mismatch = None;
    while expected < iterations && mismatch.is_none() {
        let received = drain(&mut |value| {
            if value != expected && mismatch.is_none() {
                mismatch = Some((expected, value));
            }
            expected += 1;
        });

        if received == 0 {
            empty_polls += 1;
            thread::yield_now();
        }
    }
    let elapsed = start.elapsed();

    stop.store(true, Ordering::Relaxed);
    producer
        .join()
        .map_err(|_| anyhow!("{structure} producer thread panicked"))?;

    if let Some((expected, got)) = mismatch {
        bail!("{structure}: sequence broken, expected {expected} but got {got}");
    }

    let full_retries = done_rx
        .recv()
        .with_context(|| format!("{structure} producer exited without reporting"))?;

    tracing::debug!(structure, ?elapsed, full_retries, empty_polls, "Sequence verified");

    Ok(SequenceRun {
        structure: structure.to_string(),
        items: iterations,
        elapsed,
        full_retries,
        empty_polls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_sequence() {
        let run = queue_run(16, 50_000).unwrap();
        assert_eq!(run.items, 50_000);
        assert_eq!(run.structure, "TypedQueue");
    }

    #[test]
    fn test_frame_ring_sequence() {
        // Capacity deliberately not a power of two
        let run = frame_ring_run(100, 50_000).unwrap();
        assert_eq!(run.items, 50_000);
    }

    #[test]
    fn test_command_sequence() {
        let run = command_run(32, 20_000).unwrap();
        assert_eq!(run.items, 20_000);
    }

    #[test]
    fn test_broken_sequence_is_reported() {
        let mut values = vec![0u64, 1, 3];
        let err = drive(
            "Broken",
            3,
            |_| true,
            move |sink| {
                let batch = std::mem::take(&mut values);
                let count = batch.len();
                batch.into_iter().for_each(&mut *sink);
                count
            },
        )
        .unwrap_err();

        assert!(err.to_string().contains("expected 2 but got 3"));
    }

    #[test]
    fn test_run_reports_every_structure() {
        let report = run(&StressSettings {
            capacity: 8,
            iterations: 1000,
        })
        .unwrap();
        let names: Vec<_> = report.runs.iter().map(|r| r.structure.as_str()).collect();
        assert_eq!(names, vec!["TypedQueue", "RingBuffer", "CommandFifo"]);
    }
}
