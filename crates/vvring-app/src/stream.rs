//! Simulated audio stream
//!
//! A producer thread renders a sine tone into a frame ring at roughly the
//! stream rate. The calling thread plays the audio callback: once per block
//! period it pulls a fixed block with `read_samples_with_zero_fill`, so a
//! late producer shows up as underruns rather than a stall.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, ensure};
use dasp::{Sample as _, Signal};
use hound::{WavSpec, WavWriter};
use vvring_core::Sample;
use vvring_fifo::{FrameProducer, RingBuffer};

use crate::config::StreamSettings;
use crate::report::StreamReport;

/// Longest wait for the producer to fill the first block
const PREFILL_TIMEOUT: Duration = Duration::from_secs(1);

pub fn run(settings: &StreamSettings) -> Result<StreamReport> {
    ensure!(settings.channels > 0, "Channel count must be positive");
    ensure!(settings.block_size > 0, "Block size must be positive");
    ensure!(settings.sample_rate > 0, "Sample rate must be positive");
    ensure!(
        settings.producer_speed > 0.0,
        "Producer speed must be positive"
    );

    let ring = RingBuffer::for_samples(settings.channels, settings.capacity)
        .context("Failed to create stream ring")?;
    let (tx, mut rx) = ring.split();

    let total_frames = settings.blocks * settings.block_size;
    let block_period =
        Duration::from_secs_f64(settings.block_size as f64 / f64::from(settings.sample_rate));

    tracing::info!(
        sample_rate = settings.sample_rate,
        channels = settings.channels,
        block_size = settings.block_size,
        blocks = settings.blocks,
        capacity = settings.capacity,
        "Starting stream"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let producer = {
        let stop = Arc::clone(&stop);
        let settings = settings.clone();
        thread::Builder::new()
            .name(String::from("tone-producer"))
            .spawn(move || render_tone(tx, &settings, total_frames, &stop))
            .context("Failed to spawn producer thread")?
    };

    // Let the first block arrive before the "device" starts
    let prefill = settings.block_size.min(settings.capacity);
    let prefill_deadline = Instant::now() + PREFILL_TIMEOUT;
    while rx.available_to_read() < prefill && Instant::now() < prefill_deadline {
        thread::sleep(Duration::from_micros(200));
    }

    let mut block = vec![0.0; settings.block_size * settings.channels];
    let mut captured = Vec::with_capacity(if settings.record.is_some() {
        total_frames * settings.channels
    } else {
        0
    });
    let mut short_blocks = 0;
    let mut peak: Sample = 0.0;

    let mut next_callback = Instant::now();
    for _ in 0..settings.blocks {
        next_callback += block_period;

        let frames = rx.read_samples_with_zero_fill(&mut block)?;
        if frames < settings.block_size {
            short_blocks += 1;
        }
        peak = block.iter().fold(peak, |peak, sample| peak.max(sample.abs()));
        if settings.record.is_some() {
            captured.extend_from_slice(&block);
        }

        if let Some(wait) = next_callback.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    stop.store(true, Ordering::Relaxed);
    let produced = producer
        .join()
        .map_err(|_| anyhow!("Producer thread panicked"))??;

    let stats = rx.stats();
    tracing::debug!(
        produced,
        frames_read = stats.frames_read,
        underrun_frames = stats.underrun_frames,
        "Stream finished"
    );
    if stats.underrun_frames > 0 {
        tracing::warn!(
            underrun_frames = stats.underrun_frames,
            short_blocks,
            "Producer fell behind"
        );
    }

    let recorded = match &settings.record {
        Some(path) => {
            write_wav(path, &captured, settings)?;
            tracing::info!(path = %path.display(), "Recorded stream");
            Some(path.display().to_string())
        }
        None => None,
    };

    Ok(StreamReport {
        sample_rate: settings.sample_rate,
        channels: settings.channels,
        block_size: settings.block_size,
        blocks: settings.blocks,
        frames_read: stats.frames_read,
        underrun_frames: stats.underrun_frames,
        short_blocks,
        peak,
        recorded,
    })
}

/// Producer side: write the tone in half-block chunks, pacing itself to
/// `producer_speed` times the stream rate. Returns the frames written.
fn render_tone(
    mut tx: FrameProducer,
    settings: &StreamSettings,
    total_frames: usize,
    stop: &AtomicBool,
) -> vvring_core::Result<usize> {
    let channels = settings.channels;
    let chunk_frames = (settings.block_size / 2).max(1);
    let chunk_period = Duration::from_secs_f64(
        chunk_frames as f64 / f64::from(settings.sample_rate) / settings.producer_speed,
    );

    let mut tone = dasp::signal::rate(f64::from(settings.sample_rate))
        .const_hz(settings.frequency)
        .sine();
    let mut chunk = vec![0.0; chunk_frames * channels];

    let mut produced = 0;
    while produced < total_frames && !stop.load(Ordering::Relaxed) {
        let frames = chunk_frames.min(total_frames - produced);
        for frame in chunk.chunks_exact_mut(channels).take(frames) {
            frame.fill(tone.next() as Sample * settings.amplitude);
        }

        let mut offset = 0;
        while offset < frames && !stop.load(Ordering::Relaxed) {
            let written = tx.write_samples(&chunk[offset * channels..frames * channels])?;
            offset += written;
            if written == 0 {
                thread::sleep(Duration::from_micros(100));
            }
        }
        produced += offset;

        thread::sleep(chunk_period);
    }

    Ok(produced)
}

/// Write interleaved samples as 16-bit PCM
fn write_wav(path: &Path, samples: &[Sample], settings: &StreamSettings) -> Result<()> {
    let spec = WavSpec {
        channels: u16::try_from(settings.channels).context("Too many channels for WAV")?,
        sample_rate: settings.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;

    for &sample in samples {
        writer
            .write_sample(sample.clamp(-1.0, 1.0).to_sample::<i16>())
            .context("Failed to write 16-bit sample")?;
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StreamSettings {
        StreamSettings {
            channels: 2,
            block_size: 64,
            blocks: 8,
            capacity: 512,
            ..StreamSettings::default()
        }
    }

    #[test]
    fn test_every_requested_frame_is_accounted_for() {
        let report = run(&settings()).unwrap();
        assert_eq!(report.frames_read + report.underrun_frames, 8 * 64);
        assert!(report.peak <= 0.5 + f32::EPSILON);
    }

    #[test]
    fn test_slow_producer_underruns() {
        let report = run(&StreamSettings {
            producer_speed: 0.02,
            ..settings()
        })
        .unwrap();

        assert!(report.underrun_frames > 0);
        assert!(report.short_blocks > 0);
        assert_eq!(report.frames_read + report.underrun_frames, 8 * 64);
    }

    #[test]
    fn test_recording_writes_every_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let report = run(&StreamSettings {
            record: Some(path.clone()),
            ..settings()
        })
        .unwrap();
        assert!(report.recorded.is_some());

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(reader.len(), 8 * 64 * 2);
    }

    #[test]
    fn test_zero_channels_rejected() {
        let result = run(&StreamSettings {
            channels: 0,
            ..settings()
        });
        assert!(result.is_err());
    }
}
