//! Run reports, printed as text or JSON

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Outcome of one subcommand
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Report {
    Stress(StressReport),
    Stream(StreamReport),
    Bench(BenchReport),
}

impl Report {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stress(report) => fmt::Display::fmt(report, f),
            Self::Stream(report) => fmt::Display::fmt(report, f),
            Self::Bench(report) => fmt::Display::fmt(report, f),
        }
    }
}

/// Result of pushing a sequence through one structure
#[derive(Debug, Clone, Serialize)]
pub struct SequenceRun {
    pub structure: String,
    pub items: u64,
    #[serde(with = "millis")]
    pub elapsed: Duration,
    /// Pushes or writes refused because the consumer was behind
    pub full_retries: u64,
    /// Pops or reads that found nothing
    pub empty_polls: u64,
}

impl SequenceRun {
    pub fn items_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.items as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for SequenceRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  {:<14} {:>10} items in {:>8.2?} ({:>12.0} items/s, {} full retries, {} empty polls)",
            self.structure,
            self.items,
            self.elapsed,
            self.items_per_second(),
            self.full_retries,
            self.empty_polls
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub capacity: usize,
    pub runs: Vec<SequenceRun>,
}

impl fmt::Display for StressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stress test (capacity {}): sequence intact", self.capacity)?;
        for run in &self.runs {
            writeln!(f, "{run}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub sample_rate: u32,
    pub channels: usize,
    pub block_size: usize,
    pub blocks: usize,
    pub frames_read: u64,
    pub underrun_frames: u64,
    /// Callbacks that had to pad with silence
    pub short_blocks: usize,
    pub peak: f32,
    pub recorded: Option<String>,
}

impl fmt::Display for StreamReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Stream: {} blocks of {} frames, {} ch @ {} Hz",
            self.blocks, self.block_size, self.channels, self.sample_rate
        )?;
        writeln!(f, "  Frames read:     {}", self.frames_read)?;
        writeln!(
            f,
            "  Underrun frames: {} ({} short blocks)",
            self.underrun_frames, self.short_blocks
        )?;
        writeln!(f, "  Peak level:      {:.3}", self.peak)?;
        if let Some(path) = &self.recorded {
            writeln!(f, "  Recorded to:     {path}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub capacity: usize,
    pub runs: Vec<SequenceRun>,
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Throughput (capacity {}):", self.capacity)?;
        for run in &self.runs {
            writeln!(f, "{run}")?;
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
    }
}
