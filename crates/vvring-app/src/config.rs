//! Run profiles
//!
//! A profile is a RON file holding defaults for every subcommand. Anything
//! given on the command line overrides the profile.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vvring_core::{block_sizes, capacities};

/// Defaults for all subcommands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunProfile {
    pub stress: StressSettings,
    pub stream: StreamSettings,
    pub bench: BenchSettings,
}

impl RunProfile {
    /// Load a profile from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ron_string = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;

        let profile: Self = ron::from_str(&ron_string)
            .with_context(|| format!("Failed to parse profile: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Loaded run profile");
        Ok(profile)
    }

    /// Load `path` if given, otherwise use the built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Write the profile as pretty RON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .context("Failed to serialize profile")?;
        std::fs::write(path.as_ref(), ron_string)
            .with_context(|| format!("Failed to write profile: {}", path.as_ref().display()))?;
        Ok(())
    }
}

/// Sequence stress test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressSettings {
    /// Queue and ring capacity
    pub capacity: usize,
    /// Sequence numbers pushed through each structure
    pub iterations: u64,
}

impl Default for StressSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            iterations: 1_000_000,
        }
    }
}

/// Simulated audio stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub sample_rate: u32,
    pub channels: usize,
    /// Frames pulled by each simulated callback
    pub block_size: usize,
    /// Number of callbacks to simulate
    pub blocks: usize,
    /// Ring capacity in frames
    pub capacity: usize,
    /// Test tone
    pub frequency: f64,
    pub amplitude: f32,
    /// Producer rate relative to realtime; below 1.0 it falls behind
    pub producer_speed: f64,
    /// Capture the callback output to this WAV file
    pub record: Option<PathBuf>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            block_size: block_sizes::BLOCK_256,
            blocks: 200,
            capacity: block_sizes::BLOCK_256 * 8,
            frequency: 440.0,
            amplitude: 0.5,
            producer_speed: 1.05,
            record: None,
        }
    }
}

/// Throughput comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchSettings {
    pub capacity: usize,
    pub iterations: u64,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            capacity: capacities::COMMAND_QUEUE,
            iterations: 5_000_000,
        }
    }
}

/// Replace `target` with `value` when the flag was given
pub fn apply<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_profile_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "(stress: (iterations: 5000), stream: (channels: 1, record: Some(\"out.wav\")))"
        )
        .unwrap();

        let profile = RunProfile::load(file.path()).unwrap();
        assert_eq!(profile.stress.iterations, 5000);
        assert_eq!(profile.stress.capacity, StressSettings::default().capacity);
        assert_eq!(profile.stream.channels, 1);
        assert_eq!(profile.stream.record, Some(PathBuf::from("out.wav")));
        assert_eq!(profile.bench, BenchSettings::default());
    }

    #[test]
    fn test_profile_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.ron");

        let mut profile = RunProfile::default();
        profile.bench.capacity = 64;
        profile.stream.producer_speed = 0.5;
        profile.save(&path).unwrap();

        assert_eq!(RunProfile::load(&path).unwrap(), profile);
    }

    #[test]
    fn test_invalid_profile_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(stress: (capacity: \"lots\"))").unwrap();

        let err = RunProfile::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse profile"));
    }

    #[test]
    fn test_missing_profile_falls_back_only_when_not_given() {
        assert_eq!(RunProfile::load_or_default(None).unwrap(), RunProfile::default());
        assert!(RunProfile::load_or_default(Some(Path::new("/nonexistent/profile.ron"))).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut settings = StressSettings::default();
        apply(&mut settings.capacity, Some(16));
        apply(&mut settings.iterations, None);
        assert_eq!(settings.capacity, 16);
        assert_eq!(settings.iterations, StressSettings::default().iterations);
    }
}
