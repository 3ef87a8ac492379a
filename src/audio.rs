//! Waveforms and the WAV artifacts handed to the player.
//!
//! [`SynthesizedAudio`] is the in-memory result of one request.
//! [`AudioArtifact`] is that waveform written to a uniquely named temporary
//! `.wav` file. The artifact owns the file and removes it when dropped, so the
//! file lives exactly as long as whoever is playing or streaming it holds on
//! to the artifact.

use std::{
    io::{Cursor, Seek, Write},
    path::Path,
};

use anyhow::{Context, Result};
use tempfile::{NamedTempFile, TempPath};

/// Sample rate of every waveform this crate produces.
pub const SAMPLE_RATE: u32 = 16_000;

/// Always mono.
pub const CHANNELS: u16 = 1;

/// 16-bit PCM: plays everywhere, including browsers and Android's
/// `MediaPlayer`, which is not true of IEEE-float WAV.
fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// f32 `[-1.0, 1.0]` → i16, clamping anything outside the range.
fn to_i16(s: f32) -> i16 {
    (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn write_samples<W: Write + Seek>(samples: &[f32], sink: W) -> Result<()> {
    let mut writer = hound::WavWriter::new(sink, wav_spec()).context("Cannot start WAV stream")?;
    for &s in samples {
        writer.write_sample(to_i16(s)).context("WAV write error")?;
    }
    writer.finalize().context("WAV finalise error")?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// SynthesizedAudio
// ─────────────────────────────────────────────────────────────────────────────

/// A mono waveform at [`SAMPLE_RATE`] Hz.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub samples: Vec<f32>,
}

impl SynthesizedAudio {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    pub fn channels(&self) -> u16 {
        CHANNELS
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / SAMPLE_RATE as f64
    }

    /// Encode as a complete WAV file in memory.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        write_samples(&self.samples, &mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Write a WAV file at `path`, replacing any existing file.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Cannot create WAV: {}", path.display()))?;
        write_samples(&self.samples, std::io::BufWriter::new(file))?;
        tracing::debug!(
            samples = self.samples.len(),
            secs = self.duration_secs(),
            path = %path.display(),
            "wrote wav"
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AudioArtifact
// ─────────────────────────────────────────────────────────────────────────────

/// A temporary WAV file, deleted on drop.
#[derive(Debug)]
pub struct AudioArtifact {
    path: TempPath,
    audio: SynthesizedAudio,
}

impl AudioArtifact {
    /// Write `audio` to a new `speecht5-*.wav` file inside `dir`.
    pub fn create(audio: SynthesizedAudio, dir: &Path) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("speecht5-")
            .suffix(".wav")
            .tempfile_in(dir)
            .with_context(|| format!("Cannot create temporary WAV in {}", dir.display()))?;
        Self::fill(file, audio)
    }

    fn fill(file: NamedTempFile, audio: SynthesizedAudio) -> Result<Self> {
        // A failed write drops `file`, which removes it from disk.
        write_samples(&audio.samples, std::io::BufWriter::new(file.as_file()))?;
        let path = file.into_temp_path();
        tracing::debug!(path = %path.display(), samples = audio.samples.len(), "audio artifact written");
        Ok(Self { path, audio })
    }

    /// Location of the WAV file; valid until the artifact is dropped.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The waveform the file was written from.
    pub fn audio(&self) -> &SynthesizedAudio {
        &self.audio
    }

    /// Read the file back, e.g. to stream it to a client before releasing it.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .with_context(|| format!("Cannot read artifact {}", self.path.display()))
    }

    /// Delete the file now, reporting any error instead of swallowing it as
    /// `Drop` does.
    pub fn close(self) -> Result<()> {
        let display = self.path.display().to_string();
        self.path
            .close()
            .with_context(|| format!("Cannot remove artifact {}", display))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize) -> SynthesizedAudio {
        SynthesizedAudio::new(
            (0..len)
                .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / SAMPLE_RATE as f32).sin() * 0.5)
                .collect(),
        )
    }

    #[test]
    fn test_to_i16_clamps() {
        assert_eq!(to_i16(0.0), 0);
        assert_eq!(to_i16(1.0), i16::MAX);
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), i16::MIN);
    }

    #[test]
    fn test_wav_bytes_header() {
        let audio = tone(1600);
        let bytes = audio.to_wav_bytes().unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 1600);
    }

    #[test]
    fn test_duration() {
        assert_eq!(tone(8000).duration_secs(), 0.5);
    }

    #[test]
    fn test_artifact_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = AudioArtifact::create(tone(320), dir.path()).unwrap();
        let path = artifact.path().to_path_buf();

        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("speecht5-") && name.ends_with(".wav"), "{}", name);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.len(), 320);
        drop(reader);

        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn test_artifact_read_then_close() {
        let dir = tempfile::tempdir().unwrap();
        let audio = tone(100);
        let artifact = AudioArtifact::create(audio.clone(), dir.path()).unwrap();
        let path = artifact.path().to_path_buf();

        assert_eq!(artifact.read_bytes().unwrap(), audio.to_wav_bytes().unwrap());
        artifact.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_artifacts_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = AudioArtifact::create(tone(10), dir.path()).unwrap();
        let b = AudioArtifact::create(tone(10), dir.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_write_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        tone(50).write_wav(&path).unwrap();
        assert_eq!(hound::WavReader::open(&path).unwrap().len(), 50);
    }
}
