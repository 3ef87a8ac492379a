//! Synthesis requests: raw text in, playable WAV artifact out.
//!
//! One call runs normalise → guard → encode → speaker embedding → acoustic
//! model → vocoder → WAV. Every failure comes back as a [`SynthError`]; the
//! caller decides how to show it, and nothing on this path panics.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    audio::{AudioArtifact, SynthesizedAudio},
    model::ModelHandle,
    normalize::{is_blank, normalize},
    processor::UnknownCharacter,
    speaker::SpeakerSource,
};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    /// Model files missing or unreadable; nothing can be synthesised.
    #[error("failed to load model: {0:#}")]
    ModelLoad(anyhow::Error),

    /// Nothing speakable left after normalisation.
    #[error("no speakable text: input {input:?} contains no English letters")]
    EmptyText { input: String },

    #[error("cannot encode text: {0}")]
    Encoding(#[from] UnknownCharacter),

    #[error("speech generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("audio file error: {0:#}")]
    ArtifactIo(anyhow::Error),
}

impl SynthError {
    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelLoad(_) => "model_load",
            Self::EmptyText { .. } => "empty_text",
            Self::Encoding(_) => "encoding",
            Self::Generation(_) => "generation",
            Self::ArtifactIo(_) => "artifact_io",
        }
    }

    /// `true` when the input, not the system, is at fault.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::EmptyText { .. } | Self::Encoding(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesizer
// ─────────────────────────────────────────────────────────────────────────────

/// The request handler: a shared model plus the speaker policy.
pub struct Synthesizer {
    model: Arc<ModelHandle>,
    speaker: SpeakerSource,
    artifact_dir: PathBuf,
}

impl Synthesizer {
    /// Handler with a fresh random voice per request and artifacts in the
    /// system temp directory.
    pub fn new(model: Arc<ModelHandle>) -> Self {
        Self {
            model,
            speaker: SpeakerSource::default(),
            artifact_dir: std::env::temp_dir(),
        }
    }

    /// Load the model from `model_dir` and wrap it in a default handler.
    pub fn load(model_dir: &Path) -> Result<Self, SynthError> {
        let model = ModelHandle::load(model_dir).map_err(SynthError::ModelLoad)?;
        Ok(Self::new(Arc::new(model)))
    }

    pub fn with_speaker(mut self, speaker: SpeakerSource) -> Self {
        self.speaker = speaker;
        self
    }

    pub fn with_artifact_dir(mut self, dir: PathBuf) -> Self {
        self.artifact_dir = dir;
        self
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn speaker(&self) -> &SpeakerSource {
        &self.speaker
    }

    /// Text → waveform, in memory.
    ///
    /// With [`SpeakerSource::Random`] two calls on the same text give
    /// different voices; the length of the result depends on the model's
    /// stop decisions.
    pub fn synthesize_audio(&self, text: &str) -> Result<SynthesizedAudio, SynthError> {
        let normalized = normalize(text);
        if is_blank(&normalized) {
            tracing::info!(input = text, "rejected: nothing to speak after normalisation");
            return Err(SynthError::EmptyText { input: text.to_string() });
        }

        let input_ids = self.model.processor.encode(&normalized)?;
        let speaker = self.speaker.embedding();

        let samples = self
            .model
            .generate_speech(&input_ids, &speaker)
            .map_err(SynthError::Generation)?;

        let audio = SynthesizedAudio::new(samples);
        tracing::info!(
            chars = normalized.len(),
            tokens = input_ids.len(),
            secs = audio.duration_secs(),
            "synthesized"
        );
        Ok(audio)
    }

    /// Text → temporary WAV file.
    ///
    /// The returned artifact deletes its file when dropped; hold it until the
    /// consumer has finished reading. On error no file is left behind.
    pub fn synthesize(&self, text: &str) -> Result<AudioArtifact, SynthError> {
        let audio = self.synthesize_audio(text)?;
        AudioArtifact::create(audio, &self.artifact_dir).map_err(SynthError::ArtifactIo)
    }

    /// Synthesise, read the WAV bytes back and release the artifact.
    pub fn synthesize_wav_bytes(&self, text: &str) -> Result<Vec<u8>, SynthError> {
        let artifact = self.synthesize(text)?;
        let bytes = artifact.read_bytes().map_err(SynthError::ArtifactIo)?;
        if let Err(err) = artifact.close() {
            tracing::warn!(error = %format!("{:#}", err), "could not remove audio artifact");
        }
        Ok(bytes)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
