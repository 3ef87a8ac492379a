//! ONNX model runner: processor, acoustic model and vocoder.
//!
//! Uses [`ort`] (ONNX Runtime Rust bindings) for inference. A SpeechT5 export
//! is split into four graphs; all inputs are positional:
//!
//! | Graph                 | Inputs                                                   | Outputs                       |
//! |-----------------------|----------------------------------------------------------|-------------------------------|
//! | `encoder_model.onnx`  | `input_ids` i64 `[1, L]`                                 | hidden f32 `[1, L, H]`        |
//! | `decoder_model.onnx`  | `output_sequence` f32 `[1, n, mel]`, hidden, speaker `[1, 512]` | spectrum `[1, r, mel]`, prob `[1, r]` |
//! | `postnet.onnx`        | spectrogram f32 `[1, T, mel]`                            | spectrogram f32 `[1, T, mel]` |
//! | `vocoder/vocoder.onnx`| spectrogram f32 `[T, mel]`                               | waveform f32 `[N]`            |
//!
//! The decoder is run without a KV cache: every step re-feeds the whole
//! output sequence, which keeps the export simple at the cost of quadratic
//! decoder work in the utterance length.

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{anyhow, bail, Context, Result};
use ort::{session::Session, value::Tensor};
use serde::Deserialize;

use crate::{
    audio::SAMPLE_RATE,
    processor::Processor,
    speaker::{SpeakerEmbedding, SPEAKER_EMBEDDING_DIM},
};

/// Model directory used when none is given.
pub const DEFAULT_MODEL_DIR: &str = "saved_tts_model";

const CONFIG_FILE: &str = "config.json";
const ENCODER_FILE: &str = "encoder_model.onnx";
const DECODER_FILE: &str = "decoder_model.onnx";
const POSTNET_FILE: &str = "postnet.onnx";
const VOCODER_DIR: &str = "vocoder";
const VOCODER_FILE: &str = "vocoder.onnx";

// ─────────────────────────────────────────────────────────────────────────────
// config.json schemas
// ─────────────────────────────────────────────────────────────────────────────

/// The generation-relevant subset of a HuggingFace `SpeechT5Config`.
///
/// Every key has the SpeechT5 default, so a minimal `{}` is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub num_mel_bins: usize,
    pub reduction_factor: usize,
    pub speaker_embedding_dim: usize,
    /// Stop once the summed stop probabilities of a step reach this.
    pub threshold: f32,
    /// Minimum output length, as a multiple of the input length.
    pub minlenratio: f32,
    /// Maximum output length, as a multiple of the input length.
    pub maxlenratio: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_mel_bins: 80,
            reduction_factor: 2,
            speaker_embedding_dim: SPEAKER_EMBEDDING_DIM,
            threshold: 0.5,
            minlenratio: 0.0,
            maxlenratio: 20.0,
        }
    }
}

impl ModelConfig {
    /// Parse `config.json`; a missing file means all defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "no config.json, using SpeechT5 defaults");
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)
            .with_context(|| format!("Cannot read config: {}", path.display()))?;
        let config: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.speaker_embedding_dim != SPEAKER_EMBEDDING_DIM {
            bail!(
                "speaker_embedding_dim is {}, only {} is supported",
                self.speaker_embedding_dim,
                SPEAKER_EMBEDDING_DIM
            );
        }
        if self.num_mel_bins == 0 || self.reduction_factor == 0 {
            bail!("num_mel_bins and reduction_factor must be positive");
        }
        if self.maxlenratio <= 0.0 || self.minlenratio < 0.0 || self.minlenratio > self.maxlenratio {
            bail!(
                "invalid length ratios: minlenratio={} maxlenratio={}",
                self.minlenratio,
                self.maxlenratio
            );
        }
        Ok(())
    }

    /// `(minlen, maxlen)` in decoder steps for an input of `input_len` tokens.
    pub fn step_bounds(&self, input_len: usize) -> (usize, usize) {
        let r = self.reduction_factor as f32;
        let minlen = (input_len as f32 * self.minlenratio / r) as usize;
        let maxlen = (input_len as f32 * self.maxlenratio / r) as usize;
        (minlen, maxlen.max(1))
    }
}

/// `vocoder/config.json` (`SpeechT5HifiGanConfig`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VocoderConfig {
    pub sampling_rate: u32,
    pub model_in_dim: usize,
}

impl Default for VocoderConfig {
    fn default() -> Self {
        Self { sampling_rate: SAMPLE_RATE, model_in_dim: 80 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Spectrogram
// ─────────────────────────────────────────────────────────────────────────────

/// Log-mel spectrogram, `frames × bins`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    pub bins: usize,
    pub data: Vec<f32>,
}

impl Spectrogram {
    pub fn new(bins: usize, data: Vec<f32>) -> Result<Self> {
        if bins == 0 || data.len() % bins != 0 {
            bail!("spectrogram of {} values is not a multiple of {} bins", data.len(), bins);
        }
        Ok(Self { bins, data })
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.bins
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Component traits
// ─────────────────────────────────────────────────────────────────────────────

/// Token ids + speaker embedding → spectrogram.
pub trait AcousticModel: Send + Sync {
    fn generate_spectrogram(&self, input_ids: &[i64], speaker: &SpeakerEmbedding) -> Result<Spectrogram>;
}

/// Spectrogram → waveform at [`SAMPLE_RATE`].
pub trait Vocoder: Send + Sync {
    fn vocode(&self, spectrogram: &Spectrogram) -> Result<Vec<f32>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// ONNX helpers
// ─────────────────────────────────────────────────────────────────────────────

fn load_session(path: &Path) -> Result<Mutex<Session>> {
    if !path.is_file() {
        bail!("ONNX model not found: {}", path.display());
    }
    let session = Session::builder()
        .context("Failed to create ORT session builder")?
        .commit_from_file(path)
        .with_context(|| format!("Cannot load ONNX model: {}", path.display()))?;
    tracing::debug!(path = %path.display(), "onnx session ready");
    Ok(Mutex::new(session))
}

fn lock(session: &Mutex<Session>) -> Result<std::sync::MutexGuard<'_, Session>> {
    session.lock().map_err(|_| anyhow!("ORT session mutex poisoned"))
}

/// Copy a float output tensor to a flat `Vec<f32>`.
fn to_vec_f32(value: &ort::value::DynValue, what: &str) -> Result<Vec<f32>> {
    let (_shape, data) = value
        .try_extract_tensor::<f32>()
        .with_context(|| format!("Failed to extract {} tensor", what))?;
    Ok(data.to_vec())
}

// ─────────────────────────────────────────────────────────────────────────────
// SpeechT5 acoustic model
// ─────────────────────────────────────────────────────────────────────────────

/// Encoder, decoder and postnet sessions plus their config.
pub struct OnnxAcousticModel {
    encoder: Mutex<Session>,
    decoder: Mutex<Session>,
    postnet: Mutex<Session>,
    config: ModelConfig,
}

impl OnnxAcousticModel {
    pub fn load(dir: &Path, config: ModelConfig) -> Result<Self> {
        Ok(Self {
            encoder: load_session(&dir.join(ENCODER_FILE))?,
            decoder: load_session(&dir.join(DECODER_FILE))?,
            postnet: load_session(&dir.join(POSTNET_FILE))?,
            config,
        })
    }

    fn encode(&self, input_ids: &[i64]) -> Result<(usize, Vec<f32>)> {
        let seq_len = input_ids.len();
        let t_ids = Tensor::<i64>::from_array(([1usize, seq_len], input_ids.to_vec()))
            .context("Failed to build input_ids tensor")?;
        let hidden = {
            let mut session = lock(&self.encoder)?;
            let outputs = session
                .run(ort::inputs![t_ids])
                .context("Encoder inference failed")?;
            to_vec_f32(&outputs[0], "encoder hidden state")?
        };
        if hidden.is_empty() || hidden.len() % seq_len != 0 {
            bail!("encoder returned {} values for {} tokens", hidden.len(), seq_len);
        }
        Ok((hidden.len() / seq_len, hidden))
    }

    /// One decoder step: `r` new frames (flat) and `r` stop probabilities.
    fn decode_step(
        &self,
        output_sequence: &[f32],
        hidden: &[f32],
        hidden_dim: usize,
        speaker: &SpeakerEmbedding,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let mel = self.config.num_mel_bins;
        let r = self.config.reduction_factor;
        let n = output_sequence.len() / mel;
        let seq_len = hidden.len() / hidden_dim;

        let t_seq = Tensor::<f32>::from_array(([1usize, n, mel], output_sequence.to_vec()))
            .context("Failed to build output_sequence tensor")?;
        let t_hidden = Tensor::<f32>::from_array(([1usize, seq_len, hidden_dim], hidden.to_vec()))
            .context("Failed to build encoder_hidden_states tensor")?;
        let t_speaker =
            Tensor::<f32>::from_array(([1usize, SPEAKER_EMBEDDING_DIM], speaker.as_slice().to_vec()))
                .context("Failed to build speaker_embeddings tensor")?;

        let (spectrum, prob) = {
            let mut session = lock(&self.decoder)?;
            let outputs = session
                .run(ort::inputs![t_seq, t_hidden, t_speaker])
                .context("Decoder inference failed")?;
            (to_vec_f32(&outputs[0], "spectrum")?, to_vec_f32(&outputs[1], "stop probability")?)
        };

        // Exports that return the whole sequence still end with this step.
        if spectrum.len() < r * mel || prob.len() < r {
            bail!(
                "decoder returned {} spectrum values and {} probabilities, expected {} and {}",
                spectrum.len(),
                prob.len(),
                r * mel,
                r
            );
        }
        Ok((
            spectrum[spectrum.len() - r * mel..].to_vec(),
            prob[prob.len() - r..].to_vec(),
        ))
    }

    fn postnet(&self, raw: Vec<f32>) -> Result<Vec<f32>> {
        let mel = self.config.num_mel_bins;
        let frames = raw.len() / mel;
        let t_spec = Tensor::<f32>::from_array(([1usize, frames, mel], raw))
            .context("Failed to build spectrogram tensor")?;
        let refined = {
            let mut session = lock(&self.postnet)?;
            let outputs = session
                .run(ort::inputs![t_spec])
                .context("Postnet inference failed")?;
            to_vec_f32(&outputs[0], "postnet")?
        };
        if refined.len() != frames * mel {
            bail!("postnet returned {} values, expected {}", refined.len(), frames * mel);
        }
        Ok(refined)
    }
}

impl AcousticModel for OnnxAcousticModel {
    fn generate_spectrogram(&self, input_ids: &[i64], speaker: &SpeakerEmbedding) -> Result<Spectrogram> {
        if input_ids.is_empty() {
            bail!("no input tokens");
        }
        let mel = self.config.num_mel_bins;
        let (hidden_dim, hidden) = self.encode(input_ids)?;
        let (minlen, maxlen) = self.config.step_bounds(input_ids.len());

        let mut step = |seq: &[f32]| self.decode_step(seq, &hidden, hidden_dim, speaker);
        let raw = run_decoder_loop(&self.config, minlen, maxlen, &mut step)?;

        tracing::debug!(
            tokens = input_ids.len(),
            frames = raw.len() / mel,
            "spectrogram generated"
        );
        Spectrogram::new(mel, self.postnet(raw)?)
    }
}

/// The autoregressive stop/continue loop, independent of the ONNX plumbing.
///
/// `step` gets the decoder input so far and returns `(frames, probs)`.
/// Returns the concatenated (pre-postnet) frames.
pub fn run_decoder_loop<F>(config: &ModelConfig, minlen: usize, maxlen: usize, step: &mut F) -> Result<Vec<f32>>
where
    F: FnMut(&[f32]) -> Result<(Vec<f32>, Vec<f32>)>,
{
    let mel = config.num_mel_bins;
    let mut output_sequence = vec![0.0f32; mel];
    let mut spectrogram = Vec::new();
    let mut steps = 0usize;

    loop {
        steps += 1;
        let (frames, prob) = step(&output_sequence)?;
        if frames.is_empty() || frames.len() % mel != 0 {
            bail!("decoder step produced {} values, not whole {}-bin frames", frames.len(), mel);
        }
        let last = &frames[frames.len() - mel..];
        output_sequence.extend_from_slice(last);
        spectrogram.extend_from_slice(&frames);

        if steps < minlen {
            continue;
        }
        let stop: f32 = prob.iter().sum();
        if stop >= config.threshold || steps >= maxlen {
            tracing::trace!(steps, stop, maxlen, "decoder loop finished");
            break;
        }
    }
    Ok(spectrogram)
}

// ─────────────────────────────────────────────────────────────────────────────
// HiFi-GAN vocoder
// ─────────────────────────────────────────────────────────────────────────────

pub struct OnnxVocoder {
    session: Mutex<Session>,
    config: VocoderConfig,
}

impl OnnxVocoder {
    /// Load `vocoder.onnx` and the optional `config.json` from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        let config = if config_path.is_file() {
            let bytes = std::fs::read(&config_path)
                .with_context(|| format!("Cannot read vocoder config: {}", config_path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            VocoderConfig::default()
        };
        if config.sampling_rate != SAMPLE_RATE {
            tracing::warn!(
                vocoder_rate = config.sampling_rate,
                output_rate = SAMPLE_RATE,
                "vocoder sampling rate differs from output rate; audio will play at the wrong speed"
            );
        }
        Ok(Self { session: load_session(&dir.join(VOCODER_FILE))?, config })
    }
}

impl Vocoder for OnnxVocoder {
    fn vocode(&self, spectrogram: &Spectrogram) -> Result<Vec<f32>> {
        if spectrogram.bins != self.config.model_in_dim {
            bail!(
                "vocoder expects {} mel bins, spectrogram has {}",
                self.config.model_in_dim,
                spectrogram.bins
            );
        }
        let t_spec = Tensor::<f32>::from_array((
            [spectrogram.frames(), spectrogram.bins],
            spectrogram.data.clone(),
        ))
        .context("Failed to build vocoder input tensor")?;
        let mut session = lock(&self.session)?;
        let outputs = session
            .run(ort::inputs![t_spec])
            .context("Vocoder inference failed")?;
        to_vec_f32(&outputs[0], "waveform")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ModelHandle
// ─────────────────────────────────────────────────────────────────────────────

/// The loaded processor, acoustic model and vocoder.
///
/// Built once per process and shared read-only; every method takes `&self`.
pub struct ModelHandle {
    pub processor: Processor,
    pub acoustic: Box<dyn AcousticModel>,
    pub vocoder: Box<dyn Vocoder>,
    pub config: ModelConfig,
    pub model_dir: Option<PathBuf>,
}

impl ModelHandle {
    /// Load everything from a SpeechT5 model directory.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("Model directory not found: {}", dir.display());
        }
        tracing::info!(dir = %dir.display(), "loading SpeechT5 model");

        let config = ModelConfig::load(&dir.join(CONFIG_FILE))?;
        let processor = Processor::load(dir).context("Failed to load processor")?;
        let acoustic =
            OnnxAcousticModel::load(dir, config.clone()).context("Failed to load acoustic model")?;
        let vocoder = OnnxVocoder::load(&dir.join(VOCODER_DIR)).context("Failed to load vocoder")?;

        tracing::info!(
            vocab = processor.vocab_size(),
            mel_bins = config.num_mel_bins,
            reduction_factor = config.reduction_factor,
            "model loaded"
        );
        Ok(Self {
            processor,
            acoustic: Box::new(acoustic),
            vocoder: Box::new(vocoder),
            config,
            model_dir: Some(dir.to_path_buf()),
        })
    }

    /// Assemble a handle from already-built components.
    pub fn from_parts(
        processor: Processor,
        acoustic: Box<dyn AcousticModel>,
        vocoder: Box<dyn Vocoder>,
        config: ModelConfig,
    ) -> Self {
        Self { processor, acoustic, vocoder, config, model_dir: None }
    }

    /// Token ids → waveform: acoustic model, then vocoder.
    pub fn generate_speech(&self, input_ids: &[i64], speaker: &SpeakerEmbedding) -> Result<Vec<f32>> {
        let spectrogram = self.acoustic.generate_spectrogram(input_ids, speaker)?;
        self.vocoder.vocode(&spectrogram)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
