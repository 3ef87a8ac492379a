//! # speecht5-tts
//!
//! English text-to-speech with [SpeechT5](https://huggingface.co/microsoft/speecht5_tts)
//! exported to ONNX, plus a one-button web front end.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use speecht5_tts::{SpeakerSource, Synthesizer};
//!
//! // Loads config, tokenizer and the four ONNX graphs from `saved_tts_model/`.
//! let synth = Synthesizer::load(Path::new("saved_tts_model"))
//!     .unwrap()
//!     .with_speaker(SpeakerSource::Seeded(7));
//!
//! // A temporary WAV file that is removed when `wav` is dropped.
//! let wav = synth.synthesize("Hello, World!").unwrap();
//! println!("{}", wav.path().display());
//!
//! // Or keep the waveform in memory (Vec<f32>, 16 kHz mono).
//! let audio = synth.synthesize_audio("hello world").unwrap();
//! audio.write_wav(Path::new("hello.wav")).unwrap();
//! ```
//!
//! ## Web front end
//!
//! ```text
//! cargo run --release --features server --bin speecht5-server -- --model-dir saved_tts_model
//! ```
//!
//! ## Pipeline
//! 1. **Normalisation**: transliterate to ASCII, lowercase, drop everything but `a-z`, `'` and space.
//! 2. **Guard**: text with no letters left is rejected before touching the model.
//! 3. **Encoding**: characters → token IDs, `▁` word markers, `</s>` terminator.
//! 4. **Speaker**: 512-dim x-vector, random per request unless configured.
//! 5. **Acoustic model**: encoder once, decoder autoregressively until the stop
//!    probability crosses the threshold, then postnet → log-mel spectrogram.
//! 6. **Vocoder**: HiFi-GAN spectrogram → 16 kHz waveform.
//! 7. **Artifact**: 16-bit PCM WAV in a uniquely named temp file.

pub mod audio;
pub mod model;
pub mod normalize;
pub mod npy;
pub mod processor;
#[cfg(feature = "server")]
pub mod server;
pub mod speaker;
pub mod synth;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use audio::{AudioArtifact, SynthesizedAudio, SAMPLE_RATE};
pub use model::{ModelHandle, DEFAULT_MODEL_DIR};
pub use normalize::normalize;
pub use speaker::{SpeakerEmbedding, SpeakerSource};
pub use synth::{SynthError, Synthesizer};
