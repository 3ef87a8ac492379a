//! Speaker embeddings: the 512-dimensional x-vector that picks the voice.
//!
//! SpeechT5 conditions every decoder step on a speaker embedding. There is no
//! "default" voice: whatever vector is passed *is* the voice. Three policies
//! are offered through [`SpeakerSource`]:
//!
//! | Policy              | Voice across calls                         |
//! |---------------------|--------------------------------------------|
//! | `Random` (default)  | different every call, not reproducible     |
//! | `Seeded(seed)`      | identical every call for the same seed     |
//! | `Fixed(embedding)`  | the given (e.g. CMU ARCTIC) x-vector       |
//!
//! Random vectors are drawn element-wise from N(0, 1).

use std::path::Path;

use anyhow::{bail, Context, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::npy::{load_npy, load_npz, NpyArray};

/// Length of a SpeechT5 speaker embedding.
pub const SPEAKER_EMBEDDING_DIM: usize = 512;

/// A single speaker x-vector of exactly [`SPEAKER_EMBEDDING_DIM`] values.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerEmbedding(Vec<f32>);

impl SpeakerEmbedding {
    /// Wrap a vector, checking its length.
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.len() != SPEAKER_EMBEDDING_DIM {
            bail!(
                "speaker embedding must have {} values, got {}",
                SPEAKER_EMBEDDING_DIM,
                values.len()
            );
        }
        Ok(Self(values))
    }

    /// Draw every element from the standard normal distribution.
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(
            (0..SPEAKER_EMBEDDING_DIM)
                .map(|_| rng.sample::<f32, _>(StandardNormal))
                .collect(),
        )
    }

    /// Fresh, unseeded embedding.
    pub fn random() -> Self {
        Self::sample(&mut rand::thread_rng())
    }

    /// Deterministic embedding for `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self::sample(&mut StdRng::seed_from_u64(seed))
    }

    /// Load from a `.npy` file, or from an `.npz` archive member.
    ///
    /// For `.npz`, `key` selects the member; without one the first member in
    /// name order is used. Shapes `(512,)` and `(1, 512)` are both accepted.
    pub fn load(path: &Path, key: Option<&str>) -> Result<Self> {
        let is_npz = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("npz"));

        let array = if is_npz {
            let mut arrays = load_npz(path)?;
            match key {
                Some(k) => arrays.remove(k).with_context(|| {
                    format!(
                        "speaker '{}' not in {}. Available: {:?}",
                        k,
                        path.display(),
                        arrays.keys().collect::<Vec<_>>()
                    )
                })?,
                None => arrays
                    .into_values()
                    .next()
                    .with_context(|| format!("{} contains no arrays", path.display()))?,
            }
        } else {
            load_npy(path)?
        };

        Self::from_array(array).with_context(|| format!("Bad speaker embedding in {}", path.display()))
    }

    fn from_array(array: NpyArray) -> Result<Self> {
        let rows = match array.shape.as_slice() {
            [_] => 1,
            [rows, _] => *rows,
            other => bail!("expected a 1-D or 2-D array, got shape {:?}", other),
        };
        if rows != 1 {
            bail!("expected a single embedding, got {} rows", rows);
        }
        Self::new(array.data)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Where each request's speaker embedding comes from.
#[derive(Debug, Clone, Default)]
pub enum SpeakerSource {
    /// Fresh N(0, 1) sample per request. Identical text yields a different
    /// voice every time.
    #[default]
    Random,
    /// Same sampled voice on every request.
    Seeded(u64),
    /// A precomputed embedding used as-is.
    Fixed(SpeakerEmbedding),
}

impl SpeakerSource {
    /// Produce the embedding for one request.
    pub fn embedding(&self) -> SpeakerEmbedding {
        match self {
            Self::Random => SpeakerEmbedding::random(),
            Self::Seeded(seed) => SpeakerEmbedding::seeded(*seed),
            Self::Fixed(embedding) => embedding.clone(),
        }
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Random => "random per request".to_string(),
            Self::Seeded(seed) => format!("seeded ({})", seed),
            Self::Fixed(_) => "fixed embedding".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
