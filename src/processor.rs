//! Character-level tokeniser, the "processor" half of SpeechT5.
//!
//! SpeechT5's text side is a SentencePiece model in character mode: every
//! piece is a single character, word boundaries are the `▁` piece, a `▁` is
//! prepended to the text, and `</s>` closes the sequence.
//!
//! The vocabulary is read from the model directory, from the first of
//! - `tokenizer.json`: a HuggingFace tokenizer with a Unigram `model.vocab`
//!   list of `[piece, score]` pairs, where the id is the list index;
//! - `vocab.json`: a flat `{"piece": id}` map;
//! - `spm_char.model`: the SentencePiece protobuf that
//!   `SpeechT5Processor.save_pretrained` writes, where the id is the piece index.
//!
//! An unknown character is an error rather than being skipped: the normaliser
//! should never let one through, so one slipping past means the vocabulary and
//! the normaliser disagree.

use std::{collections::HashMap, path::Path};

use anyhow::{bail, Context, Result};
use prost::Message;
use serde::Deserialize;

/// Word-boundary piece.
pub const WORD_BOUNDARY: char = '\u{2581}';

/// End-of-sequence piece.
pub const EOS: &str = "</s>";

/// Padding piece; present in every SpeechT5 vocabulary.
pub const PAD: &str = "<pad>";

/// Vocabulary file names, in lookup order.
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const VOCAB_FILE: &str = "vocab.json";
pub const SPM_FILE: &str = "spm_char.model";

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// A character in the input has no vocabulary entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("character {ch:?} at position {position} is not in the vocabulary")]
pub struct UnknownCharacter {
    pub ch: char,
    pub position: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// On-disk formats
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TokenizerJson {
    model: TokenizerModel,
}

#[derive(Deserialize)]
struct TokenizerModel {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    vocab: Vec<(String, f64)>,
}

/// `sentencepiece_model.proto` `ModelProto`, reduced to the piece list.
#[derive(Clone, PartialEq, prost::Message)]
struct SentencePieceModel {
    #[prost(message, repeated, tag = "1")]
    pieces: Vec<SentencePiece>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SentencePiece {
    #[prost(string, optional, tag = "1")]
    piece: Option<String>,
    #[prost(float, optional, tag = "2")]
    score: Option<f32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Processor
// ─────────────────────────────────────────────────────────────────────────────

/// Text → token-id encoder.
#[derive(Debug, Clone)]
pub struct Processor {
    chars: HashMap<char, i64>,
    eos_id: i64,
    vocab_size: usize,
}

impl Processor {
    /// Build from a piece → id map.
    ///
    /// Multi-character pieces other than the specials are ignored; a
    /// character-mode model never produces them.
    pub fn from_vocab(vocab: HashMap<String, i64>) -> Result<Self> {
        let eos_id = *vocab
            .get(EOS)
            .with_context(|| format!("vocabulary has no '{}' entry", EOS))?;
        if !vocab.contains_key(PAD) {
            bail!("vocabulary has no '{}' entry", PAD);
        }

        let vocab_size = vocab.len();
        let mut chars = HashMap::new();
        for (piece, id) in vocab {
            let mut it = piece.chars();
            if let (Some(c), None) = (it.next(), it.next()) {
                chars.insert(c, id);
            }
        }
        if !chars.contains_key(&WORD_BOUNDARY) {
            bail!("vocabulary has no word-boundary piece '{}'", WORD_BOUNDARY);
        }

        Ok(Self { chars, eos_id, vocab_size })
    }

    /// Load the vocabulary from `dir`, preferring `tokenizer.json`.
    pub fn load(dir: &Path) -> Result<Self> {
        let tokenizer_path = dir.join(TOKENIZER_FILE);
        let vocab_path = dir.join(VOCAB_FILE);
        let spm_path = dir.join(SPM_FILE);

        let vocab = if tokenizer_path.is_file() {
            let bytes = std::fs::read(&tokenizer_path)
                .with_context(|| format!("Cannot read {}", tokenizer_path.display()))?;
            parse_tokenizer_json(&bytes)
                .with_context(|| format!("Failed to parse {}", tokenizer_path.display()))?
        } else if vocab_path.is_file() {
            let bytes = std::fs::read(&vocab_path)
                .with_context(|| format!("Cannot read {}", vocab_path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse {}", vocab_path.display()))?
        } else if spm_path.is_file() {
            let bytes = std::fs::read(&spm_path)
                .with_context(|| format!("Cannot read {}", spm_path.display()))?;
            parse_spm_model(&bytes)
                .with_context(|| format!("Failed to parse {}", spm_path.display()))?
        } else {
            bail!(
                "No processor vocabulary in {} (expected {}, {} or {})",
                dir.display(),
                TOKENIZER_FILE,
                VOCAB_FILE,
                SPM_FILE
            );
        };

        let processor = Self::from_vocab(vocab)?;
        tracing::debug!(vocab_size = processor.vocab_size, "processor vocabulary loaded");
        Ok(processor)
    }

    /// Number of entries in the vocabulary, specials included.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Map a character to its id, with spaces mapped to the boundary piece.
    pub fn char_to_id(&self, c: char) -> Option<i64> {
        let c = if c == ' ' { WORD_BOUNDARY } else { c };
        self.chars.get(&c).copied()
    }

    /// Encode normalised text to `[▁, c, c, ▁, c, …, </s>]`.
    ///
    /// Runs of spaces collapse to one boundary and leading/trailing spaces are
    /// dropped, as SentencePiece's whitespace normalisation does.
    pub fn encode(&self, text: &str) -> std::result::Result<Vec<i64>, UnknownCharacter> {
        let boundary = self.chars[&WORD_BOUNDARY];
        let mut ids = Vec::with_capacity(text.len() + 2);
        let mut at_word_start = true;

        for (position, ch) in text.chars().enumerate() {
            if ch == ' ' {
                at_word_start = true;
                continue;
            }
            if at_word_start {
                ids.push(boundary);
                at_word_start = false;
            }
            let id = self
                .char_to_id(ch)
                .ok_or(UnknownCharacter { ch, position })?;
            ids.push(id);
        }
        ids.push(self.eos_id);
        Ok(ids)
    }
}

/// Extract `{piece: index}` from a HuggingFace Unigram `tokenizer.json`.
fn parse_tokenizer_json(bytes: &[u8]) -> Result<HashMap<String, i64>> {
    let parsed: TokenizerJson = serde_json::from_slice(bytes)?;
    if let Some(kind) = parsed.model.kind.as_deref() {
        if kind != "Unigram" {
            bail!("Unsupported tokenizer model '{}', expected Unigram", kind);
        }
    }
    Ok(parsed
        .model
        .vocab
        .into_iter()
        .enumerate()
        .map(|(i, (piece, _score))| (piece, i as i64))
        .collect())
}

/// Extract `{piece: index}` from a serialised SentencePiece model.
fn parse_spm_model(bytes: &[u8]) -> Result<HashMap<String, i64>> {
    let model = SentencePieceModel::decode(bytes).context("not a SentencePiece model")?;
    if model.pieces.is_empty() {
        bail!("SentencePiece model has no pieces");
    }
    Ok(model
        .pieces
        .into_iter()
        .enumerate()
        .filter_map(|(i, p)| p.piece.map(|piece| (piece, i as i64)))
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Specials first, then boundary, apostrophe and a–z.
    pub(crate) fn test_vocab() -> HashMap<String, i64> {
        let mut pieces: Vec<String> = ["<s>", "<pad>", "</s>", "<unk>", "\u{2581}", "'"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        pieces.extend(('a'..='z').map(|c| c.to_string()));
        pieces.into_iter().enumerate().map(|(i, p)| (p, i as i64)).collect()
    }

    pub(crate) fn test_processor() -> Processor {
        Processor::from_vocab(test_vocab()).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let p = test_processor();
        let ids = p.encode("hi yo").unwrap();
        let b = p.char_to_id(WORD_BOUNDARY).unwrap();
        let expected = vec![
            b,
            p.char_to_id('h').unwrap(),
            p.char_to_id('i').unwrap(),
            b,
            p.char_to_id('y').unwrap(),
            p.char_to_id('o').unwrap(),
            2,
        ];
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_spaces_collapse() {
        let p = test_processor();
        assert_eq!(p.encode("  a   b ").unwrap(), p.encode("a b").unwrap());
    }

    #[test]
    fn test_empty_is_just_eos() {
        let p = test_processor();
        assert_eq!(p.encode("").unwrap(), vec![2]);
    }

    #[test]
    fn test_unknown_character() {
        let p = test_processor();
        let err = p.encode("ab c9").unwrap_err();
        assert_eq!(err, UnknownCharacter { ch: '9', position: 4 });
    }

    #[test]
    fn test_missing_specials_rejected() {
        let mut vocab = test_vocab();
        vocab.remove("</s>");
        assert!(Processor::from_vocab(vocab).is_err());

        let mut vocab = test_vocab();
        vocab.remove("\u{2581}");
        assert!(Processor::from_vocab(vocab).is_err());
    }

    #[test]
    fn test_parse_tokenizer_json() {
        let json = r#"{
            "version": "1.0",
            "model": {
                "type": "Unigram",
                "unk_id": 3,
                "vocab": [["<s>", 0.0], ["<pad>", 0.0], ["</s>", 0.0], ["<unk>", 0.0],
                          ["▁", -1.5], ["e", -2.0], ["t", -2.1]]
            }
        }"#;
        let vocab = parse_tokenizer_json(json.as_bytes()).unwrap();
        assert_eq!(vocab["</s>"], 2);
        assert_eq!(vocab["e"], 5);
        let p = Processor::from_vocab(vocab).unwrap();
        assert_eq!(p.encode("tee").unwrap(), vec![4, 6, 5, 5, 2]);
    }

    #[test]
    fn test_load_prefers_tokenizer_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(VOCAB_FILE),
            serde_json::to_vec(&test_vocab()).unwrap(),
        )
        .unwrap();
        let p = Processor::load(dir.path()).unwrap();
        assert_eq!(p.vocab_size(), 32);

        std::fs::write(
            dir.path().join(TOKENIZER_FILE),
            r#"{"model": {"vocab": [["<s>", 0], ["<pad>", 0], ["</s>", 0], ["▁", 0]]}}"#,
        )
        .unwrap();
        let p = Processor::load(dir.path()).unwrap();
        assert_eq!(p.vocab_size(), 4);
    }

    fn spm_bytes(pieces: &[&str]) -> Vec<u8> {
        SentencePieceModel {
            pieces: pieces
                .iter()
                .map(|p| SentencePiece { piece: Some(p.to_string()), score: Some(0.0) })
                .collect(),
        }
        .encode_to_vec()
    }

    #[test]
    fn test_load_spm_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SPM_FILE),
            spm_bytes(&["<s>", "<pad>", "</s>", "<unk>", "\u{2581}", "e", "t"]),
        )
        .unwrap();
        let p = Processor::load(dir.path()).unwrap();
        assert_eq!(p.vocab_size(), 7);
        assert_eq!(p.encode("tee").unwrap(), vec![4, 6, 5, 5, 2]);
    }

    #[test]
    fn test_spm_model_skips_unknown_fields() {
        // trainer_spec (field 2) as an empty message, then the pieces.
        let mut bytes = vec![0x12, 0x00];
        bytes.extend(spm_bytes(&["<pad>", "</s>", "\u{2581}", "a"]));
        let vocab = parse_spm_model(&bytes).unwrap();
        assert_eq!(vocab["a"], 3);
    }

    #[test]
    fn test_spm_model_rejects_garbage() {
        assert!(parse_spm_model(b"not a protobuf \xff\xff").is_err());
        assert!(parse_spm_model(&[]).is_err());
    }

    #[test]
    fn test_load_missing_vocab() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Processor::load(dir.path()).is_err());
    }
}
