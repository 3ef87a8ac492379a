//! Text normalisation: raw user text → `[a-z' ]`.
//!
//! The SpeechT5 English checkpoint was fine-tuned on lowercase text with no
//! digits or punctuation other than the apostrophe, so anything outside that
//! alphabet is folded to ASCII where a reasonable mapping exists and deleted
//! otherwise.
//!
//! The pipeline is:
//! 1. **Transliterate**: every non-ASCII character is replaced by its closest
//!    ASCII spelling (`é` → `e`, `ß` → `ss`, `привет` → `privet`,
//!    `δέλτα` → `delta`, `ﬁ` → `fi`). Characters [`deunicode`] has no entry
//!    for fall back to the ASCII part of their NFKD decomposition.
//! 2. **Lowercase**.
//! 3. **Filter**: every character outside `[a-z' ]` is removed.
//!
//! [`normalize`] is total and idempotent; an empty result is valid output.

use deunicode::deunicode_char;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ─────────────────────────────────────────────────────────────────────────────
// Transliteration
// ─────────────────────────────────────────────────────────────────────────────

/// Reduce `text` to its closest ASCII spelling.
///
/// Characters with no transliteration at all are dropped here rather than in
/// the final filter; the result is the same.
pub fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '`' {
            out.push('\'');
        } else if c.is_ascii() {
            out.push(c);
        } else if let Some(ascii) = deunicode_char(c) {
            out.push_str(ascii);
        } else {
            out.extend(std::iter::once(c).nfkd().filter(char::is_ascii));
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Filter
// ─────────────────────────────────────────────────────────────────────────────

static RE_DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z' ]+").unwrap());

/// Delete every character outside `[a-z' ]`.
pub fn strip_disallowed(text: &str) -> String {
    RE_DISALLOWED.replace_all(text, "").into_owned()
}

/// Full normalisation pipeline: transliterate → lowercase → filter.
pub fn normalize(raw: &str) -> String {
    let ascii = transliterate(raw);
    strip_disallowed(&ascii.to_lowercase())
}

/// `true` when `normalized` has nothing for the model to speak.
pub fn is_blank(normalized: &str) -> bool {
    !normalized.chars().any(|c| c.is_ascii_lowercase())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
