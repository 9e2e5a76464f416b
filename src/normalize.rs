//! Text normalization for the search index.
//!
//! Mirrors the index analyzer: a standard tokenizer with no stoplist and no
//! minimum token size beyond one character, applied to accent-folded text.
//! Both the FTS tokenizer and the Rust-side match scoring go through these
//! functions so the two always agree on what counts as a token.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Alphanumeric runs in accent-folded text. No stoplist; single-character
/// tokens are kept.
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").unwrap());

/// Check if a character is a Unicode combining mark (diacritical mark).
/// Used to filter out accents during normalization.
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lowercase ASCII by applying NFKD decomposition and
/// removing combining marks, then transliterating any remaining non-ASCII.
/// e.g., "Beyoncé" → "beyonce", "Motörhead" → "motorhead"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

/// Tokenize a query or field value: accent-fold, then split into
/// alphanumeric runs.
pub fn tokenize(s: &str) -> Vec<String> {
    let folded = fold_to_ascii(s);
    TOKEN.find_iter(&folded).map(|m| m.as_str().to_string()).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_to_ascii() {
        assert_eq!(fold_to_ascii("Björk"), "bjork");
        assert_eq!(fold_to_ascii("Motörhead"), "motorhead");
        assert_eq!(fold_to_ascii("Beyoncé"), "beyonce");
    }

    #[test]
    fn test_tokenize_no_stoplist() {
        // Stopwords and single-character tokens survive
        assert_eq!(tokenize("Let It Be"), vec!["let", "it", "be"]);
        assert_eq!(tokenize("A Day in the Life"), vec!["a", "day", "in", "the", "life"]);
    }

    #[test]
    fn test_tokenize_accent_insensitive() {
        assert_eq!(tokenize("Sinéad O'Connor"), vec!["sinead", "o", "connor"]);
        assert_eq!(tokenize("Blue Jay Way"), tokenize("Blüe Jay Wáy"));
    }

    #[test]
    fn test_tokenize_punctuation_split() {
        assert_eq!(tokenize("AC/DC"), vec!["ac", "dc"]);
        assert_eq!(tokenize("  "), Vec::<String>::new());
    }
}
